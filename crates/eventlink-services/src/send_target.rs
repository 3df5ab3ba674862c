//! Send targeting: every live peer, or a named list of peers.

use serde::{Deserialize, Serialize};

/// Who a packet is addressed to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SendTarget {
    /// Every peer with a live connection.
    #[default]
    Broadcast,

    /// These peers, all of which must be connected.
    Peers { names: Vec<String> },
}

impl SendTarget {
    pub fn peer(name: impl Into<String>) -> Self {
        Self::Peers {
            names: vec![name.into()],
        }
    }

    pub fn peers<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Peers {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_shape() {
        let json = serde_json::to_value(SendTarget::peers(["a", "b"])).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "peers", "names": ["a", "b"] }));

        let back: SendTarget = serde_json::from_str(r#"{"type":"broadcast"}"#).unwrap();
        assert_eq!(back, SendTarget::Broadcast);
    }
}
