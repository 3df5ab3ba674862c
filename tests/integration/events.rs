use crate::*;

use eventlink_services::{SendError, SendTarget};

/// Events sent on one link arrive in the order they were sent.
#[tokio::test]
async fn test_events_arrive_in_order() -> Result<()> {
    let alpha = Node::start("alpha").await?;
    let beta = Node::start("beta").await?;
    link(&alpha, &beta).await?;

    for i in 0..20 {
        alpha
            .manager
            .send_event(&SendTarget::peer("beta"), "tick", serde_json::json!({ "seq": i }))?;
    }

    let got = beta.events(20).await?;
    let seqs: Vec<u64> = got
        .iter()
        .map(|(_, e)| e.data["seq"].as_u64().unwrap_or(u64::MAX))
        .collect();
    assert_eq!(seqs, (0..20u64).collect::<Vec<_>>());
    assert!(got.iter().all(|(peer, e)| peer == "alpha" && e.source == "alpha"));

    alpha.stop().await;
    beta.stop().await;
    Ok(())
}

/// Naming an unconnected peer fails the whole send.
#[tokio::test]
async fn test_unknown_target_fails() -> Result<()> {
    let alpha = Node::start("alpha").await?;
    let beta = Node::start("beta").await?;
    link(&alpha, &beta).await?;

    let err = alpha
        .manager
        .send_event(
            &SendTarget::peers(["beta", "offline-peer"]),
            "ping",
            serde_json::Value::Null,
        )
        .unwrap_err();
    assert_eq!(err, SendError::UnknownTarget(vec!["offline-peer".into()]));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(beta.manager.drain_inbound().is_empty(), "partial send leaked");

    alpha.stop().await;
    beta.stop().await;
    Ok(())
}

/// Broadcast reaches every connected peer.
#[tokio::test]
async fn test_broadcast_reaches_all_peers() -> Result<()> {
    let alpha = Node::start("alpha").await?;
    let beta = Node::start("beta").await?;
    let gamma = Node::start("gamma").await?;
    link(&alpha, &beta).await?;
    link(&alpha, &gamma).await?;

    let queued = alpha
        .manager
        .send_event(&SendTarget::Broadcast, "announce", serde_json::json!("hi"))?;
    assert_eq!(queued, 2);

    for node in [&beta, &gamma] {
        let got = node.events(1).await?;
        assert_eq!(got[0].1.name, "announce");
    }

    alpha.stop().await;
    beta.stop().await;
    gamma.stop().await;
    Ok(())
}
