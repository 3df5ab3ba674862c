//! eventlink-core — wire format and configuration shared by every EventLink crate.
//! Nothing in here touches the network or an async runtime.

pub mod config;
pub mod wire;

pub use wire::{EventPayload, Hello, Packet, PacketKind, RouteOp, RouteUpdate};
