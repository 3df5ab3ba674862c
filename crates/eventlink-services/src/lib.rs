//! eventlink-services — the mesh core: connections, the peer registry, and
//! replicated routing tables. The daemon and the admin API both build on it.

pub mod connection;
pub mod manager;
pub mod replication;
pub mod routing;
pub mod send_target;
pub mod transport;
pub mod trust;
pub mod worker;

pub use connection::{
    Connection, ConnectionContext, ConnectionSettings, Direction, PeerStream, TeardownOutcome,
    WorkerLiveness,
};
pub use manager::{ConnectionManager, ConnectionRegistry, DeleteOutcome, RegisterError, SendError};
pub use routing::{RoutingTableEntry, RoutingTableManager};
pub use send_target::SendTarget;
pub use transport::{Authenticated, TcpTransport, Transport, TransportError};
pub use trust::{TrustStore, TrustedPeer};
