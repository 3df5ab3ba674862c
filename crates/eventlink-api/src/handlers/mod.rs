//! HTTP API handlers — exposes mesh state as JSON.

pub mod routes;
pub mod send;
pub mod status;
pub mod trust;

use std::time::Instant;

use eventlink_services::{ConnectionManager, RoutingTableManager, TrustStore};

#[derive(Clone)]
pub struct ApiState {
    pub manager: ConnectionManager,
    pub trust: TrustStore,
    pub started_at: Instant,
}

impl ApiState {
    pub fn new(manager: ConnectionManager, trust: TrustStore) -> Self {
        Self {
            manager,
            trust,
            started_at: Instant::now(),
        }
    }

    fn routes(&self) -> &RoutingTableManager {
        self.manager.routes()
    }
}
