//! Routing tables — who currently owns a named resource on the mesh.
//!
//! Each table maps an entry key (a player name, a world name, a server name)
//! to the peer that owns it. Tables are replicated best-effort: local
//! mutations are published as [`RouteUpdate`]s, remote updates are applied
//! with last-writer-wins on the owner's timestamp. Nothing here is
//! consensus; two servers can briefly disagree.
//!
//! Two mechanisms remove entries of a peer that went away:
//! - [`RoutingTableManager::clear_routes_through`], called once when the
//!   peer's canonical connection is torn down;
//! - the TTL, which hides and eventually evicts remote entries whose owner
//!   stopped refreshing them (crash, partition).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;

use eventlink_core::{RouteOp, RouteUpdate};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Ownership record for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingTableEntry {
    /// Name of the server that owns the key.
    pub owner: String,
    /// Owner's clock at the last refresh, ms since the Unix epoch.
    pub timestamp_ms: u64,
    /// Free-form metadata, e.g. the world a player is in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl RoutingTableEntry {
    pub fn new(owner: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            owner: owner.into(),
            timestamp_ms,
            location: None,
        }
    }

    /// Does `self` beat `other` for the same key?
    ///
    /// Later timestamp wins; a tie goes to the greater owner name so every
    /// node picks the same winner regardless of arrival order.
    fn supersedes(&self, other: &RoutingTableEntry) -> bool {
        (self.timestamp_ms, self.owner.as_str()) >= (other.timestamp_ms, other.owner.as_str())
    }
}

type Table = HashMap<String, RoutingTableEntry>;

/// Owns every routing table on this server.
///
/// Cheap to clone; clones share the same tables. Each table is locked only
/// for one mutation or snapshot copy at a time.
#[derive(Clone)]
pub struct RoutingTableManager {
    local_name: Arc<str>,
    ttl: Duration,
    tables: Arc<DashMap<String, Table>>,
    publish: Option<mpsc::UnboundedSender<RouteUpdate>>,
}

impl RoutingTableManager {
    pub fn new(local_name: impl Into<Arc<str>>, ttl: Duration) -> Self {
        Self {
            local_name: local_name.into(),
            ttl,
            tables: Arc::new(DashMap::new()),
            publish: None,
        }
    }

    /// Publish every local mutation on `tx` for replication to peers.
    pub fn publishing_to(mut self, tx: mpsc::UnboundedSender<RouteUpdate>) -> Self {
        self.publish = Some(tx);
        self
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn publish(&self, update: RouteUpdate) {
        if let Some(tx) = &self.publish {
            if tx.send(update).is_err() {
                tracing::debug!("route publisher closed, update not replicated");
            }
        }
    }

    fn is_live(&self, entry: &RoutingTableEntry, now: u64) -> bool {
        // Local entries are authoritative and never age out.
        entry.owner == *self.local_name
            || now.saturating_sub(entry.timestamp_ms) <= self.ttl.as_millis() as u64
    }

    // ── Local mutations ───────────────────────────────────────────────────────

    /// Claim `table/key` for this server, stamped now.
    pub fn add_entry(&self, table: &str, key: &str) -> bool {
        self.add_located_entry(table, key, None)
    }

    /// Claim `table/key` for this server with location metadata.
    pub fn add_located_entry(&self, table: &str, key: &str, location: Option<String>) -> bool {
        let entry = RoutingTableEntry {
            owner: self.local_name.to_string(),
            timestamp_ms: now_ms(),
            location,
        };
        let update = RouteUpdate {
            op: RouteOp::Add,
            table: table.to_string(),
            key: key.to_string(),
            owner: entry.owner.clone(),
            timestamp_ms: entry.timestamp_ms,
            location: entry.location.clone(),
        };
        let applied = self.insert_entry(table, key, entry);
        if applied {
            self.publish(update);
        }
        applied
    }

    /// Remove one entry. Withdrawal is replicated if we owned it.
    pub fn delete_entry(&self, table: &str, key: &str) -> bool {
        let removed = self
            .tables
            .get_mut(table)
            .and_then(|mut t| t.remove(key));

        match removed {
            Some(entry) => {
                if entry.owner == *self.local_name {
                    self.publish(RouteUpdate {
                        op: RouteOp::Delete,
                        table: table.to_string(),
                        key: key.to_string(),
                        owner: entry.owner,
                        timestamp_ms: now_ms(),
                        location: None,
                    });
                }
                true
            }
            None => false,
        }
    }

    /// Remove a whole table. Peers drop our entries in it.
    pub fn delete_table(&self, table: &str) -> bool {
        let removed = self.tables.remove(table).is_some();
        self.publish(RouteUpdate {
            op: RouteOp::DropTable,
            table: table.to_string(),
            key: String::new(),
            owner: self.local_name.to_string(),
            timestamp_ms: now_ms(),
            location: None,
        });
        removed
    }

    /// Last-writer-wins upsert. Returns false if the stored entry is newer.
    pub fn insert_entry(&self, table: &str, key: &str, entry: RoutingTableEntry) -> bool {
        let mut t = self.tables.entry(table.to_string()).or_default();
        if t.get(key).is_some_and(|current| !entry.supersedes(current)) {
            return false;
        }
        t.insert(key.to_string(), entry);
        true
    }

    // ── Remote updates ────────────────────────────────────────────────────────

    /// Apply a route update received from `from_peer`.
    ///
    /// Updates that name an owner other than the sender, or that claim this
    /// server as owner, are dropped. Returns whether anything changed.
    pub fn apply_update(&self, from_peer: &str, update: &RouteUpdate) -> bool {
        if update.owner != from_peer {
            tracing::warn!(
                peer = from_peer,
                owner = %update.owner,
                table = %update.table,
                "route update for foreign owner, dropping"
            );
            return false;
        }
        if update.owner == *self.local_name {
            tracing::warn!(peer = from_peer, table = %update.table, "peer claims our name, dropping");
            return false;
        }

        match update.op {
            RouteOp::Add => self.insert_entry(
                &update.table,
                &update.key,
                RoutingTableEntry {
                    owner: update.owner.clone(),
                    timestamp_ms: update.timestamp_ms,
                    location: update.location.clone(),
                },
            ),
            RouteOp::Delete => {
                let Some(mut t) = self.tables.get_mut(&update.table) else {
                    return false;
                };
                let owned = t.get(&update.key).is_some_and(|e| {
                    e.owner == update.owner && e.timestamp_ms <= update.timestamp_ms
                });
                if owned {
                    t.remove(&update.key);
                }
                owned
            }
            RouteOp::DropTable => {
                let Some(mut t) = self.tables.get_mut(&update.table) else {
                    return false;
                };
                let before = t.len();
                t.retain(|_, e| e.owner != update.owner);
                before != t.len()
            }
        }
    }

    /// Remove every entry, in every table, owned by `peer`.
    pub fn clear_routes_through(&self, peer: &str) -> usize {
        let mut removed = 0;
        for mut table in self.tables.iter_mut() {
            let before = table.len();
            table.retain(|_, e| e.owner != peer);
            removed += before - table.len();
        }
        tracing::debug!(peer, removed, "routes cleared");
        removed
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    /// Snapshot of the live entries of `table`. Empty if the table is unknown.
    pub fn get_entries(&self, table: &str) -> HashMap<String, RoutingTableEntry> {
        let now = now_ms();
        self.tables
            .get(table)
            .map(|t| {
                t.iter()
                    .filter(|(_, e)| self.is_live(e, now))
                    .map(|(k, e)| (k.clone(), e.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Current owner of `table/key`, if any live entry exists.
    pub fn get_location(&self, table: &str, key: &str) -> Option<String> {
        let now = now_ms();
        self.tables
            .get(table)?
            .get(key)
            .filter(|e| self.is_live(e, now))
            .map(|e| e.owner.clone())
    }

    /// Full live entry for `table/key`.
    pub fn get_entry(&self, table: &str, key: &str) -> Option<RoutingTableEntry> {
        let now = now_ms();
        self.tables
            .get(table)?
            .get(key)
            .filter(|e| self.is_live(e, now))
            .cloned()
    }

    /// Snapshot of the live keys of `table`.
    pub fn copy_key_set(&self, table: &str) -> HashSet<String> {
        let now = now_ms();
        self.tables
            .get(table)
            .map(|t| {
                t.iter()
                    .filter(|(_, e)| self.is_live(e, now))
                    .map(|(k, _)| k.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Ordered snapshot of every live entry, for diagnostics and the API.
    pub fn snapshot(&self) -> BTreeMap<String, BTreeMap<String, RoutingTableEntry>> {
        let now = now_ms();
        self.tables
            .iter()
            .map(|t| {
                let entries = t
                    .value()
                    .iter()
                    .filter(|(_, e)| self.is_live(e, now))
                    .map(|(k, e)| (k.clone(), e.clone()))
                    .collect();
                (t.key().clone(), entries)
            })
            .collect()
    }

    /// Dump every table to the log.
    pub fn list_tables_to_log(&self) {
        let snapshot = self.snapshot();
        tracing::info!(tables = snapshot.len(), "routing tables");
        for (table, entries) in snapshot {
            tracing::info!(table = %table, entries = entries.len(), "  table");
            for (key, e) in entries {
                tracing::info!(
                    key = %key,
                    owner = %e.owner,
                    location = e.location.as_deref().unwrap_or("-"),
                    age_ms = now_ms().saturating_sub(e.timestamp_ms),
                    "    entry"
                );
            }
        }
    }

    // ── Maintenance ───────────────────────────────────────────────────────────

    /// Evict remote entries past the TTL. Returns how many went.
    pub fn expire_stale(&self) -> usize {
        let now = now_ms();
        let mut removed = 0;
        for mut table in self.tables.iter_mut() {
            let before = table.len();
            table.retain(|_, e| self.is_live(e, now));
            removed += before - table.len();
        }
        self.tables.retain(|_, t| !t.is_empty());
        removed
    }

    /// Every locally owned entry as an Add update, with its stored timestamp.
    pub fn local_updates(&self) -> Vec<RouteUpdate> {
        let mut updates = Vec::new();
        for table in self.tables.iter() {
            for (key, e) in table.value() {
                if e.owner == *self.local_name {
                    updates.push(RouteUpdate {
                        op: RouteOp::Add,
                        table: table.key().clone(),
                        key: key.clone(),
                        owner: e.owner.clone(),
                        timestamp_ms: e.timestamp_ms,
                        location: e.location.clone(),
                    });
                }
            }
        }
        updates
    }

    /// Drop every table that holds a locally owned entry, publishing one
    /// DropTable per table. Tables with only remote entries are left alone.
    pub fn withdraw_local(&self) -> usize {
        let owned: std::collections::BTreeSet<String> =
            self.local_updates().into_iter().map(|u| u.table).collect();
        for table in &owned {
            self.delete_table(table);
        }
        owned.len()
    }

    /// Re-stamp every local entry with the current time and publish it, so
    /// remote copies stay inside the TTL while we are alive.
    pub fn announce_local(&self) -> usize {
        let now = now_ms();
        let mut announced = 0;
        for mut table in self.tables.iter_mut() {
            let name = table.key().clone();
            for (key, e) in table.value_mut() {
                if e.owner != *self.local_name {
                    continue;
                }
                e.timestamp_ms = e.timestamp_ms.max(now);
                announced += 1;
                self.publish(RouteUpdate {
                    op: RouteOp::Add,
                    table: name.clone(),
                    key: key.clone(),
                    owner: e.owner.clone(),
                    timestamp_ms: e.timestamp_ms,
                    location: e.location.clone(),
                });
            }
        }
        announced
    }
}
