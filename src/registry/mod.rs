//! Connection registry (spec §4.2, component B): durable
//! `(UserID -> {ConnectionID...})` with lifecycle hooks that tolerate
//! missed disconnects, duplicate registrations, and crashes.
//!
//! Grounded on the teacher's `stream/stream_manager.rs`, whose
//! `DashMap<UserId, ConnectionEntry>` + generation-counter duplicate guard
//! is the in-memory analogue of the durable, diesel-backed version here:
//! the spec additionally requires survival across process crashes, so the
//! registry of record is a SQL table instead of a map, and the duplicate
//! guard is "delete the old row" instead of "compare generation numbers".

mod store;

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDateTime, Utc};

pub use store::{ConnectionSnapshot, ConnectionStore, DieselConnectionStore, UserSnapshot};

use crate::error::HubResult;
use crate::events::{ConnectionEvent, ConnectionEventKind, EventBroadcaster};

/// External identity lookup seam (spec §1: "Identity stores (user lookup
/// for display is a plain key -> record probe)"). Out of scope for this
/// core beyond this interface; a no-op default is used when the caller
/// doesn't wire one up.
pub trait UserLookup: Send + Sync {
    fn display_name(&self, user_id: &str) -> Option<String>;
}

pub struct NullUserLookup;

impl UserLookup for NullUserLookup {
    fn display_name(&self, _user_id: &str) -> Option<String> {
        None
    }
}

pub struct ConnectionRegistry {
    store: Arc<dyn ConnectionStore>,
    user_lookup: Arc<dyn UserLookup>,
    events: EventBroadcaster,
    stale_age: Duration,
    auto_purge_offline: bool,
    broadcast_enabled: bool,
}

impl ConnectionRegistry {
    pub fn new(
        store: Arc<dyn ConnectionStore>,
        user_lookup: Arc<dyn UserLookup>,
        events: EventBroadcaster,
        stale_age: Duration,
        auto_purge_offline: bool,
        broadcast_enabled: bool,
    ) -> Self {
        Self {
            store,
            user_lookup,
            events,
            stale_age,
            auto_purge_offline,
            broadcast_enabled,
        }
    }

    fn stale_before(&self, now: NaiveDateTime) -> NaiveDateTime {
        now - chrono::Duration::from_std(self.stale_age)
            .unwrap_or(chrono::Duration::zero())
    }

    pub fn subscribe_events(
        &self,
    ) -> tokio::sync::broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Spec §4.2 open procedure. Unauthenticated opens (`user_id.is_empty()`)
    /// create no record and return silently (spec §4.2 edge-case policy).
    pub async fn on_open(
        &self,
        user_id: &str,
        connection_id: &str,
        user_agent: Option<&str>,
    ) -> HubResult<()> {
        if user_id.is_empty() {
            tracing::debug!(
                connection_id,
                "open without userID ignored (unauthenticated)"
            );
            return Ok(());
        }

        let now = Utc::now().naive_utc();
        let stale_before = self.stale_before(now);
        let store = Arc::clone(&self.store);
        let (uid, cid, ua) = (
            user_id.to_string(),
            connection_id.to_string(),
            user_agent.map(str::to_string),
        );
        let auto_purge_offline = self.auto_purge_offline;
        let reopened = tokio::task::spawn_blocking(move || {
            store.open(
                &uid,
                &cid,
                ua.as_deref(),
                auto_purge_offline,
                stale_before,
                now,
            )
        })
        .await
        .expect("registry open task should not panic")?;

        tracing::info!(user_id, connection_id, "registered connection");

        if self.broadcast_enabled {
            // Step 2's duplicate-replay guard replaced an existing row under
            // the same connection ID: this is a reopen, not a fresh
            // connection (spec §4.2 step 2).
            let kind = if reopened {
                ConnectionEventKind::Reopened
            } else {
                ConnectionEventKind::Opened
            };
            self.events.publish(ConnectionEvent::new(
                user_id,
                connection_id,
                user_agent.map(str::to_string),
                kind,
            ));
        }
        Ok(())
    }

    /// Spec §4.2 close procedure. A close without a `user_id` is a no-op on
    /// the registry and MUST NOT broadcast (spec §4.2 edge-case policy).
    pub async fn on_close(
        &self,
        user_id: &str,
        connection_id: &str,
    ) -> HubResult<()> {
        if user_id.is_empty() {
            return Ok(());
        }

        let now = Utc::now().naive_utc();
        let store = Arc::clone(&self.store);
        let (uid, cid) = (user_id.to_string(), connection_id.to_string());
        let deleted = tokio::task::spawn_blocking(move || {
            store.close(&uid, &cid, now)
        })
        .await
        .expect("registry close task should not panic")?;

        if deleted {
            tracing::info!(user_id, connection_id, "unregistered connection");
        } else {
            tracing::debug!(
                user_id,
                connection_id,
                "close was a no-op (already gone)"
            );
        }

        if self.broadcast_enabled {
            self.events.publish(ConnectionEvent::new(
                user_id,
                connection_id,
                None,
                ConnectionEventKind::Closed,
            ));
        }
        Ok(())
    }

    pub async fn is_connected(&self, user_id: &str) -> HubResult<bool> {
        let now = Utc::now().naive_utc();
        let stale_before = self.stale_before(now);
        let store = Arc::clone(&self.store);
        let uid = user_id.to_string();
        tokio::task::spawn_blocking(move || {
            store.is_connected(&uid, stale_before)
        })
        .await
        .expect("registry is_connected task should not panic")
    }

    pub async fn count_users(&self) -> HubResult<i64> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.count_users())
            .await
            .expect("registry count_users task should not panic")
    }

    pub async fn count_connections(&self) -> HubResult<i64> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.count_connections())
            .await
            .expect("registry count_connections task should not panic")
    }

    /// Sweeps stale rows for this user first, per spec §4.4.
    pub async fn connections_of(
        &self,
        user_id: &str,
    ) -> HubResult<Vec<String>> {
        let now = Utc::now().naive_utc();
        let stale_before = self.stale_before(now);
        let store = Arc::clone(&self.store);
        let uid = user_id.to_string();
        tokio::task::spawn_blocking(move || {
            store.connections_of(&uid, stale_before)
        })
        .await
        .expect("registry connections_of task should not panic")
    }

    /// Sweeps stale rows for every named user first, per spec §4.4.
    pub async fn connections_of_users(
        &self,
        user_ids: &[String],
    ) -> HubResult<Vec<String>> {
        let now = Utc::now().naive_utc();
        let stale_before = self.stale_before(now);
        let store = Arc::clone(&self.store);
        let uids = user_ids.to_vec();
        tokio::task::spawn_blocking(move || {
            store.connections_of_users(&uids, stale_before)
        })
        .await
        .expect("registry connections_of_users task should not panic")
    }

    /// No staleness sweep: spec §4.4's `Connection(id)` row only checks the
    /// connection is currently marked active.
    pub async fn connection_is_active(
        &self,
        connection_id: &str,
    ) -> HubResult<bool> {
        let store = Arc::clone(&self.store);
        let cid = connection_id.to_string();
        tokio::task::spawn_blocking(move || store.connection_is_active(&cid))
            .await
            .expect("registry connection_is_active task should not panic")
    }

    pub async fn snapshot_users(&self) -> HubResult<Vec<UserSnapshot>> {
        let now = Utc::now().naive_utc();
        let stale_before = self.stale_before(now);
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.snapshot_users(stale_before))
            .await
            .expect("registry snapshot_users task should not panic")
    }

    pub fn display_name(&self, user_id: &str) -> Option<String> {
        self.user_lookup.display_name(user_id)
    }

    /// Administrative force-disconnect (spec §9: logout, ban). Always
    /// broadcasts `Closed` for every connection removed, if broadcast is on.
    pub async fn force_close(&self, user_id: &str) -> HubResult<()> {
        let now = Utc::now().naive_utc();
        let connection_ids = self.connections_of(user_id).await?;
        let store = Arc::clone(&self.store);
        let uid = user_id.to_string();
        tokio::task::spawn_blocking(move || store.force_close_user(&uid, now))
            .await
            .expect("registry force_close task should not panic")?;

        if self.broadcast_enabled {
            for connection_id in connection_ids {
                self.events.publish(ConnectionEvent::new(
                    user_id,
                    connection_id,
                    None,
                    ConnectionEventKind::Closed,
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_pool(
        pool: crate::db::DbPool,
        stale_age: Duration,
    ) -> ConnectionRegistry {
        ConnectionRegistry::new(
            Arc::new(DieselConnectionStore::new(pool)),
            Arc::new(NullUserLookup),
            EventBroadcaster::default(),
            stale_age,
            true,
            true,
        )
    }

    #[tokio::test]
    async fn open_then_close_round_trips() {
        let pool = crate::db::init_test_pool();
        let registry =
            registry_with_pool(pool, Duration::from_secs(5 * 60));

        registry.on_open("u1", "c1", Some("ua")).await.unwrap();
        assert!(registry.is_connected("u1").await.unwrap());
        assert_eq!(registry.connections_of("u1").await.unwrap(), vec!["c1"]);

        registry.on_close("u1", "c1").await.unwrap();
        assert!(!registry.is_connected("u1").await.unwrap());
        assert!(registry.connections_of("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_open_of_same_connection_id_is_idempotent() {
        let pool = crate::db::init_test_pool();
        let registry =
            registry_with_pool(pool, Duration::from_secs(5 * 60));

        registry.on_open("u1", "c1", None).await.unwrap();
        registry.on_open("u1", "c1", None).await.unwrap();
        assert_eq!(registry.connections_of("u1").await.unwrap(), vec!["c1"]);
    }

    #[tokio::test]
    async fn concurrent_opens_from_different_connections_both_persist() {
        let pool = crate::db::init_test_pool();
        let registry =
            registry_with_pool(pool, Duration::from_secs(5 * 60));

        registry.on_open("u1", "c1", None).await.unwrap();
        registry.on_open("u1", "c2", None).await.unwrap();
        let mut conns = registry.connections_of("u1").await.unwrap();
        conns.sort();
        assert_eq!(conns, vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn redundant_close_is_a_noop() {
        let pool = crate::db::init_test_pool();
        let registry =
            registry_with_pool(pool, Duration::from_secs(5 * 60));

        registry.on_open("u1", "c1", None).await.unwrap();
        registry.on_close("u1", "c1").await.unwrap();
        // Second close of the same, already-removed connection must not error.
        registry.on_close("u1", "c1").await.unwrap();
    }

    #[tokio::test]
    async fn open_without_user_id_creates_no_record() {
        let pool = crate::db::init_test_pool();
        let registry =
            registry_with_pool(pool, Duration::from_secs(5 * 60));

        registry.on_open("", "c1", None).await.unwrap();
        assert_eq!(registry.count_users().await.unwrap(), 0);
        assert_eq!(registry.count_connections().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stale_connection_is_deleted_by_per_user_resolution_not_just_hidden() {
        let pool = crate::db::init_test_pool();
        let registry =
            registry_with_pool(pool, Duration::from_millis(10));

        registry.on_open("u1", "c1", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(registry.connections_of("u1").await.unwrap().is_empty());
        // Spec §3: "No Connection row whose OpenedAt is older than the
        // staleness horizon survives a target-resolution pass" - the row
        // must actually be gone, not merely excluded from this one result.
        assert_eq!(registry.count_connections().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reopening_the_same_connection_id_broadcasts_reopened() {
        let pool = crate::db::init_test_pool();
        let registry =
            registry_with_pool(pool, Duration::from_secs(5 * 60));
        let mut events = registry.subscribe_events();

        registry.on_open("u1", "c1", None).await.unwrap();
        assert_eq!(events.recv().await.unwrap().kind, ConnectionEventKind::Opened);

        registry.on_open("u1", "c1", None).await.unwrap();
        assert_eq!(
            events.recv().await.unwrap().kind,
            ConnectionEventKind::Reopened
        );
    }

    #[tokio::test]
    async fn stale_connection_is_deleted_by_multi_user_resolution() {
        let pool = crate::db::init_test_pool();
        let registry =
            registry_with_pool(pool, Duration::from_millis(10));

        registry.on_open("u1", "c1", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let users = vec!["u1".to_string()];
        assert!(registry
            .connections_of_users(&users)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(registry.count_connections().await.unwrap(), 0);
    }
}
