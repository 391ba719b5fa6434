//! Wiring / public facade: the `Hub` owns one instance of every component
//! (B through I) and is the single value application code and the
//! transport layer hold a reference to.
//!
//! Grounded on `stream/stream_manager.rs`'s `StreamManager::global()`
//! singleton: that type lazily constructed itself with no external state.
//! This `Hub` needs a database pool and a loaded `HubConfig` before it can
//! exist, so it follows the teacher's other global-state idiom instead —
//! `config::init()`/`config::get()` — an explicit `init()` called once from
//! `main`, backed by a `OnceLock`.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::admission::AdmissionControl;
use crate::blob::{BlobStore, FsBlobStore};
use crate::config::HubConfig;
use crate::db::DbPool;
use crate::events::EventBroadcaster;
use crate::pending::PendingTable;
use crate::registry::{
    ConnectionRegistry, ConnectionStore, DieselConnectionStore, NullUserLookup,
    UserLookup,
};
use crate::response::Response;
use crate::transport::Dispatcher;

static HUB: OnceLock<Hub> = OnceLock::new();

pub struct Hub {
    pub config: &'static HubConfig,
    pub registry: ConnectionRegistry,
    pub dispatcher: Dispatcher,
    pub pending: PendingTable,
    pub admission: AdmissionControl,
    pub blob_store: Arc<dyn BlobStore>,
}

impl Hub {
    /// Builds the hub from an already-migrated connection pool and the
    /// process-global config, and installs it as the singleton. Panics if
    /// called more than once.
    pub fn init(pool: DbPool, config: &'static HubConfig) {
        Self::init_with(
            Arc::new(DieselConnectionStore::new(pool)),
            Arc::new(NullUserLookup),
            Arc::new(FsBlobStore::new(&config.temp_folder)),
            config,
        );
    }

    /// As [`Self::init`], but lets a caller (tests, or a deployment using a
    /// non-default `ConnectionStore`/`UserLookup`/`BlobStore`) supply the
    /// seams directly.
    pub fn init_with(
        store: Arc<dyn ConnectionStore>,
        user_lookup: Arc<dyn UserLookup>,
        blob_store: Arc<dyn BlobStore>,
        config: &'static HubConfig,
    ) {
        let registry = ConnectionRegistry::new(
            store,
            user_lookup,
            EventBroadcaster::default(),
            config.stale_age(),
            config.auto_purge_offline,
            config.broadcast_connection_events,
        );
        let hub = Hub {
            config,
            registry,
            dispatcher: Dispatcher::new(),
            pending: PendingTable::new(),
            admission: AdmissionControl::new(
                config.max_concurrent_requests,
                config.semaphore_timeout(),
            ),
            blob_store,
        };
        HUB.set(hub)
            .unwrap_or_else(|_| panic!("Hub::init called more than once"));
    }

    pub fn global() -> &'static Hub {
        HUB.get().expect("Hub::init must run before Hub::global() is used")
    }

    pub fn request_timeout(&self) -> Duration {
        self.config.request_timeout()
    }

    /// Delivers a completion for `request_id` to whoever is awaiting it in
    /// `invoke()`. Logs and discards late or duplicate replies (spec §4.3
    /// step 5, §5) instead of treating them as an error — the sender
    /// already got what it needed, or never will.
    pub fn complete(&self, request_id: crate::ids::RequestId, response: Response) {
        if !self.pending.complete(request_id, response) {
            tracing::warn!(
                request_id = %request_id,
                "discarded late or duplicate reply"
            );
        }
    }
}
