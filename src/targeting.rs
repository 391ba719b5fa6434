//! Targeting resolver (spec §4.4, component F): turns a logical target
//! (a user, a set of users, a specific connection, everyone) into the set of
//! connection IDs a call should actually be dispatched to.

use serde::{Deserialize, Serialize};

use crate::error::HubResult;
use crate::ids::{ConnectionId, UserId};
use crate::registry::ConnectionRegistry;

/// Spec §4.4's five target shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Target {
    All,
    User(UserId),
    Users(Vec<UserId>),
    Connection(ConnectionId),
    Connections(Vec<ConnectionId>),
}

impl Target {
    /// Resolves to the connection IDs currently eligible to receive a call,
    /// per the spec §4.4 table. `User`/`Users` sweep stale rows for the
    /// named user(s) first; `Connection`/`Connections` only check the row
    /// is marked active, with no staleness sweep.
    pub async fn resolve(
        &self,
        registry: &ConnectionRegistry,
    ) -> HubResult<Vec<ConnectionId>> {
        match self {
            Target::All => {
                let users = registry.snapshot_users().await?;
                Ok(users
                    .into_iter()
                    .flat_map(|u| u.connections)
                    .map(|c| c.connection_id)
                    .collect())
            }
            Target::User(user_id) => registry.connections_of(user_id).await,
            Target::Users(user_ids) => {
                registry.connections_of_users(user_ids).await
            }
            Target::Connection(connection_id) => {
                if registry.connection_is_active(connection_id).await? {
                    Ok(vec![connection_id.clone()])
                } else {
                    Ok(Vec::new())
                }
            }
            Target::Connections(connection_ids) => {
                let mut out = Vec::with_capacity(connection_ids.len());
                for connection_id in connection_ids {
                    if registry.connection_is_active(connection_id).await? {
                        out.push(connection_id.clone());
                    }
                }
                Ok(out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::events::EventBroadcaster;
    use crate::registry::{DieselConnectionStore, NullUserLookup};

    fn registry_with_pool(
        pool: crate::db::DbPool,
    ) -> ConnectionRegistry {
        ConnectionRegistry::new(
            Arc::new(DieselConnectionStore::new(pool)),
            Arc::new(NullUserLookup),
            EventBroadcaster::default(),
            Duration::from_secs(300),
            true,
            false,
        )
    }

    #[tokio::test]
    async fn user_target_resolves_to_all_of_that_users_connections() {
        let pool = crate::db::init_test_pool();
        let registry = registry_with_pool(pool);
        registry.on_open("u1", "c1", None).await.unwrap();
        registry.on_open("u1", "c2", None).await.unwrap();
        registry.on_open("u2", "c3", None).await.unwrap();

        let mut resolved =
            Target::User("u1".into()).resolve(&registry).await.unwrap();
        resolved.sort();
        assert_eq!(resolved, vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn connection_target_is_empty_when_not_active() {
        let pool = crate::db::init_test_pool();
        let registry = registry_with_pool(pool);

        let resolved = Target::Connection("ghost".into())
            .resolve(&registry)
            .await
            .unwrap();
        assert!(resolved.is_empty());
    }

    #[tokio::test]
    async fn all_target_covers_every_open_connection() {
        let pool = crate::db::init_test_pool();
        let registry = registry_with_pool(pool);
        registry.on_open("u1", "c1", None).await.unwrap();
        registry.on_open("u2", "c2", None).await.unwrap();

        let mut resolved = Target::All.resolve(&registry).await.unwrap();
        resolved.sort();
        assert_eq!(resolved, vec!["c1", "c2"]);
    }
}
