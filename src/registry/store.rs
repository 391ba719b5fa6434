use chrono::NaiveDateTime;
use diesel::prelude::*;

use crate::db::{self, DbConn};
use crate::error::HubResult;
use crate::models::{Connection, ConnectedUser};

/// A single user's connections, as returned by [`ConnectionStore::snapshot_users`].
#[derive(Debug, Clone)]
pub struct UserSnapshot {
    pub user_id: String,
    pub connections: Vec<ConnectionSnapshot>,
}

#[derive(Debug, Clone)]
pub struct ConnectionSnapshot {
    pub connection_id: String,
    pub user_agent: Option<String>,
    pub opened_at: NaiveDateTime,
}

/// Durable storage seam for the connection registry (spec §9: "Generics over
/// user and store types ... express it as two narrow interfaces"). The
/// default implementation is backed by diesel/SQLite; an alternative store
/// (Postgres, Redis, a plain in-memory map for tests) need only implement
/// this trait.
pub trait ConnectionStore: Send + Sync {
    /// Runs the full open procedure of spec §4.2 steps 1-6 as one logical
    /// transaction. Returns whether step 2's duplicate-replay guard actually
    /// removed a pre-existing row under `connection_id` - i.e. whether this
    /// open is a reopen of the same connection ID rather than a fresh one.
    fn open(
        &self,
        user_id: &str,
        connection_id: &str,
        user_agent: Option<&str>,
        auto_purge_offline: bool,
        stale_before: NaiveDateTime,
        now: NaiveDateTime,
    ) -> HubResult<bool>;

    /// Runs the close procedure of spec §4.2: mark disconnect, delete the
    /// row, verify, retry once if it reappeared. Returns whether a row was
    /// actually deleted (false = redundant/idempotent close).
    fn close(
        &self,
        user_id: &str,
        connection_id: &str,
        now: NaiveDateTime,
    ) -> HubResult<bool>;

    fn is_connected(
        &self,
        user_id: &str,
        stale_before: NaiveDateTime,
    ) -> HubResult<bool>;

    fn count_users(&self) -> HubResult<i64>;

    fn count_connections(&self) -> HubResult<i64>;

    fn connections_of(
        &self,
        user_id: &str,
        stale_before: NaiveDateTime,
    ) -> HubResult<Vec<String>>;

    fn connections_of_users(
        &self,
        user_ids: &[String],
        stale_before: NaiveDateTime,
    ) -> HubResult<Vec<String>>;

    /// Used by the targeting resolver for `Target::Connection`: confirms the
    /// connection row exists and is active, without a staleness sweep (spec
    /// §4.4 table).
    fn connection_is_active(&self, connection_id: &str) -> HubResult<bool>;

    fn snapshot_users(
        &self,
        stale_before: NaiveDateTime,
    ) -> HubResult<Vec<UserSnapshot>>;

    /// Administrative force-disconnect: removes every connection row for a
    /// user regardless of staleness (spec §9: logout/ban).
    fn force_close_user(&self, user_id: &str, now: NaiveDateTime)
    -> HubResult<()>;
}

pub struct DieselConnectionStore {
    pool: db::DbPool,
}

impl DieselConnectionStore {
    pub fn new(pool: db::DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> HubResult<DbConn> {
        db::get(&self.pool)
    }
}

fn sweep_stale_for_user(
    conn: &mut SqliteConnectionRef,
    target_user_id: &str,
    stale_before: NaiveDateTime,
) -> diesel::result::QueryResult<usize> {
    use crate::schema::connections::dsl::*;
    diesel::delete(
        connections
            .filter(user_id.eq(target_user_id))
            .filter(active.eq(false).or(opened_at.lt(stale_before))),
    )
    .execute(conn)
}

fn sweep_stale_for_users(
    conn: &mut SqliteConnectionRef,
    target_user_ids: &[String],
    stale_before: NaiveDateTime,
) -> diesel::result::QueryResult<usize> {
    use crate::schema::connections::dsl::*;
    diesel::delete(
        connections
            .filter(user_id.eq_any(target_user_ids))
            .filter(active.eq(false).or(opened_at.lt(stale_before))),
    )
    .execute(conn)
}

fn sweep_all_inactive(
    conn: &mut SqliteConnectionRef,
) -> diesel::result::QueryResult<usize> {
    use crate::schema::connections::dsl::*;
    diesel::delete(connections.filter(active.eq(false))).execute(conn)
}

// diesel's `SqliteConnection` is the concrete backend behind `DbConn`; this
// alias just keeps the free functions above readable.
type SqliteConnectionRef = diesel::sqlite::SqliteConnection;

impl ConnectionStore for DieselConnectionStore {
    fn open(
        &self,
        target_user_id: &str,
        target_connection_id: &str,
        target_user_agent: Option<&str>,
        auto_purge_offline: bool,
        stale_before: NaiveDateTime,
        now: NaiveDateTime,
    ) -> HubResult<bool> {
        use crate::schema::connected_users::dsl as cu;
        use crate::schema::connections::dsl as c;

        let mut conn = self.conn()?;
        let reopened = conn.transaction::<_, diesel::result::Error, _>(
            |conn| {
                // 1. sweep stale/inactive rows for this user
                sweep_stale_for_user(conn, target_user_id, stale_before)?;

                // 2. duplicate-replay guard
                let replaced = diesel::delete(
                    c::connections
                        .filter(c::connection_id.eq(target_connection_id)),
                )
                .execute(conn)?
                    > 0;

                // 3. upsert user record, bump last_connect_at
                diesel::insert_into(cu::connected_users)
                    .values(ConnectedUser {
                        user_id: target_user_id.to_string(),
                        last_connect_at: Some(now),
                        last_disconnect_at: None,
                    })
                    .on_conflict(cu::user_id)
                    .do_update()
                    .set(cu::last_connect_at.eq(now))
                    .execute(conn)?;

                // 4. insert the new connection row
                diesel::insert_into(c::connections)
                    .values(Connection {
                        connection_id: target_connection_id.to_string(),
                        user_id: target_user_id.to_string(),
                        user_agent: target_user_agent.map(str::to_string),
                        active: true,
                        opened_at: now,
                    })
                    .execute(conn)?;

                // 5. optional global sweep
                if auto_purge_offline {
                    sweep_all_inactive(conn)?;
                }

                Ok(replaced)
            },
        )?;
        Ok(reopened)
    }

    fn close(
        &self,
        target_user_id: &str,
        target_connection_id: &str,
        now: NaiveDateTime,
    ) -> HubResult<bool> {
        use crate::schema::connected_users::dsl as cu;
        use crate::schema::connections::dsl as c;

        let mut conn = self.conn()?;
        let deleted = conn.transaction::<_, diesel::result::Error, _>(
            |conn| {
                diesel::update(
                    cu::connected_users.filter(cu::user_id.eq(target_user_id)),
                )
                .set(cu::last_disconnect_at.eq(Some(now)))
                .execute(conn)?;

                let mut deleted = diesel::delete(
                    c::connections
                        .filter(c::connection_id.eq(target_connection_id)),
                )
                .execute(conn)?;

                // Verify deletion; if the row somehow reappeared under a
                // concurrent writer, attempt once more (spec §4.2 step 3).
                let still_present: i64 = c::connections
                    .filter(c::connection_id.eq(target_connection_id))
                    .count()
                    .get_result(conn)?;
                if still_present > 0 {
                    tracing::warn!(
                        connection_id = target_connection_id,
                        "connection row reappeared after close, retrying delete"
                    );
                    deleted += diesel::delete(
                        c::connections
                            .filter(c::connection_id.eq(target_connection_id)),
                    )
                    .execute(conn)?;
                }

                Ok(deleted)
            },
        )?;
        Ok(deleted > 0)
    }

    fn is_connected(
        &self,
        target_user_id: &str,
        stale_before: NaiveDateTime,
    ) -> HubResult<bool> {
        use crate::schema::connections::dsl::*;
        let mut conn = self.conn()?;
        let count: i64 = connections
            .filter(user_id.eq(target_user_id))
            .filter(active.eq(true))
            .filter(opened_at.ge(stale_before))
            .count()
            .get_result(&mut conn)?;
        Ok(count > 0)
    }

    fn count_users(&self) -> HubResult<i64> {
        use crate::schema::connected_users::dsl::*;
        let mut conn = self.conn()?;
        Ok(connected_users.count().get_result(&mut conn)?)
    }

    fn count_connections(&self) -> HubResult<i64> {
        use crate::schema::connections::dsl::*;
        let mut conn = self.conn()?;
        Ok(connections.count().get_result(&mut conn)?)
    }

    /// Sweeps (deletes) stale rows for `target_user_id` before selecting, in
    /// one transaction, so a stale row does not survive the pass (spec §3:
    /// "No Connection row whose OpenedAt is older than the staleness horizon
    /// survives a target-resolution pass.").
    fn connections_of(
        &self,
        target_user_id: &str,
        stale_before: NaiveDateTime,
    ) -> HubResult<Vec<String>> {
        use crate::schema::connections::dsl::*;
        let mut conn = self.conn()?;
        let rows = conn.transaction::<_, diesel::result::Error, _>(|conn| {
            sweep_stale_for_user(conn, target_user_id, stale_before)?;
            connections
                .filter(user_id.eq(target_user_id))
                .filter(active.eq(true))
                .select(connection_id)
                .load(conn)
        })?;
        Ok(rows)
    }

    /// As [`Self::connections_of`], swept across every named user in one
    /// transaction.
    fn connections_of_users(
        &self,
        target_user_ids: &[String],
        stale_before: NaiveDateTime,
    ) -> HubResult<Vec<String>> {
        use crate::schema::connections::dsl::*;
        let mut conn = self.conn()?;
        let rows = conn.transaction::<_, diesel::result::Error, _>(|conn| {
            sweep_stale_for_users(conn, target_user_ids, stale_before)?;
            connections
                .filter(user_id.eq_any(target_user_ids))
                .filter(active.eq(true))
                .select(connection_id)
                .load(conn)
        })?;
        Ok(rows)
    }

    fn connection_is_active(
        &self,
        target_connection_id: &str,
    ) -> HubResult<bool> {
        use crate::schema::connections::dsl::*;
        let mut conn = self.conn()?;
        let count: i64 = connections
            .filter(connection_id.eq(target_connection_id))
            .filter(active.eq(true))
            .count()
            .get_result(&mut conn)?;
        Ok(count > 0)
    }

    fn snapshot_users(
        &self,
        stale_before: NaiveDateTime,
    ) -> HubResult<Vec<UserSnapshot>> {
        use crate::schema::connected_users::dsl as cu;
        use crate::schema::connections::dsl as c;

        let mut conn = self.conn()?;
        let users: Vec<ConnectedUser> =
            cu::connected_users.load(&mut conn)?;
        let rows: Vec<Connection> = c::connections
            .filter(c::active.eq(true))
            .filter(c::opened_at.ge(stale_before))
            .load(&mut conn)?;

        Ok(users
            .into_iter()
            .map(|user| {
                let connections = rows
                    .iter()
                    .filter(|row| row.user_id == user.user_id)
                    .map(|row| ConnectionSnapshot {
                        connection_id: row.connection_id.clone(),
                        user_agent: row.user_agent.clone(),
                        opened_at: row.opened_at,
                    })
                    .collect();
                UserSnapshot {
                    user_id: user.user_id,
                    connections,
                }
            })
            .collect())
    }

    fn force_close_user(
        &self,
        target_user_id: &str,
        now: NaiveDateTime,
    ) -> HubResult<()> {
        use crate::schema::connected_users::dsl as cu;
        use crate::schema::connections::dsl as c;

        let mut conn = self.conn()?;
        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            diesel::update(
                cu::connected_users.filter(cu::user_id.eq(target_user_id)),
            )
            .set(cu::last_disconnect_at.eq(Some(now)))
            .execute(conn)?;
            diesel::delete(c::connections.filter(c::user_id.eq(target_user_id)))
                .execute(conn)?;
            Ok(())
        })?;
        Ok(())
    }
}
