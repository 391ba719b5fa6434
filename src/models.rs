use chrono::NaiveDateTime;
use diesel::prelude::*;

/// A user known to have connected at least once. Created lazily on first
/// open of any connection under that `UserID`; never deleted by this
/// subsystem (spec §3).
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::connected_users)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ConnectedUser {
    pub user_id: String,
    pub last_connect_at: Option<NaiveDateTime>,
    pub last_disconnect_at: Option<NaiveDateTime>,
}

/// One live duplex channel, identified by an opaque `ConnectionID` (spec §3).
#[derive(Queryable, Selectable, Insertable, Debug, Clone, Associations)]
#[diesel(table_name = crate::schema::connections)]
#[diesel(belongs_to(ConnectedUser, foreign_key = user_id))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Connection {
    pub connection_id: String,
    pub user_id: String,
    pub user_agent: Option<String>,
    pub active: bool,
    pub opened_at: NaiveDateTime,
}
