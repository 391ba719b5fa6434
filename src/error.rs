use salvo::http::{StatusCode, StatusError};
use salvo::oapi::{self, EndpointOutRegister, ToSchema};
use salvo::prelude::*;
use thiserror::Error;

/// The error kinds surfaced by this core, per spec §7.
///
/// `invoke()` and the registry are transport-agnostic and never construct a
/// salvo `Response` themselves; the `Scribe` impl below exists only so the
/// blob side-channel's reference HTTP routes can render one directly.
#[derive(Error, Debug)]
pub enum HubError {
    /// Admission permit not acquired within `SemaphoreTimeout`.
    #[error("too many concurrent requests")]
    Overloaded,
    /// The resolved connection set was empty.
    #[error("no connection is reachable for this target")]
    NoTarget,
    /// No reply arrived before the deadline.
    #[error("request timed out waiting for a reply")]
    Timeout,
    /// The caller cancelled the call before it completed.
    #[error("request was cancelled")]
    Cancelled,
    /// A response referenced a blob that could not be read.
    #[error("blob {path} is missing")]
    BlobMissing { path: String },
    /// Payload or blob content did not match the requested type.
    #[error("failed to decode response: {0}")]
    DecodeFailed(String),
    /// The peer's `Execute` returned an error.
    #[error("client error: {0}")]
    ClientError(String),
    /// A `RequestId` collided with one already pending; this is a bug guard,
    /// not something a caller can hit through normal use (spec §5).
    #[error("requestID {0} already pending")]
    DuplicateRequestId(String),
    /// The durable registry store rejected a write.
    #[error(transparent)]
    StoreFailure(#[from] diesel::result::Error),
    #[error(transparent)]
    DatabaseConnection(#[from] diesel::ConnectionError),
    #[error(transparent)]
    DatabaseConnectionPool(#[from] diesel::r2d2::PoolError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type HubResult<T> = Result<T, HubError>;

impl Scribe for HubError {
    fn render(self, res: &mut Response) {
        let status_error = match self {
            Self::Overloaded => StatusError::service_unavailable()
                .brief("the hub is busy, try again shortly"),
            Self::NoTarget => {
                StatusError::not_found().brief("no matching connection")
            }
            Self::Timeout => {
                StatusError::gateway_timeout().brief("request timed out")
            }
            Self::Cancelled => {
                StatusError::bad_request().brief("request was cancelled")
            }
            Self::BlobMissing { path } => StatusError::not_found()
                .brief(format!("blob not found: {path}")),
            Self::DecodeFailed(msg) => StatusError::bad_request().brief(msg),
            Self::ClientError(msg) => StatusError::bad_request().brief(msg),
            Self::DuplicateRequestId(id) => {
                tracing::error!(request_id = %id, "requestID collision");
                StatusError::internal_server_error()
            }
            // Diesel SQL errors
            Self::StoreFailure(err) => {
                use diesel::result::{DatabaseErrorKind, Error};
                match err {
                    // Not found -> 404
                    Error::NotFound => {
                        StatusError::not_found().brief("resource not found")
                    }
                    // Database constraint errors
                    Error::DatabaseError(kind, info) => {
                        let message = info.message().to_string();
                        match kind {
                            // Unique violation -> 409 Conflict
                            DatabaseErrorKind::UniqueViolation => {
                                StatusError::conflict()
                                    .brief("resource already exists")
                            }
                            // Foreign key violation -> 400 Bad Request
                            DatabaseErrorKind::ForeignKeyViolation => {
                                StatusError::bad_request().brief(
                                    "referenced resource does not exist",
                                )
                            }
                            // Other database errors are internal
                            _ => {
                                tracing::error!(error = message, kind = ?kind, "store error");
                                StatusError::internal_server_error()
                            }
                        }
                    }
                    // All other diesel errors are internal
                    err => {
                        tracing::error!(error = ?err, "diesel error");
                        StatusError::internal_server_error()
                    }
                }
            }
            // Connection errors -> 500 Internal
            Self::DatabaseConnection(err) => {
                tracing::error!(error = ?err, "database connection error");
                StatusError::internal_server_error()
            }
            // Pool errors -> 500 Internal
            Self::DatabaseConnectionPool(err) => {
                tracing::error!(error = ?err, "database connection pool error");
                StatusError::internal_server_error()
            }
            Self::Io(err) => {
                tracing::error!(error = ?err, "io error");
                StatusError::internal_server_error()
            }
        };

        res.render(status_error);
    }
}

impl EndpointOutRegister for HubError {
    fn register(
        components: &mut oapi::Components,
        operation: &mut oapi::Operation,
    ) {
        let responses = [
            (StatusCode::BAD_REQUEST, "Bad request"),
            (StatusCode::NOT_FOUND, "Not found"),
            (StatusCode::CONFLICT, "Resource already exists"),
            (StatusCode::SERVICE_UNAVAILABLE, "Hub is busy"),
            (StatusCode::GATEWAY_TIMEOUT, "Request timed out"),
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        ];

        for (status, description) in responses {
            operation.responses.insert(
                status.as_str(),
                oapi::Response::new(description).add_content(
                    "application/json",
                    StatusError::to_schema(components),
                ),
            );
        }
    }
}
