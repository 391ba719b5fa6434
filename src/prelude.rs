pub use salvo::oapi::{ToSchema, endpoint, extract::JsonBody};
pub use salvo::prelude::*;
pub use serde::{Deserialize, Serialize};

pub use crate::error::{HubError, HubResult};
pub use crate::hub::Hub;
pub use crate::utils::limiter::{RateLimit, RouterRateLimitExt as _};

pub fn json_ok<T>(data: T) -> JsonResult<T> {
    Ok(Json(data))
}

pub type JsonResult<T> = Result<Json<T>, HubError>;
