pub mod limiter;
pub mod logger;
