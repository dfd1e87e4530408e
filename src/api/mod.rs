//! HTTP surface for requesters: match requests, match polling and signaling

pub mod error;
pub mod server;

pub use error::ApiError;
pub use server::{router, ApiServer, ApiServerConfig, ApiState};
