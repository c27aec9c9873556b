//! Portico: an API gateway with a cluster-replicated routing registry.
//!
//! Incoming requests are matched against the local view of the routing
//! registry, gated by rate limiting and token verification, then streamed
//! to the selected backend. The registry itself is kept in sync across
//! gateway nodes by a presence tracker whose join/leave events are
//! reconciled with a quorum rule.

pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod gateway;
pub mod kafka;
pub mod matcher;
pub mod metrics;
pub mod ratelimit;
pub mod registry;
pub mod routes;
pub mod utils;

pub use context::AppContext;
pub use error::{AppError, AppResult};
pub use routes::create_router;
