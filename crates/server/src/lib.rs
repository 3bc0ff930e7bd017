//! Indexing gateway for TON sites.
//!
//! Three coupled duties share one process:
//! - **Gateway**: translates public HTTP requests into bag-file retrievals
//!   or peer-to-peer HTTP queries and streams the answer back.
//! - **Crawler**: discovers new domains by paginating the collection
//!   listing API and persisting them.
//! - **Checker**: re-resolves known domains under a lease, probes their
//!   endpoints, and screens content.

pub mod checker;
pub mod crawler;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod resolve;
pub mod routes;
pub mod state;

pub use checker::Checker;
pub use crawler::Crawler;
pub use error::{ApiError, ApiResult};
pub use resolve::{ResolveError, SiteRecord, SiteResolver, StaticResolver, resolve_host};
pub use routes::{create_api_router, create_gateway_router};
pub use state::AppState;
