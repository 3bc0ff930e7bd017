//! HTTP handlers.

pub mod gateway;
pub mod sites;

pub use gateway::serve_gateway;
pub use sites::{get_random_site, get_sites, get_stats};
