//! Repository traits.

pub mod crawler_state;
pub mod sites;

pub use crawler_state::CrawlerStateRepo;
pub use sites::SitesRepo;
