//! Application state shared across handlers and background loops.

use crate::resolve::SiteResolver;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tonindex_core::{Config, Namespaces};
use tonindex_metadata::MetadataStore;
use tonindex_storage::BagProvider;
use tonindex_transport::RldpConnector;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,
    /// Sites and crawler-state store.
    pub store: Arc<dyn MetadataStore>,
    /// Active bag cache.
    pub bags: BagProvider,
    /// Peer connector.
    pub rldp: RldpConnector,
    /// On-chain site resolver.
    pub resolver: Arc<dyn SiteResolver>,
    /// Gateway host namespaces derived from the configured zones.
    pub namespaces: Arc<Namespaces>,
    /// Zone allow-list for the sites listing.
    pub zones: Arc<Vec<String>>,
    /// Root shutdown token; request-scoped tokens are children of it.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Create the application state.
    ///
    /// # Panics
    ///
    /// Panics if the configured domain sources do not parse; the process
    /// must not come up with a broken zone list.
    pub fn new(
        config: Config,
        store: Arc<dyn MetadataStore>,
        bags: BagProvider,
        rldp: RldpConnector,
        resolver: Arc<dyn SiteResolver>,
        shutdown: CancellationToken,
    ) -> Self {
        let zones = config.zones().expect("invalid domain sources");
        Self {
            namespaces: Arc::new(Namespaces::new(&zones)),
            zones: Arc::new(zones),
            config: Arc::new(config),
            store,
            bags,
            rldp,
            resolver,
            shutdown,
        }
    }
}
