//! Process configuration.
//!
//! Loaded by the server binary from the environment; every field has a
//! default so a development instance starts with nothing but a database.

use crate::address::AccountAddress;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default bag TTL in seconds: 1 hour.
const DEFAULT_BAG_TTL: u64 = 3600;

/// Default crawl sources: the `.ton` and `.t.me` DNS collections.
const DEFAULT_DOMAIN_SOURCES: &str = "EQC3dNlesgVD8YbAazcauIrXBPfiVhMMr5YYk2in0Mtsz0Bz;.ton,\
                                      EQCA14o1-VWhS2efqoh_9M1b_A9DtKTuoqfmkn83AbJzwnPi;.t.me";

/// A crawlable domain collection: its NFT collection address and the DNS
/// zone its items belong to.
#[derive(Debug, Clone)]
pub struct DomainSource {
    pub address: AccountAddress,
    pub zone: String,
}

/// Complete application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// API server bind address.
    #[serde(default = "default_api_listen")]
    pub api_listen: String,
    /// Gateway server bind address.
    #[serde(default = "default_gateway_listen")]
    pub gateway_listen: String,
    /// TON global network config URL.
    #[serde(default = "default_ton_config_url")]
    pub ton_config_url: String,
    /// Seconds an idle bag stays cached before eviction.
    #[serde(default = "default_bag_ttl")]
    pub bag_ttl: u64,
    /// PostgreSQL connection URL.
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Toncenter API endpoint for the crawler.
    #[serde(default = "default_toncenter_url")]
    pub toncenter_url: String,
    /// Toncenter API key; empty means unauthenticated.
    #[serde(default)]
    pub toncenter_key: String,
    /// Comma list of `<address>;<zone>` crawl sources.
    #[serde(default = "default_domain_sources")]
    pub domain_sources: String,
    /// Network backend: `memory` is the only in-tree option; a production
    /// overlay adapter plugs in at the same seam.
    #[serde(default = "default_network")]
    pub network: String,
}

fn default_api_listen() -> String {
    "0.0.0.0:8081".to_string()
}

fn default_gateway_listen() -> String {
    "0.0.0.0:8082".to_string()
}

fn default_ton_config_url() -> String {
    "https://ton.org/global-config.json".to_string()
}

fn default_bag_ttl() -> u64 {
    DEFAULT_BAG_TTL
}

fn default_database_url() -> String {
    "postgres://postgres@localhost:5432/tonindex".to_string()
}

fn default_toncenter_url() -> String {
    "https://toncenter.com/api".to_string()
}

fn default_domain_sources() -> String {
    DEFAULT_DOMAIN_SOURCES.to_string()
}

fn default_network() -> String {
    "memory".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_listen: default_api_listen(),
            gateway_listen: default_gateway_listen(),
            ton_config_url: default_ton_config_url(),
            bag_ttl: default_bag_ttl(),
            database_url: default_database_url(),
            toncenter_url: default_toncenter_url(),
            toncenter_key: String::new(),
            domain_sources: default_domain_sources(),
            network: default_network(),
        }
    }
}

impl Config {
    /// The bag TTL as a [`Duration`].
    pub fn bag_ttl(&self) -> Duration {
        Duration::from_secs(self.bag_ttl)
    }

    /// Parse and validate the configured crawl sources.
    pub fn sources(&self) -> Result<Vec<DomainSource>> {
        self.domain_sources
            .split(',')
            .filter(|raw| !raw.trim().is_empty())
            .map(|raw| {
                let raw = raw.trim();
                let (addr, zone) = raw.split_once(';').ok_or_else(|| {
                    Error::Config(format!(
                        "unexpected DOMAIN_SOURCES item format {raw:?}, must be <address>;<zone>"
                    ))
                })?;
                if !zone.starts_with('.') {
                    return Err(Error::Config(format!(
                        "DOMAIN_SOURCES zone must begin with a \".\", got {zone:?}"
                    )));
                }
                let address = AccountAddress::parse(addr).map_err(|e| {
                    Error::Config(format!("invalid DOMAIN_SOURCES address {addr:?}: {e}"))
                })?;
                Ok(DomainSource {
                    address,
                    zone: zone.to_string(),
                })
            })
            .collect()
    }

    /// The zone allow-list derived from the crawl sources.
    pub fn zones(&self) -> Result<Vec<String>> {
        Ok(self.sources()?.into_iter().map(|s| s.zone).collect())
    }
}
