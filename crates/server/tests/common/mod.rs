//! Server test utilities: an in-memory metadata store, a fake remote
//! site, and a fully wired application state over the loopback backends.
//! Note: #[allow(dead_code)] because each test file compiles common/
//! separately.
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tonindex_core::{Config, Cursor, Id32, SortBy};
use tonindex_metadata::{
    CrawlerStateRepo, ListFilters, MetadataResult, MetadataStore, SiteCreate, SiteRow, SiteStatus,
    SitesRepo, Stats,
};
use tonindex_server::resolve::{SiteResolver, StaticResolver};
use tonindex_server::state::AppState;
use tonindex_storage::BagProvider;
use tonindex_storage::memory::MemoryBagConnector;
use tonindex_transport::memory::MemoryNetwork;
use tonindex_transport::{
    DatagramSession, GetNextPayloadPart, HttpHeader, HttpResponse, Message, PayloadPart,
    QueryHandler, RldpConnector, TransportError, TransportResult, WireCodec,
};

#[derive(Clone)]
struct MockSite {
    row: SiteRow,
    zone: String,
    checking_until: Option<OffsetDateTime>,
}

/// An in-memory [`MetadataStore`] with the same observable contracts as
/// the PostgreSQL one.
#[derive(Default)]
pub struct MockStore {
    sites: Mutex<BTreeMap<String, MockSite>>,
    offsets: Mutex<HashMap<String, i64>>,
}

impl MockStore {
    pub fn status_of(&self, domain: &str) -> Option<SiteStatus> {
        self.sites
            .lock()
            .unwrap()
            .get(domain)
            .map(|s| s.row.status())
    }

    pub fn spam_flag(&self, domain: &str) -> Option<bool> {
        self.sites
            .lock()
            .unwrap()
            .get(domain)
            .map(|s| s.row.spam_content)
    }

    pub fn checked_domains(&self) -> Vec<String> {
        self.sites
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.row.checked_at.unix_timestamp() > 0)
            .map(|s| s.row.domain.clone())
            .collect()
    }

    pub fn domains(&self) -> Vec<String> {
        self.sites.lock().unwrap().keys().cloned().collect()
    }

    pub fn unicode_of(&self, domain: &str) -> Option<String> {
        self.sites
            .lock()
            .unwrap()
            .get(domain)
            .map(|s| s.row.unicode.clone())
    }

    pub fn offset_of(&self, dns: &str) -> i64 {
        self.offsets.lock().unwrap().get(dns).copied().unwrap_or(0)
    }
}

fn matches_filters(site: &MockSite, filters: &ListFilters) -> bool {
    if !filters.search.is_empty() && !site.row.domain.contains(&filters.search) {
        return false;
    }
    if filters.inaccessible {
        if site.row.status() == SiteStatus::NoSite {
            return false;
        }
    } else if site.row.status() != SiteStatus::Accessible {
        return false;
    }
    if let Some(punycode) = filters.punycode {
        let is_punycode = site.row.domain != site.row.unicode;
        if is_punycode != punycode {
            return false;
        }
    }
    if !filters.spam && site.row.spam_content {
        return false;
    }
    if !filters.zone.is_empty() && site.zone != filters.zone {
        return false;
    }
    true
}

fn after_cursor(row: &SiteRow, cursor: &Cursor, filters: &ListFilters) -> bool {
    match filters.sort {
        SortBy::Domain => {
            if filters.desc {
                row.domain < cursor.domain
            } else {
                row.domain > cursor.domain
            }
        }
        SortBy::CheckedAt => {
            let ts = row.checked_at.unix_timestamp();
            let value = cursor.value.unwrap_or(0);
            if filters.desc {
                ts < value || (ts == value && row.domain > cursor.domain)
            } else {
                ts > value || (ts == value && row.domain > cursor.domain)
            }
        }
    }
}

#[async_trait]
impl SitesRepo for MockStore {
    async fn get_stats(&self) -> MetadataResult<Stats> {
        let sites = self.sites.lock().unwrap();
        Ok(Stats {
            total_domains: sites.len() as i64,
            total_sites: sites
                .values()
                .filter(|s| s.row.status() != SiteStatus::NoSite)
                .count() as i64,
            active_sites: sites
                .values()
                .filter(|s| s.row.status() == SiteStatus::Accessible)
                .count() as i64,
        })
    }

    async fn get_random_site(&self) -> MetadataResult<Option<SiteRow>> {
        Ok(self
            .sites
            .lock()
            .unwrap()
            .values()
            .find(|s| s.row.status() == SiteStatus::Accessible && !s.row.spam_content)
            .map(|s| s.row.clone()))
    }

    async fn list(
        &self,
        filters: &ListFilters,
        cursor: Option<&Cursor>,
        limit: i64,
    ) -> MetadataResult<(Vec<SiteRow>, Option<Cursor>)> {
        let mut rows: Vec<SiteRow> = self
            .sites
            .lock()
            .unwrap()
            .values()
            .filter(|s| matches_filters(s, filters))
            .map(|s| s.row.clone())
            .filter(|row| cursor.is_none_or(|c| after_cursor(row, c, filters)))
            .collect();

        rows.sort_by(|a, b| {
            let ordering = match filters.sort {
                SortBy::Domain => a.domain.cmp(&b.domain),
                SortBy::CheckedAt => a
                    .checked_at
                    .cmp(&b.checked_at)
                    .then_with(|| a.domain.cmp(&b.domain)),
            };
            if filters.desc { ordering.reverse() } else { ordering }
        });
        rows.truncate(limit as usize);

        let next = (rows.len() as i64 == limit)
            .then(|| rows.last())
            .flatten()
            .map(|last| Cursor {
                value: match filters.sort {
                    SortBy::CheckedAt => Some(last.checked_at.unix_timestamp()),
                    SortBy::Domain => None,
                },
                domain: last.domain.clone(),
            });
        Ok((rows, next))
    }

    async fn reserve_check(
        &self,
        stale: Duration,
        hold: Duration,
        limit: i64,
    ) -> MetadataResult<Vec<String>> {
        let now = OffsetDateTime::now_utc();
        let mut sites = self.sites.lock().unwrap();

        let mut stale_sites: Vec<(OffsetDateTime, String)> = sites
            .values()
            .filter(|s| {
                s.row.checked_at + stale < now
                    && s.checking_until.is_none_or(|until| until < now)
            })
            .map(|s| (s.row.checked_at, s.row.domain.clone()))
            .collect();
        stale_sites.sort();
        stale_sites.truncate(limit as usize);

        let domains: Vec<String> = stale_sites.into_iter().map(|(_, d)| d).collect();
        for domain in &domains {
            if let Some(site) = sites.get_mut(domain) {
                site.checking_until = Some(now + hold);
            }
        }
        Ok(domains)
    }

    async fn finalize_check(
        &self,
        domain: &str,
        status: SiteStatus,
        in_storage: bool,
        spam_content: bool,
    ) -> MetadataResult<()> {
        if let Some(site) = self.sites.lock().unwrap().get_mut(domain) {
            site.row.status = status as i16;
            site.row.in_storage = in_storage;
            site.row.spam_content = spam_content;
            site.row.checked_at = OffsetDateTime::now_utc();
            site.checking_until = None;
        }
        Ok(())
    }

    async fn is_banned(&self, domain: &str) -> MetadataResult<bool> {
        Ok(self.sites.lock().unwrap().contains_key(domain))
    }

    async fn add_domains(&self, sites: &[SiteCreate]) -> MetadataResult<()> {
        let mut map = self.sites.lock().unwrap();
        for site in sites {
            map.entry(site.domain.clone()).or_insert_with(|| MockSite {
                row: SiteRow {
                    domain: site.domain.clone(),
                    unicode: site.unicode.clone(),
                    address: site.address.clone(),
                    status: SiteStatus::NoSite as i16,
                    in_storage: false,
                    spam_content: false,
                    checked_at: OffsetDateTime::UNIX_EPOCH,
                },
                zone: site.zone.clone(),
                checking_until: None,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CrawlerStateRepo for MockStore {
    async fn get_offset(&self, dns: &str) -> MetadataResult<i64> {
        Ok(self.offsets.lock().unwrap().get(dns).copied().unwrap_or(0))
    }

    async fn set_offset(&self, dns: &str, offset: i64) -> MetadataResult<()> {
        self.offsets.lock().unwrap().insert(dns.to_string(), offset);
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for MockStore {
    async fn migrate(&self) -> MetadataResult<()> {
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        Ok(())
    }
}

/// A remote peer site answering `GET` with a fixed body, recording the
/// request headers it saw.
pub struct EchoSite {
    codec: Arc<WireCodec>,
    body: Bytes,
    pub seen_headers: Mutex<Vec<HttpHeader>>,
    cursors: Mutex<HashMap<Id32, usize>>,
}

impl EchoSite {
    pub fn new(codec: Arc<WireCodec>, body: impl Into<Bytes>) -> Arc<Self> {
        Arc::new(Self {
            codec,
            body: body.into(),
            seen_headers: Mutex::new(Vec::new()),
            cursors: Mutex::new(HashMap::new()),
        })
    }

    pub fn saw_header(&self, name: &str) -> Option<String> {
        self.seen_headers
            .lock()
            .unwrap()
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.clone())
    }
}

#[async_trait]
impl QueryHandler for EchoSite {
    async fn handle_query(
        &self,
        _session: &Arc<dyn DatagramSession>,
        data: Bytes,
    ) -> TransportResult<Bytes> {
        match self.codec.decode(&data)? {
            Message::Request(req) => {
                *self.seen_headers.lock().unwrap() = req.headers.clone();
                let no_payload = self.body.is_empty();
                if !no_payload {
                    self.cursors.lock().unwrap().insert(req.id, 0);
                }
                Ok(self.codec.encode(&Message::Response(HttpResponse {
                    version: "HTTP/1.1".into(),
                    status_code: 200,
                    reason: "OK".into(),
                    headers: vec![HttpHeader::new("Content-Type", "text/html")],
                    no_payload,
                })))
            }
            Message::GetNextPayloadPart(GetNextPayloadPart {
                id,
                max_chunk_size,
                ..
            }) => {
                let mut cursors = self.cursors.lock().unwrap();
                let pos = cursors
                    .get_mut(&id)
                    .ok_or_else(|| TransportError::UnknownRequest(id.to_string()))?;
                let end = (*pos + max_chunk_size as usize).min(self.body.len());
                let chunk = self.body.slice(*pos..end);
                *pos = end;
                let last = *pos >= self.body.len();
                if last {
                    cursors.remove(&id);
                }
                Ok(self.codec.encode(&Message::PayloadPart(PayloadPart {
                    data: chunk,
                    trailer: Vec::new(),
                    last,
                })))
            }
            _ => Err(TransportError::UnexpectedMessage("unsupported query")),
        }
    }
}

/// A fully wired application over the in-memory backends.
pub struct TestHarness {
    pub state: AppState,
    pub store: Arc<MockStore>,
    pub seeder: MemoryBagConnector,
    pub network: MemoryNetwork,
    pub resolver: Arc<StaticResolver>,
    pub codec: Arc<WireCodec>,
    pub bags: BagProvider,
    pub rldp: RldpConnector,
    pub cancel: CancellationToken,
}

impl TestHarness {
    pub fn new() -> Self {
        let config = Config::default();
        let store = Arc::new(MockStore::default());
        let seeder = MemoryBagConnector::new();
        let network = MemoryNetwork::new();
        let resolver = Arc::new(StaticResolver::new());
        let codec = Arc::new(WireCodec::new());

        let bags = BagProvider::new(Arc::new(seeder.clone()), Duration::from_secs(3600));
        let rldp = RldpConnector::new(
            Arc::new(network.clone()),
            Arc::new(network.clone()),
            codec.clone(),
        );
        let cancel = CancellationToken::new();

        let state = AppState::new(
            config,
            store.clone() as Arc<dyn MetadataStore>,
            bags.clone(),
            rldp.clone(),
            resolver.clone() as Arc<dyn SiteResolver>,
            cancel.clone(),
        );

        Self {
            state,
            store,
            seeder,
            network,
            resolver,
            codec,
            bags,
            rldp,
            cancel,
        }
    }
}

/// Build a bodiless request against a router.
pub fn request(method: &str, host: &str, path: &str) -> axum::http::Request<axum::body::Body> {
    axum::http::Request::builder()
        .method(method)
        .uri(path)
        .header("host", host)
        .body(axum::body::Body::empty())
        .unwrap()
}

/// Collect a response body.
pub async fn body_bytes(response: axum::response::Response) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}
