//! The checker: lease-based re-probing of known domains.

use crate::resolve::{SiteRecord, SiteResolver};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonindex_core::Id32;
use tonindex_metadata::{MetadataStore, SiteStatus};
use tonindex_storage::{BagProvider, StorageError};
use tonindex_transport::{HttpHeader, HttpRequest, RldpConnector, TransportError};

/// Bytes of `index.html` sniffed per probe.
const SNIFF_SIZE: usize = 512;

/// Hard per-probe timeout.
const CHECK_TIMEOUT: Duration = Duration::from_secs(16);

/// Lease duration: the probe timeout plus a quarter, so a crashed
/// worker's lease lapses shortly after its probe would have finished.
const HOLD: Duration = Duration::from_secs(20);

/// Sleep between reservation attempts when the queue runs dry.
const EMPTY_BATCH_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
enum ProbeError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("empty file")]
    EmptyFile,

    #[error("responded with non-ok status code {0}")]
    BadStatus(i32),

    #[error("responded with empty payload")]
    EmptyPayload,
}

/// Periodically re-resolves and probes every known domain.
pub struct Checker {
    store: Arc<dyn MetadataStore>,
    resolver: Arc<dyn SiteResolver>,
    bags: BagProvider,
    rldp: RldpConnector,
    stale: Duration,
}

impl Checker {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        resolver: Arc<dyn SiteResolver>,
        bags: BagProvider,
        rldp: RldpConnector,
        stale: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            resolver,
            bags,
            rldp,
            stale,
        })
    }

    /// Launch one reserver and `workers` probe workers. Cancelling the
    /// token stops the reserver, which closes the queue and drains the
    /// workers.
    pub fn start(self: &Arc<Self>, cancel: CancellationToken, workers: usize) {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::channel::<String>(workers);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let checker = self.clone();
        let reserver_cancel = cancel.clone();
        tokio::spawn(async move {
            checker.reserver(reserver_cancel, tx, workers).await;
        });

        for _ in 0..workers {
            let checker = self.clone();
            let cancel = cancel.clone();
            let rx = rx.clone();
            tokio::spawn(async move {
                checker.worker(cancel, rx).await;
            });
        }
    }

    async fn reserver(&self, cancel: CancellationToken, tx: mpsc::Sender<String>, batch: usize) {
        loop {
            if cancel.is_cancelled() {
                // dropping the sender closes the queue
                return;
            }
            let domains = match self
                .store
                .reserve_check(self.stale, HOLD, batch as i64)
                .await
            {
                Ok(domains) => domains,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to reserve stale sites");
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(EMPTY_BATCH_DELAY) => continue,
                    }
                }
            };
            if domains.is_empty() {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(EMPTY_BATCH_DELAY) => continue,
                }
            }
            for domain in domains {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    sent = tx.send(domain) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn worker(
        &self,
        cancel: CancellationToken,
        rx: Arc<tokio::sync::Mutex<mpsc::Receiver<String>>>,
    ) {
        loop {
            let domain = rx.lock().await.recv().await;
            let Some(domain) = domain else { return };
            if cancel.is_cancelled() {
                return;
            }

            let (status, in_storage, spam_content) = self.check(&cancel, &domain).await;
            if let Err(err) = self
                .store
                .finalize_check(&domain, status, in_storage, spam_content)
                .await
            {
                tracing::warn!(domain = %domain, error = %err, "unable to update site status");
            }
        }
    }

    /// Resolve and probe one domain within the hard timeout.
    async fn check(&self, cancel: &CancellationToken, domain: &str) -> (SiteStatus, bool, bool) {
        let record = match self.resolver.resolve_site(domain).await {
            Ok(Some(record)) => record,
            Ok(None) | Err(_) => return (SiteStatus::NoSite, false, false),
        };
        match tokio::time::timeout(CHECK_TIMEOUT, self.site_data(cancel, domain, &record)).await {
            Ok(Ok(data)) => (
                SiteStatus::Accessible,
                record.in_storage,
                contains_spam_content(&data),
            ),
            Ok(Err(err)) => {
                tracing::debug!(domain = %domain, error = %err, "probe failed");
                (SiteStatus::Inaccessible, record.in_storage, false)
            }
            Err(_) => (SiteStatus::Inaccessible, record.in_storage, false),
        }
    }

    async fn site_data(
        &self,
        cancel: &CancellationToken,
        domain: &str,
        record: &SiteRecord,
    ) -> Result<Vec<u8>, ProbeError> {
        if record.in_storage {
            let bag = self.bags.get_bag(cancel, &record.id).await?;
            let info = bag
                .file("index.html")
                .cloned()
                .ok_or_else(|| StorageError::FileNotFound("index.html".to_string()))?;
            if info.size == 0 {
                return Err(ProbeError::EmptyFile);
            }
            let size = info.size.min(SNIFF_SIZE as u64);

            let mut data = Vec::with_capacity(size as usize);
            bag.write_file_to(cancel, &mut data, &info, 0, size - 1, 1)
                .await?;
            Ok(data)
        } else {
            let conn = self.rldp.get_connection(&record.id).await?;
            let req = HttpRequest {
                id: Id32::new([0u8; 32]),
                method: "GET".to_string(),
                url: format!("http://{domain}"),
                version: "HTTP/1.1".to_string(),
                headers: vec![HttpHeader::new("Host", domain)],
            };
            let (resp, payload) = conn.send_request(req, None).await?;
            if resp.status_code != 200 {
                return Err(ProbeError::BadStatus(resp.status_code));
            }
            let Some(mut reader) = payload else {
                return Err(ProbeError::EmptyPayload);
            };
            let data = reader.next_part(SNIFF_SIZE).await?.unwrap_or_default();
            Ok(data.to_vec())
        }
    }
}

static SPAM_RULES: LazyLock<Vec<regex::Regex>> = LazyLock::new(|| {
    vec![
        // redirects are bad
        regex::Regex::new(r#"<meta\s+http-equiv\s*=\s*["']refresh["']\s+"#)
            .expect("valid spam rule"),
        // captcha is the same as a redirect but with extra steps
        regex::Regex::new(r"<title>\s*вы не робот\?\s*</title>").expect("valid spam rule"),
    ]
});

/// Screen sniffed content against the fixed rule set, case-insensitively.
pub fn contains_spam_content(data: &[u8]) -> bool {
    let lowered = String::from_utf8_lossy(data).to_lowercase();
    SPAM_RULES.iter().any(|rule| rule.is_match(&lowered))
}
