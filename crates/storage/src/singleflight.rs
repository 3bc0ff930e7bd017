//! Single-flight call coalescing.

use crate::error::SharedError;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Mutex;
use tokio::sync::watch;

type Published<V> = Result<V, SharedError>;

/// Coalesces concurrent calls on the same key into one execution whose
/// result is shared by every waiter.
///
/// The leader runs the future and publishes the outcome; callers that
/// arrive while it is in flight await the published value instead of
/// running their own. The entry is removed exactly once, after
/// publication, so a later call starts a fresh execution. A leader whose
/// future is dropped mid-flight removes its entry without publishing and
/// the waiters elect a new leader.
pub struct Group<K, V> {
    calls: Mutex<HashMap<K, watch::Receiver<Option<Published<V>>>>>,
}

impl<K, V> Default for Group<K, V> {
    fn default() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }
}

/// Removes the leader's entry on drop, covering both the publish path and
/// an abandoned execution.
struct Lead<'g, K: Eq + Hash, V> {
    group: &'g Group<K, V>,
    key: Option<K>,
}

impl<K: Eq + Hash, V> Drop for Lead<'_, K, V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.group
                .calls
                .lock()
                .expect("singleflight lock poisoned")
                .remove(&key);
        }
    }
}

impl<K, V> Group<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fut` under `key`, or join the execution already in flight.
    pub async fn run<F, E>(&self, key: K, fut: F) -> Result<V, SharedError>
    where
        F: Future<Output = Result<V, E>>,
        E: Into<SharedError>,
    {
        let tx = loop {
            let mut waiter = {
                let mut calls = self.calls.lock().expect("singleflight lock poisoned");
                match calls.get(&key) {
                    Some(rx) => rx.clone(),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        calls.insert(key.clone(), rx);
                        break tx;
                    }
                }
            };
            match waiter.wait_for(|published| published.is_some()).await {
                Ok(guard) => return guard.clone().expect("checked Some above"),
                // the leader was dropped before publishing; run it ourselves
                Err(_) => continue,
            }
        };

        let lead = Lead {
            group: self,
            key: Some(key),
        };
        let result = fut.await.map_err(Into::into);
        tx.send_replace(Some(result.clone()));
        drop(lead);
        result
    }
}
