//! Gateway host namespaces.
//!
//! Each configured zone yields a namespace (`.ton` -> `.ton.`) matched as a
//! substring of the incoming host. The special namespaces `.adnl.` and
//! `.bag.` are always recognized.

/// The namespace set used to canonicalize gateway hosts.
#[derive(Debug, Clone)]
pub struct Namespaces {
    /// Zone namespaces: dashes in the matched prefix fold back into dots.
    zones: Vec<String>,
    /// Special namespaces: matched verbatim.
    special: [&'static str; 2],
}

impl Namespaces {
    /// Build from configured zones; each zone must begin with `.`.
    pub fn new<I, S>(zones: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            zones: zones
                .into_iter()
                .map(|z| format!("{}.", z.as_ref()))
                .collect(),
            special: [".adnl.", ".bag."],
        }
    }

    /// Canonicalize an incoming gateway host.
    ///
    /// Finds the first namespace occurring as a substring, keeps the prefix
    /// up to and including it, drops the trailing dot, and for zone
    /// namespaces folds `-` back into `.` (a wildcard gateway host has a
    /// single label to spend, so `example-foo.ton.gw.example` encodes
    /// `example.foo.ton`). Returns `None` when no namespace matches.
    pub fn rewrite_host(&self, host: &str) -> Option<String> {
        for ns in &self.special {
            if let Some(i) = host.find(ns) {
                let prefix = &host[..i + ns.len()];
                return Some(prefix.trim_end_matches('.').to_string());
            }
        }
        for ns in &self.zones {
            if let Some(i) = host.find(ns.as_str()) {
                let prefix = &host[..i + ns.len()];
                return Some(prefix.trim_end_matches('.').replace('-', "."));
            }
        }
        None
    }
}
