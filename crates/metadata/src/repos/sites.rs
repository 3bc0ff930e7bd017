//! Sites repository.

use crate::error::MetadataResult;
use crate::models::{ListFilters, SiteCreate, SiteRow, SiteStatus, Stats};
use async_trait::async_trait;
use std::time::Duration;
use tonindex_core::{Cursor, SortBy};

/// Operations over site records.
#[async_trait]
pub trait SitesRepo: Send + Sync {
    /// Aggregate counts: all domains, domains with a site record, and
    /// accessible sites.
    async fn get_stats(&self) -> MetadataResult<Stats>;

    /// One accessible, non-spam site chosen uniformly at random.
    async fn get_random_site(&self) -> MetadataResult<Option<SiteRow>>;

    /// Filtered keyset-paginated listing. The next cursor is returned only
    /// when a full page was produced.
    async fn list(
        &self,
        filters: &ListFilters,
        cursor: Option<&Cursor>,
        limit: i64,
    ) -> MetadataResult<(Vec<SiteRow>, Option<Cursor>)>;

    /// Lease up to `limit` stale sites for checking: sets
    /// `checking_until = now + hold` on rows whose last check is older
    /// than `stale` and whose lease has lapsed, skipping row-locked
    /// candidates. Concurrent callers receive disjoint domain sets.
    async fn reserve_check(
        &self,
        stale: Duration,
        hold: Duration,
        limit: i64,
    ) -> MetadataResult<Vec<String>>;

    /// Write a check's outcome and release the lease.
    async fn finalize_check(
        &self,
        domain: &str,
        status: SiteStatus,
        in_storage: bool,
        spam_content: bool,
    ) -> MetadataResult<()>;

    /// Whether the domain is known at all.
    async fn is_banned(&self, domain: &str) -> MetadataResult<bool>;

    /// Bulk-insert crawled domains; existing rows are left untouched.
    async fn add_domains(&self, sites: &[SiteCreate]) -> MetadataResult<()>;
}

/// A positional bind argument for the dynamically built listing query.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SqlArg {
    Text(String),
    Int(i64),
}

/// Escape LIKE wildcards in a search term, single pass.
pub(crate) fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Build the listing query for the given filters, cursor, and limit.
///
/// Pure so every filter combination is testable without a database.
pub(crate) fn build_list_query(
    filters: &ListFilters,
    cursor: Option<&Cursor>,
    limit: i64,
) -> (String, Vec<SqlArg>) {
    let mut wheres: Vec<String> = Vec::new();
    let mut args: Vec<SqlArg> = Vec::new();

    if !filters.search.is_empty() {
        args.push(SqlArg::Text(format!("%{}%", escape_like(&filters.search))));
        wheres.push(format!("domain ilike ${}", args.len()));
    }
    if filters.inaccessible {
        wheres.push(format!("status != {}", SiteStatus::NoSite as i16));
    } else {
        wheres.push(format!("status = {}", SiteStatus::Accessible as i16));
    }
    if let Some(punycode) = filters.punycode {
        let op = if punycode { "!=" } else { "=" };
        wheres.push(format!("domain {op} unicode"));
    }
    if !filters.spam {
        wheres.push("spam_content = false".to_string());
    }
    if !filters.zone.is_empty() {
        args.push(SqlArg::Text(filters.zone.clone()));
        wheres.push(format!("zone = ${}", args.len()));
    }

    if let Some(cursor) = cursor {
        let comp = if filters.desc { "<" } else { ">" };
        match filters.sort {
            SortBy::Domain => {
                args.push(SqlArg::Text(cursor.domain.clone()));
                wheres.push(format!("domain {comp} ${}", args.len()));
            }
            SortBy::CheckedAt => {
                args.push(SqlArg::Int(cursor.value.unwrap_or(0)));
                let value_pos = args.len();
                args.push(SqlArg::Text(cursor.domain.clone()));
                wheres.push(format!(
                    "(checked_at {comp} to_timestamp(${value_pos}) \
                     or (checked_at = to_timestamp(${value_pos}) and domain > ${}))",
                    args.len()
                ));
            }
        }
    }

    let order = if filters.desc { "desc" } else { "asc" };
    let order_clause = match filters.sort {
        SortBy::Domain => format!("domain {order}"),
        SortBy::CheckedAt => format!("checked_at {order}, domain asc"),
    };
    let where_clause = if wheres.is_empty() {
        String::new()
    } else {
        format!("where {}", wheres.join(" and "))
    };

    args.push(SqlArg::Int(limit));
    let sql = format!(
        "select domain, unicode, address, status, in_storage, spam_content, checked_at \
         from sites {where_clause} order by {order_clause} limit ${}",
        args.len()
    );
    (sql, args)
}
