//! PostgreSQL-backed metadata store.

use crate::error::MetadataResult;
use crate::models::{ListFilters, SiteCreate, SiteRow, SiteStatus, Stats};
use crate::repos::sites::{SqlArg, build_list_query};
use crate::repos::{CrawlerStateRepo, SitesRepo};
use crate::store::MetadataStore;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, postgres::PgArguments, query::QueryAs};
use std::time::Duration;
use tonindex_core::{Cursor, SortBy};

const SCHEMA_SQL: &[&str] = &[
    r#"
    create table if not exists sites (
        domain          text primary key,
        unicode         text not null,
        zone            text not null,
        address         text not null,
        status          smallint not null default 0,
        in_storage      boolean not null default false,
        spam_content    boolean not null default false,
        checked_at      timestamptz not null default to_timestamp(0),
        checking_until  timestamptz
    )
    "#,
    "create index if not exists idx_sites_checked_at on sites (checked_at)",
    "create index if not exists idx_sites_zone on sites (zone)",
    r#"
    create table if not exists crawler_state (
        dns          text primary key,
        last_offset  bigint not null default 0
    )
    "#,
];

/// The production store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect with a bounded pool and verify connectivity.
    pub async fn connect(database_url: &str) -> MetadataResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        for statement in SCHEMA_SQL {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("select 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl SitesRepo for PostgresStore {
    async fn get_stats(&self) -> MetadataResult<Stats> {
        let (total, sites, active): (i64, i64, i64) = sqlx::query_as(
            r#"
            select
                count(*),
                count(*) filter (where status != $1),
                count(*) filter (where status = $2)
            from sites
            "#,
        )
        .bind(SiteStatus::NoSite as i16)
        .bind(SiteStatus::Accessible as i16)
        .fetch_one(&self.pool)
        .await?;

        Ok(Stats {
            total_domains: total,
            total_sites: sites,
            active_sites: active,
        })
    }

    async fn get_random_site(&self) -> MetadataResult<Option<SiteRow>> {
        let row = sqlx::query_as::<_, SiteRow>(
            r#"
            select domain, unicode, address, status, in_storage, spam_content, checked_at
            from sites
            where status = $1 and spam_content = false
            order by random()
            limit 1
            "#,
        )
        .bind(SiteStatus::Accessible as i16)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list(
        &self,
        filters: &ListFilters,
        cursor: Option<&Cursor>,
        limit: i64,
    ) -> MetadataResult<(Vec<SiteRow>, Option<Cursor>)> {
        let (sql, args) = build_list_query(filters, cursor, limit);
        let mut query = sqlx::query_as::<_, SiteRow>(&sql);
        for arg in &args {
            query = bind_arg(query, arg);
        }
        let rows = query.fetch_all(&self.pool).await?;

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
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            update sites
            set checking_until = now() + make_interval(secs => $2)
            from (
                select domain from sites
                where checked_at + make_interval(secs => $1) < now()
                    and (checking_until is null or checking_until < now())
                order by checked_at asc
                limit $3
                for update skip locked
            ) as stale
            where sites.domain = stale.domain
            returning sites.domain
            "#,
        )
        .bind(stale.as_secs_f64())
        .bind(hold.as_secs_f64())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(domain,)| domain).collect())
    }

    async fn finalize_check(
        &self,
        domain: &str,
        status: SiteStatus,
        in_storage: bool,
        spam_content: bool,
    ) -> MetadataResult<()> {
        sqlx::query(
            r#"
            update sites set
                status = $2,
                in_storage = $3,
                spam_content = $4,
                checked_at = now(),
                checking_until = null
            where domain = $1
            "#,
        )
        .bind(domain)
        .bind(status as i16)
        .bind(in_storage)
        .bind(spam_content)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn is_banned(&self, domain: &str) -> MetadataResult<bool> {
        let exists: bool =
            sqlx::query_scalar("select exists(select 1 from sites where domain = $1)")
                .bind(domain)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn add_domains(&self, sites: &[SiteCreate]) -> MetadataResult<()> {
        if sites.is_empty() {
            return Ok(());
        }
        let mut domains = Vec::with_capacity(sites.len());
        let mut unicodes = Vec::with_capacity(sites.len());
        let mut zones = Vec::with_capacity(sites.len());
        let mut addresses = Vec::with_capacity(sites.len());
        for site in sites {
            domains.push(site.domain.clone());
            unicodes.push(site.unicode.clone());
            zones.push(site.zone.clone());
            addresses.push(site.address.clone());
        }

        sqlx::query(
            r#"
            insert into sites (domain, unicode, zone, address)
            select * from unnest($1::text[], $2::text[], $3::text[], $4::text[])
            on conflict (domain) do nothing
            "#,
        )
        .bind(&domains)
        .bind(&unicodes)
        .bind(&zones)
        .bind(&addresses)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CrawlerStateRepo for PostgresStore {
    async fn get_offset(&self, dns: &str) -> MetadataResult<i64> {
        let offset: Option<i64> =
            sqlx::query_scalar("select last_offset from crawler_state where dns = $1")
                .bind(dns)
                .fetch_optional(&self.pool)
                .await?;
        Ok(offset.unwrap_or(0))
    }

    async fn set_offset(&self, dns: &str, offset: i64) -> MetadataResult<()> {
        sqlx::query(
            r#"
            insert into crawler_state (dns, last_offset)
            values ($1, $2)
            on conflict (dns) do update set
                last_offset = excluded.last_offset
            "#,
        )
        .bind(dns)
        .bind(offset)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn bind_arg<'q>(
    query: QueryAs<'q, Postgres, SiteRow, PgArguments>,
    arg: &'q SqlArg,
) -> QueryAs<'q, Postgres, SiteRow, PgArguments> {
    match arg {
        SqlArg::Text(s) => query.bind(s),
        SqlArg::Int(i) => query.bind(i),
    }
}
