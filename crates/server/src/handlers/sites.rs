//! Sites listing endpoints.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};
use tonindex_core::{Cursor, SortBy};
use tonindex_metadata::{ListFilters, SiteRow, SiteStatus};

const MAX_LIMIT: i64 = 100;
const DEFAULT_LIMIT: i64 = 50;

#[derive(Debug, Serialize)]
pub struct GetStatsResponse {
    pub domains: i64,
    pub sites: i64,
    pub active: i64,
}

#[derive(Debug, Serialize)]
pub struct SiteResponse {
    pub domain: String,
    pub unicode: String,
    pub accessible: bool,
    #[serde(rename = "inStorage")]
    pub in_storage: bool,
    #[serde(rename = "spamContent")]
    pub spam_content: bool,
    #[serde(rename = "checkedUtime")]
    pub checked_utime: i64,
}

#[derive(Debug, Serialize)]
pub struct GetSitesResponse {
    pub sites: Vec<SiteResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Query parameters for `GET /sites`. Everything arrives as strings; the
/// boolean convention is `1`/`true`.
#[derive(Debug, Default, Deserialize)]
pub struct GetSitesParams {
    pub search: Option<String>,
    pub inaccessible: Option<String>,
    pub punycode: Option<String>,
    pub spam: Option<String>,
    pub zone: Option<String>,
    pub sort: Option<String>,
    pub desc: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<String>,
}

fn parse_bool(value: &str) -> bool {
    value == "1" || value == "true"
}

/// GET /sites/stats
pub async fn get_stats(State(state): State<AppState>) -> ApiResult<Json<GetStatsResponse>> {
    let stats = state.store.get_stats().await?;
    Ok(Json(GetStatsResponse {
        domains: stats.total_domains,
        sites: stats.total_sites,
        active: stats.active_sites,
    }))
}

/// GET /sites/random
pub async fn get_random_site(State(state): State<AppState>) -> ApiResult<Json<SiteResponse>> {
    let site = state
        .store
        .get_random_site()
        .await?
        .ok_or_else(|| ApiError::NotFound("no accessible sites".to_string()))?;
    Ok(Json(site_response(&site)))
}

/// GET /sites
pub async fn get_sites(
    State(state): State<AppState>,
    Query(params): Query<GetSitesParams>,
) -> ApiResult<Json<GetSitesResponse>> {
    let mut filters = ListFilters {
        search: params.search.unwrap_or_default(),
        inaccessible: params.inaccessible.as_deref().is_some_and(parse_bool),
        punycode: params.punycode.as_deref().map(parse_bool),
        spam: params.spam.as_deref().is_some_and(parse_bool),
        desc: params.desc.as_deref().is_some_and(parse_bool),
        ..Default::default()
    };

    if let Some(zone) = params.zone.filter(|z| !z.is_empty()) {
        if !state.zones.contains(&zone) {
            return Err(ApiError::BadRequest(format!("invalid zone {zone}")));
        }
        filters.zone = zone;
    }

    if let Some(sort) = params.sort.filter(|s| !s.is_empty()) {
        filters.sort = match sort.as_str() {
            "domain" => SortBy::Domain,
            "checked_at" => SortBy::CheckedAt,
            other => {
                return Err(ApiError::BadRequest(format!("invalid sort value {other}")));
            }
        };
    }

    let cursor = params
        .cursor
        .filter(|c| !c.is_empty())
        .map(|c| Cursor::decode(&c, filters.sort))
        .transpose()
        .map_err(|e| ApiError::BadRequest(format!("unable to parse cursor: {e}")))?;

    let mut limit = DEFAULT_LIMIT;
    if let Some(raw) = params.limit.filter(|l| !l.is_empty()) {
        limit = raw
            .parse()
            .map_err(|_| ApiError::BadRequest(format!("unable to parse limit {raw}")))?;
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(ApiError::BadRequest(format!(
                "limit must be between 1 and {MAX_LIMIT}"
            )));
        }
    }

    let (rows, next) = state.store.list(&filters, cursor.as_ref(), limit).await?;
    Ok(Json(GetSitesResponse {
        sites: rows.iter().map(site_response).collect(),
        cursor: next.map(|c| c.encode()),
    }))
}

fn site_response(site: &SiteRow) -> SiteResponse {
    SiteResponse {
        domain: site.domain.clone(),
        unicode: site.unicode.clone(),
        accessible: site.status() == SiteStatus::Accessible,
        in_storage: site.in_storage,
        spam_content: site.spam_content,
        checked_utime: site.checked_at.unix_timestamp(),
    }
}
