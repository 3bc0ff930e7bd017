//! The gateway: host-routed dispatch into bag storage or peer proxying.

use crate::error::ApiError;
use crate::resolve::resolve_host;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use md5::{Digest, Md5};
use rand::RngCore;
use std::io;
use tokio::io::AsyncWriteExt;
use tokio_util::io::{ReaderStream, StreamReader};
use tonindex_core::{Id32, parse_range};
use tonindex_transport::{HttpHeader, HttpRequest};

/// Hop-by-hop headers never forwarded to a peer.
const HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const STREAM_WORKERS: usize = 8;

/// Weak validator over the bag id and file name; the content behind a bag
/// id never changes, the metadata is simply not byte-exact.
fn bag_etag(id: &Id32, file_name: &str) -> String {
    let mut digest = Md5::new();
    digest.update(id.as_bytes());
    digest.update(file_name.as_bytes());
    format!("W/\"{}\"", hex::encode(digest.finalize()))
}

/// Any-method gateway entry point; dispatches on the rewritten host.
pub async fn serve_gateway(State(state): State<AppState>, req: Request) -> Response {
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(|h| h.to_string())
        .or_else(|| req.uri().host().map(|h| h.to_string()))
        .unwrap_or_default();

    let Some(canonical) = state.namespaces.rewrite_host(&host) else {
        return ApiError::BadRequest(format!("host {host:?} matches no gateway namespace"))
            .into_response();
    };

    let (id, in_storage) = match resolve_host(state.resolver.as_ref(), &canonical).await {
        Ok(resolved) => resolved,
        // bad addresses, missing records, and resolver failures all read
        // as client errors on the edge
        Err(err) => return ApiError::BadRequest(err.to_string()).into_response(),
    };

    let result = if in_storage {
        let file_name = {
            let trimmed = req.uri().path().trim_start_matches('/');
            if trimmed.is_empty() { "index.html" } else { trimmed }.to_string()
        };
        let if_none_match = req
            .headers()
            .get(header::IF_NONE_MATCH)
            .and_then(|h| h.to_str().ok())
            .map(|h| h.to_string());
        let range_header = req
            .headers()
            .get(header::RANGE)
            .and_then(|h| h.to_str().ok())
            .map(|h| h.to_string());
        serve_bag(&state, id, file_name, if_none_match, range_header).await
    } else {
        serve_peer(&state, req, id, &canonical).await
    };
    result.unwrap_or_else(|err| err.into_response())
}

async fn serve_bag(
    state: &AppState,
    id: Id32,
    file_name: String,
    if_none_match: Option<String>,
    range_header: Option<String>,
) -> Result<Response, ApiError> {
    let etag = bag_etag(&id, &file_name);
    if let Some(condition) = &if_none_match {
        if condition.as_bytes() == etag.as_bytes() {
            return Ok(StatusCode::NOT_MODIFIED.into_response());
        }
    }

    let cancel = state.shutdown.child_token();
    let bag = state
        .bags
        .get_bag(&cancel, &id)
        .await
        .map_err(|e| ApiError::BadGateway(e.to_string()))?;
    let file = bag
        .file(&file_name)
        .cloned()
        .ok_or_else(|| ApiError::NotFound(file_name.clone()))?;

    let mime = mime_guess::from_path(&file_name)
        .first_raw()
        .unwrap_or("application/octet-stream");

    let max_range = file.size.saturating_sub(1);
    let range = parse_range(range_header.as_deref(), max_range).map_err(|e| {
        ApiError::RangeNotSatisfiable {
            reason: e.to_string(),
            size: file.size,
        }
    })?;

    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, mime)
        .header(
            header::CACHE_CONTROL,
            "public, max-age=31536000, immutable",
        )
        .header(header::ETAG, &etag);
    if range.has_range {
        builder = builder
            .status(StatusCode::PARTIAL_CONTENT)
            .header(
                header::CONTENT_RANGE,
                format!("bytes {}-{}/{}", range.from, range.to, file.size),
            )
            .header(header::CONTENT_LENGTH, range.to - range.from + 1);
    } else {
        builder = builder
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, file.size)
            .header(header::ACCEPT_RANGES, "bytes");
    }

    if file.size == 0 {
        return builder
            .body(Body::empty())
            .map_err(|e| ApiError::Internal(e.to_string()));
    }

    let (mut writer, reader) = tokio::io::duplex(64 * 1024);
    tokio::spawn(async move {
        if let Err(err) = bag
            .write_file_to(&cancel, &mut writer, &file, range.from, range.to, STREAM_WORKERS)
            .await
        {
            tracing::warn!(bag = %id, file = %file_name, error = %err, "bag stream aborted");
        }
        let _ = writer.shutdown().await;
    });

    builder
        .body(Body::from_stream(ReaderStream::new(reader)))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

async fn serve_peer(
    state: &AppState,
    req: Request,
    id: Id32,
    canonical: &str,
) -> Result<Response, ApiError> {
    let conn = state
        .rldp
        .get_connection(&id)
        .await
        .map_err(|e| ApiError::BadGateway(e.to_string()))?;

    let mut query_id = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut query_id);

    let mut headers = vec![HttpHeader::new("Host", canonical)];
    for (name, value) in req.headers() {
        if HOP_HEADERS.contains(&name.as_str()) {
            continue;
        }
        let Ok(value) = value.to_str() else { continue };
        headers.push(HttpHeader::new(name.as_str(), value));
    }

    let rldp_req = HttpRequest {
        id: Id32::new(query_id),
        method: req.method().to_string(),
        url: format!("http://{canonical}{}", req.uri().path()),
        version: "HTTP/1.1".to_string(),
        headers,
    };

    let body = StreamReader::new(
        futures::TryStreamExt::map_err(req.into_body().into_data_stream(), io::Error::other),
    );
    let (resp, payload) = conn
        .send_request(rldp_req, Some(Box::new(body)))
        .await
        .map_err(|e| ApiError::BadGateway(e.to_string()))?;

    let status = StatusCode::from_u16(resp.status_code.clamp(0, u16::MAX as i32) as u16)
        .unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);
    if let Some(response_headers) = builder.headers_mut() {
        for header in &resp.headers {
            let Ok(name) = header.name.parse::<header::HeaderName>() else {
                continue;
            };
            let Ok(value) = HeaderValue::from_str(&header.value) else {
                continue;
            };
            response_headers.append(name, value);
        }
    }

    let body = match payload {
        None => Body::empty(),
        Some(reader) => Body::from_stream(reader.into_stream()),
    };
    builder
        .body(body)
        .map_err(|e| ApiError::Internal(e.to_string()))
}
