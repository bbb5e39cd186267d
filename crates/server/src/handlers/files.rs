//! Upload and download of files.
//!
//! The namespace of a request is fixed by its path: `/v1/files/...` serves
//! unrestricted content and `/v1/restricted/files/...` restricted content.

use crate::auth::{extract_macaroon, require_upload_token};
use crate::error::{ApiError, ApiResult};
use crate::librarian::{AliasInfo, NewFile};
use crate::state::AppState;
use crate::upload::StoredFile;
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use librarian_core::{AliasId, ContentId, Namespace, Sha1Hex};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;

/// Declared SHA-1 of an upload body, hex.
pub const CONTENT_SHA1_HEADER: &str = "x-content-sha1";
/// Explicit content id for an upload.
pub const CONTENT_ID_HEADER: &str = "x-content-id";

const DEFAULT_MIMETYPE: &str = "application/octet-stream";

/// Characters escaped in an RFC 5987 `filename*` value.
const FILENAME_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'.')
    .remove(b'-')
    .remove(b'_')
    .remove(b'~');

#[derive(Debug, Default, Deserialize)]
pub struct FetchQuery {
    /// Serialized macaroon, for clients that cannot set headers.
    pub token: Option<String>,
}

/// PUT /v1/files/{filename} - Store an unrestricted file.
pub async fn put_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<(StatusCode, Json<StoredFile>)> {
    upload(&state, filename, &headers, body, Namespace::Unrestricted).await
}

/// PUT /v1/restricted/files/{filename} - Store a restricted file.
pub async fn put_restricted_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<(StatusCode, Json<StoredFile>)> {
    upload(&state, filename, &headers, body, Namespace::Restricted).await
}

async fn upload(
    state: &AppState,
    filename: String,
    headers: &HeaderMap,
    body: Body,
    namespace: Namespace,
) -> ApiResult<(StatusCode, Json<StoredFile>)> {
    require_upload_token(&state.config.server, headers)?;

    let size = declared_length(headers)?;
    let mimetype = header_str(headers, CONTENT_TYPE.as_str())?.unwrap_or(DEFAULT_MIMETYPE);
    let mut file = NewFile::new(filename, mimetype, size).restricted(namespace.is_restricted());

    if let Some(sha1) = header_str(headers, CONTENT_SHA1_HEADER)? {
        file = file.with_sha1(Sha1Hex::parse(sha1).map_err(|e| ApiError::BadRequest(e.to_string()))?);
    }
    if let Some(id) = header_str(headers, CONTENT_ID_HEADER)? {
        let id = id
            .parse::<i64>()
            .map_err(|_| ApiError::BadRequest(format!("invalid {CONTENT_ID_HEADER}: {id}")))?;
        file = file.with_content_id(
            ContentId::new(id).map_err(|e| ApiError::BadRequest(e.to_string()))?,
        );
    }

    let stored = state
        .librarian
        .submit(file, body.into_data_stream())
        .await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> ApiResult<Option<&'a str>> {
    headers
        .get(name)
        .map(|v| {
            v.to_str()
                .map_err(|_| ApiError::BadRequest(format!("{name} is not valid ASCII")))
        })
        .transpose()
}

fn declared_length(headers: &HeaderMap) -> ApiResult<u64> {
    let value = header_str(headers, CONTENT_LENGTH.as_str())?.ok_or(ApiError::LengthRequired)?;
    value
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid content-length: {value}")))
}

/// GET /v1/files/{alias_id}
pub async fn get_file(
    State(state): State<AppState>,
    Path(alias_id): Path<String>,
    Query(query): Query<FetchQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    download(&state, &alias_id, None, &headers, query, Namespace::Unrestricted).await
}

/// GET /v1/files/{alias_id}/{filename}
pub async fn get_named_file(
    State(state): State<AppState>,
    Path((alias_id, filename)): Path<(String, String)>,
    Query(query): Query<FetchQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    download(
        &state,
        &alias_id,
        Some(&filename),
        &headers,
        query,
        Namespace::Unrestricted,
    )
    .await
}

/// GET /v1/restricted/files/{alias_id}
pub async fn get_restricted_file(
    State(state): State<AppState>,
    Path(alias_id): Path<String>,
    Query(query): Query<FetchQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    download(&state, &alias_id, None, &headers, query, Namespace::Restricted).await
}

/// GET /v1/restricted/files/{alias_id}/{filename}
pub async fn get_restricted_named_file(
    State(state): State<AppState>,
    Path((alias_id, filename)): Path<(String, String)>,
    Query(query): Query<FetchQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    download(
        &state,
        &alias_id,
        Some(&filename),
        &headers,
        query,
        Namespace::Restricted,
    )
    .await
}

async fn download(
    state: &AppState,
    alias_id: &str,
    filename: Option<&str>,
    headers: &HeaderMap,
    query: FetchQuery,
    namespace: Namespace,
) -> ApiResult<Response> {
    // An id that cannot exist is as absent as one that does not.
    let alias_id = alias_id
        .parse::<i64>()
        .ok()
        .and_then(|id| AliasId::new(id).ok())
        .ok_or(ApiError::NotFound)?;
    let macaroon = extract_macaroon(headers, query.token.as_deref());

    let (stream, info) = state
        .librarian
        .fetch(alias_id, namespace, macaroon.as_deref())
        .await?;
    if let Some(requested) = filename
        && requested != info.filename
    {
        stream.close();
        return Err(ApiError::NotFound);
    }

    let body = stream.map(|chunk| chunk.map_err(|e| std::io::Error::other(e.to_string())));
    Ok((
        StatusCode::OK,
        file_headers(&info),
        Body::from_stream(body),
    )
        .into_response())
}

fn file_headers(info: &AliasInfo) -> [(axum::http::HeaderName, HeaderValue); 3] {
    let content_type = HeaderValue::from_str(&info.mimetype)
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_MIMETYPE));
    let disposition = HeaderValue::from_str(&content_disposition(&info.filename))
        .unwrap_or_else(|_| HeaderValue::from_static("inline"));
    [
        (CONTENT_TYPE, content_type),
        (CONTENT_LENGTH, HeaderValue::from(info.size)),
        (CONTENT_DISPOSITION, disposition),
    ]
}

/// `inline` disposition carrying the filename both as a quoted ASCII
/// fallback and as RFC 5987 UTF-8.
fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() || c == ' ') && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "inline; filename=\"{fallback}\"; filename*=UTF-8''{}",
        utf8_percent_encode(filename, FILENAME_ESCAPE)
    )
}
