//! HTTP routes
//!
//! - `POST   /api/v1/agent/create`: create a record
//! - `GET    /api/v1/agent/all`: paged listing of live records
//! - `PUT    /api/v1/agent/{id}/update`: apply field edits
//! - `GET    /api/v1/agent/{id}`: current record view
//! - `DELETE /api/v1/agent/{id}`: soft-delete
//! - `GET    /api/v1/agent/{id}/export`: issue a download token
//! - `GET    /api/v1/download/{token}`: redeem a token
//! - `POST   /api/v1/file/upload`: store an uploaded file
//! - `GET    /api/v1/file/{id}/metadata`, `DELETE /api/v1/file/{id}`
//! - `GET    /health`

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use bytes::Bytes;
use cfgvault_artifact::{ConfigurationRecord, OwnerRef, RecordId, Version};
use cfgvault_core::{IssuedToken, Page, SavedRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use std::time::Duration;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

const USER_HEADER: &str = "x-user-id";
const FILE_NAME_HEADER: &str = "x-file-name";
const DEFAULT_MIME: &str = "application/octet-stream";
const DEFAULT_PAGE_SIZE: u64 = 10;

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/agent/create", post(create_agent))
        .route("/api/v1/agent/all", get(list_agents))
        .route("/api/v1/agent/{id}", get(get_agent).delete(delete_agent))
        .route("/api/v1/agent/{id}/update", put(update_agent))
        .route("/api/v1/agent/{id}/export", get(export_agent))
        .route("/api/v1/download/{token}", get(download))
        .route("/api/v1/file/upload", post(upload_file))
        .route("/api/v1/file/{id}", delete(delete_file))
        .route("/api/v1/file/{id}/metadata", get(file_metadata))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct FieldsBody {
    fields: Map<String, JsonValue>,
}

#[derive(Debug, Default, Deserialize)]
struct ExportParams {
    ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct PagingParams {
    /// Zero-based page number
    #[serde(default)]
    offset: u64,
    #[serde(default = "default_page_size")]
    limit: u64,
}

fn default_page_size() -> u64 {
    DEFAULT_PAGE_SIZE
}

#[derive(Debug, Serialize)]
struct RecordView {
    id: RecordId,
    owner: OwnerRef,
    version: Version,
    config: Map<String, JsonValue>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ConfigurationRecord> for RecordView {
    fn from(record: ConfigurationRecord) -> Self {
        Self {
            config: record.content(),
            id: record.id,
            owner: record.owner,
            version: record.version,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct PageView {
    content: Vec<RecordView>,
    first: bool,
    last: bool,
    page_number: u64,
    page_size: u64,
    total_elements: u64,
    total_pages: u64,
}

impl PageView {
    fn new(page_number: u64, page: Page<ConfigurationRecord>) -> Self {
        let total_pages = page.total_pages();
        Self {
            first: page_number == 0,
            last: page_number >= total_pages.saturating_sub(1),
            page_number,
            page_size: page.limit,
            total_elements: page.total,
            total_pages,
            content: page.items.into_iter().map(RecordView::from).collect(),
        }
    }
}

fn owner(headers: &HeaderMap) -> Result<OwnerRef, ApiError> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(OwnerRef::new)
        .ok_or_else(|| ApiError::bad_request(format!("missing {USER_HEADER} header")))
}

fn record_id(raw: &str) -> Result<RecordId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("malformed record id: {raw}")))
}

fn file_id(raw: &str) -> Result<Uuid, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("malformed file id: {raw}")))
}

async fn health(State(state): State<AppState>) -> Json<JsonValue> {
    let stats = state.coordinator.cache_stats();
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "cache": {
            "entries": stats.entry_count,
            "bytes": stats.total_bytes,
            "pinned": stats.pinned_count,
        },
    }))
}

async fn create_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<FieldsBody>, JsonRejection>,
) -> Result<(StatusCode, Json<SavedRecord>), ApiError> {
    let owner = owner(&headers)?;
    let Json(body) = body?;
    let saved = state.coordinator.create_record(&owner, body.fields).await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

async fn update_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<FieldsBody>, JsonRejection>,
) -> Result<Json<SavedRecord>, ApiError> {
    let owner = owner(&headers)?;
    let id = record_id(&id)?;
    let Json(body) = body?;
    let saved = state
        .coordinator
        .update_record(id, &owner, body.fields)
        .await?;
    Ok(Json(saved))
}

async fn get_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RecordView>, ApiError> {
    let record = state.coordinator.record(record_id(&id)?).await?;
    Ok(Json(RecordView::from(record)))
}

async fn list_agents(
    State(state): State<AppState>,
    params: Result<Query<PagingParams>, QueryRejection>,
) -> Result<Json<PageView>, ApiError> {
    let Query(params) = params?;
    let page = state
        .coordinator
        .list_records(params.offset, params.limit)
        .await?;
    Ok(Json(PageView::new(params.offset, page)))
}

async fn delete_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.coordinator.delete_record(record_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn export_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
    params: Result<Query<ExportParams>, QueryRejection>,
) -> Result<Json<IssuedToken>, ApiError> {
    let id = record_id(&id)?;
    let Query(params) = params?;
    let issued = state
        .coordinator
        .issue_token(id, params.ttl_secs.map(Duration::from_secs))
        .await?;
    Ok(Json(issued))
}

async fn download(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let download = state.coordinator.download(&token).await?;
    let disposition =
        HeaderValue::try_from(format!("attachment; filename=\"{}\"", download.file_name))
            .map_err(|e| ApiError::Internal(format!("content-disposition: {e}")))?;
    let etag = HeaderValue::try_from(format!("\"{}\"", download.fingerprint))
        .map_err(|e| ApiError::Internal(format!("etag: {e}")))?;

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(download.content_type)),
            (header::CONTENT_DISPOSITION, disposition),
            (header::ETAG, etag),
        ],
        download.bytes,
    ))
}

async fn upload_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let name = headers
        .get(FILE_NAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::bad_request(format!("missing {FILE_NAME_HEADER} header")))?;
    let mime = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_MIME);
    if body.is_empty() {
        return Err(ApiError::bad_request("empty upload"));
    }

    let stored = state.files.save(name, mime, &body).await?;
    tracing::info!(file = %stored.id, size = stored.size, "file uploaded");
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn file_metadata(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = file_id(&id)?;
    let stored = state
        .files
        .metadata(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("file {id}")))?;
    Ok(Json(stored))
}

async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = file_id(&id)?;
    if state.files.delete(id).await? {
        tracing::info!(file = %id, "file deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("file {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use cfgvault_cache::{CacheCapacity, CacheStore, LocalFileStore, ProvenanceIndex};
    use cfgvault_core::{DistributionConfig, DistributionCoordinator, InMemoryRepository};
    use cfgvault_token::{SigningKey, TokenService};
    use http_body_util::BodyExt;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn test_app() -> (Router, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::open(dir.path().join("cache"), CacheCapacity::default())
            .await
            .unwrap();
        let provenance = ProvenanceIndex::open(dir.path().join("cache")).await.unwrap();
        let tokens = TokenService::new(SigningKey::from_secret(b"router tests"));
        let coordinator = DistributionCoordinator::new(
            DistributionConfig::default(),
            Arc::new(InMemoryRepository::new()),
            Arc::new(cache),
            Arc::new(provenance),
            Arc::new(tokens),
        );
        let files = LocalFileStore::open(dir.path().join("files")).await.unwrap();
        let app = router(AppState::new(Arc::new(coordinator), Arc::new(files)));
        (app, dir)
    }

    fn agent_body(without: Option<&str>) -> String {
        let mut fields = json!({
            "name": "Support agent",
            "language": "en",
            "llm_id": "llm-gpt",
            "prompt_id": "prompt-support",
            "tool_ids": ["tool-search"],
        });
        if let Some(field) = without {
            fields.as_object_mut().unwrap().remove(field);
        }
        json!({ "fields": fields }).to_string()
    }

    async fn body_json(resp: axum::response::Response) -> JsonValue {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn send(app: &Router, req: Request<Body>) -> axum::response::Response {
        app.clone().oneshot(req).await.unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn create(app: &Router, without: Option<&str>) -> String {
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/agent/create")
            .header("content-type", "application/json")
            .header(USER_HEADER, "alice")
            .body(Body::from(agent_body(without)))
            .unwrap();
        let resp = send(app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        body_json(resp).await["id"].as_str().unwrap().to_owned()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (app, _dir) = test_app().await;
        let resp = send(&app, get_req("/health")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "ok");
    }

    #[tokio::test]
    async fn create_export_download_round_trip() {
        let (app, _dir) = test_app().await;
        let id = create(&app, None).await;

        let resp = send(&app, get_req(&format!("/api/v1/agent/{id}/export?ttl_secs=60"))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let issued = body_json(resp).await;
        assert_eq!(issued["version"], 1);
        let token = issued["token"].as_str().unwrap();

        let resp = send(&app, get_req(&format!("/api/v1/download/{token}"))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(
            resp.headers()[header::CONTENT_DISPOSITION],
            format!("attachment; filename=\"agent-{id}-v1.json\"").as_str()
        );
        let artifact = body_json(resp).await;
        assert_eq!(artifact["format"], 1);
        assert_eq!(artifact["record_id"], id.as_str());
        assert_eq!(artifact["config"]["llm_id"], "llm-gpt");
    }

    #[tokio::test]
    async fn create_requires_user_header() {
        let (app, _dir) = test_app().await;
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/agent/create")
            .header("content-type", "application/json")
            .body(Body::from(agent_body(None)))
            .unwrap();
        let resp = send(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"]["code"], "invalid_request");
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let (app, _dir) = test_app().await;
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/agent/create")
            .header("content-type", "application/json")
            .header(USER_HEADER, "alice")
            .body(Body::from("{not json"))
            .unwrap();
        assert_eq!(send(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn update_bumps_version() {
        let (app, _dir) = test_app().await;
        let id = create(&app, None).await;
        let req = Request::builder()
            .method("PUT")
            .uri(format!("/api/v1/agent/{id}/update"))
            .header("content-type", "application/json")
            .header(USER_HEADER, "alice")
            .body(Body::from(json!({"fields": {"name": "Renamed"}}).to_string()))
            .unwrap();
        let resp = send(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["version"], 2);

        let view = body_json(send(&app, get_req(&format!("/api/v1/agent/{id}"))).await).await;
        assert_eq!(view["config"]["name"], "Renamed");
        assert_eq!(view["owner"], "alice");
    }

    #[tokio::test]
    async fn invalid_record_export_is_unprocessable() {
        let (app, _dir) = test_app().await;
        let id = create(&app, Some("prompt_id")).await;

        let resp = send(&app, get_req(&format!("/api/v1/agent/{id}/export"))).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(resp).await;
        assert_eq!(body["error"]["code"], "materialization_failed");
        assert_eq!(body["error"]["details"][0]["field"], "prompt_id");
    }

    #[tokio::test]
    async fn bad_token_is_forbidden() {
        let (app, _dir) = test_app().await;
        let resp = send(&app, get_req("/api/v1/download/AAAA")).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(resp).await["error"]["code"], "token_invalid");
    }

    #[tokio::test]
    async fn zero_ttl_is_bad_request() {
        let (app, _dir) = test_app().await;
        let id = create(&app, None).await;
        let resp = send(&app, get_req(&format!("/api/v1/agent/{id}/export?ttl_secs=0"))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_and_malformed_ids() {
        let (app, _dir) = test_app().await;
        let resp = send(&app, get_req(&format!("/api/v1/agent/{}", Uuid::new_v4()))).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = send(&app, get_req("/api/v1/agent/not-a-uuid")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn deleted_record_stops_downloads() {
        let (app, _dir) = test_app().await;
        let id = create(&app, None).await;
        let issued = body_json(send(&app, get_req(&format!("/api/v1/agent/{id}/export"))).await).await;
        let token = issued["token"].as_str().unwrap().to_owned();

        let req = Request::builder()
            .method("DELETE")
            .uri(format!("/api/v1/agent/{id}"))
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&app, req).await.status(), StatusCode::NO_CONTENT);

        let resp = send(&app, get_req(&format!("/api/v1/download/{token}"))).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn file_upload_lifecycle() {
        let (app, _dir) = test_app().await;
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/file/upload")
            .header("content-type", "text/plain")
            .header(FILE_NAME_HEADER, "notes.txt")
            .body(Body::from("hello"))
            .unwrap();
        let resp = send(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let stored = body_json(resp).await;
        assert_eq!(stored["name"], "notes.txt");
        assert_eq!(stored["size"], 5);
        let id = stored["id"].as_str().unwrap().to_owned();

        let resp = send(&app, get_req(&format!("/api/v1/file/{id}/metadata"))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["mime_type"], "text/plain");

        let resp = send(&app, get_req(&format!("/api/v1/file/{id}"))).await;
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);

        let delete = || {
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/v1/file/{id}"))
                .body(Body::empty())
                .unwrap()
        };
        assert_eq!(send(&app, delete()).await.status(), StatusCode::NO_CONTENT);
        assert_eq!(send(&app, delete()).await.status(), StatusCode::NOT_FOUND);
        let resp = send(&app, get_req(&format!("/api/v1/file/{id}/metadata"))).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listing_pages_through_live_records() {
        let (app, _dir) = test_app().await;
        let first = create(&app, None).await;
        let second = create(&app, None).await;
        let gone = create(&app, None).await;
        let req = Request::builder()
            .method("DELETE")
            .uri(format!("/api/v1/agent/{gone}"))
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&app, req).await.status(), StatusCode::NO_CONTENT);

        let resp = send(&app, get_req("/api/v1/agent/all")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let page = body_json(resp).await;
        assert_eq!(page["total_elements"], 2);
        assert_eq!(page["total_pages"], 1);
        assert_eq!(page["page_size"], 10);
        assert_eq!(page["first"], true);
        assert_eq!(page["last"], true);
        let mut ids: Vec<String> = page["content"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["id"].as_str().unwrap().to_owned())
            .collect();
        ids.sort();
        let mut expected = vec![first, second];
        expected.sort();
        assert_eq!(ids, expected);

        let page = body_json(send(&app, get_req("/api/v1/agent/all?offset=1&limit=1")).await).await;
        assert_eq!(page["page_number"], 1);
        assert_eq!(page["content"].as_array().unwrap().len(), 1);
        assert_eq!(page["first"], false);
        assert_eq!(page["last"], true);
    }

    #[tokio::test]
    async fn listing_rejects_out_of_range_paging() {
        let (app, _dir) = test_app().await;
        for query in ["limit=0", "limit=101", "offset=-1", "limit=abc"] {
            let resp = send(&app, get_req(&format!("/api/v1/agent/all?{query}"))).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{query}");
        }
    }

    #[tokio::test]
    async fn upload_requires_file_name() {
        let (app, _dir) = test_app().await;
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/file/upload")
            .body(Body::from("hello"))
            .unwrap();
        assert_eq!(send(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }
}
