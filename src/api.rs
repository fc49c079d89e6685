use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{ConnectInfo, DefaultBodyLimit, FromRequest, Multipart, Path, Query, Request, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::trace::TraceLayer;

use crate::error::StorageError;
use crate::item::{ItemMeta, Source};
use crate::secret::AdminSecret;
use crate::storage::Storage;

const API_VERSION: &str = env!("CARGO_PKG_VERSION");
const IMAGE_FIELD: &str = "image";
const METADATA_FIELD: &str = "data";

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<Storage>,
    pub secret: AdminSecret,
}

#[derive(Serialize)]
struct ErrorResponse {
    status: &'static str,
    error: String,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct OkResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct UploadResponse {
    status: &'static str,
    id: String,
}

#[derive(Serialize)]
struct ListResponse {
    status: &'static str,
    list: Vec<String>,
}

#[derive(Serialize)]
struct MetaResponse {
    status: &'static str,
    #[serde(flatten)]
    meta: ItemMeta,
}

#[derive(Deserialize)]
pub struct UploadQuery {
    namespace: Option<String>,
}

#[derive(Deserialize)]
pub struct AdminQuery {
    #[serde(default)]
    secret: String,
    prefix: Option<String>,
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(root_page))
        .route("/api", get(api_status).post(handle_upload))
        .route("/api/", get(api_status).post(handle_upload))
        .route("/api/list", get(handle_list))
        .route("/api/{idext}", get(handle_download).delete(handle_remove))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            status: "ng",
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn not_found() -> Response {
    json_error(StatusCode::NOT_FOUND, "file not found")
}

fn error_status(err: &StorageError) -> StatusCode {
    match err {
        StorageError::ListingUnsupported(_) => StatusCode::NOT_IMPLEMENTED,
        err if err.is_client_error() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn storage_error(err: StorageError) -> Response {
    let status = error_status(&err);
    if status.is_server_error() {
        tracing::error!("storage error: {}", err);
    }
    json_error(status, &err.to_string())
}

/// Runs a blocking storage call off the async workers.
async fn blocking<T, F>(call: F) -> Result<T, Response>
where
    F: FnOnce() -> crate::Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(storage_error(err)),
        Err(err) => {
            tracing::error!("storage task failed: {}", err);
            Err(json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("storage task failed: {err}"),
            ))
        }
    }
}

fn split_extension(idext: &str) -> (&str, &str) {
    match idext.rfind('.') {
        Some(index) => idext.split_at(index),
        None => (idext, ""),
    }
}

fn parse_metadata(bytes: &[u8]) -> Result<Value, StorageError> {
    serde_json::from_slice(bytes).map_err(|err| StorageError::InvalidMetadata(err.to_string()))
}

pub async fn root_page() -> &'static str {
    "KIS server works.\n"
}

pub async fn api_status() -> Response {
    Json(StatusResponse {
        status: "ok",
        version: API_VERSION,
    })
    .into_response()
}

pub async fn handle_upload(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    request: Request,
) -> Response {
    let source = Source {
        ip: request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_default(),
        agent: request
            .headers()
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string(),
    };
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(';').next().unwrap_or(value).trim().to_string())
        .unwrap_or_default();

    let (bytes, metadata) = if content_type == "multipart/form-data" {
        let mut multipart = match Multipart::from_request(request, &state).await {
            Ok(multipart) => multipart,
            Err(rejection) => return rejection.into_response(),
        };
        let mut image = None;
        let mut metadata = None;
        loop {
            match multipart.next_field().await {
                Ok(Some(field)) => {
                    let name = field.name().map(str::to_string);
                    let data = match field.bytes().await {
                        Ok(data) => data,
                        Err(err) => {
                            return json_error(
                                StatusCode::BAD_REQUEST,
                                &format!("read form field failed: {err}"),
                            );
                        }
                    };
                    match name.as_deref() {
                        Some(IMAGE_FIELD) => image = Some(data),
                        Some(METADATA_FIELD) => match parse_metadata(&data) {
                            Ok(value) => metadata = Some(value),
                            Err(err) => return storage_error(err),
                        },
                        _ => {}
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    return json_error(
                        StatusCode::BAD_REQUEST,
                        &format!("read form failed: {err}"),
                    );
                }
            }
        }
        match image {
            Some(image) => (image, metadata),
            None => {
                return json_error(
                    StatusCode::BAD_REQUEST,
                    "require \"image\" key for multipart/form-data",
                );
            }
        }
    } else {
        match Bytes::from_request(request, &state).await {
            Ok(bytes) => (bytes, None),
            Err(rejection) => return rejection.into_response(),
        }
    };

    let storage = state.storage.clone();
    let result = blocking(move || {
        let id = storage.generate_id(query.namespace.as_deref())?;
        storage.save_with_source(&id, bytes.as_ref(), metadata.as_ref(), &source)?;
        Ok(id)
    })
    .await;
    match result {
        Ok(id) => Json(UploadResponse { status: "ok", id }).into_response(),
        Err(response) => response,
    }
}

pub async fn handle_download(
    State(state): State<AppState>,
    Path(idext): Path<String>,
) -> Response {
    let (id, ext) = split_extension(&idext);
    let (id, ext) = (id.to_string(), ext.to_string());
    let storage = state.storage.clone();

    if ext == ".json" {
        return match blocking(move || storage.read_metadata(&id)).await {
            Ok(Some(meta)) => Json(MetaResponse { status: "ok", meta }).into_response(),
            Ok(None) => not_found(),
            Err(response) => response,
        };
    }

    match blocking(move || storage.fetch(&id, &ext)).await {
        Ok(Some(fetched)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, fetched.mime_type)],
            fetched.bytes,
        )
            .into_response(),
        Ok(None) => not_found(),
        Err(response) => response,
    }
}

pub async fn handle_list(
    State(state): State<AppState>,
    Query(query): Query<AdminQuery>,
) -> Response {
    if !state.secret.verify(&query.secret) {
        return json_error(StatusCode::FORBIDDEN, "forbidden");
    }
    let storage = state.storage.clone();
    let result = blocking(move || {
        let prefixes: Vec<&str> = query.prefix.as_deref().into_iter().collect();
        storage.keys(&prefixes)
    })
    .await;
    match result {
        Ok(list) => Json(ListResponse { status: "ok", list }).into_response(),
        Err(response) => response,
    }
}

pub async fn handle_remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<AdminQuery>,
) -> Response {
    if !state.secret.verify(&query.secret) {
        return json_error(StatusCode::FORBIDDEN, "forbidden");
    }
    let storage = state.storage.clone();
    let result = blocking(move || {
        if !storage.exists(&id)? {
            return Ok(false);
        }
        storage.remove(&id)?;
        Ok(true)
    })
    .await;
    match result {
        Ok(true) => Json(OkResponse { status: "ok" }).into_response(),
        Ok(false) => not_found(),
        Err(response) => response,
    }
}
