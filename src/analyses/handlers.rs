use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tracing::{info, instrument};
use uuid::Uuid;

use super::{
    dto::{AnalysisResponse, AnalyzeResponse, GuestQuotaResponse, HistoryResponse, Pagination},
    services,
    validation::ImageUpload,
};
use crate::{
    auth::Caller,
    config::MAX_UPLOAD_BYTES,
    error::{AppResult, Error},
    model::ModelMetadata,
    state::AppState,
};

/// Room for multipart boundaries and headers on top of the image itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

// --- public routers ---

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/analyses/:id", get(get_analysis))
        .route("/uploads/:filename", get(get_upload))
        .route("/guest/quota", get(guest_quota))
        .route("/model", get(model_info))
}

pub fn write_routes() -> Router<AppState> {
    Router::new()
        .route("/analyses", get(history).post(analyze))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + MULTIPART_OVERHEAD))
}

// --- handlers ---

/// POST /analyses (multipart, field `image`)
#[instrument(skip(state, multipart))]
pub async fn analyze(
    State(state): State<AppState>,
    caller: Caller,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<(StatusCode, Json<AnalyzeResponse>)> {
    let mut mp = multipart.map_err(|e| Error::validation(e.body_text()))?;

    let mut upload = None;
    while let Some(field) = mp.next_field().await.map_err(multipart_error)? {
        if !matches!(field.name(), Some("image") | Some("file")) {
            continue;
        }
        let original_filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let body = field.bytes().await.map_err(multipart_error)?;
        upload = Some(ImageUpload {
            original_filename,
            content_type,
            body,
        });
        break;
    }
    let upload = upload.ok_or_else(|| Error::validation("Please choose an image to upload."))?;

    let outcome = services::analyze(&state, caller, upload).await?;
    let analysis = AnalysisResponse::from(&outcome.record);
    let message = format!("Result: {} ({}%)", analysis.label, analysis.confidence);
    Ok((
        StatusCode::CREATED,
        Json(AnalyzeResponse {
            analysis,
            message,
            guest_remaining: outcome.guest_remaining,
        }),
    ))
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> Error {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge {
            limit_bytes: MAX_UPLOAD_BYTES,
        }
    } else {
        Error::validation(format!("Invalid upload: {}", e.body_text()))
    }
}

#[instrument(skip(state))]
pub async fn history(
    State(state): State<AppState>,
    caller: Caller,
    Query(p): Query<Pagination>,
) -> AppResult<Json<HistoryResponse>> {
    let (limit, offset) = p.clamped();
    let records = services::history(&state, caller, limit, offset).await?;
    Ok(Json(HistoryResponse {
        items: records.iter().map(AnalysisResponse::from).collect(),
        limit,
        offset,
    }))
}

#[instrument(skip(state))]
pub async fn get_analysis(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> AppResult<Json<AnalysisResponse>> {
    let record = services::get_analysis(&state, caller, id).await?;
    Ok(Json(AnalysisResponse::from(&record)))
}

#[instrument(skip(state))]
pub async fn get_upload(
    State(state): State<AppState>,
    caller: Caller,
    Path(filename): Path<String>,
) -> AppResult<Response> {
    let (content_type, body) = services::fetch_upload(&state, caller, &filename).await?;
    let content_type = HeaderValue::from_str(&content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    Ok(([(header::CONTENT_TYPE, content_type)], body).into_response())
}

#[instrument(skip(state))]
pub async fn guest_quota(
    State(state): State<AppState>,
    caller: Caller,
) -> AppResult<Json<GuestQuotaResponse>> {
    let Caller::Guest(guest) = caller else {
        return Err(Error::validation("Signed-in accounts have no guest quota"));
    };
    let (used, remaining) = services::guest_quota(&state, &guest).await?;
    info!(guest = %guest, used, "guest quota checked");
    Ok(Json(GuestQuotaResponse {
        limit: state.config.guest_quota,
        used,
        remaining,
    }))
}

pub async fn model_info(State(state): State<AppState>) -> Json<ModelMetadata> {
    Json(state.classifier.metadata().clone())
}
