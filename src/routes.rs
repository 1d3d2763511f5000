use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use base64::Engine;
use chrono::Utc;
use image::ImageFormat;
use serde_json::{json, Value};

use crate::{
    analytics::{params, Analytics},
    catalog::StyleCatalog,
    error::{ApiError, ErrorResponse},
    models::{GenerateRequest, GenerationRequest, GenerationResult, GenerationStatus},
    replicate::HairstyleGenerator,
};

pub const SERVICE_NAME: &str = "cutmatch-backend";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const AVAILABLE_ENDPOINTS: [&str; 4] = [
    "GET /health",
    "GET /api",
    "GET /api/styles",
    "POST /api/generate-hairstyle",
];

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<StyleCatalog>,
    pub generator: Arc<dyn HairstyleGenerator>,
    pub analytics: Analytics,
    /// Include internal error detail in responses (development only).
    pub expose_errors: bool,
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "OK",
        "timestamp": Utc::now().to_rfc3339(),
        "version": VERSION,
        "service": SERVICE_NAME,
    }))
}

pub async fn api_info() -> Json<Value> {
    Json(json!({
        "name": "CutMatch API",
        "version": VERSION,
        "endpoints": {
            "health": "GET /health",
            "styles": "GET /api/styles",
            "generateHairstyle": "POST /api/generate-hairstyle",
        },
        "documentation": "POST /api/generate-hairstyle with JSON {\"photo\": <data URI or image URL>, \"styleId\": <id from /api/styles>}",
    }))
}

pub async fn list_styles(State(state): State<AppState>) -> Json<Value> {
    let catalog = &state.catalog;
    Json(json!({
        "success": true,
        "data": {
            "prompts": catalog.prompts(),
            "categories": catalog.categories(),
            "totalStyles": catalog.len(),
        },
        "metadata": {
            "version": VERSION,
            "generatedAt": Utc::now().to_rfc3339(),
            "styles": catalog.iter().collect::<Vec<_>>(),
        },
    }))
}

/// Rejects anything that is neither an http(s) URL nor a base64 PNG/JPEG/WebP data URI.
fn validate_photo(photo: &str) -> Result<(), ApiError> {
    if photo.starts_with("https://") || photo.starts_with("http://") {
        return Ok(());
    }
    let Some(rest) = photo.strip_prefix("data:image/") else {
        return Err(ApiError::Validation("photo must be an image URL or a data:image/ URI".into()));
    };
    let (_, payload) = rest
        .split_once(";base64,")
        .ok_or_else(|| ApiError::Validation("photo data URI must be base64 encoded".into()))?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|_| ApiError::Validation("photo data URI is not valid base64".into()))?;
    match image::guess_format(&bytes) {
        Ok(ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::WebP) => Ok(()),
        _ => Err(ApiError::Validation("photo must be a PNG, JPEG or WebP image".into())),
    }
}

fn validate(state: &AppState, body: GenerateRequest) -> Result<GenerationRequest, ApiError> {
    let style_id = body
        .style_id
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::Validation("styleId is required".into()))?;
    let style = state
        .catalog
        .get(&style_id)
        .ok_or_else(|| ApiError::Validation(format!("unknown styleId '{style_id}'")))?;
    let photo = body
        .photo
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ApiError::Validation("photo is required".into()))?;
    validate_photo(&photo)?;

    Ok(GenerationRequest {
        source_image: photo,
        style_id,
        prompt: style.prompt_text.clone(),
        request_timestamp: Utc::now(),
    })
}

pub async fn generate_hairstyle(
    State(state): State<AppState>,
    body: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerationResult>, ErrorResponse> {
    let expose = state.expose_errors;
    let Json(body) = body.map_err(|e| ApiError::from(e).respond(expose))?;
    let request = validate(&state, body).map_err(|e| e.respond(expose))?;

    tracing::info!("🚀 Generating hairstyle '{}' (requested at {})", request.style_id, request.request_timestamp);
    state.analytics.track_photo_upload("generate_hairstyle");

    let outcome = state.generator.generate(&request.source_image, &request.prompt).await;
    let status = if outcome.is_ok() { GenerationStatus::Succeeded } else { GenerationStatus::Failed };
    state.analytics.track_event(
        "hairstyle_generated",
        params([("style_id", json!(request.style_id)), ("status", json!(status))]),
    );

    let result_image_uri = outcome.map_err(|e| ApiError::from(e).respond(expose))?;
    let elapsed = Utc::now() - request.request_timestamp;
    tracing::info!("✅ Hairstyle '{}' generated in {}ms", request.style_id, elapsed.num_milliseconds());

    Ok(Json(GenerationResult {
        result_image_uri,
        style_id: request.style_id,
        status,
        error_message: None,
    }))
}

pub async fn not_found(method: Method, uri: Uri) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Not Found",
            "message": format!("Route {} {} not found", method, uri.path()),
            "availableEndpoints": AVAILABLE_ENDPOINTS,
        })),
    )
        .into_response()
}
