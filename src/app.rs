use std::any::Any;
use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::{
    config::Config,
    error::ApiError,
    middleware::{rate_limit_middleware, security_headers_middleware, SlidingWindowLimiter},
    routes::{api_info, generate_hairstyle, health, list_styles, not_found, AppState},
};

pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", o);
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

fn panic_response(expose: bool) -> impl Fn(Box<dyn Any + Send + 'static>) -> Response + Clone {
    move |panic| {
        let detail = panic
            .downcast_ref::<String>()
            .cloned()
            .or_else(|| panic.downcast_ref::<&str>().map(|s| s.to_string()))
            .unwrap_or_else(|| "unknown panic".to_string());
        ApiError::Unhandled(detail).respond(expose).into_response()
    }
}

/// Assembles the gateway. Layers run outermost first: security headers, CORS,
/// rate limiting, request logging, panic recovery.
pub fn build_router(state: AppState, config: &Config, limiter: Arc<SlidingWindowLimiter>) -> Router {
    let expose = state.expose_errors;
    let mut router = Router::new()
        // method fallbacks keep wrong-method requests on the structured 404
        .route("/health", get(health).fallback(not_found))
        .route("/api", get(api_info).fallback(not_found))
        .route("/api/styles", get(list_styles).fallback(not_found))
        .route("/api/generate-hairstyle", post(generate_hairstyle).fallback(not_found))
        .fallback(not_found)
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CatchPanicLayer::custom(panic_response(expose)));

    if config.request_logging {
        router = router.layer(TraceLayer::new_for_http());
    }

    router.layer(
        ServiceBuilder::new()
            .layer(middleware::from_fn(security_headers_middleware))
            .layer(cors_layer(&config.allowed_origins))
            .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware)),
    )
}
