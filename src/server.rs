//! Web API driving a capture session and the compositing pipeline
//!
//! Any front end that can send clicks as JSON can place a logo: create a
//! session for a base photo and a logo, post four corner clicks in display
//! coordinates, then ask for the composite.

use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::capture::{CaptureSession, CaptureState, CornerPoint};
use crate::config::Config;
use crate::error::Error;
use crate::geometry::{Point, Quad};
use crate::output::CompositeHandle;
use crate::pipeline::{CompositeRequest, Compositor};

/// One placement in progress: the images and the corners clicked so far
struct Workspace {
    base: PathBuf,
    logo: PathBuf,
    session: CaptureSession,
}

/// Shared application state
pub struct AppState {
    pub config: Arc<RwLock<Config>>,
    workspace: RwLock<Option<Workspace>>,
    /// Path of the most recent composite
    last_output: RwLock<Option<PathBuf>>,
}

impl AppState {
    pub fn new(config: Arc<RwLock<Config>>) -> Self {
        Self {
            config,
            workspace: RwLock::new(None),
            last_output: RwLock::new(None),
        }
    }
}

/// Error body returned by every endpoint
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    recoverable: bool,
}

enum ApiError {
    NoSession,
    BadRequest(String),
    /// Composite requested before four corners were captured
    Incomplete(usize),
    Core(Error),
    Internal(String),
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError::Core(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, recoverable) = match self {
            ApiError::NoSession => (
                StatusCode::NOT_FOUND,
                "no capture session; POST /api/session first".to_string(),
                true,
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, true),
            ApiError::Incomplete(n) => (
                StatusCode::CONFLICT,
                format!("capture session needs four corners, has {}", n),
                true,
            ),
            ApiError::Core(e) => {
                let status = match &e {
                    Error::DegenerateQuadrilateral(_) | Error::SingularSystem => {
                        StatusCode::UNPROCESSABLE_ENTITY
                    }
                    Error::CaptureComplete => StatusCode::CONFLICT,
                    Error::InvalidScale { .. } | Error::InvalidSource { .. } => {
                        StatusCode::BAD_REQUEST
                    }
                    Error::DimensionMismatch { .. } | Error::IoFailure { .. } => {
                        tracing::error!("Composite failed: {}", e);
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, e.to_string(), e.is_recoverable())
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg, false),
        };

        (status, Json(ErrorBody { error, recoverable })).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Build the API router
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/api/session",
            get(get_session).post(create_session).delete(delete_session),
        )
        .route("/api/session/point", post(add_point))
        .route("/api/session/reset", post(reset_session))
        .route("/api/session/display", post(set_display))
        .route("/api/session/composite", post(run_composite))
        .route("/api/preview", get(get_preview))
        .route("/api/info", get(get_info))
        .layer(cors)
        .with_state(state)
}

/// Run the web server
pub async fn run_server(addr: &str, state: Arc<AppState>) -> Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Web server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Snapshot of the current session
#[derive(Serialize)]
struct SessionResponse {
    base: PathBuf,
    logo: PathBuf,
    image_width: u32,
    image_height: u32,
    display_width: u32,
    scale: f64,
    capture: CaptureState,
    corners: Vec<CornerPoint>,
    quad: Option<Quad>,
}

impl SessionResponse {
    fn from_workspace(ws: &Workspace) -> Self {
        let (image_width, image_height) = ws.session.image_size();
        Self {
            base: ws.base.clone(),
            logo: ws.logo.clone(),
            image_width,
            image_height,
            display_width: ws.session.display_width(),
            scale: ws.session.scale(),
            capture: ws.session.state(),
            corners: ws.session.corner_points(),
            quad: ws.session.quad().copied(),
        }
    }
}

#[derive(Deserialize)]
struct CreateSessionRequest {
    base: PathBuf,
    logo: PathBuf,
    display_width: Option<u32>,
}

/// Start a new session, replacing any previous one
async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult<Json<SessionResponse>> {
    let (base, logo) = (req.base.clone(), req.logo.clone());
    let (width, height) = tokio::task::spawn_blocking(move || {
        let dims = image::image_dimensions(&base)
            .map_err(|e| Error::invalid_source(format!("base image {:?}", base), e.to_string()))?;
        image::image_dimensions(&logo)
            .map_err(|e| Error::invalid_source(format!("logo {:?}", logo), e.to_string()))?;
        Ok::<_, Error>(dims)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("image probe failed: {}", e)))??;

    let (display_width, policy) = {
        let config = state.config.read();
        (
            req.display_width.unwrap_or(config.capture.display_width),
            config.capture.winding,
        )
    };

    let session = CaptureSession::new(width, height, display_width, policy)?;
    let ws = Workspace {
        base: req.base,
        logo: req.logo,
        session,
    };
    let response = SessionResponse::from_workspace(&ws);
    *state.workspace.write() = Some(ws);

    tracing::info!(
        "New capture session for {:?} ({}x{})",
        response.base,
        width,
        height
    );
    Ok(Json(response))
}

async fn get_session(State(state): State<Arc<AppState>>) -> ApiResult<Json<SessionResponse>> {
    let ws = state.workspace.read();
    let ws = ws.as_ref().ok_or(ApiError::NoSession)?;
    Ok(Json(SessionResponse::from_workspace(ws)))
}

/// The caller accepted the result; drop the session
async fn delete_session(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.workspace.write().take() {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

/// A click in display coordinates
#[derive(Deserialize)]
struct PointRequest {
    x: f64,
    y: f64,
}

async fn add_point(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PointRequest>,
) -> ApiResult<Json<SessionResponse>> {
    let mut guard = state.workspace.write();
    let ws = guard.as_mut().ok_or(ApiError::NoSession)?;
    ws.session.add_point(Point::new(req.x, req.y))?;
    Ok(Json(SessionResponse::from_workspace(ws)))
}

async fn reset_session(State(state): State<Arc<AppState>>) -> ApiResult<Json<SessionResponse>> {
    let mut guard = state.workspace.write();
    let ws = guard.as_mut().ok_or(ApiError::NoSession)?;
    ws.session.reset();
    Ok(Json(SessionResponse::from_workspace(ws)))
}

#[derive(Deserialize)]
struct DisplayRequest {
    display_width: u32,
}

/// Change the display width; points collected so far are discarded
async fn set_display(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DisplayRequest>,
) -> ApiResult<Json<SessionResponse>> {
    let mut guard = state.workspace.write();
    let ws = guard.as_mut().ok_or(ApiError::NoSession)?;
    ws.session.set_display_width(req.display_width)?;
    Ok(Json(SessionResponse::from_workspace(ws)))
}

#[derive(Deserialize, Default)]
struct CompositeRequestBody {
    output: Option<PathBuf>,
}

/// Resolve a requested output path inside the configured output directory
fn confined_output(dir: &Path, requested: &Path) -> ApiResult<PathBuf> {
    let relative = requested
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !relative || requested.as_os_str().is_empty() {
        return Err(ApiError::BadRequest(format!(
            "output {:?} must be a relative path inside the output directory",
            requested
        )));
    }
    Ok(dir.join(requested))
}

/// Composite the logo onto the completed quad
///
/// The body is optional; without a JSON content type the configured output is used.
async fn run_composite(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Json<CompositeRequestBody>, JsonRejection>,
) -> ApiResult<Json<CompositeHandle>> {
    let body = match body {
        Ok(Json(body)) => body,
        Err(JsonRejection::MissingJsonContentType(_)) => CompositeRequestBody::default(),
        Err(rejection) => return Err(ApiError::BadRequest(rejection.body_text())),
    };

    let (request, compositor) = {
        let guard = state.workspace.read();
        let ws = guard.as_ref().ok_or(ApiError::NoSession)?;
        let quad = ws
            .session
            .quad()
            .copied()
            .ok_or_else(|| ApiError::Incomplete(ws.session.corner_points().len()))?;

        let config = state.config.read();
        let output = match &body.output {
            Some(requested) => confined_output(&config.output.dir, requested)?,
            None => config.output.default_path(),
        };

        (
            CompositeRequest {
                base: ws.base.clone().into(),
                logo: ws.logo.clone().into(),
                quad,
                output,
            },
            Compositor::from_config(&config),
        )
    };

    let handle = tokio::task::spawn_blocking(move || compositor.run(request))
        .await
        .map_err(|e| ApiError::Internal(format!("composite task failed: {}", e)))??;

    *state.last_output.write() = Some(handle.path.clone());
    Ok(Json(handle))
}

/// Get the most recent composite
async fn get_preview(State(state): State<Arc<AppState>>) -> Response {
    let Some(path) = state.last_output.read().clone() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "No composite available").into_response();
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            (
                [(axum::http::header::CONTENT_TYPE, mime.as_ref().to_string())],
                bytes,
            )
                .into_response()
        }
        Err(e) => (
            StatusCode::NOT_FOUND,
            format!("Composite {:?} unavailable: {}", path, e),
        )
            .into_response(),
    }
}

/// System information response
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    display_width: u32,
    output: PathBuf,
    placement: String,
    session_active: bool,
}

async fn get_info(State(state): State<Arc<AppState>>) -> Json<InfoResponse> {
    let config = state.config.read();

    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        display_width: config.capture.display_width,
        output: config.output.default_path(),
        placement: config.placement.label.clone(),
        session_active: state.workspace.read().is_some(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use image::{Rgb, RgbImage, Rgba, RgbaImage};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct Fixture {
        _dir: tempfile::TempDir,
        app: Router,
        base: PathBuf,
        logo: PathBuf,
        output: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("cap.png");
        let logo = dir.path().join("logo.png");
        RgbImage::from_pixel(400, 300, Rgb([128, 128, 128]))
            .save(&base)
            .unwrap();
        RgbaImage::from_pixel(20, 20, Rgba([255, 0, 0, 255]))
            .save(&logo)
            .unwrap();

        let mut config = Config::default();
        config.output.dir = dir.path().join("output");
        let output = config.output.default_path();

        let state = Arc::new(AppState::new(Arc::new(RwLock::new(config))));
        Fixture {
            app: router(state),
            base,
            logo,
            output,
            _dir: dir,
        }
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Vec<u8>) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(v) => builder
                .header("content-type", "application/json")
                .body(Body::from(v.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    async fn call_json(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let (status, bytes) = call(app, method, uri, body).await;
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn start(f: &Fixture) {
        // 400px image shown 200px wide: scale 2
        let (status, body) = call_json(
            &f.app,
            Method::POST,
            "/api/session",
            Some(json!({"base": f.base, "logo": f.logo, "display_width": 200})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["scale"], 2.0);
        assert_eq!(body["capture"]["state"], "empty");
    }

    async fn click(f: &Fixture, x: f64, y: f64) -> (StatusCode, Value) {
        let body = json!({"x": x, "y": y});
        call_json(&f.app, Method::POST, "/api/session/point", Some(body)).await
    }

    #[tokio::test]
    async fn test_full_placement_flow() {
        let f = fixture();
        start(&f).await;

        for (x, y) in [(50.0, 50.0), (70.0, 50.0), (70.0, 70.0)] {
            let (status, _) = click(&f, x, y).await;
            assert_eq!(status, StatusCode::OK);
        }
        let (status, body) = click(&f, 50.0, 70.0).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["capture"]["state"], "complete");
        assert_eq!(body["corners"][0]["label"], "Top Left");
        assert_eq!(body["quad"]["corners"][2]["x"], 140.0);

        let (status, body) =
            call_json(&f.app, Method::POST, "/api/session/composite", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["width"], 400);
        assert_eq!(PathBuf::from(body["path"].as_str().unwrap()), f.output);

        let composite = image::open(&f.output).unwrap().to_rgb8();
        assert_eq!(composite.get_pixel(110, 110).0, [255, 0, 0]);
        assert_eq!(composite.get_pixel(90, 90).0, [128, 128, 128]);

        let (status, bytes) = call(&f.app, Method::GET, "/api/preview", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&bytes[1..4], b"PNG");

        let (status, _) = call(&f.app, Method::DELETE, "/api/session", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&f.app, Method::GET, "/api/session", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_degenerate_fourth_click() {
        let f = fixture();
        start(&f).await;

        for (x, y) in [(10.0, 10.0), (20.0, 10.0), (30.0, 10.0)] {
            click(&f, x, y).await;
        }
        let (status, body) = click(&f, 40.0, 10.0).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["recoverable"], true);

        let (_, body) = call_json(&f.app, Method::GET, "/api/session", None).await;
        assert_eq!(body["capture"]["state"], "collecting");
        assert_eq!(body["capture"]["points"], 3);
    }

    #[tokio::test]
    async fn test_click_after_complete_conflicts() {
        let f = fixture();
        start(&f).await;
        for (x, y) in [(10.0, 10.0), (60.0, 10.0), (60.0, 60.0), (10.0, 60.0)] {
            click(&f, x, y).await;
        }
        let (status, _) = click(&f, 5.0, 5.0).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_composite_requires_complete_quad() {
        let f = fixture();
        start(&f).await;
        click(&f, 10.0, 10.0).await;

        let (status, body) =
            call_json(&f.app, Method::POST, "/api/session/composite", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("has 1"));
        assert!(!f.output.exists());
    }

    #[tokio::test]
    async fn test_display_change_resets() {
        let f = fixture();
        start(&f).await;
        click(&f, 10.0, 10.0).await;

        let (status, body) = call_json(
            &f.app,
            Method::POST,
            "/api/session/display",
            Some(json!({"display_width": 400})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["scale"], 1.0);
        assert_eq!(body["capture"]["state"], "empty");

        let (status, _) = call(
            &f.app,
            Method::POST,
            "/api/session/display",
            Some(json!({"display_width": 0})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_reset_and_missing_session() {
        let f = fixture();
        let (status, _) = click(&f, 1.0, 1.0).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        start(&f).await;
        click(&f, 1.0, 1.0).await;
        let (status, body) =
            call_json(&f.app, Method::POST, "/api/session/reset", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["capture"]["state"], "empty");
    }

    #[tokio::test]
    async fn test_unreadable_base() {
        let f = fixture();
        let (status, body) = call_json(
            &f.app,
            Method::POST,
            "/api/session",
            Some(json!({"base": "/nonexistent/cap.jpg", "logo": f.logo})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("cap.jpg"));
    }

    #[tokio::test]
    async fn test_info_and_empty_preview() {
        let f = fixture();
        let (status, body) = call_json(&f.app, Method::GET, "/api/info", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["placement"], "Front Panel");
        assert_eq!(body["session_active"], false);

        let (status, _) = call(&f.app, Method::GET, "/api/preview", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    async fn complete_quad(f: &Fixture) {
        for (x, y) in [(10.0, 10.0), (60.0, 10.0), (60.0, 60.0), (10.0, 60.0)] {
            click(f, x, y).await;
        }
    }

    #[tokio::test]
    async fn test_composite_output_stays_in_output_dir() {
        let f = fixture();
        start(&f).await;
        complete_quad(&f).await;

        let escape = f._dir.path().join("escaped.png");
        for output in [json!(escape), json!("../escaped.png"), json!("a/../../escaped.png")] {
            let (status, body) = call_json(
                &f.app,
                Method::POST,
                "/api/session/composite",
                Some(json!({ "output": output })),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "output {}", output);
            assert_eq!(body["recoverable"], true);
        }
        assert!(!escape.exists());

        let (status, body) = call_json(
            &f.app,
            Method::POST,
            "/api/session/composite",
            Some(json!({"output": "front/cap.png"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let written = PathBuf::from(body["path"].as_str().unwrap());
        assert_eq!(written, f.output.parent().unwrap().join("front/cap.png"));
        assert!(written.exists());
    }

    #[tokio::test]
    async fn test_malformed_composite_body_rejected() {
        let f = fixture();
        start(&f).await;
        complete_quad(&f).await;

        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/session/composite")
            .header("content-type", "application/json")
            .body(Body::from("{\"output\": "))
            .unwrap();
        let resp = f.app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(!f.output.exists());
    }
}
