//! Web server for the mapping controls and the rendered output

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::{Mutex, RwLock};
use rust_embed::RustEmbed;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::Config;
use crate::engine::{Engine, EngineInfo, PointerPhase};
use crate::error::MapperError;
use crate::geometry::{Point, Viewport};
use crate::interaction::KeyCommand;
use crate::media::{decode_media, open_camera};
use crate::presets::{QUAD_PRESETS, SHAPE_PRESETS};
use crate::project::ProjectDocument;
use crate::surface::{Appearance, SurfaceId};

/// Embedded static files for the web UI
#[derive(RustEmbed)]
#[folder = "static/"]
struct StaticAssets;

/// Shared application state
pub struct AppState {
    /// The mapping engine; every command and every frame takes this lock
    pub engine: Mutex<Engine>,
    config: Config,
    /// Latest rendered frame (JPEG encoded)
    preview_frame: RwLock<Vec<u8>>,
}

impl AppState {
    pub fn new(engine: Engine, config: Config) -> Self {
        Self {
            engine: Mutex::new(engine),
            config,
            preview_frame: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Publish a new frame (called from the render loop)
    pub fn update_preview(&self, jpeg: Vec<u8>) {
        *self.preview_frame.write() = jpeg;
    }

    /// Get the latest preview frame
    pub fn get_preview(&self) -> Vec<u8> {
        self.preview_frame.read().clone()
    }
}

/// Error body returned by every API endpoint
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

enum ApiError {
    Mapper(MapperError),
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl From<MapperError> for ApiError {
    fn from(e: MapperError) -> Self {
        ApiError::Mapper(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::Mapper(e) => {
                let status = match e {
                    MapperError::InvalidOperation(_) => StatusCode::CONFLICT,
                    MapperError::MediaLoadFailure(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    MapperError::InvalidProjectFile(_) => StatusCode::BAD_REQUEST,
                };
                (status, e.kind(), e.to_string())
            }
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, "bad_request", m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", m),
        };
        if status.is_server_error() {
            warn!("{}: {}", kind, message);
        }
        (status, Json(ErrorBody { error: kind, message })).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn require_surface(engine: &Engine, id: SurfaceId) -> ApiResult<()> {
    match engine.state().get(id) {
        Some(_) => Ok(()),
        None => Err(ApiError::NotFound(format!("no surface with id {}", id))),
    }
}

/// Run the web server
pub async fn run_server(addr: &str, state: Arc<AppState>) -> Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let upload_limit = state.config().media.max_upload_mb * 1024 * 1024;

    let app = Router::new()
        // Static files and UI
        .route("/", get(index_handler))
        .route("/static/*path", get(static_handler))
        // Surfaces
        .route("/api/state", get(get_state))
        .route("/api/surfaces", post(create_surface))
        .route("/api/surfaces/:id", axum::routing::delete(delete_surface))
        .route("/api/surfaces/:id/activate", post(activate_surface))
        .route("/api/surfaces/:id/corners/:index", post(set_corner))
        .route("/api/surfaces/:id/appearance", post(set_appearance))
        .route("/api/surfaces/:id/media", post(upload_media))
        .route("/api/surfaces/:id/camera", post(bind_camera))
        // Presets
        .route("/api/presets/:name", post(apply_preset))
        .route("/api/shapes/:name", post(apply_shape))
        // Project
        .route("/api/project", get(export_project).post(import_project))
        .route("/api/project/save", post(save_project))
        .route("/api/project/load", post(load_project))
        // History
        .route("/api/history/undo", post(undo))
        .route("/api/history/redo", post(redo))
        // Interaction
        .route("/api/snow", post(toggle_snow))
        .route("/api/pointer/:phase", post(pointer))
        .route("/api/keys", post(key))
        .route("/api/corner", post(select_corner))
        .route("/api/viewport", post(set_viewport))
        // Output
        .route("/api/preview", get(get_preview))
        .route("/api/preview/stream", get(preview_stream))
        .route("/api/info", get(get_info))
        .layer(DefaultBodyLimit::max(upload_limit))
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Web server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Serve the main index page
async fn index_handler() -> impl IntoResponse {
    match StaticAssets::get("index.html") {
        Some(content) => Html(content.data.to_vec()).into_response(),
        None => (StatusCode::NOT_FOUND, "Index not found").into_response(),
    }
}

/// Serve static files
async fn static_handler(Path(path): Path<String>) -> impl IntoResponse {
    let path = path.trim_start_matches('/');

    match StaticAssets::get(path) {
        Some(content) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            (
                [(header::CONTENT_TYPE, mime.as_ref())],
                content.data.to_vec(),
            )
                .into_response()
        }
        None => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}

async fn get_state(State(state): State<Arc<AppState>>) -> Json<EngineInfo> {
    Json(state.engine.lock().info())
}

#[derive(Deserialize, Default)]
struct CreateSurfaceRequest {
    name: Option<String>,
}

#[derive(Serialize)]
struct CreatedResponse {
    ids: Vec<SurfaceId>,
}

async fn create_surface(
    State(state): State<Arc<AppState>>,
    req: Option<Json<CreateSurfaceRequest>>,
) -> Json<CreatedResponse> {
    let name = req.and_then(|Json(r)| r.name);
    let id = state.engine.lock().create_surface(name, Instant::now());
    Json(CreatedResponse { ids: vec![id] })
}

async fn delete_surface(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SurfaceId>,
) -> ApiResult<StatusCode> {
    let mut engine = state.engine.lock();
    require_surface(&engine, id)?;
    engine.delete_surface(id, Instant::now())?;
    Ok(StatusCode::OK)
}

async fn activate_surface(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SurfaceId>,
) -> ApiResult<StatusCode> {
    let mut engine = state.engine.lock();
    require_surface(&engine, id)?;
    engine.select_surface(id)?;
    Ok(StatusCode::OK)
}

async fn set_corner(
    State(state): State<Arc<AppState>>,
    Path((id, index)): Path<(SurfaceId, usize)>,
    Json(point): Json<Point>,
) -> ApiResult<StatusCode> {
    let mut engine = state.engine.lock();
    require_surface(&engine, id)?;
    engine.set_corner(id, index, point, Instant::now())?;
    Ok(StatusCode::OK)
}

/// Any subset of the appearance controls
#[derive(Deserialize)]
struct AppearanceRequest {
    brightness: Option<f32>,
    contrast: Option<f32>,
    opacity: Option<f32>,
    /// Degrees, converted to radians by the engine
    rotation: Option<f64>,
}

async fn set_appearance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SurfaceId>,
    Json(req): Json<AppearanceRequest>,
) -> ApiResult<StatusCode> {
    let now = Instant::now();
    let mut engine = state.engine.lock();
    require_surface(&engine, id)?;
    if let Some(v) = req.brightness {
        engine.set_appearance(id, Appearance::Brightness(v), now)?;
    }
    if let Some(v) = req.contrast {
        engine.set_appearance(id, Appearance::Contrast(v), now)?;
    }
    if let Some(v) = req.opacity {
        engine.set_appearance(id, Appearance::Opacity(v), now)?;
    }
    if let Some(deg) = req.rotation {
        engine.set_rotation_degrees(id, deg, now)?;
    }
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
struct MediaQuery {
    /// Original file name, used when the content type is missing
    name: Option<String>,
}

#[derive(Serialize)]
struct MediaResponse {
    is_video: bool,
    width: u32,
    height: u32,
    /// Accepted, but larger than the configured limit
    oversized: bool,
}

/// Decode an uploaded image or Motion-JPEG clip and bind it to a surface
async fn upload_media(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SurfaceId>,
    Query(query): Query<MediaQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<MediaResponse>> {
    require_surface(&state.engine.lock(), id)?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let limits = state.engine.lock().settings().media_limits;

    // Decode without holding the engine lock
    let loaded = tokio::task::spawn_blocking(move || {
        decode_media(&body, content_type.as_deref(), query.name.as_deref(), &limits)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    let is_video = loaded.media.is_video();
    let (width, height) = loaded.media.dimensions();
    let oversized = state
        .engine
        .lock()
        .attach_media(id, loaded, Instant::now())
        .map_err(|_| ApiError::NotFound(format!("surface {} was deleted", id)))?;

    Ok(Json(MediaResponse {
        is_video,
        width,
        height,
        oversized,
    }))
}

#[derive(Deserialize, Default)]
struct CameraRequest {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
}

/// Bind a live V4L2 camera to a surface
async fn bind_camera(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SurfaceId>,
    req: Option<Json<CameraRequest>>,
) -> ApiResult<Json<MediaResponse>> {
    require_surface(&state.engine.lock(), id)?;

    let req = req.map(|Json(r)| r).unwrap_or_default();
    let defaults = &state.config.camera;
    let device = req.device.unwrap_or_else(|| defaults.device.clone());
    let width = req.width.unwrap_or(defaults.width);
    let height = req.height.unwrap_or(defaults.height);
    let fps = req.fps.unwrap_or(defaults.fps);

    let loaded = tokio::task::spawn_blocking(move || open_camera(&device, width, height, fps))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    let (width, height) = loaded.media.dimensions();
    state
        .engine
        .lock()
        .attach_media(id, loaded, Instant::now())
        .map_err(|_| ApiError::NotFound(format!("surface {} was deleted", id)))?;

    Ok(Json(MediaResponse {
        is_video: true,
        width,
        height,
        oversized: false,
    }))
}

async fn apply_preset(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    state.engine.lock().apply_preset(&name, Instant::now())?;
    Ok(StatusCode::OK)
}

async fn apply_shape(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<CreatedResponse>> {
    let ids = state.engine.lock().apply_shape(&name, Instant::now())?;
    Ok(Json(CreatedResponse { ids }))
}

async fn export_project(State(state): State<Arc<AppState>>) -> Json<ProjectDocument> {
    Json(state.engine.lock().export_project())
}

async fn import_project(State(state): State<Arc<AppState>>, body: String) -> ApiResult<StatusCode> {
    state.engine.lock().import_project(&body)?;
    Ok(StatusCode::OK)
}

/// Write the project document to the configured path
async fn save_project(State(state): State<Arc<AppState>>) -> ApiResult<StatusCode> {
    let json = state.engine.lock().export_project().to_json()?;
    let path = state.config.project.path.clone();
    tokio::fs::write(&path, json)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to write {:?}: {}", path, e)))?;
    info!("Saved project to {:?}", path);
    Ok(StatusCode::OK)
}

/// Replace the current project with the one at the configured path
async fn load_project(State(state): State<Arc<AppState>>) -> ApiResult<StatusCode> {
    let path = state.config.project.path.clone();
    let text = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| ApiError::NotFound(format!("Failed to read {:?}: {}", path, e)))?;
    state.engine.lock().import_project(&text)?;
    info!("Loaded project from {:?}", path);
    Ok(StatusCode::OK)
}

#[derive(Serialize)]
struct HistoryResponse {
    changed: bool,
}

async fn undo(State(state): State<Arc<AppState>>) -> Json<HistoryResponse> {
    Json(HistoryResponse {
        changed: state.engine.lock().undo(),
    })
}

async fn redo(State(state): State<Arc<AppState>>) -> Json<HistoryResponse> {
    Json(HistoryResponse {
        changed: state.engine.lock().redo(),
    })
}

#[derive(Serialize)]
struct SnowResponse {
    enabled: bool,
}

async fn toggle_snow(State(state): State<Arc<AppState>>) -> Json<SnowResponse> {
    Json(SnowResponse {
        enabled: state.engine.lock().toggle_snow(),
    })
}

#[derive(Serialize)]
struct PointerResponse {
    /// Whether the event grabbed, moved or released a handle
    handled: bool,
}

async fn pointer(
    State(state): State<Arc<AppState>>,
    Path(phase): Path<String>,
    Json(pos): Json<Point>,
) -> ApiResult<Json<PointerResponse>> {
    let phase = PointerPhase::parse(&phase)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown pointer phase: {}", phase)))?;
    let handled = state.engine.lock().pointer(phase, pos, Instant::now());
    Ok(Json(PointerResponse { handled }))
}

#[derive(Deserialize)]
struct KeyRequest {
    key: String,
    /// Ctrl or Cmd held
    #[serde(default)]
    ctrl: bool,
    /// Coarse step modifier, redo with Ctrl+Z
    #[serde(default)]
    shift: bool,
}

#[derive(Serialize)]
struct KeyResponse {
    handled: bool,
}

async fn key(State(state): State<Arc<AppState>>, Json(req): Json<KeyRequest>) -> ApiResult<Json<KeyResponse>> {
    let command = KeyCommand::from_key(&req.key, req.ctrl, req.shift)
        .ok_or_else(|| ApiError::BadRequest(format!("unsupported key: {}", req.key)))?;
    let handled = state.engine.lock().key(command, Instant::now())?;
    Ok(Json(KeyResponse { handled }))
}

#[derive(Deserialize)]
struct CornerRequest {
    corner: Option<usize>,
}

async fn select_corner(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CornerRequest>,
) -> ApiResult<StatusCode> {
    state.engine.lock().select_corner(req.corner)?;
    Ok(StatusCode::OK)
}

async fn set_viewport(
    State(state): State<Arc<AppState>>,
    Json(viewport): Json<Viewport>,
) -> ApiResult<StatusCode> {
    if !(viewport.width > 0.0 && viewport.height > 0.0 && viewport.device_pixel_ratio > 0.0) {
        return Err(ApiError::BadRequest("viewport dimensions must be positive".into()));
    }
    state.engine.lock().set_viewport(viewport);
    Ok(StatusCode::OK)
}

/// Get current output frame (JPEG)
async fn get_preview(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let frame = state.get_preview();
    if frame.is_empty() {
        return (StatusCode::SERVICE_UNAVAILABLE, "No frame available").into_response();
    }

    ([(header::CONTENT_TYPE, "image/jpeg")], frame).into_response()
}

/// Time between MJPEG parts; never zero, which `tokio::time::interval` rejects
fn stream_period(fps: u32) -> Duration {
    Duration::from_millis((1000 / fps.max(1) as u64).max(1))
}

/// MJPEG stream of the rendered output, for the projector display
async fn preview_stream(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    use axum::body::Body;
    use tokio_stream::StreamExt;

    let period = stream_period(state.config.output.fps);
    let stream = tokio_stream::wrappers::IntervalStream::new(tokio::time::interval(period))
    .map(move |_| {
        let frame = state.get_preview();
        if frame.is_empty() {
            return Ok::<_, std::convert::Infallible>(
                "--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_string().into_bytes(),
            );
        }

        let mut response = Vec::new();
        response.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: ");
        response.extend_from_slice(frame.len().to_string().as_bytes());
        response.extend_from_slice(b"\r\n\r\n");
        response.extend_from_slice(&frame);
        response.extend_from_slice(b"\r\n");

        Ok(response)
    });

    let body = Body::from_stream(stream);

    (
        [(
            header::CONTENT_TYPE,
            "multipart/x-mixed-replace; boundary=frame",
        )],
        body,
    )
}

/// System information response
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    width: u32,
    height: u32,
    fps: u32,
    surfaces: usize,
    frames_rendered: u64,
    presets: &'static [&'static str],
    shapes: &'static [&'static str],
}

async fn get_info(State(state): State<Arc<AppState>>) -> Json<InfoResponse> {
    let engine = state.engine.lock();
    let (width, height) = engine.state().viewport().framebuffer_size();
    let info = engine.info();

    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        width,
        height,
        fps: state.config.output.fps,
        surfaces: engine.state().len(),
        frames_rendered: info.render.frames,
        presets: QUAD_PRESETS,
        shapes: SHAPE_PRESETS,
    })
}
