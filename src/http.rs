//! HTTP ingestion and query server.
//!
//! Routes:
//!
//! | Method | Path | Operation |
//! |--------|------|-----------|
//! | `POST` | `/api/tracking` | Append (create if absent) |
//! | `PUT` | `/api/tracking` | Sync (merge) |
//! | `GET` | `/api/tracking?userId=..&date=YYYY-MM-DD` | Sessions of one owner for one local day |
//! | `GET` | `/api/tracking/{id}` | Session lookup |
//! | `GET` | `/api/tracking/{id}/gpx` | GPX download |
//! | `GET` | `/api/tracking/{id}/analysis` | Rendered path, stops and event summary |
//! | `GET` | `/health` | Liveness |
//!
//! Routing lives in the synchronous [`TrackingApi::dispatch`]; the hyper
//! service only collects the body and runs `dispatch` on the blocking pool,
//! since every store call is blocking I/O.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{FixedOffset, NaiveDate, Utc};
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_DISPOSITION, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use log::{debug, error, info, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::analysis::analyze_session;
use crate::config::{AnalysisConfig, Config};
use crate::error::TrackingError;
use crate::gpx::{export_gpx, gpx_file_name};
use crate::query::{find_session, sessions_for_local_date};
use crate::store::SessionStore;
use crate::sync::{AppendRequest, SessionSync, SyncRequest};
use crate::{DrivingEvent, LocationSample, TrackingSession};

/// Request bodies above this size are rejected.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

const JSON: &str = "application/json";
const GPX: &str = "application/gpx+xml";
const TEXT: &str = "text/plain; charset=utf-8";

// ============================================================================
// Responses
// ============================================================================

/// Transport-independent response produced by [`TrackingApi::dispatch`].
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub body: Bytes,
    /// File name for `Content-Disposition: attachment`
    pub attachment: Option<String>,
}

impl ApiResponse {
    fn json(status: StatusCode, value: Value) -> Self {
        Self {
            status,
            content_type: JSON,
            body: Bytes::from(value.to_string()),
            attachment: None,
        }
    }

    fn error(status: StatusCode, message: &str) -> Self {
        Self::json(status, json!({ "error": message }))
    }

    fn text(status: StatusCode, body: &'static str) -> Self {
        Self {
            status,
            content_type: TEXT,
            body: Bytes::from_static(body.as_bytes()),
            attachment: None,
        }
    }

    /// Body parsed as JSON, for tests and callers embedding the API.
    pub fn json_body(&self) -> Result<Value, TrackingError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Map a failed operation to its HTTP shape. `server_message` is what the
/// client sees for server-side failures; details only go to the log.
fn error_response(err: &TrackingError, server_message: &str) -> ApiResponse {
    if err.is_client_error() {
        debug!("[HttpServer] Rejected request: {}", err);
    }
    match err {
        TrackingError::InvalidInput(detail) => ApiResponse::json(
            StatusCode::BAD_REQUEST,
            json!({ "error": "Datos incompletos", "detail": detail }),
        ),
        TrackingError::Json(e) => ApiResponse::json(
            StatusCode::BAD_REQUEST,
            json!({ "error": "Datos incompletos", "detail": e.to_string() }),
        ),
        TrackingError::NotFound(_) => ApiResponse::error(StatusCode::NOT_FOUND, "Ruta no encontrada"),
        _ => {
            error!("[HttpServer] {}: {}", server_message, err);
            ApiResponse::error(StatusCode::INTERNAL_SERVER_ERROR, server_message)
        }
    }
}

// ============================================================================
// Wire payloads
// ============================================================================

/// Body of `POST` and `PUT /api/tracking`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackingPayload {
    #[serde(default, alias = "ownerId")]
    user_id: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    points: Option<Value>,
    #[serde(default)]
    events: Option<Value>,
    #[serde(default, alias = "totalDistanceHint")]
    total_distance: Option<f64>,
}

struct Batch {
    owner_id: String,
    session_id: String,
    points: Vec<LocationSample>,
    events: Vec<DrivingEvent>,
    total_distance_hint: Option<f64>,
}

fn parse_batch(body: &[u8]) -> Result<Batch, TrackingError> {
    let payload: TrackingPayload = serde_json::from_slice(body)?;

    let owner_id = payload.user_id.filter(|s| !s.is_empty());
    let session_id = payload.session_id.filter(|s| !s.is_empty());
    let points = payload.points.filter(Value::is_array);

    let (Some(owner_id), Some(session_id), Some(points)) = (owner_id, session_id, points) else {
        return Err(TrackingError::InvalidInput(
            "userId, sessionId and points[] are required".to_string(),
        ));
    };

    let points: Vec<LocationSample> = serde_json::from_value(points)
        .map_err(|e| TrackingError::InvalidInput(format!("invalid point: {}", e)))?;

    let events: Vec<DrivingEvent> = match payload.events {
        None | Some(Value::Null) => Vec::new(),
        Some(events @ Value::Array(_)) => serde_json::from_value(events)
            .map_err(|e| TrackingError::InvalidInput(format!("invalid event: {}", e)))?,
        Some(_) => return Err(TrackingError::InvalidInput("events must be an array".to_string())),
    };

    Ok(Batch {
        owner_id,
        session_id,
        points,
        events,
        total_distance_hint: payload.total_distance,
    })
}

/// Session record as served to clients: the stored shape plus its document id.
fn session_json(session: &TrackingSession) -> Result<Value, TrackingError> {
    let mut value = serde_json::to_value(session)?;
    if let Value::Object(map) = &mut value {
        map.insert("id".to_string(), Value::String(session.session_id.clone()));
    }
    Ok(value)
}

/// Query string of `GET /api/tracking`, percent-decoded.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    owner_id: Option<String>,
    #[serde(default)]
    date: Option<String>,
}

impl ListQuery {
    fn parse(query: Option<&str>) -> Result<Self, TrackingError> {
        match query {
            Some(raw) => serde_urlencoded::from_str(raw)
                .map_err(|e| TrackingError::InvalidInput(format!("invalid query string: {}", e))),
            None => Ok(Self::default()),
        }
    }

    fn owner(&self) -> Option<&str> {
        non_empty(&self.user_id).or_else(|| non_empty(&self.owner_id))
    }

    fn date(&self) -> Option<&str> {
        non_empty(&self.date)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

// ============================================================================
// API
// ============================================================================

/// The tracking API over one store.
pub struct TrackingApi<S: SessionStore> {
    sync: SessionSync<S>,
    analysis: AnalysisConfig,
    utc_offset: FixedOffset,
}

impl<S: SessionStore> TrackingApi<S> {
    pub fn new(store: S, config: &Config) -> Result<Self, TrackingError> {
        Ok(Self {
            sync: SessionSync::new(store),
            analysis: config.analysis.clone(),
            utc_offset: config.tracking.utc_offset()?,
        })
    }

    pub fn sync(&self) -> &SessionSync<S> {
        &self.sync
    }

    /// Route one request. Never fails: every error becomes a response.
    pub fn dispatch(&self, method: &Method, path: &str, query: Option<&str>, body: &[u8]) -> ApiResponse {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

        match (method, segments.as_slice()) {
            (&Method::GET, ["health"]) => ApiResponse::text(StatusCode::OK, "ok"),
            (&Method::POST, ["api", "tracking"]) => self
                .append(body)
                .unwrap_or_else(|e| error_response(&e, "Error al guardar tracking")),
            (&Method::PUT, ["api", "tracking"]) => self
                .merge(body)
                .unwrap_or_else(|e| error_response(&e, "Error al sincronizar tracking")),
            (&Method::GET, ["api", "tracking"]) => self
                .list(query)
                .unwrap_or_else(|e| error_response(&e, "Error al obtener datos de tracking")),
            (&Method::GET, ["api", "tracking", id]) => self
                .lookup(id)
                .unwrap_or_else(|e| error_response(&e, "Error al obtener la ruta")),
            (&Method::GET, ["api", "tracking", id, "gpx"]) => self
                .gpx(id)
                .unwrap_or_else(|e| error_response(&e, "Error al exportar GPX")),
            (&Method::GET, ["api", "tracking", id, "analysis"]) => self
                .analysis(id)
                .unwrap_or_else(|e| error_response(&e, "Error al analizar la ruta")),
            _ => ApiResponse::text(StatusCode::NOT_FOUND, "Not Found"),
        }
    }

    fn append(&self, body: &[u8]) -> Result<ApiResponse, TrackingError> {
        let batch = parse_batch(body)?;
        let outcome = self.sync.append(AppendRequest {
            session_id: batch.session_id,
            owner_id: batch.owner_id,
            points: batch.points,
            total_distance_hint: batch.total_distance_hint,
        })?;

        Ok(ApiResponse::json(
            StatusCode::OK,
            json!({
                "success": true,
                "created": outcome.created,
                "docId": outcome.session.session_id,
                "totalPoints": outcome.session.points.len(),
            }),
        ))
    }

    fn merge(&self, body: &[u8]) -> Result<ApiResponse, TrackingError> {
        let batch = parse_batch(body)?;
        let outcome = self.sync.merge_incoming_points(SyncRequest::new(
            batch.session_id,
            batch.owner_id,
            batch.points,
            batch.events,
        ))?;

        Ok(ApiResponse::json(
            StatusCode::OK,
            json!({
                "success": true,
                "docId": outcome.session.session_id,
                "totalPoints": outcome.total_points,
                "addedPoints": outcome.added_points,
            }),
        ))
    }

    fn list(&self, query: Option<&str>) -> Result<ApiResponse, TrackingError> {
        let query = ListQuery::parse(query)?;
        let Some(owner_id) = query.owner() else {
            return Ok(ApiResponse::error(StatusCode::BAD_REQUEST, "userId es requerido"));
        };

        let date = match query.date() {
            Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|_| TrackingError::InvalidInput(format!("invalid date: {}", raw)))?,
            None => Utc::now().with_timezone(&self.utc_offset).date_naive(),
        };

        let sessions = sessions_for_local_date(self.sync.store(), owner_id, date, self.utc_offset)?;
        let data = sessions.iter().map(session_json).collect::<Result<Vec<_>, _>>()?;

        Ok(ApiResponse::json(
            StatusCode::OK,
            json!({ "success": true, "count": data.len(), "data": data }),
        ))
    }

    fn lookup(&self, id: &str) -> Result<ApiResponse, TrackingError> {
        let session = find_session(self.sync.store(), id)?;
        Ok(ApiResponse::json(
            StatusCode::OK,
            json!({ "success": true, "data": session_json(&session)? }),
        ))
    }

    fn gpx(&self, id: &str) -> Result<ApiResponse, TrackingError> {
        let session = find_session(self.sync.store(), id)?;
        let xml = export_gpx(&session, Utc::now())?;
        let local_day = session.start_time.with_timezone(&self.utc_offset).date_naive();

        Ok(ApiResponse {
            status: StatusCode::OK,
            content_type: GPX,
            body: Bytes::from(xml),
            attachment: Some(gpx_file_name(&session, local_day)),
        })
    }

    fn analysis(&self, id: &str) -> Result<ApiResponse, TrackingError> {
        let session = find_session(self.sync.store(), id)?;
        let analysis = analyze_session(&session, &self.analysis);
        Ok(ApiResponse::json(
            StatusCode::OK,
            json!({ "success": true, "data": analysis }),
        ))
    }
}

// ============================================================================
// hyper glue
// ============================================================================

fn into_hyper(response: ApiResponse) -> Response<Full<Bytes>> {
    let mut out = Response::new(Full::new(response.body));
    *out.status_mut() = response.status;

    let headers = out.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(response.content_type));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    if let Some(name) = response.attachment {
        match HeaderValue::from_str(&format!("attachment; filename=\"{}\"", name)) {
            Ok(value) => {
                headers.insert(CONTENT_DISPOSITION, value);
            }
            Err(e) => warn!("[HttpServer] Bad attachment name {:?}: {}", name, e),
        }
    }
    out
}

async fn handle_request<S: SessionStore + 'static>(
    req: Request<Incoming>,
    api: Arc<TrackingApi<S>>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);

    let body = match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("[HttpServer] {} {}: unreadable body: {}", method, path, e);
            return Ok(into_hyper(ApiResponse::error(
                StatusCode::PAYLOAD_TOO_LARGE,
                "Cuerpo de la solicitud demasiado grande",
            )));
        }
    };

    debug!("[HttpServer] {} {} ({} bytes)", method, path, body.len());

    let response = match tokio::task::spawn_blocking(move || {
        api.dispatch(&method, &path, query.as_deref(), &body)
    })
    .await
    {
        Ok(response) => response,
        Err(e) => {
            error!("[HttpServer] Handler task failed: {}", e);
            ApiResponse::error(StatusCode::INTERNAL_SERVER_ERROR, "Error interno")
        }
    };

    Ok(into_hyper(response))
}

/// Bind `addr` and serve until `shutdown` flips to `true`.
pub async fn start_server<S: SessionStore + 'static>(
    addr: SocketAddr,
    api: Arc<TrackingApi<S>>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), TrackingError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| TrackingError::Server(format!("bind {}: {}", addr, e)))?;
    serve(listener, api, shutdown).await
}

/// Accept loop over an already-bound listener.
pub async fn serve<S: SessionStore + 'static>(
    listener: TcpListener,
    api: Arc<TrackingApi<S>>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), TrackingError> {
    if let Ok(addr) = listener.local_addr() {
        info!("[HttpServer] Listening on {}", addr);
    }

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        let io = TokioIo::new(stream);
                        let api = Arc::clone(&api);

                        tokio::spawn(async move {
                            let service = service_fn(move |req| handle_request(req, Arc::clone(&api)));
                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                debug!("[HttpServer] Connection from {} closed: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("[HttpServer] Accept failed: {}", e);
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("[HttpServer] Shutting down");
                    return Ok(());
                }
            }
        }
    }
}
