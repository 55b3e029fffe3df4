use axum::{
    debug_handler,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::{debug, info, trace};
use serde::{Deserialize, Serialize};
use shorewatch_core::{BoundarySummary, LocationError, LocationEvent, PositionFix};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use thiserror::Error;
use tokio::{net::TcpListener, sync::broadcast};
use tokio_graceful_shutdown::SubsystemHandle;
use tower_http::services::ServeDir;

use crate::{config, sources::ChannelSourceHandle, AlertFrame, ServerError, Session};

const STATUS_URI: &str = "/api/v1/status";
const CONFIG_URI: &str = "/api/v1/config";
const BOUNDARIES_URI: &str = "/api/v1/boundaries";
const BOUNDARIES_RELOAD_URI: &str = "/api/v1/boundaries/reload";
const POSITION_URI: &str = "/api/v1/position";
const ALERTS_URI: &str = "/api/v1/alerts";

#[derive(Error, Debug)]
pub enum WebError {
    #[error("Socket operation failed")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match self {
            ServerError::ReadFile { .. } | ServerError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNPROCESSABLE_ENTITY,
        };
        (status, self.to_string()).into_response()
    }
}

#[derive(Clone)]
pub struct Web {
    session: Session,
    /// Present when positions are pushed over HTTP
    position_input: Option<ChannelSourceHandle>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Web {
    pub fn new(session: Session, position_input: Option<ChannelSourceHandle>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Web {
            session,
            position_input,
            shutdown_tx,
        }
    }

    pub fn router(self) -> Router {
        let web_root = self.session.read().unwrap().args.web_root.clone();
        let app = Router::new()
            .route(STATUS_URI, get(get_status))
            .route(CONFIG_URI, get(get_config))
            .route(BOUNDARIES_URI, get(get_boundaries))
            .route(BOUNDARIES_RELOAD_URI, post(reload_boundaries))
            .route(POSITION_URI, post(post_position))
            .route(ALERTS_URI, get(alerts_handler))
            .layer(middleware::from_fn(no_cache_middleware));

        // Static alert page (plays the siren, shows notifications and flashes)
        let app = match web_root {
            Some(dir) => {
                info!("Serving static files from {}", dir.display());
                app.fallback_service(ServeDir::new(dir))
            }
            None => app,
        };
        app.with_state(self)
    }

    pub async fn run(self, subsys: SubsystemHandle) -> Result<(), WebError> {
        let port = self.session.read().unwrap().args.port;
        let listener =
            TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port)).await?;

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let shutdown_tx = self.shutdown_tx.clone();
        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();

        info!("Starting HTTP web server on port {}", port);

        tokio::select! { biased;
            _ = subsys.on_shutdown_requested() => {
                let _ = shutdown_tx.send(());
            },
            r = axum::serve(listener, app)
                    .with_graceful_shutdown(
                        async move {
                            _ = shutdown_rx.recv().await;
                        }
                    ) => {
                return r.map_err(WebError::Io);
            }
        }
        Ok(())
    }
}

/// Status and verdicts change with every fix
async fn no_cache_middleware(request: axum::http::Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    response
}

#[debug_handler]
async fn get_status(State(state): State<Web>) -> Response {
    Json(state.session.status()).into_response()
}

#[debug_handler]
async fn get_config(State(state): State<Web>) -> Response {
    Json(state.session.config()).into_response()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BoundaryListResponse {
    boundaries: Vec<BoundarySummary>,
    land_polygons: usize,
}

#[debug_handler]
async fn get_boundaries(State(state): State<Web>) -> Response {
    let set = state.session.boundaries();
    Json(BoundaryListResponse {
        boundaries: set.summaries(),
        land_polygons: set.land().len(),
    })
    .into_response()
}

/// POST /api/v1/boundaries/reload - Re-read the boundary files and swap them in
#[debug_handler]
async fn reload_boundaries(State(state): State<Web>) -> Response {
    let args = state.session.args();
    let loaded = tokio::task::spawn_blocking(move || config::load_boundaries_for(&args)).await;
    match loaded {
        Ok(Ok(set)) => {
            info!("Reloaded {} boundaries", set.len());
            state.session.replace_boundaries(set.into_shared());
            get_boundaries(State(state)).await
        }
        // Keep the boundaries we have
        Ok(Err(e)) => e.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Body of `POST /api/v1/position`: either a fix or a location error
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PositionReport {
    lat: Option<f64>,
    lng: Option<f64>,
    #[serde(default)]
    accuracy_m: f64,
    timestamp_ms: Option<u64>,
    error: Option<LocationError>,
}

impl PositionReport {
    fn into_event(self) -> Option<LocationEvent> {
        if let Some(error) = self.error {
            return Some(LocationEvent::Error(error));
        }
        let timestamp_ms = self
            .timestamp_ms
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis().max(0) as u64);
        Some(LocationEvent::Fix(PositionFix::new(
            self.lat?,
            self.lng?,
            self.accuracy_m,
            timestamp_ms,
        )))
    }
}

/// POST /api/v1/position - Push a position into the http source
#[debug_handler]
async fn post_position(
    State(state): State<Web>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(report): Json<PositionReport>,
) -> Response {
    trace!("Position from {}: {:?}", addr, report);

    let Some(input) = &state.position_input else {
        return (StatusCode::CONFLICT, "Positions come from another source").into_response();
    };
    let Some(event) = report.into_event() else {
        return (StatusCode::BAD_REQUEST, "Need lat and lng, or error").into_response();
    };
    if input.push(event) {
        StatusCode::ACCEPTED.into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Monitor is not running").into_response()
    }
}

#[debug_handler]
async fn alerts_handler(
    State(state): State<Web>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    debug!("alerts stream request from {}", addr);

    let shutdown_rx = state.shutdown_tx.subscribe();
    let frame_rx = state.session.subscribe_frames();
    ws.on_upgrade(move |socket| alerts_stream(socket, frame_rx, shutdown_rx))
}

/// Forward alert frames as JSON text messages (one task per connection)
async fn alerts_stream(
    mut socket: WebSocket,
    mut frame_rx: broadcast::Receiver<AlertFrame>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Shutdown of websocket");
                break;
            },
            r = frame_rx.recv() => {
                match r {
                    Ok(frame) => {
                        let json = match serde_json::to_string(&frame) {
                            Ok(json) => json,
                            Err(e) => {
                                log::warn!("Cannot serialize alert frame: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = socket.send(Message::Text(json.into())).await {
                            debug!("Error on send to websocket: {}", e);
                            break;
                        }
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("Websocket receiver lagged, skipped {} frames", n);
                    },
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Alert channel closed");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::ChannelSource;
    use shorewatch_core::{
        BoundarySet, Classification, GeoPoint, LocationSource, MonitorConfig, Polygon,
    };
    use std::sync::{Arc, Mutex};

    fn session() -> Session {
        let square = Polygon::new(
            "home",
            "Home waters",
            vec![
                GeoPoint::new(0.0, 0.0),
                GeoPoint::new(0.0, 1.0),
                GeoPoint::new(1.0, 1.0),
                GeoPoint::new(1.0, 0.0),
            ],
            Classification::Safe,
        )
        .unwrap();
        Session::new_fake(MonitorConfig::default(), BoundarySet::new(vec![square], vec![]))
    }

    fn addr() -> ConnectInfo<SocketAddr> {
        ConnectInfo(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 40000))
    }

    fn report(json: &str) -> Json<PositionReport> {
        Json(serde_json::from_str(json).unwrap())
    }

    #[tokio::test]
    async fn test_post_position_without_http_source() {
        let web = Web::new(session(), None);
        let response = post_position(State(web), addr(), report(r#"{"lat": 1.0, "lng": 2.0}"#)).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_post_position_delivers_to_subscriber() {
        let (mut source, handle) = ChannelSource::new();
        let web = Web::new(session(), Some(handle));

        let response = post_position(State(web.clone()), addr(), report(r#"{"lat": 1.0, "lng": 2.0}"#)).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let _subscription = source.subscribe(Box::new(move |e| sink.lock().unwrap().push(e)));

        let response = post_position(
            State(web.clone()),
            addr(),
            report(r#"{"lat": 1.0, "lng": 2.0, "accuracyM": 4, "timestampMs": 99}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let response = post_position(State(web.clone()), addr(), report(r#"{"error": "timeout"}"#)).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let response = post_position(State(web), addr(), report(r#"{"lat": 1.0}"#)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let events = events.lock().unwrap();
        assert_eq!(
            events.as_slice(),
            &[
                LocationEvent::Fix(PositionFix::new(1.0, 2.0, 4.0, 99)),
                LocationEvent::Error(LocationError::Timeout)
            ]
        );
    }

    #[tokio::test]
    async fn test_reload_keeps_boundaries_on_error() {
        let session = session();
        let web = Web::new(session.clone(), None);
        // new_fake points at a file that does not exist
        let response = reload_boundaries(State(web)).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(session.boundaries().len(), 1);
    }

    #[tokio::test]
    async fn test_get_status_and_boundaries() {
        let web = Web::new(session(), None);
        assert_eq!(get_status(State(web.clone())).await.status(), StatusCode::OK);
        assert_eq!(get_boundaries(State(web.clone())).await.status(), StatusCode::OK);
        assert_eq!(get_config(State(web)).await.status(), StatusCode::OK);
    }
}
