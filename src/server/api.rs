use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{stream, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::registry::{Broadcast, ClientKind, ClientRegistry};
use crate::error::{ErrorCategory, Result, SyncError};
use crate::state::{admit, next_stamp, now_millis, Admission, StateDocument};
use crate::storage::StateStore;
use crate::sync::protocol::{SocketMessage, STATE_EVENT};

/// Origin recorded for writes that arrive over plain HTTP.
const HTTP_ORIGIN: &str = "http";
/// Client id used on snapshots the endpoint sends on its own behalf.
const SERVER_ORIGIN: &str = "server";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StateStore>,
    pub registry: Arc<ClientRegistry>,
    pub environment: String,
    // Serializes read-compare-write across every admission path.
    admission: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(store: Arc<dyn StateStore>, environment: impl Into<String>) -> Self {
        Self {
            store,
            registry: Arc::new(ClientRegistry::new()),
            environment: environment.into(),
            admission: Arc::new(Mutex::new(())),
        }
    }
}

/// All endpoint routes, nested under `base_path` when it is non-empty.
pub fn router(state: AppState, base_path: &str) -> Router {
    let routes = Router::new()
        .route("/", get(|| async { "Signal Sync Endpoint" }))
        .route("/state", get(get_state).post(post_state))
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .route("/events", get(events_handler));

    let base = base_path.trim_end_matches('/');
    let app = if base.is_empty() {
        routes
    } else if base.starts_with('/') {
        Router::new().nest(base, routes)
    } else {
        Router::new().nest(&format!("/{base}"), routes)
    };

    app.layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Apply the admission rule to `candidate` against the persisted document.
///
/// An admitted candidate is re-stamped with the endpoint's receipt time
/// (never below the stored or submitted stamp), persisted and broadcast.
/// Returns the authoritative document either way.
pub async fn admit_candidate(
    state: &AppState,
    candidate: StateDocument,
    origin: &str,
) -> Result<(Admission, StateDocument)> {
    let _serial = state.admission.lock().await;

    let stored = state.store.get_state().await?;
    let floor = match stored {
        Some(current) if !admit(&candidate, Some(&current)).is_accepted() => {
            tracing::debug!(
                %origin,
                candidate = candidate.last_updated,
                stored = current.last_updated,
                "stale write ignored"
            );
            return Ok((Admission::Stale, current));
        }
        Some(current) => current.last_updated,
        None => i64::MIN,
    };

    let mut winner = candidate;
    winner.last_updated = next_stamp(floor, now_millis().max(winner.last_updated));
    let saved = state.store.save_state(&winner).await?;

    tracing::info!(
        %origin,
        last_updated = saved.last_updated,
        mode = ?saved.control_mode,
        "accepted write"
    );
    state.registry.broadcast(Broadcast {
        state: saved.clone(),
        origin: origin.to_string(),
    });
    Ok((Admission::Accepted, saved))
}

fn error_response(err: SyncError) -> Response {
    let status = match err.category() {
        ErrorCategory::MalformedInput => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!("request failed: {err}");
    }
    (
        status,
        Json(json!({ "success": false, "error": err.to_string() })),
    )
        .into_response()
}

async fn get_state(State(state): State<AppState>) -> Response {
    match state.store.get_state().await {
        Ok(Some(doc)) => Json(doc).into_response(),
        Ok(None) => Json(json!({})).into_response(),
        Err(err) => error_response(err),
    }
}

/// Only a JSON object that is a complete document is a candidate.
fn parse_candidate(body: &[u8]) -> Result<StateDocument> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| SyncError::MalformedInput(format!("body is not JSON: {e}")))?;
    let Some(object) = value.as_object() else {
        return Err(SyncError::MalformedInput(
            "state must be a JSON object".into(),
        ));
    };

    let missing: Vec<&str> = StateDocument::FIELDS
        .into_iter()
        .filter(|field| !object.contains_key(*field))
        .collect();
    if !missing.is_empty() {
        return Err(SyncError::MalformedInput(format!(
            "writes replace the whole document; missing fields: {}",
            missing.join(", ")
        )));
    }

    serde_json::from_value(value)
        .map_err(|e| SyncError::MalformedInput(format!("not a state document: {e}")))
}

async fn post_state(State(state): State<AppState>, body: Bytes) -> Response {
    let candidate = match parse_candidate(&body) {
        Ok(candidate) => candidate,
        Err(err) => {
            tracing::warn!("rejected write: {err}");
            return error_response(err);
        }
    };

    match admit_candidate(&state, candidate, HTTP_ORIGIN).await {
        Ok((_, authoritative)) => {
            Json(json!({ "success": true, "state": authoritative })).into_response()
        }
        Err(err) => error_response(err),
    }
}

async fn health(State(state): State<AppState>) -> Response {
    match state.store.get_state().await {
        Ok(_) => Json(json!({
            "status": "ok",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "environment": state.environment,
            "version": crate::VERSION,
            "clients": state.registry.len(),
        }))
        .into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "status": "error", "message": err.to_string() })),
        )
            .into_response(),
    }
}

async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(state, socket))
}

fn socket_frame(doc: StateDocument, origin: &str) -> Option<Message> {
    match SocketMessage::state_update(doc, origin).to_json() {
        Ok(text) => Some(Message::Text(text.into())),
        Err(err) => {
            tracing::error!("failed to encode state_update: {err}");
            None
        }
    }
}

async fn handle_ws(state: AppState, socket: WebSocket) {
    let (key, mut updates) = state.registry.register("anonymous", ClientKind::Socket);
    let (mut sender, mut receiver) = socket.split();
    let (direct_tx, mut direct_rx) = mpsc::unbounded_channel::<Message>();

    // Registry broadcasts and replies addressed to this client only
    let send_task = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                update = updates.recv() => match update {
                    Some(update) => socket_frame(update.state.clone(), &update.origin),
                    None => break,
                },
                direct = direct_rx.recv() => match direct {
                    Some(frame) => Some(frame),
                    None => break,
                },
            };
            if let Some(frame) = frame {
                if sender.send(frame).await.is_err() {
                    break;
                }
            }
        }
    });

    let state_recv = state.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    let text: String = text.to_string();
                    match serde_json::from_str::<SocketMessage>(&text) {
                        Ok(SocketMessage::Identify { client_id }) => {
                            state_recv.registry.identify(&key, &client_id);
                            tracing::info!(%client_id, "socket client identified");
                            match state_recv.store.get_state().await {
                                Ok(Some(doc)) => {
                                    if let Some(frame) = socket_frame(doc, SERVER_ORIGIN) {
                                        let _ = direct_tx.send(frame);
                                    }
                                }
                                Ok(None) => {}
                                Err(err) => tracing::warn!("snapshot for {client_id} failed: {err}"),
                            }
                        }
                        Ok(SocketMessage::StateUpdate { state: candidate, client_id }) => {
                            match admit_candidate(&state_recv, candidate, &client_id).await {
                                Ok((Admission::Stale, current)) => {
                                    // Let the sender resynchronize
                                    if let Some(frame) = socket_frame(current, SERVER_ORIGIN) {
                                        let _ = direct_tx.send(frame);
                                    }
                                }
                                Ok((Admission::Accepted, _)) => {}
                                Err(err) => tracing::warn!(%client_id, "socket write failed: {err}"),
                            }
                        }
                        Err(err) => tracing::debug!("ignoring unparseable socket message: {err}"),
                    }
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    let _ = recv_task.await;
    state.registry.unregister(&key);
    let _ = send_task.await;
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    #[serde(rename = "clientId")]
    client_id: Option<String>,
}

/// Unregisters the stream client when axum drops the response stream.
struct RegistrationGuard {
    registry: Arc<ClientRegistry>,
    key: Uuid,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.unregister(&self.key);
    }
}

fn state_event(doc: &StateDocument) -> Option<Event> {
    match Event::default().event(STATE_EVENT).json_data(doc) {
        Ok(event) => Some(event),
        Err(err) => {
            tracing::error!("failed to encode state event: {err}");
            None
        }
    }
}

async fn events_handler(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let client_id = query.client_id.unwrap_or_else(|| {
        let id = Uuid::new_v4().simple().to_string();
        format!("anonymous-{}", &id[..8])
    });

    let (key, updates) = state.registry.register(client_id.clone(), ClientKind::Stream);
    let guard = RegistrationGuard {
        registry: state.registry.clone(),
        key,
    };

    let snapshot = match state.store.get_state().await {
        Ok(doc) => doc,
        Err(err) => {
            tracing::warn!(%client_id, "initial snapshot failed: {err}");
            None
        }
    };
    let initial = stream::iter(snapshot.as_ref().and_then(state_event).map(Ok::<_, Infallible>));

    let live = UnboundedReceiverStream::new(updates).filter_map(move |update| {
        let _registered = &guard;
        futures::future::ready(state_event(&update.state).map(Ok::<_, Infallible>))
    });

    Sse::new(initial.chain(live)).keep_alive(KeepAlive::default())
}
