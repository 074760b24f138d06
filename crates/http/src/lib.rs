//! axum transport adapter for Durable Streams.
//!
//! Grounded on the teacher's `create_router`/`handle_create`/`handle_read`/
//! `handle_append`/`handle_delete`/`handle_sse` in
//! `crates/stream/src/server.rs`: the same wildcard-path routing, the same
//! `CorsLayer::new().allow_origin(Any)...` policy, the same shape of
//! `Response::builder()` calls. What changed is that every handler body now
//! only translates axum's request/response types to and from
//! `durable_streams_core::pipeline`'s neutral [`ServerRequest`]/
//! [`ServerResponse`] pair — none of the protocol logic the teacher wrote
//! inline in `handle_*` lives here anymore.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, head, post, put};
use axum::Router;
use durable_streams_core::live::Frame;
use durable_streams_core::pipeline::{Method, ResponseBody, ServerRequest, ServerResponse};
use durable_streams_core::store::Store;
use durable_streams_core::Pipeline;
use futures::stream::StreamExt;
use tower_http::cors::{Any, CorsLayer};
use tracing::debug;

/// Shared application state. Cheap to clone: a single `Arc` around the
/// pipeline, matching the teacher's `AppState { store: Arc<StreamStore>,
/// options: ServerOptions }`.
pub struct AppState<S: Store> {
    pipeline: Arc<Pipeline<S>>,
}

impl<S: Store> Clone for AppState<S> {
    fn clone(&self) -> Self {
        AppState {
            pipeline: self.pipeline.clone(),
        }
    }
}

/// Build the router: one wildcard path, one handler per verb, CORS layer
/// wide open (the protocol is meant to be fetched cross-origin), exactly
/// as the grounding teacher's `create_router`.
pub fn create_router<S: Store>(pipeline: Arc<Pipeline<S>>) -> Router {
    let state = AppState { pipeline };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
            axum::http::Method::HEAD,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers(Any)
        .expose_headers(Any);

    Router::new()
        .route("/{*path}", put(handle::<S>))
        .route("/{*path}", head(handle::<S>))
        .route("/{*path}", get(handle::<S>))
        .route("/{*path}", post(handle::<S>))
        .route("/{*path}", delete(handle::<S>))
        .layer(cors)
        .with_state(state)
}

async fn handle<S: Store>(
    State(state): State<AppState<S>>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
    method: axum::http::Method,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let Some(method) = map_method(&method) else {
        return (StatusCode::METHOD_NOT_ALLOWED, [("Cache-Control", "no-store")]).into_response();
    };

    let body_bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes.to_vec(),
        Err(_) => return (StatusCode::BAD_REQUEST, "failed to read request body").into_response(),
    };

    let req = ServerRequest {
        method,
        path: format!("/{path}"),
        query: query.unwrap_or_default(),
        headers: headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect(),
        body: body_bytes,
    };

    debug!(path = %req.path, method = ?req.method, "dispatching request");
    to_axum_response(state.pipeline.handle(req).await)
}

fn map_method(method: &axum::http::Method) -> Option<Method> {
    match *method {
        axum::http::Method::PUT => Some(Method::Put),
        axum::http::Method::POST => Some(Method::Post),
        axum::http::Method::HEAD => Some(Method::Head),
        axum::http::Method::GET => Some(Method::Get),
        axum::http::Method::DELETE => Some(Method::Delete),
        _ => None,
    }
}

fn to_axum_response(resp: ServerResponse) -> Response {
    let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    match resp.body {
        ResponseBody::Empty => {
            let mut builder = Response::builder().status(status);
            for (name, value) in &resp.headers {
                builder = builder.header(name, value);
            }
            builder.body(Body::empty()).unwrap()
        }
        ResponseBody::Bytes(bytes) => {
            let mut builder = Response::builder().status(status);
            for (name, value) in &resp.headers {
                builder = builder.header(name, value);
            }
            builder.body(Body::from(bytes)).unwrap()
        }
        ResponseBody::EventStream(frames) => {
            let events = frames.map(|frame| Ok::<Event, Infallible>(frame_to_event(frame)));
            let mut response = Sse::new(events)
                .keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(15)).text("keepalive"))
                .into_response();
            // `Sse::into_response` sets its own `Cache-Control: no-cache`; the
            // protocol requires `no-store` (§6), so the pipeline's headers
            // must override it rather than merely being appended alongside it.
            for (name, value) in &resp.headers {
                if let (Ok(name), Ok(value)) = (
                    axum::http::HeaderName::from_bytes(name.as_bytes()),
                    axum::http::HeaderValue::from_str(value),
                ) {
                    response.headers_mut().insert(name, value);
                }
            }
            response
        }
    }
}

/// Translate a core [`Frame`] into an axum SSE [`Event`]. Uses the same
/// `event(..).data(..)` shape as the teacher's `create_sse_stream`, rather
/// than [`Frame::to_sse_bytes`], since axum's `Sse` response writer already
/// performs the wire-level `event:`/`data:` framing.
fn frame_to_event(frame: Frame) -> Event {
    match frame {
        Frame::Data(bytes) => Event::default()
            .event("data")
            .data(String::from_utf8_lossy(&bytes)),
        Frame::Control(control) => Event::default().event("control").data(
            serde_json::to_string(&control).expect("ControlFrame serialization is infallible"),
        ),
    }
}
