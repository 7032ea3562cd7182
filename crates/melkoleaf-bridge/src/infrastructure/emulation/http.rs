//! The emulated panel's HTTP API.
//!
//! Controllers pair by calling `/api/v1/new`, then address every other route
//! with the returned token as the first path segment.  Only the effects
//! endpoint changes bridge state; everything else reports fixed metadata so
//! the controller accepts the bridge as a real panel.
//!
//! ## Endpoints
//!
//! | Path | Description |
//! |------|-------------|
//! | `/api/v1` | Device info, no token |
//! | `/api/v1/new` | Issues the auth token |
//! | `/api/v1/{token}` | Full device info |
//! | `/api/v1/{token}/state[/on, /brightness]` | Power and brightness placeholders |
//! | `/api/v1/{token}/effects[/select, /effect]` | Effect selection and stream handoff |
//! | `/api/v1/{token}/panelLayout[/layout]` | The single-panel layout |
//!
//! Every route also answers with a trailing slash.

use std::net::IpAddr;

use axum::body::Bytes;
use axum::extract::{FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, MethodRouter};
use axum::{Json, Router};
use melkoleaf_core::{Frame, PanelLayoutDescriptor};
use tracing::{debug, info, warn};

use crate::application::context::BridgeContext;
use crate::domain::api::{
    current_effect, ApiError, DeviceInfo, DeviceState, EffectAction, EffectName, EffectsInfo,
    EffectsRequest, ExtControlVersion, FullDeviceInfo, NewTokenResponse, PanelLayoutInfo,
    StreamHandoff, Value,
};
use crate::domain::auth::AuthToken;

/// Shared state passed to all request handlers.
#[derive(Clone)]
pub struct EmulationState {
    pub ctx: BridgeContext,
    pub token: AuthToken,
    /// Address handed to v1 controllers as the stream destination.
    pub stream_ip: IpAddr,
}

/// Builds the router for the emulated API.
pub fn router(state: EmulationState) -> Router {
    let routes = [
        ("/api/v1", get(device_info)),
        ("/api/v1/new", get(new_token).post(new_token)),
        ("/api/v1/{token}", get(full_info)),
        ("/api/v1/{token}/state", get(device_state)),
        ("/api/v1/{token}/state/on", get(power_state).put(power_state)),
        (
            "/api/v1/{token}/state/brightness",
            get(brightness).put(set_brightness),
        ),
        ("/api/v1/{token}/effects", get(effects).put(put_effects)),
        ("/api/v1/{token}/effects/select", get(selected_effect)),
        ("/api/v1/{token}/effects/effect", get(effect_name)),
        ("/api/v1/{token}/panelLayout", get(panel_layout)),
        ("/api/v1/{token}/panelLayout/layout", get(layout)),
    ];

    routes
        .into_iter()
        .fold(Router::new(), |router, (path, handler)| {
            with_trailing_slash(router, path, handler)
        })
        .fallback(fallback)
        .with_state(state)
}

fn with_trailing_slash(
    router: Router<EmulationState>,
    path: &str,
    handler: MethodRouter<EmulationState>,
) -> Router<EmulationState> {
    router
        .route(path, handler.clone())
        .route(&format!("{path}/"), handler)
}

// ── Authorization ─────────────────────────────────────────────────────────────

/// Proof that the `{token}` path segment matched the issued token.
///
/// Rejection is `401 {"error":"unauthorized"}` and happens before the handler
/// runs, so an unauthorized request never touches bridge state.
pub struct Authorized;

impl FromRequestParts<EmulationState> for Authorized {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &EmulationState,
    ) -> Result<Self, Self::Rejection> {
        let presented = Path::<String>::from_request_parts(parts, state)
            .await
            .map(|Path(token)| token)
            .unwrap_or_default();
        if state.token.matches(&presented) {
            Ok(Authorized)
        } else {
            debug!("rejected {} {}: invalid token", parts.method, parts.uri.path());
            Err((StatusCode::UNAUTHORIZED, Json(ApiError::unauthorized())).into_response())
        }
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

async fn device_info(State(state): State<EmulationState>) -> Json<DeviceInfo> {
    Json(DeviceInfo::new(&state.ctx.config.device_id))
}

async fn new_token(State(state): State<EmulationState>) -> Json<NewTokenResponse> {
    info!("controller requested an auth token");
    let token = state.token.as_str().to_string();
    Json(NewTokenResponse {
        auth_token: token.clone(),
        token,
    })
}

async fn full_info(_: Authorized, State(state): State<EmulationState>) -> Json<FullDeviceInfo> {
    Json(FullDeviceInfo {
        info: DeviceInfo::new(&state.ctx.config.device_id),
        state: DeviceState::default(),
        effects: EffectsInfo::new(state.ctx.state.is_streaming_active()),
        panel_layout: PanelLayoutInfo {
            layout: PanelLayoutDescriptor::single_panel(),
        },
    })
}

async fn device_state(_: Authorized) -> Json<DeviceState> {
    Json(DeviceState::default())
}

async fn power_state(_: Authorized) -> Json<Value<bool>> {
    Json(Value::new(true))
}

async fn brightness(_: Authorized) -> Json<Value<u8>> {
    Json(Value::new(100))
}

async fn set_brightness(_: Authorized) -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn effects(_: Authorized, State(state): State<EmulationState>) -> Json<EffectsInfo> {
    Json(EffectsInfo::new(state.ctx.state.is_streaming_active()))
}

async fn selected_effect(_: Authorized, State(state): State<EmulationState>) -> Json<Value<String>> {
    let effect = current_effect(state.ctx.state.is_streaming_active());
    Json(Value::new(effect.to_string()))
}

async fn effect_name(_: Authorized, State(state): State<EmulationState>) -> Json<EffectName> {
    Json(EffectName {
        effect_name: current_effect(state.ctx.state.is_streaming_active()).to_string(),
    })
}

async fn panel_layout(_: Authorized) -> Json<PanelLayoutInfo> {
    Json(PanelLayoutInfo {
        layout: PanelLayoutDescriptor::single_panel(),
    })
}

async fn layout(_: Authorized) -> Json<PanelLayoutDescriptor> {
    Json(PanelLayoutDescriptor::single_panel())
}

/// `PUT /api/v1/{token}/effects`: stream handoff and static colors.
async fn put_effects(_: Authorized, State(state): State<EmulationState>, body: Bytes) -> Response {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        EffectsRequest::default()
    } else {
        match serde_json::from_slice::<EffectsRequest>(&body) {
            Ok(request) => request,
            Err(e) => {
                warn!("rejected effects body: {e}");
                return (StatusCode::BAD_REQUEST, Json(ApiError::invalid_body(e.to_string())))
                    .into_response();
            }
        }
    };

    let ctx = &state.ctx;
    match request.action() {
        EffectAction::Select(name) => {
            debug!("effect select '{name}' acknowledged");
            StatusCode::NO_CONTENT.into_response()
        }
        EffectAction::StartStream(ExtControlVersion::V2) => {
            ctx.state.set_streaming_active(true);
            info!("controller started v2 streaming on port {}", ctx.config.stream_port);
            StatusCode::NO_CONTENT.into_response()
        }
        EffectAction::StartStream(ExtControlVersion::V1) => {
            ctx.state.set_streaming_active(true);
            info!("controller started v1 streaming on port {}", ctx.config.stream_port);
            Json(StreamHandoff {
                stream_control_ip_addr: state.stream_ip.to_string(),
                stream_control_port: ctx.config.stream_port,
                stream_control_protocol: "udp".to_string(),
            })
            .into_response()
        }
        EffectAction::StaticColor(color) => {
            info!("static color {color} requested");
            ctx.state.set_last_color(color);
            ctx.queue.publish(Frame::now(color));
            Json(serde_json::json!({})).into_response()
        }
        EffectAction::Ignored => {
            debug!("effects write ignored");
            Json(serde_json::json!({})).into_response()
        }
    }
}

/// Controllers treat a 404 under `/api/` as "not a panel", so unknown API
/// paths answer with the device info instead.
async fn fallback(State(state): State<EmulationState>, uri: Uri) -> Response {
    if uri.path().starts_with("/api/") {
        debug!("unhandled API path {}", uri.path());
        Json(DeviceInfo::new(&state.ctx.config.device_id)).into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}
