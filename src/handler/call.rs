use crate::{
    app::AppState,
    controller::CallState,
    deeplink::{self, SelectedContact},
    view::CallView,
    widget::CallWidget,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallStatus {
    pub state: CallState,
    pub view: CallView,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOpened {
    pub session_id: String,
    #[serde(flatten)]
    pub status: CallStatus,
}

fn status_of(widget: &CallWidget) -> CallStatus {
    CallStatus {
        state: widget.state(),
        view: widget.view(),
    }
}

fn unknown_session(session: &str) -> Response {
    info!(session, "unknown widget session");
    (StatusCode::NOT_FOUND, "unknown session").into_response()
}

/// `POST /call/link`: body is the call page url, fragment included.
pub async fn resolve_link(State(state): State<AppState>, body: String) -> Response {
    let url = match Url::parse(body.trim()) {
        Ok(url) => url,
        Err(e) => {
            info!("invalid call page link: {}", e);
            return (StatusCode::BAD_REQUEST, "invalid link").into_response();
        }
    };
    let contact: SelectedContact =
        deeplink::resolve(&url, state.config.locale, &state.config.country_code);
    Json(contact).into_response()
}

/// `POST /call/session`: a new widget for one call page.
pub async fn open_session(State(state): State<AppState>) -> Response {
    let (session_id, widget) = state.sessions.open().await;
    Json(SessionOpened {
        session_id,
        status: status_of(&widget),
    })
    .into_response()
}

/// `POST /call/{session}/click`: the call button.
pub async fn click(State(state): State<AppState>, Path(session): Path<String>) -> Response {
    let widget = match state.sessions.get(&session).await {
        Some(widget) => widget,
        None => return unknown_session(&session),
    };
    match widget.click() {
        Ok(_) => Json(status_of(&widget)).into_response(),
        Err(e) => {
            error!(session = %session, "call button: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
    }
}

/// `POST /call/{session}/hangup`
pub async fn hang_up(State(state): State<AppState>, Path(session): Path<String>) -> Response {
    let widget = match state.sessions.get(&session).await {
        Some(widget) => widget,
        None => return unknown_session(&session),
    };
    match widget.hang_up() {
        Ok(_) => Json(status_of(&widget)).into_response(),
        Err(e) => {
            error!(session = %session, "hangup: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
    }
}

/// `GET /call/{session}/status`
pub async fn status(State(state): State<AppState>, Path(session): Path<String>) -> Response {
    match state.sessions.get(&session).await {
        Some(widget) => Json(status_of(&widget)).into_response(),
        None => unknown_session(&session),
    }
}

/// `POST /call/{session}/close`: sent when the page goes away.
pub async fn close_session(State(state): State<AppState>, Path(session): Path<String>) -> Response {
    if state.sessions.close(&session).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        unknown_session(&session)
    }
}
