use crate::{
    app::AppState,
    twiml::{self, DialTarget, Instruction},
};
use anyhow::Result;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Form,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::{error, info};

static PHONE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\d+\-() ]+$").expect("valid phone pattern"));

#[derive(Debug, Deserialize)]
pub struct VoiceRequest {
    #[serde(rename = "To")]
    pub to: Option<String>,
}

/// Call instructions for a dialed destination.
///
/// A call to our own caller id rings the agent client, a phone-looking
/// destination is dialed as a number, anything else as a client name.
pub fn voice_response(to: Option<&str>, caller_id: &str, identity: &str) -> Result<String> {
    let to = to.map(str::trim).filter(|t| !t.is_empty());
    let instruction = match to {
        Some(to) if to == caller_id => Instruction::Dial {
            caller_id: None,
            target: DialTarget::Client(identity),
        },
        Some(to) => Instruction::Dial {
            caller_id: Some(caller_id),
            target: if PHONE_PATTERN.is_match(to) {
                DialTarget::Number(to)
            } else {
                DialTarget::Client(to.strip_prefix("client:").unwrap_or(to))
            },
        },
        None => Instruction::Say("Thanks for calling!"),
    };
    twiml::render(instruction, true)
}

/// `POST /voice`: webhook the vendor calls when the device connects.
pub async fn voice_handler(State(state): State<AppState>, Form(request): Form<VoiceRequest>) -> Response {
    let twilio = &state.config.twilio;
    info!(to = request.to.as_deref().unwrap_or_default(), "voice webhook");
    match voice_response(request.to.as_deref(), &twilio.caller_id, &twilio.identity) {
        Ok(body) => ([(header::CONTENT_TYPE, "text/xml")], body).into_response(),
        Err(e) => {
            error!("failed to render call instructions: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
