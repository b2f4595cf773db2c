use super::middleware::clientip::ClientIp;
use crate::{app::AppState, token::TokenResponse};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, info};

/// `GET /token`: a fresh access token for the configured client identity.
pub async fn token_handler(client_ip: ClientIp, State(state): State<AppState>) -> Response {
    match state.issuer.issue() {
        Ok(token) => {
            info!(
                client_ip = client_ip.to_string(),
                identity = state.issuer.identity(),
                "access token issued"
            );
            Json(TokenResponse {
                identity: Some(state.issuer.identity().to_string()),
                token,
            })
            .into_response()
        }
        Err(e) => {
            error!(client_ip = client_ip.to_string(), "failed to issue token: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "token unavailable").into_response()
        }
    }
}
