use crate::app::AppState;
use axum::{
    routing::{get, post},
    Router,
};

pub mod call;
pub mod middleware;
pub mod pages;
pub mod token;
pub mod voice;
#[cfg(test)]
mod tests;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(pages::contact_list))
        .route("/contactlist", get(pages::contact_list))
        .route("/phone", get(pages::phone_page))
        .route("/token", get(token::token_handler))
        .route("/voice", post(voice::voice_handler))
        .route("/call/link", post(call::resolve_link))
        .route("/call/session", post(call::open_session))
        .route("/call/{session}/click", post(call::click))
        .route("/call/{session}/hangup", post(call::hang_up))
        .route("/call/{session}/status", get(call::status))
        .route("/call/{session}/close", post(call::close_session))
}
