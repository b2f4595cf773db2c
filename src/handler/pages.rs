use crate::{
    app::AppState,
    directory::{load_directory, load_error_message, BranchLinks},
    view::CallView,
};
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
};
use minijinja::Environment;
use serde_json::json;
use std::path::PathBuf;
use tracing::{error, warn};
use url::Url;

/// Templates are read from `template_dir` on every render, so edits show up without a restart.
pub fn template_env(template_dir: &str) -> Environment<'static> {
    let mut tmpl_env = Environment::new();
    let base = PathBuf::from(template_dir);
    tmpl_env.set_loader(move |name| {
        let path = base.join(name);
        if !path.exists() {
            return Ok(None);
        }
        std::fs::read_to_string(path).map(Some).map_err(|_| {
            minijinja::Error::new(
                minijinja::ErrorKind::TemplateNotFound,
                "failed to load template",
            )
        })
    });
    tmpl_env
}

pub struct RenderTemplate<'a> {
    pub tmpl_env: &'a Environment<'a>,
    pub template_name: &'a str,
    pub context: &'a serde_json::Value,
}

impl IntoResponse for RenderTemplate<'_> {
    fn into_response(self) -> Response {
        let rendered = self
            .tmpl_env
            .get_template(self.template_name)
            .and_then(|tmpl| tmpl.render(self.context));
        match rendered {
            Ok(body) => Html(body).into_response(),
            Err(err) => {
                warn!(
                    "failed to render template {}: {:?}",
                    self.template_name, err
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Internal Server Error: {}", err),
                )
                    .into_response()
            }
        }
    }
}

/// Origin used in directory links: the configured public url, else the request host.
fn request_origin(state: &AppState, headers: &HeaderMap) -> Option<Url> {
    if let Some(public_url) = state.config.public_url.as_deref() {
        match Url::parse(public_url) {
            Ok(url) => return Some(url),
            Err(e) => warn!(public_url, "invalid public_url: {}", e),
        }
    }
    let host = headers.get(header::HOST)?.to_str().ok()?;
    Url::parse(&format!("http://{}", host)).ok()
}

/// `GET /contactlist`: contacts grouped by branch, each linking to the call page.
pub async fn contact_list(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let path = PathBuf::from(&state.config.contact_list_path);
    let locale = state.config.locale;
    let origin = match request_origin(&state, &headers) {
        Some(origin) => origin,
        None => return (StatusCode::BAD_REQUEST, "missing host").into_response(),
    };

    let loaded = {
        let path = path.clone();
        tokio::task::spawn_blocking(move || load_directory(&path, locale)).await
    };
    let branches: Result<Vec<BranchLinks>, String> = match loaded {
        Ok(Ok(directory)) => directory.links(&origin).map_err(|e| e.to_string()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(format!("loader panicked: {}", e)),
    };
    let context = match branches {
        Ok(branches) => json!({
            "lang": locale.lang(),
            "title": "Contact list",
            "branches": branches,
        }),
        Err(e) => {
            error!(path = %path.display(), "failed to load contact list: {}", e);
            json!({
                "lang": locale.lang(),
                "title": "Contact list",
                "error": load_error_message(&path, locale),
            })
        }
    };
    RenderTemplate {
        tmpl_env: &state.templates,
        template_name: "contact_list.html",
        context: &context,
    }
    .into_response()
}

/// `GET /phone`: the call page; it opens its own widget session and posts its url to `/call/link`.
pub async fn phone_page(State(state): State<AppState>) -> Response {
    let context = json!({
        "lang": state.config.locale.lang(),
        "title": "Call",
        "button_class": CallView::idle().button_class,
    });
    RenderTemplate {
        tmpl_env: &state.templates,
        template_name: "phone.html",
        context: &context,
    }
    .into_response()
}
