use crate::callconfig::{CallConfigSource, FileCallConfigSource};
use crate::config::Config;
use crate::controller::CallController;
use crate::device::{rest::RestDevice, DeviceOptions, TelephonyDevice};
use crate::token::{AccessTokenIssuer, TokenSource};
use crate::handler::pages::template_env;
use crate::widget::WidgetSessions;
use anyhow::Result;
use axum::Router;
use minijinja::Environment;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    services::ServeDir,
};
use tracing::{info, warn};

pub struct AppStateInner {
    pub config: Arc<Config>,
    pub token: CancellationToken,
    pub issuer: Arc<AccessTokenIssuer>,
    pub sessions: Arc<WidgetSessions>,
    pub templates: Environment<'static>,
}

pub type AppState = Arc<AppStateInner>;

pub struct AppStateBuilder {
    pub config: Option<Config>,
    pub device: Option<Arc<dyn TelephonyDevice>>,
    pub call_config: Option<Arc<dyn CallConfigSource>>,
}

impl AppStateBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            device: None,
            call_config: None,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn device(mut self, device: Arc<dyn TelephonyDevice>) -> Self {
        self.device = Some(device);
        self
    }

    pub fn call_config(mut self, source: Arc<dyn CallConfigSource>) -> Self {
        self.call_config = Some(source);
        self
    }

    /// Spawns the session sweeper, so it must run inside the runtime.
    pub async fn build(self) -> Result<AppState> {
        let config = Arc::new(self.config.unwrap_or_default());
        let token = CancellationToken::new();
        if !config.twilio.has_credentials() {
            warn!("vendor credentials are not configured, /token will fail");
        }

        let issuer = Arc::new(AccessTokenIssuer::new(&config.twilio));
        let device = match self.device {
            Some(device) => device,
            None => {
                let client = reqwest::Client::builder()
                    .user_agent(crate::version::get_useragent())
                    .build()?;
                Arc::new(RestDevice::new(client, &config.twilio))
            }
        };
        let call_config = self
            .call_config
            .unwrap_or_else(|| Arc::new(FileCallConfigSource::new(&config.call_config_path)));
        let options = DeviceOptions {
            log_level: config.dialer.log_level,
            codec_preferences: config.dialer.codec_preferences.clone(),
        };
        let tokens = issuer.clone() as Arc<dyn TokenSource>;
        let locale = config.locale;
        let sessions = Arc::new(WidgetSessions::new(
            move || {
                CallController::new(
                    device.clone(),
                    tokens.clone(),
                    call_config.clone(),
                    options.clone(),
                    locale,
                )
            },
            Duration::from_secs(config.session_idle_secs),
            token.child_token(),
        ));
        tokio::spawn(sessions.clone().sweep());
        let templates = template_env(&config.template_dir);

        Ok(Arc::new(AppStateInner {
            config,
            token,
            issuer,
            sessions,
            templates,
        }))
    }
}

pub async fn run(state: AppState) -> Result<()> {
    let token = state.token.clone();
    let app = create_router(state.clone());
    let addr: SocketAddr = state.config.http_addr.parse()?;
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            return Err(anyhow::anyhow!("Failed to bind to {}: {}", addr, e));
        }
    };
    info!("listening on http://{}", addr);

    let http_task = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );

    select! {
        http_result = http_task => {
            match http_result {
                Ok(_) => info!("Server shut down gracefully"),
                Err(e) => {
                    tracing::error!("Server error: {}", e);
                    return Err(anyhow::anyhow!("Server error: {}", e));
                }
            }
        }
        _ = token.cancelled() => {
            info!("Application shutting down due to cancellation");
        }
    }
    token.cancel();
    Ok(())
}

pub fn create_router(state: AppState) -> Router {
    if !std::path::Path::new(&state.config.static_dir).exists() {
        tracing::error!("static dir {} does not exist", state.config.static_dir);
    }
    let static_files_service = ServeDir::new(&state.config.static_dir);

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            axum::http::header::ORIGIN,
        ]);

    let routes = crate::handler::router().with_state(state);
    Router::new()
        .nest_service("/static", static_files_service)
        .merge(routes)
        .layer(cors)
}
