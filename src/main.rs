use anyhow::Result;
use clap::Parser;
use clicktocall::app::{self, AppStateBuilder};
use clicktocall::callconfig::HttpCallConfigSource;
use clicktocall::config::{Cli, Commands, Config};
use clicktocall::controller::{CallController, CallState};
use clicktocall::deeplink;
use clicktocall::device::{rest::RestDevice, DeviceOptions};
use clicktocall::token::TokenClient;
use clicktocall::version;
use clicktocall::widget::CallWidget;
use std::fs::File;
use std::sync::Arc;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_appender::non_blocking::WorkerGuard;
use url::Url;

fn init_logging(config: &Config) -> Option<WorkerGuard> {
    let mut log_fmt = tracing_subscriber::fmt();
    if let Some(ref level) = config.log_level {
        if let Ok(lv) = level.as_str().parse::<LevelFilter>() {
            log_fmt = log_fmt.with_max_level(lv);
        }
    }

    let log_file = match config.log_file {
        Some(ref log_file) => log_file,
        None => {
            log_fmt.try_init().ok();
            return None;
        }
    };
    let (non_blocking, guard) = if config.log_rotation.as_deref() == Some("daily") {
        let path = std::path::Path::new(log_file);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."));
        let prefix = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "clicktocall.log".to_string());
        tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, prefix))
    } else {
        let file = File::create(log_file).expect("Failed to create log file");
        tracing_appender::non_blocking(file)
    };
    log_fmt.with_writer(non_blocking).with_ansi(false).try_init().ok();
    Some(guard)
}

async fn dial(config: Config, link: &str) -> Result<()> {
    let url = Url::parse(link)?;
    let contact = deeplink::resolve(&url, config.locale, &config.country_code);
    info!(
        name = contact.name,
        phone = contact.phone.as_deref().unwrap_or_default(),
        "calling"
    );

    let client = reqwest::Client::builder()
        .user_agent(version::get_useragent())
        .build()?;
    let server = Url::parse(&config.dialer.server_url)?;
    let tokens = TokenClient::new(client.clone(), server.join("/token")?.to_string());
    let call_config =
        HttpCallConfigSource::new(client.clone(), server.join("/static/config.yaml")?.to_string());
    let device = RestDevice::new(client, &config.twilio);
    let controller = CallController::new(
        Arc::new(device),
        Arc::new(tokens),
        Arc::new(call_config),
        DeviceOptions {
            log_level: config.dialer.log_level,
            codec_preferences: config.dialer.codec_preferences.clone(),
        },
        config.locale,
    );

    let cancel_token = CancellationToken::new();
    let widget = CallWidget::spawn(controller, cancel_token.child_token());
    let mut view = widget.subscribe();
    let mut state = widget.subscribe_state();
    widget.click()?;

    loop {
        select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received CTRL+C, hanging up");
                if widget.hang_up().is_err() {
                    break;
                }
            }
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = view.borrow_and_update().clone();
                info!(
                    button = ?current.button,
                    status = current.status_text,
                    "call view"
                );
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                if current == CallState::Ready {
                    info!("call ended");
                    break;
                }
            }
        }
    }
    cancel_token.cancel();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let mut config = cli
        .conf
        .as_deref()
        .filter(|conf| std::path::Path::new(conf).exists())
        .map(|conf| Config::load(conf).expect("Failed to load config"))
        .unwrap_or_default();
    config.twilio.apply_env();

    let _guard = init_logging(&config);
    if cli.conf.as_deref().is_some_and(|c| !std::path::Path::new(c).exists()) {
        warn!("config file {:?} not found, using defaults", cli.conf);
    }

    match cli.command {
        Some(Commands::Dial { link }) => dial(config, &link).await,
        Some(Commands::Serve) | None => {
            let state = AppStateBuilder::new().config(config).build().await?;
            info!("Starting clicktocall on {}", state.config.http_addr);
            select! {
                result = app::run(state.clone()) => result?,
                _ = tokio::signal::ctrl_c() => {
                    info!("Received CTRL+C, shutting down");
                }
            }
            state.token.cancel();
            Ok(())
        }
    }
}
