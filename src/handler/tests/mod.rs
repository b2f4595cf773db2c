use crate::app::{create_router, AppState, AppStateBuilder};
use crate::callconfig::{CallParams, FileCallConfigSource};
use crate::config::{Config, TwilioConfig};
use crate::controller::CallState;
use crate::deeplink::SelectedContact;
use crate::device::{
    CallHandle, DeviceOptions, DeviceSession, OutgoingCall, TelephonyDevice,
};
use crate::event::{call_event_channel, CallEvent, CallEventSender};
use crate::handler::call::{CallStatus, SessionOpened};
use crate::token::{self, TokenResponse};
use crate::view::ButtonAppearance;
use anyhow::Result;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

#[derive(Default)]
struct Dialed {
    to: Vec<String>,
    events: Option<CallEventSender>,
    hangups: usize,
}

#[derive(Clone, Default)]
struct TestDevice {
    dialed: Arc<Mutex<Dialed>>,
}

struct TestSession {
    dialed: Arc<Mutex<Dialed>>,
}

struct TestHandle {
    dialed: Arc<Mutex<Dialed>>,
}

#[async_trait]
impl TelephonyDevice for TestDevice {
    async fn register(
        &self,
        token: &str,
        _options: &DeviceOptions,
    ) -> Result<Box<dyn DeviceSession>> {
        token::verify(token, "secret")?;
        Ok(Box::new(TestSession {
            dialed: self.dialed.clone(),
        }))
    }
}

#[async_trait]
impl DeviceSession for TestSession {
    async fn update_token(&self, token: &str) -> Result<()> {
        token::verify(token, "secret")?;
        Ok(())
    }

    async fn connect(&self, params: &CallParams) -> Result<OutgoingCall> {
        let (sender, events) = call_event_channel();
        let mut dialed = self.dialed.lock().unwrap();
        dialed.to.push(params.to().unwrap_or_default().to_string());
        dialed.events = Some(sender);
        Ok(OutgoingCall {
            handle: Box::new(TestHandle {
                dialed: self.dialed.clone(),
            }),
            events,
        })
    }

    async fn unregister(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl CallHandle for TestHandle {
    fn id(&self) -> &str {
        "CA-test"
    }

    async fn disconnect(&self) -> Result<()> {
        self.dialed.lock().unwrap().hangups += 1;
        Ok(())
    }
}

fn test_config(dir: &TempDir) -> Config {
    Config {
        http_addr: "127.0.0.1:0".to_string(),
        static_dir: dir.path().to_string_lossy().to_string(),
        template_dir: Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("templates")
            .to_string_lossy()
            .to_string(),
        call_config_path: dir.path().join("config.yaml").to_string_lossy().to_string(),
        contact_list_path: dir
            .path()
            .join("contact_list.xlsx")
            .to_string_lossy()
            .to_string(),
        public_url: Some("http://127.0.0.1:8080".to_string()),
        twilio: TwilioConfig {
            account_sid: "AC123".to_string(),
            api_key: "SK456".to_string(),
            api_secret: "secret".to_string(),
            twiml_app_sid: "AP789".to_string(),
            caller_id: "+815000000000".to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
}

async fn start_server(state: AppState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_router(state);
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .ok();
    });
    addr
}

async fn setup(dir: &TempDir, device: TestDevice) -> (AppState, SocketAddr) {
    let config = test_config(dir);
    let call_config = Arc::new(FileCallConfigSource::new(&config.call_config_path));
    let state = AppStateBuilder::new()
        .config(config)
        .device(Arc::new(device))
        .call_config(call_config)
        .build()
        .await
        .unwrap();
    let addr = start_server(state.clone()).await;
    (state, addr)
}

async fn open_session(client: &reqwest::Client, addr: SocketAddr) -> String {
    let opened: SessionOpened = client
        .post(format!("http://{}/call/session", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(opened.status.state, CallState::Ready);
    opened.session_id
}

async fn session_status(client: &reqwest::Client, addr: SocketAddr, session: &str) -> CallStatus {
    client
        .get(format!("http://{}/call/{}/status", addr, session))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

async fn wait_for_state(
    client: &reqwest::Client,
    addr: SocketAddr,
    session: &str,
    expected: CallState,
) -> CallStatus {
    for _ in 0..100 {
        let status = session_status(client, addr, session).await;
        if status.state == expected {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("call never reached {:?}", expected);
}

async fn wait_for_dialed(device: &TestDevice) -> CallEventSender {
    // setup finishes asynchronously after the state flips to dialing
    for _ in 0..100 {
        if let Some(sender) = device.dialed.lock().unwrap().events.clone() {
            return sender;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("call never placed");
}

fn write_phone_config(dir: &TempDir) {
    std::fs::write(
        dir.path().join("config.yaml"),
        "callMode: phone\nphoneNumber: \"+81312345678\"\n",
    )
    .unwrap();
}

#[tokio::test]
async fn test_token_endpoint_issues_verifiable_token() {
    let dir = tempfile::tempdir().unwrap();
    let (state, addr) = setup(&dir, TestDevice::default()).await;

    let body: TokenResponse = reqwest::get(format!("http://{}/token", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body.identity.as_deref(), Some("ai_avatar"));
    let claims = token::verify(&body.token, "secret").unwrap();
    assert_eq!(claims.sub, "AC123");
    assert_eq!(claims.grants.identity, "ai_avatar");
    state.token.cancel();
}

#[tokio::test]
async fn test_token_endpoint_without_secret_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    config.twilio.api_secret.clear();
    let state = AppStateBuilder::new()
        .config(config)
        .device(Arc::new(TestDevice::default()))
        .build()
        .await
        .unwrap();
    let addr = start_server(state.clone()).await;

    let response = reqwest::get(format!("http://{}/token", addr)).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    state.token.cancel();
}

#[tokio::test]
async fn test_voice_webhook_dials_number() {
    let dir = tempfile::tempdir().unwrap();
    let (state, addr) = setup(&dir, TestDevice::default()).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{}/voice", addr))
        .form(&[("To", "+81312345678")])
        .send()
        .await
        .unwrap();
    assert_eq!(
        response.headers()[reqwest::header::CONTENT_TYPE],
        "text/xml"
    );
    let body = response.text().await.unwrap();
    assert!(body.contains("<Dial callerId=\"+815000000000\"><Number>+81312345678</Number></Dial>"));

    let body = client
        .post(format!("http://{}/voice", addr))
        .form(&[("To", "+815000000000")])
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("<Client>ai_avatar</Client>"));
    state.token.cancel();
}

#[tokio::test]
async fn test_call_link_resolves_contact() {
    let dir = tempfile::tempdir().unwrap();
    let (state, addr) = setup(&dir, TestDevice::default()).await;

    let client = reqwest::Client::new();
    let contact: SelectedContact = client
        .post(format!("http://{}/call/link", addr))
        .body("http://127.0.0.1:8080/phone?name=Query&phone=0111#name=%E4%BD%90%E8%97%A4&phone=0312345678")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(contact.name, "佐藤");
    assert_eq!(contact.phone.as_deref(), Some("+81312345678"));

    let response = client
        .post(format!("http://{}/call/link", addr))
        .body("not a url")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    state.token.cancel();
}

#[tokio::test]
async fn test_contact_list_reports_missing_workbook() {
    let dir = tempfile::tempdir().unwrap();
    let (state, addr) = setup(&dir, TestDevice::default()).await;

    let body = reqwest::get(format!("http://{}/contactlist", addr))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("<p class=\"text-red-500\">contact_list.xlsx の読み込みに失敗しました。</p>"));
    assert!(!body.contains("branch-header"));
    state.token.cancel();
}

#[tokio::test]
async fn test_contact_list_renders_workbook() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    config.contact_list_path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/contact_list.xlsx")
        .to_string_lossy()
        .to_string();
    let state = AppStateBuilder::new()
        .config(config)
        .device(Arc::new(TestDevice::default()))
        .build()
        .await
        .unwrap();
    let addr = start_server(state.clone()).await;

    let body = reqwest::get(format!("http://{}/contactlist", addr))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let tokyo = body.find(">東京</h2>").expect("first branch");
    let ny = body.find(">NY</h2>").expect("second branch");
    assert!(tokyo < ny);
    // numeric cells come out without a decimal part
    assert!(body.contains("&amp;phone=312345678\">佐藤 太郎</a>"));
    assert!(body.contains("&amp;phone=9012345678\">鈴木</a>"));
    assert!(body.contains("&amp;phone=%2B14155550100\">Smith</a>"));
    assert!(!body.contains("Hidden"));
    assert!(!body.contains("text-red-500"));
    state.token.cancel();
}

#[tokio::test]
async fn test_phone_page_rendered_from_templates() {
    let dir = tempfile::tempdir().unwrap();
    let (state, addr) = setup(&dir, TestDevice::default()).await;

    let response = reqwest::get(format!("http://{}/phone", addr)).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body = response.text().await.unwrap();
    assert!(body.contains("<html lang=\"ja\">"));
    assert!(body.contains("id=\"call-button\" class=\"bg-green-500 hover:bg-green-600\""));
    assert!(body.contains("/call/session"));
    state.token.cancel();

    let mut config = test_config(&dir);
    config.template_dir = dir.path().join("missing").to_string_lossy().to_string();
    let state = AppStateBuilder::new()
        .config(config)
        .device(Arc::new(TestDevice::default()))
        .build()
        .await
        .unwrap();
    let addr = start_server(state.clone()).await;
    let response = reqwest::get(format!("http://{}/phone", addr)).await.unwrap();
    assert_eq!(
        response.status(),
        reqwest::StatusCode::INTERNAL_SERVER_ERROR
    );
    state.token.cancel();
}

#[tokio::test]
async fn test_click_accept_hang_up_cycle() {
    let dir = tempfile::tempdir().unwrap();
    write_phone_config(&dir);
    let device = TestDevice::default();
    let (state, addr) = setup(&dir, device.clone()).await;
    let client = reqwest::Client::new();
    let session = open_session(&client, addr).await;

    let idle = wait_for_state(&client, addr, &session, CallState::Ready).await;
    assert_eq!(idle.view.button, ButtonAppearance::Call);
    assert_eq!(idle.view.status_text, "");

    client
        .post(format!("http://{}/call/{}/click", addr, session))
        .send()
        .await
        .unwrap();
    let dialing = wait_for_state(&client, addr, &session, CallState::Dialing).await;
    assert_eq!(dialing.view.button, ButtonAppearance::HangUp);
    assert_eq!(dialing.view.status_text, "接続中...");

    wait_for_dialed(&device).await.send(CallEvent::Accept).unwrap();
    let connected = wait_for_state(&client, addr, &session, CallState::Connected).await;
    assert_eq!(connected.view.status_text, "00:00");
    assert_eq!(device.dialed.lock().unwrap().to, vec!["+81312345678"]);

    client
        .post(format!("http://{}/call/{}/hangup", addr, session))
        .send()
        .await
        .unwrap();
    let ended = wait_for_state(&client, addr, &session, CallState::Ready).await;
    assert_eq!(ended.view.button, ButtonAppearance::Call);
    assert_eq!(ended.view.button_class, "bg-green-500 hover:bg-green-600");
    assert_eq!(device.dialed.lock().unwrap().hangups, 1);
    state.token.cancel();
}

#[tokio::test]
async fn test_each_page_drives_its_own_call() {
    let dir = tempfile::tempdir().unwrap();
    write_phone_config(&dir);
    let device = TestDevice::default();
    let (state, addr) = setup(&dir, device.clone()).await;
    let client = reqwest::Client::new();
    let calling_page = open_session(&client, addr).await;
    let other_page = open_session(&client, addr).await;
    assert_ne!(calling_page, other_page);

    client
        .post(format!("http://{}/call/{}/click", addr, calling_page))
        .send()
        .await
        .unwrap();
    wait_for_dialed(&device).await.send(CallEvent::Accept).unwrap();
    wait_for_state(&client, addr, &calling_page, CallState::Connected).await;

    let other = session_status(&client, addr, &other_page).await;
    assert_eq!(other.state, CallState::Ready);
    assert!(other.view.is_idle());

    // the other page's buttons never touch the call in progress
    client
        .post(format!("http://{}/call/{}/hangup", addr, other_page))
        .send()
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let calling = session_status(&client, addr, &calling_page).await;
    assert_eq!(calling.state, CallState::Connected);
    assert_eq!(device.dialed.lock().unwrap().hangups, 0);

    // closing the calling page hangs its call up
    let response = client
        .post(format!("http://{}/call/{}/close", addr, calling_page))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);
    for _ in 0..100 {
        if device.dialed.lock().unwrap().hangups == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(device.dialed.lock().unwrap().hangups, 1);
    assert_eq!(state.sessions.len().await, 1);
    state.token.cancel();
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (state, addr) = setup(&dir, TestDevice::default()).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{}/call/nope/status", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    let response = client
        .post(format!("http://{}/call/nope/click", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    state.token.cancel();
}
