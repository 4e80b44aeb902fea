use std::{fs, path::PathBuf, sync::Arc, time::Duration};

use tempfile::TempDir;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;
use umbra_engine::{Origin, ServiceState, StateStore};
use umbra_platform::{PlatformError, PlatformEvent, Theme, fake::FakePlatform};
use umbra_server::{Client, Connection, RunningService, Service, protocol::Response};
use win_keycode::Chord;

const BASE: &str = "\
general:
  startup_theme: restore
  watch_config: false
hotkeys:
  - keys: ctrl+shift+t
    action: toggle
service:
  bind: 127.0.0.1:0
advanced:
  retry_backoff_ms: 10
  pump_interval_ms: 20
";

struct Env {
    dir: TempDir,
    fake: Arc<FakePlatform>,
    svc: RunningService,
}

impl Env {
    fn config_path(&self) -> PathBuf {
        self.dir.path().join("config.yaml")
    }

    fn client(&self) -> Client {
        Client::new(self.svc.local_addr().expect("control server enabled"))
            .with_timeout(Duration::from_secs(5))
    }

    async fn connect(&self) -> Connection {
        self.client().connect().await.expect("connect")
    }

    async fn stop(self) {
        self.svc.stop();
        timeout(Duration::from_secs(5), self.svc.wait())
            .await
            .expect("service stops")
            .expect("clean exit");
    }
}

async fn start_with(yaml: &str, fake: Arc<FakePlatform>, dir: TempDir) -> Env {
    let config = dir.path().join("config.yaml");
    fs::write(&config, yaml).expect("write config");
    let svc = Service::new(&config)
        .with_state_path(dir.path().join("state.json"))
        .with_platform(fake.clone())
        .start(CancellationToken::new())
        .await
        .expect("service starts");
    Env { dir, fake, svc }
}

async fn start(yaml: &str) -> Env {
    let dir = tempfile::tempdir().expect("tempdir");
    start_with(yaml, Arc::new(FakePlatform::new(Theme::Light)), dir).await
}

fn chord(s: &str) -> Chord {
    Chord::parse(s).expect("chord")
}

/// Send raw text and read one response frame.
async fn raw_exchange(stream: &mut BufReader<TcpStream>, text: &str) -> Response {
    stream
        .get_mut()
        .write_all(text.as_bytes())
        .await
        .expect("write");
    let mut line = String::new();
    stream.read_line(&mut line).await.expect("read");
    serde_json::from_str(line.trim_end()).expect("response frame")
}

fn error_code(resp: &Response) -> Option<&str> {
    match resp {
        Response::Error { code, .. } => Some(code),
        Response::Ok { .. } => None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn first_run_reports_defaults_and_registers_hotkeys() {
    let env = start(BASE).await;
    let mut conn = env.connect().await;
    let ping = conn.ping().await.expect("ping");
    assert!(!ping.version.is_empty());

    let theme = conn.get_theme().await.expect("get-theme");
    assert_eq!((theme.theme, theme.generation), (Theme::Light, 0));
    // Restore on a first run leaves the desktop alone.
    assert_eq!(env.fake.set_calls(), 0);

    let status = conn.get_status().await.expect("status");
    assert_eq!(status.hotkeys, vec![chord("ctrl+shift+t")]);
    assert_eq!(status.backend, "fake");
    assert_eq!(status.config_revision, 1);
    assert_eq!(status.config_path, env.config_path());
    assert_eq!(env.fake.registered(), vec![chord("ctrl+shift+t")]);
    env.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn set_and_toggle_theme_over_the_channel() {
    let env = start(BASE).await;
    let mut conn = env.connect().await;
    let dark = conn.set_theme(Theme::Dark).await.expect("set dark");
    assert_eq!((dark.theme, dark.generation), (Theme::Dark, 1));
    assert_eq!(env.fake.theme(), Theme::Dark);

    let light = conn.toggle_theme().await.expect("toggle");
    assert_eq!((light.theme, light.generation), (Theme::Light, 2));

    let again = conn.set_theme(Theme::Light).await.expect("same theme");
    assert_eq!(again.generation, 2);
    env.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn command_then_hotkey_apply_in_arrival_order() {
    let env = start(BASE).await;
    let mut conn = env.connect().await;
    conn.set_theme(Theme::Dark).await.expect("dark");
    conn.set_theme(Theme::Light).await.expect("light");
    assert!(env.fake.fire(&chord("ctrl+shift+t")));

    let mut rx = env.svc.orchestrator().subscribe();
    timeout(Duration::from_secs(2), rx.wait_for(|s| s.generation == 3))
        .await
        .expect("hotkey served")
        .expect("orchestrator alive");
    let state = env.svc.orchestrator().state();
    assert_eq!(state.theme, Theme::Dark);
    let origins: Vec<Origin> = state.history.iter().map(|e| e.origin).collect();
    assert_eq!(
        origins,
        vec![Origin::Ipc, Origin::Ipc, Origin::Hotkey(chord("ctrl+shift+t"))]
    );
    assert_eq!(
        env.fake.applied(),
        vec![Theme::Dark, Theme::Light, Theme::Dark]
    );
    env.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn malformed_frames_get_one_error_each() {
    let env = start(BASE).await;
    let addr = env.svc.local_addr().expect("addr");
    let mut stream = BufReader::new(TcpStream::connect(addr).await.expect("connect"));

    let resp = raw_exchange(&mut stream, "not json\n").await;
    assert_eq!(error_code(&resp), Some("MalformedCommand"));
    let resp = raw_exchange(&mut stream, "{\"command\":\"launch-rockets\"}\n").await;
    assert_eq!(error_code(&resp), Some("MalformedCommand"));
    let resp = raw_exchange(&mut stream, "{\"command\":\"set-theme\",\"args\":{}}\n").await;
    assert_eq!(error_code(&resp), Some("MalformedCommand"));
    // The connection survives bad requests.
    let resp = raw_exchange(&mut stream, "{\"command\":\"get-theme\"}\n").await;
    assert!(resp.is_ok(), "{resp:?}");
    env.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn token_is_required_when_configured() {
    let yaml = BASE.replace("service:\n", "service:\n  token: s3cret\n");
    let env = start(&yaml).await;
    let mut anon = env.connect().await;
    let err = anon.get_theme().await.expect_err("unauthorized");
    assert_eq!(err.remote_code(), Some("Unauthorized"));

    let mut wrong = env
        .client()
        .with_token(Some("guess".into()))
        .connect()
        .await
        .expect("connect");
    assert_eq!(
        wrong.ping().await.expect_err("wrong token").remote_code(),
        Some("Unauthorized")
    );

    let mut authed = env
        .client()
        .with_token(Some("s3cret".into()))
        .connect()
        .await
        .expect("connect");
    authed.get_theme().await.expect("authorized");
    env.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn excess_clients_are_turned_away() {
    let yaml = BASE.replace("service:\n", "service:\n  max_connections: 1\n");
    let env = start(&yaml).await;
    let mut first = env.connect().await;
    first.ping().await.expect("first client served");

    let addr = env.svc.local_addr().expect("addr");
    let mut second = BufReader::new(TcpStream::connect(addr).await.expect("connect"));
    let mut line = String::new();
    second.read_line(&mut line).await.expect("busy frame");
    let resp: Response = serde_json::from_str(line.trim_end()).expect("frame");
    assert_eq!(error_code(&resp), Some("Busy"));

    drop(first);
    // The slot frees once the first connection is gone.
    let served = timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(mut c) = env.client().connect().await
                && c.ping().await.is_ok()
            {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(served.is_ok());
    env.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reload_swaps_bindings_and_rejects_bad_files() {
    let env = start(BASE).await;
    let mut conn = env.connect().await;

    let updated = BASE.replace("ctrl+shift+t", "ctrl+alt+n");
    fs::write(env.config_path(), updated).expect("rewrite");
    let reply = conn.reload_config().await.expect("reload");
    assert_eq!(reply.revision, 2);
    assert_eq!(reply.changed, vec!["hotkeys".to_string()]);

    timeout(Duration::from_secs(2), async {
        while env.fake.registered() != vec![chord("ctrl+alt+n")] {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("bindings swapped");

    let dup = BASE.replace(
        "service:\n",
        "  - keys: Shift+Ctrl+T\n    action: dark\nservice:\n",
    );
    fs::write(env.config_path(), dup).expect("rewrite");
    let err = conn.reload_config().await.expect_err("conflict");
    assert_eq!(err.remote_code(), Some("Conflict"));

    fs::write(env.config_path(), "general: [\n").expect("rewrite");
    let err = conn.reload_config().await.expect_err("parse");
    assert_eq!(err.remote_code(), Some("ConfigParse"));

    // The last good snapshot stays in effect.
    let status = conn.get_status().await.expect("status");
    assert_eq!(status.config_revision, 2);
    assert_eq!(env.fake.registered(), vec![chord("ctrl+alt+n")]);
    env.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn platform_refusal_is_reported_and_state_kept() {
    let env = start(BASE).await;
    env.fake
        .fail_next_set(PlatformError::PermissionDenied("group policy".into()));
    let mut conn = env.connect().await;
    let err = conn.set_theme(Theme::Dark).await.expect_err("denied");
    assert_eq!(err.remote_code(), Some("PermissionDenied"));
    assert_eq!(env.fake.set_calls(), 1);
    let theme = conn.get_theme().await.expect("get-theme");
    assert_eq!((theme.theme, theme.generation), (Theme::Light, 0));
    env.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_command_stops_everything() {
    let env = start(BASE).await;
    let mut conn = env.connect().await;
    conn.shutdown().await.expect("shutdown acknowledged");
    let fake = env.fake.clone();
    timeout(Duration::from_secs(5), env.svc.wait())
        .await
        .expect("service stops")
        .expect("clean exit");
    assert!(fake.registered().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn session_end_stops_the_service() {
    let env = start(BASE).await;
    env.fake.inject(PlatformEvent::ShutdownRequested);
    timeout(Duration::from_secs(5), env.svc.wait())
        .await
        .expect("service stops")
        .expect("clean exit");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dropped_client_does_not_cancel_its_request() {
    let env = start(BASE).await;
    env.fake.set_delay(Duration::from_millis(150));
    {
        let addr = env.svc.local_addr().expect("addr");
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        stream
            .write_all(b"{\"command\":\"set-theme\",\"args\":{\"value\":\"dark\"}}\n")
            .await
            .expect("write");
        sleep(Duration::from_millis(30)).await;
    }
    let mut rx = env.svc.orchestrator().subscribe();
    timeout(Duration::from_secs(2), rx.wait_for(|s| s.generation == 1))
        .await
        .expect("request completed")
        .expect("orchestrator alive");
    assert_eq!(env.fake.theme(), Theme::Dark);
    env.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn restart_restores_recorded_theme() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut store = StateStore::new(dir.path().join("state.json"));
    let dark = ServiceState::default().transition(Theme::Dark, Origin::Ipc, 1, 20);
    store.save(&dark).expect("seed state");

    let env = start_with(BASE, Arc::new(FakePlatform::new(Theme::Light)), dir).await;
    assert_eq!(env.fake.theme(), Theme::Dark);
    // Re-applying the recorded theme is not a transition.
    assert_eq!(env.svc.orchestrator().state().generation, 1);
    env.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn forced_startup_theme_wins_over_record() {
    let dir = tempfile::tempdir().expect("tempdir");
    let yaml = BASE.replace("startup_theme: restore", "startup_theme: dark");
    let env = start_with(&yaml, Arc::new(FakePlatform::new(Theme::Light)), dir).await;
    let state = env.svc.orchestrator().state();
    assert_eq!((state.theme, state.generation), (Theme::Dark, 1));
    assert_eq!(
        state.history.back().map(|e| e.origin),
        Some(Origin::ConfigDefault)
    );
    env.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn missing_config_is_created_on_first_start() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = dir.path().join("nested").join("config.yaml");
    let token = CancellationToken::new();
    let svc = Service::new(&config)
        .with_state_path(dir.path().join("state.json"))
        .with_platform(Arc::new(FakePlatform::default()))
        .with_bind("127.0.0.1:0".parse().expect("addr"))
        .start(token.clone())
        .await
        .expect("service starts");
    assert!(config.exists());
    assert_eq!(svc.config().hotkeys.len(), 1);
    token.cancel();
    timeout(Duration::from_secs(5), svc.wait())
        .await
        .expect("service stops")
        .expect("clean exit");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn status_reports_binding_disabled_after_failures() {
    let env = start(BASE).await;
    let c = chord("ctrl+shift+t");
    env.fake
        .fail_all_sets(Some(PlatformError::Fatal("broken".into())));
    for _ in 0..3 {
        assert!(env.fake.fire(&c));
        sleep(Duration::from_millis(100)).await;
    }

    let mut conn = env.connect().await;
    let status = timeout(Duration::from_secs(5), async {
        loop {
            let s = conn.get_status().await.expect("status");
            if !s.disabled_hotkeys.is_empty() {
                break s;
            }
            sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("binding disabled");
    assert!(status.hotkeys.is_empty());
    assert_eq!(status.disabled_hotkeys, vec![c]);
    assert!(env.fake.registered().is_empty());
    assert_eq!(status.generation, 0);
    drop(conn);
    env.stop().await;
}
