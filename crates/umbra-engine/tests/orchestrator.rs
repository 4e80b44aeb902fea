use std::{fs, path::PathBuf, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::{
    task::JoinHandle,
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;
use umbra_engine::{
    HotkeySink, Orchestrator, OrchestratorError, OrchestratorHandle, OrchestratorParams, Origin,
    ServiceState, StateStore,
};
use umbra_platform::{PlatformError, Theme, fake::FakePlatform};
use win_keycode::Chord;

struct Harness {
    _dir: TempDir,
    fake: Arc<FakePlatform>,
    handle: OrchestratorHandle,
    join: JoinHandle<()>,
    token: CancellationToken,
    state_path: PathBuf,
}

fn params() -> OrchestratorParams {
    OrchestratorParams {
        retry_backoff: Duration::from_millis(10),
        ..OrchestratorParams::default()
    }
}

fn start_with(fake: Arc<FakePlatform>, params: OrchestratorParams) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let state_path = dir.path().join("state.json");
    let mut store = StateStore::new(&state_path);
    let state = store.load();
    let token = CancellationToken::new();
    let (handle, join) = Orchestrator::new(fake.clone(), store, state, params).spawn(token.clone());
    Harness {
        _dir: dir,
        fake,
        handle,
        join,
        token,
        state_path,
    }
}

fn start() -> Harness {
    start_with(Arc::new(FakePlatform::new(Theme::Light)), params())
}

fn chord(s: &str) -> Chord {
    Chord::parse(s).expect("chord")
}

#[derive(Default)]
struct RecordingSink(Mutex<Vec<Chord>>);

impl HotkeySink for RecordingSink {
    fn disable(&self, chord: Chord) {
        self.0.lock().push(chord);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_are_serialized() {
    let h = start();
    h.fake.set_delay(Duration::from_millis(15));
    let mut tasks = Vec::new();
    for i in 0..10 {
        let handle = h.handle.clone();
        let theme = if i % 2 == 0 { Theme::Dark } else { Theme::Light };
        tasks.push(tokio::spawn(
            async move { handle.request(theme, Origin::Ipc).await },
        ));
    }
    for t in tasks {
        t.await.expect("join").expect("request");
    }
    assert_eq!(h.fake.max_in_flight(), 1);

    let state = h.handle.state();
    assert_eq!(state.theme, h.fake.theme());
    // Generations are contiguous: one per recorded transition.
    let gens: Vec<u64> = state.history.iter().map(|e| e.generation).collect();
    let expected: Vec<u64> = (1..=state.generation).collect();
    assert_eq!(gens, expected);
    // Every history entry is a real change relative to its predecessor.
    let themes: Vec<Theme> = state.history.iter().map(|e| e.theme).collect();
    assert!(themes.windows(2).all(|w| w[0] != w[1]));
}

#[tokio::test]
async fn success_bumps_generation_by_one_and_persists() {
    let h = start();
    let mut rx = h.handle.subscribe();
    let t = h.handle.request(Theme::Dark, Origin::Ipc).await.expect("dark");
    assert_eq!(t, Theme::Dark);
    rx.changed().await.expect("changed");
    let published = rx.borrow().clone();
    assert_eq!(published.generation, 1);
    assert_eq!(published.theme, Theme::Dark);

    let mut reread = StateStore::new(&h.state_path);
    assert_eq!(reread.load(), published);
}

#[tokio::test]
async fn same_theme_reapplies_without_touching_state() {
    let h = start();
    h.handle.request(Theme::Dark, Origin::Ipc).await.expect("first");
    let before = h.handle.state();
    let t = h.handle.request(Theme::Dark, Origin::Ipc).await.expect("second");
    assert_eq!(t, Theme::Dark);
    assert_eq!(h.handle.state(), before);
    assert_eq!(h.fake.set_calls(), 2);
}

#[tokio::test]
async fn follow_system_resolves_against_recorded_theme() {
    let h = start();
    let a = h.handle.request(Theme::FollowSystem, Origin::Ipc).await;
    let b = h.handle.request(Theme::FollowSystem, Origin::Ipc).await;
    assert_eq!((a, b), (Ok(Theme::Dark), Ok(Theme::Light)));
    assert_eq!(h.handle.state().generation, 2);
}

#[tokio::test]
async fn permission_denied_is_not_retried_and_leaves_state() {
    let h = start();
    h.fake
        .fail_next_set(PlatformError::PermissionDenied("policy".into()));
    let err = h
        .handle
        .request(Theme::Dark, Origin::Ipc)
        .await
        .expect_err("denied");
    assert_eq!(
        err,
        OrchestratorError::Platform(PlatformError::PermissionDenied("policy".into()))
    );
    assert_eq!(err.code(), "PermissionDenied");
    assert_eq!(h.fake.set_calls(), 1);
    assert_eq!(h.handle.state(), ServiceState::default());
    assert_eq!(h.fake.theme(), Theme::Light);
}

#[tokio::test]
async fn transient_failure_is_retried_exactly_once() {
    let h = start();
    h.fake.fail_next_set(PlatformError::Transient("busy".into()));
    assert_eq!(
        h.handle.request(Theme::Dark, Origin::Ipc).await,
        Ok(Theme::Dark)
    );
    assert_eq!(h.fake.set_calls(), 2);

    h.fake.fail_next_set(PlatformError::Transient("busy".into()));
    h.fake.fail_next_set(PlatformError::Transient("still busy".into()));
    let err = h
        .handle
        .request(Theme::Light, Origin::Ipc)
        .await
        .expect_err("two transients");
    assert_eq!(err.code(), "Transient");
    assert_eq!(h.fake.set_calls(), 4);
    assert_eq!(h.handle.state().theme, Theme::Dark);
}

#[tokio::test]
async fn partial_apply_is_restored_from_backup() {
    let h = start();
    h.fake.partial_next_set(PlatformError::Fatal("second flag".into()));
    let err = h
        .handle
        .request(Theme::Dark, Origin::Ipc)
        .await
        .expect_err("partial");
    assert_eq!(err.code(), "Fatal");
    assert_eq!(h.fake.restores(), 1);
    assert_eq!(h.fake.theme(), Theme::Light);
}

#[tokio::test]
async fn repeated_hotkey_failures_disable_the_binding() {
    let h = start();
    let sink = Arc::new(RecordingSink::default());
    h.handle.attach_hotkeys(sink.clone()).expect("attach");
    let c = chord("ctrl+shift+t");
    h.fake.fail_all_sets(Some(PlatformError::Fatal("broken".into())));
    for _ in 0..3 {
        let err = h
            .handle
            .request(Theme::FollowSystem, Origin::Hotkey(c))
            .await
            .expect_err("fails");
        assert_eq!(err.code(), "Fatal");
    }
    assert_eq!(*sink.0.lock(), vec![c]);

    h.fake.fail_all_sets(None);
    assert_eq!(
        h.handle
            .request(Theme::FollowSystem, Origin::Hotkey(c))
            .await,
        Err(OrchestratorError::Disabled(c))
    );
    // Other origins still work.
    assert_eq!(
        h.handle.request(Theme::Dark, Origin::Ipc).await,
        Ok(Theme::Dark)
    );
}

#[tokio::test]
async fn failure_run_resets_on_success() {
    let h = start();
    let sink = Arc::new(RecordingSink::default());
    h.handle.attach_hotkeys(sink.clone()).expect("attach");
    let c = chord("ctrl+alt+d");
    for _ in 0..2 {
        h.fake.fail_next_set(PlatformError::Fatal("x".into()));
        let _ignored = h.handle.request(Theme::Dark, Origin::Hotkey(c)).await;
    }
    h.handle
        .request(Theme::Dark, Origin::Hotkey(c))
        .await
        .expect("succeeds");
    h.fake.fail_next_set(PlatformError::Fatal("x".into()));
    let _ignored = h.handle.request(Theme::Light, Origin::Hotkey(c)).await;
    assert!(sink.0.lock().is_empty());
}

#[tokio::test]
async fn save_failure_reverts_and_reports_persist() {
    let dir = tempfile::tempdir().expect("tempdir");
    let blocker = dir.path().join("not-a-dir");
    fs::write(&blocker, b"").expect("write");
    let fake = Arc::new(FakePlatform::new(Theme::Light));
    let store = StateStore::new(blocker.join("state.json"));
    let token = CancellationToken::new();
    let (handle, _join) =
        Orchestrator::new(fake.clone(), store, ServiceState::default(), params()).spawn(token);

    let err = handle
        .request(Theme::Dark, Origin::Ipc)
        .await
        .expect_err("persist");
    assert!(matches!(err, OrchestratorError::Persist(_)), "{err:?}");
    assert_eq!(fake.theme(), Theme::Light);
    assert_eq!(handle.state().generation, 0);
}

#[tokio::test]
async fn stale_store_maps_to_conflict() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("state.json");
    let mut seed = StateStore::new(&path);
    let mut s = ServiceState::default();
    for theme in [Theme::Dark, Theme::Light, Theme::Dark] {
        s = s.transition(theme, Origin::Ipc, 1, 10);
        seed.save(&s).expect("seed");
    }
    let mut store = StateStore::new(&path);
    let _loaded = store.load();
    let fake = Arc::new(FakePlatform::new(Theme::Light));
    // Hand the orchestrator an older state than the store has written.
    let (handle, _join) = Orchestrator::new(fake, store, ServiceState::default(), params())
        .spawn(CancellationToken::new());
    let err = handle
        .request(Theme::Dark, Origin::Ipc)
        .await
        .expect_err("stale");
    assert_eq!(err.code(), "Conflict");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_finishes_in_flight_and_rejects_queued() {
    let h = start();
    h.fake.set_delay(Duration::from_millis(200));
    let first = {
        let handle = h.handle.clone();
        tokio::spawn(async move { handle.request(Theme::Dark, Origin::Ipc).await })
    };
    sleep(Duration::from_millis(50)).await;
    let queued: Vec<_> = (0..2)
        .map(|_| {
            let handle = h.handle.clone();
            tokio::spawn(async move { handle.request(Theme::Light, Origin::Ipc).await })
        })
        .collect();
    sleep(Duration::from_millis(20)).await;
    h.token.cancel();

    assert_eq!(first.await.expect("join"), Ok(Theme::Dark));
    for q in queued {
        assert_eq!(
            q.await.expect("join"),
            Err(OrchestratorError::Unavailable)
        );
    }
    timeout(Duration::from_secs(2), h.join)
        .await
        .expect("task exits")
        .expect("join");
    assert_eq!(h.fake.theme(), Theme::Dark);
    assert_eq!(
        h.handle.request(Theme::Light, Origin::Ipc).await,
        Err(OrchestratorError::Unavailable)
    );
}

#[tokio::test]
async fn params_update_applies_to_later_requests() {
    let h = start();
    h.handle
        .update_params(OrchestratorParams {
            history_size: 2,
            ..params()
        })
        .expect("update");
    for theme in [Theme::Dark, Theme::Light, Theme::Dark] {
        h.handle.request(theme, Origin::Ipc).await.expect("ok");
    }
    let state = h.handle.state();
    assert_eq!(state.generation, 3);
    assert_eq!(state.history.len(), 2);
}
