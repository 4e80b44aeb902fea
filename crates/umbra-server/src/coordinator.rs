//! Service coordinator.
//!
//! Owns every component and drives their lifetimes.
//!
//! Startup
//! 1. load (or create) the config file
//! 2. select the backend once
//! 3. load durable state and start the orchestrator
//! 4. start the hotkey thread and register the enabled bindings
//! 5. apply the startup theme
//! 6. start the config watcher and the control server
//!
//! Config changes, whether from the watcher or `reload-config`, arrive as
//! [`ServiceEvent::ConfigChanged`] messages. Both paths swap the shared cell
//! before sending, so messages can arrive out of revision order; the
//! coordinator diffs each one against the snapshot it last applied and
//! drops any that an already applied revision supersedes. It forwards only
//! the work the diff calls for: binding re-registration, parameter updates.
//!
//! Shutdown runs in the reverse order once the service token is cancelled:
//! control server drains, hotkey thread unregisters and exits, orchestrator
//! finishes its in-flight request, watcher stops.

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use tokio::{
    sync::mpsc,
    task::{self, JoinHandle},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use umbra_config::{Config, ConfigCell, ConfigDiff, ConfigWatcher, load_or_init};
use umbra_engine::{
    ApplyReport, HotkeyControl, Orchestrator, OrchestratorHandle, OrchestratorParams, Origin,
    StateStore,
};
use umbra_platform::{Platform, native};

use crate::{
    Error, Result,
    control::{ControlContext, ControlServer},
};

/// Messages for the coordinator task.
#[derive(Debug)]
pub enum ServiceEvent {
    /// A new config snapshot was accepted.
    ConfigChanged {
        /// The snapshot now in effect.
        config: Arc<Config>,
        /// Sections that differ from the previous snapshot.
        diff: ConfigDiff,
    },
}

/// Service builder.
pub struct Service {
    /// Config file.
    config_path: PathBuf,
    /// State file override; otherwise taken from the config.
    state_path: Option<PathBuf>,
    /// Backend override; otherwise the native backend.
    platform: Option<Arc<dyn Platform>>,
    /// Control server address override.
    bind: Option<SocketAddr>,
}

impl Service {
    /// Service reading its configuration from `config_path`.
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            state_path: None,
            platform: None,
            bind: None,
        }
    }

    /// Use `path` for durable state instead of the configured location.
    pub fn with_state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_path = Some(path.into());
        self
    }

    /// Use `platform` instead of the native backend.
    pub fn with_platform(mut self, platform: Arc<dyn Platform>) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Listen on `addr` instead of `service.bind`.
    pub fn with_bind(mut self, addr: SocketAddr) -> Self {
        self.bind = Some(addr);
        self
    }

    /// Start every component. Runs until `token` is cancelled.
    pub async fn start(self, token: CancellationToken) -> Result<RunningService> {
        let cfg = {
            let path = self.config_path.clone();
            task::spawn_blocking(move || load_or_init(&path))
                .await
                .map_err(|e| Error::Task(e.to_string()))??
        };
        info!(path = %self.config_path.display(), revision = cfg.revision, hotkeys = cfg.hotkeys.len(), "config_loaded");

        let platform = match self.platform {
            Some(p) => p,
            None => native(&cfg.platform_options())?,
        };
        let state_path = self.state_path.unwrap_or_else(|| cfg.state_path());
        let mut store = StateStore::new(&state_path);
        let state = store.load();
        info!(backend = platform.name(), state = %state_path.display(), theme = %state.theme, generation = state.generation, "service_starting");

        let orch_token = CancellationToken::new();
        let (orchestrator, orch_join) =
            Orchestrator::new(platform.clone(), store, state, OrchestratorParams::from(&cfg))
                .spawn(orch_token.clone());

        let hotkeys = {
            let (p, o, t) = (platform.clone(), orchestrator.clone(), token.clone());
            let interval = cfg.advanced.pump_interval();
            match task::spawn_blocking(move || HotkeyControl::spawn(p, o, interval, t))
                .await
                .map_err(|e| Error::Task(e.to_string()))
                .and_then(|r| r.map_err(Error::from))
            {
                Ok(h) => h,
                Err(e) => {
                    orch_token.cancel();
                    return Err(e);
                }
            }
        };
        if orchestrator
            .attach_hotkeys(Arc::new(hotkeys.clone()))
            .is_err()
        {
            warn!("orchestrator_stopped_before_attach");
        }

        let started = Instant::now();
        apply_bindings(&hotkeys, &cfg).await;
        apply_startup_theme(&orchestrator, &cfg).await;

        let cell = ConfigCell::new(cfg);
        let cfg = cell.get();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let watcher = if cfg.general.watch_config {
            let tx = events_tx.clone();
            match ConfigWatcher::spawn(
                &self.config_path,
                cell.clone(),
                cfg.advanced.reload_debounce(),
                move |config, diff| {
                    let _ignored = tx.send(ServiceEvent::ConfigChanged { config, diff });
                },
            ) {
                Ok(w) => Some(w),
                Err(e) => {
                    warn!(error = %e, "config_watch_unavailable");
                    None
                }
            }
        } else {
            None
        };

        let mut local_addr = None;
        let server_join = if cfg.service.enabled {
            let ctx = ControlContext {
                orchestrator: orchestrator.clone(),
                config: cell.clone(),
                config_path: self.config_path.clone(),
                events: events_tx.clone(),
                hotkeys: hotkeys.clone(),
                started,
                backend: platform.name(),
                shutdown: token.clone(),
            };
            let addr = self.bind.unwrap_or(cfg.service.bind);
            let server = match ControlServer::bind(addr, cfg.service.max_connections, ctx).await {
                Ok(s) => s,
                Err(e) => {
                    error!(fatal = true, %addr, error = %e, "control_server_bind_failed");
                    token.cancel();
                    shutdown_engine(&hotkeys, orch_token, orch_join).await;
                    return Err(e);
                }
            };
            local_addr = Some(server.local_addr()?);
            Some(tokio::spawn(server.run(token.clone())))
        } else {
            info!("control_server_disabled");
            None
        };

        let coordinator = Coordinator {
            orchestrator: orchestrator.clone(),
            hotkeys,
            applied: cfg,
            events: events_rx,
            token: token.clone(),
            orch_token,
            orch_join,
            server_join,
            watcher,
        };
        let join = tokio::spawn(coordinator.run());
        info!(addr = ?local_addr, "service_started");
        Ok(RunningService {
            local_addr,
            config_path: self.config_path,
            orchestrator,
            config: cell,
            token,
            join,
        })
    }
}

/// A started service.
pub struct RunningService {
    /// Control server address, when enabled.
    local_addr: Option<SocketAddr>,
    /// Config file in use.
    config_path: PathBuf,
    /// Orchestrator handle, for embedding callers.
    orchestrator: OrchestratorHandle,
    /// Current config snapshot.
    config: ConfigCell,
    /// Service token.
    token: CancellationToken,
    /// Coordinator task.
    join: JoinHandle<()>,
}

impl RunningService {
    /// Control server address, when the server is enabled.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Config file in use.
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Orchestrator handle.
    pub fn orchestrator(&self) -> &OrchestratorHandle {
        &self.orchestrator
    }

    /// Current config snapshot.
    pub fn config(&self) -> Arc<Config> {
        self.config.get()
    }

    /// Ask the service to stop. [`RunningService::wait`] returns once it has.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Wait for shutdown to complete.
    pub async fn wait(self) -> Result<()> {
        self.join.await.map_err(|e| Error::Task(e.to_string()))
    }
}

/// Register the enabled bindings of `cfg`.
async fn apply_bindings(hotkeys: &HotkeyControl, cfg: &Config) {
    match hotkeys.apply(cfg.hotkeys.clone()).await {
        Ok(report) => log_report(&report),
        Err(e) => warn!(error = %e, "bindings_apply_failed"),
    }
}

/// Sections to re-apply for `next`, or `None` when `applied` is the same or a
/// later revision.
fn pending_diff(applied: &Config, next: &Config) -> Option<ConfigDiff> {
    (next.revision > applied.revision).then(|| ConfigDiff::between(applied, next))
}

/// Summarize a binding apply.
fn log_report(report: &ApplyReport) {
    for (chord, err) in &report.failed {
        warn!(%chord, error = %err, "hotkey_unavailable");
    }
    if report.is_clean() {
        info!(registered = report.registered.len(), "hotkeys_registered");
    } else {
        warn!(
            registered = report.registered.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "hotkeys_partially_registered"
        );
    }
}

/// Apply `general.startup_theme`.
async fn apply_startup_theme(orchestrator: &OrchestratorHandle, cfg: &Config) {
    let state = orchestrator.state();
    let theme = match cfg.general.startup_theme.request() {
        Some(t) => t,
        // Nothing recorded yet: leave the desktop as it is.
        None if state.generation == 0 => return,
        None => state.theme,
    };
    match orchestrator.request(theme, Origin::ConfigDefault).await {
        Ok(applied) => info!(theme = %applied, "startup_theme_applied"),
        Err(e) => warn!(theme = %theme, code = e.code(), error = %e, "startup_theme_failed"),
    }
}

/// Stop the hotkey thread, then the orchestrator.
async fn shutdown_engine(
    hotkeys: &HotkeyControl,
    orch_token: CancellationToken,
    orch_join: JoinHandle<()>,
) {
    let hk = hotkeys.clone();
    if task::spawn_blocking(move || hk.shutdown()).await.is_err() {
        error!("hotkey_shutdown_panicked");
    }
    orch_token.cancel();
    if orch_join.await.is_err() {
        error!("orchestrator_task_panicked");
    }
}

/// Coordinator task state.
struct Coordinator {
    /// Parameter updates.
    orchestrator: OrchestratorHandle,
    /// Binding updates.
    hotkeys: HotkeyControl,
    /// Last snapshot whose changes were forwarded.
    applied: Arc<Config>,
    /// Inbox.
    events: mpsc::UnboundedReceiver<ServiceEvent>,
    /// Service token.
    token: CancellationToken,
    /// Orchestrator token, cancelled last.
    orch_token: CancellationToken,
    /// Orchestrator task.
    orch_join: JoinHandle<()>,
    /// Control server task.
    server_join: Option<JoinHandle<()>>,
    /// Config watcher.
    watcher: Option<ConfigWatcher>,
}

impl Coordinator {
    /// Forward the work a config change calls for.
    async fn config_changed(&mut self, cfg: Arc<Config>) {
        let Some(diff) = pending_diff(&self.applied, &cfg) else {
            debug!(
                revision = cfg.revision,
                applied = self.applied.revision,
                "config_change_superseded"
            );
            return;
        };
        self.applied = cfg;
        let snapshot = Arc::clone(&self.applied);
        let cfg = snapshot.as_ref();
        info!(revision = cfg.revision, changed = %diff, "config_change_applying");
        if diff.hotkeys {
            apply_bindings(&self.hotkeys, cfg).await;
        }
        if (diff.general || diff.advanced)
            && self
                .orchestrator
                .update_params(OrchestratorParams::from(cfg))
                .is_err()
        {
            warn!("orchestrator_unavailable_for_params");
        }
        if diff.advanced {
            self.hotkeys.set_pump_interval(cfg.advanced.pump_interval());
        }
        if diff.service {
            // The listener, pool size and bind address are fixed at startup;
            // the token is read per request.
            warn!("service_section_changed_restart_required");
        }
        if diff.platform {
            warn!("windows_section_changed_restart_required");
        }
    }

    /// Main loop, then ordered shutdown.
    async fn run(mut self) {
        loop {
            let ev = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                ev = self.events.recv() => ev,
            };
            match ev {
                Some(ServiceEvent::ConfigChanged { config, diff }) => {
                    trace!(revision = config.revision, reported = %diff, "config_change_received");
                    self.config_changed(config).await;
                }
                // No watcher and no control server: nothing left to wait on but the token.
                None => {
                    self.token.cancelled().await;
                    break;
                }
            }
        }
        info!("service_stopping");
        self.token.cancel();
        if let Some(j) = self.server_join.take()
            && j.await.is_err()
        {
            error!("control_server_panicked");
        }
        shutdown_engine(&self.hotkeys, self.orch_token, self.orch_join).await;
        if let Some(w) = self.watcher.take() {
            let _ignored = task::spawn_blocking(move || w.stop()).await;
        }
        debug!("service_stopped");
    }
}
