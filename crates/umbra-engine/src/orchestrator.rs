//! Theme orchestrator.
//!
//! A single task drains a FIFO of theme requests. It is the only caller of the
//! platform's theme functions and the only writer of [`ServiceState`], so
//! transitions are serialized without locks. Blocking backend calls run on the
//! blocking pool; the task awaits each one before taking the next request.
//!
//! Cancellation is observed only between requests: a mutation that has
//! started always runs to completion, and requests still queued when the task
//! stops are answered with [`OrchestratorError::Unavailable`].

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::{self, JoinHandle},
    time,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use umbra_config::Config;
use umbra_platform::{Platform, PlatformError, Theme, ThemeBackup};
use win_keycode::Chord;

use crate::{
    OrchestratorError, StateError,
    state::{Origin, ServiceState, StateStore, now_ms},
};

/// Result of a theme request: the concrete theme now applied.
pub type RequestResult = Result<Theme, OrchestratorError>;

/// Receives "stop listening to this chord" instructions.
pub trait HotkeySink: Send + Sync {
    /// Unregister `chord` and skip it for the rest of the session.
    fn disable(&self, chord: Chord);
}

/// Tunables taken from the `general` and `advanced` config sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorParams {
    /// Wait before retrying a transient failure.
    pub retry_backoff: Duration,
    /// Consecutive failures of one hotkey before it is disabled.
    pub max_consecutive_failures: u32,
    /// Snapshot platform flags before each mutation.
    pub backup_before_change: bool,
    /// History entries to keep.
    pub history_size: usize,
}

impl Default for OrchestratorParams {
    fn default() -> Self {
        Self {
            retry_backoff: Duration::from_millis(250),
            max_consecutive_failures: 3,
            backup_before_change: true,
            history_size: 20,
        }
    }
}

impl From<&Config> for OrchestratorParams {
    fn from(cfg: &Config) -> Self {
        Self {
            retry_backoff: cfg.advanced.retry_backoff(),
            max_consecutive_failures: cfg.advanced.max_consecutive_failures,
            backup_before_change: cfg.advanced.backup_before_change,
            history_size: cfg.general.history_size,
        }
    }
}

/// A queued theme request.
struct Request {
    /// Requested theme, possibly `FollowSystem`.
    theme: Theme,
    /// Requester.
    origin: Origin,
    /// Where to send the outcome, if anyone is waiting.
    reply: Option<oneshot::Sender<RequestResult>>,
}

/// Messages accepted by the orchestrator task, served strictly in order.
enum Command {
    /// Apply a theme.
    Request(Request),
    /// Replace tunables.
    Params(OrchestratorParams),
    /// Install the hotkey sink used for disabling failing bindings.
    Attach(Arc<dyn HotkeySink>),
}

/// Clonable handle to the orchestrator task.
#[derive(Clone)]
pub struct OrchestratorHandle {
    /// Command queue.
    tx: mpsc::UnboundedSender<Command>,
    /// Latest state.
    state: watch::Receiver<ServiceState>,
}

impl OrchestratorHandle {
    /// Queue a request and wait for its outcome.
    pub async fn request(&self, theme: Theme, origin: Origin) -> RequestResult {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Request(Request {
                theme,
                origin,
                reply: Some(reply),
            }))
            .map_err(|_| OrchestratorError::Unavailable)?;
        rx.await.unwrap_or(Err(OrchestratorError::Unavailable))
    }

    /// Queue a request without waiting. Safe to call from non-async threads.
    pub fn enqueue(&self, theme: Theme, origin: Origin) -> Result<(), OrchestratorError> {
        self.tx
            .send(Command::Request(Request {
                theme,
                origin,
                reply: None,
            }))
            .map_err(|_| OrchestratorError::Unavailable)
    }

    /// Replace tunables; takes effect from the next queued request.
    pub fn update_params(&self, params: OrchestratorParams) -> Result<(), OrchestratorError> {
        self.tx
            .send(Command::Params(params))
            .map_err(|_| OrchestratorError::Unavailable)
    }

    /// Route binding disables to `sink`.
    pub fn attach_hotkeys(&self, sink: Arc<dyn HotkeySink>) -> Result<(), OrchestratorError> {
        self.tx
            .send(Command::Attach(sink))
            .map_err(|_| OrchestratorError::Unavailable)
    }

    /// Watch the latest recorded state.
    pub fn subscribe(&self) -> watch::Receiver<ServiceState> {
        self.state.clone()
    }

    /// Snapshot of the latest recorded state.
    pub fn state(&self) -> ServiceState {
        self.state.borrow().clone()
    }
}

/// Consecutive-failure tracking for one hotkey.
#[derive(Debug, Clone, Copy)]
struct FailureRun {
    /// Theme the failing requests asked for.
    theme: Theme,
    /// Length of the current run.
    count: u32,
}

/// The task-owned orchestrator state.
pub struct Orchestrator {
    /// Backend.
    platform: Arc<dyn Platform>,
    /// Durable record, written on the blocking pool.
    store: Arc<Mutex<StateStore>>,
    /// Current state, mirrored to `state_tx` after each save.
    state: ServiceState,
    /// State publisher.
    state_tx: watch::Sender<ServiceState>,
    /// Tunables.
    params: OrchestratorParams,
    /// Per-hotkey failure runs.
    failures: HashMap<Chord, FailureRun>,
    /// Hotkeys disabled this session.
    disabled: HashSet<Chord>,
    /// Where to send disables.
    sink: Option<Arc<dyn HotkeySink>>,
}

impl Orchestrator {
    /// Build an orchestrator from a loaded store and its state.
    pub fn new(
        platform: Arc<dyn Platform>,
        store: StateStore,
        mut state: ServiceState,
        params: OrchestratorParams,
    ) -> Self {
        state.trim_history(params.history_size);
        let (state_tx, _) = watch::channel(state.clone());
        Self {
            platform,
            store: Arc::new(Mutex::new(store)),
            state,
            state_tx,
            params,
            failures: HashMap::new(),
            disabled: HashSet::new(),
            sink: None,
        }
    }

    /// Spawn the task. It runs until `token` is cancelled or every handle is dropped.
    pub fn spawn(self, token: CancellationToken) -> (OrchestratorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = OrchestratorHandle {
            tx,
            state: self.state_tx.subscribe(),
        };
        let join = tokio::spawn(self.run(rx, token));
        (handle, join)
    }

    /// Main loop.
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>, token: CancellationToken) {
        info!(backend = self.platform.name(), theme = %self.state.theme, generation = self.state.generation, "orchestrator_started");
        loop {
            let cmd = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                cmd = rx.recv() => match cmd {
                    Some(c) => c,
                    None => break,
                },
            };
            match cmd {
                Command::Request(req) => {
                    let out = self.serve(req.theme, req.origin).await;
                    if let Some(reply) = req.reply {
                        let _ignored = reply.send(out);
                    } else if let Err(e) = out {
                        debug!(origin = ?req.origin, code = e.code(), "request_failed_unobserved");
                    }
                }
                Command::Params(p) => {
                    debug!(?p, "orchestrator_params_updated");
                    self.params = p;
                }
                Command::Attach(sink) => self.sink = Some(sink),
            }
        }
        rx.close();
        let mut dropped = 0usize;
        while let Ok(cmd) = rx.try_recv() {
            if let Command::Request(req) = cmd {
                dropped += 1;
                if let Some(reply) = req.reply {
                    let _ignored = reply.send(Err(OrchestratorError::Unavailable));
                }
            }
        }
        info!(dropped, "orchestrator_stopped");
    }

    /// Run a blocking backend call on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, PlatformError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Platform) -> Result<T, PlatformError> + Send + 'static,
    {
        let p = self.platform.clone();
        task::spawn_blocking(move || f(p.as_ref()))
            .await
            .unwrap_or_else(|e| Err(PlatformError::Fatal(format!("backend call panicked: {e}"))))
    }

    /// Write `next` through the store on the blocking pool.
    async fn persist(&self, next: ServiceState) -> Result<(), OrchestratorError> {
        let store = self.store.clone();
        let saved = task::spawn_blocking(move || store.lock().save(&next))
            .await
            .map_err(|e| OrchestratorError::Persist(format!("state save panicked: {e}")))?;
        saved.map_err(|e| match e {
            StateError::Stale { .. } => OrchestratorError::Conflict(e.to_string()),
            other => OrchestratorError::Persist(other.to_string()),
        })
    }

    /// `set_theme` with a single retry for transient failures.
    async fn apply(&self, target: Theme) -> Result<(), PlatformError> {
        match self.blocking(move |p| p.set_theme(target)).await {
            Err(e) if e.is_retryable() => {
                warn!(theme = %target, error = %e, backoff_ms = self.params.retry_backoff.as_millis() as u64, "theme_apply_retry");
                time::sleep(self.params.retry_backoff).await;
                self.blocking(move |p| p.set_theme(target)).await
            }
            other => other,
        }
    }

    /// Best-effort revert after a failure that has already been reported.
    async fn revert(&self, backup: Option<ThemeBackup>, previous: Theme) {
        let res = match backup {
            Some(b) => self.blocking(move |p| p.restore_backup(&b)).await,
            None => self.blocking(move |p| p.set_theme(previous)).await,
        };
        if let Err(e) = res {
            warn!(error = %e, "theme_revert_failed");
        }
    }

    /// Count a hotkey failure; disable the binding when the run is long enough.
    fn note_failure(&mut self, chord: Chord, theme: Theme) {
        let run = self
            .failures
            .entry(chord)
            .and_modify(|r| {
                if r.theme == theme {
                    r.count += 1;
                } else {
                    *r = FailureRun { theme, count: 1 };
                }
            })
            .or_insert(FailureRun { theme, count: 1 });
        if run.count < self.params.max_consecutive_failures {
            return;
        }
        warn!(%chord, failures = run.count, "hotkey_disabled_after_failures");
        self.failures.remove(&chord);
        self.disabled.insert(chord);
        if let Some(sink) = &self.sink {
            sink.disable(chord);
        }
    }

    /// Serve one request.
    async fn serve(&mut self, requested: Theme, origin: Origin) -> RequestResult {
        let chord = origin.chord();
        if let Some(c) = chord
            && self.disabled.contains(&c)
        {
            return Err(OrchestratorError::Disabled(c));
        }
        let previous = self.state.theme;
        let target = match requested {
            Theme::FollowSystem => previous.complement().unwrap_or(Theme::Light),
            t => t,
        };

        let backup = if self.params.backup_before_change {
            match self.blocking(|p| p.capture_backup()).await {
                Ok(b) => Some(b),
                Err(e) => {
                    warn!(error = %e, "theme_backup_failed");
                    None
                }
            }
        } else {
            None
        };

        if let Err(e) = self.apply(target).await {
            warn!(theme = %target, origin = ?origin, code = e.kind().as_str(), error = %e, "theme_apply_failed");
            if let Some(b) = backup {
                self.revert(Some(b), previous).await;
            }
            if let Some(c) = chord {
                self.note_failure(c, requested);
            }
            return Err(e.into());
        }
        if let Some(c) = chord {
            self.failures.remove(&c);
        }

        if target == previous {
            debug!(theme = %target, "theme_reapplied");
            return Ok(target);
        }

        let next = self
            .state
            .transition(target, origin, now_ms(), self.params.history_size);
        match self.persist(next.clone()).await {
            Ok(()) => {
                info!(from = %previous, to = %target, origin = ?origin, generation = next.generation, "theme_changed");
                self.state = next;
                self.state_tx.send_replace(self.state.clone());
                Ok(target)
            }
            Err(e) => {
                warn!(code = e.code(), error = %e, "state_save_failed");
                self.revert(backup, previous).await;
                Err(e)
            }
        }
    }
}
