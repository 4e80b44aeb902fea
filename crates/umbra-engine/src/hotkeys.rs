//! Hotkey subsystem.
//!
//! One dedicated OS thread owns the platform event pump. It binds the event
//! surface, then loops: drain control commands, pump events for at most one
//! interval, dispatch presses to the orchestrator. All registration happens on
//! this thread, because the OS delivers hotkey presses to the registering
//! thread.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded, unbounded};
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use umbra_config::{Action, HotkeyBinding};
use umbra_platform::{HotkeyHandle, Platform, PlatformError, PlatformEvent};
use win_keycode::Chord;

use crate::{
    HotkeyError,
    orchestrator::{HotkeySink, OrchestratorHandle},
    state::Origin,
};

/// Threshold for warning about slow binding updates.
const APPLY_WARN_MS: u64 = 50;

/// Lifecycle of one binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    /// Not registered with the OS.
    Unregistered,
    /// Registration in progress.
    Registering,
    /// Registered and receiving presses.
    Active(HotkeyHandle),
    /// Unregistration in progress.
    Unregistering(HotkeyHandle),
}

/// Outcome of [`BindingTable::apply`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Chords now active, in config order.
    pub registered: Vec<Chord>,
    /// Chords that could not be registered.
    pub failed: Vec<(Chord, HotkeyError)>,
    /// Chords skipped because they were disabled this session.
    pub skipped: Vec<Chord>,
}

impl ApplyReport {
    /// True when every requested binding was registered.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// Chords the hotkey thread currently holds, as last published.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingSnapshot {
    /// Registered with the OS, in config order.
    pub registered: Vec<Chord>,
    /// Disabled for the session after repeated failures.
    pub disabled: Vec<Chord>,
}

/// One row of the table.
#[derive(Debug, Clone, Copy)]
struct Entry {
    /// What the binding does.
    action: Action,
    /// Where it is in its lifecycle.
    state: BindingState,
}

/// Registered bindings and their lifecycle states.
#[derive(Debug, Default)]
pub struct BindingTable {
    /// Rows keyed by chord.
    entries: BTreeMap<Chord, Entry>,
    /// Reverse index for dispatch.
    by_handle: HashMap<HotkeyHandle, Chord>,
    /// Chords disabled for the session.
    disabled: HashSet<Chord>,
}

impl BindingTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lifecycle state of `chord`.
    pub fn state_of(&self, chord: &Chord) -> BindingState {
        self.entries
            .get(chord)
            .map_or(BindingState::Unregistered, |e| e.state)
    }

    /// Chords currently active.
    pub fn active(&self) -> Vec<Chord> {
        self.entries
            .iter()
            .filter(|(_, e)| matches!(e.state, BindingState::Active(_)))
            .map(|(c, _)| *c)
            .collect()
    }

    /// Chords disabled for the session, sorted.
    pub fn disabled(&self) -> Vec<Chord> {
        let mut out: Vec<Chord> = self.disabled.iter().copied().collect();
        out.sort();
        out
    }

    /// True if `chord` was disabled for the session.
    pub fn is_disabled(&self, chord: &Chord) -> bool {
        self.disabled.contains(chord)
    }

    /// Binding for a fired handle.
    pub fn lookup(&self, handle: HotkeyHandle) -> Option<(Chord, Action)> {
        let chord = self.by_handle.get(&handle)?;
        self.entries.get(chord).map(|e| (*chord, e.action))
    }

    /// Register one binding. A chord that is already present is a conflict.
    pub fn register(
        &mut self,
        platform: &dyn Platform,
        chord: Chord,
        action: Action,
    ) -> Result<HotkeyHandle, HotkeyError> {
        if self.entries.contains_key(&chord) {
            return Err(HotkeyError::Conflict(chord));
        }
        self.entries.insert(
            chord,
            Entry {
                action,
                state: BindingState::Registering,
            },
        );
        match platform.register_hotkey(&chord) {
            Ok(handle) => {
                if let Some(e) = self.entries.get_mut(&chord) {
                    e.state = BindingState::Active(handle);
                }
                self.by_handle.insert(handle, chord);
                trace!(%chord, %handle, "binding_active");
                Ok(handle)
            }
            Err(source) => {
                self.entries.remove(&chord);
                Err(HotkeyError::Platform { chord, source })
            }
        }
    }

    /// Unregister one binding. Unknown chords are a no-op.
    pub fn unregister(&mut self, platform: &dyn Platform, chord: &Chord) {
        let Some(entry) = self.entries.get_mut(chord) else {
            return;
        };
        if let BindingState::Active(h) = entry.state {
            entry.state = BindingState::Unregistering(h);
            if let Err(e) = platform.unregister_hotkey(h) {
                warn!(%chord, error = %e, "hotkey_unregister_failed");
            }
            self.by_handle.remove(&h);
        }
        self.entries.remove(chord);
    }

    /// Unregister everything.
    pub fn clear(&mut self, platform: &dyn Platform) {
        let chords: Vec<Chord> = self.entries.keys().copied().collect();
        for c in chords {
            self.unregister(platform, &c);
        }
    }

    /// Replace the active set with the enabled entries of `bindings`.
    ///
    /// Everything current is unregistered first; then each enabled binding is
    /// registered in order. Failures are collected and successes are kept.
    pub fn apply(&mut self, platform: &dyn Platform, bindings: &[HotkeyBinding]) -> ApplyReport {
        let start = Instant::now();
        self.clear(platform);
        let mut report = ApplyReport::default();
        for b in bindings.iter().filter(|b| b.enabled) {
            if self.disabled.contains(&b.keys) {
                report.skipped.push(b.keys);
                continue;
            }
            match self.register(platform, b.keys, b.action) {
                Ok(_) => report.registered.push(b.keys),
                Err(e) => {
                    warn!(chord = %b.keys, error = %e, "hotkey_register_failed");
                    report.failed.push((b.keys, e));
                }
            }
        }
        let elapsed = start.elapsed();
        debug!(
            registered = report.registered.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "bindings_applied"
        );
        if elapsed > Duration::from_millis(APPLY_WARN_MS) {
            warn!(elapsed_ms = elapsed.as_millis() as u64, "binding_update_slow");
        }
        report
    }

    /// Unregister `chord` and skip it in later applies.
    pub fn disable(&mut self, platform: &dyn Platform, chord: Chord) {
        self.unregister(platform, &chord);
        self.disabled.insert(chord);
    }
}

/// Commands for the hotkey thread.
enum HotkeyCommand {
    /// Replace bindings and report.
    Apply(Vec<HotkeyBinding>, oneshot::Sender<ApplyReport>),
    /// Disable one chord for the session.
    Disable(Chord),
    /// Change the pump wait.
    PumpInterval(Duration),
    /// Unregister everything and exit.
    Shutdown,
}

/// Handle to the hotkey thread.
#[derive(Clone)]
pub struct HotkeyControl {
    /// Command queue.
    tx: Sender<HotkeyCommand>,
    /// Backend, for waking the pump.
    platform: Arc<dyn Platform>,
    /// Thread handle, taken on shutdown.
    join: Arc<Mutex<Option<JoinHandle<()>>>>,
    /// Latest published bindings.
    bindings: watch::Receiver<BindingSnapshot>,
}

impl HotkeySink for HotkeyControl {
    fn disable(&self, chord: Chord) {
        if self.tx.send(HotkeyCommand::Disable(chord)).is_err() {
            debug!(%chord, "hotkey_disable_after_exit");
        }
    }
}

impl HotkeyControl {
    /// Start the hotkey thread. Returns once the event surface is bound.
    pub fn spawn(
        platform: Arc<dyn Platform>,
        orchestrator: OrchestratorHandle,
        pump_interval: Duration,
        token: CancellationToken,
    ) -> Result<Self, HotkeyError> {
        let (tx, rx) = unbounded();
        let (ready_tx, ready_rx) = bounded::<Result<(), PlatformError>>(1);
        let (published, bindings) = watch::channel(BindingSnapshot::default());
        let worker = Worker {
            platform: platform.clone(),
            orchestrator,
            interval: pump_interval,
            token,
            table: BindingTable::new(),
            published,
        };
        let join = thread::Builder::new()
            .name("umbra-hotkeys".into())
            .spawn(move || worker.run(&rx, &ready_tx))
            .map_err(|e| {
                HotkeyError::Surface(PlatformError::Fatal(format!(
                    "cannot spawn hotkey thread: {e}"
                )))
            })?;
        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(source)) => {
                let _ignored = join.join();
                return Err(HotkeyError::Surface(source));
            }
            Err(_) => {
                let _ignored = join.join();
                return Err(HotkeyError::Stopped);
            }
        }
        Ok(Self {
            tx,
            platform,
            join: Arc::new(Mutex::new(Some(join))),
            bindings,
        })
    }

    /// Replace the active bindings and wait for the report.
    pub async fn apply(&self, bindings: Vec<HotkeyBinding>) -> Result<ApplyReport, HotkeyError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HotkeyCommand::Apply(bindings, reply))
            .map_err(|_| HotkeyError::Stopped)?;
        rx.await.map_err(|_| HotkeyError::Stopped)
    }

    /// Chords registered and disabled right now.
    pub fn bindings(&self) -> BindingSnapshot {
        self.bindings.borrow().clone()
    }

    /// Change the pump wait used from the next iteration.
    pub fn set_pump_interval(&self, interval: Duration) {
        let _ignored = self.tx.send(HotkeyCommand::PumpInterval(interval));
    }

    /// True while the thread is running.
    pub fn is_running(&self) -> bool {
        self.join
            .lock()
            .as_ref()
            .is_some_and(|j| !j.is_finished())
    }

    /// Stop the thread and wait for it. Blocks for at most about one pump interval.
    pub fn shutdown(&self) {
        let _ignored = self.tx.send(HotkeyCommand::Shutdown);
        if let Err(e) = self.platform.stop_service() {
            debug!(error = %e, "stop_service_failed");
        }
        let join = self.join.lock().take();
        if let Some(j) = join
            && j.join().is_err()
        {
            error!("hotkey_thread_panicked");
        }
    }
}

/// State owned by the hotkey thread.
struct Worker {
    /// Backend.
    platform: Arc<dyn Platform>,
    /// Where presses go.
    orchestrator: OrchestratorHandle,
    /// Pump wait.
    interval: Duration,
    /// Service-wide cancellation.
    token: CancellationToken,
    /// Bindings.
    table: BindingTable,
    /// Where the current bindings are published.
    published: watch::Sender<BindingSnapshot>,
}

impl Worker {
    /// Handle one command. Returns false when the thread should exit.
    fn command(&mut self, cmd: HotkeyCommand) -> bool {
        match cmd {
            HotkeyCommand::Apply(bindings, reply) => {
                let report = self.table.apply(self.platform.as_ref(), &bindings);
                self.publish(report.registered.clone());
                let _ignored = reply.send(report);
            }
            HotkeyCommand::Disable(chord) => {
                self.table.disable(self.platform.as_ref(), chord);
                let registered = self
                    .published
                    .borrow()
                    .registered
                    .iter()
                    .copied()
                    .filter(|c| *c != chord)
                    .collect();
                self.publish(registered);
                info!(%chord, "hotkey_disabled");
            }
            HotkeyCommand::PumpInterval(d) => self.interval = d,
            HotkeyCommand::Shutdown => return false,
        }
        true
    }

    /// Publish `registered` with the current disabled set.
    fn publish(&self, registered: Vec<Chord>) {
        self.published.send_replace(BindingSnapshot {
            registered,
            disabled: self.table.disabled(),
        });
    }

    /// Route one press to the orchestrator.
    fn dispatch(&self, handle: HotkeyHandle) {
        let Some((chord, action)) = self.table.lookup(handle) else {
            debug!(%handle, "hotkey_unknown_handle");
            return;
        };
        debug!(%chord, ?action, "hotkey_fired");
        if let Err(e) = self
            .orchestrator
            .enqueue(action.theme(), Origin::Hotkey(chord))
        {
            warn!(%chord, error = %e, "hotkey_dispatch_failed");
        }
    }

    /// Thread body.
    fn run(mut self, rx: &Receiver<HotkeyCommand>, ready: &Sender<Result<(), PlatformError>>) {
        if let Err(e) = self.platform.start_service() {
            error!(error = %e, "event_surface_bind_failed");
            let _ignored = ready.send(Err(e));
            return;
        }
        let _ignored = ready.send(Ok(()));
        debug!(backend = self.platform.name(), "hotkey_thread_started");

        'outer: while !self.token.is_cancelled() {
            loop {
                match rx.try_recv() {
                    Ok(cmd) => {
                        if !self.command(cmd) {
                            break 'outer;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => break 'outer,
                }
            }
            match self.platform.pump_events(self.interval) {
                Ok(batch) => {
                    for ev in batch {
                        match ev {
                            PlatformEvent::HotkeyFired(h) => self.dispatch(h),
                            PlatformEvent::ShutdownRequested => {
                                info!("os_shutdown_requested");
                                self.token.cancel();
                                break 'outer;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "pump_events_failed");
                    thread::sleep(self.interval);
                }
            }
        }
        self.table.clear(self.platform.as_ref());
        self.publish(Vec::new());
        debug!("hotkey_thread_exit");
    }
}
