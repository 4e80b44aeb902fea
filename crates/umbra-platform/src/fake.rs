//! In-memory backend for tests.
//!
//! `FakePlatform` behaves like a well-mannered OS: theme writes land in a
//! field, hotkeys are tracked in a table, and the event pump blocks on a
//! channel that tests feed through [`FakePlatform::fire`]. Failures are
//! scripted per call so orchestrator retry and revert paths can be driven
//! deterministically.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::atomic::{AtomicUsize, Ordering},
    thread,
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use tracing::trace;

use crate::{
    Chord, HandleAllocator, HotkeyHandle, Platform, PlatformError, PlatformEvent, PlatformEvents,
    Result, Theme, ThemeBackup,
};

/// Key used for the single flag this backend stores in a backup.
const BACKUP_KEY: &str = "light";

/// Mutable state behind the fake's lock.
#[derive(Debug)]
struct Inner {
    /// Theme currently "applied".
    theme: Theme,
    /// Scripted results consumed by successive `set_theme` calls.
    set_script: VecDeque<PlatformError>,
    /// When set, every `set_theme` fails with a clone of this error.
    set_always: Option<PlatformError>,
    /// When set, `set_theme` writes the theme and then fails with this error.
    partial_once: Option<PlatformError>,
    /// Every successfully applied theme, in order.
    applied: Vec<Theme>,
    /// Number of `set_theme` calls, successful or not.
    set_calls: usize,
    /// Active registrations.
    hotkeys: HashMap<HotkeyHandle, Chord>,
    /// Chords claimed by "another process".
    claimed: HashSet<Chord>,
    /// Chords the OS refuses for lack of rights.
    denied: HashSet<Chord>,
    /// Number of `restore_backup` calls.
    restores: usize,
    /// True between `start_service` and the pump observing shutdown.
    started: bool,
}

/// Scriptable in-memory implementation of [`Platform`].
#[derive(Debug)]
pub struct FakePlatform {
    /// Shared mutable state.
    inner: Mutex<Inner>,
    /// Handle ids.
    ids: HandleAllocator,
    /// Injected OS events.
    event_tx: Sender<PlatformEvent>,
    /// Pump side of the injected events.
    event_rx: Receiver<PlatformEvent>,
    /// Artificial latency for `set_theme`.
    delay: Mutex<Duration>,
    /// Mutations currently executing.
    in_flight: AtomicUsize,
    /// Highest concurrent mutation count ever observed.
    max_in_flight: AtomicUsize,
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self::new(Theme::Light)
    }
}

impl FakePlatform {
    /// Fake whose applied theme starts at `theme`.
    pub fn new(theme: Theme) -> Self {
        let (event_tx, event_rx) = unbounded();
        Self {
            inner: Mutex::new(Inner {
                theme,
                set_script: VecDeque::new(),
                set_always: None,
                partial_once: None,
                applied: Vec::new(),
                set_calls: 0,
                hotkeys: HashMap::new(),
                claimed: HashSet::new(),
                denied: HashSet::new(),
                restores: 0,
                started: false,
            }),
            ids: HandleAllocator::new(1, u32::MAX),
            event_tx,
            event_rx,
            delay: Mutex::new(Duration::ZERO),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Queue an error for the next `set_theme` call. Queued errors are consumed in order.
    pub fn fail_next_set(&self, err: PlatformError) {
        self.inner.lock().set_script.push_back(err);
    }

    /// Make every `set_theme` call fail until cleared with `None`.
    pub fn fail_all_sets(&self, err: Option<PlatformError>) {
        self.inner.lock().set_always = err;
    }

    /// Next `set_theme` writes the flag, then reports `err` (a partial apply).
    pub fn partial_next_set(&self, err: PlatformError) {
        self.inner.lock().partial_once = Some(err);
    }

    /// Sleep this long inside every `set_theme` call.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Pretend another process already owns `chord`.
    pub fn claim_elsewhere(&self, chord: Chord) {
        self.inner.lock().claimed.insert(chord);
    }

    /// Pretend the OS refuses `chord` for lack of rights.
    pub fn deny(&self, chord: Chord) {
        self.inner.lock().denied.insert(chord);
    }

    /// Overwrite the applied theme without recording a mutation (external change).
    pub fn set_external_theme(&self, theme: Theme) {
        self.inner.lock().theme = theme;
    }

    /// Theme currently applied.
    pub fn theme(&self) -> Theme {
        self.inner.lock().theme
    }

    /// Successfully applied themes in call order.
    pub fn applied(&self) -> Vec<Theme> {
        self.inner.lock().applied.clone()
    }

    /// Number of `set_theme` calls made, including failures.
    pub fn set_calls(&self) -> usize {
        self.inner.lock().set_calls
    }

    /// Number of `restore_backup` calls made.
    pub fn restores(&self) -> usize {
        self.inner.lock().restores
    }

    /// Highest number of overlapping `set_theme` calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Chords currently registered, sorted.
    pub fn registered(&self) -> Vec<Chord> {
        let mut out: Vec<Chord> = self.inner.lock().hotkeys.values().copied().collect();
        out.sort();
        out
    }

    /// Handle currently registered for `chord`, if any.
    pub fn handle_for(&self, chord: &Chord) -> Option<HotkeyHandle> {
        self.inner
            .lock()
            .hotkeys
            .iter()
            .find_map(|(h, c)| (c == chord).then_some(*h))
    }

    /// Simulate a press of `chord`. Returns false when the chord is not registered.
    pub fn fire(&self, chord: &Chord) -> bool {
        match self.handle_for(chord) {
            Some(h) => self.event_tx.send(PlatformEvent::HotkeyFired(h)).is_ok(),
            None => false,
        }
    }

    /// Inject a raw event into the pump.
    pub fn inject(&self, ev: PlatformEvent) {
        let _ignored = self.event_tx.send(ev);
    }

    /// True while the event surface is bound.
    pub fn is_started(&self) -> bool {
        self.inner.lock().started
    }
}

impl Platform for FakePlatform {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn set_theme(&self, theme: Theme) -> Result<()> {
        if !theme.is_concrete() {
            return Err(PlatformError::NotSupported(
                "follow_system must be resolved before reaching the backend".into(),
            ));
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        let res = {
            let mut inner = self.inner.lock();
            inner.set_calls += 1;
            if let Some(err) = inner.set_script.pop_front() {
                Err(err)
            } else if let Some(err) = inner.set_always.clone() {
                Err(err)
            } else if let Some(err) = inner.partial_once.take() {
                inner.theme = theme;
                Err(err)
            } else {
                inner.theme = theme;
                inner.applied.push(theme);
                Ok(())
            }
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        trace!(?theme, ok = res.is_ok(), "fake_set_theme");
        res
    }

    fn current_theme(&self) -> Result<Theme> {
        Ok(self.inner.lock().theme)
    }

    fn register_hotkey(&self, chord: &Chord) -> Result<HotkeyHandle> {
        let mut inner = self.inner.lock();
        if inner.denied.contains(chord) {
            return Err(PlatformError::PermissionDenied(format!("{chord} refused")));
        }
        if inner.claimed.contains(chord) || inner.hotkeys.values().any(|c| c == chord) {
            return Err(PlatformError::ResourceBusy(format!(
                "{chord} is registered elsewhere"
            )));
        }
        let handle = self.ids.allocate()?;
        inner.hotkeys.insert(handle, *chord);
        Ok(handle)
    }

    fn unregister_hotkey(&self, handle: HotkeyHandle) -> Result<()> {
        self.inner.lock().hotkeys.remove(&handle);
        Ok(())
    }

    fn pump_events(&self, timeout: Duration) -> Result<PlatformEvents> {
        let mut batch = PlatformEvents::empty();
        if let Ok(first) = self.event_rx.recv_timeout(timeout) {
            batch.push(first);
            while let Ok(ev) = self.event_rx.try_recv() {
                batch.push(ev);
            }
        }
        if batch.clone().any(|e| e == PlatformEvent::ShutdownRequested) {
            self.inner.lock().started = false;
        }
        Ok(batch)
    }

    fn start_service(&self) -> Result<()> {
        self.inner.lock().started = true;
        Ok(())
    }

    fn stop_service(&self) -> Result<()> {
        let _ignored = self.event_tx.send(PlatformEvent::ShutdownRequested);
        Ok(())
    }

    fn capture_backup(&self) -> Result<ThemeBackup> {
        let mut backup = ThemeBackup::default();
        let light = u32::from(self.inner.lock().theme == Theme::Light);
        backup.values.insert(BACKUP_KEY.to_string(), light);
        Ok(backup)
    }

    fn restore_backup(&self, backup: &ThemeBackup) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.restores += 1;
        if let Some(v) = backup.values.get(BACKUP_KEY) {
            inner.theme = if *v == 1 { Theme::Light } else { Theme::Dark };
        }
        Ok(())
    }
}
