//! Hot reload: shared snapshot cell and debounced file watcher.

use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, bounded, select, unbounded};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{Config, ConfigDiff, ConfigError, Result, digest, loader::parse_bytes};

/// Wait used when no change is pending; the stop channel interrupts it.
const IDLE_WAIT: Duration = Duration::from_secs(3600);

/// The current configuration snapshot, shared between reload paths.
///
/// Every swap assigns the next revision and reports what changed relative to
/// the snapshot it replaced.
#[derive(Debug, Clone)]
pub struct ConfigCell {
    /// Latest snapshot.
    inner: Arc<Mutex<Arc<Config>>>,
}

impl ConfigCell {
    /// Cell holding `initial`.
    pub fn new(initial: Config) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Arc::new(initial))),
        }
    }

    /// Current snapshot.
    pub fn get(&self) -> Arc<Config> {
        self.inner.lock().clone()
    }

    /// Replace the snapshot with `next`, returning it and the diff.
    pub fn swap(&self, next: Config) -> (Arc<Config>, ConfigDiff) {
        let mut guard = self.inner.lock();
        let diff = ConfigDiff::between(&guard, &next);
        let next = Arc::new(next.with_revision(guard.revision + 1));
        *guard = next.clone();
        (next, diff)
    }

    /// Load `path` and swap it in. The old snapshot is kept on failure.
    pub fn reload(&self, path: &Path) -> Result<(Arc<Config>, ConfigDiff)> {
        let bytes = fs::read(path).map_err(|e| ConfigError::Read {
            path: Some(path.to_path_buf()),
            message: e.to_string(),
        })?;
        let cfg = parse_bytes(path, &bytes)?;
        Ok(self.swap(cfg))
    }
}

/// Change callback invoked from the watcher thread.
pub type OnChange = Box<dyn Fn(Arc<Config>, ConfigDiff) + Send + 'static>;

/// Watches a config file and reloads it after a quiet period.
///
/// The parent directory is watched rather than the file itself so that
/// editors which write a temporary file and rename it are picked up. Content
/// is hashed, so a touch that leaves the bytes unchanged does not reload.
pub struct ConfigWatcher {
    /// Keeps the OS watch alive.
    _watcher: RecommendedWatcher,
    /// Dropping or sending stops the debounce thread.
    stop: Option<Sender<()>>,
    /// Debounce thread.
    thread: Option<JoinHandle<()>>,
}

/// State owned by the debounce thread.
struct Debouncer {
    /// Watched file.
    path: PathBuf,
    /// File name used to filter directory events.
    name: Option<OsString>,
    /// Shared snapshot.
    cell: ConfigCell,
    /// Digest of the last content seen by this thread.
    last_digest: Option<[u8; 32]>,
    /// Listener.
    on_change: OnChange,
}

impl Debouncer {
    /// True when `ev` concerns the watched file.
    fn touches(&self, ev: &Event) -> bool {
        if matches!(ev.kind, EventKind::Access(_)) {
            return false;
        }
        ev.paths
            .iter()
            .any(|p| p.file_name().map(OsString::from) == self.name)
    }

    /// Re-read the file after the quiet period.
    fn settle(&mut self) {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "config_reload_read_failed");
                return;
            }
        };
        let d = digest(&bytes);
        // Another reload path may already have swapped these bytes in.
        if self.last_digest == Some(d) || self.cell.get().digest == Some(d) {
            debug!(path = %self.path.display(), "config_content_unchanged");
            return;
        }
        self.last_digest = Some(d);
        match parse_bytes(&self.path, &bytes) {
            Ok(cfg) => {
                let (snapshot, diff) = self.cell.swap(cfg);
                info!(revision = snapshot.revision, changed = %diff, "config_reloaded");
                if !diff.is_empty() {
                    (self.on_change)(snapshot, diff);
                }
            }
            Err(e) => warn!(error = %e.pretty(), "config_reload_rejected"),
        }
    }

    /// Debounce loop. Returns when `stop` fires or is dropped.
    fn run(
        mut self,
        events: &Receiver<notify::Result<Event>>,
        stop: &Receiver<()>,
        quiet: Duration,
        mut pending: Option<Instant>,
    ) {
        loop {
            let wait = pending.map_or(IDLE_WAIT, |at| at.saturating_duration_since(Instant::now()));
            select! {
                recv(stop) -> _ => break,
                recv(events) -> msg => match msg {
                    Ok(Ok(ev)) if self.touches(&ev) => pending = Some(Instant::now() + quiet),
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!(error = %e, "config_watch_error"),
                    Err(_) => break,
                },
                default(wait) => {
                    if pending.take().is_some() {
                        self.settle();
                    }
                }
            }
        }
        debug!(path = %self.path.display(), "config_watcher_stopped");
    }
}

impl ConfigWatcher {
    /// Start watching `path`. `on_change` runs on the watcher thread after each
    /// accepted reload that changed at least one section.
    pub fn spawn<F>(path: &Path, cell: ConfigCell, debounce: Duration, on_change: F) -> Result<Self>
    where
        F: Fn(Arc<Config>, ConfigDiff) + Send + 'static,
    {
        let watch_err = |e: notify::Error| ConfigError::Read {
            path: Some(path.to_path_buf()),
            message: format!("cannot watch: {e}"),
        };
        let (ev_tx, ev_rx) = unbounded();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ignored = ev_tx.send(res);
            },
            notify::Config::default(),
        )
        .map_err(watch_err)?;
        let dir = match path.parent() {
            Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(watch_err)?;

        // The baseline is the content the current snapshot was parsed from. An
        // edit saved before the watch was armed is picked up straight away.
        let baseline = cell.get().digest;
        let on_disk = fs::read(path).ok().map(|b| digest(&b));
        let pending = (on_disk.is_some() && on_disk != baseline).then(Instant::now);
        if pending.is_some() {
            debug!(path = %path.display(), "config_changed_before_watch");
        }
        let debouncer = Debouncer {
            path: path.to_path_buf(),
            name: path.file_name().map(OsString::from),
            cell,
            last_digest: baseline,
            on_change: Box::new(on_change),
        };
        let (stop_tx, stop_rx) = bounded(1);
        let thread = thread::Builder::new()
            .name("umbra-config-watch".into())
            .spawn(move || debouncer.run(&ev_rx, &stop_rx, debounce, pending))
            .map_err(|e| ConfigError::Read {
                path: Some(path.to_path_buf()),
                message: format!("cannot start watcher thread: {e}"),
            })?;
        info!(path = %path.display(), debounce_ms = debounce.as_millis() as u64, "config_watcher_started");
        Ok(Self {
            _watcher: watcher,
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }

    /// Stop the debounce thread and wait for it.
    pub fn stop(mut self) {
        self.shutdown();
    }

    /// Signal and join the thread once.
    fn shutdown(&mut self) {
        if let Some(tx) = self.stop.take() {
            let _ignored = tx.try_send(());
        }
        if let Some(t) = self.thread.take()
            && t.join().is_err()
        {
            warn!("config_watcher_thread_panicked");
        }
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
