//! Control server.
//!
//! Loopback TCP, one JSON frame per line. Each connection runs in its own
//! task and answers every request before reading the next one. The pool is
//! bounded by a semaphore; a client arriving when every slot is taken gets a
//! single `Busy` frame and is closed.
//!
//! Shutdown: when the token is cancelled the listener stops accepting, idle
//! connections close, and a connection that is mid-command writes its
//! response first. [`ControlServer::run`] returns once every connection task
//! has finished.

use std::{
    net::SocketAddr,
    path::PathBuf,
    result::Result as StdResult,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::{
    io::{self, AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::{Semaphore, mpsc},
    time::timeout,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, trace, warn};
use umbra_config::ConfigCell;
use umbra_engine::{HotkeyControl, OrchestratorError, OrchestratorHandle, Origin};
use umbra_platform::Theme;

use crate::{
    IpcError, Result,
    coordinator::ServiceEvent,
    protocol::{
        Command, MAX_FRAME, PingReply, ReloadReply, Request, Response, StatusReply, ThemeReply,
    },
};

/// Upper bound on writing one response.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything a connection needs to serve commands.
#[derive(Clone)]
pub struct ControlContext {
    /// Theme requests.
    pub orchestrator: OrchestratorHandle,
    /// Current config snapshot; also the reload entry point.
    pub config: ConfigCell,
    /// Config file behind `config`.
    pub config_path: PathBuf,
    /// Coordinator inbox.
    pub events: mpsc::UnboundedSender<ServiceEvent>,
    /// Hotkey thread, for the bindings it currently holds.
    pub hotkeys: HotkeyControl,
    /// Service start.
    pub started: Instant,
    /// Backend name.
    pub backend: &'static str,
    /// Cancelled by the `shutdown` command.
    pub shutdown: CancellationToken,
}

/// Error frame for an orchestrator failure.
fn orchestrator_error(e: &OrchestratorError) -> Response {
    Response::error(e.code(), e.to_string())
}

impl ControlContext {
    /// Check the request token against the current config.
    fn authorize(&self, req: &Request) -> StdResult<(), IpcError> {
        match &self.config.get().service.token {
            Some(expected) if req.token.as_deref() != Some(expected.as_str()) => {
                Err(IpcError::Unauthorized)
            }
            _ => Ok(()),
        }
    }

    /// Apply a theme and report the recorded result.
    async fn set_theme(&self, theme: Theme) -> Response {
        match self.orchestrator.request(theme, Origin::Ipc).await {
            Ok(applied) => Response::ok(&ThemeReply {
                theme: applied,
                generation: self.orchestrator.state().generation,
            }),
            Err(e) => orchestrator_error(&e),
        }
    }

    /// Reload the config file and hand the result to the coordinator.
    fn reload(&self) -> Response {
        match self.config.reload(&self.config_path) {
            Ok((cfg, diff)) => {
                info!(revision = cfg.revision, changed = %diff, "config_reloaded_by_command");
                let changed = diff.sections().into_iter().map(str::to_string).collect();
                let revision = cfg.revision;
                if !diff.is_empty()
                    && self
                        .events
                        .send(ServiceEvent::ConfigChanged { config: cfg, diff })
                        .is_err()
                {
                    return Response::from_ipc(&IpcError::Internal(
                        "coordinator is not running".into(),
                    ));
                }
                Response::ok(&ReloadReply { revision, changed })
            }
            Err(e) => {
                warn!(code = e.code(), error = %e, "config_reload_rejected");
                Response::error(e.code(), e.to_string())
            }
        }
    }

    /// Assemble the status payload.
    fn status(&self) -> Response {
        let state = self.orchestrator.state();
        let cfg = self.config.get();
        let bindings = self.hotkeys.bindings();
        let uptime = self.started.elapsed();
        Response::ok(&StatusReply {
            theme: state.theme,
            generation: state.generation,
            last_transition_ms: state.last_transition_ms,
            history: state.history.into_iter().collect(),
            config_path: self.config_path.clone(),
            config_revision: cfg.revision,
            hotkeys: bindings.registered,
            disabled_hotkeys: bindings.disabled,
            backend: self.backend.to_string(),
            uptime_ms: u64::try_from(uptime.as_millis()).unwrap_or(u64::MAX),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    /// Serve one frame. Returns the response and the parsed command, if any.
    pub async fn handle_line(&self, line: &str) -> (Response, Option<Command>) {
        let req: Request = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                let err = IpcError::MalformedCommand(format!("invalid frame: {e}"));
                return (Response::from_ipc(&err), None);
            }
        };
        if let Err(e) = self.authorize(&req) {
            warn!(command = %req.command, "control_unauthorized");
            return (Response::from_ipc(&e), None);
        }
        let cmd = match Command::parse(&req) {
            Ok(c) => c,
            Err(e) => return (Response::from_ipc(&e), None),
        };
        debug!(command = cmd.name(), "control_command");
        let resp = match cmd {
            Command::GetTheme => {
                let state = self.orchestrator.state();
                Response::ok(&ThemeReply {
                    theme: state.theme,
                    generation: state.generation,
                })
            }
            Command::SetTheme(theme) => self.set_theme(theme).await,
            Command::ToggleTheme => self.set_theme(Theme::FollowSystem).await,
            Command::ReloadConfig => self.reload(),
            Command::GetStatus => self.status(),
            Command::Ping => Response::ok(&PingReply {
                version: env!("CARGO_PKG_VERSION").to_string(),
            }),
            Command::Shutdown => Response::ok(&()),
        };
        (resp, Some(cmd))
    }
}

/// Read one frame into `buf`, rejecting lines longer than [`MAX_FRAME`].
async fn read_frame<R: AsyncBufRead + Unpin>(reader: &mut R, buf: &mut String) -> io::Result<usize> {
    let limit = u64::try_from(MAX_FRAME).unwrap_or(u64::MAX);
    let n = (&mut *reader).take(limit).read_line(buf).await?;
    if n >= MAX_FRAME && !buf.ends_with('\n') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame exceeds {MAX_FRAME} bytes"),
        ));
    }
    Ok(n)
}

/// Write one frame.
async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, resp: &Response) -> io::Result<()> {
    let line = resp.to_line();
    match timeout(WRITE_TIMEOUT, writer.write_all(line.as_bytes())).await {
        Ok(res) => res,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "response write timed out")),
    }
}

/// Serve one connection until EOF, error, or shutdown.
async fn serve_connection(stream: TcpStream, peer: SocketAddr, ctx: ControlContext, token: CancellationToken) {
    debug!(%peer, "control_connection_opened");
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut line = String::new();
    let mut served = 0u64;
    loop {
        line.clear();
        let read = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            r = read_frame(&mut reader, &mut line) => r,
        };
        match read {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(%peer, error = %e, "control_read_failed");
                if e.kind() == io::ErrorKind::InvalidData {
                    let err = IpcError::MalformedCommand(e.to_string());
                    let _ignored = write_frame(&mut write, &Response::from_ipc(&err)).await;
                }
                break;
            }
        }
        let frame = line.trim();
        if frame.is_empty() {
            continue;
        }
        let (resp, cmd) = ctx.handle_line(frame).await;
        served += 1;
        trace!(%peer, ok = resp.is_ok(), "control_response");
        if let Err(e) = write_frame(&mut write, &resp).await {
            // The command already ran; only the reply is lost.
            debug!(%peer, error = %e, "control_client_gone");
            break;
        }
        if cmd == Some(Command::Shutdown) {
            info!(%peer, "shutdown_requested_by_client");
            ctx.shutdown.cancel();
            break;
        }
    }
    let _ignored = write.shutdown().await;
    debug!(%peer, served, "control_connection_closed");
}

/// Tell a client the pool is full, then close.
async fn reject_busy(mut stream: TcpStream, peer: SocketAddr, limit: usize) {
    warn!(%peer, limit, "control_connection_rejected");
    let _ignored = write_frame(&mut stream, &Response::from_ipc(&IpcError::Busy(limit))).await;
    let _ignored = stream.shutdown().await;
}

/// Bound control server, ready to run.
pub struct ControlServer {
    /// Listening socket.
    listener: TcpListener,
    /// Shared command context.
    ctx: ControlContext,
    /// Connection slots.
    slots: Arc<Semaphore>,
    /// Slot count, for `Busy` frames.
    max_connections: usize,
}

impl ControlServer {
    /// Bind to `addr`. Use port 0 for an ephemeral port.
    pub async fn bind(addr: SocketAddr, max_connections: usize, ctx: ControlContext) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            ctx,
            slots: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `token` is cancelled, then drain.
    pub async fn run(self, token: CancellationToken) {
        let tracker = TaskTracker::new();
        let addr = self.listener.local_addr().ok();
        info!(addr = ?addr, max_connections = self.max_connections, "control_server_listening");
        loop {
            let (stream, peer) = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                r = self.listener.accept() => match r {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "control_accept_failed");
                        continue;
                    }
                },
            };
            match self.slots.clone().try_acquire_owned() {
                Ok(permit) => {
                    let ctx = self.ctx.clone();
                    let token = token.clone();
                    tracker.spawn(async move {
                        let _permit = permit;
                        serve_connection(stream, peer, ctx, token).await;
                    });
                }
                Err(_) => {
                    tracker.spawn(reject_busy(stream, peer, self.max_connections));
                }
            }
        }
        drop(self.listener);
        tracker.close();
        debug!(open = tracker.len(), "control_server_draining");
        tracker.wait().await;
        info!("control_server_stopped");
    }
}
