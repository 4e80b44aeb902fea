//! Control channel client, used by `umbra ctl` and the tests.

use std::{net::SocketAddr, time::Duration};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time::timeout,
};
use tracing::{debug, trace};
use umbra_platform::Theme;

use crate::{
    Error, Result,
    protocol::{Command, PingReply, ReloadReply, Request, Response, StatusReply, ThemeReply},
};

/// Default bound on connecting and on each round trip.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection parameters.
#[derive(Debug, Clone)]
pub struct Client {
    /// Server address.
    addr: SocketAddr,
    /// Token sent with every request.
    token: Option<String>,
    /// Connect and round-trip limit.
    timeout: Duration,
}

impl Client {
    /// Client for the server at `addr`.
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            token: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Send `token` with every request.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Override the connect and round-trip limit.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Open a connection.
    pub async fn connect(&self) -> Result<Connection> {
        let stream = timeout(self.timeout, TcpStream::connect(self.addr))
            .await
            .map_err(|_| Error::Protocol(format!("connect to {} timed out", self.addr)))??;
        debug!(addr = %self.addr, "control_client_connected");
        let (read, write) = stream.into_split();
        Ok(Connection {
            reader: BufReader::new(read),
            writer: write,
            token: self.token.clone(),
            timeout: self.timeout,
        })
    }
}

/// An open control connection. Requests are strictly sequential.
pub struct Connection {
    /// Response side.
    reader: BufReader<OwnedReadHalf>,
    /// Request side.
    writer: OwnedWriteHalf,
    /// Token sent with every request.
    token: Option<String>,
    /// Round-trip limit.
    timeout: Duration,
}

impl Connection {
    /// Send a request and read its response.
    pub async fn call(&mut self, req: Request) -> Result<Response> {
        let req = req.with_token(self.token.clone());
        let mut line = serde_json::to_string(&req)?;
        line.push('\n');
        trace!(command = %req.command, "control_client_send");
        timeout(self.timeout, self.round_trip(&line))
            .await
            .map_err(|_| Error::Protocol(format!("{} timed out", req.command)))?
    }

    /// Write one frame, read one frame.
    async fn round_trip(&mut self, line: &str) -> Result<Response> {
        self.writer.write_all(line.as_bytes()).await?;
        let mut buf = String::new();
        if self.reader.read_line(&mut buf).await? == 0 {
            return Err(Error::Protocol("server closed the connection".into()));
        }
        Ok(serde_json::from_str(buf.trim_end())?)
    }

    /// Run a command and decode its payload.
    async fn command<T: DeserializeOwned>(&mut self, cmd: Command) -> Result<T> {
        self.call(cmd.to_request()).await?.into_payload()
    }

    /// Recorded theme.
    pub async fn get_theme(&mut self) -> Result<ThemeReply> {
        self.command(Command::GetTheme).await
    }

    /// Apply `theme`.
    pub async fn set_theme(&mut self, theme: Theme) -> Result<ThemeReply> {
        self.command(Command::SetTheme(theme)).await
    }

    /// Flip the recorded theme.
    pub async fn toggle_theme(&mut self) -> Result<ThemeReply> {
        self.command(Command::ToggleTheme).await
    }

    /// Re-read the config file.
    pub async fn reload_config(&mut self) -> Result<ReloadReply> {
        self.command(Command::ReloadConfig).await
    }

    /// Service status.
    pub async fn get_status(&mut self) -> Result<StatusReply> {
        self.command(Command::GetStatus).await
    }

    /// Liveness check.
    pub async fn ping(&mut self) -> Result<PingReply> {
        self.command(Command::Ping).await
    }

    /// Ask the service to stop.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.command::<Value>(Command::Shutdown).await.map(|_| ())
    }
}
