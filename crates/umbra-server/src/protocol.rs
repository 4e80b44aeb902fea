//! Control channel wire format.
//!
//! Frames are single lines of JSON. A client sends a [`Request`] and reads
//! exactly one [`Response`] before sending the next.
//!
//! ```text
//! -> {"command":"set-theme","args":{"value":"dark"},"token":"s3cret"}
//! <- {"status":"ok","payload":{"theme":"dark","generation":4}}
//! -> {"command":"bogus"}
//! <- {"status":"error","code":"MalformedCommand","message":"unknown command 'bogus'"}
//! ```
use std::path::PathBuf;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use umbra_engine::HistoryEntry;
use umbra_platform::Theme;
use win_keycode::Chord;

use crate::{Error, IpcError};

/// Longest accepted frame, newline included.
pub const MAX_FRAME: usize = 64 * 1024;

/// Request frame as sent by clients.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Request {
    /// Command name, e.g. `get-theme`.
    pub command: String,
    /// Command arguments.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub args: Map<String, Value>,
    /// Shared secret, when the server requires one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Request {
    /// Request for `command` with no arguments.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// Add an argument.
    pub fn arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.args.insert(key.to_string(), value.into());
        self
    }

    /// Attach a token.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Required string argument.
    fn str_arg(&self, key: &str) -> Result<&str, IpcError> {
        match self.args.get(key) {
            Some(Value::String(s)) => Ok(s),
            Some(other) => Err(IpcError::MalformedCommand(format!(
                "{}: argument '{key}' must be a string, got {other}",
                self.command
            ))),
            None => Err(IpcError::MalformedCommand(format!(
                "{}: missing argument '{key}'",
                self.command
            ))),
        }
    }
}

/// Parsed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Report the recorded theme.
    GetTheme,
    /// Apply a theme; `auto` is accepted and resolves like a toggle.
    SetTheme(Theme),
    /// Flip the recorded theme.
    ToggleTheme,
    /// Re-read the config file.
    ReloadConfig,
    /// Report service status.
    GetStatus,
    /// Liveness check.
    Ping,
    /// Stop the service after replying.
    Shutdown,
}

impl Command {
    /// Interpret a request frame.
    pub fn parse(req: &Request) -> Result<Self, IpcError> {
        Ok(match req.command.as_str() {
            "get-theme" => Self::GetTheme,
            "set-theme" => {
                let value = req.str_arg("value")?;
                let theme = value
                    .parse::<Theme>()
                    .map_err(|e| IpcError::MalformedCommand(format!("set-theme: {e}")))?;
                Self::SetTheme(theme)
            }
            "toggle-theme" => Self::ToggleTheme,
            "reload-config" => Self::ReloadConfig,
            "get-status" => Self::GetStatus,
            "ping" => Self::Ping,
            "shutdown" => Self::Shutdown,
            other => {
                return Err(IpcError::MalformedCommand(format!(
                    "unknown command '{other}'"
                )));
            }
        })
    }

    /// Wire name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetTheme => "get-theme",
            Self::SetTheme(_) => "set-theme",
            Self::ToggleTheme => "toggle-theme",
            Self::ReloadConfig => "reload-config",
            Self::GetStatus => "get-status",
            Self::Ping => "ping",
            Self::Shutdown => "shutdown",
        }
    }

    /// Frame for this command.
    pub fn to_request(self) -> Request {
        let req = Request::new(self.name());
        match self {
            Self::SetTheme(t) => req.arg("value", t.as_str()),
            _ => req,
        }
    }
}

/// Response frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    /// Command succeeded.
    Ok {
        /// Command-specific payload; `null` when there is nothing to report.
        #[serde(default)]
        payload: Value,
    },
    /// Command failed.
    Error {
        /// Stable error code.
        code: String,
        /// Human-readable message.
        message: String,
    },
}

impl Response {
    /// Success carrying `payload`.
    pub fn ok<T: Serialize>(payload: &T) -> Self {
        match serde_json::to_value(payload) {
            Ok(payload) => Self::Ok { payload },
            Err(e) => Self::from_ipc(&IpcError::Internal(format!("encode payload: {e}"))),
        }
    }

    /// Error frame.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Error frame for a server-side failure.
    pub fn from_ipc(err: &IpcError) -> Self {
        Self::error(err.code(), err.to_string())
    }

    /// True for `status: ok`.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    /// Decode the payload, or turn an error frame into [`Error::Remote`].
    pub fn into_payload<T: DeserializeOwned>(self) -> Result<T, Error> {
        match self {
            Self::Ok { payload } => Ok(serde_json::from_value(payload)?),
            Self::Error { code, message } => Err(Error::Remote { code, message }),
        }
    }

    /// Encode as one frame, newline included.
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"status":"error","code":"Internal","message":"encode response: {e}"}}"#)
        });
        line.push('\n');
        line
    }
}

/// Payload of `get-theme`, `set-theme` and `toggle-theme`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThemeReply {
    /// Recorded theme.
    pub theme: Theme,
    /// Generation of the recorded state.
    pub generation: u64,
}

/// Payload of `reload-config`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReloadReply {
    /// Revision of the snapshot now in effect.
    pub revision: u64,
    /// Sections that changed.
    pub changed: Vec<String>,
}

/// Payload of `ping`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PingReply {
    /// Server version.
    pub version: String,
}

/// Payload of `get-status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusReply {
    /// Recorded theme.
    pub theme: Theme,
    /// State generation.
    pub generation: u64,
    /// Time of the last transition, ms since the Unix epoch.
    pub last_transition_ms: u64,
    /// Recent transitions, oldest first.
    pub history: Vec<HistoryEntry>,
    /// Config file in use.
    pub config_path: PathBuf,
    /// Revision of the config snapshot in effect.
    pub config_revision: u64,
    /// Chords currently registered.
    pub hotkeys: Vec<Chord>,
    /// Chords disabled for the session after repeated failures.
    #[serde(default)]
    pub disabled_hotkeys: Vec<Chord>,
    /// Backend name.
    pub backend: String,
    /// Time since the service started.
    pub uptime_ms: u64,
    /// Server version.
    pub version: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_commands_and_arguments() {
        let req: Request =
            serde_json::from_str(r#"{"command":"set-theme","args":{"value":"Dark"}}"#)
                .expect("frame");
        assert_eq!(Command::parse(&req), Ok(Command::SetTheme(Theme::Dark)));
        let auto = Request::new("set-theme").arg("value", "auto");
        assert_eq!(
            Command::parse(&auto),
            Ok(Command::SetTheme(Theme::FollowSystem))
        );
        let bare: Request = serde_json::from_str(r#"{"command":"get-status"}"#).expect("frame");
        assert_eq!(Command::parse(&bare), Ok(Command::GetStatus));
    }

    #[test]
    fn rejects_bad_commands() {
        for req in [
            Request::new("explode"),
            Request::new("set-theme"),
            Request::new("set-theme").arg("value", 3),
            Request::new("set-theme").arg("value", "purple"),
        ] {
            let err = Command::parse(&req).expect_err("rejected");
            assert_eq!(err.code(), "MalformedCommand", "{req:?}");
        }
    }

    #[test]
    fn command_frames_parse_back() {
        for cmd in [
            Command::GetTheme,
            Command::SetTheme(Theme::Light),
            Command::ToggleTheme,
            Command::ReloadConfig,
            Command::GetStatus,
            Command::Ping,
            Command::Shutdown,
        ] {
            assert_eq!(Command::parse(&cmd.to_request()), Ok(cmd));
        }
    }

    #[test]
    fn response_wire_shape() {
        let ok = Response::ok(&ThemeReply {
            theme: Theme::Dark,
            generation: 2,
        });
        assert_eq!(
            serde_json::to_value(&ok).expect("encode"),
            json!({"status": "ok", "payload": {"theme": "dark", "generation": 2}})
        );
        let err = Response::from_ipc(&IpcError::Unauthorized);
        assert_eq!(
            serde_json::to_value(&err).expect("encode"),
            json!({"status": "error", "code": "Unauthorized", "message": "unauthorized"})
        );
        assert!(err.to_line().ends_with('\n'));
    }

    #[test]
    fn error_frames_become_remote_errors() {
        let resp: Response = serde_json::from_str(
            r#"{"status":"error","code":"PermissionDenied","message":"policy"}"#,
        )
        .expect("frame");
        let err = resp.into_payload::<ThemeReply>().expect_err("remote");
        assert_eq!(err.remote_code(), Some("PermissionDenied"));
        let unit: Response = serde_json::from_str(r#"{"status":"ok"}"#).expect("frame");
        assert_eq!(unit.into_payload::<Value>().expect("null"), Value::Null);
    }
}
