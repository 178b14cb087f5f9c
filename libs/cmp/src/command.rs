//! Command dispatch seam
//!
//! `CmpStub` and `CmpEngine` both sit behind `CommandHandler`; the window's
//! `__tcfapi` slot holds whichever is current.

use cmp_config::protocol::{commands, TCF_API_MAJOR_VERSION};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::CmpError;
use crate::response::ApiResponse;

/// `(payload, success)`; invoked exactly once per call except for
/// `addEventListener`, which keeps firing until removed
pub type ApiCallback = Arc<dyn Fn(Option<ApiResponse>, bool) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Ping,
    GetTcData,
    GetInAppTcData,
    GetVendorList,
    AddEventListener,
    RemoveEventListener,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Ping => commands::PING,
            Command::GetTcData => commands::GET_TC_DATA,
            Command::GetInAppTcData => commands::GET_IN_APP_TC_DATA,
            Command::GetVendorList => commands::GET_VENDOR_LIST,
            Command::AddEventListener => commands::ADD_EVENT_LISTENER,
            Command::RemoveEventListener => commands::REMOVE_EVENT_LISTENER,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = CmpError;

    /// Command names are case-sensitive on the wire
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            commands::PING => Ok(Command::Ping),
            commands::GET_TC_DATA => Ok(Command::GetTcData),
            commands::GET_IN_APP_TC_DATA => Ok(Command::GetInAppTcData),
            commands::GET_VENDOR_LIST => Ok(Command::GetVendorList),
            commands::ADD_EVENT_LISTENER => Ok(Command::AddEventListener),
            commands::REMOVE_EVENT_LISTENER => Ok(Command::RemoveEventListener),
            other => Err(CmpError::UnknownCommand(other.to_string())),
        }
    }
}

/// `0` asks for the current version
pub fn is_supported_version(version: u32) -> bool {
    version == 0 || version == TCF_API_MAJOR_VERSION
}

/// One invocation of the command function
#[derive(Clone)]
pub struct ApiCall {
    pub command: String,
    pub version: u32,
    pub callback: ApiCallback,
    pub parameter: Option<Value>,
}

impl ApiCall {
    pub fn new(
        command: impl Into<String>,
        version: u32,
        callback: ApiCallback,
        parameter: Option<Value>,
    ) -> Self {
        Self {
            command: command.into(),
            version,
            callback,
            parameter,
        }
    }

    pub fn respond(&self, response: Option<ApiResponse>, success: bool) {
        (self.callback)(response, success);
    }

    pub fn fail(&self) {
        self.respond(None, false);
    }
}

impl fmt::Debug for ApiCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCall")
            .field("command", &self.command)
            .field("version", &self.version)
            .field("parameter", &self.parameter)
            .finish()
    }
}

/// Anything that can sit in the `__tcfapi` slot
///
/// `handle` must not block: synchronous commands answer inline, the rest
/// spawn and answer later.
pub trait CommandHandler: Send + Sync {
    fn handle(&self, call: ApiCall);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_names_round_trip() {
        for command in [
            Command::Ping,
            Command::GetTcData,
            Command::GetInAppTcData,
            Command::GetVendorList,
            Command::AddEventListener,
            Command::RemoveEventListener,
        ] {
            assert_eq!(command.as_str().parse::<Command>().unwrap(), command);
        }
    }

    #[test]
    fn test_unknown_and_miscased_commands_rejected() {
        assert!(matches!("getTcData".parse::<Command>(), Err(CmpError::UnknownCommand(_))));
        assert!("".parse::<Command>().is_err());
    }

    #[test]
    fn test_supported_versions() {
        assert!(is_supported_version(0));
        assert!(is_supported_version(2));
        assert!(!is_supported_version(1));
        assert!(!is_supported_version(3));
    }
}
