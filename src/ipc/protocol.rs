//! JSON payloads of the control plane.
//!
//! Command kinds travel as integers on the wire (the controller side
//! serializes enums numerically), so every enum here converts through its
//! discriminant rather than its name.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::ipc::Topic;

/// Unknown integer discriminant in a wire enum.
#[derive(Debug, Error)]
#[error("unknown {kind} command discriminant {value}")]
pub struct UnknownCommand {
    kind: &'static str,
    value: u8,
}

macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident : $kind:literal { $($variant:ident = $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(try_from = "u8", into = "u8")]
        pub enum $name {
            $($variant = $value),+
        }

        impl TryFrom<u8> for $name {
            type Error = UnknownCommand;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok(Self::$variant),)+
                    _ => Err(UnknownCommand { kind: $kind, value }),
                }
            }
        }

        impl From<$name> for u8 {
            fn from(v: $name) -> u8 {
                v as u8
            }
        }
    };
}

wire_enum! {
    /// Top-level host command kind.
    HostCommandKind: "host" {
        Terminate = 0,
        CtrlModule = 1,
    }
}

wire_enum! {
    /// Module control action carried inside `HostCommand::args`.
    ModuleCtrlKind: "module-ctrl" {
        Load = 0,
        Unload = 1,
    }
}

wire_enum! {
    /// Config store operation.
    ConfStoreKind: "conf-store" {
        Query = 0,
        Update = 1,
    }
}

/// Payload of a message on the host-control topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostCommand {
    #[serde(rename = "Cmd")]
    pub cmd: HostCommandKind,
    /// For `CtrlModule`: a nested `ModuleCtrlArgs` JSON document.
    #[serde(rename = "Args", default, skip_serializing_if = "Option::is_none")]
    pub args: Option<String>,
}

impl HostCommand {
    pub fn terminate() -> Self {
        Self {
            cmd: HostCommandKind::Terminate,
            args: None,
        }
    }

    pub fn ctrl_module(action: ModuleCtrlKind, module: &str) -> Self {
        let args = ModuleCtrlArgs {
            cmd: action,
            module: module.to_string(),
        };
        Self {
            cmd: HostCommandKind::CtrlModule,
            // ModuleCtrlArgs serialization cannot fail: plain struct of
            // integer and string fields.
            args: serde_json::to_string(&args).ok(),
        }
    }

    /// Nested module-control arguments, when present and well-formed.
    pub fn module_ctrl(&self) -> Result<ModuleCtrlArgs, serde_json::Error> {
        let raw = self.args.as_deref().unwrap_or("");
        serde_json::from_str(raw)
    }
}

/// Arguments of `HostCommand { cmd: CtrlModule }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleCtrlArgs {
    #[serde(rename = "Cmd")]
    pub cmd: ModuleCtrlKind,
    #[serde(rename = "Module")]
    pub module: String,
}

/// Payload of a message on the conf-store topic.
///
/// `Query`: `args` is a module name (or a JSON pointer starting with `/`).
/// `Update`: `args` is an RFC 7386 merge-patch document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfStoreRequest {
    #[serde(rename = "Cmd")]
    pub cmd: ConfStoreKind,
    #[serde(rename = "Args")]
    pub args: String,
}

impl ConfStoreRequest {
    pub fn query(name: &str) -> Self {
        Self {
            cmd: ConfStoreKind::Query,
            args: name.to_string(),
        }
    }

    pub fn update(patch: &Value) -> Self {
        Self {
            cmd: ConfStoreKind::Update,
            args: patch.to_string(),
        }
    }
}

/// Module self-announcement on the module-meta topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleMeta {
    #[serde(rename = "Pid")]
    pub pid: u32,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Topics", default)]
    pub topics: Vec<String>,
}

impl ModuleMeta {
    /// Announcement for a module hosted in this process.
    pub fn for_module(name: &str, topics: &[Topic]) -> Self {
        Self {
            pid: std::process::id(),
            name: name.to_string(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
        }
    }
}
