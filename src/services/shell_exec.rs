//! Shell-execution relay.
//!
//! Modules cannot open documents or launch programs on the user's desktop;
//! they publish a request on the shell-exec topic and the controller does
//! it on their behalf. The host only validates the request shape and
//! relays it; nothing is executed in this process.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::HostError;
use crate::ipc::Message;

/// A request to run something in the controller's shell context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellExecRequest {
    #[serde(rename = "File")]
    pub file: String,
    #[serde(rename = "Verb", default, skip_serializing_if = "Option::is_none")]
    pub verb: Option<String>,
    #[serde(rename = "Args", default, skip_serializing_if = "Option::is_none")]
    pub args: Option<String>,
}

#[derive(Default)]
pub struct ShellExecService;

impl ShellExecService {
    pub fn new() -> Self {
        Self
    }

    /// Validate a module-originated request before it leaves the process.
    /// The payload must parse; the controller enforces its own policy on
    /// top of that.
    pub fn validate(&self, msg: &Message) -> Result<ShellExecRequest, HostError> {
        let request: ShellExecRequest = serde_json::from_str(&msg.payload)?;
        if request.file.trim().is_empty() {
            warn!("shell-exec request with empty target dropped");
            return Err(HostError::Payload(serde::de::Error::custom(
                "shell-exec request has no target",
            )));
        }
        debug!(file = %request.file, "relaying shell-exec request");
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::{NO_SESSION, SHELL_EXEC};

    #[test]
    fn valid_request_passes_validation() {
        let svc = ShellExecService::new();
        let payload = r#"{"File":"https://example.test/docs","Verb":"open"}"#;
        let msg = Message::new(payload, SHELL_EXEC, NO_SESSION);
        let request = svc.validate(&msg).unwrap();
        assert_eq!(request.file, "https://example.test/docs");
        assert_eq!(request.verb.as_deref(), Some("open"));
    }

    #[test]
    fn empty_target_is_rejected() {
        let svc = ShellExecService::new();
        let msg = Message::new(r#"{"File":"  "}"#, SHELL_EXEC, NO_SESSION);
        assert!(svc.validate(&msg).is_err());
    }

    #[test]
    fn garbage_payload_is_rejected() {
        let svc = ShellExecService::new();
        let msg = Message::new("run this", SHELL_EXEC, NO_SESSION);
        assert!(svc.validate(&msg).is_err());
    }
}
