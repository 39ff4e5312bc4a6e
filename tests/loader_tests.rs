//! Loading a real module binary end to end.
//!
//! Builds the echo demo as a dynamic library with the toolchain that is
//! running these tests, installs it under the host's modules directory, and
//! drives the full lifecycle through the control surface.

mod common;

use std::path::PathBuf;
use std::process::Command;

use common::TestHost;
use umh::boundary::codec::status;
use umh::ipc::protocol::{HostCommand, ModuleCtrlKind, ModuleMeta};
use umh::ipc::{Message, Topic, HOST_CONTROL, MODULE_META, NO_SESSION};
use umh::module::registry::ModuleState;

// Must match the topics the echo demo declares.
const ECHO_REQUEST: Topic = Topic::from_u128(0xD8A4C3F0_1F52_4A7E_9B0D_5E7F3C2A9B11);
const ECHO_REPLY: Topic = Topic::from_u128(0xD8A4C3F0_1F52_4A7E_9B0D_5E7F3C2A9B12);

fn control(cmd: &HostCommand) -> Message {
    Message::new(
        serde_json::to_string(cmd).expect("serialize"),
        HOST_CONTROL,
        NO_SESSION,
    )
}

/// Build the echo demo and return the path of its dynamic library.
fn built_echo_binary() -> PathBuf {
    let manifest = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let cargo = std::env::var("CARGO").unwrap_or_else(|_| "cargo".to_string());
    let output = Command::new(cargo)
        .args(["build", "-p", "echo-module"])
        .current_dir(&manifest)
        .output()
        .expect("spawn cargo");
    assert!(
        output.status.success(),
        "echo-module build failed:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let target_dir = std::env::var("CARGO_TARGET_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| manifest.join("target"));
    let artifact = target_dir.join("debug").join(format!(
        "{}echo_module{}",
        std::env::consts::DLL_PREFIX,
        std::env::consts::DLL_SUFFIX
    ));
    assert!(artifact.is_file(), "missing artifact {}", artifact.display());
    artifact
}

#[test]
fn real_binary_lifecycle_round_trip() {
    let host = TestHost::new();
    let artifact = built_echo_binary();

    let dir = host.context.registry().modules_dir().join("echo");
    std::fs::create_dir_all(&dir).unwrap();
    let installed = dir.join(format!(
        "{}echo{}",
        std::env::consts::DLL_PREFIX,
        std::env::consts::DLL_SUFFIX
    ));
    std::fs::copy(&artifact, &installed).unwrap();

    let found = host.context.registry().discover().unwrap();
    assert_eq!(found, vec!["echo".to_string()]);

    let load = control(&HostCommand::ctrl_module(ModuleCtrlKind::Load, "echo"));
    assert_eq!(host.route(&load), status::OK);
    assert_eq!(
        host.context.registry().state_of("echo"),
        Some(ModuleState::Active)
    );

    let announcements = host.link.sent_on(MODULE_META);
    assert_eq!(announcements.len(), 1);
    let meta: ModuleMeta = serde_json::from_str(&announcements[0].payload).unwrap();
    assert_eq!(meta.name, "echo");
    assert_eq!(meta.pid, std::process::id());
    assert_eq!(meta.topics, vec![ECHO_REQUEST.to_string()]);

    // Delivery reaches the instance inside the loaded binary and its reply
    // makes it back out to the controller.
    assert_eq!(
        host.route(&Message::new("ping", ECHO_REQUEST, NO_SESSION)),
        status::OK
    );
    let replies = host.link.sent_on(ECHO_REPLY);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].payload, "ping");

    // Unload disposes the instance and stops delivery.
    let unload = control(&HostCommand::ctrl_module(ModuleCtrlKind::Unload, "echo"));
    assert_eq!(host.route(&unload), status::OK);
    assert_eq!(
        host.context.registry().state_of("echo"),
        Some(ModuleState::Unloaded)
    );
    assert_eq!(
        host.route(&Message::new("ping", ECHO_REQUEST, NO_SESSION)),
        status::OK
    );
    assert_eq!(host.link.sent_on(ECHO_REPLY).len(), 1);

    // A second unload is tolerated, and the module can come back.
    assert_eq!(host.route(&unload), status::OK);
    assert_eq!(host.route(&load), status::OK);
    assert_eq!(
        host.context.registry().state_of("echo"),
        Some(ModuleState::Active)
    );
    assert_eq!(
        host.route(&Message::new("again", ECHO_REQUEST, NO_SESSION)),
        status::OK
    );
    assert_eq!(host.link.sent_on(ECHO_REPLY).len(), 2);
}
