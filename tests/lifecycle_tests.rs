//! Module lifecycle through the control surface: load, unload, terminate.

mod common;

use std::sync::Arc;

use common::{ReplyModule, SpongeModule, TestHost};
use parking_lot::Mutex;
use umh::boundary::codec::status;
use umh::ipc::protocol::{HostCommand, ModuleCtrlKind};
use umh::ipc::{Message, Topic, HOST_CONTROL, MODULE_META, NO_SESSION};
use umh::module::contract::ContractInstance;
use umh::module::registry::ModuleState;

fn control(cmd: &HostCommand) -> Message {
    Message::new(
        serde_json::to_string(cmd).expect("serialize"),
        HOST_CONTROL,
        NO_SESSION,
    )
}

#[test]
fn loaded_module_is_active_and_announced() {
    let host = TestHost::new();
    let hits = Arc::new(Mutex::new(0));
    host.context
        .registry()
        .register_inproc(
            "replier",
            ContractInstance::Event(Box::new(ReplyModule::new(
                Topic::random(),
                None,
                Arc::clone(&hits),
            ))),
        )
        .unwrap();

    assert_eq!(
        host.context.registry().state_of("replier"),
        Some(ModuleState::Active)
    );

    let announcements = host.link.sent_on(MODULE_META);
    assert_eq!(announcements.len(), 1);
    let meta: umh::ipc::protocol::ModuleMeta =
        serde_json::from_str(&announcements[0].payload).unwrap();
    assert_eq!(meta.name, "replier");
    assert_eq!(meta.pid, std::process::id());
    assert_eq!(meta.topics.len(), 1);
}

#[test]
fn unload_then_unload_again_is_tolerated() {
    let host = TestHost::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    host.context
        .registry()
        .register_inproc(
            "sponge",
            ContractInstance::Broadcast(Box::new(SpongeModule {
                seen: Arc::clone(&seen),
            })),
        )
        .unwrap();

    let unload = control(&HostCommand::ctrl_module(ModuleCtrlKind::Unload, "sponge"));
    assert_eq!(host.route(&unload), status::OK);
    assert_eq!(
        host.context.registry().state_of("sponge"),
        Some(ModuleState::Unloaded)
    );

    // second unload: warned about, not failed
    assert_eq!(host.route(&unload), status::OK);
}

#[test]
fn unloaded_module_receives_nothing_further() {
    let host = TestHost::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    host.context
        .registry()
        .register_inproc(
            "sponge",
            ContractInstance::Broadcast(Box::new(SpongeModule {
                seen: Arc::clone(&seen),
            })),
        )
        .unwrap();

    let topic = Topic::random();
    host.route(&Message::new("one", topic, NO_SESSION));
    host.route(&control(&HostCommand::ctrl_module(
        ModuleCtrlKind::Unload,
        "sponge",
    )));
    host.route(&Message::new("two", topic, NO_SESSION));

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].payload, "one");
}

#[test]
fn load_of_a_missing_binary_fails_routing_only() {
    let host = TestHost::new();
    let load = control(&HostCommand::ctrl_module(ModuleCtrlKind::Load, "ghost"));
    assert_eq!(host.route(&load), status::ROUTE_FAILED);
    // host keeps running
    assert!(!host.context.termination().is_open());
}

#[test]
fn terminate_is_idempotent() {
    let host = TestHost::new();
    let terminate = control(&HostCommand::terminate());
    assert_eq!(host.route(&terminate), status::OK);
    assert!(host.context.termination().is_open());
    assert_eq!(host.route(&terminate), status::OK);
}

#[test]
fn shutdown_disposes_loaded_modules() {
    let host = TestHost::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    host.context
        .registry()
        .register_inproc(
            "sponge",
            ContractInstance::Broadcast(Box::new(SpongeModule {
                seen: Arc::clone(&seen),
            })),
        )
        .unwrap();

    host.context.shutdown();
    assert!(host.context.registry().loaded_names().is_empty());
}

#[test]
fn discovery_ignores_directories_without_a_matching_binary() {
    let host = TestHost::new();
    let modules_dir = host.context.registry().modules_dir().clone();
    std::fs::create_dir_all(modules_dir.join("empty")).unwrap();
    std::fs::create_dir_all(modules_dir.join("mismatched")).unwrap();
    std::fs::write(modules_dir.join("mismatched/other.bin"), b"x").unwrap();

    let found = host.context.registry().discover().unwrap();
    assert!(found.is_empty());
}

#[test]
fn discovery_finds_conventionally_named_binaries() {
    let host = TestHost::new();
    let modules_dir = host.context.registry().modules_dir().clone();
    let dir = modules_dir.join("echo");
    std::fs::create_dir_all(&dir).unwrap();
    let binary = format!(
        "{}echo{}",
        std::env::consts::DLL_PREFIX,
        std::env::consts::DLL_SUFFIX
    );
    std::fs::write(dir.join(binary), b"stub").unwrap();

    let found = host.context.registry().discover().unwrap();
    assert_eq!(found, vec!["echo".to_string()]);
    assert_eq!(
        host.context.registry().state_of("echo"),
        Some(ModuleState::Discovered)
    );
}

#[test]
fn auto_load_reports_progress_and_a_summary() {
    let host = TestHost::new();
    host.context.auto_load();

    let progress = host.link.progress.lock().clone();
    assert_eq!(progress.first(), Some(&0));
    assert_eq!(progress.last(), Some(&100));

    let logs = host.link.logs.lock().clone();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].contains("0 of 0"));
}
