//! The module contract: what a module binary exports and what the host hands
//! back to it.
//!
//! Two contract generations coexist. The early contract receives every
//! application message (broadcast delivery); the later contract subscribes
//! to topics and is dispatched by event id (subscription-filtered delivery).
//! The delivery discipline is a property of the contract a module
//! implements, decided at load time, never a global switch.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use thiserror::Error;
use tracing::error;

use crate::ipc::Topic;

/// Contract ABI revision. Checked against a loaded binary's declaration
/// before anything inside it runs.
pub const CONTRACT_VERSION: u32 = 2;

/// How inbound application messages reach a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Every application message, regardless of subscriptions.
    Broadcast,
    /// Only messages whose topic the module has subscribed to.
    Filtered,
}

/// Failures reported to modules calling back into the host.
#[derive(Debug, Error)]
pub enum HostApiError {
    #[error("module has been disposed")]
    Disposed,

    #[error("not subscribed to topic {0}")]
    NotSubscribed(Topic),

    #[error("host is shutting down")]
    HostUnavailable,

    #[error("outbound delivery failed: {0}")]
    Outbound(String),
}

/// Host-side capability handed to every module at initialization.
///
/// `subscribe` returns the event id that later `dispatch_event` calls for
/// that topic will carry; the mapping between the topic vocabulary and the
/// module's narrower event-id vocabulary is owned by the host adapter.
pub trait HostApi: Send + Sync {
    fn subscribe(&self, topic: Topic) -> Result<u64, HostApiError>;
    fn unsubscribe(&self, topic: Topic) -> Result<(), HostApiError>;
    fn publish(&self, topic: Topic, payload: &str, session: i32) -> Result<(), HostApiError>;
}

/// Early module contract: broadcast delivery, topic-addressed handler.
pub trait BroadcastContract: Send {
    /// Called once after activation. Returning `false` rejects the load; the
    /// host disposes the instance immediately and does not retry.
    fn initialize(&mut self, host: Arc<dyn HostApi>) -> bool;

    /// Handle one inbound message. The router blocks on this call.
    fn on_message(&mut self, payload: &str, topic: Topic, session: i32) -> bool;

    /// Disposal hook, invoked exactly once on unload or host shutdown.
    fn dispose(&mut self);
}

/// Later module contract: subscription-filtered delivery by event id.
pub trait EventContract: Send {
    /// Called once after activation; subscriptions are typically made here
    /// through the provided `HostApi`. Returning `false` rejects the load.
    fn initialize(&mut self, host: Arc<dyn HostApi>) -> bool;

    /// Handle one event previously subscribed to. `id` is the value
    /// `HostApi::subscribe` returned for the message's topic.
    fn dispatch_event(&mut self, id: u64, payload: &[u8]) -> bool;

    /// Disposal hook, invoked exactly once on unload or host shutdown.
    fn uninitialize(&mut self) -> bool;
}

impl BroadcastContract for Box<dyn BroadcastContract> {
    fn initialize(&mut self, host: Arc<dyn HostApi>) -> bool {
        (**self).initialize(host)
    }

    fn on_message(&mut self, payload: &str, topic: Topic, session: i32) -> bool {
        (**self).on_message(payload, topic, session)
    }

    fn dispose(&mut self) {
        (**self).dispose();
    }
}

impl EventContract for Box<dyn EventContract> {
    fn initialize(&mut self, host: Arc<dyn HostApi>) -> bool {
        (**self).initialize(host)
    }

    fn dispatch_event(&mut self, id: u64, payload: &[u8]) -> bool {
        (**self).dispatch_event(id, payload)
    }

    fn uninitialize(&mut self) -> bool {
        (**self).uninitialize()
    }
}

/// Wraps a module so a panic in any contract method is caught where it
/// happens and reported as a refusal instead of unwinding into the caller.
///
/// An unwind must never cross the dynamic-library boundary between a module
/// binary and the host; [`declare_module!`] therefore wraps every registered
/// instance in this guard, so the catch is compiled into the module binary
/// itself. In-process instances get the same wrapper from the registry.
pub struct PanicGuard<M>(pub M);

impl<M: BroadcastContract> BroadcastContract for PanicGuard<M> {
    fn initialize(&mut self, host: Arc<dyn HostApi>) -> bool {
        catch_unwind(AssertUnwindSafe(|| self.0.initialize(host))).unwrap_or_else(|_| {
            error!("module panicked during initialize");
            false
        })
    }

    fn on_message(&mut self, payload: &str, topic: Topic, session: i32) -> bool {
        catch_unwind(AssertUnwindSafe(|| self.0.on_message(payload, topic, session)))
            .unwrap_or_else(|_| {
                error!(%topic, "module panicked handling a message");
                false
            })
    }

    fn dispose(&mut self) {
        if catch_unwind(AssertUnwindSafe(|| self.0.dispose())).is_err() {
            error!("module panicked during dispose");
        }
    }
}

impl<M: EventContract> EventContract for PanicGuard<M> {
    fn initialize(&mut self, host: Arc<dyn HostApi>) -> bool {
        catch_unwind(AssertUnwindSafe(|| self.0.initialize(host))).unwrap_or_else(|_| {
            error!("module panicked during initialize");
            false
        })
    }

    fn dispatch_event(&mut self, id: u64, payload: &[u8]) -> bool {
        catch_unwind(AssertUnwindSafe(|| self.0.dispatch_event(id, payload))).unwrap_or_else(
            |_| {
                error!(id, "module panicked dispatching an event");
                false
            },
        )
    }

    fn uninitialize(&mut self) -> bool {
        catch_unwind(AssertUnwindSafe(|| self.0.uninitialize())).unwrap_or_else(|_| {
            error!("module panicked during uninitialize");
            false
        })
    }
}

/// A live module instance of either contract generation.
pub enum ContractInstance {
    Broadcast(Box<dyn BroadcastContract>),
    Event(Box<dyn EventContract>),
}

impl ContractInstance {
    pub fn delivery_mode(&self) -> DeliveryMode {
        match self {
            ContractInstance::Broadcast(_) => DeliveryMode::Broadcast,
            ContractInstance::Event(_) => DeliveryMode::Filtered,
        }
    }

    /// The same instance behind a [`PanicGuard`].
    pub fn guarded(self) -> Self {
        match self {
            ContractInstance::Broadcast(m) => ContractInstance::Broadcast(Box::new(PanicGuard(m))),
            ContractInstance::Event(m) => ContractInstance::Event(Box::new(PanicGuard(m))),
        }
    }
}

impl std::fmt::Debug for ContractInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContractInstance::Broadcast(_) => f.write_str("ContractInstance::Broadcast"),
            ContractInstance::Event(_) => f.write_str("ContractInstance::Event"),
        }
    }
}

/// Collector the loader passes to a module binary's register function.
pub trait ModuleRegistrar {
    fn register_broadcast(&mut self, name: &str, module: Box<dyn BroadcastContract>);
    fn register_event(&mut self, name: &str, module: Box<dyn EventContract>);
}

/// Exported entry of a module binary.
///
/// A module crate exposes exactly one of these, via [`declare_module!`],
/// under the symbol `umh_module_declaration`. The loader verifies both
/// version fields before invoking `register`; host and module must be built
/// against the same `umh` release. `register` returns `false` when the
/// module's registration code panicked; the panic is caught inside the
/// module binary, never unwound into the loader.
pub struct ModuleDeclaration {
    pub contract_version: u32,
    pub host_version: &'static str,
    pub register: fn(registrar: &mut dyn ModuleRegistrar) -> bool,
}

/// Registrar wrapper that puts a [`PanicGuard`] around every instance a
/// module registers.
#[doc(hidden)]
pub struct GuardingRegistrar<'a> {
    inner: &'a mut dyn ModuleRegistrar,
}

impl ModuleRegistrar for GuardingRegistrar<'_> {
    fn register_broadcast(&mut self, name: &str, module: Box<dyn BroadcastContract>) {
        self.inner.register_broadcast(name, Box::new(PanicGuard(module)));
    }

    fn register_event(&mut self, name: &str, module: Box<dyn EventContract>) {
        self.inner.register_event(name, Box::new(PanicGuard(module)));
    }
}

/// Registration shim [`declare_module!`] points the declaration at. Runs the
/// module's register function behind a panic catch and hands it a registrar
/// that guards every instance. Compiled into the module binary through the
/// macro expansion, so no unwind started in module code can reach the host.
#[doc(hidden)]
pub fn guarded_register(
    registrar: &mut dyn ModuleRegistrar,
    register: fn(&mut dyn ModuleRegistrar),
) -> bool {
    let mut guarding = GuardingRegistrar { inner: registrar };
    catch_unwind(AssertUnwindSafe(|| register(&mut guarding))).is_ok()
}

/// Exported symbol name the loader resolves, NUL-terminated for libloading.
pub const DECLARATION_SYMBOL: &[u8] = b"umh_module_declaration\0";

/// Declare a module binary's entry point.
///
/// ```ignore
/// fn register(registrar: &mut dyn ModuleRegistrar) {
///     registrar.register_event("echo", Box::new(EchoModule::default()));
/// }
///
/// umh::declare_module!(register);
/// ```
#[macro_export]
macro_rules! declare_module {
    ($register:path) => {
        #[doc(hidden)]
        #[no_mangle]
        #[allow(non_upper_case_globals)]
        pub static umh_module_declaration: $crate::module::contract::ModuleDeclaration =
            $crate::module::contract::ModuleDeclaration {
                contract_version: $crate::module::contract::CONTRACT_VERSION,
                host_version: $crate::VERSION,
                register: {
                    fn registration_shim(
                        registrar: &mut dyn $crate::module::contract::ModuleRegistrar,
                    ) -> bool {
                        $crate::module::contract::guarded_register(registrar, $register)
                    }
                    registration_shim
                },
            };
    };
}
