//! Topic-addressed message routing.
//!
//! One router per host. Inbound messages (controller to host) are
//! serialized through a routing mutex; host-control and the system topics
//! are handled in-process, everything else fans out to the loaded modules.
//! Outbound messages (module to controller) flow through the same router
//! so system topics get intercepted on that side too.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::boundary::codec::{status, BoundaryCodec};
use crate::boundary::link::ControllerLink;
use crate::error::HostError;
use crate::gate::Gate;
use crate::ipc::protocol::{HostCommand, HostCommandKind, ModuleCtrlKind};
use crate::ipc::{Message, CONF_STORE, HOST_CONTROL, MODULE_META, SHELL_EXEC};
use crate::module::registry::{ModuleRegistry, UnloadError};
use crate::services::{ConfStoreService, MetadataService, ShellExecService};

/// Where module-originated messages go. Implemented by the router; held
/// weakly by adapters so teardown order stays simple.
pub trait MessageSink: Send + Sync {
    fn route_outbound(&self, msg: &Message) -> Result<(), HostError>;
}

pub struct MessageRouter {
    registry: Arc<ModuleRegistry>,
    conf: ConfStoreService,
    metadata: MetadataService,
    shell: ShellExecService,
    link: Arc<dyn ControllerLink>,
    codec: BoundaryCodec,
    termination: Arc<Gate>,
    /// One inbound message at a time.
    route_lock: Mutex<()>,
    /// One controller callback at a time.
    out_lock: Mutex<()>,
    /// Service pushes waiting for module fan-out. Drained after the
    /// in-flight routing call completes, so a module that triggered a push
    /// from inside its own dispatch is never re-entered.
    pending: Mutex<VecDeque<Message>>,
}

impl MessageRouter {
    /// Build the router and bind it as the registry's outbound sink.
    pub fn shared(
        registry: Arc<ModuleRegistry>,
        conf: ConfStoreService,
        link: Arc<dyn ControllerLink>,
        codec: BoundaryCodec,
        termination: Arc<Gate>,
    ) -> Arc<Self> {
        let router = Arc::new(Self {
            registry,
            conf,
            metadata: MetadataService::new(),
            shell: ShellExecService::new(),
            link,
            codec,
            termination,
            route_lock: Mutex::new(()),
            out_lock: Mutex::new(()),
            pending: Mutex::new(VecDeque::new()),
        });
        let sink: Arc<dyn MessageSink> = router.clone();
        router.registry.bind_sink(Arc::downgrade(&sink));
        router
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn metadata(&self) -> &MetadataService {
        &self.metadata
    }

    pub fn conf(&self) -> &ConfStoreService {
        &self.conf
    }

    pub fn termination(&self) -> &Arc<Gate> {
        &self.termination
    }

    /// Route one controller-originated message. Never panics; returns a
    /// boundary status code.
    pub fn route_inbound(&self, msg: &Message) -> i32 {
        let _serial = self.route_lock.lock();

        if let Some(name) = crate::ipc::well_known_name(msg.topic) {
            debug!(topic = name, session = msg.session, "system message");
        }

        let code = if msg.topic == HOST_CONTROL {
            self.handle_host_control(msg)
        } else if msg.topic == CONF_STORE {
            self.handle_conf_store(msg)
        } else if msg.topic == MODULE_META {
            match self.metadata.record(msg) {
                Ok(()) => status::OK,
                Err(e) => {
                    warn!(error = %e, "malformed metadata announcement");
                    status::DECODE_FAILED
                }
            }
        } else if msg.topic == SHELL_EXEC {
            // Controller-originated shell-exec has no meaning in-process.
            warn!("ignoring inbound shell-exec message");
            status::OK
        } else {
            self.fan_out(msg);
            status::OK
        };

        self.drain_pending();
        code
    }

    fn handle_host_control(&self, msg: &Message) -> i32 {
        let command: HostCommand = match serde_json::from_str(&msg.payload) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "malformed host command");
                return status::DECODE_FAILED;
            }
        };
        match command.cmd {
            HostCommandKind::Terminate => {
                if self.termination.open() {
                    info!("termination requested");
                } else {
                    debug!("termination already requested");
                }
                status::OK
            }
            HostCommandKind::CtrlModule => {
                let args = match command.module_ctrl() {
                    Ok(a) => a,
                    Err(e) => {
                        warn!(error = %e, "malformed module-control arguments");
                        return status::DECODE_FAILED;
                    }
                };
                match args.cmd {
                    ModuleCtrlKind::Load => match self.registry.load(&args.module) {
                        Ok(()) => status::OK,
                        Err(e) => {
                            warn!(module = %args.module, error = %e, "module load rejected");
                            status::ROUTE_FAILED
                        }
                    },
                    ModuleCtrlKind::Unload => match self.registry.unload(&args.module) {
                        Ok(()) => status::OK,
                        // Unloading twice is tolerated; the end state is
                        // what the controller asked for.
                        Err(UnloadError::AlreadyUnloaded(name)) => {
                            warn!(module = %name, "unload of module that is not loaded");
                            status::OK
                        }
                        Err(e) => {
                            warn!(module = %args.module, error = %e, "module unload rejected");
                            status::ROUTE_FAILED
                        }
                    },
                }
            }
        }
    }

    fn handle_conf_store(&self, msg: &Message) -> i32 {
        match self.conf.handle(msg) {
            Ok(pushes) => {
                for push in pushes {
                    if let Err(e) = self.send_to_controller(&push) {
                        warn!(error = %e, "configuration push to controller failed");
                    }
                    self.pending.lock().push_back(push);
                }
                status::OK
            }
            Err(HostError::Payload(e)) => {
                warn!(error = %e, "malformed configuration request");
                status::DECODE_FAILED
            }
            Err(e) => {
                warn!(error = %e, "configuration request failed");
                status::ROUTE_FAILED
            }
        }
    }

    /// Deliver to every module that wants the topic. Per-recipient failures
    /// are logged and never aggregated into the routing status.
    fn fan_out(&self, msg: &Message) {
        for adapter in self.registry.active_adapters() {
            if !adapter.wants(msg.topic) {
                continue;
            }
            let delivered =
                catch_unwind(AssertUnwindSafe(|| adapter.dispatch(msg)));
            match delivered {
                Ok(true) => {}
                Ok(false) => {
                    warn!(module = %adapter.identity(), topic = %msg.topic, "module refused message");
                }
                Err(_) => {
                    warn!(module = %adapter.identity(), topic = %msg.topic, "module panicked during dispatch");
                }
            }
        }
    }

    /// Fan queued service pushes out to modules. Runs with the routing
    /// mutex held by the caller.
    fn drain_pending(&self) {
        loop {
            let Some(msg) = self.pending.lock().pop_front() else {
                break;
            };
            self.fan_out(&msg);
        }
    }

    /// Report startup progress to the controller. Non-OK verdicts are
    /// logged, never escalated.
    pub fn notify_progress(&self, percent: u8) {
        let code = {
            let _serial = self.out_lock.lock();
            self.link.on_progress(percent)
        };
        if code != status::OK {
            warn!(percent, code, "controller rejected progress report");
        }
    }

    /// Forward one log line to the controller.
    pub fn notify_log(&self, line: &str) {
        let _serial = self.out_lock.lock();
        self.link.on_log(line);
    }

    fn send_to_controller(&self, msg: &Message) -> Result<(), HostError> {
        let (payload, topic, session) = self.codec.encode_message(msg);
        let code = {
            let _serial = self.out_lock.lock();
            self.link.send_message(&payload, &topic, session)
        };
        if code == status::OK {
            Ok(())
        } else {
            Err(HostError::LinkRejected(code))
        }
    }
}

impl MessageSink for MessageRouter {
    /// Route one module-originated message. System topics are intercepted
    /// before the message leaves the process.
    fn route_outbound(&self, msg: &Message) -> Result<(), HostError> {
        if msg.topic == CONF_STORE {
            let pushes = self.conf.handle(msg)?;
            for push in pushes {
                self.send_to_controller(&push)?;
                self.pending.lock().push_back(push);
            }
        } else if msg.topic == MODULE_META {
            self.metadata.record(msg)?;
            self.send_to_controller(msg)?;
        } else if msg.topic == SHELL_EXEC {
            self.shell.validate(msg)?;
            self.send_to_controller(msg)?;
        } else {
            self.send_to_controller(msg)?;
        }

        // If no inbound routing is in flight we can fan pushes out right
        // away; otherwise the in-flight call drains them when it finishes.
        if let Some(_serial) = self.route_lock.try_lock() {
            self.drain_pending();
        }
        Ok(())
    }
}
