//! Host assembly and lifetime.
//!
//! `HostContext::bootstrap` wires the registry, services, and router
//! together; `shutdown` tears everything down in reverse. Both ends are
//! one-shot, guarded by gates.

use std::sync::Arc;

use tracing::{info, warn};

use crate::boundary::codec::BoundaryCodec;
use crate::boundary::link::{hosted_by, ControllerLink};
use crate::config::HostSettings;
use crate::error::HostError;
use crate::gate::Gate;
use crate::module::registry::ModuleRegistry;
use crate::router::MessageRouter;
use crate::services::ConfStoreService;

pub struct HostContext {
    settings: HostSettings,
    router: Arc<MessageRouter>,
    termination: Arc<Gate>,
    shutdown_done: Gate,
}

impl HostContext {
    /// Build a running host from settings and a controller link.
    ///
    /// Fails when the current process image is not an allowed controller,
    /// or when the module/configuration directories cannot be prepared.
    pub fn bootstrap(
        settings: HostSettings,
        link: Arc<dyn ControllerLink>,
    ) -> Result<Self, HostError> {
        if !hosted_by(&settings.controller_images) {
            warn!("refusing to run under an unapproved process image");
            return Err(HostError::ForbiddenImage);
        }

        let registry = Arc::new(ModuleRegistry::new(&settings.modules_dir)?);
        let conf = ConfStoreService::open(&settings.conf_dir)?;
        let termination = Arc::new(Gate::new());
        let router = MessageRouter::shared(
            registry,
            conf,
            link,
            BoundaryCodec::native(),
            Arc::clone(&termination),
        );

        info!(
            modules_dir = %settings.modules_dir,
            conf_dir = %settings.conf_dir,
            "host ready"
        );
        Ok(Self {
            settings,
            router,
            termination,
            shutdown_done: Gate::new(),
        })
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        self.router.registry()
    }

    pub fn termination(&self) -> &Arc<Gate> {
        &self.termination
    }

    /// Discover and load startup modules, reporting progress through the
    /// controller link. Load failures are logged and skipped; one bad module
    /// must not keep the rest down.
    pub fn auto_load(&self) {
        let registry = self.registry();
        self.router.notify_progress(0);
        let discovered = match registry.discover() {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "module discovery failed");
                self.router.notify_progress(100);
                return;
            }
        };

        let wanted: Vec<String> = if self.settings.autoload.is_empty() {
            discovered
        } else {
            self.settings.autoload.clone()
        };

        let total = wanted.len();
        let mut loaded = 0usize;
        for (index, name) in wanted.iter().enumerate() {
            match registry.load(name) {
                Ok(()) => loaded += 1,
                Err(e) => warn!(module = %name, error = %e, "startup load failed"),
            }
            self.router
                .notify_progress((((index + 1) * 100) / total) as u8);
        }
        if total == 0 {
            self.router.notify_progress(100);
        }
        self.router
            .notify_log(&format!("startup complete, {loaded} of {total} modules loaded"));
    }

    /// Block until the controller requests termination.
    pub fn wait_for_termination(&self) {
        self.termination.wait();
    }

    /// Unload every module and stop. Idempotent.
    pub fn shutdown(&self) {
        if !self.shutdown_done.open() {
            return;
        }
        info!("host shutting down");
        self.termination.open();
        self.registry().shutdown_all();
    }
}

impl Drop for HostContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::link::NullLink;

    fn settings_in(dir: &std::path::Path) -> HostSettings {
        HostSettings {
            modules_dir: dir.join("modules").to_string_lossy().into_owned(),
            conf_dir: dir.join("conf").to_string_lossy().into_owned(),
            ..HostSettings::default()
        }
    }

    #[test]
    fn bootstrap_prepares_directories() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = HostContext::bootstrap(settings_in(dir.path()), Arc::new(NullLink)).unwrap();
        assert!(dir.path().join("modules").is_dir());
        assert!(!ctx.termination().is_open());
    }

    #[test]
    fn shutdown_is_idempotent_and_opens_termination() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = HostContext::bootstrap(settings_in(dir.path()), Arc::new(NullLink)).unwrap();
        ctx.shutdown();
        assert!(ctx.termination().is_open());
        ctx.shutdown();
    }

    #[test]
    fn image_guard_rejects_foreign_hosts() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings_in(dir.path());
        settings.controller_images = vec!["definitely-not-this-binary.exe".to_string()];
        assert!(matches!(
            HostContext::bootstrap(settings, Arc::new(NullLink)),
            Err(HostError::ForbiddenImage)
        ));
    }

    #[test]
    fn auto_load_with_empty_modules_dir_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = HostContext::bootstrap(settings_in(dir.path()), Arc::new(NullLink)).unwrap();
        ctx.auto_load();
        assert!(ctx.registry().loaded_names().is_empty());
    }
}
