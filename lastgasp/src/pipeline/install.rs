//! Process-wide installation through the panic hook.

use super::config::RecoveryConfig;
use super::controller::PipelineController;
use crate::core::ExceptionRecord;
use crate::errors::ConfigError;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

static INSTALLED: OnceLock<Arc<PipelineController>> = OnceLock::new();

/// Installs the pipeline as the process panic hook.
///
/// The hook that was installed before is kept and runs first, unless the
/// configuration silences it. Only one pipeline may be installed per
/// process.
pub fn install(config: RecoveryConfig) -> Result<Arc<PipelineController>, ConfigError> {
    let silence = config.silences_default_hook();
    let sink = config.backup_sink().to_string();
    let controller = PipelineController::new(config);
    if INSTALLED.set(Arc::clone(&controller)).is_err() {
        warn!("recovery pipeline already installed");
        return Err(ConfigError::AlreadyInstalled);
    }

    let previous = std::panic::take_hook();
    let hooked = Arc::clone(&controller);
    std::panic::set_hook(Box::new(move |info| {
        if !silence {
            previous(info);
        }
        hooked.handle_panic(info);
    }));

    info!(incident = %controller.incident(), backup_sink = %sink, "recovery pipeline installed");
    Ok(controller)
}

/// Returns the installed pipeline, if any.
#[must_use]
pub fn installed() -> Option<Arc<PipelineController>> {
    INSTALLED.get().cloned()
}

/// Feeds a fatal error that is not a panic, such as an error escaping
/// `main`, to the installed pipeline.
///
/// Does not return if this call starts the pipeline. Returns if no
/// pipeline is installed or a run is already in progress.
pub fn trigger(exception: ExceptionRecord) {
    match installed() {
        Some(controller) => controller.on_fatal(exception),
        None => warn!(error = %exception.error(), "no recovery pipeline installed; fatal error ignored"),
    }
}
