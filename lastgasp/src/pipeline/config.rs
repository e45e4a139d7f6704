//! Pipeline configuration and its builder.

use crate::core::ExceptionRecord;
use crate::errors::ConfigError;
use crate::guard::Completion;
use crate::phases::{FatalLogger, FnLogger, FnShutdown, GracefulShutdown};
use crate::recorder::BackupSink;
use crate::terminator::{abort_process, AbortFn, PreTerminateHook};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default deadline for the logger phase.
pub const DEFAULT_LOGGER_TIMEOUT: Duration = Duration::from_secs(30);

/// Default deadline for the shutdown phase.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time allowed for the pre-terminate hook and record writes on
/// top of the phase deadlines.
pub const DEFAULT_TERMINATION_GRACE: Duration = Duration::from_secs(5);

/// Environment variable naming the backup sink.
pub const ENV_BACKUP_SINK: &str = "LASTGASP_BACKUP_SINK";
/// Environment variable holding the logger deadline in milliseconds.
pub const ENV_LOGGER_TIMEOUT_MS: &str = "LASTGASP_LOGGER_TIMEOUT_MS";
/// Environment variable holding the shutdown deadline in milliseconds.
pub const ENV_SHUTDOWN_TIMEOUT_MS: &str = "LASTGASP_SHUTDOWN_TIMEOUT_MS";
/// Environment variable holding the termination grace in milliseconds.
pub const ENV_TERMINATION_GRACE_MS: &str = "LASTGASP_TERMINATION_GRACE_MS";

/// Serializable subset of the configuration.
///
/// Every field is optional; values set explicitly on the builder win.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecoveryOptions {
    /// `"stdout"`, `"stderr"` or a file path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_sink: Option<String>,
    /// Logger deadline in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logger_timeout_ms: Option<u64>,
    /// Shutdown deadline in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutdown_timeout_ms: Option<u64>,
    /// Termination grace in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination_grace_ms: Option<u64>,
}

impl RecoveryOptions {
    /// Parses options from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads options from the `LASTGASP_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads options through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let millis = |name: &str| -> Result<Option<u64>, ConfigError> {
            lookup(name)
                .map(|raw| {
                    raw.trim().parse::<u64>().map_err(|_| ConfigError::InvalidOption {
                        option: name.to_string(),
                        value: raw.clone(),
                    })
                })
                .transpose()
        };

        Ok(Self {
            backup_sink: lookup(ENV_BACKUP_SINK),
            logger_timeout_ms: millis(ENV_LOGGER_TIMEOUT_MS)?,
            shutdown_timeout_ms: millis(ENV_SHUTDOWN_TIMEOUT_MS)?,
            termination_grace_ms: millis(ENV_TERMINATION_GRACE_MS)?,
        })
    }
}

/// Validated, immutable pipeline configuration.
#[derive(Clone)]
pub struct RecoveryConfig {
    pub(crate) logger: Arc<dyn FatalLogger>,
    pub(crate) shutdown: Option<Arc<dyn GracefulShutdown>>,
    pub(crate) backup_sink: BackupSink,
    pub(crate) logger_timeout: Duration,
    pub(crate) shutdown_timeout: Duration,
    pub(crate) termination_grace: Duration,
    pub(crate) pre_terminate: Option<PreTerminateHook>,
    pub(crate) abort: AbortFn,
    pub(crate) silence_default_hook: bool,
}

impl RecoveryConfig {
    /// Starts a builder.
    #[must_use]
    pub fn builder() -> RecoveryConfigBuilder {
        RecoveryConfigBuilder::default()
    }

    /// Returns the backup sink.
    #[must_use]
    pub fn backup_sink(&self) -> &BackupSink {
        &self.backup_sink
    }

    /// Returns the logger deadline.
    #[must_use]
    pub fn logger_timeout(&self) -> Duration {
        self.logger_timeout
    }

    /// Returns the shutdown deadline.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Returns the time allowed after the phase deadlines.
    #[must_use]
    pub fn termination_grace(&self) -> Duration {
        self.termination_grace
    }

    /// Returns how long the triggering thread waits for recovery before it
    /// aborts regardless: both phase deadlines plus the termination grace.
    /// The shutdown deadline only counts when a routine is configured.
    #[must_use]
    pub fn recovery_bound(&self) -> Duration {
        let shutdown = if self.shutdown.is_some() {
            self.shutdown_timeout
        } else {
            Duration::ZERO
        };
        self.logger_timeout
            .saturating_add(shutdown)
            .saturating_add(self.termination_grace)
    }

    /// Returns true if a graceful shutdown routine is configured.
    #[must_use]
    pub fn has_graceful_shutdown(&self) -> bool {
        self.shutdown.is_some()
    }

    /// Returns true if the previously installed panic hook is skipped.
    #[must_use]
    pub fn silences_default_hook(&self) -> bool {
        self.silence_default_hook
    }
}

impl fmt::Debug for RecoveryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryConfig")
            .field("backup_sink", &self.backup_sink)
            .field("logger_timeout", &self.logger_timeout)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("termination_grace", &self.termination_grace)
            .field("has_graceful_shutdown", &self.shutdown.is_some())
            .field("has_pre_terminate", &self.pre_terminate.is_some())
            .field("silence_default_hook", &self.silence_default_hook)
            .finish_non_exhaustive()
    }
}

/// Builder for [`RecoveryConfig`].
#[derive(Default)]
pub struct RecoveryConfigBuilder {
    logger: Option<Arc<dyn FatalLogger>>,
    shutdown: Option<Arc<dyn GracefulShutdown>>,
    backup_sink: Option<BackupSink>,
    logger_timeout: Option<Duration>,
    shutdown_timeout: Option<Duration>,
    termination_grace: Option<Duration>,
    pre_terminate: Option<PreTerminateHook>,
    abort: Option<AbortFn>,
    silence_default_hook: bool,
    options: RecoveryOptions,
}

impl RecoveryConfigBuilder {
    /// Sets the diagnostic logger. Required.
    #[must_use]
    pub fn logger<L: FatalLogger + 'static>(mut self, logger: L) -> Self {
        self.logger = Some(Arc::new(logger));
        self
    }

    /// Sets a shared diagnostic logger.
    #[must_use]
    pub fn shared_logger(mut self, logger: Arc<dyn FatalLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Sets the diagnostic logger from a closure.
    #[must_use]
    pub fn logger_fn<F>(self, func: F) -> Self
    where
        F: Fn(&ExceptionRecord, Completion) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.logger(FnLogger::new(func))
    }

    /// Sets the graceful shutdown routine.
    #[must_use]
    pub fn graceful_shutdown<S: GracefulShutdown + 'static>(mut self, shutdown: S) -> Self {
        self.shutdown = Some(Arc::new(shutdown));
        self
    }

    /// Sets the graceful shutdown routine from a closure.
    #[must_use]
    pub fn shutdown_fn<F>(self, func: F) -> Self
    where
        F: Fn(Completion) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.graceful_shutdown(FnShutdown::new(func))
    }

    /// Sets the backup sink.
    #[must_use]
    pub fn backup_sink(mut self, sink: BackupSink) -> Self {
        self.backup_sink = Some(sink);
        self
    }

    /// Sets the logger deadline.
    #[must_use]
    pub fn logger_timeout(mut self, timeout: Duration) -> Self {
        self.logger_timeout = Some(timeout);
        self
    }

    /// Sets the shutdown deadline.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    /// Sets the time allowed for the pre-terminate hook and record writes
    /// after the phase deadlines. Once it runs out the process aborts
    /// wherever recovery has got to.
    #[must_use]
    pub fn termination_grace(mut self, grace: Duration) -> Self {
        self.termination_grace = Some(grace);
        self
    }

    /// Sets a hook run right before the process aborts. Panics inside it
    /// are discarded, and a hook still running when the termination grace
    /// runs out is abandoned.
    #[must_use]
    pub fn pre_terminate<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.pre_terminate = Some(Arc::new(hook));
        self
    }

    /// Replaces the abort primitive. Defaults to [`abort_process`].
    #[must_use]
    pub fn abort(mut self, abort: AbortFn) -> Self {
        self.abort = Some(abort);
        self
    }

    /// Skips the previously installed panic hook when a panic triggers the
    /// pipeline.
    #[must_use]
    pub fn silence_default_hook(mut self, silence: bool) -> Self {
        self.silence_default_hook = silence;
        self
    }

    /// Applies serialized options. Explicit builder values take precedence.
    #[must_use]
    pub fn options(mut self, options: RecoveryOptions) -> Self {
        self.options = options;
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> Result<RecoveryConfig, ConfigError> {
        let logger = self.logger.ok_or(ConfigError::LoggerRequired)?;

        let backup_sink = match (self.backup_sink, self.options.backup_sink) {
            (Some(sink), _) => sink,
            (None, Some(raw)) => BackupSink::parse(&raw)?,
            (None, None) => BackupSink::None,
        };
        if matches!(backup_sink, BackupSink::File(ref path) if path.as_os_str().is_empty()) {
            return Err(ConfigError::InvalidBackupSink);
        }

        let logger_timeout = self
            .logger_timeout
            .or(self.options.logger_timeout_ms.map(Duration::from_millis))
            .unwrap_or(DEFAULT_LOGGER_TIMEOUT);
        let shutdown_timeout = self
            .shutdown_timeout
            .or(self.options.shutdown_timeout_ms.map(Duration::from_millis))
            .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        let termination_grace = self
            .termination_grace
            .or(self.options.termination_grace_ms.map(Duration::from_millis))
            .unwrap_or(DEFAULT_TERMINATION_GRACE);
        if logger_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout {
                name: "logger_timeout",
            });
        }
        if shutdown_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout {
                name: "shutdown_timeout",
            });
        }
        if termination_grace.is_zero() {
            return Err(ConfigError::InvalidTimeout {
                name: "termination_grace",
            });
        }

        Ok(RecoveryConfig {
            logger,
            shutdown: self.shutdown,
            backup_sink,
            logger_timeout,
            shutdown_timeout,
            termination_grace,
            pre_terminate: self.pre_terminate,
            abort: self.abort.unwrap_or(abort_process),
            silence_default_hook: self.silence_default_hook,
        })
    }
}

impl fmt::Debug for RecoveryConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryConfigBuilder")
            .field("has_logger", &self.logger.is_some())
            .field("backup_sink", &self.backup_sink)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
