//! Backup sink destinations.

use crate::errors::ConfigError;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Destination for structured failure records.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BackupSink {
    /// Records are discarded.
    #[default]
    None,
    /// Records go to standard output.
    Stdout,
    /// Records go to standard error.
    Stderr,
    /// Records are appended to a file.
    File(PathBuf),
}

impl BackupSink {
    /// Parses `"stdout"`, `"stderr"` or a file path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBackupSink`] for an empty value.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim() {
            "" => Err(ConfigError::InvalidBackupSink),
            "stdout" => Ok(Self::Stdout),
            "stderr" => Ok(Self::Stderr),
            path => Ok(Self::File(PathBuf::from(path))),
        }
    }

    /// Returns true unless records are discarded.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl FromStr for BackupSink {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for BackupSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_streams() {
        assert_eq!(BackupSink::parse("stdout").unwrap(), BackupSink::Stdout);
        assert_eq!(BackupSink::parse("stderr").unwrap(), BackupSink::Stderr);
    }

    #[test]
    fn test_parse_path() {
        let sink: BackupSink = "/var/log/app/backup.log".parse().unwrap();
        assert_eq!(sink, BackupSink::File(PathBuf::from("/var/log/app/backup.log")));
        assert_eq!(sink.to_string(), "/var/log/app/backup.log");
    }

    #[test]
    fn test_parse_empty_is_rejected() {
        assert!(matches!(BackupSink::parse("  "), Err(ConfigError::InvalidBackupSink)));
    }

    #[test]
    fn test_default_is_disabled() {
        assert!(!BackupSink::default().is_enabled());
        assert!(BackupSink::Stderr.is_enabled());
    }
}
