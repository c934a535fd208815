//! Configuration errors with actionable messages.

use std::fmt;

/// A configuration problem and how to fix it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A setting has an unusable value.
    Invalid {
        /// Dotted setting name, e.g. `server.port`.
        setting: String,
        /// What is wrong.
        message: String,
        /// How to fix it.
        fix_hint: String,
    },
    /// Several problems at once.
    Multiple(Vec<ConfigurationError>),
}

impl std::error::Error for ConfigurationError {}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid {
                setting,
                message,
                fix_hint,
            } => {
                let env_var = format!("TEMPO__{}", setting.replace('.', "__").to_uppercase());
                write!(
                    f,
                    "Invalid configuration for {setting}: {message}\n\n\
                    How to fix: {fix_hint} (or set {env_var})"
                )
            }
            Self::Multiple(errors) => {
                writeln!(f, "Multiple configuration errors:")?;
                for (i, err) in errors.iter().enumerate() {
                    writeln!(f, "\n{}. {}", i + 1, err)?;
                }
                Ok(())
            }
        }
    }
}

impl ConfigurationError {
    #[must_use]
    pub fn invalid(
        setting: impl Into<String>,
        message: impl Into<String>,
        fix_hint: impl Into<String>,
    ) -> Self {
        Self::Invalid {
            setting: setting.into(),
            message: message.into(),
            fix_hint: fix_hint.into(),
        }
    }

    /// Collapse a list of errors: `None` when empty, the error itself when
    /// there is exactly one.
    #[must_use]
    pub fn from_errors(mut errors: Vec<ConfigurationError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Multiple(errors)),
        }
    }

    /// Number of underlying errors.
    #[must_use]
    pub fn count(&self) -> usize {
        match self {
            Self::Multiple(errors) => errors.len(),
            Self::Invalid { .. } => 1,
        }
    }
}

/// Result type for configuration validation.
pub type ConfigResult<T> = Result<T, ConfigurationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_display_names_env_var() {
        let err = ConfigurationError::invalid(
            "server.port",
            "port 0 is not bindable",
            "Choose a port between 1 and 65535",
        );
        let msg = err.to_string();
        assert!(msg.contains("server.port"));
        assert!(msg.contains("How to fix"));
        assert!(msg.contains("TEMPO__SERVER__PORT"));
    }

    #[test]
    fn test_from_errors() {
        assert!(ConfigurationError::from_errors(vec![]).is_none());

        let single = ConfigurationError::from_errors(vec![ConfigurationError::invalid(
            "a", "b", "c",
        )])
        .unwrap();
        assert_eq!(single.count(), 1);

        let many = ConfigurationError::from_errors(vec![
            ConfigurationError::invalid("database.path", "empty", "Set a file path"),
            ConfigurationError::invalid("logging.level", "unknown", "Use info"),
        ])
        .unwrap();
        assert_eq!(many.count(), 2);
        let msg = many.to_string();
        assert!(msg.contains("Multiple configuration errors"));
        assert!(msg.contains("1."));
        assert!(msg.contains("2."));
    }
}
