//! Error types for protocol loading and validation.

/// Errors raised while loading or validating a protocol parameter set.
///
/// Always fatal: a run never starts with a configuration that produced one
/// of these, and nothing retries.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    /// Failed to read the protocol file from disk.
    #[error("failed to read protocol file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse protocol YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A section is missing, malformed, or inconsistent.
    #[error("invalid protocol section `{section}`: {reason}")]
    Invalid {
        /// Dotted path of the offending section.
        section: String,
        /// Explanation of what is wrong.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigurationError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

impl ConfigurationError {
    /// Shorthand for an [`ConfigurationError::Invalid`] error.
    pub fn invalid(section: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            section: section.into(),
            reason: reason.into(),
        }
    }
}
