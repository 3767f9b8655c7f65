//! Error taxonomy for the card image pipeline
//!
//! Every variant carries enough context (keystore path, template name or ICCSN) to
//! locate the input that caused it.

use std::path::PathBuf;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unreadable or malformed PKCS#12 store, or an entry that is not a private key
    #[error("keystore {path}: {reason}")]
    Keystore { path: PathBuf, reason: String },

    /// No (or more than one) known OID matched a certificate
    #[error("cannot classify certificate in {path}: {reason}")]
    Classification { path: PathBuf, reason: String },

    #[error("no ICCSN derivable for {path} (neither file name nor subject serialNumber)")]
    Iccsn { path: PathBuf },

    #[error("health insurance identifier of {path}: {reason}")]
    HealthInsuranceId { path: PathBuf, reason: String },

    /// Required template slot missing, or the template itself is unusable
    #[error("template {template}: {reason}")]
    Template { template: String, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("configuration: {0}")]
    Config(String),

    #[error("openssl: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),
}

impl Error {
    pub(crate) fn keystore(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Keystore {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn classification(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Classification {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn template(template: impl Into<String>, reason: impl ToString) -> Self {
        Error::Template {
            template: template.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
