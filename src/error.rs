//! Error types for omada-dns.

use thiserror::Error;

/// Errors raised while talking to the controller inventory.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// Transport or decoding failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The controller answered with a non-zero error code.
    #[error("controller error {code}: {message}")]
    Api {
        /// Controller error code.
        code: i64,
        /// Controller error message.
        message: String,
    },

    /// An inventory call was made before a successful login.
    #[error("not logged in to controller")]
    NotLoggedIn,

    /// No site is selected, or the configured site is not visible to the user.
    #[error("site not found: {0}")]
    SiteNotFound(String),

    /// The controller URL could not be used to build a request.
    #[error("invalid controller URL: {0}")]
    InvalidUrl(String),
}

/// Errors that can occur in the DNS server.
#[derive(Debug, Error)]
pub enum DnsError {
    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A controller call failed; the current refresh cycle is abandoned.
    #[error("{context}: {source}")]
    Inventory {
        /// What was being fetched.
        context: &'static str,
        /// Underlying controller error.
        #[source]
        source: InventoryError,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// DNS protocol error
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),
}

impl DnsError {
    /// Wrap an inventory error with the name of the failed operation.
    pub fn inventory(context: &'static str, source: InventoryError) -> Self {
        DnsError::Inventory { context, source }
    }
}
