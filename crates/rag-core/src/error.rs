//! Error types for the retrieval and answering pipeline.

use thiserror::Error;

/// Result type alias using RagError.
pub type Result<T> = std::result::Result<T, RagError>;

/// Who is at fault for a failure, as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The request itself cannot succeed.
    Client,
    /// An external provider failed or is overloaded.
    Upstream,
    /// Something on our side failed.
    Server,
}

/// Errors that can occur in the pipeline.
#[derive(Error, Debug)]
pub enum RagError {
    /// Provider could not be reached (DNS, refused connection, 5xx).
    #[error("Provider connectivity error: {message}")]
    ProviderConnectivity { message: String },

    /// Provider did not answer within the call's timeout.
    #[error("Provider timed out: {message}")]
    ProviderTimeout { message: String },

    /// Provider rejected the call because of rate limiting.
    #[error("Provider rate limited: {message}")]
    ProviderRateLimited { message: String },

    /// Provider rejected the request as malformed. Never retried.
    #[error("Provider rejected request: {message}")]
    ProviderInvalidRequest { message: String },

    /// The document store failed or did not answer in time.
    #[error("Store unavailable: {message}")]
    StoreUnavailable { message: String },

    /// The reranking step failed as a unit.
    #[error("Rerank failed: {message}")]
    RerankFailure { message: String },

    /// Invalid argument provided.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Embedding error that is not a provider call failure.
    #[error("Embedding error: {message}")]
    Embedding { message: String },

    /// Chunking error.
    #[error("Chunking error: {message}")]
    Chunking { message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl RagError {
    /// Create a provider connectivity error.
    pub fn provider_connectivity(message: impl Into<String>) -> Self {
        Self::ProviderConnectivity {
            message: message.into(),
        }
    }

    /// Create a provider timeout error.
    pub fn provider_timeout(message: impl Into<String>) -> Self {
        Self::ProviderTimeout {
            message: message.into(),
        }
    }

    /// Create a provider rate-limit error.
    pub fn provider_rate_limited(message: impl Into<String>) -> Self {
        Self::ProviderRateLimited {
            message: message.into(),
        }
    }

    /// Create a provider invalid-request error.
    pub fn provider_invalid_request(message: impl Into<String>) -> Self {
        Self::ProviderInvalidRequest {
            message: message.into(),
        }
    }

    /// Create a store-unavailable error.
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    /// Create a rerank failure.
    pub fn rerank(message: impl Into<String>) -> Self {
        Self::RerankFailure {
            message: message.into(),
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an embedding error.
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
        }
    }

    /// Create a chunking error.
    pub fn chunking(message: impl Into<String>) -> Self {
        Self::Chunking {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether a retry of the same call can plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProviderConnectivity { .. }
                | Self::ProviderTimeout { .. }
                | Self::ProviderRateLimited { .. }
        )
    }

    /// Classify the failure for user-visible reporting.
    pub fn fault(&self) -> Fault {
        match self {
            Self::ProviderInvalidRequest { .. } | Self::InvalidArgument { .. } => Fault::Client,
            Self::ProviderConnectivity { .. }
            | Self::ProviderTimeout { .. }
            | Self::ProviderRateLimited { .. }
            | Self::RerankFailure { .. } => Fault::Upstream,
            _ => Fault::Server,
        }
    }

    /// Get the stable error code used as `kind` in error responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ProviderConnectivity { .. } => "PROVIDER_CONNECTIVITY",
            Self::ProviderTimeout { .. } => "PROVIDER_TIMEOUT",
            Self::ProviderRateLimited { .. } => "PROVIDER_RATE_LIMITED",
            Self::ProviderInvalidRequest { .. } => "PROVIDER_INVALID_REQUEST",
            Self::StoreUnavailable { .. } => "STORE_UNAVAILABLE",
            Self::RerankFailure { .. } => "RERANK_FAILURE",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::Embedding { .. } => "EMBEDDING_ERROR",
            Self::Chunking { .. } => "CHUNKING_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}
