use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] pazarsync_core::ValidationError),

    #[error(transparent)]
    Config(#[from] pazarsync_core::ConfigError),

    #[error(transparent)]
    Marketplace(#[from] pazarsync_core::MarketplaceError),

    #[error("{failed} of {chunks} chunks failed")]
    BatchFailed { failed: usize, chunks: usize },

    #[error("webhook signature does not match the payload")]
    SignatureMismatch,

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) => 2,
            Self::Config(_) => 3,
            Self::Marketplace(_) | Self::BatchFailed { .. } => 4,
            Self::SignatureMismatch => 4,
            Self::Serialization(_) => 5,
            Self::Io(_) => 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pazarsync_core::{MarketplaceError, MarketplaceId, ValidationError};

    #[test]
    fn exit_codes_follow_error_category() {
        assert_eq!(CliError::from(ValidationError::ZeroChunkSize).exit_code(), 2);
        assert_eq!(
            CliError::from(pazarsync_core::ConfigError::MissingWebhookSecret).exit_code(),
            3
        );
        assert_eq!(
            CliError::from(MarketplaceError::Authentication {
                marketplace: MarketplaceId::Amazon,
                message: String::from("invalid_grant"),
            })
            .exit_code(),
            4
        );
        assert_eq!(CliError::BatchFailed { failed: 1, chunks: 3 }.exit_code(), 4);
        assert_eq!(
            CliError::from(std::io::Error::other("disk")).exit_code(),
            10
        );
    }
}
