use gatelink_client::{ClientError, IdentityError, TokenStoreError};
use std::fmt;

#[derive(Debug)]
pub enum CliError {
    // Configuration errors
    ConfigNotFound(String),
    ConfigParseError(String),

    // Argument errors
    InvalidArgument(String),

    // Gateway errors
    GatewayError(ClientError),
    IdentityError(IdentityError),
    TokenStoreError(TokenStoreError),

    // IO errors
    IoError(std::io::Error),

    // Serialization errors
    SerdeError(serde_json::Error),
    YamlError(serde_yml::Error),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::ConfigNotFound(path) => {
                write!(f, "config file not found: {}", path)
            }
            CliError::ConfigParseError(msg) => {
                write!(f, "config parse error: {}", msg)
            }
            CliError::InvalidArgument(msg) => {
                write!(f, "invalid argument: {}", msg)
            }
            CliError::GatewayError(err) => {
                write!(f, "gateway error: {}", err)
            }
            CliError::IdentityError(err) => {
                write!(f, "device identity error: {}", err)
            }
            CliError::TokenStoreError(err) => {
                write!(f, "device token store error: {}", err)
            }
            CliError::IoError(err) => {
                write!(f, "IO error: {}", err)
            }
            CliError::SerdeError(err) => {
                write!(f, "JSON error: {}", err)
            }
            CliError::YamlError(err) => {
                write!(f, "YAML error: {}", err)
            }
        }
    }
}

impl std::error::Error for CliError {}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::IoError(err)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::SerdeError(err)
    }
}

impl From<serde_yml::Error> for CliError {
    fn from(err: serde_yml::Error) -> Self {
        CliError::YamlError(err)
    }
}

impl From<ClientError> for CliError {
    fn from(err: ClientError) -> Self {
        CliError::GatewayError(err)
    }
}

impl From<IdentityError> for CliError {
    fn from(err: IdentityError) -> Self {
        CliError::IdentityError(err)
    }
}

impl From<TokenStoreError> for CliError {
    fn from(err: TokenStoreError) -> Self {
        CliError::TokenStoreError(err)
    }
}
