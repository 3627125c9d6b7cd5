use thiserror::Error;

/// Why a share link could not be turned into a descriptor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty line")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("malformed URI: {0}")]
    MalformedUri(String),

    #[error("invalid base64 payload: {0}")]
    Base64Error(String),

    #[error("invalid vmess JSON: {0}")]
    JsonError(String),
}

/// Why a descriptor could not be turned into an engine config.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),

    #[error("websocket transport requires a host header")]
    MissingHostHeader,
}

/// Reason a line never reached the validator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Build(#[from] BuildError),
}
