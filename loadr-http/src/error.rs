use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of transport failures, used as a metric tag value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum TransportErrorKind {
    InvalidUrl,
    UnsupportedScheme,
    InvalidHeader,
    Timeout,
    Connect,
    Protocol,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid url: `{0}`")]
    InvalidUrl(String),

    #[error("unsupported scheme (expected http or https): `{0}`")]
    UnsupportedScheme(String),

    #[error("invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    #[error("invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    #[error("failed to build request: {0}")]
    Http(#[from] http::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("request error: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),

    #[error("body error: {0}")]
    Body(#[from] hyper::Error),
}

impl Error {
    pub fn kind(&self) -> TransportErrorKind {
        match self {
            Error::InvalidUrl(_) => TransportErrorKind::InvalidUrl,
            Error::UnsupportedScheme(_) => TransportErrorKind::UnsupportedScheme,
            Error::InvalidHeaderName(_) | Error::InvalidHeaderValue(_) | Error::Http(_) => {
                TransportErrorKind::InvalidHeader
            }
            Error::Timeout(_) => TransportErrorKind::Timeout,
            Error::Request(err) if err.is_connect() => TransportErrorKind::Connect,
            Error::Request(_) | Error::Body(_) => TransportErrorKind::Protocol,
        }
    }
}
