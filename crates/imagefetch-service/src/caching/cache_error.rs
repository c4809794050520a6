use std::error::Error;
use std::sync::Arc;

use image::DynamicImage;
use thiserror::Error;

/// A decoded image, shared between the memory tier and every caller it was handed to.
pub type SharedImage = Arc<DynamicImage>;

/// The outcome delivered to every waiter of a fetch.
pub type FetchResult = Result<SharedImage, FetchError>;

/// Every way a fetch can fail.
///
/// This is [`Clone`] as a single failure is fanned out to all the waiters of a fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The resource key is not a URL we know how to retrieve.
    #[error("invalid resource key: {0}")]
    InvalidKey(String),
    /// The transfer failed, either due to connection problems, a bad status code or a timeout.
    #[error("transfer failed: {0}")]
    TransportFailure(String),
    /// The payload could not be decoded into an image.
    #[error("failed to decode image: {0}")]
    DecodeFailure(String),
}

impl FetchError {
    /// Creates a [`FetchError::TransportFailure`] from an error and its chain of sources.
    ///
    /// Only the innermost cause is kept, as the outer layers of transport errors tend to be
    /// generic wrappers like "error sending request".
    pub fn transport(error: &dyn Error) -> Self {
        let mut error = error;
        while let Some(source) = error.source() {
            error = source;
        }
        Self::TransportFailure(error.to_string())
    }

    /// A short, stable name for this kind of error, used to tag metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::InvalidKey(_) => "invalid_key",
            FetchError::TransportFailure(_) => "transport",
            FetchError::DecodeFailure(_) => "decode",
        }
    }
}

impl From<image::ImageError> for FetchError {
    fn from(err: image::ImageError) -> Self {
        Self::DecodeFailure(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[derive(Debug, Error)]
    #[error("error sending request")]
    struct Outer(#[source] io::Error);

    #[test]
    fn test_transport_keeps_root_cause() {
        let err = Outer(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"));
        let err = FetchError::transport(&err);
        insta::assert_snapshot!(err, @"transfer failed: connection refused");
        assert_eq!(err.kind(), "transport");
    }
}
