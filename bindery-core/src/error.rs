// Error types for the binding and negotiation pipeline

use http::StatusCode;
use thiserror::Error;

/// Boxed error returned by handlers and carried by error views.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A string value could not be converted to a registered target type.
///
/// Raised by the conversion registry only when the target type is supported
/// but the raw text is not a valid value of it. Unsupported targets are not
/// errors; they simply yield no value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot convert {raw:?} to {target}: {message}")]
pub struct ConversionError {
    /// Name of the target type.
    pub target: String,
    /// The rejected input.
    pub raw: String,
    /// Underlying parse failure.
    pub message: String,
}

impl ConversionError {
    pub fn new(target: impl Into<String>, raw: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            raw: raw.into(),
            message: message.into(),
        }
    }
}

/// A data source promised a value of some type and then failed to deliver it.
///
/// Every variant names the parameter being bound, its declared type and the
/// root cause message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    #[error("cannot bind parameter '{parameter}' as {target}: {cause}")]
    Conversion {
        parameter: String,
        target: String,
        cause: String,
    },

    #[error("malformed request body for parameter '{parameter}' ({target}): {cause}")]
    MalformedBody {
        parameter: String,
        target: String,
        cause: String,
    },

    #[error("request body for parameter '{parameter}' ({target}) could not be read: {cause}")]
    BodyUnavailable {
        parameter: String,
        target: String,
        cause: String,
    },

    #[error("multipart binding of parameter '{parameter}' ({target}) failed: {cause}")]
    Multipart {
        parameter: String,
        target: String,
        cause: String,
    },
}

impl BindError {
    /// Name of the parameter that failed to bind.
    pub fn parameter(&self) -> &str {
        match self {
            BindError::Conversion { parameter, .. }
            | BindError::MalformedBody { parameter, .. }
            | BindError::BodyUnavailable { parameter, .. }
            | BindError::Multipart { parameter, .. } => parameter,
        }
    }

    /// Declared type of the parameter that failed to bind.
    pub fn target(&self) -> &str {
        match self {
            BindError::Conversion { target, .. }
            | BindError::MalformedBody { target, .. }
            | BindError::BodyUnavailable { target, .. }
            | BindError::Multipart { target, .. } => target,
        }
    }

    /// Root cause message.
    pub fn cause(&self) -> &str {
        match self {
            BindError::Conversion { cause, .. }
            | BindError::MalformedBody { cause, .. }
            | BindError::BodyUnavailable { cause, .. }
            | BindError::Multipart { cause, .. } => cause,
        }
    }

    pub(crate) fn conversion(parameter: &str, target: &str, error: &ConversionError) -> Self {
        BindError::Conversion {
            parameter: parameter.to_string(),
            target: target.to_string(),
            cause: error.message.clone(),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Bind(#[from] BindError),

    #[error("Not Acceptable: {0}")]
    NotAcceptable(String),

    #[error("Route not found: {0}")]
    RouteNotFound(String),

    #[error("No view resolver for result of {result_type}: {cause}")]
    ViewResolverNotFound { result_type: String, cause: String },

    #[error("Handler '{handler}' failed: {source}")]
    Handler {
        handler: String,
        #[source]
        source: BoxError,
    },

    #[error("Render error: {0}")]
    Render(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// HTTP status the dispatch layer reports for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Bind(_) => StatusCode::BAD_REQUEST,
            Error::NotAcceptable(_) => StatusCode::NOT_ACCEPTABLE,
            Error::RouteNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }

    pub fn is_server_error(&self) -> bool {
        self.status().is_server_error()
    }
}
