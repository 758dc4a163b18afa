use std::fmt;
use thiserror::Error;
use tokio::time::Duration;

#[derive(Error, Debug)]
pub enum StdError {
    #[error("JsonSerializationError: {0}")]
    JsonSerializationError(#[source] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[source] kube::Error),

    #[error("Finalizer Error: {0}")]
    // NB: awkward type because finalizer::Error embeds the reconciler error (which is this)
    // so boxing this error to break cycles
    FinalizerError(#[source] Box<kube::runtime::finalizer::Error<Error>>),

    #[error("MetadataMissing: {0}")]
    MetadataMissing(String),

    #[error("InvalidArgument: {0}")]
    InvalidArgument(String),

    #[error("SerializationError: {0}")]
    SerializationError(String),

    #[error("HttpError: {0}")]
    HttpError(String),

    #[error("NotFound: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("ExternalServiceError: {0}")]
    ExternalServiceError(String),

    #[error("EncodingError: {0}")]
    EncodingError(String),

    #[error("OwnershipError: {0}")]
    OwnershipError(String),

    #[error("ResourceConflict: {0}")]
    ResourceConflict(String),

    #[error("ResourceCreateFailed: {0}")]
    ResourceCreateFailed(String),

    #[error("MalformedKey: {0}")]
    MalformedKey(String),

    #[error("NoActiveRun: {0}")]
    NoActiveRun(String),

    #[error("TaskNotRunning: {0}")]
    TaskNotRunning(String),

    #[error("InvalidPodName: {0}")]
    InvalidPodName(String),

    #[error("ExecError: {0}")]
    ExecError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl StdError {
    pub fn metric_label(&self) -> String {
        let label = format!("{self:?}");
        label
            .split(|c: char| c == '(' || c == ' ')
            .next()
            .unwrap_or_default()
            .to_lowercase()
    }

    /// Rejections of a webhook delivery that must never be retried.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            StdError::MalformedKey(_)
                | StdError::NoActiveRun(_)
                | StdError::TaskNotRunning(_)
                | StdError::InvalidPodName(_)
        )
    }

    pub fn http_status(&self) -> u16 {
        match self {
            StdError::MalformedKey(_)
            | StdError::NoActiveRun(_)
            | StdError::TaskNotRunning(_)
            | StdError::InvalidPodName(_)
            | StdError::InvalidArgument(_)
            | StdError::JsonSerializationError(_) => 400,
            StdError::Unauthorized(_) => 401,
            StdError::NotFound(_) => 404,
            StdError::KubeError(kube::Error::Api(err)) if err.code == 404 => 404,
            _ => 500,
        }
    }
}

#[derive(Error, Debug)]
pub struct ErrorWithRequeue {
    pub duration: Duration,
    pub error: StdError,
}

impl ErrorWithRequeue {
    pub fn new(error: StdError, duration: Duration) -> ErrorWithRequeue {
        ErrorWithRequeue { error, duration }
    }

    pub fn metric_label(&self) -> String {
        self.error.metric_label()
    }
}

impl fmt::Display for ErrorWithRequeue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Standard Error: {0}")]
    StdError(#[source] StdError),

    #[error("Error With Requeue: {0}")]
    ErrorWithRequeue(#[source] ErrorWithRequeue),
}

impl Error {
    pub fn metric_label(&self) -> String {
        self.inner().metric_label()
    }

    pub fn inner(&self) -> &StdError {
        match self {
            Error::StdError(e) => e,
            Error::ErrorWithRequeue(e) => &e.error,
        }
    }

    pub fn is_protocol_violation(&self) -> bool {
        self.inner().is_protocol_violation()
    }

    pub fn http_status(&self) -> u16 {
        self.inner().http_status()
    }

    /// Message without the variant prefixes, suitable for a condition message.
    pub fn message(&self) -> String {
        match self.inner() {
            StdError::JsonSerializationError(e) => e.to_string(),
            StdError::KubeError(e) => e.to_string(),
            StdError::FinalizerError(e) => e.to_string(),
            StdError::MetadataMissing(m)
            | StdError::InvalidArgument(m)
            | StdError::SerializationError(m)
            | StdError::HttpError(m)
            | StdError::NotFound(m)
            | StdError::Conflict(m)
            | StdError::ExternalServiceError(m)
            | StdError::EncodingError(m)
            | StdError::OwnershipError(m)
            | StdError::ResourceConflict(m)
            | StdError::ResourceCreateFailed(m)
            | StdError::MalformedKey(m)
            | StdError::NoActiveRun(m)
            | StdError::TaskNotRunning(m)
            | StdError::InvalidPodName(m)
            | StdError::ExecError(m)
            | StdError::Unauthorized(m) => m.clone(),
        }
    }
}

impl From<StdError> for Error {
    fn from(e: StdError) -> Self {
        Error::StdError(e)
    }
}

impl actix_web::ResponseError for Error {
    fn status_code(&self) -> actix_web::http::StatusCode {
        actix_web::http::StatusCode::from_u16(self.http_status())
            .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> actix_web::HttpResponse {
        actix_web::HttpResponse::build(self.status_code())
            .json(serde_json::json!({ "message": self.message() }))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_label_is_the_variant_name() {
        let e = Error::StdError(StdError::TaskNotRunning("analyze".into()));
        assert_eq!(e.metric_label(), "tasknotrunning");
    }

    #[test]
    fn protocol_violations_map_to_bad_request() {
        for e in [
            StdError::MalformedKey("a".into()),
            StdError::NoActiveRun("a".into()),
            StdError::TaskNotRunning("a".into()),
            StdError::InvalidPodName("a".into()),
        ] {
            assert!(e.is_protocol_violation());
            assert_eq!(e.http_status(), 400);
        }
        assert!(!StdError::Conflict("a".into()).is_protocol_violation());
        assert_eq!(StdError::NotFound("a".into()).http_status(), 404);
        assert_eq!(StdError::Unauthorized("a".into()).http_status(), 401);
        assert_eq!(StdError::ExecError("a".into()).http_status(), 500);
    }

    #[test]
    fn message_strips_the_variant_prefix() {
        let e = Error::StdError(StdError::ExternalServiceError("401 Unauthorized".into()));
        assert_eq!(e.message(), "401 Unauthorized");
    }
}
