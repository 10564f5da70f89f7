//! Task execution errors
//!
//! A background job reports failure through `anyhow::Error`. Wrapping the cause in
//! [`TaskError`] tells the queue whether another attempt can help.

use std::fmt;

/// Job failure tagged as recoverable (retry with backoff) or not (fail now).
#[derive(Debug)]
pub struct TaskError {
    inner: anyhow::Error,
    recoverable: bool,
}

impl TaskError {
    /// Failure that will not change on retry, e.g. a payload that does not parse.
    pub fn unrecoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: false,
        }
    }

    /// Transient failure such as a storage timeout or a dropped DB connection.
    pub fn recoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: true,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.inner
    }

    pub fn into_inner(self) -> anyhow::Error {
        self.inner
    }

    /// True when `err` carries a `TaskError` marked unrecoverable.
    /// Plain errors without the wrapper count as recoverable.
    pub fn is_unrecoverable(err: &anyhow::Error) -> bool {
        err.downcast_ref::<TaskError>()
            .map(|te| !te.is_recoverable())
            .unwrap_or(false)
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        Self::recoverable(err)
    }
}

/// Shorthand for tagging a `Result` error as unrecoverable.
pub trait TaskResultExt<T> {
    fn unrecoverable(self) -> Result<T, TaskError>;
}

impl<T, E: Into<anyhow::Error>> TaskResultExt<T> for Result<T, E> {
    fn unrecoverable(self) -> Result<T, TaskError> {
        self.map_err(|e| TaskError::unrecoverable(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_payload_is_unrecoverable() {
        let parsed: Result<u32, _> = "not-a-number".parse::<u32>();
        let err: anyhow::Error = parsed.unrecoverable().unwrap_err().into();
        assert!(TaskError::is_unrecoverable(&err));
    }

    #[test]
    fn storage_timeout_is_recoverable() {
        let err: anyhow::Error =
            TaskError::recoverable(anyhow::anyhow!("storage timed out")).into();
        assert!(!TaskError::is_unrecoverable(&err));
        assert!(err.to_string().contains("storage timed out"));
    }

    #[test]
    fn bare_anyhow_defaults_to_recoverable() {
        let err = anyhow::anyhow!("connection reset");
        assert!(!TaskError::is_unrecoverable(&err));
        let wrapped: TaskError = anyhow::anyhow!("connection reset").into();
        assert!(wrapped.is_recoverable());
    }
}
