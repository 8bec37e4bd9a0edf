use std::fmt;

/// Outcome of a single capture attempt, as reported to the consumer.
///
/// `TemporaryError` asks the consumer to retry on its own schedule (the
/// window rectangle could not be measured, the backend refused this frame,
/// or a backend transition is in progress). `PermanentError` means capture
/// of this source cannot continue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureStatus {
    Success,
    TemporaryError,
    PermanentError,
}

#[derive(Debug)]
pub enum CaptureError {
    /// `capture_frame` was called before a source was selected.
    NoSourceSelected,

    /// The selected window no longer exists.
    SourceClosed,

    /// The drawable area of the selected window could not be measured.
    WindowBoundsUnavailable,

    /// The window z-order changed too recently, or a backend switch is in
    /// flight; the frame was dropped to avoid bleed-through.
    TransitionInProgress,

    /// The backend declined to produce this frame.
    GrabRefused(String),

    /// A frame dimension computation overflowed.
    BufferOverflow,

    Platform(anyhow::Error),
}

impl CaptureError {
    /// Collapse the error onto the consumer-facing result split. Only
    /// missing or destroyed sources are unrecoverable; every other failure
    /// is expected to clear up within a frame or two.
    pub fn status(&self) -> CaptureStatus {
        match self {
            Self::NoSourceSelected | Self::SourceClosed => CaptureStatus::PermanentError,
            Self::WindowBoundsUnavailable
            | Self::TransitionInProgress
            | Self::GrabRefused(_)
            | Self::BufferOverflow
            | Self::Platform(_) => CaptureStatus::TemporaryError,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.status() == CaptureStatus::TemporaryError
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSourceSelected => write!(f, "no capture source has been selected"),
            Self::SourceClosed => write!(f, "the selected window no longer exists"),
            Self::WindowBoundsUnavailable => {
                write!(f, "failed to measure the drawable window area")
            }
            Self::TransitionInProgress => {
                write!(f, "window order changed recently, frame dropped")
            }
            Self::GrabRefused(message) => write!(f, "capture backend refused the frame: {message}"),
            Self::BufferOverflow => write!(f, "frame buffer size overflow"),
            Self::Platform(inner) => write!(f, "{inner}"),
        }
    }
}

impl std::error::Error for CaptureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Platform(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }
}

pub type CaptureResult<T> = Result<T, CaptureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_missing_sources_are_permanent() {
        assert_eq!(
            CaptureError::NoSourceSelected.status(),
            CaptureStatus::PermanentError
        );
        assert_eq!(
            CaptureError::SourceClosed.status(),
            CaptureStatus::PermanentError
        );
        assert_eq!(
            CaptureError::TransitionInProgress.status(),
            CaptureStatus::TemporaryError
        );
        assert!(CaptureError::WindowBoundsUnavailable.is_retryable());
        assert!(!CaptureError::SourceClosed.is_retryable());
    }
}
