use crate::error::{CaptureResult, CaptureStatus};
use crate::frame::Frame;
use crate::window::WindowId;

/// Which underlying grabber the capturer is currently routing frames
/// through. `Unknown` until the first decision after a source change.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackendChoice {
    #[default]
    Unknown,
    /// Capture the whole display and crop to the window rectangle.
    Screen,
    /// Capture the window surface directly.
    Window,
}

impl BackendChoice {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Screen => "screen",
            Self::Window => "window",
        }
    }
}

/// Receives the result of every `capture_frame` call: exactly one
/// invocation per capture, with a frame present iff the status is
/// `Success`.
pub trait FrameConsumer {
    fn on_capture_result(&mut self, status: CaptureStatus, frame: Option<Frame>);
}

/// A pixel-reading backend. Implementations exist for full-display capture
/// (frames positioned at the virtual-screen origin) and per-window capture
/// (frames positioned at the window's drawable rect); an externally
/// supplied WinRT grabber can be injected behind the same contract.
///
/// Errors carry their consumer-facing classification via
/// [`CaptureError::status`](crate::CaptureError::status).
pub trait FrameGrabber: Send {
    /// Bind the grabber to a source. Display grabbers ignore the handle.
    /// Returns false when the source cannot be captured by this backend.
    fn select_source(&mut self, window: WindowId) -> bool;

    fn capture_frame(&mut self) -> CaptureResult<Frame>;
}
