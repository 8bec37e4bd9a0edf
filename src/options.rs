use crate::window::WindowId;

/// Configuration consumed by the cropping capturer.
#[derive(Clone, Copy, Debug, Default)]
pub struct CaptureOptions {
    /// Enable the modern-app (UWP) aware occlusion predicates and the
    /// background occluder tracker. Only effective on Windows 8 or later;
    /// the tracker is what makes composition-hosted shell windows (core
    /// windows, XAML popups, the taskbar flyouts) visible to the
    /// screen-vs-window decision.
    pub allow_uwp_window_capture: bool,

    /// A window the occlusion scan must ignore, typically the consumer's
    /// own preview UI floating above the shared window.
    pub excluded_window: WindowId,

    /// Let the window path hand off to an injected
    /// `Windows.Graphics.Capture` grabber once the first frames have been
    /// produced by GDI.
    pub allow_graphics_grabber: bool,

    /// Wrap delivered frames in an external updated-region diff layer.
    /// The capturer itself only forwards the flag; the diff layer is not
    /// part of this crate.
    pub detect_updated_region: bool,
}
