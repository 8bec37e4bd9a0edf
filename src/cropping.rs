//! The cropping window capturer.
//!
//! Per-window capture on Windows is a trade-off: reading the window surface
//! directly works while the window is occluded but cannot see DirectX
//! content, while grabbing the whole display and cropping is fast and
//! DX-safe but leaks whatever overlaps the window. This module houses the
//! decision engine that picks between the two on every frame: the
//! eligibility-and-occlusion predicate, the debounce against recent z-order
//! changes, and the hysteresis that drops one frame around each switch so a
//! half-finished desktop animation never reaches the consumer.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::backend::{BackendChoice, FrameConsumer, FrameGrabber};
use crate::env_config::define_env_knob;
use crate::error::{CaptureError, CaptureResult, CaptureStatus};
use crate::frame::Frame;
use crate::geometry::DesktopRect;
use crate::inspect::{WindowInspector, WindowRegion};
use crate::occluder_tracker::OccluderTracker;
use crate::occlusion::is_selected_window_on_top;
use crate::options::CaptureOptions;
use crate::selected::SelectedWindowContext;
use crate::window::WindowId;

define_env_knob!(enabled_unless(
    occluder_tracking_enabled,
    "CROP_CAPTURE_DISABLE_OCCLUDER_TRACKING"
));

// A z-order change within this window forces the frame to be dropped.
define_env_knob!(ms_with_default(
    change_debounce_ms,
    "CROP_CAPTURE_DEBOUNCE_MS",
    500
));

// One display frame at 30 Hz: long enough for the OS full-screen
// transition animation to settle before the first cropped screen grab.
define_env_knob!(ms_with_default(
    screen_transition_sleep_ms,
    "CROP_CAPTURE_TRANSITION_SLEEP_MS",
    34
));

pub struct CroppingWindowCapturerBuilder {
    options: CaptureOptions,
    inspector: Option<Arc<dyn WindowInspector>>,
    screen_grabber: Option<Box<dyn FrameGrabber>>,
    window_grabber: Option<Box<dyn FrameGrabber>>,
    graphics_grabber: Option<Box<dyn FrameGrabber>>,
}

impl CroppingWindowCapturerBuilder {
    pub fn new(options: CaptureOptions) -> Self {
        Self {
            options,
            inspector: None,
            screen_grabber: None,
            window_grabber: None,
            graphics_grabber: None,
        }
    }

    /// Replace the live window-tree inspector, e.g. with a test double.
    pub fn with_inspector(mut self, inspector: Arc<dyn WindowInspector>) -> Self {
        self.inspector = Some(inspector);
        self
    }

    pub fn with_screen_grabber(mut self, grabber: Box<dyn FrameGrabber>) -> Self {
        self.screen_grabber = Some(grabber);
        self
    }

    pub fn with_window_grabber(mut self, grabber: Box<dyn FrameGrabber>) -> Self {
        self.window_grabber = Some(grabber);
        self
    }

    /// Inject a `Windows.Graphics.Capture` grabber for the window path to
    /// hand off to once warmed up. Ignored when a custom window grabber is
    /// installed, and only used when the options allow it.
    pub fn with_graphics_grabber(mut self, grabber: Box<dyn FrameGrabber>) -> Self {
        self.graphics_grabber = Some(grabber);
        self
    }

    pub fn build(self) -> CaptureResult<CroppingWindowCapturer> {
        let inspector = match self.inspector {
            Some(inspector) => inspector,
            None => crate::platform::default_inspector()?,
        };
        let screen_grabber = match self.screen_grabber {
            Some(grabber) => grabber,
            None => crate::platform::new_screen_grabber()?,
        };
        let window_grabber = match self.window_grabber {
            Some(grabber) => grabber,
            None => crate::platform::new_window_grabber(&self.options, self.graphics_grabber)?,
        };
        Ok(CroppingWindowCapturer {
            options: self.options,
            inspector,
            screen_grabber,
            window_grabber,
            consumer: None,
            selected_window: WindowId::NULL,
            window_region_rect: DesktopRect::default(),
            capturer: BackendChoice::Unknown,
            use_screen_cache: None,
            tracker: None,
        })
    }
}

/// Capturer for a single user-selected window that switches between a
/// cropped full-display grab and a direct window grab depending on whether
/// the window is the unoccluded top of the z-order.
pub struct CroppingWindowCapturer {
    options: CaptureOptions,
    inspector: Arc<dyn WindowInspector>,
    screen_grabber: Box<dyn FrameGrabber>,
    window_grabber: Box<dyn FrameGrabber>,
    consumer: Option<Box<dyn FrameConsumer>>,
    selected_window: WindowId,
    /// Outer rectangle of the selection, refreshed per frame; shrunk to
    /// the region box when the window carries a rectangular region.
    window_region_rect: DesktopRect,
    capturer: BackendChoice,
    /// Pins the screen-vs-window decision across the capture-result path
    /// of the same frame, so a transition drop or a temporary screen
    /// failure is not reinterpreted as "fall back to window capture".
    /// `None` between frames; an asynchronous delivery then recomputes
    /// the decision.
    use_screen_cache: Option<bool>,
    tracker: Option<OccluderTracker>,
}

impl CroppingWindowCapturer {
    pub fn builder(options: CaptureOptions) -> CroppingWindowCapturerBuilder {
        CroppingWindowCapturerBuilder::new(options)
    }

    /// Build with the platform inspector and GDI grabbers.
    pub fn new(options: CaptureOptions) -> CaptureResult<Self> {
        Self::builder(options).build()
    }

    /// Register the consumer that receives every capture result.
    pub fn start(&mut self, consumer: Box<dyn FrameConsumer>) {
        self.consumer = Some(consumer);
    }

    pub fn current_backend(&self) -> BackendChoice {
        self.capturer
    }

    /// Bind to a new source window. Fails when the handle is not a valid,
    /// visible, non-minimized window.
    pub fn select_source(&mut self, window: WindowId) -> bool {
        self.capturer = BackendChoice::Unknown;
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.select_window(window);
        }

        if !self.inspector.is_window(window)
            || self.inspector.is_minimized(window)
            || !self.inspector.is_window_visible_on_current_desktop(window)
        {
            warn!(
                window = %window.stable_id(),
                "rejecting source: not a visible window"
            );
            return false;
        }

        self.selected_window = window;
        let screen_ok = self.screen_grabber.select_source(window);
        let window_ok = self.window_grabber.select_source(window);
        screen_ok && window_ok
    }

    /// Capture one frame; the consumer receives exactly one result.
    pub fn capture_frame(&mut self) {
        if self.selected_window.is_null() {
            self.deliver(CaptureStatus::PermanentError, None);
            return;
        }

        self.window_region_rect = self
            .inspector
            .window_rect(self.selected_window)
            .unwrap_or_default();

        if self.options.allow_uwp_window_capture
            && occluder_tracking_enabled()
            && self.tracker.is_none()
        {
            let mut tracker = OccluderTracker::new(Arc::clone(&self.inspector));
            tracker.select_window(self.selected_window);
            self.tracker = Some(tracker);
        }

        let debounce = change_debounce_ms();
        if self
            .tracker
            .as_mut()
            .is_some_and(|tracker| tracker.is_changed(debounce))
        {
            debug!(debounce, "window order changed recently, dropping frame");
            // Pin the decision so the synthetic error is forwarded
            // untouched instead of triggering the window fallback.
            self.use_screen_cache = Some(true);
            self.forward_screen_result(Err(CaptureError::TransitionInProgress));
            self.use_screen_cache = None;
            return;
        }

        debug_assert!(
            self.use_screen_cache.is_none(),
            "the previous frame must reset the pinned decision"
        );
        let use_screen = self.should_use_screen_grabber();
        self.use_screen_cache = Some(use_screen);

        if self.capturer != BackendChoice::Unknown
            && self.capturer != BackendChoice::Screen
            && use_screen
        {
            let sleep_ms = screen_transition_sleep_ms();
            info!(sleep_ms, "switching to cropped screen capture");
            std::thread::sleep(Duration::from_millis(sleep_ms));
            self.capturer = BackendChoice::Screen;
            self.forward_screen_result(Err(CaptureError::TransitionInProgress));
            self.use_screen_cache = None;
            return;
        }

        self.capturer = if use_screen {
            BackendChoice::Screen
        } else {
            BackendChoice::Window
        };
        debug!(backend = self.capturer.as_str(), "capturing");

        if use_screen {
            let outcome = self.screen_grabber.capture_frame();
            self.on_capture_result(outcome);
        } else {
            match self.window_grabber.capture_frame() {
                Ok(frame) => self.deliver(CaptureStatus::Success, Some(frame)),
                Err(error) => {
                    warn!(%error, "window grabber failed");
                    self.deliver(error.status(), None);
                }
            }
        }
        self.use_screen_cache = None;
    }

    /// Handle a result produced by the screen grabber.
    ///
    /// Synchronous grabs arrive here from `capture_frame` with the
    /// decision still pinned. An asynchronous backend delivers between
    /// frames instead; the decision is then recomputed, and a screen
    /// frame that went stale in flight falls back to one direct window
    /// grab. A z-order change observed during the grab drops the frame
    /// either way.
    pub fn on_capture_result(&mut self, outcome: CaptureResult<Frame>) {
        let debounce = change_debounce_ms();
        if self
            .tracker
            .as_mut()
            .is_some_and(|tracker| tracker.is_changed(debounce))
        {
            debug!("window order changed during capture, dropping frame");
            self.use_screen_cache = Some(true);
            self.forward_screen_result(Err(CaptureError::TransitionInProgress));
            self.use_screen_cache = None;
            return;
        }

        self.forward_screen_result(outcome);
    }

    /// The visible portion of the selection, re-based to the virtual
    /// screen origin: drawable rect ∩ region rect ∩ full screen.
    pub fn window_rect_in_virtual_screen(&self) -> DesktopRect {
        let Some((cropped, _original)) = self.inspector.cropped_window_rect(self.selected_window)
        else {
            warn!("failed to measure the selected window");
            return DesktopRect::default();
        };

        let mut window_rect = cropped.intersection(self.window_region_rect);
        let screen_rect = self.inspector.full_screen_rect();
        window_rect.intersect_with(screen_rect);
        window_rect.translated(-screen_rect.left(), -screen_rect.top())
    }

    /// Forward one screen-path result to the consumer: fall back to a
    /// window grab when the screen decision no longer holds, otherwise
    /// crop the frame to the visible window rectangle.
    fn forward_screen_result(&mut self, outcome: CaptureResult<Frame>) {
        if !self.cached_or_computed_use_screen() {
            info!("window no longer on top when the screen grabber finished");
            match self.window_grabber.capture_frame() {
                Ok(frame) => self.deliver(CaptureStatus::Success, Some(frame)),
                Err(error) => {
                    warn!(%error, "window grabber failed after screen fallback");
                    self.deliver(error.status(), None);
                }
            }
            return;
        }

        let frame = match outcome {
            Ok(frame) => frame,
            Err(error) => {
                debug!(%error, "no screen frame to deliver");
                self.deliver(error.status(), None);
                return;
            }
        };

        let window_rect = self.window_rect_in_virtual_screen();
        if window_rect.is_empty() {
            self.deliver(CaptureStatus::TemporaryError, None);
            return;
        }
        match frame.cropped(window_rect) {
            Ok(cropped) => self.deliver(CaptureStatus::Success, Some(cropped)),
            Err(error) => {
                warn!(%error, "failed to crop the screen frame");
                self.deliver(CaptureStatus::TemporaryError, None);
            }
        }
    }

    fn cached_or_computed_use_screen(&mut self) -> bool {
        match self.use_screen_cache {
            Some(pinned) => pinned,
            None => self.should_use_screen_grabber(),
        }
    }

    /// Whether the cropped-screen path can faithfully reproduce the
    /// selection this frame. Every failure inside the predicate biases
    /// toward `false`, since the window grabber always produces something.
    fn should_use_screen_grabber(&mut self) -> bool {
        let inspector = Arc::clone(&self.inspector);
        let selected = self.selected_window;

        // Without composition the display read-back would miss layered
        // surfaces outright (pre-Windows-8 systems can switch it off).
        if !inspector.is_windows8_or_later() && !inspector.is_composition_enabled() {
            return false;
        }

        if !inspector.is_window_visible_on_current_desktop(selected) {
            return false;
        }

        // A translucent window lets occluded content shine through the
        // cropped screen image. Windows updated with per-pixel alpha make
        // the attributes unreadable and are refused wholesale.
        if inspector.has_layered_style(selected) {
            match inspector.layered_attributes(selected) {
                None => return false,
                Some(attributes) if attributes.is_translucent() => return false,
                Some(_) => {}
            }
        }

        if self.window_region_rect == DesktopRect::default() {
            return false;
        }

        let Some(mut content_rect) = inspector.content_rect(selected) else {
            return false;
        };

        match inspector.window_region(selected) {
            WindowRegion::Empty | WindowRegion::Complex => return false,
            WindowRegion::Simple(region_box) => {
                // The region box is in window coordinates; the system only
                // permits drawing inside it.
                let translated = region_box
                    .translated(self.window_region_rect.left(), self.window_region_rect.top());
                self.window_region_rect.intersect_with(translated);
                content_rect.intersect_with(translated);
            }
            WindowRegion::None => {}
        }

        // A maximized window hides its border off-screen, so the clipping
        // test must use the drawable area rather than the outer rect.
        if !inspector.full_screen_rect().contains_rect(content_rect) {
            return false;
        }

        let core_windows = self
            .tracker
            .as_ref()
            .map(|tracker| tracker.core_windows())
            .unwrap_or_default();

        let context = SelectedWindowContext::new(inspector.as_ref(), selected, content_rect);
        let allow_uwp = self.options.allow_uwp_window_capture && inspector.is_windows8_or_later();
        is_selected_window_on_top(
            &context,
            self.options.excluded_window,
            allow_uwp,
            &core_windows,
        )
    }

    fn deliver(&mut self, status: CaptureStatus, frame: Option<Frame>) {
        debug_assert!(
            (status == CaptureStatus::Success) == frame.is_some(),
            "a frame accompanies exactly the success status"
        );
        if let Some(consumer) = self.consumer.as_mut() {
            consumer.on_capture_result(status, frame);
        }
    }

    #[cfg(test)]
    fn tracker_mut(&mut self) -> Option<&mut OccluderTracker> {
        self.tracker.as_mut()
    }
}
