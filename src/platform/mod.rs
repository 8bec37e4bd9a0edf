use std::sync::Arc;

use crate::backend::FrameGrabber;
use crate::error::CaptureResult;
use crate::inspect::WindowInspector;
use crate::options::CaptureOptions;

#[cfg(target_os = "windows")]
pub(crate) mod windows;

#[cfg(target_os = "windows")]
pub(crate) use windows::init_worker_thread;

#[cfg(target_os = "windows")]
pub(crate) fn default_inspector() -> CaptureResult<Arc<dyn WindowInspector>> {
    Ok(Arc::new(windows::inspector::Win32WindowInspector::new()))
}

#[cfg(target_os = "windows")]
pub(crate) fn new_screen_grabber() -> CaptureResult<Box<dyn FrameGrabber>> {
    Ok(Box::new(windows::gdi::GdiScreenGrabber::new()?))
}

#[cfg(target_os = "windows")]
pub(crate) fn new_window_grabber(
    options: &CaptureOptions,
    graphics_grabber: Option<Box<dyn FrameGrabber>>,
) -> CaptureResult<Box<dyn FrameGrabber>> {
    Ok(Box::new(windows::gdi::GdiWindowGrabber::new(
        options,
        graphics_grabber,
    )?))
}

#[cfg(not(target_os = "windows"))]
fn unsupported_error() -> crate::error::CaptureError {
    crate::error::CaptureError::Platform(anyhow::anyhow!(
        "window capture is only supported on Windows"
    ))
}

#[cfg(not(target_os = "windows"))]
pub(crate) fn default_inspector() -> CaptureResult<Arc<dyn WindowInspector>> {
    Err(unsupported_error())
}

#[cfg(not(target_os = "windows"))]
pub(crate) fn new_screen_grabber() -> CaptureResult<Box<dyn FrameGrabber>> {
    Err(unsupported_error())
}

#[cfg(not(target_os = "windows"))]
pub(crate) fn new_window_grabber(
    _options: &CaptureOptions,
    _graphics_grabber: Option<Box<dyn FrameGrabber>>,
) -> CaptureResult<Box<dyn FrameGrabber>> {
    Err(unsupported_error())
}

#[cfg(not(target_os = "windows"))]
pub(crate) fn init_worker_thread() {}
