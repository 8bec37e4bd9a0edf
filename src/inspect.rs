use crate::geometry::DesktopRect;
use crate::window::WindowId;

/// Titles and class names are truncated to this many UTF-16 units when
/// read from the OS.
pub const MAX_NAME_LENGTH: usize = 256;

/// Class name of the core window hosting a modern (UWP) app's content.
pub const CORE_WINDOW_CLASS: &str = "Windows.UI.Core.CoreWindow";

/// Class name of the input-method switcher flyout.
pub const INPUT_SWITCH_CLASS: &str = "Shell_InputSwitchTopLevelWindow";

/// Class name of the taskbar.
pub const TRAY_WINDOW_CLASS: &str = "Shell_TrayWnd";

/// Shell popup classes that accompany a visible taskbar but are not always
/// reported by a top-level enumeration: task-list thumbnails, the system
/// menu, tooltips, XAML windowed popups, and drop shadows.
pub(crate) const TRAY_ADJACENT_CLASSES: [&str; 5] = [
    "TaskListThumbnailWnd",
    "#32768",
    "tooltips_class32",
    "Xaml_WindowedPopupClass",
    "SysShadow",
];

/// Result of querying a window's clip region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowRegion {
    /// No region is set; the window draws in its full bounding rectangle.
    None,
    /// A region is set but permits no drawing at all.
    Empty,
    /// A rectangular region, in window coordinates.
    Simple(DesktopRect),
    /// A non-rectangular region.
    Complex,
}

/// Per-window transparency attributes of a layered window.
///
/// Windows updated through `UpdateLayeredWindow` (per-pixel alpha) make
/// these attributes unreadable; inspectors report that case as `None` from
/// [`WindowInspector::layered_attributes`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LayeredAttributes {
    /// A transparency color key is in effect.
    pub color_key_active: bool,
    /// A whole-window alpha value is in effect.
    pub alpha_active: bool,
    pub alpha: u8,
}

impl LayeredAttributes {
    /// Whether any part of the window content can show what is behind it.
    pub fn is_translucent(&self) -> bool {
        self.color_key_active || (self.alpha_active && self.alpha < 255)
    }
}

/// Owning process and thread of a window. A zero `thread_id` means the
/// query failed and the handle should be treated as invalid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WindowThreadIds {
    pub process_id: u32,
    pub thread_id: u32,
}

impl WindowThreadIds {
    pub fn is_valid(&self) -> bool {
        self.thread_id != 0
    }
}

/// Read-only queries over the live window tree.
///
/// This is the seam between the capture decision engine and the OS: the
/// occlusion scan, the occluder tracker, and the backend selector only talk
/// to the window manager through this trait, which keeps them deterministic
/// under test. The Win32 implementation lives in `platform::windows`.
///
/// All queries are failure-tolerant: an invalid or vanished handle yields
/// `false`, an empty string, or `None` rather than an error.
pub trait WindowInspector: Send + Sync {
    fn is_window(&self, window: WindowId) -> bool;

    /// Visible, not minimized, not cloaked, and on the user's current
    /// virtual desktop.
    fn is_window_visible_on_current_desktop(&self, window: WindowId) -> bool;

    /// Hidden by the compositor without being minimized.
    fn is_window_cloaked(&self, window: WindowId) -> bool;

    fn is_minimized(&self, window: WindowId) -> bool;

    /// Whether desktop composition is active. Always true on Windows 8+.
    fn is_composition_enabled(&self) -> bool;

    fn is_windows8_or_later(&self) -> bool;

    /// The window's outer bounding rectangle in virtual-screen coordinates.
    fn window_rect(&self, window: WindowId) -> Option<DesktopRect>;

    /// The drawable client area in virtual-screen coordinates: the window
    /// rectangle shrunk by the frame borders, keeping the title bar.
    fn content_rect(&self, window: WindowId) -> Option<DesktopRect>;

    /// `(cropped, original)` window rectangles in virtual-screen
    /// coordinates, where `cropped` excludes invisible frame borders
    /// (extended frame bounds under composition).
    fn cropped_window_rect(&self, window: WindowId) -> Option<(DesktopRect, DesktopRect)>;

    fn window_region(&self, window: WindowId) -> WindowRegion;

    /// The window carries the layered extended style.
    fn has_layered_style(&self, window: WindowId) -> bool;

    /// `None` when the attributes cannot be read (per-pixel alpha).
    fn layered_attributes(&self, window: WindowId) -> Option<LayeredAttributes>;

    /// The window carries a title bar (caption style).
    fn has_caption_style(&self, window: WindowId) -> bool;

    fn title(&self, window: WindowId) -> String;

    fn class_name(&self, window: WindowId) -> String;

    /// The root of the parent chain, ignoring ownership.
    fn root_ancestor(&self, window: WindowId) -> WindowId;

    /// The root of the combined parent/owner chain: for a dialog this is
    /// the application window that opened it.
    fn owner_root_ancestor(&self, window: WindowId) -> WindowId;

    /// Direct parent, or [`WindowId::NULL`] for a top-level window.
    fn parent(&self, window: WindowId) -> WindowId;

    fn thread_process_ids(&self, window: WindowId) -> WindowThreadIds;

    /// A browser notification toast (including the "sharing this window"
    /// banner) that should never count as an occluder.
    fn is_chrome_notification(&self, window: WindowId) -> bool;

    /// Whether any descendant window has the given class name.
    fn child_windows_contain(&self, window: WindowId, class_name: &str) -> bool;

    /// Bounding rectangle of the entire virtual screen, in virtual-screen
    /// coordinates.
    fn full_screen_rect(&self) -> DesktopRect;

    /// Visit root windows in top-down z-order. The visitor returns `false`
    /// to stop the enumeration.
    fn enumerate_top_level_windows(&self, visitor: &mut dyn FnMut(WindowId) -> bool);

    /// Visit all descendant windows of `window` (controls excluded). The
    /// visitor returns `false` to stop.
    fn enumerate_child_windows(&self, window: WindowId, visitor: &mut dyn FnMut(WindowId) -> bool);

    /// All top-level windows with the given class name, including ones the
    /// normal top-level enumeration does not report.
    fn find_windows_by_class(&self, class_name: &str) -> Vec<WindowId>;

    /// Whether the GUI thread is in a user-driven move or resize loop.
    fn thread_in_move_size(&self, thread_id: u32) -> bool;

    /// Whether the window's drawable area intersects `rect`. A window
    /// whose content rectangle cannot be measured never overlaps.
    fn overlaps_rect(&self, window: WindowId, rect: DesktopRect) -> bool {
        match self.content_rect(window) {
            Some(content) => content.intersects(rect),
            None => false,
        }
    }
}
