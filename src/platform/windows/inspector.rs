//! Win32 implementation of the window-tree queries.
//!
//! Every query tolerates vanished or invalid handles: windows come and go
//! between the enumeration and the inspection, so a failing call maps to
//! the conservative answer (`false`, `None`, an empty string) instead of
//! an error.

use std::cell::OnceCell;
use std::ffi::c_void;
use std::mem::size_of;

use tracing::debug;
use windows::Win32::Foundation::{BOOL, HWND, LPARAM, RECT};
use windows::Win32::Graphics::Dwm::{
    DWMWA_CLOAKED, DwmGetWindowAttribute, DwmIsCompositionEnabled,
};
use windows::Win32::Graphics::Gdi::{
    COMPLEXREGION, CreateRectRgn, DeleteObject, GetRgnBox, GetWindowRgn, NULLREGION, SIMPLEREGION,
};
use windows::Win32::System::Com::{CLSCTX_ALL, CoCreateInstance};
use windows::Win32::UI::Shell::{IVirtualDesktopManager, VirtualDesktopManager};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumChildWindows, EnumWindows, FindWindowExW, GA_ROOT, GA_ROOTOWNER, GUI_INMOVESIZE,
    GUITHREADINFO, GWL_EXSTYLE, GWL_STYLE, GetAncestor, GetClassNameW, GetClientRect,
    GetGUIThreadInfo, GetLayeredWindowAttributes, GetParent, GetSystemMetrics, GetWindowLongW,
    GetWindowRect, GetWindowTextW, GetWindowThreadProcessId, IsIconic, IsWindow, IsWindowVisible,
    IsZoomed, LAYERED_WINDOW_ATTRIBUTES_FLAGS, LWA_ALPHA, LWA_COLORKEY, SM_CXSIZEFRAME,
    SM_CXVIRTUALSCREEN, SM_CYVIRTUALSCREEN, SM_XVIRTUALSCREEN, SM_YVIRTUALSCREEN, WS_CAPTION,
    WS_EX_LAYERED, WS_EX_NOACTIVATE, WS_EX_TOOLWINDOW, WS_EX_TOPMOST,
};
use windows::core::PCWSTR;

use crate::geometry::DesktopRect;
use crate::inspect::{
    LayeredAttributes, MAX_NAME_LENGTH, WindowInspector, WindowRegion, WindowThreadIds,
};
use crate::window::WindowId;

const CHROME_WINDOW_CLASS: &str = "Chrome_WidgetWin_1";

fn hwnd(window: WindowId) -> HWND {
    HWND(window.raw_handle() as *mut c_void)
}

fn window_id(handle: HWND) -> WindowId {
    WindowId::from_raw_handle(handle.0 as isize)
}

fn rect_from_win32(rect: RECT) -> DesktopRect {
    DesktopRect::from_ltrb(rect.left, rect.top, rect.right, rect.bottom)
}

fn to_wide(value: &str) -> Vec<u16> {
    value.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Per-thread virtual desktop manager. Creating the COM object requires
/// the calling thread to have an apartment, and the interface is not
/// marshaled across threads, so each thread builds its own on first use.
/// `None` when creation failed; virtual-desktop filtering is then skipped.
fn desktop_manager() -> Option<IVirtualDesktopManager> {
    thread_local! {
        static MANAGER: OnceCell<Option<IVirtualDesktopManager>> = const { OnceCell::new() };
    }
    MANAGER.with(|cell| {
        cell.get_or_init(|| {
            match unsafe { CoCreateInstance(&VirtualDesktopManager, None, CLSCTX_ALL) } {
                Ok(manager) => Some(manager),
                Err(error) => {
                    debug!(%error, "virtual desktop manager unavailable");
                    None
                }
            }
        })
        .clone()
    })
}

fn is_on_current_virtual_desktop(handle: HWND) -> bool {
    let Some(manager) = desktop_manager() else {
        return true;
    };
    match unsafe { manager.IsWindowOnCurrentVirtualDesktop(handle) } {
        Ok(on_desktop) => on_desktop.as_bool(),
        Err(_) => true,
    }
}

fn extended_style(handle: HWND) -> u32 {
    unsafe { GetWindowLongW(handle, GWL_EXSTYLE) as u32 }
}

fn bounded_name(length: i32, buffer: &[u16]) -> String {
    let length = length.clamp(0, buffer.len() as i32) as usize;
    String::from_utf16_lossy(&buffer[..length])
}

struct EnumVisitor<'a> {
    visitor: &'a mut dyn FnMut(WindowId) -> bool,
}

unsafe extern "system" fn enum_visitor_proc(handle: HWND, lparam: LPARAM) -> BOOL {
    let context = unsafe { &mut *(lparam.0 as *mut EnumVisitor<'_>) };
    BOOL::from((context.visitor)(window_id(handle)))
}

struct ChildClassSearch {
    class_name: Vec<u16>,
    found: bool,
}

unsafe extern "system" fn child_class_search_proc(handle: HWND, lparam: LPARAM) -> BOOL {
    let context = unsafe { &mut *(lparam.0 as *mut ChildClassSearch) };
    let mut buffer = [0u16; MAX_NAME_LENGTH];
    let length = unsafe { GetClassNameW(handle, &mut buffer) };
    let length = length.clamp(0, MAX_NAME_LENGTH as i32) as usize;
    // Compare without the trailing NUL of the needle.
    let needle = &context.class_name[..context.class_name.len() - 1];
    if length == needle.len() && buffer[..length] == *needle {
        context.found = true;
        return BOOL::from(false);
    }
    BOOL::from(true)
}

/// Stateless inspector backed by live Win32 queries. Threads that use the
/// virtual-desktop query must have COM initialized; see
/// [`desktop_manager`].
#[derive(Default)]
pub(crate) struct Win32WindowInspector;

impl Win32WindowInspector {
    pub(crate) fn new() -> Self {
        Self
    }
}

impl WindowInspector for Win32WindowInspector {
    fn is_window(&self, window: WindowId) -> bool {
        !window.is_null() && unsafe { IsWindow(hwnd(window)) }.as_bool()
    }

    fn is_window_visible_on_current_desktop(&self, window: WindowId) -> bool {
        let handle = hwnd(window);
        self.is_window(window)
            && unsafe { IsWindowVisible(handle) }.as_bool()
            && !unsafe { IsIconic(handle) }.as_bool()
            && !self.is_window_cloaked(window)
            && is_on_current_virtual_desktop(handle)
    }

    fn is_window_cloaked(&self, window: WindowId) -> bool {
        let mut cloaked = 0u32;
        let queried = unsafe {
            DwmGetWindowAttribute(
                hwnd(window),
                DWMWA_CLOAKED,
                (&mut cloaked as *mut u32).cast(),
                size_of::<u32>() as u32,
            )
        };
        queried.is_ok() && cloaked != 0
    }

    fn is_minimized(&self, window: WindowId) -> bool {
        unsafe { IsIconic(hwnd(window)) }.as_bool()
    }

    fn is_composition_enabled(&self) -> bool {
        unsafe { DwmIsCompositionEnabled() }
            .map(|enabled| enabled.as_bool())
            .unwrap_or(false)
    }

    fn is_windows8_or_later(&self) -> bool {
        use std::sync::OnceLock;
        static VALUE: OnceLock<bool> = OnceLock::new();
        *VALUE.get_or_init(|| {
            windows_version::OsVersion::current() >= windows_version::OsVersion::new(6, 2, 0, 0)
        })
    }

    fn window_rect(&self, window: WindowId) -> Option<DesktopRect> {
        let mut rect = RECT::default();
        unsafe { GetWindowRect(hwnd(window), &mut rect) }.ok()?;
        Some(rect_from_win32(rect))
    }

    fn content_rect(&self, window: WindowId) -> Option<DesktopRect> {
        let handle = hwnd(window);
        let mut result = self.window_rect(window)?;

        let mut client = RECT::default();
        unsafe { GetClientRect(handle, &mut client) }.ok()?;
        let client_width = client.right - client.left;

        // GetClientRect is zero-based, so the border width has to be
        // estimated from the width difference. The title bar stays part of
        // the content, so only the left, right and bottom edges shrink.
        if client_width > 0 && client_width < result.width() {
            let border = (result.width() - client_width) / 2;
            result.extend(-border, 0, -border, -border);
        }
        Some(result)
    }

    fn cropped_window_rect(&self, window: WindowId) -> Option<(DesktopRect, DesktopRect)> {
        let original = self.window_rect(window)?;
        let mut cropped = original;
        if unsafe { IsZoomed(hwnd(window)) }.as_bool() {
            // A maximized window hangs its resize border off every screen
            // edge.
            let border = unsafe { GetSystemMetrics(SM_CXSIZEFRAME) };
            cropped.extend(-border, -border, -border, -border);
        }
        Some((cropped, original))
    }

    fn window_region(&self, window: WindowId) -> WindowRegion {
        let region = unsafe { CreateRectRgn(0, 0, 0, 0) };
        if region.0.is_null() {
            return WindowRegion::None;
        }
        let region_type = unsafe { GetWindowRgn(hwnd(window), region) };

        let result = if region_type == NULLREGION {
            WindowRegion::Empty
        } else if region_type == COMPLEXREGION {
            WindowRegion::Complex
        } else if region_type == SIMPLEREGION {
            // The box of a simple region is the region itself, in window
            // coordinates.
            let mut rect = RECT::default();
            unsafe {
                let _ = GetRgnBox(region, &mut rect);
            }
            WindowRegion::Simple(rect_from_win32(rect))
        } else {
            // RGN_ERROR: no region is set for the window.
            WindowRegion::None
        };

        unsafe {
            let _ = DeleteObject(region);
        }
        result
    }

    fn has_layered_style(&self, window: WindowId) -> bool {
        extended_style(hwnd(window)) & WS_EX_LAYERED.0 != 0
    }

    fn layered_attributes(&self, window: WindowId) -> Option<LayeredAttributes> {
        let mut color_key = windows::Win32::Foundation::COLORREF(0);
        let mut alpha = 0u8;
        let mut flags = LAYERED_WINDOW_ATTRIBUTES_FLAGS(0);
        // Fails for windows updated through UpdateLayeredWindow; their
        // opacity is unknowable.
        unsafe {
            GetLayeredWindowAttributes(
                hwnd(window),
                Some(&mut color_key),
                Some(&mut alpha),
                Some(&mut flags),
            )
        }
        .ok()?;
        Some(LayeredAttributes {
            color_key_active: flags.contains(LWA_COLORKEY),
            alpha_active: flags.contains(LWA_ALPHA),
            alpha,
        })
    }

    fn has_caption_style(&self, window: WindowId) -> bool {
        let style = unsafe { GetWindowLongW(hwnd(window), GWL_STYLE) as u32 };
        style & WS_CAPTION.0 != 0
    }

    fn title(&self, window: WindowId) -> String {
        let mut buffer = [0u16; MAX_NAME_LENGTH];
        let length = unsafe { GetWindowTextW(hwnd(window), &mut buffer) };
        bounded_name(length, &buffer)
    }

    fn class_name(&self, window: WindowId) -> String {
        let mut buffer = [0u16; MAX_NAME_LENGTH];
        let length = unsafe { GetClassNameW(hwnd(window), &mut buffer) };
        bounded_name(length, &buffer)
    }

    fn root_ancestor(&self, window: WindowId) -> WindowId {
        window_id(unsafe { GetAncestor(hwnd(window), GA_ROOT) })
    }

    fn owner_root_ancestor(&self, window: WindowId) -> WindowId {
        window_id(unsafe { GetAncestor(hwnd(window), GA_ROOTOWNER) })
    }

    fn parent(&self, window: WindowId) -> WindowId {
        match unsafe { GetParent(hwnd(window)) } {
            Ok(parent) => window_id(parent),
            Err(_) => WindowId::NULL,
        }
    }

    fn thread_process_ids(&self, window: WindowId) -> WindowThreadIds {
        let mut process_id = 0u32;
        let thread_id =
            unsafe { GetWindowThreadProcessId(hwnd(window), Some(&mut process_id)) };
        WindowThreadIds {
            process_id,
            thread_id,
        }
    }

    fn is_chrome_notification(&self, window: WindowId) -> bool {
        if self.class_name(window) != CHROME_WINDOW_CLASS {
            return false;
        }
        let style = extended_style(hwnd(window));
        style & WS_EX_NOACTIVATE.0 != 0
            && style & WS_EX_TOOLWINDOW.0 != 0
            && style & WS_EX_TOPMOST.0 != 0
    }

    fn child_windows_contain(&self, window: WindowId, class_name: &str) -> bool {
        let mut search = ChildClassSearch {
            class_name: to_wide(class_name),
            found: false,
        };
        unsafe {
            let _ = EnumChildWindows(
                hwnd(window),
                Some(child_class_search_proc),
                LPARAM(&mut search as *mut ChildClassSearch as isize),
            );
        }
        search.found
    }

    fn full_screen_rect(&self) -> DesktopRect {
        unsafe {
            DesktopRect::from_xywh(
                GetSystemMetrics(SM_XVIRTUALSCREEN),
                GetSystemMetrics(SM_YVIRTUALSCREEN),
                GetSystemMetrics(SM_CXVIRTUALSCREEN),
                GetSystemMetrics(SM_CYVIRTUALSCREEN),
            )
        }
    }

    fn enumerate_top_level_windows(&self, visitor: &mut dyn FnMut(WindowId) -> bool) {
        let mut context = EnumVisitor { visitor };
        unsafe {
            // EnumWindows reports an error when the callback stops the
            // enumeration early; both outcomes are fine here.
            let _ = EnumWindows(
                Some(enum_visitor_proc),
                LPARAM(&mut context as *mut EnumVisitor<'_> as isize),
            );
        }
    }

    fn enumerate_child_windows(&self, window: WindowId, visitor: &mut dyn FnMut(WindowId) -> bool) {
        let mut context = EnumVisitor { visitor };
        unsafe {
            let _ = EnumChildWindows(
                hwnd(window),
                Some(enum_visitor_proc),
                LPARAM(&mut context as *mut EnumVisitor<'_> as isize),
            );
        }
    }

    fn find_windows_by_class(&self, class_name: &str) -> Vec<WindowId> {
        let class_wide = to_wide(class_name);
        let mut found = Vec::new();
        let mut previous = HWND::default();
        loop {
            let next = unsafe {
                FindWindowExW(
                    HWND::default(),
                    previous,
                    PCWSTR(class_wide.as_ptr()),
                    PCWSTR::null(),
                )
            };
            match next {
                Ok(handle) if !handle.0.is_null() => {
                    found.push(window_id(handle));
                    previous = handle;
                }
                _ => break,
            }
        }
        found
    }

    fn thread_in_move_size(&self, thread_id: u32) -> bool {
        let mut info = GUITHREADINFO {
            cbSize: size_of::<GUITHREADINFO>() as u32,
            ..Default::default()
        };
        unsafe { GetGUIThreadInfo(thread_id, &mut info) }
            .map(|_| info.flags.contains(GUI_INMOVESIZE))
            .unwrap_or(false)
    }
}
