//! Deterministic in-memory window tree implementing [`WindowInspector`]
//! for the engine tests. Root windows are enumerated in insertion order,
//! which is treated as top-down z-order: the first window added is the
//! top-most.

use std::collections::HashSet;
use std::sync::Mutex;

use rustc_hash::FxHashMap;

use crate::geometry::DesktopRect;
use crate::inspect::{LayeredAttributes, WindowInspector, WindowRegion, WindowThreadIds};
use crate::window::WindowId;

#[derive(Clone, Debug)]
pub(crate) struct FakeWindow {
    pub id: WindowId,
    pub title: String,
    pub class_name: String,
    pub visible: bool,
    pub cloaked: bool,
    pub minimized: bool,
    pub content_rect: Option<DesktopRect>,
    pub window_rect: Option<DesktopRect>,
    pub cropped_rect: Option<DesktopRect>,
    pub region: WindowRegion,
    pub layered: bool,
    pub layered_attributes: Option<LayeredAttributes>,
    pub caption: bool,
    pub owner_root: WindowId,
    pub parent: WindowId,
    pub ids: WindowThreadIds,
    pub chrome_notification: bool,
    pub children: Vec<WindowId>,
}

impl FakeWindow {
    pub fn new(id: WindowId) -> Self {
        Self {
            id,
            title: String::new(),
            class_name: String::new(),
            visible: true,
            cloaked: false,
            minimized: false,
            content_rect: None,
            window_rect: None,
            cropped_rect: None,
            region: WindowRegion::None,
            layered: false,
            layered_attributes: None,
            caption: false,
            owner_root: WindowId::NULL,
            parent: WindowId::NULL,
            ids: WindowThreadIds::default(),
            chrome_notification: false,
            children: Vec::new(),
        }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn class_name(mut self, class_name: &str) -> Self {
        self.class_name = class_name.to_string();
        self
    }

    pub fn visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    pub fn cloaked(mut self, cloaked: bool) -> Self {
        self.cloaked = cloaked;
        self
    }

    pub fn minimized(mut self, minimized: bool) -> Self {
        self.minimized = minimized;
        self
    }

    pub fn content_rect(mut self, rect: DesktopRect) -> Self {
        self.content_rect = Some(rect);
        self
    }

    pub fn caption(mut self, caption: bool) -> Self {
        self.caption = caption;
        self
    }

    pub fn owner_root(mut self, owner_root: WindowId) -> Self {
        self.owner_root = owner_root;
        self
    }

    pub fn parent(mut self, parent: WindowId) -> Self {
        self.parent = parent;
        self
    }

    pub fn thread_ids(mut self, process_id: u32, thread_id: u32) -> Self {
        self.ids = WindowThreadIds {
            process_id,
            thread_id,
        };
        self
    }

    pub fn chrome_notification(mut self, flag: bool) -> Self {
        self.chrome_notification = flag;
        self
    }
}

struct TreeState {
    z_order: Vec<WindowId>,
    windows: FxHashMap<WindowId, FakeWindow>,
    windows8: bool,
    composition: bool,
    full_screen: DesktopRect,
    moving_threads: HashSet<u32>,
}

pub(crate) struct FakeWindowTree {
    state: Mutex<TreeState>,
}

impl FakeWindowTree {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TreeState {
                z_order: Vec::new(),
                windows: FxHashMap::default(),
                windows8: true,
                composition: true,
                full_screen: DesktopRect::from_xywh(0, 0, 1920, 1080),
                moving_threads: HashSet::new(),
            }),
        }
    }

    /// Register a window. Windows with a parent become children of that
    /// parent; all others join the bottom of the top-level z-order.
    pub fn add(&self, window: FakeWindow) {
        let mut state = self.state.lock().unwrap();
        let id = window.id;
        let parent = window.parent;
        state.windows.insert(id, window);
        if parent.is_null() {
            state.z_order.push(id);
        } else if let Some(parent_window) = state.windows.get_mut(&parent) {
            parent_window.children.push(id);
        }
    }

    pub fn remove(&self, id: WindowId) {
        let mut state = self.state.lock().unwrap();
        state.z_order.retain(|candidate| *candidate != id);
        state.windows.remove(&id);
    }

    /// Move a root window to the top of the z-order.
    pub fn raise_to_top(&self, id: WindowId) {
        let mut state = self.state.lock().unwrap();
        state.z_order.retain(|candidate| *candidate != id);
        state.z_order.insert(0, id);
    }

    pub fn update(&self, id: WindowId, mutate: impl FnOnce(&mut FakeWindow)) {
        let mut state = self.state.lock().unwrap();
        if let Some(window) = state.windows.get_mut(&id) {
            mutate(window);
        }
    }

    pub fn set_windows8(&self, windows8: bool) {
        self.state.lock().unwrap().windows8 = windows8;
    }

    pub fn set_composition(&self, composition: bool) {
        self.state.lock().unwrap().composition = composition;
    }

    pub fn set_full_screen(&self, rect: DesktopRect) {
        self.state.lock().unwrap().full_screen = rect;
    }

    pub fn set_thread_moving(&self, thread_id: u32, moving: bool) {
        let mut state = self.state.lock().unwrap();
        if moving {
            state.moving_threads.insert(thread_id);
        } else {
            state.moving_threads.remove(&thread_id);
        }
    }

    fn with_window<T>(&self, id: WindowId, read: impl FnOnce(&FakeWindow) -> T) -> Option<T> {
        let state = self.state.lock().unwrap();
        state.windows.get(&id).map(read)
    }

    fn walk_to_root(state: &TreeState, id: WindowId) -> WindowId {
        let mut current = id;
        loop {
            let parent = state
                .windows
                .get(&current)
                .map(|window| window.parent)
                .unwrap_or(WindowId::NULL);
            if parent.is_null() {
                return current;
            }
            current = parent;
        }
    }

    fn descendants(state: &TreeState, id: WindowId, out: &mut Vec<WindowId>) {
        if let Some(window) = state.windows.get(&id) {
            for child in &window.children {
                out.push(*child);
                Self::descendants(state, *child, out);
            }
        }
    }
}

impl WindowInspector for FakeWindowTree {
    fn is_window(&self, window: WindowId) -> bool {
        self.state.lock().unwrap().windows.contains_key(&window)
    }

    fn is_window_visible_on_current_desktop(&self, window: WindowId) -> bool {
        self.with_window(window, |w| w.visible && !w.minimized && !w.cloaked)
            .unwrap_or(false)
    }

    fn is_window_cloaked(&self, window: WindowId) -> bool {
        self.with_window(window, |w| w.cloaked).unwrap_or(false)
    }

    fn is_minimized(&self, window: WindowId) -> bool {
        self.with_window(window, |w| w.minimized).unwrap_or(false)
    }

    fn is_composition_enabled(&self) -> bool {
        self.state.lock().unwrap().composition
    }

    fn is_windows8_or_later(&self) -> bool {
        self.state.lock().unwrap().windows8
    }

    fn window_rect(&self, window: WindowId) -> Option<DesktopRect> {
        self.with_window(window, |w| w.window_rect.or(w.content_rect))
            .flatten()
    }

    fn content_rect(&self, window: WindowId) -> Option<DesktopRect> {
        self.with_window(window, |w| w.content_rect).flatten()
    }

    fn cropped_window_rect(&self, window: WindowId) -> Option<(DesktopRect, DesktopRect)> {
        let original = self.window_rect(window)?;
        let cropped = self
            .with_window(window, |w| w.cropped_rect)
            .flatten()
            .unwrap_or(original);
        Some((cropped, original))
    }

    fn window_region(&self, window: WindowId) -> WindowRegion {
        self.with_window(window, |w| w.region)
            .unwrap_or(WindowRegion::None)
    }

    fn has_layered_style(&self, window: WindowId) -> bool {
        self.with_window(window, |w| w.layered).unwrap_or(false)
    }

    fn layered_attributes(&self, window: WindowId) -> Option<LayeredAttributes> {
        self.with_window(window, |w| w.layered_attributes).flatten()
    }

    fn has_caption_style(&self, window: WindowId) -> bool {
        self.with_window(window, |w| w.caption).unwrap_or(false)
    }

    fn title(&self, window: WindowId) -> String {
        self.with_window(window, |w| w.title.clone())
            .unwrap_or_default()
    }

    fn class_name(&self, window: WindowId) -> String {
        self.with_window(window, |w| w.class_name.clone())
            .unwrap_or_default()
    }

    fn root_ancestor(&self, window: WindowId) -> WindowId {
        let state = self.state.lock().unwrap();
        Self::walk_to_root(&state, window)
    }

    fn owner_root_ancestor(&self, window: WindowId) -> WindowId {
        let state = self.state.lock().unwrap();
        let root = Self::walk_to_root(&state, window);
        let owner = state
            .windows
            .get(&window)
            .map(|w| w.owner_root)
            .unwrap_or(WindowId::NULL);
        if owner.is_null() {
            root
        } else {
            owner
        }
    }

    fn parent(&self, window: WindowId) -> WindowId {
        self.with_window(window, |w| w.parent)
            .unwrap_or(WindowId::NULL)
    }

    fn thread_process_ids(&self, window: WindowId) -> WindowThreadIds {
        self.with_window(window, |w| w.ids).unwrap_or_default()
    }

    fn is_chrome_notification(&self, window: WindowId) -> bool {
        self.with_window(window, |w| w.chrome_notification)
            .unwrap_or(false)
    }

    fn child_windows_contain(&self, window: WindowId, class_name: &str) -> bool {
        let state = self.state.lock().unwrap();
        let mut all = Vec::new();
        Self::descendants(&state, window, &mut all);
        all.iter().any(|id| {
            state
                .windows
                .get(id)
                .is_some_and(|w| w.class_name == class_name)
        })
    }

    fn full_screen_rect(&self) -> DesktopRect {
        self.state.lock().unwrap().full_screen
    }

    fn enumerate_top_level_windows(&self, visitor: &mut dyn FnMut(WindowId) -> bool) {
        let z_order = self.state.lock().unwrap().z_order.clone();
        for id in z_order {
            if !visitor(id) {
                return;
            }
        }
    }

    fn enumerate_child_windows(&self, window: WindowId, visitor: &mut dyn FnMut(WindowId) -> bool) {
        let all = {
            let state = self.state.lock().unwrap();
            let mut all = Vec::new();
            Self::descendants(&state, window, &mut all);
            all
        };
        for id in all {
            if !visitor(id) {
                return;
            }
        }
    }

    fn find_windows_by_class(&self, class_name: &str) -> Vec<WindowId> {
        let state = self.state.lock().unwrap();
        state
            .z_order
            .iter()
            .filter(|id| {
                state
                    .windows
                    .get(id)
                    .is_some_and(|w| w.class_name == class_name)
            })
            .copied()
            .collect()
    }

    fn thread_in_move_size(&self, thread_id: u32) -> bool {
        self.state.lock().unwrap().moving_threads.contains(&thread_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: WindowId = WindowId::from_raw_handle(0x10);
    const CHILD: WindowId = WindowId::from_raw_handle(0x11);
    const GRANDCHILD: WindowId = WindowId::from_raw_handle(0x12);

    fn tree_with_descendants() -> FakeWindowTree {
        let tree = FakeWindowTree::new();
        tree.add(FakeWindow::new(ROOT).thread_ids(1, 2));
        tree.add(FakeWindow::new(CHILD).parent(ROOT).class_name("Inner"));
        tree.add(
            FakeWindow::new(GRANDCHILD)
                .parent(CHILD)
                .class_name("Windows.UI.Core.CoreWindow"),
        );
        tree
    }

    #[test]
    fn descendant_search_matches_any_generation() {
        let tree = tree_with_descendants();
        assert!(tree.child_windows_contain(ROOT, "Inner"));
        assert!(tree.child_windows_contain(ROOT, "Windows.UI.Core.CoreWindow"));
        assert!(!tree.child_windows_contain(ROOT, "Outer"));
        assert!(!tree.child_windows_contain(CHILD, "Inner"));
    }

    #[test]
    fn ancestor_walks_resolve_through_the_parent_chain() {
        let tree = tree_with_descendants();
        assert_eq!(tree.root_ancestor(GRANDCHILD), ROOT);
        assert_eq!(tree.owner_root_ancestor(GRANDCHILD), ROOT);
        assert_eq!(tree.parent(CHILD), ROOT);
        assert_eq!(tree.parent(ROOT), WindowId::NULL);
    }

    #[test]
    fn insertion_order_is_top_down_and_raises_reorder() {
        let tree = FakeWindowTree::new();
        let top = WindowId::from_raw_handle(0x20);
        let bottom = WindowId::from_raw_handle(0x21);
        tree.add(FakeWindow::new(top));
        tree.add(FakeWindow::new(bottom));

        let mut visited = Vec::new();
        tree.enumerate_top_level_windows(&mut |window| {
            visited.push(window);
            true
        });
        assert_eq!(visited, vec![top, bottom]);

        tree.raise_to_top(bottom);
        visited.clear();
        tree.enumerate_top_level_windows(&mut |window| {
            visited.push(window);
            true
        });
        assert_eq!(visited, vec![bottom, top]);
    }
}
