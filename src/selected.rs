use crate::geometry::DesktopRect;
use crate::inspect::{WindowInspector, WindowThreadIds};
use crate::window::WindowId;

/// Snapshot of the capture target taken at the start of a scan, plus the
/// ownership predicates shared by the occlusion scan and the occluder
/// tracker. Routing both analyses through the same predicates guarantees
/// they agree on which windows count as part of the capture target.
pub struct SelectedWindowContext<'a> {
    inspector: &'a dyn WindowInspector,
    selected_window: WindowId,
    selected_rect: DesktopRect,
    selected_ids: WindowThreadIds,
    title: String,
}

impl<'a> SelectedWindowContext<'a> {
    pub fn new(
        inspector: &'a dyn WindowInspector,
        selected_window: WindowId,
        selected_rect: DesktopRect,
    ) -> Self {
        let selected_ids = inspector.thread_process_ids(selected_window);
        let title = inspector.title(selected_window);
        Self {
            inspector,
            selected_window,
            selected_rect,
            selected_ids,
            title,
        }
    }

    /// The snapshot captured a live window. When this is false every
    /// predicate below answers false.
    pub fn is_selected_window_valid(&self) -> bool {
        self.selected_ids.is_valid()
    }

    pub fn is_window_selected(&self, window: WindowId) -> bool {
        self.is_selected_window_valid() && window == self.selected_window
    }

    /// Whether `window` belongs to the capture target: a dialog or popup
    /// whose owner chain leads to the selection, or an unowned popup
    /// (context menu, tooltip) living on the selection's own thread.
    pub fn is_window_owned(&self, window: WindowId) -> bool {
        if !self.is_selected_window_valid() {
            return false;
        }
        if self.inspector.owner_root_ancestor(window) == self.selected_window {
            return true;
        }

        let ids = self.inspector.thread_process_ids(window);
        ids.is_valid()
            && ids.process_id == self.selected_ids.process_id
            && ids.thread_id == self.selected_ids.thread_id
    }

    /// Whether `window` hangs below the selection in the raw parent chain.
    /// XAML windowed popups ("PopupHost") report a foreign process, so the
    /// ownership predicates miss them and only the parent walk finds them.
    /// A captioned descendant is treated as an independent window so it
    /// stays capturable on its own.
    pub fn is_uwp_ancestor(&self, window: WindowId) -> bool {
        if !self.is_selected_window_valid() {
            return false;
        }
        let mut it = self.inspector.parent(window);
        while !it.is_null() {
            if it == self.selected_window {
                return !self.inspector.has_caption_style(window);
            }
            it = self.inspector.parent(it);
        }
        false
    }

    pub fn is_window_overlapping(&self, window: WindowId) -> bool {
        self.is_selected_window_valid() && self.inspector.overlaps_rect(window, self.selected_rect)
    }

    pub fn selected_window(&self) -> WindowId {
        self.selected_window
    }

    pub fn selected_rect(&self) -> DesktopRect {
        self.selected_rect
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn inspector(&self) -> &dyn WindowInspector {
        self.inspector
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeWindow, FakeWindowTree};

    const SELECTED: WindowId = WindowId::from_raw_handle(0x100);
    const OTHER: WindowId = WindowId::from_raw_handle(0x200);

    fn selected_rect() -> DesktopRect {
        DesktopRect::from_xywh(100, 100, 800, 600)
    }

    fn tree_with_selected() -> FakeWindowTree {
        let tree = FakeWindowTree::new();
        tree.add(
            FakeWindow::new(SELECTED)
                .content_rect(selected_rect())
                .thread_ids(10, 20),
        );
        tree
    }

    #[test]
    fn invalid_selection_short_circuits_every_predicate() {
        let tree = FakeWindowTree::new();
        tree.add(FakeWindow::new(OTHER).content_rect(selected_rect()));
        // SELECTED was never added, so the thread query reports zero.
        let context = SelectedWindowContext::new(&tree, SELECTED, selected_rect());

        assert!(!context.is_selected_window_valid());
        assert!(!context.is_window_selected(SELECTED));
        assert!(!context.is_window_owned(OTHER));
        assert!(!context.is_uwp_ancestor(OTHER));
        assert!(!context.is_window_overlapping(OTHER));
    }

    #[test]
    fn owner_chain_marks_dialogs_as_owned() {
        let tree = tree_with_selected();
        tree.add(
            FakeWindow::new(OTHER)
                .content_rect(DesktopRect::from_xywh(0, 0, 10, 10))
                .thread_ids(99, 98)
                .owner_root(SELECTED),
        );
        let context = SelectedWindowContext::new(&tree, SELECTED, selected_rect());
        assert!(context.is_window_owned(OTHER));
    }

    #[test]
    fn same_thread_popups_are_owned_even_without_an_owner() {
        let tree = tree_with_selected();
        tree.add(
            FakeWindow::new(OTHER)
                .content_rect(DesktopRect::from_xywh(0, 0, 10, 10))
                .thread_ids(10, 20),
        );
        let context = SelectedWindowContext::new(&tree, SELECTED, selected_rect());
        assert!(context.is_window_owned(OTHER));
    }

    #[test]
    fn same_process_different_thread_is_not_owned() {
        let tree = tree_with_selected();
        tree.add(
            FakeWindow::new(OTHER)
                .content_rect(DesktopRect::from_xywh(0, 0, 10, 10))
                .thread_ids(10, 21),
        );
        let context = SelectedWindowContext::new(&tree, SELECTED, selected_rect());
        assert!(!context.is_window_owned(OTHER));
    }

    #[test]
    fn parent_chain_reaching_the_selection_counts_unless_captioned() {
        let tree = tree_with_selected();
        let popup = WindowId::from_raw_handle(0x300);
        let captioned = WindowId::from_raw_handle(0x400);
        tree.add(
            FakeWindow::new(popup)
                .content_rect(DesktopRect::from_xywh(0, 0, 10, 10))
                .thread_ids(55, 66)
                .parent(SELECTED),
        );
        tree.add(
            FakeWindow::new(captioned)
                .content_rect(DesktopRect::from_xywh(0, 0, 10, 10))
                .thread_ids(55, 67)
                .parent(SELECTED)
                .caption(true),
        );
        let context = SelectedWindowContext::new(&tree, SELECTED, selected_rect());
        assert!(context.is_uwp_ancestor(popup));
        assert!(!context.is_uwp_ancestor(captioned));
    }

    #[test]
    fn overlap_requires_a_measurable_content_rect() {
        let tree = tree_with_selected();
        let overlapping = WindowId::from_raw_handle(0x300);
        let unmeasurable = WindowId::from_raw_handle(0x400);
        tree.add(
            FakeWindow::new(overlapping)
                .content_rect(DesktopRect::from_xywh(500, 300, 200, 200))
                .thread_ids(1, 2),
        );
        tree.add(FakeWindow::new(unmeasurable).thread_ids(3, 4));
        let context = SelectedWindowContext::new(&tree, SELECTED, selected_rect());
        assert!(context.is_window_overlapping(overlapping));
        assert!(!context.is_window_overlapping(unmeasurable));
    }
}
