//! Background refresh of the set of windows stacked above the selection.
//!
//! A dedicated thread rescans the window tree at ~30 Hz and records when
//! the set of overlapping windows above the selected window last changed
//! (or when any thread was observed mid drag/resize). The capture path
//! polls [`OccluderTracker::is_changed`] to debounce backend switches, and
//! reads the shell/composition window snapshot through a rendezvous that
//! waits for a scan started after the request, so it never acts on a stale
//! picture.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use rustc_hash::FxHashSet;
use tracing::{debug, info, warn};

use crate::inspect::{
    CORE_WINDOW_CLASS, INPUT_SWITCH_CLASS, TRAY_ADJACENT_CLASSES, TRAY_WINDOW_CLASS,
    WindowInspector,
};
use crate::selected::SelectedWindowContext;
use crate::window::WindowId;

/// Scan rate of the tracker thread.
const SCAN_INTERVAL: Duration = Duration::from_millis(1000 / 30);

/// Number of initial `is_changed` polls swallowed after (re)selection,
/// covering the calls a single capture makes before its result lands.
const INITIAL_IGNORED_POLLS: u32 = 2;

/// How long a rendezvous reader waits per check before re-inspecting the
/// quit flag and the worker's liveness.
const RENDEZVOUS_POLL: Duration = Duration::from_millis(100);

struct TrackerShared {
    selected_window: WindowId,
    /// Windows above and overlapping the selection, in top-down z-order.
    occluders: Vec<WindowId>,
    /// Composition/shell windows found by class, published by the same
    /// tick that refreshed `occluders`.
    core_windows: Vec<WindowId>,
    /// Rendezvous handshake: readers bump `requested_serial`; the worker
    /// copies it when a scan begins and publishes it into
    /// `served_serial` when that scan's results land. A reader waiting
    /// for `served_serial >= its serial` is therefore guaranteed a scan
    /// that started after its request.
    requested_serial: u64,
    served_serial: u64,
    quit: bool,
}

pub(crate) struct OccluderTracker {
    inspector: Arc<dyn WindowInspector>,
    shared: Arc<(Mutex<TrackerShared>, Condvar)>,
    /// Milliseconds since `epoch` (offset by one so zero means "never"),
    /// written only by the tracker thread.
    last_changed: Arc<AtomicU64>,
    epoch: Instant,
    ignored_polls: u32,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl OccluderTracker {
    pub fn new(inspector: Arc<dyn WindowInspector>) -> Self {
        Self {
            inspector,
            shared: Arc::new((
                Mutex::new(TrackerShared {
                    selected_window: WindowId::NULL,
                    occluders: Vec::new(),
                    core_windows: Vec::new(),
                    requested_serial: 0,
                    served_serial: 0,
                    quit: false,
                }),
                Condvar::new(),
            )),
            last_changed: Arc::new(AtomicU64::new(0)),
            epoch: Instant::now(),
            ignored_polls: INITIAL_IGNORED_POLLS,
            thread: None,
        }
    }

    /// Bind the tracker to a new selection: the occluder set, the change
    /// timestamp, and the initial poll allowance all reset.
    pub fn select_window(&mut self, window: WindowId) {
        let (lock, _) = &*self.shared;
        let mut shared = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        shared.selected_window = window;
        shared.occluders.clear();
        drop(shared);
        self.last_changed.store(0, Ordering::Release);
        self.ignored_polls = INITIAL_IGNORED_POLLS;
    }

    /// Whether the occluder set changed (or a drag was observed) within
    /// the last `within_ms` milliseconds. The tracker thread is started
    /// lazily by the first poll that survives the initial allowance.
    pub fn is_changed(&mut self, within_ms: u64) -> bool {
        if self.ignored_polls > 0 {
            self.ignored_polls -= 1;
            return false;
        }
        self.ensure_started();

        let last = self.last_changed.load(Ordering::Acquire);
        if last == 0 {
            return false;
        }
        stamp_since(self.epoch).saturating_sub(last) < within_ms
    }

    /// Snapshot of the composition/shell windows relevant to occlusion.
    ///
    /// Blocks until the tracker completes a scan that started after this
    /// call, so the caller always sees the current desktop. Returns the
    /// last published snapshot when the tracker is not running or is
    /// shutting down, rather than waiting forever.
    pub fn core_windows(&self) -> Vec<WindowId> {
        let (lock, condvar) = &*self.shared;
        let mut shared = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !self.worker_alive() || shared.quit {
            return shared.core_windows.clone();
        }

        shared.requested_serial += 1;
        let serial = shared.requested_serial;
        condvar.notify_all();
        while shared.served_serial < serial && !shared.quit {
            if !self.worker_alive() {
                warn!("occluder tracker exited while a reader was waiting");
                break;
            }
            let (guard, _timeout) = condvar
                .wait_timeout(shared, RENDEZVOUS_POLL)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            shared = guard;
        }
        shared.core_windows.clone()
    }

    fn worker_alive(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|thread| !thread.is_finished())
    }

    fn ensure_started(&mut self) {
        if self.thread.is_some() {
            return;
        }

        let inspector = Arc::clone(&self.inspector);
        let shared = Arc::clone(&self.shared);
        let last_changed = Arc::clone(&self.last_changed);
        let epoch = self.epoch;
        let spawned = std::thread::Builder::new()
            .name("crop-capture-occluder-tracker".to_string())
            .spawn(move || {
                let _thread_init = crate::platform::init_worker_thread();
                tracker_loop(inspector.as_ref(), &shared, &last_changed, epoch);
            });
        match spawned {
            Ok(handle) => {
                info!("occluder tracker started");
                self.thread = Some(handle);
            }
            Err(error) => warn!(%error, "failed to start the occluder tracker"),
        }
    }

    #[cfg(test)]
    pub(crate) fn occluders(&self) -> Vec<WindowId> {
        let (lock, _) = &*self.shared;
        lock.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .occluders
            .clone()
    }

    #[cfg(test)]
    pub(crate) fn last_changed_stamp(&self) -> u64 {
        self.last_changed.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn stop_for_test(&mut self) {
        let (lock, condvar) = &*self.shared;
        lock.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .quit = true;
        condvar.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for OccluderTracker {
    fn drop(&mut self) {
        {
            let (lock, condvar) = &*self.shared;
            let mut shared = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            shared.quit = true;
            condvar.notify_all();
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Offset by one so a change observed in the very first millisecond is
/// distinguishable from the "never changed" sentinel of zero.
fn stamp_since(epoch: Instant) -> u64 {
    u64::try_from(epoch.elapsed().as_millis())
        .unwrap_or(u64::MAX - 1)
        .saturating_add(1)
}

fn tracker_loop(
    inspector: &dyn WindowInspector,
    shared: &(Mutex<TrackerShared>, Condvar),
    last_changed: &AtomicU64,
    epoch: Instant,
) {
    let (lock, condvar) = shared;
    loop {
        let (selected, serving) = {
            let guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if guard.quit {
                return;
            }
            (guard.selected_window, guard.requested_serial)
        };

        let scan = scan_once(inspector, selected);

        let mut guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.quit {
            return;
        }
        if scan.window_is_moving || guard.occluders != scan.occluders {
            debug!(
                occluders = scan.occluders.len(),
                moving = scan.window_is_moving,
                "occluder set changed"
            );
            guard.occluders = scan.occluders;
            last_changed.store(stamp_since(epoch), Ordering::Release);
        }
        guard.core_windows = scan.core_windows;
        guard.served_serial = serving;
        condvar.notify_all();

        // Sleep out the rest of the tick unless a rendezvous request or
        // teardown arrives.
        let deadline = Instant::now() + SCAN_INTERVAL;
        while !guard.quit && guard.requested_serial == serving {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (next, _timeout) = condvar
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard = next;
        }
        if guard.quit {
            return;
        }
    }
}

struct ScanOutcome {
    occluders: Vec<WindowId>,
    core_windows: Vec<WindowId>,
    window_is_moving: bool,
}

/// One full pass: seed shell/composition candidates by class, walk the
/// top-level z-order down to the selection, then merge the remaining
/// candidates that overlap the selection.
fn scan_once(inspector: &dyn WindowInspector, selected: WindowId) -> ScanOutcome {
    let mut candidates: Vec<WindowId> = Vec::new();

    if inspector.is_windows8_or_later() {
        for class_name in [CORE_WINDOW_CLASS, INPUT_SWITCH_CLASS] {
            for window in inspector.find_windows_by_class(class_name) {
                if !inspector.is_window_cloaked(window) {
                    candidates.push(window);
                }
            }
        }
    }

    let selected_rect = inspector.content_rect(selected).unwrap_or_default();
    let context = SelectedWindowContext::new(inspector, selected, selected_rect);

    // Popup classes that accompany a visible taskbar only live at the root
    // while the tray UI is open and are not always enumerated.
    if let Some(tray) = inspector.find_windows_by_class(TRAY_WINDOW_CLASS).first() {
        if inspector.is_window_visible_on_current_desktop(*tray) {
            candidates.push(*tray);
            for class_name in TRAY_ADJACENT_CLASSES {
                for window in inspector.find_windows_by_class(class_name) {
                    if !context.is_window_owned(window)
                        && !context.is_uwp_ancestor(window)
                        && inspector.is_window_visible_on_current_desktop(window)
                    {
                        candidates.push(window);
                    }
                }
            }
        }
    }

    let core_windows = candidates.clone();

    let mut occluders: Vec<WindowId> = Vec::new();
    let mut window_is_moving = false;
    inspector.enumerate_top_level_windows(&mut |window| {
        if !window_is_moving {
            let ids = inspector.thread_process_ids(window);
            if ids.is_valid() && inspector.thread_in_move_size(ids.thread_id) {
                window_is_moving = true;
            }
        }

        if window == selected {
            return false;
        }
        if !inspector.is_window_visible_on_current_desktop(window) {
            return true;
        }
        if context.is_window_owned(window) || context.is_uwp_ancestor(window) {
            return true;
        }
        if !context.is_window_overlapping(window) {
            return true;
        }
        occluders.push(window);
        true
    });

    let already_listed: FxHashSet<WindowId> = occluders.iter().copied().collect();
    for window in candidates {
        if !already_listed.contains(&window) && inspector.overlaps_rect(window, selected_rect) {
            occluders.push(window);
        }
    }

    ScanOutcome {
        occluders,
        core_windows,
        window_is_moving,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::DesktopRect;
    use crate::testing::{FakeWindow, FakeWindowTree};

    const SELECTED: WindowId = WindowId::from_raw_handle(0x100);
    const FOREIGN: WindowId = WindowId::from_raw_handle(0x200);

    fn selected_rect() -> DesktopRect {
        DesktopRect::from_xywh(100, 100, 800, 600)
    }

    fn overlapping_rect() -> DesktopRect {
        DesktopRect::from_xywh(500, 300, 200, 200)
    }

    fn tree_with_selected() -> Arc<FakeWindowTree> {
        let tree = Arc::new(FakeWindowTree::new());
        tree.add(
            FakeWindow::new(SELECTED)
                .content_rect(selected_rect())
                .thread_ids(10, 20),
        );
        tree
    }

    /// Drain the initial poll allowance, start the thread, and wait for a
    /// scan of the tree as it currently stands.
    fn started_tracker(tree: &Arc<FakeWindowTree>) -> OccluderTracker {
        let mut tracker = OccluderTracker::new(tree.clone() as Arc<dyn WindowInspector>);
        tracker.select_window(SELECTED);
        assert!(!tracker.is_changed(u64::MAX));
        assert!(!tracker.is_changed(u64::MAX));
        let _ = tracker.is_changed(u64::MAX);
        let _ = tracker.core_windows();
        tracker
    }

    #[test]
    fn unchanged_tree_never_reports_a_change() {
        let tree = tree_with_selected();
        let mut tracker = started_tracker(&tree);
        assert!(!tracker.is_changed(u64::MAX / 2));
        assert_eq!(tracker.occluders(), Vec::<WindowId>::new());
    }

    #[test]
    fn new_occluder_flips_is_changed_until_the_window_expires() {
        let tree = tree_with_selected();
        let mut tracker = started_tracker(&tree);

        tree.add(
            FakeWindow::new(FOREIGN)
                .content_rect(overlapping_rect())
                .thread_ids(1, 2),
        );
        tree.raise_to_top(FOREIGN);
        let _ = tracker.core_windows();

        assert_eq!(tracker.occluders(), vec![FOREIGN]);
        assert!(tracker.is_changed(60_000));

        std::thread::sleep(Duration::from_millis(250));
        assert!(!tracker.is_changed(200));
        assert!(tracker.is_changed(60_000));
    }

    #[test]
    fn occluders_below_the_selection_are_ignored() {
        let tree = tree_with_selected();
        // Overlapping, but stacked below: added after the selection.
        tree.add(
            FakeWindow::new(FOREIGN)
                .content_rect(overlapping_rect())
                .thread_ids(1, 2),
        );
        let mut tracker = started_tracker(&tree);
        assert_eq!(tracker.occluders(), Vec::<WindowId>::new());
        assert!(!tracker.is_changed(u64::MAX / 2));
    }

    #[test]
    fn owned_windows_never_join_the_occluder_set() {
        let tree = tree_with_selected();
        tree.add(
            FakeWindow::new(FOREIGN)
                .content_rect(overlapping_rect())
                .thread_ids(42, 43)
                .owner_root(SELECTED),
        );
        tree.raise_to_top(FOREIGN);
        let mut tracker = started_tracker(&tree);
        assert_eq!(tracker.occluders(), Vec::<WindowId>::new());
        assert!(!tracker.is_changed(u64::MAX / 2));
    }

    #[test]
    fn drag_in_progress_counts_as_a_change() {
        let tree = tree_with_selected();
        let mut tracker = started_tracker(&tree);

        tree.set_thread_moving(20, true);
        let _ = tracker.core_windows();
        assert!(tracker.is_changed(60_000));
    }

    #[test]
    fn core_windows_rendezvous_sees_windows_added_after_start() {
        let tree = tree_with_selected();
        let tracker = started_tracker(&tree);
        assert_eq!(tracker.core_windows(), Vec::<WindowId>::new());

        let shell = WindowId::from_raw_handle(0x500);
        tree.add(
            FakeWindow::new(shell)
                .class_name(CORE_WINDOW_CLASS)
                .content_rect(DesktopRect::from_xywh(0, 0, 50, 50))
                .thread_ids(5, 6),
        );
        assert_eq!(tracker.core_windows(), vec![shell]);
    }

    #[test]
    fn cloaked_core_windows_are_filtered() {
        let tree = tree_with_selected();
        let shell = WindowId::from_raw_handle(0x500);
        tree.add(
            FakeWindow::new(shell)
                .class_name(CORE_WINDOW_CLASS)
                .cloaked(true)
                .content_rect(DesktopRect::from_xywh(0, 0, 50, 50))
                .thread_ids(5, 6),
        );
        let tracker = started_tracker(&tree);
        assert_eq!(tracker.core_windows(), Vec::<WindowId>::new());
    }

    #[test]
    fn visible_taskbar_and_overlapping_popups_join_the_occluder_set() {
        let tree = tree_with_selected();
        let tray = WindowId::from_raw_handle(0x600);
        let shadow = WindowId::from_raw_handle(0x601);
        tree.add(
            FakeWindow::new(tray)
                .class_name(TRAY_WINDOW_CLASS)
                .content_rect(DesktopRect::from_xywh(0, 1040, 1920, 40))
                .thread_ids(7, 8),
        );
        tree.add(
            FakeWindow::new(shadow)
                .class_name("SysShadow")
                .content_rect(overlapping_rect())
                .thread_ids(7, 9),
        );
        let tracker = started_tracker(&tree);

        // The taskbar itself does not overlap the selection; the shadow
        // popup does, without ever being visited above it in the z-order
        // walk.
        assert_eq!(tracker.occluders(), vec![shadow]);
        let core = tracker.core_windows();
        assert!(core.contains(&tray));
        assert!(core.contains(&shadow));
    }

    #[test]
    fn reselecting_resets_to_the_freshly_bound_state() {
        let tree = tree_with_selected();
        let mut tracker = started_tracker(&tree);

        tree.add(
            FakeWindow::new(FOREIGN)
                .content_rect(overlapping_rect())
                .thread_ids(1, 2),
        );
        tree.raise_to_top(FOREIGN);
        let _ = tracker.core_windows();
        assert!(tracker.is_changed(60_000));

        // Put the tree back and let a scan settle on the occluder-free
        // desktop, so no in-flight scan republishes the old set after the
        // reset below.
        tree.remove(FOREIGN);
        let _ = tracker.core_windows();

        tracker.select_window(SELECTED);
        let _ = tracker.core_windows();
        assert_eq!(tracker.last_changed_stamp(), 0);
        assert_eq!(tracker.occluders(), Vec::<WindowId>::new());
        assert!(!tracker.is_changed(60_000));

        // Selecting the same source again leaves the same observable
        // state as a single call.
        tracker.select_window(SELECTED);
        let _ = tracker.core_windows();
        assert_eq!(tracker.last_changed_stamp(), 0);
        assert_eq!(tracker.occluders(), Vec::<WindowId>::new());
        assert!(!tracker.is_changed(60_000));
    }

    #[test]
    fn readers_do_not_hang_after_the_tracker_stops() {
        let tree = tree_with_selected();
        let mut tracker = started_tracker(&tree);
        tracker.stop_for_test();
        // Must return immediately with the last snapshot.
        let _ = tracker.core_windows();
        let _ = tracker.core_windows();
    }
}
