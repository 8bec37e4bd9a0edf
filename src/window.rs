/// Opaque identifier for a native top-level or child window.
///
/// Wraps the raw `HWND` value as an integer so the decision engine stays
/// platform-neutral. Equality and hashing are by handle identity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct WindowId {
    handle: isize,
}

impl WindowId {
    pub const NULL: WindowId = WindowId { handle: 0 };

    pub const fn from_raw_handle(raw_handle: isize) -> Self {
        Self { handle: raw_handle }
    }

    pub const fn raw_handle(&self) -> isize {
        self.handle
    }

    pub const fn is_null(&self) -> bool {
        self.handle == 0
    }

    pub fn stable_id(&self) -> String {
        format!("{:016x}", self.handle as usize as u64)
    }
}
