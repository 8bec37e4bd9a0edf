pub(crate) mod com;
pub(crate) mod gdi;
pub(crate) mod inspector;

use tracing::warn;

/// Per-thread initialization for the occluder tracker thread. The virtual
/// desktop queries go through COM, so the worker needs its own apartment
/// for its lifetime.
pub(crate) fn init_worker_thread() -> Option<com::ComApartment> {
    match com::ComApartment::enter() {
        Ok(apartment) => Some(apartment),
        Err(error) => {
            warn!(%error, "worker thread COM initialization failed");
            None
        }
    }
}
