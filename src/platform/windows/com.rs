use anyhow::{Context, Result};
use windows::Win32::Foundation::RPC_E_CHANGED_MODE;
use windows::Win32::System::Com::{COINIT_MULTITHREADED, CoInitializeEx, CoUninitialize};

/// COM apartment membership for the calling thread, held for as long as
/// the thread issues virtual-desktop queries.
///
/// The tracker thread is our own and always enters the multithreaded
/// apartment. The grabbers, however, are constructed on the consumer's
/// capture thread, which may already live in a single-threaded apartment
/// (a UI thread that called `CoInitialize`); that thread is used as-is,
/// and only an apartment this guard entered is left again on drop.
pub(crate) enum ComApartment {
    Entered,
    Borrowed,
}

impl ComApartment {
    pub fn enter() -> Result<Self> {
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        if hr == RPC_E_CHANGED_MODE {
            return Ok(Self::Borrowed);
        }

        hr.ok()
            .context("CoInitializeEx(COINIT_MULTITHREADED) failed")?;
        Ok(Self::Entered)
    }
}

impl Drop for ComApartment {
    fn drop(&mut self) {
        if matches!(self, Self::Entered) {
            unsafe {
                CoUninitialize();
            }
        }
    }
}
