use windows::Win32::Foundation::{CloseHandle, HANDLE};

/// Kernel handle closed on drop.
pub(crate) struct OwnedHandle(HANDLE);

// SAFETY: kernel handles are process-wide and may be used from any thread.
unsafe impl Send for OwnedHandle {}

impl OwnedHandle {
    /// Takes ownership of `handle`. Returns `None` for null or
    /// `INVALID_HANDLE_VALUE`.
    pub(crate) fn new(handle: HANDLE) -> Option<Self> {
        if handle.is_invalid() || handle.0.is_null() {
            None
        } else {
            Some(Self(handle))
        }
    }

    pub(crate) fn raw(&self) -> HANDLE {
        self.0
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}
