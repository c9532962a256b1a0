use std::ffi::c_void;

use anyhow::Context;
use windows::Win32::Foundation::HANDLE;
use windows::Win32::Security::{
    DuplicateToken, ImpersonateLoggedOnUser, RevertToSelf, SecurityImpersonation, TOKEN_DUPLICATE,
    TOKEN_QUERY,
};
use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

use crate::error::{RenderError, RenderResult};
use crate::privilege::PrivilegeContext;

use super::handle::OwnedHandle;

/// Primary access token of a user session.
pub struct AccessToken(OwnedHandle);

impl AccessToken {
    /// Takes ownership of a raw token handle.
    ///
    /// # Safety
    ///
    /// `raw` must be an open token handle with `TOKEN_DUPLICATE` access that
    /// nothing else closes.
    pub unsafe fn from_raw_handle(raw: isize) -> RenderResult<Self> {
        OwnedHandle::new(HANDLE(raw as *mut c_void))
            .map(Self)
            .ok_or_else(|| RenderError::InvalidConfig("null token handle".to_string()))
    }

    /// Token of the running process.
    pub fn current_process() -> RenderResult<Self> {
        let mut token = HANDLE::default();
        unsafe {
            OpenProcessToken(
                GetCurrentProcess(),
                TOKEN_DUPLICATE | TOKEN_QUERY,
                &mut token,
            )
        }
        .context("OpenProcessToken failed")
        .map_err(RenderError::Platform)?;
        OwnedHandle::new(token).map(Self).ok_or_else(|| {
            RenderError::Platform(anyhow::anyhow!("OpenProcessToken returned no handle"))
        })
    }
}

/// Thread impersonation through a duplicated impersonation-level token.
#[derive(Default)]
pub struct TokenImpersonator {
    token: Option<AccessToken>,
    duplicate: Option<OwnedHandle>,
}

impl TokenImpersonator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PrivilegeContext for TokenImpersonator {
    type Token = AccessToken;

    fn assume_identity(&mut self, token: AccessToken) -> RenderResult<()> {
        let mut duplicate = HANDLE::default();
        unsafe { DuplicateToken(token.0.raw(), SecurityImpersonation, &mut duplicate) }
            .context("DuplicateToken failed")
            .map_err(RenderError::Platform)?;
        let duplicate = OwnedHandle::new(duplicate).ok_or_else(|| {
            RenderError::Platform(anyhow::anyhow!("DuplicateToken returned no handle"))
        })?;
        unsafe { ImpersonateLoggedOnUser(duplicate.raw()) }
            .context("ImpersonateLoggedOnUser failed")
            .map_err(RenderError::Platform)?;

        self.token = Some(token);
        self.duplicate = Some(duplicate);
        Ok(())
    }

    fn revert_to_self(&mut self) -> RenderResult<()> {
        self.duplicate = None;
        self.token = None;
        unsafe { RevertToSelf() }
            .context("RevertToSelf failed")
            .map_err(RenderError::Platform)
    }

    fn is_impersonating(&self) -> bool {
        self.duplicate.is_some()
    }
}
