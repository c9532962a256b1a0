use tracing::{debug, warn};

use crate::error::RenderResult;

/// Switch the calling thread to another OS security identity and back.
pub trait PrivilegeContext {
    type Token;

    /// Fails loudly when the OS refuses the switch.
    fn assume_identity(&mut self, token: Self::Token) -> RenderResult<()>;

    /// Return to the process identity. Safe to call when nothing was
    /// assumed, and any number of times.
    fn revert_to_self(&mut self) -> RenderResult<()>;

    fn is_impersonating(&self) -> bool;
}

/// Reverts the assumed identity when dropped.
pub struct IdentityGuard<'a, P: PrivilegeContext> {
    context: &'a mut P,
}

impl<'a, P: PrivilegeContext> IdentityGuard<'a, P> {
    pub fn assume(context: &'a mut P, token: P::Token) -> RenderResult<Self> {
        context.assume_identity(token)?;
        debug!("assumed client identity");
        Ok(Self { context })
    }

    /// Revert now and report the outcome instead of logging it on drop.
    pub fn revert(self) -> RenderResult<()> {
        let mut this = std::mem::ManuallyDrop::new(self);
        this.context.revert_to_self()
    }
}

impl<P: PrivilegeContext> Drop for IdentityGuard<'_, P> {
    fn drop(&mut self) {
        if let Err(err) = self.context.revert_to_self() {
            warn!(error = %err, "failed to revert to the process identity");
        }
    }
}
