pub mod backend;
pub mod compositor;
pub mod control;
pub mod coordinator;
pub(crate) mod env_config;
pub mod error;
pub mod frame_buffer;
pub mod geometry;
pub mod pixel_buffer;
mod platform;
pub mod privilege;
pub mod raster;
pub mod surface;

#[cfg(test)]
pub(crate) mod test_support;

pub use backend::{BackendConfig, RenderBackend, RenderMode, RenderPlatform};
pub use control::{ControlListener, ControlStream, verify_peer};
pub use coordinator::RenderCoordinator;
pub use error::{RenderError, RenderErrorClass, RenderResult};
pub use frame_buffer::{ManagedFrameBuffer, ManagedFrameBufferBuilder, RenderConfig};
pub use geometry::{Dimension, PixelFormat, Rect};
pub use pixel_buffer::PixelBuffer;
pub use privilege::{IdentityGuard, PrivilegeContext};
pub use surface::SurfaceHandle;

#[cfg(target_os = "windows")]
pub use platform::windows::impersonation::{AccessToken, TokenImpersonator};
#[cfg(target_os = "windows")]
pub use platform::windows::pipe::NamedPipeListener;

/// Whether the accelerated compositor can be used on this machine.
pub fn is_accelerated_available() -> bool {
    RenderCoordinator::is_accelerated_available()
}
