pub(crate) mod d2d;
pub(crate) mod gdi;
pub(crate) mod handle;
pub(crate) mod impersonation;
pub(crate) mod pipe;
pub(crate) mod surface;

use crate::backend::DevicePlatform;

pub(crate) type WindowsPlatform =
    DevicePlatform<surface::Win32Surfaces, gdi::GdiDevice, d2d::D2dApi>;

pub(crate) fn build_platform() -> WindowsPlatform {
    DevicePlatform::new(surface::Win32Surfaces, gdi::GdiDevice, d2d::D2dApi)
}
