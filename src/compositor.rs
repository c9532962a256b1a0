//! Hardware-accelerated backend.
//!
//! Frames are produced into a zeroed CPU mirror, uploaded to a native bitmap
//! at the start of every present and drawn onto a render target bound to
//! the window. There is no native capture: callers write pixels into the
//! mirror themselves.
//!
//! Construction tries a window-bound render target first and falls back to
//! a device-context-bound one. Resize keeps the factory and the bitmap and
//! only adjusts the target: window-bound targets resize in place,
//! device-context-bound targets are re-bound to the new rectangle.

use std::ptr::NonNull;

use tracing::{debug, warn};

use crate::backend::{BackendBuffer, BackendConfig, RenderBackend, RenderMode};
use crate::error::{RenderError, RenderResult};
use crate::geometry::{Dimension, Rect};
use crate::surface::{self, SurfaceHandle, SurfaceProvider};

const MIRROR_BYTES_PER_PIXEL: usize = 4;

/// Entry point of the accelerated drawing API.
pub trait CompositorApi: Send + Sync {
    type Factory: CompositorFactory;

    fn create_factory(&self) -> RenderResult<Self::Factory>;
}

pub trait CompositorFactory {
    type Target: CompositorTarget;

    /// Render target presenting straight to the window, sized in pixels.
    fn create_window_target(
        &self,
        surface: SurfaceHandle,
        size: Dimension,
    ) -> RenderResult<Self::Target>;

    /// Render target drawing through the window's device context, bound to
    /// `bounds`.
    fn create_dc_target(&self, surface: SurfaceHandle, bounds: Rect)
    -> RenderResult<Self::Target>;
}

pub trait CompositorTarget {
    type Bitmap: CompositorBitmap;

    fn pixel_size(&self) -> Dimension;

    fn create_bitmap(&mut self, size: Dimension) -> RenderResult<Self::Bitmap>;

    fn begin_draw(&mut self);

    /// Clear the whole target to opaque black.
    fn clear(&mut self);

    /// Draw `src` of the bitmap into `dst` with linear interpolation.
    fn draw_bitmap(&mut self, bitmap: &Self::Bitmap, dst: Rect, src: Rect);

    fn end_draw(&mut self) -> RenderResult<()>;

    /// Resize a window-bound target in place.
    fn resize(&mut self, size: Dimension) -> RenderResult<()>;

    /// Re-associate a device-context-bound target with the surface's DC.
    fn bind_dc(&mut self, surface: SurfaceHandle, bounds: Rect) -> RenderResult<()>;
}

pub trait CompositorBitmap {
    /// Replace the bitmap contents with `pixels`, laid out top-down with
    /// `pitch` bytes per row.
    fn copy_from_memory(&mut self, pixels: &[u8], pitch: u32) -> RenderResult<()>;
}

/// How the render target reaches the window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetBinding {
    Window,
    DeviceContext,
}

type TargetOf<F> = <F as CompositorFactory>::Target;
type BitmapOf<F> = <TargetOf<F> as CompositorTarget>::Bitmap;

/// Attempt and immediately release a factory.
pub fn is_usable<A: CompositorApi>(api: &A) -> bool {
    match api.create_factory() {
        Ok(_factory) => true,
        Err(err) => {
            debug!(error = %err, "accelerated rendering is unavailable");
            false
        }
    }
}

pub struct CompositorBackend<F: CompositorFactory> {
    // Field order is drop order: mirror, bitmap, target, factory. That is
    // the reverse of acquisition.
    mirror: Vec<u8>,
    mirror_view: BackendBuffer,
    bitmap: BitmapOf<F>,
    target: TargetOf<F>,
    _factory: F,
    binding: TargetBinding,
    surface: SurfaceHandle,
    dimension: Dimension,
    pitch: u32,
    failed_presents: u32,
}

impl<F: CompositorFactory> CompositorBackend<F> {
    pub fn new<A>(
        api: &A,
        surfaces: &dyn SurfaceProvider,
        config: &BackendConfig,
    ) -> RenderResult<Self>
    where
        A: CompositorApi<Factory = F>,
    {
        config.validate()?;
        let surface = surface::resolve_surface(surfaces, config.surface)?;
        let factory = api.create_factory()?;
        let (mut target, binding) = create_target(&factory, surfaces, surface)?;

        let dimension = config.dimension.clamped();
        let bitmap = target.create_bitmap(dimension).map_err(|err| {
            RenderError::RenderingSubsystem(format!("failed to create native bitmap: {err}"))
        })?;

        let len = dimension.byte_len(MIRROR_BYTES_PER_PIXEL)?;
        let pitch = usize::try_from(dimension.width)
            .ok()
            .and_then(|w| w.checked_mul(MIRROR_BYTES_PER_PIXEL))
            .and_then(|p| u32::try_from(p).ok())
            .ok_or(RenderError::BufferOverflow)?;
        let mut mirror = vec![0u8; len];
        let ptr = NonNull::new(mirror.as_mut_ptr()).ok_or(RenderError::BufferOverflow)?;
        // SAFETY: the allocation lives in `mirror`, which is never resized
        // and is dropped together with this backend.
        let mirror_view = unsafe { BackendBuffer::from_raw_parts(ptr, len) };

        debug!(
            width = dimension.width,
            height = dimension.height,
            ?binding,
            surface = %surface.stable_id(),
            "compositor backend created"
        );

        Ok(Self {
            mirror,
            mirror_view,
            bitmap,
            target,
            _factory: factory,
            binding,
            surface,
            dimension,
            pitch,
            failed_presents: 0,
        })
    }

    /// Construct and release the factory and a render target for `config`
    /// without keeping anything alive.
    pub fn check_creatable<A>(
        api: &A,
        surfaces: &dyn SurfaceProvider,
        config: &BackendConfig,
    ) -> RenderResult<()>
    where
        A: CompositorApi<Factory = F>,
    {
        config.validate()?;
        let surface = surface::resolve_surface(surfaces, config.surface)?;
        let factory = api.create_factory()?;
        let (mut target, _binding) = create_target(&factory, surfaces, surface)?;
        target
            .create_bitmap(config.dimension.clamped())
            .map(|_bitmap| ())
            .map_err(|err| {
                RenderError::RenderingSubsystem(format!("failed to create native bitmap: {err}"))
            })
    }

    pub fn binding(&self) -> TargetBinding {
        self.binding
    }

    pub fn target_size(&self) -> Dimension {
        self.target.pixel_size()
    }

    #[cfg(test)]
    fn mirror_bytes(&self) -> &[u8] {
        &self.mirror
    }

    /// `src` must lie inside the bitmap and `dst` inside the target.
    fn draw_frame(&mut self, src: Rect, dst: Rect) -> RenderResult<()> {
        self.target.begin_draw();

        debug_assert_eq!(self.mirror.len(), self.mirror_view.len());
        // SAFETY: `mirror_view` covers exactly the `mirror` allocation, which
        // outlives this call. Going through the raw view lets the bitmap be
        // borrowed mutably alongside it.
        let pixels = unsafe {
            std::slice::from_raw_parts(self.mirror_view.as_ptr(), self.mirror_view.len())
        };
        if let Err(err) = self.bitmap.copy_from_memory(pixels, self.pitch) {
            if let Err(end_err) = self.target.end_draw() {
                debug!(error = %end_err, "end of draw after failed upload also failed");
            }
            return Err(RenderError::transient("bitmap upload failed", &err));
        }

        self.target.clear();
        if !src.is_empty() && !dst.is_empty() {
            self.target.draw_bitmap(&self.bitmap, dst, src);
        }

        self.target
            .end_draw()
            .map_err(|err| RenderError::transient("end of draw failed", &err))
    }

    fn present_logged(&mut self, src: Rect, dst: Rect) {
        match self.draw_frame(src, dst) {
            Ok(()) => self.failed_presents = 0,
            Err(err) => {
                // Device loss is not detected separately; the next present
                // simply tries again.
                self.failed_presents = self.failed_presents.saturating_add(1);
                warn!(
                    error = %err,
                    consecutive_failures = self.failed_presents,
                    ?src,
                    ?dst,
                    "compositor present failed, frame skipped"
                );
            }
        }
    }
}

/// Window-bound target first, device-context-bound second.
fn create_target<F: CompositorFactory>(
    factory: &F,
    surfaces: &dyn SurfaceProvider,
    surface: SurfaceHandle,
) -> RenderResult<(F::Target, TargetBinding)> {
    let size = match surfaces.client_rect(surface) {
        Ok(client) => client.dimension(),
        Err(err) => {
            warn!(error = %err, "failed to query client area, using a 1x1 target");
            Dimension::new(1, 1)
        }
    };

    let window_err = match factory.create_window_target(surface, size) {
        Ok(target) => return Ok((target, TargetBinding::Window)),
        Err(err) => err,
    };
    warn!(
        error = %window_err,
        "window-bound render target failed, trying device-context-bound target"
    );

    let bounds = size.to_rect();
    match factory.create_dc_target(surface, bounds) {
        Ok(target) => Ok((target, TargetBinding::DeviceContext)),
        Err(dc_err) => Err(RenderError::RenderingSubsystem(format!(
            "window-bound target: {window_err}; device-context-bound target: {dc_err}"
        ))),
    }
}

impl<F: CompositorFactory> RenderBackend for CompositorBackend<F> {
    fn mode(&self) -> RenderMode {
        RenderMode::Compositor
    }

    fn dimension(&self) -> Dimension {
        self.dimension
    }

    fn buffer(&self) -> BackendBuffer {
        self.mirror_view
    }

    fn capture(&mut self, _rect: &Rect) -> RenderResult<()> {
        Err(RenderError::UnsupportedOperation(
            "the compositor backend does not capture the screen",
        ))
    }

    fn capture_transparent(&mut self, _rect: &Rect) -> RenderResult<()> {
        Err(RenderError::UnsupportedOperation(
            "the compositor backend does not capture the screen",
        ))
    }

    fn present(&mut self, rect: &Rect) -> RenderResult<()> {
        // Unscaled: one rect inside both the bitmap and the target.
        let rect = rect
            .clamped_to(self.dimension)
            .clamped_to(self.target.pixel_size());
        self.present_logged(rect, rect);
        Ok(())
    }

    fn present_stretched(&mut self, src: &Rect, dst: &Rect) -> RenderResult<()> {
        let src = src.clamped_to(self.dimension);
        let dst = dst.clamped_to(self.target.pixel_size());
        self.present_logged(src, dst);
        Ok(())
    }

    fn resize(&mut self, rect: &Rect) -> RenderResult<()> {
        let size = rect.dimension();
        if size == self.target.pixel_size() {
            debug!(width = size.width, height = size.height, "render target already sized");
            return Ok(());
        }

        let result = match self.binding {
            TargetBinding::Window => self.target.resize(size),
            TargetBinding::DeviceContext => self.target.bind_dc(self.surface, size.to_rect()),
        };
        match result {
            Ok(()) => debug!(
                width = size.width,
                height = size.height,
                binding = ?self.binding,
                "render target resized"
            ),
            Err(err) => warn!(
                error = %err,
                width = size.width,
                height = size.height,
                binding = ?self.binding,
                "render target resize failed"
            ),
        }
        Ok(())
    }
}
