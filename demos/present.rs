use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use snow_render::{Dimension, ManagedFrameBuffer, PixelFormat, Rect, RenderMode};

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    println!(
        "Accelerated compositor available: {}",
        snow_render::is_accelerated_available()
    );

    let mut frame_buffer = ManagedFrameBuffer::builder()
        .preferred_mode(RenderMode::Compositor)
        .build();

    let begin = Instant::now();
    frame_buffer
        .initialize(PixelFormat::bgra32(), Dimension::new(640, 360), None)
        .context("failed to initialize the frame buffer on the desktop")?;
    println!(
        "Initialized {} backend in {:.3} ms",
        frame_buffer.mode().as_str(),
        begin.elapsed().as_secs_f64() * 1000.0
    );

    frame_buffer.draw_test_pattern();
    std::thread::sleep(Duration::from_secs(1));

    let next = match frame_buffer.mode() {
        RenderMode::Compositor => RenderMode::Raster,
        RenderMode::Raster => RenderMode::Compositor,
    };
    match frame_buffer.switch_mode(next) {
        Ok(()) => println!("Switched to {} backend", next.as_str()),
        Err(err) => println!(
            "Stayed on {} backend: {err}",
            frame_buffer.mode().as_str()
        ),
    }

    frame_buffer.fill_rect(&Rect::from_size(0, 0, 640, 360), 0)?;
    frame_buffer.draw_test_pattern();
    std::thread::sleep(Duration::from_secs(1));
    Ok(())
}
