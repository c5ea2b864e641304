// Lists cameras and checks that one can stream: camera_probe [index]
use anyhow::{bail, Context};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;

fn main() -> anyhow::Result<()> {
    let index: u32 = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse()
            .with_context(|| format!("camera index must be a number, got '{}'", arg))?,
        None => 0,
    };

    let cameras = nokhwa::query(ApiBackend::Auto).context("querying cameras")?;
    println!("Found {} camera(s):", cameras.len());
    for (i, camera) in cameras.iter().enumerate() {
        println!("  [{}] {}", i, camera.human_name());
    }
    if cameras.is_empty() {
        bail!("no cameras connected");
    }

    let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
    let mut camera = Camera::new(CameraIndex::Index(index), format)
        .with_context(|| format!("opening camera {} (in use elsewhere or permission denied?)", index))?;
    camera.open_stream().context("opening stream")?;

    let frame = camera.frame().context("capturing frame")?;
    let image = frame
        .decode_image::<RgbFormat>()
        .context("decoding frame")?;
    println!(
        "Camera {} OK: {}x{} at {} fps",
        index,
        image.width(),
        image.height(),
        camera.frame_rate()
    );

    camera.stop_stream().context("stopping stream")?;
    Ok(())
}
