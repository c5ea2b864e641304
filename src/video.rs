// src/video.rs - Camera capture thread feeding the backdrop and the frame scheduler
use crate::config::{SourceKind, VideoConfig};
use crate::error::VideoError;
use image::{ImageBuffer, Rgba, RgbaImage};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch};

#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub index: u64,
    pub captured_at: Instant,
    pub image: Arc<RgbaImage>,
}

impl VideoFrame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Description of where frames come from. The device itself is opened on the
/// capture thread because camera handles cannot cross threads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VideoSource {
    Camera {
        index: u32,
        width: u32,
        height: u32,
        fps: u32,
        mirror: bool,
    },
    Synthetic {
        width: u32,
        height: u32,
        fps: u32,
    },
}

impl VideoSource {
    pub fn from_config(config: &VideoConfig) -> Self {
        match config.source {
            SourceKind::Camera { index } => VideoSource::Camera {
                index,
                width: config.width,
                height: config.height,
                fps: config.fps,
                mirror: config.mirror,
            },
            SourceKind::Synthetic { width, height, fps } => {
                VideoSource::Synthetic { width, height, fps }
            }
        }
    }

    fn open(&self) -> Result<Box<dyn FrameGrabber>, VideoError> {
        match *self {
            VideoSource::Camera {
                index,
                width,
                height,
                fps,
                mirror,
            } => Ok(Box::new(CameraGrabber::open(index, width, height, fps, mirror)?)),
            VideoSource::Synthetic { width, height, fps } => {
                Ok(Box::new(SyntheticGrabber::new(width, height, fps)))
            }
        }
    }
}

trait FrameGrabber {
    fn resolution(&self) -> (u32, u32);
    /// Blocks until the next frame is available.
    fn grab(&mut self) -> Result<RgbaImage, VideoError>;
}

struct CameraGrabber {
    camera: Camera,
    mirror: bool,
}

impl CameraGrabber {
    fn open(index: u32, width: u32, height: u32, fps: u32, mirror: bool) -> Result<Self, VideoError> {
        tracing::debug!("Opening camera {} at {}x{}@{}", index, width, height, fps);
        let format = CameraFormat::new(Resolution::new(width, height), FrameFormat::MJPEG, fps);
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format));

        let mut camera = Camera::new(CameraIndex::Index(index), requested).map_err(|e| {
            VideoError::CameraAccess {
                index,
                reason: e.to_string(),
            }
        })?;
        camera
            .open_stream()
            .map_err(|e| VideoError::Stream(e.to_string()))?;

        let resolution = camera.resolution();
        tracing::info!(
            "Camera {} streaming at {}x{}@{}",
            index,
            resolution.width(),
            resolution.height(),
            camera.frame_rate()
        );
        Ok(Self { camera, mirror })
    }
}

impl FrameGrabber for CameraGrabber {
    fn resolution(&self) -> (u32, u32) {
        let resolution = self.camera.resolution();
        (resolution.width(), resolution.height())
    }

    fn grab(&mut self) -> Result<RgbaImage, VideoError> {
        let frame = self
            .camera
            .frame()
            .map_err(|e| VideoError::Capture(e.to_string()))?;
        let decoded = frame
            .decode_image::<RgbFormat>()
            .map_err(|e| VideoError::Decode(e.to_string()))?;

        let width = decoded.width();
        let height = decoded.height();
        let rgb_data = decoded.into_vec();

        let mut rgba_data = Vec::with_capacity((width * height * 4) as usize);
        for chunk in rgb_data.chunks(3) {
            rgba_data.extend_from_slice(&[chunk[0], chunk[1], chunk[2], 255]);
        }

        let img: RgbaImage = ImageBuffer::from_raw(width, height, rgba_data)
            .ok_or_else(|| VideoError::Decode("frame buffer size mismatch".to_string()))?;

        if self.mirror {
            Ok(image::imageops::flip_horizontal(&img))
        } else {
            Ok(img)
        }
    }
}

impl Drop for CameraGrabber {
    fn drop(&mut self) {
        let _ = self.camera.stop_stream();
    }
}

/// Moving test pattern paced at a fixed frame rate. Stands in for a camera
/// in tests and on machines without one.
struct SyntheticGrabber {
    width: u32,
    height: u32,
    period: Duration,
    next_due: Instant,
    frame: u64,
}

impl SyntheticGrabber {
    fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            period: Duration::from_secs_f64(1.0 / fps.max(1) as f64),
            next_due: Instant::now(),
            frame: 0,
        }
    }
}

impl FrameGrabber for SyntheticGrabber {
    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn grab(&mut self) -> Result<RgbaImage, VideoError> {
        let now = Instant::now();
        if self.next_due > now {
            thread::sleep(self.next_due - now);
        }
        self.next_due += self.period;

        let shift = (self.frame * 2) as u32;
        self.frame += 1;
        let (w, h) = (self.width, self.height);
        Ok(RgbaImage::from_fn(w, h, |x, y| {
            let checker = (((x + shift) / 32) + (y / 32)) % 2 == 0;
            let base = if checker { 70 } else { 40 };
            Rgba([
                base + (x * 60 / w) as u8,
                base + (y * 60 / h) as u8,
                base + 30,
                255,
            ])
        }))
    }
}

/// Receiving end of a running capture thread. Holds only the newest frame:
/// whatever arrives while the scheduler is busy replaces what was pending.
pub struct FrameStream {
    frames: watch::Receiver<Option<VideoFrame>>,
    pub resolution: (u32, u32),
    last_index: Option<u64>,
    skipped: u64,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl FrameStream {
    /// Waits for a frame newer than the last one returned. `None` once the
    /// capture thread has exited.
    pub async fn next_frame(&mut self) -> Option<VideoFrame> {
        loop {
            self.frames.changed().await.ok()?;
            let latest = { self.frames.borrow_and_update().clone() };
            let Some(frame) = latest else {
                continue;
            };
            if let Some(last) = self.last_index {
                let gap = frame.index.saturating_sub(last + 1);
                if gap > 0 {
                    tracing::trace!("Scheduler busy, skipped {} frame(s)", gap);
                }
                self.skipped += gap;
            }
            self.last_index = Some(frame.index);
            return Some(frame);
        }
    }

    /// A stream fed by hand instead of a capture thread.
    #[cfg(test)]
    pub(crate) fn from_slot(frames: watch::Receiver<Option<VideoFrame>>, resolution: (u32, u32)) -> Self {
        Self {
            frames,
            resolution,
            last_index: None,
            skipped: 0,
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Frames replaced before the scheduler got to them.
    pub fn dropped(&self) -> u64 {
        self.skipped
    }
}

impl Drop for FrameStream {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Capture thread panicked");
            }
        }
    }
}

/// Opens `source` on a dedicated thread and starts delivering frames.
///
/// Every frame is published to `backdrop` for the render loop and to the
/// scheduler slot. The slot keeps only the newest frame so detection always
/// runs on the current image and never falls behind the camera.
pub async fn spawn_capture(
    source: VideoSource,
    backdrop: watch::Sender<Option<VideoFrame>>,
    shutdown: watch::Receiver<bool>,
) -> Result<FrameStream, VideoError> {
    let (frames_tx, frames_rx) = watch::channel(None);
    let (ready_tx, ready_rx) = oneshot::channel();
    let stop = Arc::new(AtomicBool::new(false));
    let stop_ref = stop.clone();

    let handle = thread::Builder::new()
        .name("capture".to_string())
        .spawn(move || {
            let mut grabber = match source.open() {
                Ok(grabber) => {
                    let _ = ready_tx.send(Ok(grabber.resolution()));
                    grabber
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            capture_loop(grabber.as_mut(), &frames_tx, &backdrop, &shutdown, &stop_ref);
            tracing::debug!("Capture thread exiting");
        })
        .map_err(|e| VideoError::Stream(e.to_string()))?;

    match ready_rx.await {
        Ok(Ok(resolution)) => Ok(FrameStream {
            frames: frames_rx,
            resolution,
            last_index: None,
            skipped: 0,
            stop,
            handle: Some(handle),
        }),
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(e)
        }
        Err(_) => {
            let _ = handle.join();
            Err(VideoError::CaptureThreadGone)
        }
    }
}

fn capture_loop(
    grabber: &mut dyn FrameGrabber,
    frames_tx: &watch::Sender<Option<VideoFrame>>,
    backdrop: &watch::Sender<Option<VideoFrame>>,
    shutdown: &watch::Receiver<bool>,
    stop: &AtomicBool,
) {
    let mut index = 0u64;
    while !*shutdown.borrow() && !stop.load(Ordering::Relaxed) && !frames_tx.is_closed() {
        let image = match grabber.grab() {
            Ok(image) => image,
            Err(e) => {
                tracing::error!("Video stream ended: {}", e);
                return;
            }
        };
        let frame = VideoFrame {
            index,
            captured_at: Instant::now(),
            image: Arc::new(image),
        };
        index += 1;

        backdrop.send_replace(Some(frame.clone()));
        frames_tx.send_replace(Some(frame));
    }
}
