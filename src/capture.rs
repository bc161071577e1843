//! Live camera sources from V4L2 devices
//!
//! A camera bound to a surface is captured on its own thread. Every decoded
//! frame is published into a lock-free slot; the render loop picks up the
//! latest one when it refreshes the surface texture, so a slow camera never
//! blocks rendering and a fast one never queues frames.
//!
//! Supported capture formats: MJPEG (decoded with turbojpeg, falling back to
//! jpeg-decoder), YUYV, RGB24 and BGR24.

use anyhow::{Context, Result};
use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

/// Thread-local turbojpeg decompressor for hardware-accelerated JPEG decoding
thread_local! {
    static JPEG_DECOMPRESSOR: std::cell::RefCell<Option<turbojpeg::Decompressor>> =
        std::cell::RefCell::new(turbojpeg::Decompressor::new().ok());
}

/// Supported pixel formats in order of preference
const PREFERRED_FORMATS: &[&[u8; 4]] = &[
    b"MJPG", // Motion JPEG - compressed, enables high FPS over USB
    b"YUYV", // YUV 4:2:2 - uncompressed
    b"RGB3", // RGB24
    b"BGR3", // BGR24
];

/// One decoded camera frame, packed RGB24
#[derive(Debug)]
pub struct CameraFrame {
    pub rgb: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Monotonic frame counter, used to skip re-uploading the same frame
    pub sequence: u64,
}

/// How long dropping a feed waits for its capture thread
const STOP_TIMEOUT: Duration = Duration::from_millis(250);

/// Handle to a running camera capture thread
///
/// Dropping the feed stops the thread and waits up to `STOP_TIMEOUT` for it,
/// which releases the device. A device stalled inside a blocking dequeue
/// cannot be interrupted; its thread is detached and closes the device once
/// the dequeue returns.
pub struct CameraFeed {
    device_path: String,
    latest: Arc<ArcSwapOption<CameraFrame>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    width: u32,
    height: u32,
}

impl std::fmt::Debug for CameraFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraFeed")
            .field("device_path", &self.device_path)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl CameraFeed {
    /// Open a capture device and start streaming frames from it
    pub fn open(device_path: &str, width: u32, height: u32, fps: u32) -> Result<Self> {
        info!("Opening camera {} ({}x{} @ {} fps)", device_path, width, height, fps);

        let dev = Device::with_path(device_path)
            .with_context(|| format!("Failed to open camera device: {}", device_path))?;

        let caps = dev.query_caps().context("Failed to query device capabilities")?;
        info!("Camera: {} (driver: {})", caps.card, caps.driver);

        let format = configure_capture_format(&dev, width, height)?;
        if let Err(e) = set_frame_rate(&dev, fps) {
            warn!("Could not set frame rate to {} fps: {}", fps, e);
        }

        let latest = Arc::new(ArcSwapOption::empty());
        let stop = Arc::new(AtomicBool::new(false));

        let thread = {
            let format = format.clone();
            let latest = latest.clone();
            let stop = stop.clone();
            let path = device_path.to_string();
            std::thread::Builder::new()
                .name(format!("camera {}", device_path))
                .spawn(move || {
                    if let Err(e) = capture_loop(dev, format, &latest, &stop) {
                        warn!("Camera {} stopped: {:#}", path, e);
                    }
                })
                .context("Failed to spawn camera thread")?
        };

        Ok(Self {
            device_path: device_path.to_string(),
            latest,
            stop,
            thread: Some(thread),
            width: format.width,
            height: format.height,
        })
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Latest decoded frame, if the camera has delivered one yet
    pub fn latest_frame(&self) -> Option<Arc<CameraFrame>> {
        self.latest.load_full()
    }
}

impl Drop for CameraFeed {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            // The capture thread notices the flag after its next frame
            if !join_within(thread, STOP_TIMEOUT) {
                warn!(
                    "Camera {} did not stop within {:?}, detaching its thread",
                    self.device_path, STOP_TIMEOUT
                );
                return;
            }
        }
        info!("Released camera {}", self.device_path);
    }
}

/// Join `thread` if it finishes within `timeout`. Returns false when the
/// thread was left running.
fn join_within(thread: JoinHandle<()>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !thread.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    let _ = thread.join();
    true
}

fn capture_loop(
    dev: Device,
    format: v4l::Format,
    latest: &ArcSwapOption<CameraFrame>,
    stop: &AtomicBool,
) -> Result<()> {
    let mut stream = Stream::with_buffers(&dev, Type::VideoCapture, 4)
        .context("Failed to create capture stream")?;

    let width = format.width as usize;
    let height = format.height as usize;
    let fourcc = format.fourcc.repr;

    let mut sequence = 0u64;
    let mut frame_count = 0u64;
    let mut last_stats_time = Instant::now();
    let stats_interval = Duration::from_secs(10);

    while !stop.load(Ordering::SeqCst) {
        let (buf, _meta) = stream.next().context("Failed to capture frame")?;

        let mut rgb = vec![0u8; width * height * 3];
        match &fourcc {
            b"MJPG" => {
                if decode_jpeg_rgb(buf, &mut rgb, width, height).is_err() {
                    if frame_count % 100 == 0 {
                        warn!("Failed to decode MJPEG frame");
                    }
                    continue;
                }
            }
            b"YUYV" => yuyv_to_rgb(buf, &mut rgb, width, height),
            b"BGR3" => bgr_to_rgb(buf, &mut rgb),
            _ => {
                let copy_len = buf.len().min(rgb.len());
                rgb[..copy_len].copy_from_slice(&buf[..copy_len]);
            }
        }

        sequence += 1;
        latest.store(Some(Arc::new(CameraFrame {
            rgb,
            width: format.width,
            height: format.height,
            sequence,
        })));

        frame_count += 1;
        if last_stats_time.elapsed() >= stats_interval {
            let elapsed = last_stats_time.elapsed().as_secs_f64();
            debug!("Camera: {:.1} fps", frame_count as f64 / elapsed);
            frame_count = 0;
            last_stats_time = Instant::now();
        }
    }

    Ok(())
}

/// Configure the capture format, trying preferred formats in order
fn configure_capture_format(dev: &Device, width: u32, height: u32) -> Result<v4l::Format> {
    let formats = dev.enum_formats().context("Failed to enumerate formats")?;

    for preferred in PREFERRED_FORMATS {
        let fourcc = FourCC::new(preferred);
        if formats.iter().any(|f| f.fourcc == fourcc) {
            let mut format = dev.format().context("Failed to get current format")?;
            format.width = width;
            format.height = height;
            format.fourcc = fourcc;

            match dev.set_format(&format) {
                Ok(actual) => {
                    info!(
                        "Camera format: {}x{} {:?}",
                        actual.width,
                        actual.height,
                        String::from_utf8_lossy(&actual.fourcc.repr)
                    );
                    return Ok(actual);
                }
                Err(e) => {
                    warn!(
                        "Could not set format {:?} at {}x{}: {}",
                        String::from_utf8_lossy(*preferred),
                        width,
                        height,
                        e
                    );
                }
            }
        }
    }

    // Fall back to whatever the device gives us
    let current = dev.format().context("Failed to get device format")?;
    info!(
        "Using device's current format: {}x{} {:?}",
        current.width,
        current.height,
        String::from_utf8_lossy(&current.fourcc.repr)
    );
    Ok(current)
}

fn set_frame_rate(dev: &Device, fps: u32) -> Result<()> {
    let mut params = dev.params().context("Failed to get parameters")?;
    params.interval = v4l::Fraction::new(1, fps.max(1));
    dev.set_params(&params).context("Failed to set parameters")?;
    Ok(())
}

/// Decode a JPEG frame to packed RGB24 of a known size.
///
/// Uses turbojpeg and falls back to the software jpeg-decoder.
pub fn decode_jpeg_rgb(jpeg: &[u8], rgb: &mut [u8], width: usize, height: usize) -> Result<(), ()> {
    let expected_size = width * height * 3;
    if rgb.len() < expected_size {
        return Err(());
    }

    let turbo_ok = JPEG_DECOMPRESSOR.with(|decomp| {
        if let Some(ref mut decompressor) = *decomp.borrow_mut() {
            if let Ok(header) = decompressor.read_header(jpeg) {
                if header.width == width && header.height == height {
                    let image = turbojpeg::Image {
                        pixels: &mut rgb[..expected_size],
                        width: header.width,
                        pitch: header.width * 3,
                        height: header.height,
                        format: turbojpeg::PixelFormat::RGB,
                    };
                    return decompressor.decompress(jpeg, image).is_ok();
                }
            }
        }
        false
    });

    if turbo_ok {
        return Ok(());
    }

    let (pixels, w, h) = decode_jpeg_software(jpeg)?;
    if w != width || h != height {
        return Err(());
    }
    rgb[..expected_size].copy_from_slice(&pixels[..expected_size]);
    Ok(())
}

/// Decode a JPEG of unknown size to RGB24, returning (pixels, width, height)
pub fn decode_jpeg_any(jpeg: &[u8]) -> Result<(Vec<u8>, usize, usize), ()> {
    let turbo = JPEG_DECOMPRESSOR.with(|decomp| {
        if let Some(ref mut decompressor) = *decomp.borrow_mut() {
            if let Ok(header) = decompressor.read_header(jpeg) {
                let mut pixels = vec![0u8; header.width * header.height * 3];
                let image = turbojpeg::Image {
                    pixels: pixels.as_mut_slice(),
                    width: header.width,
                    pitch: header.width * 3,
                    height: header.height,
                    format: turbojpeg::PixelFormat::RGB,
                };
                if decompressor.decompress(jpeg, image).is_ok() {
                    return Some((pixels, header.width, header.height));
                }
            }
        }
        None
    });

    match turbo {
        Some(decoded) => Ok(decoded),
        None => decode_jpeg_software(jpeg),
    }
}

/// Software fallback decoder using jpeg-decoder
fn decode_jpeg_software(jpeg: &[u8]) -> Result<(Vec<u8>, usize, usize), ()> {
    use std::io::Cursor;

    let mut decoder = jpeg_decoder::Decoder::new(Cursor::new(jpeg));
    let pixels = decoder.decode().map_err(|_| ())?;
    let info = decoder.info().ok_or(())?;
    let width = info.width as usize;
    let height = info.height as usize;

    let rgb = match info.pixel_format {
        jpeg_decoder::PixelFormat::RGB24 => pixels,
        jpeg_decoder::PixelFormat::L8 => pixels.iter().flat_map(|&g| [g, g, g]).collect(),
        _ => return Err(()),
    };

    if rgb.len() < width * height * 3 {
        return Err(());
    }
    Ok((rgb, width, height))
}

/// Convert YUYV to RGB using integer BT.601 math
#[inline]
pub fn yuyv_to_rgb(yuyv: &[u8], rgb: &mut [u8], width: usize, height: usize) {
    let pixels = width * height;

    for i in 0..(pixels / 2) {
        let yuyv_offset = i * 4;
        let rgb_offset = i * 6;

        if yuyv_offset + 3 >= yuyv.len() || rgb_offset + 5 >= rgb.len() {
            break;
        }

        let y0 = yuyv[yuyv_offset] as i32;
        let u = yuyv[yuyv_offset + 1] as i32 - 128;
        let y1 = yuyv[yuyv_offset + 2] as i32;
        let v = yuyv[yuyv_offset + 3] as i32 - 128;

        let v_r = (359 * v) >> 8;
        let uv_g = (88 * u + 183 * v) >> 8;
        let u_b = (454 * u) >> 8;

        rgb[rgb_offset] = (y0 + v_r).clamp(0, 255) as u8;
        rgb[rgb_offset + 1] = (y0 - uv_g).clamp(0, 255) as u8;
        rgb[rgb_offset + 2] = (y0 + u_b).clamp(0, 255) as u8;

        rgb[rgb_offset + 3] = (y1 + v_r).clamp(0, 255) as u8;
        rgb[rgb_offset + 4] = (y1 - uv_g).clamp(0, 255) as u8;
        rgb[rgb_offset + 5] = (y1 + u_b).clamp(0, 255) as u8;
    }
}

/// Swap R and B channels
#[inline]
pub fn bgr_to_rgb(bgr: &[u8], rgb: &mut [u8]) {
    for (bgr_chunk, rgb_chunk) in bgr.chunks_exact(3).zip(rgb.chunks_exact_mut(3)) {
        rgb_chunk[0] = bgr_chunk[2];
        rgb_chunk[1] = bgr_chunk[1];
        rgb_chunk[2] = bgr_chunk[0];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_within_stopped_thread() {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let thread = std::thread::spawn(move || {
            while !flag.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(1));
            }
        });
        stop.store(true, Ordering::SeqCst);
        assert!(join_within(thread, Duration::from_secs(5)));
    }

    #[test]
    fn test_join_within_gives_up_on_stalled_thread() {
        let thread = std::thread::spawn(|| std::thread::sleep(Duration::from_millis(500)));
        assert!(!join_within(thread, Duration::from_millis(20)));
    }

    #[test]
    fn test_yuyv_grey() {
        // Neutral chroma keeps luma on all channels
        let yuyv = [100u8, 128, 200, 128];
        let mut rgb = [0u8; 6];
        yuyv_to_rgb(&yuyv, &mut rgb, 2, 1);
        assert_eq!(rgb, [100, 100, 100, 200, 200, 200]);
    }

    #[test]
    fn test_bgr_to_rgb() {
        let bgr = vec![0u8, 128u8, 255u8];
        let mut rgb = vec![0u8; 3];
        bgr_to_rgb(&bgr, &mut rgb);
        assert_eq!(rgb, vec![255, 128, 0]);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode_jpeg_any(b"not a jpeg").is_err());
        let mut rgb = vec![0u8; 12];
        assert!(decode_jpeg_rgb(b"nope", &mut rgb, 2, 2).is_err());
    }

    #[test]
    fn test_decode_encoded_jpeg() {
        use image::{ImageOutputFormat, RgbImage};
        use std::io::Cursor;

        let img = RgbImage::from_pixel(8, 4, image::Rgb([200, 30, 30]));
        let mut jpeg = Vec::new();
        img.write_to(&mut Cursor::new(&mut jpeg), ImageOutputFormat::Jpeg(90))
            .unwrap();

        let (pixels, w, h) = decode_jpeg_any(&jpeg).unwrap();
        assert_eq!((w, h), (8, 4));
        assert_eq!(pixels.len(), 8 * 4 * 3);
        assert!(pixels[0] > 150);
    }
}
