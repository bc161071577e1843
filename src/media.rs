//! Media sources bound to surfaces
//!
//! A surface renders nothing until media is attached. Three kinds exist:
//! still images, looping Motion-JPEG clips, and live V4L2 cameras. Decoding
//! happens before the media reaches the engine, so a surface is either
//! fully loaded or has no media at all.

use image::RgbaImage;
use serde::Serialize;
use std::ops::Range;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::capture::{decode_jpeg_any, CameraFeed, CameraFrame};
use crate::error::{MapperError, MapperResult};
use crate::texture::Texture;

/// Declared kind of an incoming media byte stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Classify by declared content type, falling back to the file name
    pub fn classify(content_type: Option<&str>, file_name: Option<&str>) -> MapperResult<Self> {
        let declared = content_type
            .map(|ct| ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
            .filter(|ct| !ct.is_empty() && ct != "application/octet-stream");

        let mime = match declared {
            Some(ct) => ct,
            None => file_name
                .and_then(|name| mime_guess::from_path(name).first())
                .map(|m| m.essence_str().to_string())
                .ok_or_else(|| MapperError::media("unknown media type"))?,
        };

        if mime.starts_with("image/") {
            Ok(MediaKind::Image)
        } else if mime.starts_with("video/") {
            Ok(MediaKind::Video)
        } else {
            Err(MapperError::media(format!("unsupported media type: {}", mime)))
        }
    }
}

/// Limits used to flag media that may render slowly
#[derive(Debug, Clone, Copy)]
pub struct MediaLimits {
    pub max_image_dimension: u32,
    pub max_video_dimension: u32,
    pub video_fps: u32,
}

/// A Motion-JPEG clip that loops forever.
///
/// Frames stay compressed; only the frame being shown is decoded, so memory
/// is bounded by the upload size rather than by the frame count.
pub struct VideoClip {
    data: Vec<u8>,
    frames: Vec<Range<usize>>,
    width: u32,
    height: u32,
    frame_duration: Duration,
    started: Instant,
}

impl std::fmt::Debug for VideoClip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoClip")
            .field("frames", &self.frames.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl VideoClip {
    /// Index a Motion-JPEG stream. The first frame is decoded to check the
    /// stream and to learn the clip size.
    pub fn from_mjpeg(data: Vec<u8>, fps: u32) -> MapperResult<Self> {
        let frames = mjpeg_frame_ranges(&data);
        let Some(first) = frames.first() else {
            return Err(MapperError::media(
                "unsupported video codec (only Motion-JPEG streams can be decoded)",
            ));
        };
        let (_, w, h) = decode_jpeg_any(&data[first.clone()])
            .map_err(|_| MapperError::media("failed to decode video frame 0"))?;

        Ok(Self {
            width: w as u32,
            height: h as u32,
            data,
            frames,
            frame_duration: Duration::from_secs_f64(1.0 / fps.max(1) as f64),
            started: Instant::now(),
        })
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Index of the frame showing at `now`
    pub fn frame_index_at(&self, now: Instant) -> usize {
        if self.frames.is_empty() {
            return 0;
        }
        let elapsed = now.saturating_duration_since(self.started);
        let index = elapsed.as_nanos() / self.frame_duration.as_nanos().max(1);
        (index % self.frames.len() as u128) as usize
    }

    /// Decode frame `index` to packed RGB24
    pub fn decode_frame(&self, index: usize) -> Option<(Vec<u8>, u32, u32)> {
        let range = self.frames.get(index)?.clone();
        match decode_jpeg_any(&self.data[range]) {
            Ok((rgb, w, h)) => Some((rgb, w as u32, h as u32)),
            Err(()) => {
                debug!("Skipping undecodable clip frame {}", index);
                None
            }
        }
    }

    fn upload_frame(&self, texture: &mut Texture, index: usize) -> bool {
        match self.decode_frame(index) {
            Some((rgb, w, h)) => {
                texture.upload_rgb(&rgb, w, h);
                true
            }
            None => false,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Compressed size held in memory
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

/// Media attached to a surface
#[derive(Debug)]
pub enum Media {
    Image(RgbaImage),
    Clip(VideoClip),
    Camera(CameraFeed),
}

impl Media {
    pub fn is_video(&self) -> bool {
        !matches!(self, Media::Image(_))
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Media::Image(img) => (img.width(), img.height()),
            Media::Clip(clip) => clip.dimensions(),
            Media::Camera(feed) => feed.dimensions(),
        }
    }

    pub fn describe(&self) -> String {
        let (w, h) = self.dimensions();
        match self {
            Media::Image(_) => format!("image {}x{}", w, h),
            Media::Clip(clip) => format!(
                "clip {}x{} ({} frames, {} KiB)",
                w,
                h,
                clip.frame_count(),
                clip.byte_len() / 1024
            ),
            Media::Camera(feed) => format!("camera {} {}x{}", feed.device_path(), w, h),
        }
    }

    /// Upload the first displayable frame (images are uploaded exactly once)
    pub fn upload_initial(&self, texture: &mut Texture, now: Instant) {
        match self {
            Media::Image(img) => texture.upload(img),
            Media::Clip(clip) => {
                clip.upload_frame(texture, clip.frame_index_at(now));
            }
            Media::Camera(feed) => {
                if let Some(frame) = feed.latest_frame() {
                    upload_camera_frame(texture, &frame);
                }
            }
        }
    }

    /// Refresh a video texture from the current frame.
    ///
    /// Returns false when the source has nothing new to show yet.
    pub fn refresh(&self, texture: &mut Texture, now: Instant, last_sequence: &mut u64) -> bool {
        match self {
            Media::Image(_) => false,
            Media::Clip(clip) => {
                let index = clip.frame_index_at(now);
                let sequence = index as u64 + 1;
                if sequence == *last_sequence {
                    return false;
                }
                // A bad frame is skipped until the clip moves on
                *last_sequence = sequence;
                clip.upload_frame(texture, index)
            }
            Media::Camera(feed) => match feed.latest_frame() {
                Some(frame) if frame.sequence != *last_sequence => {
                    *last_sequence = frame.sequence;
                    upload_camera_frame(texture, &frame);
                    true
                }
                _ => false,
            },
        }
    }
}

fn upload_camera_frame(texture: &mut Texture, frame: &CameraFrame) {
    texture.upload_rgb(&frame.rgb, frame.width, frame.height);
}

/// Result of decoding a media byte stream
#[derive(Debug)]
pub struct LoadedMedia {
    pub media: Media,
    /// Larger than the configured dimension limit (accepted, may be slow)
    pub oversized: bool,
}

/// Decode an uploaded byte stream into media
pub fn decode_media(
    bytes: &[u8],
    content_type: Option<&str>,
    file_name: Option<&str>,
    limits: &MediaLimits,
) -> MapperResult<LoadedMedia> {
    let kind = MediaKind::classify(content_type, file_name)?;

    let media = match kind {
        MediaKind::Image => {
            let img = image::load_from_memory(bytes)
                .map_err(|e| MapperError::media(format!("failed to decode image: {}", e)))?;
            Media::Image(img.to_rgba8())
        }
        MediaKind::Video => Media::Clip(VideoClip::from_mjpeg(bytes.to_vec(), limits.video_fps)?),
    };

    let (w, h) = media.dimensions();
    let limit = match kind {
        MediaKind::Image => limits.max_image_dimension,
        MediaKind::Video => limits.max_video_dimension,
    };
    let oversized = w > limit || h > limit;
    if oversized {
        warn!(
            "Large {:?} detected ({}x{}, limit {}). Consider smaller files for better performance.",
            kind, w, h, limit
        );
    }

    info!("Decoded {}", media.describe());
    Ok(LoadedMedia { media, oversized })
}

/// Open a live camera as surface media
pub fn open_camera(device: &str, width: u32, height: u32, fps: u32) -> MapperResult<LoadedMedia> {
    let feed = CameraFeed::open(device, width, height, fps)
        .map_err(|e| MapperError::media(format!("{:#}", e)))?;
    Ok(LoadedMedia {
        media: Media::Camera(feed),
        oversized: false,
    })
}

/// Byte ranges of the JPEG frames (SOI..EOI) in a Motion-JPEG stream
pub fn mjpeg_frame_ranges(bytes: &[u8]) -> Vec<Range<usize>> {
    let mut frames = Vec::new();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == 0xFF && bytes[i + 1] == 0xD8 {
            let start = i;
            let mut j = i + 2;
            let mut end = None;
            while j + 1 < bytes.len() {
                if bytes[j] == 0xFF && bytes[j + 1] == 0xD9 {
                    end = Some(j + 2);
                    break;
                }
                j += 1;
            }
            match end {
                Some(end) => {
                    frames.push(start..end);
                    i = end;
                }
                None => break,
            }
        } else {
            i += 1;
        }
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageOutputFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn limits() -> MediaLimits {
        MediaLimits {
            max_image_dimension: 16,
            max_video_dimension: 16,
            video_fps: 10,
        }
    }

    fn encode(img: &RgbImage, format: ImageOutputFormat) -> Vec<u8> {
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), format).unwrap();
        out
    }

    #[test]
    fn test_classify() {
        assert_eq!(MediaKind::classify(Some("image/png"), None).unwrap(), MediaKind::Image);
        assert_eq!(
            MediaKind::classify(Some("video/mp4; codecs=avc1"), None).unwrap(),
            MediaKind::Video
        );
        assert_eq!(MediaKind::classify(None, Some("clip.mp4")).unwrap(), MediaKind::Video);
        assert_eq!(
            MediaKind::classify(Some("application/octet-stream"), Some("photo.jpg")).unwrap(),
            MediaKind::Image
        );
        assert!(matches!(
            MediaKind::classify(Some("text/plain"), None),
            Err(MapperError::MediaLoadFailure(_))
        ));
    }

    #[test]
    fn test_decode_png() {
        let img = RgbImage::from_pixel(4, 2, Rgb([1, 2, 3]));
        let png = encode(&img, ImageOutputFormat::Png);
        let loaded = decode_media(&png, Some("image/png"), None, &limits()).unwrap();
        assert!(!loaded.oversized);
        assert!(!loaded.media.is_video());
        assert_eq!(loaded.media.dimensions(), (4, 2));
    }

    #[test]
    fn test_oversized_is_flagged_not_rejected() {
        let img = RgbImage::from_pixel(32, 4, Rgb([1, 2, 3]));
        let png = encode(&img, ImageOutputFormat::Png);
        let loaded = decode_media(&png, Some("image/png"), None, &limits()).unwrap();
        assert!(loaded.oversized);
    }

    #[test]
    fn test_corrupt_image_fails() {
        let err = decode_media(b"garbage", Some("image/png"), None, &limits()).unwrap_err();
        assert!(matches!(err, MapperError::MediaLoadFailure(_)));
    }

    #[test]
    fn test_mjpeg_clip() {
        let a = encode(&RgbImage::from_pixel(8, 8, Rgb([250, 0, 0])), ImageOutputFormat::Jpeg(90));
        let b = encode(&RgbImage::from_pixel(8, 8, Rgb([0, 0, 250])), ImageOutputFormat::Jpeg(90));
        let mut stream = a.clone();
        stream.extend_from_slice(&b);

        assert_eq!(mjpeg_frame_ranges(&stream), vec![0..a.len(), a.len()..stream.len()]);

        let loaded = decode_media(&stream, Some("video/x-motion-jpeg"), None, &limits()).unwrap();
        assert!(loaded.media.is_video());
        match loaded.media {
            Media::Clip(ref clip) => {
                assert_eq!(clip.frame_count(), 2);
                assert_eq!(clip.dimensions(), (8, 8));
                assert_eq!(clip.byte_len(), stream.len());
                let t0 = clip.started;
                assert_eq!(clip.frame_index_at(t0), 0);
                assert_eq!(clip.frame_index_at(t0 + Duration::from_millis(150)), 1);
                assert_eq!(clip.frame_index_at(t0 + Duration::from_millis(250)), 0);
            }
            _ => panic!("expected clip"),
        }
    }

    #[test]
    fn test_non_mjpeg_video_fails() {
        let err = decode_media(b"\x00\x00\x00\x18ftypmp42", Some("video/mp4"), None, &limits())
            .unwrap_err();
        assert!(matches!(err, MapperError::MediaLoadFailure(_)));
    }

    fn mjpeg(frames: &[[u8; 3]], size: u32) -> Vec<u8> {
        frames
            .iter()
            .flat_map(|c| encode(&RgbImage::from_pixel(size, size, Rgb(*c)), ImageOutputFormat::Jpeg(90)))
            .collect()
    }

    #[test]
    fn test_clip_refresh_skips_same_frame() {
        let clip = VideoClip::from_mjpeg(mjpeg(&[[9, 9, 9], [9, 9, 9]], 2), 10).unwrap();
        let media = Media::Clip(clip);
        let mut tex = Texture::new();
        let mut seq = 0;
        let now = Instant::now();
        assert!(media.refresh(&mut tex, now, &mut seq));
        assert!(!media.refresh(&mut tex, now, &mut seq));
        assert_eq!(tex.upload_count(), 1);
    }

    #[test]
    fn test_clip_decodes_frames_on_demand() {
        let clip = VideoClip::from_mjpeg(mjpeg(&[[250, 0, 0], [0, 0, 250]], 4), 10).unwrap();
        let t0 = clip.started;
        let media = Media::Clip(clip);
        let mut tex = Texture::new();
        let mut seq = 0;

        assert!(media.refresh(&mut tex, t0, &mut seq));
        assert_eq!((tex.width(), tex.height()), (4, 4));
        assert!(tex.sample(0.5, 0.5)[0] > 0.9);

        assert!(media.refresh(&mut tex, t0 + Duration::from_millis(120), &mut seq));
        assert!(tex.sample(0.5, 0.5)[2] > 0.9);
        assert_eq!(tex.upload_count(), 2);
    }

    #[test]
    fn test_clip_keeps_only_compressed_bytes() {
        // 200 frames of 64x64 would be 3.2 MB decoded
        let colors: Vec<[u8; 3]> = (0..200).map(|i| [i as u8, 0, 0]).collect();
        let stream = mjpeg(&colors, 64);
        let clip = VideoClip::from_mjpeg(stream.clone(), 30).unwrap();
        assert_eq!(clip.frame_count(), 200);
        assert_eq!(clip.byte_len(), stream.len());
        assert!(clip.byte_len() < 200 * 64 * 64 * 4);
    }

    #[test]
    fn test_corrupt_first_clip_frame_fails() {
        let err = VideoClip::from_mjpeg(vec![0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9], 30).unwrap_err();
        assert!(matches!(err, MapperError::MediaLoadFailure(_)));
    }
}
