//! Frame capture providers.
//!
//! A provider hands out one exclusive `FrameSource` at a time. Sources deliver
//! frames already scaled to the requested grid size with nearest-neighbour
//! sampling, so the sampler sees exactly one pixel per cell.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use image::imageops::{self, FilterType};
use image::RgbaImage;
use log::{debug, info};

use crate::error::{PipelineError, Result};
use crate::frame::{GridDimensions, RgbaFrame};

pub const DEFAULT_CAPTURE_WIDTH: u32 = 640;
pub const DEFAULT_CAPTURE_HEIGHT: u32 = 480;
pub const DEFAULT_CAPTURE_FPS: u32 = 30;

const STDERR_TAIL_BYTES: usize = 2048;

pub trait FrameSource {
    /// Human-readable `WxH @ fps` description of the live input.
    fn describe(&self) -> String;

    fn current_frame(&mut self, dims: GridDimensions) -> Result<RgbaFrame>;
}

pub trait CaptureProvider {
    type Source: FrameSource;

    fn acquire(&mut self) -> Result<Self::Source>;

    fn release(&mut self, source: Self::Source);
}

/// Nearest-neighbour scale of a native RGBA frame to the grid size.
pub fn scale_to_grid(image: &RgbaImage, dims: GridDimensions) -> Result<RgbaFrame> {
    if image.width() == dims.width && image.height() == dims.height {
        return RgbaFrame::new(dims.width, dims.height, image.as_raw().clone());
    }
    let scaled = imageops::resize(image, dims.width, dims.height, FilterType::Nearest);
    RgbaFrame::new(dims.width, dims.height, scaled.into_raw())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSpec {
    /// A camera, addressed the way the platform's ffmpeg input device expects.
    Device { name: String },
    /// A video file decoded at its native rate.
    Video { path: PathBuf },
    Image { path: PathBuf },
    Synthetic,
}

impl CaptureSpec {
    pub fn parse(raw: &str) -> Result<Self> {
        let value = raw.trim();
        if value.eq_ignore_ascii_case("synthetic") {
            return Ok(Self::Synthetic);
        }
        if value.eq_ignore_ascii_case("camera") || value.eq_ignore_ascii_case("device") {
            return Ok(Self::Device {
                name: default_device_name().to_owned(),
            });
        }
        let prefixed: [(&str, fn(&str) -> Self); 4] = [
            ("device:", |rest| Self::Device {
                name: rest.to_owned(),
            }),
            ("video:", |rest| Self::Video {
                path: PathBuf::from(rest),
            }),
            ("file:", |rest| Self::Video {
                path: PathBuf::from(rest),
            }),
            ("image:", |rest| Self::Image {
                path: PathBuf::from(rest),
            }),
        ];
        for (prefix, build) in prefixed {
            if let Some(rest) = value.strip_prefix(prefix) {
                let rest = rest.trim();
                if rest.is_empty() {
                    return Err(PipelineError::invalid_config(format!(
                        "invalid source '{raw}': missing value after '{prefix}'"
                    )));
                }
                return Ok(build(rest));
            }
        }
        Err(PipelineError::invalid_config(format!(
            "invalid source '{raw}': expected 'camera', 'device:<name>', 'video:<path>', 'image:<path>' or 'synthetic'"
        )))
    }

    pub fn display_label(&self) -> String {
        match self {
            Self::Device { name } => format!("device:{name}"),
            Self::Video { path } => format!("video:{}", path.display()),
            Self::Image { path } => format!("image:{}", path.display()),
            Self::Synthetic => "synthetic".to_owned(),
        }
    }
}

pub fn default_device_name() -> &'static str {
    if cfg!(target_os = "macos") {
        "0"
    } else if cfg!(target_os = "windows") {
        "video=Integrated Camera"
    } else {
        "/dev/video0"
    }
}

// ---------------------------------------------------------------------------
// ffmpeg-backed capture (camera devices and video files)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FfmpegInput {
    Device(String),
    Video(PathBuf),
}

impl FfmpegInput {
    fn label(&self) -> String {
        match self {
            Self::Device(name) => name.clone(),
            Self::Video(path) => path.display().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FfmpegCapture {
    input: FfmpegInput,
    width: u32,
    height: u32,
    fps: u32,
    ffmpeg: PathBuf,
}

impl FfmpegCapture {
    pub fn new(input: FfmpegInput) -> Self {
        Self {
            input,
            width: DEFAULT_CAPTURE_WIDTH,
            height: DEFAULT_CAPTURE_HEIGHT,
            fps: DEFAULT_CAPTURE_FPS,
            ffmpeg: PathBuf::from("ffmpeg"),
        }
    }

    pub fn with_resolution(mut self, width: u32, height: u32, fps: u32) -> Self {
        self.width = width.max(1);
        self.height = height.max(1);
        self.fps = fps.max(1);
        self
    }

    pub fn with_ffmpeg_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffmpeg = path.into();
        self
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_owned(),
            "-loglevel".to_owned(),
            "error".to_owned(),
            "-nostdin".to_owned(),
        ];
        match &self.input {
            FfmpegInput::Device(name) => {
                let format = if cfg!(target_os = "macos") {
                    "avfoundation"
                } else if cfg!(target_os = "windows") {
                    "dshow"
                } else {
                    "v4l2"
                };
                args.extend([
                    "-f".to_owned(),
                    format.to_owned(),
                    "-framerate".to_owned(),
                    self.fps.to_string(),
                    "-video_size".to_owned(),
                    format!("{}x{}", self.width, self.height),
                    "-i".to_owned(),
                    name.clone(),
                ]);
            }
            FfmpegInput::Video(path) => {
                args.extend([
                    "-re".to_owned(),
                    "-i".to_owned(),
                    path.display().to_string(),
                ]);
            }
        }
        args.extend([
            "-an".to_owned(),
            "-vf".to_owned(),
            format!("scale={}:{}:flags=neighbor", self.width, self.height),
            "-f".to_owned(),
            "rawvideo".to_owned(),
            "-pix_fmt".to_owned(),
            "rgba".to_owned(),
            "-".to_owned(),
        ]);
        args
    }

    fn precheck(&self) -> Result<()> {
        let device = self.input.label();
        let path = match &self.input {
            FfmpegInput::Video(path) => path.as_path(),
            FfmpegInput::Device(name) if name.starts_with("/dev/") => Path::new(name),
            FfmpegInput::Device(_) => return Ok(()),
        };
        match File::open(path) {
            Ok(_) => Ok(()),
            Err(error) => Err(io_acquire_error(&device, &error)),
        }
    }
}

impl CaptureProvider for FfmpegCapture {
    type Source = FfmpegSource;

    fn acquire(&mut self) -> Result<FfmpegSource> {
        self.precheck()?;
        let device = self.input.label();
        let stderr_log = tempfile::tempfile()?;
        let args = self.args();
        debug!("spawning {} {}", self.ffmpeg.display(), args.join(" "));

        let mut child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::from(stderr_log.try_clone()?))
            .spawn()
            .map_err(|error| {
                if error.kind() == ErrorKind::NotFound {
                    PipelineError::DeviceUnavailable {
                        device: device.clone(),
                        reason: format!("ffmpeg executable '{}' not found", self.ffmpeg.display()),
                    }
                } else {
                    PipelineError::DeviceUnavailable {
                        device: device.clone(),
                        reason: format!("failed to spawn ffmpeg: {error}"),
                    }
                }
            })?;

        let Some(stdout) = child.stdout.take() else {
            terminate(&mut child);
            return Err(PipelineError::capture("failed to capture ffmpeg stdout"));
        };

        let mut source = FfmpegSource {
            device,
            child,
            stdout,
            stderr_log,
            width: self.width,
            height: self.height,
            fps: self.fps,
            pending: None,
        };

        // A device that cannot deliver its first frame never counts as acquired.
        match source.read_native() {
            Ok(first) => {
                source.pending = Some(first);
                info!("acquired capture {}", source.describe());
                Ok(source)
            }
            Err(_) => {
                terminate(&mut source.child);
                let stderr = source.stderr_tail();
                Err(classify_ffmpeg_failure(&source.device, &stderr))
            }
        }
    }

    fn release(&mut self, source: FfmpegSource) {
        info!("released capture {}", source.device);
        drop(source);
    }
}

pub struct FfmpegSource {
    device: String,
    child: Child,
    stdout: ChildStdout,
    stderr_log: File,
    width: u32,
    height: u32,
    fps: u32,
    pending: Option<RgbaImage>,
}

impl FfmpegSource {
    fn read_native(&mut self) -> std::io::Result<RgbaImage> {
        let mut buffer = vec![0_u8; self.width as usize * self.height as usize * 4];
        self.stdout.read_exact(&mut buffer)?;
        RgbaImage::from_raw(self.width, self.height, buffer).ok_or_else(|| {
            std::io::Error::new(ErrorKind::InvalidData, "ffmpeg frame has the wrong size")
        })
    }

    fn stderr_tail(&mut self) -> String {
        let mut contents = String::new();
        if self.stderr_log.seek(SeekFrom::Start(0)).is_err()
            || self.stderr_log.read_to_string(&mut contents).is_err()
        {
            return String::new();
        }
        let start = contents.len().saturating_sub(STDERR_TAIL_BYTES);
        let start = (start..contents.len())
            .find(|index| contents.is_char_boundary(*index))
            .unwrap_or(contents.len());
        contents[start..].trim().to_owned()
    }
}

impl FrameSource for FfmpegSource {
    fn describe(&self) -> String {
        format!(
            "{} {}x{} @ {}fps",
            self.device, self.width, self.height, self.fps
        )
    }

    fn current_frame(&mut self, dims: GridDimensions) -> Result<RgbaFrame> {
        let native = match self.pending.take() {
            Some(frame) => frame,
            None => self.read_native().map_err(|error| {
                if error.kind() == ErrorKind::UnexpectedEof {
                    PipelineError::StreamEnded {
                        device: self.device.clone(),
                    }
                } else {
                    PipelineError::capture(format!("failed reading from ffmpeg: {error}"))
                }
            })?,
        };
        scale_to_grid(&native, dims)
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        terminate(&mut self.child);
    }
}

fn terminate(child: &mut Child) {
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// Maps ffmpeg's stderr for a failed open onto the acquisition error taxonomy.
pub fn classify_ffmpeg_failure(device: &str, stderr: &str) -> PipelineError {
    let lowered = stderr.to_ascii_lowercase();
    let device = device.to_owned();
    if lowered.contains("permission denied") || lowered.contains("not authorized") {
        return PipelineError::PermissionDenied { device };
    }
    if lowered.contains("device or resource busy") || lowered.contains("resource busy") {
        return PipelineError::DeviceBusy { device };
    }
    let reason = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("ffmpeg exited before delivering a frame")
        .to_owned();
    PipelineError::DeviceUnavailable { device, reason }
}

fn io_acquire_error(device: &str, error: &std::io::Error) -> PipelineError {
    let device = device.to_owned();
    match error.kind() {
        ErrorKind::PermissionDenied => PipelineError::PermissionDenied { device },
        // EBUSY
        _ if error.raw_os_error() == Some(16) => PipelineError::DeviceBusy { device },
        _ => PipelineError::DeviceUnavailable {
            device,
            reason: error.to_string(),
        },
    }
}

// ---------------------------------------------------------------------------
// Still image capture
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ImageCapture {
    path: PathBuf,
}

impl ImageCapture {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CaptureProvider for ImageCapture {
    type Source = ImageSource;

    fn acquire(&mut self) -> Result<ImageSource> {
        let device = self.path.display().to_string();
        let image = image::open(&self.path).map_err(|error| match error {
            image::ImageError::IoError(io) => io_acquire_error(&device, &io),
            other => PipelineError::DeviceUnavailable {
                device: device.clone(),
                reason: other.to_string(),
            },
        })?;
        let source = ImageSource {
            label: device,
            image: image.to_rgba8(),
        };
        info!("acquired capture {}", source.describe());
        Ok(source)
    }

    fn release(&mut self, source: ImageSource) {
        info!("released capture {}", source.label);
    }
}

pub struct ImageSource {
    label: String,
    image: RgbaImage,
}

impl FrameSource for ImageSource {
    fn describe(&self) -> String {
        format!(
            "{} {}x{} @ still",
            self.label,
            self.image.width(),
            self.image.height()
        )
    }

    fn current_frame(&mut self, dims: GridDimensions) -> Result<RgbaFrame> {
        scale_to_grid(&self.image, dims)
    }
}

// ---------------------------------------------------------------------------
// Synthetic test pattern
// ---------------------------------------------------------------------------

/// Deterministic moving gradient; frame N is always the same picture.
#[derive(Debug, Clone)]
pub struct SyntheticCapture {
    width: u32,
    height: u32,
}

impl SyntheticCapture {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }
}

impl Default for SyntheticCapture {
    fn default() -> Self {
        Self::new(320, 240)
    }
}

impl CaptureProvider for SyntheticCapture {
    type Source = SyntheticSource;

    fn acquire(&mut self) -> Result<SyntheticSource> {
        let source = SyntheticSource {
            width: self.width,
            height: self.height,
            frame_index: 0,
        };
        info!("acquired capture {}", source.describe());
        Ok(source)
    }

    fn release(&mut self, source: SyntheticSource) {
        info!(
            "released capture synthetic after {} frame(s)",
            source.frame_index
        );
    }
}

pub struct SyntheticSource {
    width: u32,
    height: u32,
    frame_index: u32,
}

impl SyntheticSource {
    pub fn render_native(&self) -> RgbaImage {
        let t = self.frame_index;
        RgbaImage::from_fn(self.width, self.height, |x, y| {
            let r = (x * 255 / self.width).wrapping_add(t.wrapping_mul(4)) & 0xFF;
            let g = y * 255 / self.height;
            let b = (x.wrapping_add(y).wrapping_add(t)).wrapping_mul(3) & 0xFF;
            image::Rgba([r as u8, g as u8, b as u8, 255])
        })
    }
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        format!(
            "synthetic {}x{} @ {}fps",
            self.width, self.height, DEFAULT_CAPTURE_FPS
        )
    }

    fn current_frame(&mut self, dims: GridDimensions) -> Result<RgbaFrame> {
        let native = self.render_native();
        self.frame_index = self.frame_index.wrapping_add(1);
        scale_to_grid(&native, dims)
    }
}

// ---------------------------------------------------------------------------
// Runtime selection
// ---------------------------------------------------------------------------

/// Provider chosen from a `CaptureSpec` at runtime.
#[derive(Debug, Clone)]
pub enum AnyCapture {
    Ffmpeg(FfmpegCapture),
    Image(ImageCapture),
    Synthetic(SyntheticCapture),
}

impl AnyCapture {
    pub fn from_spec(source: &CaptureSpec) -> Self {
        match source {
            CaptureSpec::Device { name } => {
                Self::Ffmpeg(FfmpegCapture::new(FfmpegInput::Device(name.clone())))
            }
            CaptureSpec::Video { path } => {
                Self::Ffmpeg(FfmpegCapture::new(FfmpegInput::Video(path.clone())))
            }
            CaptureSpec::Image { path } => Self::Image(ImageCapture::new(path.clone())),
            CaptureSpec::Synthetic => Self::Synthetic(SyntheticCapture::default()),
        }
    }
}

pub enum AnySource {
    Ffmpeg(FfmpegSource),
    Image(ImageSource),
    Synthetic(SyntheticSource),
}

impl FrameSource for AnySource {
    fn describe(&self) -> String {
        match self {
            Self::Ffmpeg(source) => source.describe(),
            Self::Image(source) => source.describe(),
            Self::Synthetic(source) => source.describe(),
        }
    }

    fn current_frame(&mut self, dims: GridDimensions) -> Result<RgbaFrame> {
        match self {
            Self::Ffmpeg(source) => source.current_frame(dims),
            Self::Image(source) => source.current_frame(dims),
            Self::Synthetic(source) => source.current_frame(dims),
        }
    }
}

impl CaptureProvider for AnyCapture {
    type Source = AnySource;

    fn acquire(&mut self) -> Result<AnySource> {
        match self {
            Self::Ffmpeg(provider) => provider.acquire().map(AnySource::Ffmpeg),
            Self::Image(provider) => provider.acquire().map(AnySource::Image),
            Self::Synthetic(provider) => provider.acquire().map(AnySource::Synthetic),
        }
    }

    fn release(&mut self, source: AnySource) {
        match (self, source) {
            (Self::Ffmpeg(provider), AnySource::Ffmpeg(source)) => provider.release(source),
            (Self::Image(provider), AnySource::Image(source)) => provider.release(source),
            (Self::Synthetic(provider), AnySource::Synthetic(source)) => {
                provider.release(source)
            }
            // Mismatched pairs cannot come out of `acquire`; dropping the
            // source is enough to shut it down.
            (_, _) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn source_strings_parse_by_prefix() {
        assert_eq!(
            CaptureSpec::parse("image:cat.png").expect("spec"),
            CaptureSpec::Image {
                path: PathBuf::from("cat.png")
            }
        );
        assert_eq!(
            CaptureSpec::parse("device:/dev/video2").expect("spec"),
            CaptureSpec::Device {
                name: "/dev/video2".to_owned()
            }
        );
        assert_eq!(
            CaptureSpec::parse("file: clip.mp4").expect("spec"),
            CaptureSpec::Video {
                path: PathBuf::from("clip.mp4")
            }
        );
        assert_eq!(
            CaptureSpec::parse("video:clip.mp4").expect("spec"),
            CaptureSpec::parse("file:clip.mp4").expect("spec")
        );
        assert_eq!(
            CaptureSpec::parse(" synthetic ").expect("spec"),
            CaptureSpec::Synthetic
        );
        assert!(CaptureSpec::parse("video:").is_err());
        assert!(CaptureSpec::parse("rtsp://cam").is_err());
    }

    #[test]
    fn ffmpeg_stderr_is_classified() {
        let denied = classify_ffmpeg_failure(
            "/dev/video0",
            "[video4linux2,v4l2 @ 0x5] Cannot open video device /dev/video0: Permission denied",
        );
        assert_eq!(denied.code(), "capture.permission_denied");

        let busy = classify_ffmpeg_failure(
            "/dev/video0",
            "[video4linux2,v4l2 @ 0x5] ioctl(VIDIOC_STREAMON): Device or resource busy",
        );
        assert_eq!(busy.code(), "capture.device_busy");

        let missing = classify_ffmpeg_failure("/dev/video9", "/dev/video9: No such file or directory\n");
        assert_eq!(missing.code(), "capture.device_unavailable");
        assert!(missing.to_string().contains("No such file"));
    }

    #[test]
    fn missing_video_file_is_unavailable_without_spawning() {
        let mut capture = FfmpegCapture::new(FfmpegInput::Video(PathBuf::from(
            "/definitely/not/here.mp4",
        )))
        .with_ffmpeg_path("/definitely/not/ffmpeg");
        let error = capture.acquire().err().expect("acquire should fail");
        assert_eq!(error.code(), "capture.device_unavailable");
    }

    #[test]
    fn missing_ffmpeg_binary_is_unavailable() {
        let mut capture = FfmpegCapture::new(FfmpegInput::Device("0".to_owned()))
            .with_ffmpeg_path("/definitely/not/ffmpeg");
        let error = capture.acquire().err().expect("acquire should fail");
        assert!(error.is_acquisition_failure());
        assert!(error.to_string().contains("not found"), "{error}");
    }

    #[test]
    fn synthetic_frames_are_scaled_to_grid_and_animate() {
        let mut capture = SyntheticCapture::new(64, 48);
        let mut source = capture.acquire().expect("synthetic acquire");
        let dims = GridDimensions { width: 13, height: 10 };
        let first = source.current_frame(dims).expect("frame");
        let second = source.current_frame(dims).expect("frame");
        assert_eq!((first.width(), first.height()), (13, 10));
        assert_ne!(first, second);
        capture.release(source);
    }

    #[test]
    fn nearest_scaling_picks_source_pixels_without_blending() {
        let image = RgbaImage::from_fn(4, 4, |x, _| {
            if x < 2 {
                image::Rgba([0, 0, 0, 255])
            } else {
                image::Rgba([255, 255, 255, 255])
            }
        });
        let frame = scale_to_grid(&image, GridDimensions { width: 2, height: 2 }).expect("scale");
        for px in frame.data().chunks_exact(4) {
            assert!(px[0] == 0 || px[0] == 255, "blended pixel {px:?}");
        }
    }

    #[test]
    fn image_capture_reads_png_and_reports_missing_file() {
        let dir = tempdir().expect("tempdir should create");
        let path = dir.path().join("still.png");
        RgbaImage::from_pixel(8, 6, image::Rgba([10, 20, 30, 255]))
            .save(&path)
            .expect("png should write");

        let mut capture = ImageCapture::new(&path);
        let mut source = capture.acquire().expect("image acquire");
        assert!(source.describe().contains("8x6"));
        let frame = source
            .current_frame(GridDimensions { width: 4, height: 3 })
            .expect("frame");
        assert_eq!(frame.pixel(3, 2), Some([10, 20, 30, 255]));

        let mut missing = ImageCapture::new(dir.path().join("nope.png"));
        let error = missing.acquire().err().expect("missing image should fail");
        assert_eq!(error.code(), "capture.device_unavailable");
    }
}
