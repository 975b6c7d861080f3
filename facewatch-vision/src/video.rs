use anyhow::{Context, Result};
use image::RgbImage;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

/// A stream of RGB frames.
pub trait FrameSource {
    /// Next frame, or `Ok(None)` once the stream has ended.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;

    /// Release the underlying device or process. Safe to call more than once.
    fn release(&mut self);
}

/// V4L2 capture device.
pub struct Camera {
    stream: Option<Stream<'static>>,
    width: u32,
    height: u32,
    fourcc: FourCC,
}

impl Camera {
    pub fn open(device: &str) -> Result<Self> {
        let dev = Device::with_path(device).with_context(|| format!("open camera {}", device))?;
        let mut fmt = dev.format().context("get format")?;
        // Prefer RGB, fallback to YUYV, else accept existing format
        let desired = Format::new(fmt.width, fmt.height, FourCC::new(b"RGB3"));
        fmt = dev.set_format(&desired).unwrap_or(fmt);
        if fmt.fourcc != FourCC::new(b"RGB3") {
            let yuyv = Format::new(fmt.width, fmt.height, FourCC::new(b"YUYV"));
            fmt = dev.set_format(&yuyv).unwrap_or(fmt);
        }
        if !is_supported_fourcc(fmt.fourcc) {
            anyhow::bail!(
                "camera {} only offers {:?}; RGB3, YUYV or GREY is required",
                device,
                fmt.fourcc
            );
        }
        let stream = Stream::with_buffers(&dev, Type::VideoCapture, 4).context("stream")?;
        log::info!(
            "camera {} streaming {}x{} {:?}",
            device,
            fmt.width,
            fmt.height,
            fmt.fourcc
        );
        Ok(Self {
            stream: Some(stream),
            width: fmt.width,
            height: fmt.height,
            fourcc: fmt.fourcc,
        })
    }
}

impl FrameSource for Camera {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };
        let (data, meta) = stream.next().context("capture frame")?;
        log::trace!("captured frame seq={} len={}", meta.sequence, data.len());

        let mut buf = match self.fourcc {
            f if f == FourCC::new(b"RGB3") => data.to_vec(),
            f if f == FourCC::new(b"YUYV") => yuyv_to_rgb(self.width, self.height, data)?,
            f if f == FourCC::new(b"GREY") => grey_to_rgb(self.width, self.height, data)?,
            other => anyhow::bail!("unsupported pixel format {:?}", other),
        };
        let expected = (self.width * self.height * 3) as usize;
        if buf.len() < expected {
            anyhow::bail!("buffer too small: got {}, expected {}", buf.len(), expected);
        }
        buf.truncate(expected);
        RgbImage::from_raw(self.width, self.height, buf)
            .map(Some)
            .ok_or_else(|| anyhow::anyhow!("failed to build image buffer"))
    }

    fn release(&mut self) {
        if self.stream.take().is_some() {
            log::debug!("camera released");
        }
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        self.release();
    }
}

fn is_supported_fourcc(fourcc: FourCC) -> bool {
    [b"RGB3", b"YUYV", b"GREY"]
        .into_iter()
        .any(|code| fourcc == FourCC::new(code))
}

fn yuyv_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = (width * height * 2) as usize;
    if data.len() < expected {
        anyhow::bail!("short YUYV buffer");
    }
    let mut out = Vec::with_capacity((width * height * 3) as usize);
    for chunk in data[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0] as f32, chunk[2] as f32] {
            out.push(clamp(y + 1.402 * v));
            out.push(clamp(y - 0.344136 * u - 0.714136 * v));
            out.push(clamp(y + 1.772 * u));
        }
    }
    Ok(out)
}

fn clamp(v: f32) -> u8 {
    v.clamp(0.0, 255.0) as u8
}

fn grey_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = (width * height) as usize;
    if data.len() < expected {
        anyhow::bail!("short GREY buffer");
    }
    Ok(data[..expected].iter().flat_map(|&y| [y, y, y]).collect())
}

/// Video file decoded by an `ffmpeg` child process into raw rgb24 frames.
pub struct VideoFile {
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    width: u32,
    height: u32,
}

impl VideoFile {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            anyhow::bail!("Video file not found at {}", path.display());
        }
        let (width, height) = probe_dimensions(path)?;

        let mut command = Command::new("ffmpeg");
        command
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(path.as_os_str())
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-");
        log::info!("decoding {} at {}x{}", path.display(), width, height);
        Self::spawn(command, width, height)
    }

    /// Read `width`x`height` rgb24 frames from the stdout of `command`.
    fn spawn(mut command: Command, width: u32, height: u32) -> Result<Self> {
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .context("spawning ffmpeg")?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("ffmpeg stdout not captured"))?;

        Ok(Self {
            child: Some(child),
            stdout: Some(stdout),
            width,
            height,
        })
    }

    /// Reap the decoder once its output is exhausted.
    fn finish(&mut self) -> Result<()> {
        self.stdout = None;
        match self.child.take() {
            Some(mut child) => check_exit(child.wait().context("waiting for ffmpeg")?),
            None => Ok(()),
        }
    }
}

fn check_exit(status: ExitStatus) -> Result<()> {
    if !status.success() {
        anyhow::bail!("ffmpeg exited with {}", status);
    }
    Ok(())
}

impl FrameSource for VideoFile {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };
        let mut buf = vec![0u8; (self.width * self.height * 3) as usize];
        match read_frame(stdout, &mut buf)? {
            0 => self.finish().map(|_| None),
            n if n < buf.len() => anyhow::bail!("short frame: {} of {} bytes", n, buf.len()),
            _ => Ok(RgbImage::from_raw(self.width, self.height, buf)),
        }
    }

    fn release(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            // ffmpeg may still be writing; stop it rather than drain the pipe
            let _ = child.kill();
            let _ = child.wait();
            log::debug!("video decoder released");
        }
    }
}

impl Drop for VideoFile {
    fn drop(&mut self) {
        self.release();
    }
}

/// Fill `buf` from `reader`, returning how many bytes were read before end of input.
fn read_frame<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("reading frame"),
        }
    }
    Ok(filled)
}

fn probe_dimensions(path: &Path) -> Result<(u32, u32)> {
    let output = Command::new("ffprobe")
        .arg("-v")
        .arg("error")
        .arg("-select_streams")
        .arg("v:0")
        .arg("-show_streams")
        .arg("-print_format")
        .arg("json")
        .arg(path.as_os_str())
        .output()
        .context("running ffprobe")?;
    if !output.status.success() {
        anyhow::bail!(
            "Could not open video file {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    parse_probe(&output.stdout)
        .with_context(|| format!("reading stream info of {}", path.display()))
}

/// Size of the first video stream as ffmpeg will emit it, after autorotation.
fn parse_probe(json: &[u8]) -> Result<(u32, u32)> {
    let v: serde_json::Value = serde_json::from_slice(json)?;
    let stream = &v["streams"][0];
    let (w, h) = match (stream["width"].as_u64(), stream["height"].as_u64()) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w as u32, h as u32),
        _ => anyhow::bail!("no video stream"),
    };
    if rotation(stream).rem_euclid(180) == 90 {
        Ok((h, w))
    } else {
        Ok((w, h))
    }
}

/// Rotation in degrees from display matrix side data, else the legacy `rotate` tag.
fn rotation(stream: &serde_json::Value) -> i64 {
    let side_data = stream["side_data_list"]
        .as_array()
        .into_iter()
        .flatten()
        .find_map(|d| d["rotation"].as_i64());
    side_data
        .or_else(|| stream["tags"]["rotate"].as_str()?.trim().parse().ok())
        .unwrap_or(0)
}
