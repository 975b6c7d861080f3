use anyhow::{Context, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};

/// Destination for annotated frames.
pub trait FrameSink {
    fn present(&mut self, frame: &RgbImage) -> Result<()>;

    /// Polled once per frame; `true` ends the session.
    fn quit_requested(&mut self) -> bool;

    /// Tear down any window or file handles. Safe to call more than once.
    fn close(&mut self) {}
}

/// On-screen window. `q`, `Escape` or closing the window quits.
#[cfg(feature = "window")]
pub struct WindowSink {
    title: String,
    window: Option<minifb::Window>,
    buffer: Vec<u32>,
}

#[cfg(feature = "window")]
impl WindowSink {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            window: None,
            buffer: Vec::new(),
        }
    }
}

#[cfg(feature = "window")]
impl FrameSink for WindowSink {
    fn present(&mut self, frame: &RgbImage) -> Result<()> {
        let (w, h) = (frame.width() as usize, frame.height() as usize);
        if self.window.is_none() {
            let window = minifb::Window::new(&self.title, w, h, minifb::WindowOptions::default())
                .context("opening display window")?;
            self.window = Some(window);
        }

        self.buffer.clear();
        self.buffer.extend(
            frame
                .pixels()
                .map(|p| (p[0] as u32) << 16 | (p[1] as u32) << 8 | p[2] as u32),
        );
        if let Some(window) = self.window.as_mut() {
            window
                .update_with_buffer(&self.buffer, w, h)
                .context("presenting frame")?;
        }
        Ok(())
    }

    fn quit_requested(&mut self) -> bool {
        use minifb::Key;
        match &self.window {
            Some(window) => {
                !window.is_open() || window.is_key_down(Key::Q) || window.is_key_down(Key::Escape)
            }
            None => false,
        }
    }

    fn close(&mut self) {
        if self.window.take().is_some() {
            log::debug!("display window closed");
        }
    }
}

/// Headless sink writing each frame as a numbered PNG.
pub struct DirectorySink {
    dir: PathBuf,
    written: u64,
}

impl DirectorySink {
    pub fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating output directory {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            written: 0,
        })
    }
}

impl FrameSink for DirectorySink {
    fn present(&mut self, frame: &RgbImage) -> Result<()> {
        let path = self.dir.join(format!("frame_{:06}.png", self.written));
        frame
            .save(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        self.written += 1;
        Ok(())
    }

    fn quit_requested(&mut self) -> bool {
        false
    }

    fn close(&mut self) {
        log::info!("Wrote {} frames to {}", self.written, self.dir.display());
    }
}
