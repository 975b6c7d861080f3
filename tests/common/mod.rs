#![allow(dead_code)]

use anyhow::Result;
use facewatch::{Embedding, EmbeddingProvider, FaceBox, FrameSink, FrameSource};
use image::{Rgb, RgbImage};
use std::cell::Cell;
use std::rc::Rc;

/// Provider that reads faces out of the top-left pixel of the image.
///
/// Red is the number of faces; green seeds the embedding. Face `i` gets the
/// embedding `[green, i]` and a 2px box at `(i * 4, i * 4)`.
#[derive(Default)]
pub struct PixelProvider {
    pub detect_calls: usize,
}

pub fn face_image(faces: u8, seed: u8) -> RgbImage {
    RgbImage::from_pixel(8, 8, Rgb([faces, seed, 0]))
}

impl EmbeddingProvider for PixelProvider {
    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<FaceBox>> {
        self.detect_calls += 1;
        let faces = image.get_pixel(0, 0)[0] as i32;
        Ok((0..faces)
            .map(|i| FaceBox::new(i * 4, i * 4 + 2, i * 4 + 2, i * 4))
            .collect())
    }

    fn compute_embeddings(&mut self, image: &RgbImage, boxes: &[FaceBox]) -> Result<Vec<Embedding>> {
        let seed = image.get_pixel(0, 0)[1] as f32;
        Ok(boxes
            .iter()
            .map(|b| Embedding::new(vec![seed, (b.top / 4) as f32]))
            .collect())
    }
}

/// Provider that reports the same faces on every call, shifting them by one
/// pixel per call so reused results can be told apart from fresh ones.
pub struct ScriptedProvider {
    pub faces: Vec<(FaceBox, Embedding)>,
    pub detect_calls: usize,
}

impl ScriptedProvider {
    pub fn new(faces: Vec<(FaceBox, Embedding)>) -> Self {
        Self {
            faces,
            detect_calls: 0,
        }
    }
}

impl EmbeddingProvider for ScriptedProvider {
    fn detect_faces(&mut self, _image: &RgbImage) -> Result<Vec<FaceBox>> {
        let shift = self.detect_calls as i32;
        self.detect_calls += 1;
        Ok(self
            .faces
            .iter()
            .map(|(b, _)| FaceBox::new(b.top + shift, b.right + shift, b.bottom + shift, b.left + shift))
            .collect())
    }

    fn compute_embeddings(&mut self, _image: &RgbImage, boxes: &[FaceBox]) -> Result<Vec<Embedding>> {
        Ok(self
            .faces
            .iter()
            .take(boxes.len())
            .map(|(_, e)| e.clone())
            .collect())
    }
}

/// Source yielding `total` solid grey frames, optionally failing at `fail_at`.
pub struct FakeSource {
    pub total: u64,
    pub fail_at: Option<u64>,
    pub read: u64,
    pub releases: Rc<Cell<u32>>,
}

impl FakeSource {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            fail_at: None,
            read: 0,
            releases: Rc::new(Cell::new(0)),
        }
    }
}

impl FrameSource for FakeSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if Some(self.read) == self.fail_at {
            anyhow::bail!("device unplugged");
        }
        if self.read >= self.total {
            return Ok(None);
        }
        self.read += 1;
        Ok(Some(RgbImage::from_pixel(64, 64, Rgb([40, 40, 40]))))
    }

    fn release(&mut self) {
        self.releases.set(self.releases.get() + 1);
    }
}

/// Sink keeping every presented frame, asking to quit after `quit_after` frames.
#[derive(Default)]
pub struct RecordingSink {
    pub frames: Vec<RgbImage>,
    pub quit_after: Option<usize>,
    pub closes: u32,
}

impl FrameSink for RecordingSink {
    fn present(&mut self, frame: &RgbImage) -> Result<()> {
        self.frames.push(frame.clone());
        Ok(())
    }

    fn quit_requested(&mut self) -> bool {
        self.quit_after.is_some_and(|n| self.frames.len() >= n)
    }

    fn close(&mut self) {
        self.closes += 1;
    }
}
