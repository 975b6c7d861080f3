//! Frame loop for live recognition.
//!
//! Frames alternate between [`FramePhase::Process`], where faces are detected
//! on a downscaled copy and matched against the gallery, and
//! [`FramePhase::Skip`], where the last results are reused. Every frame is
//! annotated with the cached results and handed to the sink.

use anyhow::Result;
use facewatch_vision::overlay::{downscale, to_channel_order};
use facewatch_vision::{Annotator, EmbeddingProvider, FaceBox, FrameSink, FrameSource};
use image::RgbImage;
use log::{debug, info, warn};
use std::time::{Duration, Instant};

use crate::gallery::Gallery;
use crate::matcher::{self, MatchResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamSettings {
    pub tolerance: f32,
    /// Linear scale used for detection; boxes are mapped back by its inverse.
    pub downscale: f32,
    /// Detection runs on frames whose index is a multiple of this.
    pub decimation: u32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            tolerance: 0.6,
            downscale: 0.25,
            decimation: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Process,
    Skip,
}

impl FramePhase {
    pub fn for_frame(index: u64, decimation: u32) -> Self {
        if index % u64::from(decimation.max(1)) == 0 {
            FramePhase::Process
        } else {
            FramePhase::Skip
        }
    }
}

/// A face found on the downscaled frame and its match.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledFace {
    pub face: FaceBox,
    pub result: MatchResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndOfStream,
    Quit,
    /// A frame read failed mid-stream; handled like end of stream.
    DroppedRead,
    OutputFailed,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Frames presented, including the one on which quit was requested.
    pub frames: u64,
    pub processed: u64,
    pub elapsed: Duration,
    pub stop: StopReason,
}

/// Releases the source and closes the sink when the run ends, however it ends.
struct Session<'s> {
    source: &'s mut dyn FrameSource,
    sink: &'s mut dyn FrameSink,
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        self.source.release();
        self.sink.close();
    }
}

pub struct Recognizer<'a, P: EmbeddingProvider + ?Sized> {
    provider: &'a mut P,
    gallery: &'a Gallery,
    settings: StreamSettings,
    annotator: Annotator,
    cached: Vec<LabeledFace>,
}

impl<'a, P: EmbeddingProvider + ?Sized> Recognizer<'a, P> {
    /// Refuses an empty gallery, since nobody could ever be identified.
    pub fn new(
        provider: &'a mut P,
        gallery: &'a Gallery,
        settings: StreamSettings,
        annotator: Annotator,
    ) -> Result<Self> {
        if gallery.is_empty() {
            anyhow::bail!("Cannot proceed without known face encodings");
        }
        if !(settings.downscale > 0.0 && settings.downscale <= 1.0) {
            anyhow::bail!("downscale must be in (0, 1], got {}", settings.downscale);
        }
        Ok(Self {
            provider,
            gallery,
            settings,
            annotator,
            cached: Vec::new(),
        })
    }

    /// Results currently drawn on every frame.
    pub fn cached(&self) -> &[LabeledFace] {
        &self.cached
    }

    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<LabeledFace>> {
        let small = downscale(frame, self.settings.downscale);
        let small = to_channel_order(&small, self.provider.channel_order());

        let boxes = self.provider.detect_faces(&small)?;
        if boxes.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = self.provider.compute_embeddings(&small, &boxes)?;
        if embeddings.len() != boxes.len() {
            anyhow::bail!(
                "provider returned {} embeddings for {} faces",
                embeddings.len(),
                boxes.len()
            );
        }

        Ok(boxes
            .into_iter()
            .zip(embeddings)
            .map(|(face, embedding)| LabeledFace {
                face,
                result: matcher::identify(&embedding, self.gallery, self.settings.tolerance),
            })
            .collect())
    }

    /// Advance one frame: refresh the cache on process frames, then annotate `frame`.
    pub fn step(&mut self, index: u64, frame: &mut RgbImage) -> FramePhase {
        let phase = FramePhase::for_frame(index, self.settings.decimation);
        if phase == FramePhase::Process {
            self.cached = match self.detect(frame) {
                Ok(faces) => faces,
                Err(e) => {
                    warn!("Frame {}: {:#}", index, e);
                    Vec::new()
                }
            };
            debug!(
                "Frame {}: {}",
                index,
                self.cached
                    .iter()
                    .map(|f| f.result.label())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        let upscale = 1.0 / self.settings.downscale;
        for labeled in &self.cached {
            self.annotator
                .draw(frame, &labeled.face.scaled(upscale), labeled.result.label());
        }
        phase
    }

    /// Pump frames from `source` to `sink` until the stream ends or the sink asks to quit.
    ///
    /// The source is released and the sink closed exactly once, on every exit path.
    pub fn run(&mut self, source: &mut dyn FrameSource, sink: &mut dyn FrameSink) -> RunSummary {
        let start = Instant::now();
        let mut session = Session { source, sink };
        let mut frames = 0u64;
        let mut processed = 0u64;

        let stop = loop {
            let mut frame = match session.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    info!("End of stream reached.");
                    break StopReason::EndOfStream;
                }
                Err(e) => {
                    warn!("Dropped frame read: {:#}", e);
                    break StopReason::DroppedRead;
                }
            };

            if self.step(frames, &mut frame) == FramePhase::Process {
                processed += 1;
            }
            if let Err(e) = session.sink.present(&frame) {
                warn!("Could not present frame {}: {:#}", frames, e);
                break StopReason::OutputFailed;
            }
            frames += 1;

            if session.sink.quit_requested() {
                info!("Exiting...");
                break StopReason::Quit;
            }
        };
        drop(session);

        let elapsed = start.elapsed();
        info!(
            "Processed {} frames in {:.2} seconds.",
            frames,
            elapsed.as_secs_f64()
        );
        RunSummary {
            frames,
            processed,
            elapsed,
            stop,
        }
    }
}
