use anyhow::{Context, Result};
use image::RgbImage;
use ort::session::Session;
use std::path::PathBuf;

use crate::face::{self, Detection, Embedding, FaceBox, ENCODER_INPUT};

/// Byte order of the three channels in an `RgbImage` buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// Face detection and embedding extraction.
///
/// Images handed to a provider are already in [`EmbeddingProvider::channel_order`].
pub trait EmbeddingProvider {
    fn channel_order(&self) -> ChannelOrder {
        ChannelOrder::Rgb
    }

    /// Face boxes in the pixel space of `image`, most confident first.
    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<FaceBox>>;

    /// One embedding per box, in the same order.
    fn compute_embeddings(&mut self, image: &RgbImage, boxes: &[FaceBox])
        -> Result<Vec<Embedding>>;
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub detector_model: PathBuf,
    pub recognizer_model: PathBuf,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

/// YuNet detection + SFace embeddings on ONNX Runtime.
pub struct OnnxProvider {
    detector: Session,
    encoder: Session,
    score_threshold: f32,
    nms_threshold: f32,
    last_detections: Vec<Detection>,
}

impl OnnxProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self> {
        Ok(Self {
            detector: crate::model::detector_session(&settings.detector_model)?,
            encoder: crate::model::recog_session(&settings.recognizer_model)?,
            score_threshold: settings.score_threshold,
            nms_threshold: settings.nms_threshold,
            last_detections: Vec::new(),
        })
    }
}

impl EmbeddingProvider for OnnxProvider {
    fn channel_order(&self) -> ChannelOrder {
        ChannelOrder::Bgr
    }

    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<FaceBox>> {
        self.last_detections = face::detect_faces(
            &mut self.detector,
            image,
            self.score_threshold,
            self.nms_threshold,
        )
        .context("detecting faces")?;
        Ok(self.last_detections.iter().map(Detection::face_box).collect())
    }

    fn compute_embeddings(
        &mut self,
        image: &RgbImage,
        boxes: &[FaceBox],
    ) -> Result<Vec<Embedding>> {
        let mut embeddings = Vec::with_capacity(boxes.len());
        for face_box in boxes {
            // Landmarks are only known for boxes from the last detect call
            let known = self
                .last_detections
                .iter()
                .find(|d| d.face_box() == *face_box);
            let crop = match known {
                Some(detection) => face::align_face(image, &detection.landmarks, ENCODER_INPUT),
                None => face::crop_face(image, face_box, ENCODER_INPUT)?,
            };
            let embedding = face::encode_face(&mut self.encoder, &crop).context("encoding face")?;
            embeddings.push(embedding);
        }
        Ok(embeddings)
    }
}
