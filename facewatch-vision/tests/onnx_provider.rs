use anyhow::Result;
use facewatch_vision::overlay::to_channel_order;
use facewatch_vision::{EmbeddingProvider, FaceBox, OnnxProvider, ProviderSettings};
use image::{Rgb, RgbImage};
use std::path::PathBuf;

fn settings() -> Option<ProviderSettings> {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../models");
    let settings = ProviderSettings {
        detector_model: dir.join("face_detection_yunet_2023mar.onnx"),
        recognizer_model: dir.join("face_recognition_sface_2021dec.onnx"),
        score_threshold: 0.6,
        nms_threshold: 0.3,
    };
    if settings.detector_model.is_file() && settings.recognizer_model.is_file() {
        Some(settings)
    } else {
        eprintln!("Skipping: models not found in {}", dir.display());
        None
    }
}

#[test]
fn blank_frame_has_no_faces() -> Result<()> {
    env_logger::try_init().ok();
    let Some(settings) = settings() else {
        return Ok(());
    };
    let mut provider = OnnxProvider::new(&settings)?;

    let frame = RgbImage::from_pixel(320, 240, Rgb([128, 128, 128]));
    let frame = to_channel_order(&frame, provider.channel_order());
    assert!(provider.detect_faces(&frame)?.is_empty());
    Ok(())
}

#[test]
fn unknown_box_is_cropped_and_normalised() -> Result<()> {
    let Some(settings) = settings() else {
        return Ok(());
    };
    let mut provider = OnnxProvider::new(&settings)?;

    let frame = RgbImage::from_fn(160, 120, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 90]));
    let embeddings = provider.compute_embeddings(&frame, &[FaceBox::new(10, 90, 100, 20)])?;
    assert_eq!(embeddings.len(), 1);

    let norm: f32 = embeddings[0].vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-3);
    Ok(())
}
