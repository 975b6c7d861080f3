mod common;

use anyhow::Result;
use common::{FakeSource, RecordingSink, ScriptedProvider};
use facewatch::gallery::Gallery;
use facewatch::matcher::MatchResult;
use facewatch::recognize::{FramePhase, Recognizer, StopReason, StreamSettings};
use facewatch::{Annotator, Embedding, EmbeddingProvider, FaceBox};
use image::{Rgb, RgbImage};

const RED: Rgb<u8> = Rgb([255, 0, 0]);
const GREY: Rgb<u8> = Rgb([40, 40, 40]);

fn known() -> Gallery {
    let mut g = Gallery::new();
    g.push("alice", Embedding::new(vec![1.0, 0.0])).unwrap();
    g.push("bob", Embedding::new(vec![0.0, 1.0])).unwrap();
    g
}

fn two_faces() -> ScriptedProvider {
    ScriptedProvider::new(vec![
        (FaceBox::new(2, 10, 8, 4), Embedding::new(vec![1.0, 0.05])),
        (FaceBox::new(10, 14, 14, 10), Embedding::new(vec![5.0, 5.0])),
    ])
}

#[test]
fn every_other_frame_is_processed() {
    env_logger::try_init().ok();
    let gallery = known();
    let mut provider = two_faces();
    let mut source = FakeSource::new(7);
    let releases = source.releases.clone();
    let mut sink = RecordingSink::default();

    let mut recognizer = Recognizer::new(
        &mut provider,
        &gallery,
        StreamSettings::default(),
        Annotator::without_text(),
    )
    .unwrap();
    let summary = recognizer.run(&mut source, &mut sink);
    drop(recognizer);

    assert_eq!(summary.stop, StopReason::EndOfStream);
    assert_eq!(summary.frames, 7);
    assert_eq!(summary.processed, 4);
    assert_eq!(provider.detect_calls, 4);
    assert_eq!(sink.frames.len(), 7);
    assert_eq!(releases.get(), 1);
    assert_eq!(sink.closes, 1);
}

#[test]
fn skip_frames_reuse_previous_results() {
    let gallery = known();
    let mut provider = two_faces();
    let mut recognizer = Recognizer::new(
        &mut provider,
        &gallery,
        StreamSettings::default(),
        Annotator::without_text(),
    )
    .unwrap();
    let mut frame = RgbImage::from_pixel(64, 64, GREY);

    assert_eq!(recognizer.step(0, &mut frame.clone()), FramePhase::Process);
    let first = recognizer.cached().to_vec();
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].face, FaceBox::new(2, 10, 8, 4));
    assert_eq!(first[0].result, MatchResult::Known("alice".to_string()));
    assert_eq!(first[1].result, MatchResult::Unknown);

    assert_eq!(recognizer.step(1, &mut frame), FramePhase::Skip);
    assert_eq!(recognizer.cached(), first.as_slice());
    // Skip frames are still annotated, at full-frame scale
    assert_eq!(frame.get_pixel(16, 8), &RED);
    assert_eq!(frame.get_pixel(39, 31), &RED);
    assert_eq!(frame.get_pixel(60, 2), &GREY);

    assert_eq!(recognizer.step(2, &mut frame.clone()), FramePhase::Process);
    assert_eq!(recognizer.cached()[0].face, FaceBox::new(3, 11, 9, 5));
}

#[test]
fn quit_signal_releases_source_once() {
    let gallery = known();
    let mut provider = two_faces();
    let mut source = FakeSource::new(100);
    let releases = source.releases.clone();
    let mut sink = RecordingSink {
        quit_after: Some(3),
        ..Default::default()
    };

    let mut recognizer = Recognizer::new(
        &mut provider,
        &gallery,
        StreamSettings::default(),
        Annotator::without_text(),
    )
    .unwrap();
    let summary = recognizer.run(&mut source, &mut sink);

    assert_eq!(summary.stop, StopReason::Quit);
    // The frame that triggered the quit was shown and is counted
    assert_eq!(summary.frames, 3);
    assert_eq!(sink.frames.len(), 3);
    assert_eq!(source.read, 3);
    assert_eq!(releases.get(), 1);
    assert_eq!(sink.closes, 1);
}

#[test]
fn failed_read_ends_the_stream() {
    let gallery = known();
    let mut provider = two_faces();
    let mut source = FakeSource::new(10);
    source.fail_at = Some(2);
    let releases = source.releases.clone();
    let mut sink = RecordingSink::default();

    let mut recognizer = Recognizer::new(
        &mut provider,
        &gallery,
        StreamSettings::default(),
        Annotator::without_text(),
    )
    .unwrap();
    let summary = recognizer.run(&mut source, &mut sink);

    assert_eq!(summary.stop, StopReason::DroppedRead);
    assert_eq!(summary.frames, 2);
    assert_eq!(releases.get(), 1);
}

#[test]
fn empty_gallery_is_refused() {
    let gallery = Gallery::new();
    let mut provider = two_faces();
    let result = Recognizer::new(
        &mut provider,
        &gallery,
        StreamSettings::default(),
        Annotator::without_text(),
    );
    assert!(result.is_err());
}

struct BrokenProvider;

impl EmbeddingProvider for BrokenProvider {
    fn detect_faces(&mut self, _image: &RgbImage) -> Result<Vec<FaceBox>> {
        anyhow::bail!("inference failed")
    }

    fn compute_embeddings(&mut self, _image: &RgbImage, _boxes: &[FaceBox]) -> Result<Vec<Embedding>> {
        Ok(Vec::new())
    }
}

#[test]
fn provider_errors_do_not_stop_the_loop() {
    let gallery = known();
    let mut provider = BrokenProvider;
    let mut source = FakeSource::new(4);
    let mut sink = RecordingSink::default();

    let mut recognizer = Recognizer::new(
        &mut provider,
        &gallery,
        StreamSettings::default(),
        Annotator::without_text(),
    )
    .unwrap();
    let summary = recognizer.run(&mut source, &mut sink);

    assert_eq!(summary.stop, StopReason::EndOfStream);
    assert_eq!(summary.frames, 4);
    assert!(recognizer.cached().is_empty());
    assert!(sink.frames.iter().all(|f| f.pixels().all(|p| *p == GREY)));
}
