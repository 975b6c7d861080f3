//! Builds a gallery from a labeled dataset directory:
//!
//! ```text
//! dataset/
//!     alice/
//!         1.jpg
//!         2.png
//!     bob/
//!         a.jpeg
//! ```
//!
//! Each subdirectory name is the label for the images directly inside it.

use anyhow::{Context, Result};
use facewatch_vision::overlay::to_channel_order;
use facewatch_vision::EmbeddingProvider;
use image::ImageReader;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

use crate::gallery::{self, Gallery};
use crate::Embedding;

pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Debug, Error)]
pub enum SkipReason {
    #[error("not an image file")]
    NotAnImage,
    #[error("no face found")]
    NoFace,
    #[error("{0:#}")]
    Failed(anyhow::Error),
}

#[derive(Debug)]
pub struct Skipped {
    pub path: PathBuf,
    pub reason: SkipReason,
}

#[derive(Debug, Default)]
pub struct EnrollReport {
    /// Images enrolled per person, in traversal order.
    pub per_person: Vec<(String, usize)>,
    pub skipped: Vec<Skipped>,
}

#[derive(Debug, Default)]
pub struct Enrollment {
    pub gallery: Gallery,
    pub report: EnrollReport,
}

impl Enrollment {
    /// Write the gallery to `output`. Nothing is written when no face was enrolled.
    pub fn save(&self, output: &Path) -> Result<()> {
        if self.gallery.is_empty() {
            anyhow::bail!(
                "No encodings were generated. Please check your dataset directory and images."
            );
        }
        info!("Saving encodings to {}...", output.display());
        gallery::save(&self.gallery, output).context("Failed to save gallery")?;
        info!("✓ {} encodings saved.", self.gallery.len());
        Ok(())
    }
}

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn sorted_children(dir: &Path) -> impl Iterator<Item = walkdir::DirEntry> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                None
            }
        })
}

pub struct GalleryBuilder<'p, P: EmbeddingProvider + ?Sized> {
    provider: &'p mut P,
}

impl<'p, P: EmbeddingProvider + ?Sized> GalleryBuilder<'p, P> {
    pub fn new(provider: &'p mut P) -> Self {
        Self { provider }
    }

    /// Walk `root` and embed the first face of every image.
    ///
    /// Per-image failures are recorded in the report and never stop the build.
    /// A missing root yields an empty gallery.
    pub fn build(&mut self, root: &Path) -> Enrollment {
        let mut enrollment = Enrollment::default();
        info!("Loading known faces from {}...", root.display());

        if !root.is_dir() {
            error!("Dataset directory '{}' not found.", root.display());
            return enrollment;
        }

        for person_dir in sorted_children(root).filter(|e| e.file_type().is_dir()) {
            let name = person_dir.file_name().to_string_lossy().into_owned();
            info!("Processing images for: {}", name);

            let mut enrolled = 0;
            for file in sorted_children(person_dir.path()) {
                let path = file.path();
                if !file.file_type().is_file() || !is_image_file(path) {
                    warn!("  Skipping non-image file: {}", path.display());
                    enrollment.report.skipped.push(Skipped {
                        path: path.to_path_buf(),
                        reason: SkipReason::NotAnImage,
                    });
                    continue;
                }

                let outcome = self.embed_first_face(path).and_then(|embedding| {
                    match embedding {
                        Some(embedding) => enrollment
                            .gallery
                            .push(&name, embedding)
                            .map(|_| true)
                            .map_err(anyhow::Error::from),
                        None => Ok(false),
                    }
                });

                let reason = match outcome {
                    Ok(true) => {
                        enrolled += 1;
                        continue;
                    }
                    Ok(false) => {
                        warn!("  No face found in {}", path.display());
                        SkipReason::NoFace
                    }
                    Err(e) => {
                        error!("  Error processing {}: {:#}", path.display(), e);
                        SkipReason::Failed(e)
                    }
                };
                enrollment.report.skipped.push(Skipped {
                    path: path.to_path_buf(),
                    reason,
                });
            }

            info!("  Processed {} images for {}.", enrolled, name);
            enrollment.report.per_person.push((name, enrolled));
        }

        info!(
            "Finished loading known faces. Found {} encodings.",
            enrollment.gallery.len()
        );
        enrollment
    }

    /// Embedding of the first detected face, or `None` when the image has no face.
    fn embed_first_face(&mut self, path: &Path) -> Result<Option<Embedding>> {
        let image = ImageReader::open(path)
            .with_context(|| format!("opening {}", path.display()))?
            .with_guessed_format()
            .context("reading image header")?
            .decode()
            .context("decoding image")?
            .to_rgb8();
        let image = to_channel_order(&image, self.provider.channel_order());

        let boxes = self.provider.detect_faces(&image)?;
        let Some(first) = boxes.first() else {
            return Ok(None);
        };
        if boxes.len() > 1 {
            debug!(
                "  {} faces in {}, enrolling the first",
                boxes.len(),
                path.display()
            );
        }

        let embedding = self
            .provider
            .compute_embeddings(&image, std::slice::from_ref(first))?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("provider returned no embedding"))?;
        Ok(Some(embedding))
    }
}
