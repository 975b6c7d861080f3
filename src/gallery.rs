//! Named face embeddings and their on-disk form.
//!
//! The gallery file is a postcard blob holding two index-aligned lists,
//! `encodings` and `names`, behind a format version.

use crate::Embedding;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

const FORMAT_VERSION: u16 = 1;

#[derive(Debug, Error)]
pub enum GalleryError {
    #[error("gallery file {0} not found")]
    NotFound(PathBuf),
    #[error("gallery file {path} is unreadable: {reason}")]
    Unreadable { path: PathBuf, reason: String },
    #[error("embedding has {found} dimensions, gallery uses {expected}")]
    DimensionMismatch { expected: usize, found: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub name: String,
    pub embedding: Embedding,
}

/// Enrolled faces in enrollment order. Every embedding has the same length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &str, embedding: Embedding) -> Result<(), GalleryError> {
        if let Some(expected) = self.dimension() {
            if embedding.len() != expected {
                return Err(GalleryError::DimensionMismatch {
                    expected,
                    found: embedding.len(),
                });
            }
        }
        self.entries.push(GalleryEntry {
            name: name.to_string(),
            embedding,
        });
        Ok(())
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Embedding length, or `None` for an empty gallery.
    pub fn dimension(&self) -> Option<usize> {
        self.entries.first().map(|e| e.embedding.len())
    }

    pub fn embeddings(&self) -> impl Iterator<Item = &Embedding> {
        self.entries.iter().map(|e| &e.embedding)
    }

    /// Number of entries per name.
    pub fn counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry(entry.name.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

#[derive(Serialize, Deserialize)]
struct GalleryFile {
    version: u16,
    encodings: Vec<Vec<f32>>,
    names: Vec<String>,
}

pub fn save(gallery: &Gallery, path: &Path) -> Result<()> {
    let file = GalleryFile {
        version: FORMAT_VERSION,
        encodings: gallery.embeddings().map(Embedding::to_vec).collect(),
        names: gallery.entries.iter().map(|e| e.name.clone()).collect(),
    };
    let data = postcard::to_allocvec(&file)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    std::fs::write(path, data).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

pub fn load(path: &Path) -> Result<Gallery, GalleryError> {
    let unreadable = |reason: String| GalleryError::Unreadable {
        path: path.to_path_buf(),
        reason,
    };

    if !path.exists() {
        return Err(GalleryError::NotFound(path.to_path_buf()));
    }
    let data = std::fs::read(path).map_err(|e| unreadable(e.to_string()))?;
    let file: GalleryFile = postcard::from_bytes(&data).map_err(|e| unreadable(e.to_string()))?;

    if file.version != FORMAT_VERSION {
        return Err(unreadable(format!("unsupported version {}", file.version)));
    }
    if file.encodings.len() != file.names.len() {
        return Err(unreadable(format!(
            "{} encodings but {} names",
            file.encodings.len(),
            file.names.len()
        )));
    }

    let mut gallery = Gallery::new();
    for (values, name) in file.encodings.into_iter().zip(file.names) {
        gallery
            .push(&name, Embedding::new(values))
            .map_err(|e| unreadable(e.to_string()))?;
    }
    Ok(gallery)
}
