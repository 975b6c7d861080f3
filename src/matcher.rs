use crate::{gallery::Gallery, Embedding};

/// Label shown for faces without a confident match.
pub const UNKNOWN_LABEL: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    Known(String),
    Unknown,
}

impl MatchResult {
    pub fn label(&self) -> &str {
        match self {
            MatchResult::Known(name) => name,
            MatchResult::Unknown => UNKNOWN_LABEL,
        }
    }
}

/// Index and distance of the closest gallery entry. Ties go to the earlier entry.
pub fn nearest(query: &Embedding, gallery: &Gallery) -> Option<(usize, f32)> {
    facewatch_vision::face::face_distance(gallery.embeddings(), query)
        .into_iter()
        .enumerate()
        .fold(None, |best, (i, d)| match best {
            Some((_, best_d)) if !(d < best_d) => best,
            _ if d.is_nan() => best,
            _ => Some((i, d)),
        })
}

/// Nearest neighbour gated by `tolerance`: a match needs distance <= tolerance.
pub fn identify(query: &Embedding, gallery: &Gallery, tolerance: f32) -> MatchResult {
    match nearest(query, gallery) {
        Some((i, d)) if d <= tolerance => MatchResult::Known(gallery.entries()[i].name.clone()),
        _ => MatchResult::Unknown,
    }
}
