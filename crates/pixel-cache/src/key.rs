//! Fingerprinted keys for cached image variants.

use std::path::{Path, PathBuf};

/// Identifies one decoded variant of one source file.
///
/// Two keys are equal iff every field matches. The `revision` field is bumped
/// whenever the source file is edited, so every previously cached variant of
/// that source stops matching and ages out of the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariantKey {
    pub source: PathBuf,
    pub revision: i64,
    pub width: u32,
    pub height: u32,
    pub orientation: Option<i32>,
}

impl VariantKey {
    /// Key for the natural-size, unrotated variant at revision `revision`.
    pub fn new(source: impl Into<PathBuf>, revision: i64) -> Self {
        Self {
            source: source.into(),
            revision,
            width: 0,
            height: 0,
            orientation: None,
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_orientation(mut self, orientation: Option<i32>) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}
