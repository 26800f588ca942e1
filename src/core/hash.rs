use crate::config::{HashConfig, PipelineConfig};
use crate::core::tree;
use image::ImageReader;
use image_hasher::{HashAlg, Hasher, HasherConfig, ImageHash};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image decoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("Cannot scan topic {path}: {source}")]
    Scan {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed duplicate file {path}: {source}")]
    DuplicateFile {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Computes difference-hash fingerprints with a fixed grid size.
pub struct Fingerprinter {
    hasher: Hasher,
}

impl Fingerprinter {
    pub fn new(config: &HashConfig) -> Self {
        let hasher = HasherConfig::new()
            .hash_alg(HashAlg::Gradient)
            .hash_size(config.hash_size, config.hash_size)
            .to_hasher();
        Self { hasher }
    }

    pub fn fingerprint(&self, path: &Path) -> Result<ImageHash, HashError> {
        let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;
        Ok(self.hasher.hash_image(&img))
    }
}

/// Fingerprints of every readable image directly inside one topic directory,
/// ordered by file name.
#[derive(Debug, Clone)]
pub struct TopicIndex {
    pub topic: PathBuf,
    pub fingerprints: Vec<(String, ImageHash)>,
}

impl TopicIndex {
    /// Fails only when the directory itself cannot be listed. Files that are
    /// not images, or do not decode, are left out.
    pub fn build(
        topic: &Path,
        fingerprinter: &Fingerprinter,
        config: &PipelineConfig,
    ) -> Result<Self, HashError> {
        let names = tree::list_files(topic).map_err(|source| HashError::Scan {
            path: topic.display().to_string(),
            source,
        })?;

        let fingerprints = names
            .into_par_iter()
            .filter(|name| config.is_image_name(name))
            .filter_map(|name| match fingerprinter.fingerprint(&topic.join(&name)) {
                Ok(hash) => Some((name, hash)),
                Err(e) => {
                    log::debug!("Skipping {}/{}: {}", topic.display(), name, e);
                    None
                }
            })
            .collect();

        Ok(Self {
            topic: topic.to_path_buf(),
            fingerprints,
        })
    }

    pub fn image_count(&self) -> usize {
        self.fingerprints.len()
    }
}

#[cfg(test)]
pub(crate) mod test_images {
    use image::{ImageBuffer, Rgb};
    use std::path::Path;

    /// Row direction of a synthetic test pattern.
    #[derive(Debug, Clone, Copy)]
    pub enum Pattern {
        /// Every row brightens left to right.
        Rising,
        /// Every row darkens left to right.
        Falling,
        /// Top half rises, bottom half falls.
        RisingOverFalling,
        /// Top half falls, bottom half rises.
        FallingOverRising,
    }

    fn rises(pattern: Pattern, row: u32) -> bool {
        let top = row < 4;
        match pattern {
            Pattern::Rising => true,
            Pattern::Falling => false,
            Pattern::RisingOverFalling => top,
            Pattern::FallingOverRising => !top,
        }
    }

    /// Writes a 9x8 grid of `cell`-pixel blocks whose horizontal gradients
    /// follow `pattern`. Different cell sizes give resized copies of the same
    /// picture.
    pub fn write_pattern(path: &Path, pattern: Pattern, cell: u32) {
        let img = ImageBuffer::from_fn(9 * cell, 8 * cell, |x, y| {
            let col = (x / cell) as i32;
            let row = y / cell;
            let value = if rises(pattern, row) {
                32 + col * 24
            } else {
                224 - col * 24
            };
            let v = value as u8;
            Rgb([v, v, v])
        });
        img.save(path).unwrap();
    }
}
