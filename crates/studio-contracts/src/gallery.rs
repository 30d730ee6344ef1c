use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::payload::ImageData;

/// Images generated during one session, oldest first.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    images: Vec<ImageData>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, image: ImageData) -> usize {
        self.images.push(image);
        self.images.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&ImageData> {
        self.images.get(index)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageData> {
        self.images.iter()
    }

    /// Writes image `index` into `dir` under its download name.
    pub fn save(&self, index: usize, dir: &Path, millis: i64) -> Result<PathBuf> {
        let image = self
            .images
            .get(index)
            .with_context(|| format!("no generated image at index {index}"))?;
        let bytes = image.decode()?;
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let path = dir.join(image.download_file_name(millis));
        std::fs::write(&path, bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}
