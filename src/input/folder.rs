//! 图片目录帧来源

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::FrameSource;
use crate::detection::Frame;
use crate::error::{AgentError, Result};

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

pub struct ImageFolderSource {
    name: String,
    files: Vec<PathBuf>,
    cursor: usize,
    sequence: u64,
}

impl ImageFolderSource {
    pub fn open(dir: &Path) -> Result<Self> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            })
            .collect();
        files.sort();
        if files.is_empty() {
            return Err(AgentError::config(format!(
                "no images found in {}",
                dir.display()
            )));
        }
        info!(dir = %dir.display(), images = files.len(), "image folder source opened");
        Ok(Self {
            name: dir.display().to_string(),
            files,
            cursor: 0,
            sequence: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageFolderSource {
    fn next_frame(&mut self) -> Option<Frame> {
        let path = &self.files[self.cursor % self.files.len()];
        self.cursor = (self.cursor + 1) % self.files.len();

        let img = match image::open(path) {
            Ok(img) => img.into_rgb8(),
            Err(e) => {
                warn!(path = %path.display(), "failed to read frame: {}", e);
                return None;
            }
        };
        let (width, height) = img.dimensions();
        let frame = Frame::new(img.into_raw(), width, height, self.sequence);
        self.sequence += 1;
        Some(frame)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
