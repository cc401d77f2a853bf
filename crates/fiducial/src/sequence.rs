//! Frames from a directory of still images.

use std::{
    fs,
    path::{Path, PathBuf},
};

use fiducial_core::{GrayImage, GrayImageView};
use fiducial_perception::{Frame, FrameSource, FrameSourceError};
use image::ImageReader;
use log::{info, warn};

const EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Convert an `image::GrayImage` into the lightweight core view type.
pub fn gray_view(img: &::image::GrayImage) -> GrayImageView<'_> {
    GrayImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw(),
    }
}

/// Decode any supported image file to 8-bit grayscale.
pub fn load_gray(path: &Path) -> Result<GrayImage, FrameSourceError> {
    let img = ImageReader::open(path)?
        .decode()
        .map_err(|e| FrameSourceError::Backend(Box::new(e)))?
        .to_luma8();
    Ok(GrayImage {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.into_raw(),
    })
}

/// Plays the PNG/JPEG files of a directory in lexical order, one per read.
///
/// Once exhausted, reads return `None` and [`FrameSource::is_exhausted`]
/// reports true, unless the source repeats.
#[derive(Debug, Clone)]
pub struct ImageSequenceSource {
    dir: PathBuf,
    repeat: bool,
    files: Vec<PathBuf>,
    cursor: usize,
    next_index: u64,
}

impl ImageSequenceSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            repeat: false,
            files: Vec::new(),
            cursor: 0,
            next_index: 1,
        }
    }

    /// Start over from the first file after the last one.
    pub fn with_repeat(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Files found by the last `open`.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
}

impl FrameSource for ImageSequenceSource {
    fn open(&mut self) -> Result<(), FrameSourceError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() && is_image(&path) {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(FrameSourceError::Empty(self.dir.display().to_string()));
        }
        files.sort();
        info!("{} image(s) in {}", files.len(), self.dir.display());

        self.files = files;
        self.cursor = 0;
        self.next_index = 1;
        Ok(())
    }

    fn read(&mut self) -> Option<Frame> {
        if self.cursor >= self.files.len() {
            if !self.repeat || self.files.is_empty() {
                return None;
            }
            self.cursor = 0;
        }
        let path = &self.files[self.cursor];
        self.cursor += 1;

        let index = self.next_index;
        self.next_index += 1;
        match load_gray(path) {
            Ok(image) => Some(Frame::new(index, image)),
            Err(e) => {
                warn!("skipping {}: {e}", path.display());
                None
            }
        }
    }

    fn release(&mut self) {
        self.files.clear();
        self.cursor = 0;
    }

    fn is_exhausted(&self) -> bool {
        self.cursor >= self.files.len() && (!self.repeat || self.files.is_empty())
    }

    fn name(&self) -> String {
        format!("image sequence {}", self.dir.display())
    }
}
