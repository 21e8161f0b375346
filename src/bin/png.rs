//! PNG frame sequences as a frame source: frame N of the sequence is
//! presented at `N / fps` seconds.

use std::path::PathBuf;

use gifmill::{Error, Frame, FrameSource, GifResult};
use imgref::ImgVec;

pub struct Lodecoder {
    frames: Vec<PathBuf>,
    fps: f64,
}

impl Lodecoder {
    /// Frames are sorted the way a human numbers files, so `frame9.png`
    /// comes before `frame10.png`.
    pub fn new(mut frames: Vec<PathBuf>, fps: f64) -> Self {
        frames.sort_by(|a, b| natord::compare(&a.to_string_lossy(), &b.to_string_lossy()));
        Self { frames, fps }
    }
}

impl FrameSource for Lodecoder {
    fn frame_at(&self, timestamp: f64) -> GifResult<Frame> {
        if self.frames.is_empty() || timestamp < 0.0 {
            return Err(Error::FrameSource(format!("no frame at {}s", timestamp)));
        }
        let nearest = (timestamp * self.fps).round() as usize;
        let path = &self.frames[nearest.min(self.frames.len() - 1)];
        let image = lodepng::decode32_file(path)
            .map_err(|e| Error::FrameSource(format!("can't load {}: {}", path.display(), e)))?;
        Ok(Frame::new(
            ImgVec::new(image.buffer, image.width, image.height),
            timestamp,
        ))
    }

    fn duration(&self) -> f64 {
        self.frames.len() as f64 / self.fps
    }
}
