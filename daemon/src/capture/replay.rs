use serde::Deserialize;
use shared::{HandLabel, Point};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use super::{CaptureError, FrameSource};

/// Raw detector output for one camera frame: the full MediaPipe pose
/// landmark list (33 points) and zero or more 21-point hands.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct RawFrame {
    #[serde(default)]
    pub pose: Option<Vec<Point>>,
    #[serde(default)]
    pub hands: Vec<RawHand>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RawHand {
    pub label: HandLabel,
    pub score: f64,
    pub landmarks: Vec<Point>,
}

/// Plays back a JSON-lines recording of detector output at a fixed frame
/// rate, looping at end of file.
pub struct ReplaySource {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    frame_interval: Duration,
    last_frame: Option<Instant>,
    line: String,
}

impl ReplaySource {
    pub fn new(path: impl AsRef<Path>, fps: u32) -> Self {
        let fps = fps.max(1);
        Self {
            path: path.as_ref().to_path_buf(),
            reader: None,
            frame_interval: Duration::from_secs(1) / fps,
            last_frame: None,
            line: String::new(),
        }
    }

    fn pace(&mut self) {
        if let Some(last) = self.last_frame {
            let elapsed = last.elapsed();
            if elapsed < self.frame_interval {
                thread::sleep(self.frame_interval - elapsed);
            }
        }
        self.last_frame = Some(Instant::now());
    }

    fn next_line(&mut self) -> Result<(), CaptureError> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| CaptureError::Read("recording not opened".to_string()))?;

        for rewound in [false, true] {
            self.line.clear();
            let n = reader
                .read_line(&mut self.line)
                .map_err(|e| CaptureError::Read(e.to_string()))?;
            if n > 0 {
                return Ok(());
            }
            if rewound {
                break;
            }
            reader
                .seek(SeekFrom::Start(0))
                .map_err(|e| CaptureError::Read(e.to_string()))?;
        }

        Err(CaptureError::Read(format!(
            "recording {} is empty",
            self.path.display()
        )))
    }
}

impl FrameSource for ReplaySource {
    type Frame = RawFrame;

    fn open(&mut self) -> Result<(), CaptureError> {
        let file = File::open(&self.path).map_err(|e| {
            CaptureError::SourceUnavailable(format!("{}: {}", self.path.display(), e))
        })?;
        self.reader = Some(BufReader::new(file));
        self.last_frame = None;
        tracing::info!(
            "Replaying {} at {:?} per frame",
            self.path.display(),
            self.frame_interval
        );
        Ok(())
    }

    fn read_frame(&mut self) -> Result<RawFrame, CaptureError> {
        self.pace();
        self.next_line()?;

        let line = self.line.trim();
        if line.is_empty() {
            return Ok(RawFrame::default());
        }
        serde_json::from_str(line).map_err(|e| CaptureError::Read(format!("bad frame: {}", e)))
    }
}
