//! Interval-gated run recorder.
//!
//! [`RunRecorder`] streams the run as JSON Lines: a header line describing
//! the run when the file is created, then one line per kept [`RunSample`],
//! at most one per `interval` of simulated time.  Each sample is flushed as
//! it is written, so the file holds everything up to the last policy tick
//! even if the process dies.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strider_input::LogOnce;
use strider_types::StriderError;
use tracing::{info, warn};

/// Default minimum spacing between samples, in seconds.
pub const DEFAULT_INTERVAL: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunHeader {
    pub profile: String,
    pub started_at: DateTime<Utc>,
    pub interval: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSample {
    /// Seconds of simulated time since the policy took over.
    pub t: f64,
    /// `[x_vel, y_vel, ang_vel]`
    pub command: [f64; 3],
    pub angular_velocity: [f64; 3],
    pub gravity: [f64; 3],
    pub joint_pos: Vec<f64>,
    pub joint_vel: Vec<f64>,
    pub action: Vec<f64>,
    pub target: Vec<f64>,
}

#[derive(Debug)]
pub struct RunRecorder {
    path: PathBuf,
    interval: f64,
    writer: BufWriter<File>,
    last_sample: Option<f64>,
    written: usize,
    write_failed: LogOnce,
}

impl RunRecorder {
    /// Create the file at `path` (and any missing parent directories) and
    /// write the header line.
    ///
    /// # Errors
    ///
    /// Returns [`StriderError::Config`] if the file cannot be created or the
    /// header cannot be written.
    pub fn create(path: impl Into<PathBuf>, profile: &str, interval: f64) -> Result<Self, StriderError> {
        let path = path.into();
        let io_err = |e: std::io::Error| StriderError::Config(format!("cannot write {}: {e}", path.display()));

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let file = File::create(&path).map_err(io_err)?;
        let header = RunHeader {
            profile: profile.to_string(),
            started_at: Utc::now(),
            interval,
        };

        let mut recorder = Self {
            writer: BufWriter::new(file),
            path: path.clone(),
            interval,
            last_sample: None,
            written: 0,
            write_failed: LogOnce::new(),
        };
        recorder.write_line(&header).map_err(io_err)?;
        info!(path = %path.display(), interval, "recording run");
        Ok(recorder)
    }

    /// `true` if a sample taken at time `t` would be kept.
    pub fn is_due(&self, t: f64) -> bool {
        self.last_sample.is_none_or(|last| t - last > self.interval)
    }

    /// Write `sample` if at least `interval` has passed since the last one.
    /// Returns `true` if it was written.  Write failures are logged once and
    /// never interrupt the run.
    pub fn record(&mut self, sample: RunSample) -> bool {
        if !self.is_due(sample.t) {
            return false;
        }
        self.last_sample = Some(sample.t);
        match self.write_line(&sample) {
            Ok(()) => {
                self.written += 1;
                true
            }
            Err(e) => {
                if self.write_failed.first() {
                    warn!(path = %self.path.display(), error = %e, "run sample not written");
                }
                false
            }
        }
    }

    /// Samples written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush the file.  Returns the number of samples written.
    ///
    /// # Errors
    ///
    /// Returns [`StriderError::Config`] if the final flush fails.
    pub fn finish(&mut self) -> Result<usize, StriderError> {
        self.writer
            .flush()
            .map_err(|e| StriderError::Config(format!("cannot write {}: {e}", self.path.display())))?;
        info!(path = %self.path.display(), samples = self.written, "run recording written");
        Ok(self.written)
    }

    fn write_line<T: Serialize>(&mut self, value: &T) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.writer, value)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}
