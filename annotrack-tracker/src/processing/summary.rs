//! Per-frame trajectory table written alongside the video

use crate::error::Result;
use crate::models::FlowField;
use annotrack_core::{FrameIndex, Mask};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const SUMMARY_HEADER: &str = "frame_number,instance_name,cx,cy,motion_index,timestamp_sec";

/// Motion index written when no flow is available
pub const NO_MOTION: f64 = -1.0;

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub frame: FrameIndex,
    pub instance_name: String,
    pub cx: i64,
    pub cy: i64,
    pub motion_index: f64,
}

/// `<video path without extension>_tracked.csv`
pub fn summary_path_for(video_path: &Path) -> PathBuf {
    let mut path = video_path.with_extension("").into_os_string();
    path.push("_tracked.csv");
    PathBuf::from(path)
}

fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Accumulates rows for a run and writes them once. Dropping an unflushed
/// writer flushes it.
#[derive(Debug)]
pub struct SummaryWriter {
    path: PathBuf,
    fps: f64,
    rows: Vec<SummaryRow>,
    flushed: bool,
}

impl SummaryWriter {
    pub fn new(path: impl Into<PathBuf>, fps: f64) -> Self {
        Self {
            path: path.into(),
            fps,
            rows: Vec::new(),
            flushed: false,
        }
    }

    /// Add a row for an instance mask. Empty masks add nothing.
    pub fn record(&mut self, frame: FrameIndex, instance_name: &str, mask: &Mask, flow: Option<&FlowField>) -> bool {
        let Some((cx, cy)) = mask.centroid() else {
            debug!("No centroid for {} at frame {}", instance_name, frame);
            return false;
        };
        let motion_index = flow.and_then(|f| f.mean_magnitude(mask)).unwrap_or(NO_MOTION);
        self.rows.push(SummaryRow {
            frame,
            instance_name: instance_name.to_string(),
            cx,
            cy,
            motion_index,
        });
        true
    }

    pub fn rows(&self) -> &[SummaryRow] {
        &self.rows
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    /// Write the table. Later calls do nothing.
    pub fn flush(&mut self) -> Result<()> {
        if self.flushed {
            return Ok(());
        }
        self.flushed = true;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut out = BufWriter::new(fs::File::create(&self.path)?);
        writeln!(out, "{}", SUMMARY_HEADER)?;
        for row in &self.rows {
            writeln!(
                out,
                "{},{},{},{},{},{}",
                row.frame,
                escape_csv(&row.instance_name),
                row.cx,
                row.cy,
                row.motion_index,
                row.frame as f64 / self.fps
            )?;
        }
        out.flush()?;
        info!("Wrote {} tracking rows to {:?}", self.rows.len(), self.path);
        Ok(())
    }
}

impl Drop for SummaryWriter {
    fn drop(&mut self) {
        if !self.flushed {
            if let Err(e) = self.flush() {
                warn!("Failed to write tracking summary {:?}: {}", self.path, e);
            }
        }
    }
}
