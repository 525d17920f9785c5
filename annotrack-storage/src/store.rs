//! Frame-indexed annotation store backed by an append-only NDJSON log

use crate::merge::{merge_record, SaveRequest};
use crate::naming::store_path;
use annotrack_core::{AnnotationRecord, FrameIndex, Result};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Records keyed by frame. Every write appends the full merged record; on
/// open the log is replayed and the last line for a frame wins.
#[derive(Debug)]
pub struct AnnotationStore {
    path: PathBuf,
    records: BTreeMap<FrameIndex, AnnotationRecord>,
}

impl AnnotationStore {
    /// Store of a video output folder.
    pub fn open(folder: impl AsRef<Path>) -> Result<Self> {
        Self::open_file(store_path(folder.as_ref()))
    }

    /// Store at an explicit log path. A missing log is an empty store.
    pub fn open_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = replay(&path)?;
        debug!("Opened annotation store {:?} with {} frames", path, records.len());
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, frame: FrameIndex) -> Option<&AnnotationRecord> {
        self.records.get(&frame)
    }

    /// Merge `request` into the frame's record and persist the result.
    pub fn put(&mut self, frame: FrameIndex, request: &SaveRequest) -> Result<AnnotationRecord> {
        let payload = request.resolve_image_data();
        let record = merge_record(self.records.get(&frame), frame, request, payload);
        self.append(record.clone())?;
        Ok(record)
    }

    /// Persist `record` as the new state of its frame, without merging.
    pub fn append(&mut self, record: AnnotationRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let line = serde_json::to_string(&record)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", line)?;
        file.flush()?;
        self.records.insert(record.frame, record);
        Ok(())
    }

    pub fn frames(&self) -> Vec<FrameIndex> {
        self.records.keys().copied().collect()
    }

    /// Highest stored frame; the resume point of an interrupted run.
    pub fn last_frame(&self) -> Option<FrameIndex> {
        self.records.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &AnnotationRecord> {
        self.records.values()
    }

    /// Rewrite the log with one line per frame.
    pub fn compact(&mut self) -> Result<()> {
        let tmp = self.path.with_extension("ndjson.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            for record in self.records.values() {
                serde_json::to_writer(&mut writer, record)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)?;
        info!("Compacted annotation store {:?} to {} frames", self.path, self.records.len());
        Ok(())
    }
}

fn replay(path: &Path) -> Result<BTreeMap<FrameIndex, AnnotationRecord>> {
    let mut records = BTreeMap::new();
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(records),
        Err(e) => return Err(e.into()),
    };
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Skipping unreadable line {} of {:?}: {}", number + 1, path, e);
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<AnnotationRecord>(&line) {
            Ok(record) => {
                records.insert(record.frame, record);
            }
            Err(e) => warn!("Skipping corrupt record on line {} of {:?}: {}", number + 1, path, e),
        }
    }
    Ok(records)
}
