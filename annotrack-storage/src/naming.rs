//! File naming for per-frame label files and the folder annotation log

use annotrack_core::FrameIndex;
use std::path::{Path, PathBuf};

/// Suffix of the append-only annotation log inside a video folder.
pub const STORE_SUFFIX: &str = "_annotations.ndjson";

/// Frame number encoded in a label file name: the trailing `_<digits>` of
/// the stem, or a stem made only of digits.
pub fn frame_number_from_path(path: &Path) -> Option<FrameIndex> {
    let stem = path.file_stem()?.to_str()?;
    let digits = match stem.rsplit_once('_') {
        Some((_, tail)) => tail,
        None => stem,
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn folder_name(folder: &Path) -> String {
    folder
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "annotations".to_string())
}

/// `<folder>/<folder name>_<frame:09>.json`
pub fn frame_label_path(folder: &Path, frame: FrameIndex) -> PathBuf {
    folder.join(format!("{}_{:09}.json", folder_name(folder), frame))
}

/// `<folder>/<folder name>_annotations.ndjson`
pub fn store_path(folder: &Path) -> PathBuf {
    folder.join(format!("{}{}", folder_name(folder), STORE_SUFFIX))
}

/// Output folder of a video: the video path without its extension.
pub fn video_folder(video_path: &Path) -> PathBuf {
    video_path.with_extension("")
}

/// A manually edited frame has both its image and its label file on disk.
pub fn manual_edit_exists(label_path: &Path) -> bool {
    label_path.with_extension("png").exists() && label_path.with_extension("json").exists()
}
