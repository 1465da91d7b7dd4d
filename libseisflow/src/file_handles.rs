use fxhash::FxHashMap;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use super::error::WaveformFileError;
use super::waveform_file::WaveformFile;

/// Bounded pool of open waveform files, evicting the least recently used
#[derive(Debug)]
pub struct FileHandleCache {
    capacity: usize,
    handles: FxHashMap<PathBuf, WaveformFile>,
    usage: VecDeque<PathBuf>,
}

impl FileHandleCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            handles: FxHashMap::default(),
            usage: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.handles.contains_key(path)
    }

    /// Get an open handle, opening the file (and closing the oldest one) if needed
    pub fn get(&mut self, path: &Path) -> Result<&WaveformFile, WaveformFileError> {
        if self.handles.contains_key(path) {
            self.usage.retain(|p| p != path);
        } else {
            if self.handles.len() >= self.capacity {
                if let Some(oldest) = self.usage.pop_front() {
                    self.handles.remove(&oldest);
                }
            }
            self.handles
                .insert(path.to_path_buf(), WaveformFile::open(path)?);
        }
        self.usage.push_back(path.to_path_buf());
        self.handles
            .get(path)
            .ok_or(WaveformFileError::BadFilePath(path.to_path_buf()))
    }
}
