use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use ndarray::Array2;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use super::constants::{CACHE_FILE_EXTENSION, NAME_SEPARATOR};
use super::data_file::DataFileDescriptor;
use super::error::CacheError;
use super::indexer::{index_interval_ns, index_trace, EnvelopeIndex};
use super::sample::{Sample, SampleType};
use super::timestamp::Timestamp;
use super::waveform_file::WaveformFile;

const CACHE_MAGIC: &[u8; 8] = b"SFINDEX\0";
const CACHE_VERSION: u16 = 1;
const DIGEST_SIZE: usize = 32;

/// Envelope indices of every channel of one data file.
///
/// `data` has one row per channel (same order as `channels`, which is sorted)
/// holding interleaved `min, max` pairs, one pair per index bin.
#[derive(Debug, Clone, PartialEq)]
pub struct FileIndex<T: Sample> {
    pub start_time: Timestamp,
    pub index_sampling_rate_hz: u32,
    pub data_sampling_rate_hz: f64,
    pub channels: Vec<String>,
    pub data: Array2<T>,
}

impl<T: Sample> FileIndex<T> {
    pub fn n_bins(&self) -> usize {
        self.data.ncols() / 2
    }

    pub fn dt_ns(&self) -> Result<i64, CacheError> {
        Ok(index_interval_ns(self.index_sampling_rate_hz)?)
    }

    /// Start of the last bin
    pub fn end_time(&self) -> Result<Timestamp, CacheError> {
        let n = self.n_bins().max(1) as i64 - 1;
        Ok(self.start_time.offset_nanos(n * self.dt_ns()?))
    }
}

/// What the cache remembers about the source file it was built from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceIdentity {
    pub mtime_ns: i64,
    pub size: u64,
    pub content_hash: String,
}

/// Persists one [`FileIndex`] per source data file and rebuilds stale ones.
///
/// A cache is reused only if the recorded size, index rate and sample type
/// still match. If only the mtime differs, the SHA-256 of the source recorded at
/// build time is compared against the file and the cache is kept (with the new
/// mtime) when the contents are unchanged. Anything else (including a damaged
/// cache file) deletes it and recomputes from the source file. Caches are written to a temporary file
/// and renamed into place, and carry a SHA-256 trailer over their payload.
#[derive(Debug)]
pub struct CacheStore {
    folder: PathBuf,
    index_sampling_rate_hz: u32,
    rebuild_count: usize,
}

impl CacheStore {
    /// Create the store, creating the cache folder if needed
    pub fn new(folder: &Path, index_sampling_rate_hz: u32) -> Result<Self, CacheError> {
        index_interval_ns(index_sampling_rate_hz)?;
        std::fs::create_dir_all(folder)?;
        Ok(Self {
            folder: folder.to_path_buf(),
            index_sampling_rate_hz,
            rebuild_count: 0,
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn index_sampling_rate_hz(&self) -> u32 {
        self.index_sampling_rate_hz
    }

    /// Number of indices computed from source files by this store
    pub fn rebuild_count(&self) -> usize {
        self.rebuild_count
    }

    /// Cache location for a data file: `<stem>__<sha256 of absolute path>.idx`
    pub fn cache_path(&self, data_file: &Path) -> PathBuf {
        let absolute = data_file
            .canonicalize()
            .unwrap_or_else(|_| data_file.to_path_buf());
        let path_hash = Sha256::digest(absolute.to_string_lossy().as_bytes());
        let stem = data_file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        self.folder.join(format!(
            "{stem}{NAME_SEPARATOR}{path_hash:x}.{CACHE_FILE_EXTENSION}"
        ))
    }

    /// Load the persisted index of a file, rebuilding it if missing or stale
    pub fn get_or_build<T: Sample>(
        &mut self,
        file: &DataFileDescriptor,
    ) -> Result<FileIndex<T>, CacheError> {
        let cache_file = self.cache_path(&file.path);
        if cache_file.exists() {
            match self.load::<T>(&cache_file, file) {
                Ok(index) => return Ok(index),
                Err(e) => {
                    spdlog::warn!(
                        "Cache file {} is not usable: {e}. Will recompute cache file.",
                        cache_file.to_string_lossy()
                    );
                    std::fs::remove_file(&cache_file)?;
                }
            }
        }
        self.build(file, &cache_file)
    }

    fn load<T: Sample>(
        &self,
        cache_file: &Path,
        file: &DataFileDescriptor,
    ) -> Result<FileIndex<T>, CacheError> {
        let bytes = std::fs::read(cache_file)?;
        let (index, source) = decode::<T>(&bytes)?;
        if index.index_sampling_rate_hz != self.index_sampling_rate_hz {
            return Err(CacheError::Stale(format!(
                "index sampling rate is {} instead of {}",
                index.index_sampling_rate_hz, self.index_sampling_rate_hz
            )));
        }
        if source.size != file.size {
            return Err(CacheError::Stale(String::from("size changed")));
        }
        if source.mtime_ns != file.mtime_ns {
            // Only the mtime moved (copy, touch): the recorded hash decides
            if file.content_hash()? != source.content_hash {
                return Err(CacheError::Stale(String::from("content changed")));
            }
            spdlog::info!(
                "Contents of {} are unchanged, keeping its cache.",
                file.path.to_string_lossy()
            );
            let source = SourceIdentity {
                mtime_ns: file.mtime_ns,
                ..source
            };
            persist(cache_file, &encode(&index, &source)?)?;
        }
        Ok(index)
    }

    fn build<T: Sample>(
        &mut self,
        file: &DataFileDescriptor,
        cache_file: &Path,
    ) -> Result<FileIndex<T>, CacheError> {
        spdlog::info!(
            "Indexing {} [{}]...",
            file.path.to_string_lossy(),
            human_bytes::human_bytes(file.size as f64)
        );
        let content_hash = file.content_hash()?;
        let traces = WaveformFile::open(&file.path)?.read_all::<T>()?;
        if traces.is_empty() {
            return Err(CacheError::EmptyFile(file.path.clone()));
        }

        let mut envelopes: Vec<(String, EnvelopeIndex<T>)> = Vec::with_capacity(traces.len());
        for trace in traces.iter() {
            let envelope = index_trace(
                &trace.data,
                trace.start_time,
                trace.sampling_rate_hz,
                self.index_sampling_rate_hz,
            )?;
            envelopes.push((trace.channel_id.clone(), envelope));
        }
        envelopes.sort_by(|a, b| a.0.cmp(&b.0));

        // Merging downstream assumes every channel of a file shares one time axis
        let reference = &envelopes[0].1;
        for (channel, envelope) in envelopes.iter().skip(1) {
            if envelope.start_time != reference.start_time
                || envelope.data_sampling_rate_hz != reference.data_sampling_rate_hz
                || envelope.index_sampling_rate_hz != reference.index_sampling_rate_hz
                || envelope.len() != reference.len()
            {
                return Err(CacheError::InconsistentChannels(
                    file.path.clone(),
                    channel.clone(),
                ));
            }
        }

        let n_bins = reference.len();
        let mut data = Array2::<T>::default((envelopes.len(), 2 * n_bins));
        for (row, (_, envelope)) in envelopes.iter().enumerate() {
            for bin in 0..n_bins {
                data[[row, 2 * bin]] = envelope.min_values[bin];
                data[[row, 2 * bin + 1]] = envelope.max_values[bin];
            }
        }

        let index = FileIndex {
            start_time: reference.start_time,
            index_sampling_rate_hz: reference.index_sampling_rate_hz,
            data_sampling_rate_hz: reference.data_sampling_rate_hz,
            channels: envelopes.into_iter().map(|(id, _)| id).collect(),
            data,
        };
        let source = SourceIdentity {
            mtime_ns: file.mtime_ns,
            size: file.size,
            content_hash,
        };
        persist(cache_file, &encode(&index, &source)?)?;
        self.rebuild_count += 1;
        Ok(index)
    }
}

/// Write to a sibling temp file, sync, then rename over the target
fn persist(cache_file: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let tmp_file = cache_file.with_extension(format!(
        "{CACHE_FILE_EXTENSION}.tmp{}",
        std::process::id()
    ));
    {
        let mut handle = File::create(&tmp_file)?;
        handle.write_all(bytes)?;
        handle.sync_all()?;
    }
    std::fs::rename(&tmp_file, cache_file)?;
    Ok(())
}

fn write_string(buffer: &mut Vec<u8>, s: &str) -> Result<(), CacheError> {
    let len = u16::try_from(s.len())
        .map_err(|_| CacheError::Corrupt(format!("string of {} bytes is too long", s.len())))?;
    buffer.write_u16::<LittleEndian>(len)?;
    buffer.write_all(s.as_bytes())?;
    Ok(())
}

fn read_string(cursor: &mut Cursor<&[u8]>) -> Result<String, CacheError> {
    let len = cursor.read_u16::<LittleEndian>()? as usize;
    let mut bytes = vec![0u8; len];
    cursor.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|_| CacheError::Corrupt(String::from("invalid string")))
}

/// Serialize an index plus its source identity, followed by a SHA-256 of everything before it
pub fn encode<T: Sample>(index: &FileIndex<T>, source: &SourceIdentity) -> Result<Vec<u8>, CacheError> {
    let mut buffer: Vec<u8> = Vec::with_capacity(128 + index.data.len() * std::mem::size_of::<T>());
    buffer.write_all(CACHE_MAGIC)?;
    buffer.write_u16::<LittleEndian>(CACHE_VERSION)?;
    buffer.write_u8(T::SAMPLE_TYPE.code())?;
    buffer.write_i64::<LittleEndian>(index.start_time.nanos())?;
    buffer.write_u32::<LittleEndian>(index.index_sampling_rate_hz)?;
    buffer.write_f64::<LittleEndian>(index.data_sampling_rate_hz)?;
    buffer.write_i64::<LittleEndian>(source.mtime_ns)?;
    buffer.write_u64::<LittleEndian>(source.size)?;
    write_string(&mut buffer, &source.content_hash)?;
    buffer.write_u32::<LittleEndian>(index.channels.len() as u32)?;
    for channel in index.channels.iter() {
        write_string(&mut buffer, channel)?;
    }
    buffer.write_u64::<LittleEndian>(index.n_bins() as u64)?;
    for value in index.data.iter() {
        value.write_le(&mut buffer)?;
    }
    let digest = Sha256::digest(&buffer);
    buffer.extend_from_slice(&digest);
    Ok(buffer)
}

/// Inverse of [`encode`]. Any damage (truncation, bit flips, wrong sample type) is an error.
pub fn decode<T: Sample>(bytes: &[u8]) -> Result<(FileIndex<T>, SourceIdentity), CacheError> {
    if bytes.len() < CACHE_MAGIC.len() + DIGEST_SIZE {
        return Err(CacheError::Corrupt(String::from("file too short")));
    }
    let (payload, digest) = bytes.split_at(bytes.len() - DIGEST_SIZE);
    if Sha256::digest(payload).as_slice() != digest {
        return Err(CacheError::Corrupt(String::from("checksum mismatch")));
    }

    let mut cursor = Cursor::new(payload);
    let mut magic = [0u8; 8];
    cursor.read_exact(&mut magic)?;
    if &magic != CACHE_MAGIC {
        return Err(CacheError::Corrupt(String::from("bad magic")));
    }
    let version = cursor.read_u16::<LittleEndian>()?;
    if version != CACHE_VERSION {
        return Err(CacheError::Stale(format!("cache version {version}")));
    }
    let sample_type = SampleType::from_code(cursor.read_u8()?);
    if sample_type != Some(T::SAMPLE_TYPE) {
        return Err(CacheError::Stale(format!(
            "sample type {sample_type:?} instead of {:?}",
            T::SAMPLE_TYPE
        )));
    }

    let start_time = Timestamp::from_nanos(cursor.read_i64::<LittleEndian>()?);
    let index_sampling_rate_hz = cursor.read_u32::<LittleEndian>()?;
    let data_sampling_rate_hz = cursor.read_f64::<LittleEndian>()?;
    let mtime_ns = cursor.read_i64::<LittleEndian>()?;
    let size = cursor.read_u64::<LittleEndian>()?;
    let content_hash = read_string(&mut cursor)?;
    let n_channels = cursor.read_u32::<LittleEndian>()? as usize;
    let mut channels = Vec::with_capacity(n_channels);
    for _ in 0..n_channels {
        channels.push(read_string(&mut cursor)?);
    }
    let n_bins = cursor.read_u64::<LittleEndian>()? as usize;
    let n_values = n_channels * 2 * n_bins;
    if n_values * std::mem::size_of::<T>() != payload.len() - cursor.position() as usize {
        return Err(CacheError::Corrupt(String::from("unexpected data size")));
    }
    let mut values = Vec::with_capacity(n_values);
    for _ in 0..n_values {
        values.push(T::read_le(&mut cursor)?);
    }
    let data = Array2::from_shape_vec((n_channels, 2 * n_bins), values)
        .map_err(|e| CacheError::Corrupt(e.to_string()))?;

    Ok((
        FileIndex {
            start_time,
            index_sampling_rate_hz,
            data_sampling_rate_hz,
            channels,
            data,
        },
        SourceIdentity {
            mtime_ns,
            size,
            content_hash,
        },
    ))
}
