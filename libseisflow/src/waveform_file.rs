use hdf5::File;
use std::path::{Path, PathBuf};

use super::constants::{NAME_SEPARATOR, SAMPLING_RATE_ATTR, STARTTIME_ATTR, WAVEFORMS_GROUP};
use super::error::WaveformFileError;
use super::sample::Sample;
use super::timestamp::Timestamp;
use super::trace::{station_of, Stream, Trace};

/// Read access to one HDF5 waveform data file.
///
/// Layout:
/// ```text
/// Waveforms
/// |---- NET.STA
/// |    |---- NET.STA.LOC.CHA__<tag>(dset) - starttime, sampling_rate
/// ```
#[derive(Debug)]
pub struct WaveformFile {
    handle: File,
    path: PathBuf,
}

impl WaveformFile {
    pub fn open(path: &Path) -> Result<Self, WaveformFileError> {
        if !path.exists() {
            return Err(WaveformFileError::BadFilePath(path.to_path_buf()));
        }
        Ok(Self {
            handle: File::open(path)?,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All channel ids stored in the file, sorted
    pub fn channel_ids(&self) -> Result<Vec<String>, WaveformFileError> {
        let waveforms = self.handle.group(WAVEFORMS_GROUP)?;
        let mut ids = Vec::new();
        for station in waveforms.member_names()? {
            let station_group = waveforms.group(&station)?;
            for name in station_group.member_names()? {
                let id = name.split(NAME_SEPARATOR).next().unwrap_or(&name);
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Read the full trace of one channel, converting samples to `T`
    pub fn read_channel<T: Sample>(&self, channel_id: &str) -> Result<Trace<T>, WaveformFileError> {
        let station = station_of(channel_id);
        let station_group = self
            .handle
            .group(WAVEFORMS_GROUP)?
            .group(station)
            .map_err(|_| WaveformFileError::MissingChannel(channel_id.to_string(), self.path.clone()))?;

        let prefix = format!("{channel_id}{NAME_SEPARATOR}");
        let names: Vec<String> = station_group
            .member_names()?
            .into_iter()
            .filter(|n| n.starts_with(&prefix) || n == channel_id)
            .collect();
        let name = match names.as_slice() {
            [] => {
                return Err(WaveformFileError::MissingChannel(
                    channel_id.to_string(),
                    self.path.clone(),
                ))
            }
            [name] => name,
            _ => {
                return Err(WaveformFileError::AmbiguousChannel(
                    channel_id.to_string(),
                    names.len(),
                ))
            }
        };

        let dataset = station_group.dataset(name)?;
        let start_ns = dataset.attr(STARTTIME_ATTR)?.read_scalar::<i64>()?;
        let sampling_rate_hz = dataset.attr(SAMPLING_RATE_ATTR)?.read_scalar::<f64>()?;
        let data = dataset.read_raw::<T>()?;

        Ok(Trace::new(
            channel_id,
            Timestamp::from_nanos(start_ns),
            sampling_rate_hz,
            data,
        ))
    }

    /// Read every channel in the file
    pub fn read_all<T: Sample>(&self) -> Result<Stream<T>, WaveformFileError> {
        self.channel_ids()?
            .iter()
            .map(|id| self.read_channel(id))
            .collect()
    }
}
