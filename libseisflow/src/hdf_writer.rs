use hdf5::types::VarLenUnicode;
use hdf5::{File, Group};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::constants::{NAME_SEPARATOR, SAMPLING_RATE_ATTR, STARTTIME_ATTR, WAVEFORMS_GROUP};
use super::error::WaveformFileError;
use super::sample::Sample;
use super::trace::Trace;

/// This is the version of the output format
const FORMAT_VERSION: &str = "1.0";

/// A simple struct which wraps around the hdf5-rust library.
///
/// Creates a waveform data file in the layout read by [`WaveformFile`](super::waveform_file::WaveformFile).
/// Used for simulated data and for test fixtures.
#[derive(Debug)]
pub struct WaveformWriter {
    file_handle: File,
    path: PathBuf,
    waveforms_group: Group,
    traces_written: u64,
}

impl WaveformWriter {
    /// Create the writer, opening a file at path and creating the waveform group
    pub fn new(path: &Path) -> Result<Self, WaveformFileError> {
        let file_handle = File::create(path)?;
        let writer_version = format!("{}:{}", env!("CARGO_PKG_NAME"), FORMAT_VERSION);

        let waveforms_group = file_handle.create_group(WAVEFORMS_GROUP)?;
        waveforms_group
            .new_attr::<VarLenUnicode>()
            .create("version")?
            .write_scalar(
                &VarLenUnicode::from_str(&writer_version)
                    .map_err(|_| WaveformFileError::BadAttribute(writer_version.clone()))?,
            )?;

        Ok(Self {
            file_handle,
            path: path.to_path_buf(),
            waveforms_group,
            traces_written: 0,
        })
    }

    /// Write one trace as `Waveforms/NET.STA/<channel>__<tag>`
    pub fn write_trace<T: Sample>(&mut self, trace: &Trace<T>, tag: &str) -> Result<(), WaveformFileError> {
        let station = trace.station();
        let station_group = match self.waveforms_group.group(station) {
            Ok(group) => group,
            Err(_) => self.waveforms_group.create_group(station)?,
        };
        let dataset = station_group
            .new_dataset_builder()
            .with_data(trace.data.as_slice())
            .create(format!("{}{NAME_SEPARATOR}{tag}", trace.channel_id).as_str())?;
        dataset
            .new_attr::<i64>()
            .create(STARTTIME_ATTR)?
            .write_scalar(&trace.start_time.nanos())?;
        dataset
            .new_attr::<f64>()
            .create(SAMPLING_RATE_ATTR)?
            .write_scalar(&trace.sampling_rate_hz)?;
        self.traces_written += 1;
        Ok(())
    }

    /// Flush and consume the writer
    pub fn close(self) -> Result<(), WaveformFileError> {
        self.file_handle.flush()?;
        spdlog::debug!(
            "{} traces written to {}.",
            self.traces_written,
            self.path.to_string_lossy()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::timestamp::Timestamp;
    use super::super::waveform_file::WaveformFile;
    use super::*;

    #[test]
    fn test_write_then_read_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("test.h5");
        let start = Timestamp::from_seconds(1_600_000_000.0);
        let a = Trace::new("XB.01.00.001", start, 1000.0, vec![1i32, -4, 9, 16]);
        let b = Trace::new("XB.02.00.001", start, 1000.0, vec![3i32, 2, 1, 0]);

        let mut writer = WaveformWriter::new(&path).unwrap();
        writer.write_trace(&a, "raw").unwrap();
        writer.write_trace(&b, "raw").unwrap();
        writer.close().unwrap();

        let file = WaveformFile::open(&path).unwrap();
        assert_eq!(file.channel_ids().unwrap(), vec!["XB.01.00.001", "XB.02.00.001"]);
        let read: Trace<i32> = file.read_channel("XB.01.00.001").unwrap();
        assert_eq!(read, a);
        // Converted on read
        let read_f: Trace<f64> = file.read_channel("XB.02.00.001").unwrap();
        assert_eq!(read_f.data, vec![3.0, 2.0, 1.0, 0.0]);
        assert!(file.read_channel::<i32>("XB.03.00.001").is_err());
    }
}
