use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use time::{Date, Month, PrimitiveDateTime, Time};

use super::constants::{DATA_FILE_EXTENSION, HASH_CHUNK_SIZE, NAME_SEPARATOR};
use super::error::DataFileError;
use super::timestamp::Timestamp;

/// Identity of one waveform data file on disk.
///
/// The covered time range comes from the file name alone, the file is not opened.
/// `mtime_ns` and `size` are sampled at scan time and decide whether a persisted
/// index is still valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFileDescriptor {
    pub path: PathBuf,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub mtime_ns: i64,
    pub size: u64,
}

impl DataFileDescriptor {
    /// Stat a file and parse its name. Fails if the name does not follow the convention.
    pub fn new(path: &Path) -> Result<Self, DataFileError> {
        if !path.exists() {
            return Err(DataFileError::BadFilePath(path.to_path_buf()));
        }
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let (start_time, end_time) = parse_file_name(&stem)?;
        let (mtime_ns, size) = file_stat(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            start_time,
            end_time,
            mtime_ns,
            size,
        })
    }

    pub fn duration(&self) -> f64 {
        self.end_time.seconds_since(self.start_time)
    }

    /// SHA-256 of the file contents as a hex string
    pub fn content_hash(&self) -> Result<String, DataFileError> {
        compute_sha256_hash_for_file(&self.path, None)
    }

    pub fn overlaps(&self, start: Timestamp, end: Timestamp) -> bool {
        self.start_time <= end && self.end_time > start
    }
}

/// Modification time (ns since epoch) and size of a file
pub fn file_stat(path: &Path) -> Result<(i64, u64), DataFileError> {
    let meta = path.metadata()?;
    let mtime_ns = meta
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default();
    Ok((mtime_ns, meta.len()))
}

/// Hash a file, optionally only its first `max_bytes`
pub fn compute_sha256_hash_for_file(
    path: &Path,
    max_bytes: Option<usize>,
) -> Result<String, DataFileError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_CHUNK_SIZE];
    let mut checked_bytes = 0;
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        checked_bytes += n;
        if max_bytes.is_some_and(|max| checked_bytes >= max) {
            break;
        }
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Parse `<start>__<end>__<anything>` where each timestamp reads
/// `YYYYMMDDThhmmss_ffffff` (underscores between the date and time fields and a
/// `.` before the fraction are accepted, as is a trailing `Z`).
pub fn parse_file_name(stem: &str) -> Result<(Timestamp, Timestamp), DataFileError> {
    let mut parts = stem.splitn(3, NAME_SEPARATOR);
    let (Some(start), Some(end), Some(_)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(DataFileError::BadFileName(stem.to_string()));
    };
    let start_time = parse_name_timestamp(start).ok_or(DataFileError::BadFileName(stem.to_string()))?;
    let end_time = parse_name_timestamp(end).ok_or(DataFileError::BadFileName(stem.to_string()))?;
    Ok((start_time, end_time))
}

fn parse_name_timestamp(s: &str) -> Option<Timestamp> {
    let s = s.strip_suffix('Z').unwrap_or(s);
    let (date_part, rest) = s.split_once('T')?;
    if rest.len() < 7 {
        return None;
    }
    let (time_part, frac_part) = rest.split_at(rest.len() - 7);
    let frac_part = frac_part.strip_prefix(|c: char| c == '_' || c == '.')?;

    let date_digits: String = date_part.chars().filter(|c| *c != '_').collect();
    let time_digits: String = time_part.chars().filter(|c| *c != '_').collect();
    if date_digits.len() != 8 || time_digits.len() != 6 || frac_part.len() != 6 {
        return None;
    }
    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if !all_digits(&date_digits) || !all_digits(&time_digits) || !all_digits(frac_part) {
        return None;
    }

    let year: i32 = date_digits[0..4].parse().ok()?;
    let month: u8 = date_digits[4..6].parse().ok()?;
    let day: u8 = date_digits[6..8].parse().ok()?;
    let hour: u8 = time_digits[0..2].parse().ok()?;
    let minute: u8 = time_digits[2..4].parse().ok()?;
    let second: u8 = time_digits[4..6].parse().ok()?;
    let micro: u32 = frac_part.parse().ok()?;

    let date = Date::from_calendar_date(year, Month::try_from(month).ok()?, day).ok()?;
    let time = Time::from_hms_micro(hour, minute, second, micro).ok()?;
    Some(Timestamp::from_datetime(
        PrimitiveDateTime::new(date, time).assume_utc(),
    ))
}

/// Render a timestamp the way data file names carry it
pub fn format_name_timestamp(ts: Timestamp) -> Result<String, DataFileError> {
    let dt = ts.to_datetime()?;
    Ok(format!(
        "{:04}{:02}{:02}T{:02}{:02}{:02}_{:06}",
        dt.year(),
        dt.month() as u8,
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
        dt.microsecond()
    ))
}

/// Build a data file name following the naming convention
pub fn make_file_name(start: Timestamp, end: Timestamp, suffix: &str) -> Result<String, DataFileError> {
    Ok(format!(
        "{}{sep}{}{sep}{suffix}.{DATA_FILE_EXTENSION}",
        format_name_timestamp(start)?,
        format_name_timestamp(end)?,
        sep = NAME_SEPARATOR
    ))
}

/// Collect all data files from the folders whose range touches `[start, end]`.
///
/// Files with names outside the convention are skipped. Returned sorted by start time.
pub fn scan_folders(
    folders: &[PathBuf],
    start: Timestamp,
    end: Timestamp,
) -> Result<Vec<DataFileDescriptor>, DataFileError> {
    let mut file_list: Vec<DataFileDescriptor> = Vec::new();
    for folder in folders {
        if !folder.exists() {
            return Err(DataFileError::BadFilePath(folder.clone()));
        }
        for item in folder.read_dir()? {
            let item_path = item?.path();
            if !item_path.is_file()
                || item_path.extension().and_then(|e| e.to_str()) != Some(DATA_FILE_EXTENSION)
            {
                continue;
            }
            let descriptor = match DataFileDescriptor::new(&item_path) {
                Ok(d) => d,
                Err(DataFileError::BadFileName(_)) => continue,
                Err(e) => return Err(e),
            };
            if descriptor.start_time > end || descriptor.end_time < start {
                continue;
            }
            file_list.push(descriptor);
        }
    }
    file_list.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.path.cmp(&b.path)));
    Ok(file_list)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_file_name() {
        let (start, end) =
            parse_file_name("20210102T030405_123456__20210102T030505_123456__grimsel").unwrap();
        assert_eq!(start, "2021-01-02T03:04:05.123456Z".parse().unwrap());
        assert_eq!(end.seconds_since(start), 60.0);

        // Underscore separated fields
        let (start2, _) = parse_file_name(
            "2021_01_02T03_04_05_123456Z__2021_01_02T03_05_05.123456Z__other",
        )
        .unwrap();
        assert_eq!(start, start2);

        assert!(parse_file_name("20210102T030405_123456__20210102T030505_123456").is_err());
        assert!(parse_file_name("random_file").is_err());
        assert!(parse_file_name("20211302T030405_123456__20210102T030505_123456__x").is_err());
    }

    #[test]
    fn test_make_file_name_round_trip() {
        let start: Timestamp = "2022-03-04T05:06:07.000250Z".parse().unwrap();
        let end = start.offset(10.0);
        let name = make_file_name(start, end, "sim").unwrap();
        assert_eq!(name, "20220304T050607_000250__20220304T050617_000250__sim.h5");
        let stem = name.trim_end_matches(".h5");
        assert_eq!(parse_file_name(stem).unwrap(), (start, end));
    }
}
