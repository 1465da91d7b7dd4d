use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use hdf5::H5Type;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::io::{Read, Write};

/// Storage type of waveform samples. Persisted in index caches so a cache
/// built for another type is never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleType {
    I16,
    I32,
    I64,
    F32,
    #[default]
    F64,
}

impl SampleType {
    pub fn code(&self) -> u8 {
        match self {
            Self::I16 => 1,
            Self::I32 => 2,
            Self::I64 => 3,
            Self::F32 => 4,
            Self::F64 => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::I16),
            2 => Some(Self::I32),
            3 => Some(Self::I64),
            4 => Some(Self::F32),
            5 => Some(Self::F64),
            _ => None,
        }
    }
}

/// A waveform sample. Envelopes and merged caches keep this type exactly;
/// integer data is never promoted to floats.
pub trait Sample: H5Type + Copy + PartialOrd + Default + Debug + Send + Sync + 'static {
    const SAMPLE_TYPE: SampleType;

    fn to_f64(self) -> f64;

    fn write_le<W: Write>(self, writer: &mut W) -> std::io::Result<()>;

    fn read_le<R: Read>(reader: &mut R) -> std::io::Result<Self>;
}

macro_rules! impl_sample {
    ($t:ty, $kind:ident, $write:ident, $read:ident) => {
        impl Sample for $t {
            const SAMPLE_TYPE: SampleType = SampleType::$kind;

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn write_le<W: Write>(self, writer: &mut W) -> std::io::Result<()> {
                writer.$write::<LittleEndian>(self)
            }

            fn read_le<R: Read>(reader: &mut R) -> std::io::Result<Self> {
                reader.$read::<LittleEndian>()
            }
        }
    };
}

impl_sample!(i16, I16, write_i16, read_i16);
impl_sample!(i32, I32, write_i32, read_i32);
impl_sample!(i64, I64, write_i64, read_i64);
impl_sample!(f32, F32, write_f32, read_f32);
impl_sample!(f64, F64, write_f64, read_f64);
