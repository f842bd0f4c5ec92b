//! ARRAYMETA - Core Type Definitions
//! Defines fundamental types used across the metadata store.

use std::fmt;
use std::str::FromStr;

use crate::error::{ArrayMetaError, Result};

/// Key type for metadata entries.
/// Using Vec<u8> allows arbitrary binary (and multi-byte UTF-8) keys.
pub type Key = Vec<u8>;

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Scalar datatype tag of a metadata value.
///
/// The discriminants are part of the on-disk entry encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Datatype {
    Int8 = 0,
    UInt8 = 1,
    Int16 = 2,
    UInt16 = 3,
    Int32 = 4,
    UInt32 = 5,
    Int64 = 6,
    UInt64 = 7,
    Float32 = 8,
    Float64 = 9,
    Char = 10,
    StringAscii = 11,
    StringUtf8 = 12,
    /// Catch-all tag. Never valid for a stored entry.
    Any = 255,
}

impl Datatype {
    /// Size in bytes of a single element.
    pub fn size(self) -> usize {
        match self {
            Datatype::Int8
            | Datatype::UInt8
            | Datatype::Char
            | Datatype::StringAscii
            | Datatype::StringUtf8
            | Datatype::Any => 1,
            Datatype::Int16 | Datatype::UInt16 => 2,
            Datatype::Int32 | Datatype::UInt32 | Datatype::Float32 => 4,
            Datatype::Int64 | Datatype::UInt64 | Datatype::Float64 => 8,
        }
    }

    /// Decode a datatype tag. Returns `None` for unknown tags.
    pub fn from_tag(tag: u8) -> Option<Self> {
        let datatype = match tag {
            0 => Datatype::Int8,
            1 => Datatype::UInt8,
            2 => Datatype::Int16,
            3 => Datatype::UInt16,
            4 => Datatype::Int32,
            5 => Datatype::UInt32,
            6 => Datatype::Int64,
            7 => Datatype::UInt64,
            8 => Datatype::Float32,
            9 => Datatype::Float64,
            10 => Datatype::Char,
            11 => Datatype::StringAscii,
            12 => Datatype::StringUtf8,
            255 => Datatype::Any,
            _ => return None,
        };
        Some(datatype)
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Datatype::Int8 => "int8",
            Datatype::UInt8 => "uint8",
            Datatype::Int16 => "int16",
            Datatype::UInt16 => "uint16",
            Datatype::Int32 => "int32",
            Datatype::UInt32 => "uint32",
            Datatype::Int64 => "int64",
            Datatype::UInt64 => "uint64",
            Datatype::Float32 => "float32",
            Datatype::Float64 => "float64",
            Datatype::Char => "char",
            Datatype::StringAscii => "ascii",
            Datatype::StringUtf8 => "utf8",
            Datatype::Any => "any",
        }
    }

    /// True for the textual datatypes.
    pub fn is_string(self) -> bool {
        matches!(
            self,
            Datatype::Char | Datatype::StringAscii | Datatype::StringUtf8
        )
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Datatype {
    type Err = ArrayMetaError;

    fn from_str(s: &str) -> Result<Self> {
        let datatype = match s.to_ascii_lowercase().as_str() {
            "int8" | "i8" => Datatype::Int8,
            "uint8" | "u8" => Datatype::UInt8,
            "int16" | "i16" => Datatype::Int16,
            "uint16" | "u16" => Datatype::UInt16,
            "int32" | "i32" => Datatype::Int32,
            "uint32" | "u32" => Datatype::UInt32,
            "int64" | "i64" => Datatype::Int64,
            "uint64" | "u64" => Datatype::UInt64,
            "float32" | "f32" => Datatype::Float32,
            "float64" | "f64" => Datatype::Float64,
            "char" => Datatype::Char,
            "ascii" | "string_ascii" => Datatype::StringAscii,
            "utf8" | "string" | "string_utf8" => Datatype::StringUtf8,
            "any" => Datatype::Any,
            other => {
                return Err(ArrayMetaError::InvalidArgument(format!(
                    "unknown datatype '{}'",
                    other
                )))
            }
        };
        Ok(datatype)
    }
}

/// A fixed-size numeric element that can be stored as metadata.
pub trait Scalar: Copy {
    const DATATYPE: Datatype;

    fn append_le(self, out: &mut Vec<u8>);

    /// Read one element from exactly `DATATYPE.size()` little-endian bytes.
    fn from_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_scalar {
    ($($ty:ty => $dt:ident),* $(,)?) => {
        $(
            impl Scalar for $ty {
                const DATATYPE: Datatype = Datatype::$dt;

                fn append_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn from_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_scalar! {
    i8 => Int8,
    u8 => UInt8,
    i16 => Int16,
    u16 => UInt16,
    i32 => Int32,
    u32 => UInt32,
    i64 => Int64,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
}

/// A typed metadata value: `count` contiguous elements of `datatype`,
/// stored as little-endian bytes.
///
/// Construction validates the live-entry invariant, so every
/// `MetadataValue` has `count >= 1` and a datatype other than `Any`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataValue {
    datatype: Datatype,
    count: u32,
    bytes: Vec<u8>,
}

impl MetadataValue {
    /// Build a value from raw little-endian element bytes.
    pub fn new(datatype: Datatype, count: u32, bytes: Vec<u8>) -> Result<Self> {
        if datatype == Datatype::Any {
            return Err(ArrayMetaError::InvalidArgument(
                "value type ANY is not allowed for metadata".into(),
            ));
        }
        if count == 0 {
            return Err(ArrayMetaError::InvalidArgument(
                "metadata value count must be at least 1".into(),
            ));
        }
        let expected = count as usize * datatype.size();
        if bytes.len() != expected {
            return Err(ArrayMetaError::InvalidArgument(format!(
                "value holds {} bytes, expected {} for {} x {}",
                bytes.len(),
                expected,
                count,
                datatype
            )));
        }
        Ok(Self {
            datatype,
            count,
            bytes,
        })
    }

    /// Build a value from a slice of numeric elements.
    pub fn from_slice<T: Scalar>(values: &[T]) -> Result<Self> {
        let mut bytes = Vec::with_capacity(values.len() * T::DATATYPE.size());
        for v in values {
            v.append_le(&mut bytes);
        }
        Self::new(T::DATATYPE, values.len() as u32, bytes)
    }

    /// Build a UTF-8 string value; the count is the length in bytes.
    pub fn from_str_utf8(s: &str) -> Result<Self> {
        Self::new(Datatype::StringUtf8, s.len() as u32, s.as_bytes().to_vec())
    }

    pub fn datatype(&self) -> Datatype {
        self.datatype
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Raw little-endian element bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Decode the elements as `T`. Returns `None` if the datatype differs.
    pub fn to_vec<T: Scalar>(&self) -> Option<Vec<T>> {
        if self.datatype != T::DATATYPE {
            return None;
        }
        Some(
            self.bytes
                .chunks_exact(T::DATATYPE.size())
                .map(T::from_le)
                .collect(),
        )
    }

    /// View a textual value as `&str`. Returns `None` for numeric types
    /// or invalid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        if !self.datatype.is_string() {
            return None;
        }
        std::str::from_utf8(&self.bytes).ok()
    }
}

/// A single record in a metadata fragment.
/// A `None` value indicates a tombstone (deletion marker).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Key,
    pub value: Option<MetadataValue>,
}

impl Entry {
    /// Create a new entry with a value (PUT operation).
    pub fn put(key: Key, value: MetadataValue) -> Self {
        Self {
            key,
            value: Some(value),
        }
    }

    /// Create a tombstone entry (DELETE operation).
    pub fn delete(key: Key) -> Self {
        Self { key, value: None }
    }

    /// Returns true if this entry is a tombstone.
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Approximate in-memory footprint (key + value bytes).
    pub fn size(&self) -> usize {
        self.key.len() + self.value.as_ref().map_or(0, |v| v.as_bytes().len())
    }
}

/// Mode an array session is opened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    Read,
    Write,
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryMode::Read => f.write_str("read"),
            QueryMode::Write => f.write_str("write"),
        }
    }
}
