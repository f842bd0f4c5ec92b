//! ARRAYMETA - Metadata Entry Codec
//! Binary encoding of single metadata entries and of entry batches.
//!
//! ## Binary Format (per entry)
//! ```text
//! live:      [key_len: 4 bytes (LE)][key: N bytes][deleted: 1 byte = 0][type: 1 byte][count: 4 bytes (LE)][value: count * size(type) bytes]
//! tombstone: [key_len: 4 bytes (LE)][key: N bytes][deleted: 1 byte = 1]
//! ```
//! A batch is `[entry_count: 4 bytes (LE)]` followed by the entries.

use bytes::{Buf, BufMut};

use crate::error::{ArrayMetaError, Result};
use crate::types::{Datatype, Entry, MetadataValue};

const LIVE: u8 = 0;
const DELETED: u8 = 1;

/// Append the encoding of one entry to `buf`.
pub fn encode_into<B: BufMut>(entry: &Entry, buf: &mut B) -> Result<()> {
    if entry.key.is_empty() {
        return Err(ArrayMetaError::InvalidArgument(
            "metadata key must not be empty".into(),
        ));
    }
    buf.put_u32_le(entry.key.len() as u32);
    buf.put_slice(&entry.key);
    match &entry.value {
        None => buf.put_u8(DELETED),
        Some(value) => {
            // Values built through MetadataValue::new already hold this,
            // but the codec is the last gate before bytes hit disk.
            if value.datatype() == Datatype::Any || value.count() == 0 {
                return Err(ArrayMetaError::InvalidArgument(format!(
                    "cannot encode {} x {} value",
                    value.count(),
                    value.datatype()
                )));
            }
            buf.put_u8(LIVE);
            buf.put_u8(value.datatype().tag());
            buf.put_u32_le(value.count());
            buf.put_slice(value.as_bytes());
        }
    }
    Ok(())
}

/// Encode one entry into a fresh buffer.
pub fn encode(entry: &Entry) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(entry.size() + 10);
    encode_into(entry, &mut buf)?;
    Ok(buf)
}

/// Decode one entry from the front of `buf`, advancing it.
pub fn decode_from<B: Buf>(buf: &mut B) -> Result<Entry> {
    let key_len = read_u32(buf, "key length")? as usize;
    if key_len == 0 {
        return Err(ArrayMetaError::Corruption("zero-length key".into()));
    }
    let key = read_bytes(buf, key_len, "key")?;

    match read_u8(buf, "deleted flag")? {
        DELETED => Ok(Entry::delete(key)),
        LIVE => {
            let tag = read_u8(buf, "datatype")?;
            let datatype = Datatype::from_tag(tag)
                .filter(|dt| *dt != Datatype::Any)
                .ok_or_else(|| ArrayMetaError::Corruption(format!("bad datatype tag {}", tag)))?;
            let count = read_u32(buf, "value count")?;
            if count == 0 {
                return Err(ArrayMetaError::Corruption("zero value count".into()));
            }
            let len = (count as usize)
                .checked_mul(datatype.size())
                .ok_or_else(|| ArrayMetaError::Corruption("value length overflow".into()))?;
            let bytes = read_bytes(buf, len, "value")?;
            let value = MetadataValue::new(datatype, count, bytes)
                .map_err(|e| ArrayMetaError::Corruption(e.to_string()))?;
            Ok(Entry::put(key, value))
        }
        flag => Err(ArrayMetaError::Corruption(format!(
            "bad deleted flag {}",
            flag
        ))),
    }
}

/// Decode exactly one entry; trailing bytes are treated as corruption.
pub fn decode(mut bytes: &[u8]) -> Result<Entry> {
    let entry = decode_from(&mut bytes)?;
    if bytes.has_remaining() {
        return Err(ArrayMetaError::Corruption(format!(
            "{} trailing bytes after entry",
            bytes.remaining()
        )));
    }
    Ok(entry)
}

/// Encode a batch of entries with a leading entry count.
pub fn encode_batch(entries: &[Entry]) -> Result<Vec<u8>> {
    let hint: usize = entries.iter().map(|e| e.size() + 10).sum();
    let mut buf = Vec::with_capacity(hint + 4);
    buf.put_u32_le(entries.len() as u32);
    for entry in entries {
        encode_into(entry, &mut buf)?;
    }
    Ok(buf)
}

/// Decode a batch written by [`encode_batch`].
pub fn decode_batch(mut bytes: &[u8]) -> Result<Vec<Entry>> {
    let count = read_u32(&mut bytes, "entry count")? as usize;
    // Every entry needs at least 6 bytes; guards against a bogus count.
    if count > bytes.remaining() / 6 {
        return Err(ArrayMetaError::Corruption(format!(
            "entry count {} exceeds buffer of {} bytes",
            count,
            bytes.remaining()
        )));
    }
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        entries.push(decode_from(&mut bytes)?);
    }
    if bytes.has_remaining() {
        return Err(ArrayMetaError::Corruption(format!(
            "{} trailing bytes after batch",
            bytes.remaining()
        )));
    }
    Ok(entries)
}

fn read_u8<B: Buf>(buf: &mut B, field: &str) -> Result<u8> {
    if buf.remaining() < 1 {
        return Err(truncated(field));
    }
    Ok(buf.get_u8())
}

fn read_u32<B: Buf>(buf: &mut B, field: &str) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(truncated(field));
    }
    Ok(buf.get_u32_le())
}

fn read_bytes<B: Buf>(buf: &mut B, len: usize, field: &str) -> Result<Vec<u8>> {
    if buf.remaining() < len {
        return Err(ArrayMetaError::Corruption(format!(
            "{} needs {} bytes, {} left",
            field,
            len,
            buf.remaining()
        )));
    }
    let mut out = vec![0u8; len];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

fn truncated(field: &str) -> ArrayMetaError {
    ArrayMetaError::Corruption(format!("truncated {}", field))
}
