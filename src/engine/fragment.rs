//! ARRAYMETA - Metadata Fragment Store
//! Immutable, timestamped files holding one batch of metadata entries.
//!
//! Each closed write session produces one fragment covering the single
//! timestamp `[t, t]`. A consolidation produces one fragment covering
//! `[earliest input, max_timestamp]`, which supersedes every fragment
//! whose range it contains for reads at or after its end.
//!
//! ## File name
//! ```text
//! __<start>_<end>_<16 hex digits>.meta
//! ```
//!
//! ## Binary Format
//! ```text
//! [magic: 4 bytes "AMDF"][version: 2 bytes (LE)][flags: 1 byte]
//! [start: 8 bytes (LE)][end: 8 bytes (LE)][payload_len: 4 bytes (LE)]
//! [payload: payload_len bytes][crc: 4 bytes (LE) over everything before]
//! ```
//! The payload is an entry batch from the codec, sealed with AES-256-GCM
//! when flag bit 0 is set.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{Buf, BufMut};

use crate::error::{ArrayMetaError, Result};
use crate::types::{Entry, Timestamp};

use super::clock::WriteTimestamps;
use super::codec;
use super::crypto::{EncryptionKey, FragmentCipher};
use super::index::MetadataIndex;
use super::metrics::EngineMetrics;
use super::schema::{self, ArrayHeader};
use super::Context;

const MAGIC: &[u8; 4] = b"AMDF";
const VERSION: u16 = 1;
const FLAG_ENCRYPTED: u8 = 0b0000_0001;
const HEADER_LEN: usize = 4 + 2 + 1 + 8 + 8 + 4;
const CRC_LEN: usize = 4;
const EXTENSION: &str = "meta";

/// Reference to one fragment file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentHandle {
    path: PathBuf,
    start: Timestamp,
    end: Timestamp,
}

impl FragmentHandle {
    /// Returns the path to the fragment file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Earliest timestamp this fragment represents.
    pub fn start(&self) -> Timestamp {
        self.start
    }

    /// Creation timestamp (the upper end of its range).
    pub fn end(&self) -> Timestamp {
        self.end
    }

    /// True for fragments produced by consolidation.
    pub fn is_consolidated(&self) -> bool {
        self.start < self.end
    }

    /// True if `other`'s range lies within this fragment's range.
    pub fn covers(&self, other: &FragmentHandle) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    fn file_name(start: Timestamp, end: Timestamp, suffix: u64) -> String {
        format!("__{}_{}_{:016x}.{}", start, end, suffix, EXTENSION)
    }

    /// Parse a fragment file name. Returns `None` for anything else
    /// (temp files, stray files).
    fn parse(path: PathBuf) -> Option<Self> {
        if path.extension()? != EXTENSION {
            return None;
        }
        let stem = path.file_stem()?.to_str()?.strip_prefix("__")?;
        let mut parts = stem.splitn(3, '_');
        let start = parts.next()?.parse().ok()?;
        let end = parts.next()?.parse().ok()?;
        let suffix = parts.next()?;
        if suffix.len() != 16 || u64::from_str_radix(suffix, 16).is_err() || start > end {
            return None;
        }
        Some(Self { path, start, end })
    }
}

/// Fragment storage of one array, bound to that array's key material.
pub struct FragmentStore {
    dir: PathBuf,
    cipher: Option<FragmentCipher>,
    timestamps: Arc<WriteTimestamps>,
    metrics: Arc<EngineMetrics>,
    sync_writes: bool,
}

impl FragmentStore {
    /// Open the fragment store of the array at `uri`.
    /// Fails with `Authentication` if `key` does not fit the array.
    pub fn open(ctx: &Context, uri: impl AsRef<Path>, key: Option<&EncryptionKey>) -> Result<Self> {
        let array_dir = ctx.array_path(uri);
        let header = ArrayHeader::load(&array_dir)?;
        let cipher = header.cipher_for(key).map_err(|e| {
            if matches!(e, ArrayMetaError::Authentication(_)) {
                ctx.metrics().record_auth_failure();
            }
            e
        })?;

        Ok(Self {
            dir: schema::metadata_dir(&array_dir),
            cipher,
            timestamps: Arc::clone(ctx.timestamps()),
            metrics: Arc::clone(ctx.metrics()),
            sync_writes: ctx.config().sync_writes,
        })
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Persist `entries` as a new fragment stamped with the next clock tick.
    /// The timestamp stays in flight until the file is in place.
    pub fn write_fragment(&self, entries: &[Entry]) -> Result<FragmentHandle> {
        let reservation = self.timestamps.reserve();
        let ts = reservation.timestamp();
        self.write_range(entries, ts, ts)
    }

    /// Persist `entries` as a fragment covering `[start, end]`.
    pub(crate) fn write_range(
        &self,
        entries: &[Entry],
        start: Timestamp,
        end: Timestamp,
    ) -> Result<FragmentHandle> {
        let plain = codec::encode_batch(entries)?;
        let (flags, payload) = match &self.cipher {
            Some(cipher) => (FLAG_ENCRYPTED, cipher.seal(&plain)?),
            None => (0, plain),
        };
        let payload_len = u32::try_from(payload.len()).map_err(|_| {
            ArrayMetaError::InvalidArgument(format!(
                "fragment payload of {} bytes is too large",
                payload.len()
            ))
        })?;

        let mut buf = Vec::with_capacity(HEADER_LEN + payload.len() + CRC_LEN);
        buf.put_slice(MAGIC);
        buf.put_u16_le(VERSION);
        buf.put_u8(flags);
        buf.put_u64_le(start);
        buf.put_u64_le(end);
        buf.put_u32_le(payload_len);
        buf.put_slice(&payload);
        let crc = crc32fast::hash(&buf);
        buf.put_u32_le(crc);

        fs::create_dir_all(&self.dir)?;
        let path = self
            .dir
            .join(FragmentHandle::file_name(start, end, rand::random::<u64>()));
        write_atomic(&path, &buf, self.sync_writes)?;
        self.metrics.record_fragment_write(buf.len());

        log::info!(
            "Wrote metadata fragment {:?} ({} entries, {} bytes)",
            path.file_name().unwrap_or_default(),
            entries.len(),
            buf.len()
        );
        Ok(FragmentHandle { path, start, end })
    }

    /// Fragments visible at `max_timestamp`, oldest first.
    ///
    /// A fragment is visible when its end is at or before `max_timestamp`
    /// and no visible consolidated fragment covers it.
    pub fn list_fragments(&self, max_timestamp: Timestamp) -> Result<Vec<FragmentHandle>> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut candidates = Vec::new();
        for dir_entry in read_dir {
            if let Some(handle) = FragmentHandle::parse(dir_entry?.path()) {
                if handle.end <= max_timestamp {
                    candidates.push(handle);
                }
            }
        }

        // Start ascending, widest range first: a covering fragment always
        // precedes everything it covers.
        candidates.sort_by(|a, b| {
            a.start
                .cmp(&b.start)
                .then(b.end.cmp(&a.end))
                .then_with(|| a.path.cmp(&b.path))
        });

        let mut visible: Vec<FragmentHandle> = Vec::with_capacity(candidates.len());
        let mut covered_until: Option<Timestamp> = None;
        for handle in candidates {
            if covered_until.map_or(false, |end| handle.end <= end) {
                continue;
            }
            if handle.is_consolidated() {
                covered_until = Some(covered_until.map_or(handle.end, |end| end.max(handle.end)));
            }
            visible.push(handle);
        }

        log::debug!(
            "Listed {} visible metadata fragments at {} in {:?}",
            visible.len(),
            max_timestamp,
            self.dir
        );
        Ok(visible)
    }

    /// Load, verify, decrypt and decode one fragment.
    pub fn read_fragment(&self, handle: &FragmentHandle) -> Result<Vec<Entry>> {
        let bytes = fs::read(&handle.path)?;
        self.metrics.record_fragment_read(bytes.len());
        let name = handle.path.display();

        if bytes.len() < HEADER_LEN + CRC_LEN {
            return Err(ArrayMetaError::Corruption(format!(
                "fragment {} is truncated ({} bytes)",
                name,
                bytes.len()
            )));
        }
        let (body, mut crc_bytes) = bytes.split_at(bytes.len() - CRC_LEN);
        let expected = crc_bytes.get_u32_le();
        if crc32fast::hash(body) != expected {
            return Err(ArrayMetaError::Corruption(format!(
                "fragment {} failed CRC check",
                name
            )));
        }

        let mut header = &body[..HEADER_LEN];
        if &header[..4] != MAGIC {
            return Err(ArrayMetaError::Corruption(format!(
                "fragment {} has bad magic",
                name
            )));
        }
        header.advance(4);
        let version = header.get_u16_le();
        if version != VERSION {
            return Err(ArrayMetaError::Corruption(format!(
                "fragment {} has unsupported version {}",
                name, version
            )));
        }
        let flags = header.get_u8();
        let start = header.get_u64_le();
        let end = header.get_u64_le();
        let payload_len = header.get_u32_le() as usize;
        if start != handle.start || end != handle.end {
            return Err(ArrayMetaError::Corruption(format!(
                "fragment {} header range [{}, {}] does not match its name",
                name, start, end
            )));
        }
        let payload = &body[HEADER_LEN..];
        if payload.len() != payload_len {
            return Err(ArrayMetaError::Corruption(format!(
                "fragment {} payload length {} != {}",
                name,
                payload.len(),
                payload_len
            )));
        }

        let plain = match (flags & FLAG_ENCRYPTED != 0, &self.cipher) {
            (true, Some(cipher)) => cipher.open(payload).map_err(|e| {
                if matches!(e, ArrayMetaError::Authentication(_)) {
                    self.metrics.record_auth_failure();
                }
                e
            })?,
            (true, None) => {
                self.metrics.record_auth_failure();
                return Err(ArrayMetaError::Authentication(format!(
                    "fragment {} is encrypted; an encryption key is required",
                    name
                )));
            }
            (false, Some(_)) => {
                return Err(ArrayMetaError::Corruption(format!(
                    "unencrypted fragment {} in an encrypted array",
                    name
                )))
            }
            (false, None) => payload.to_vec(),
        };
        codec::decode_batch(&plain)
    }

    /// Replay every fragment visible at `max_timestamp` into an index.
    pub fn load_index(&self, max_timestamp: Timestamp) -> Result<MetadataIndex> {
        let handles = self.list_fragments(max_timestamp)?;
        let fragments = handles
            .iter()
            .map(|h| self.read_fragment(h))
            .collect::<Result<Vec<_>>>()?;
        let index = MetadataIndex::build(fragments);
        log::debug!(
            "Built metadata index from {} fragments ({} live keys)",
            handles.len(),
            index.len()
        );
        Ok(index)
    }
}

/// Write `bytes` to `path` all-or-nothing: temp file, then rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8], sync: bool) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let written = (|| -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp)?;
        file.write_all(bytes)?;
        if sync {
            file.sync_all()?; // fsync for durability
        }
        fs::rename(&tmp, path)
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }

    if sync {
        if let Some(parent) = path.parent() {
            File::open(parent)?.sync_all()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::clock::ManualClock;
    use crate::types::MetadataValue;

    const KEY: &[u8; 32] = b"0123456789abcdeF0123456789abcdeF";

    fn setup(key: Option<&EncryptionKey>) -> (tempfile::TempDir, Context) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path()).with_sync_writes(false);
        let ctx = Context::with_clock(config, Arc::new(ManualClock::new(1_000))).unwrap();
        let array_dir = ctx.array_path("arr");
        ArrayHeader::create(&array_dir, key, 1_000, false).unwrap();
        (dir, ctx)
    }

    fn put(key: &str, v: i32) -> Entry {
        Entry::put(
            key.as_bytes().to_vec(),
            MetadataValue::from_slice(&[v]).unwrap(),
        )
    }

    #[test]
    fn test_write_list_read() {
        let (_dir, ctx) = setup(None);
        let store = FragmentStore::open(&ctx, "arr", None).unwrap();

        let h1 = store.write_fragment(&[put("a", 1)]).unwrap();
        let h2 = store
            .write_fragment(&[Entry::delete(b"a".to_vec())])
            .unwrap();
        assert!(h2.end() > h1.end());

        let listed = store.list_fragments(u64::MAX).unwrap();
        assert_eq!(listed, vec![h1.clone(), h2.clone()]);
        assert_eq!(store.read_fragment(&h1).unwrap(), vec![put("a", 1)]);

        // Time travel: only the first fragment at its own timestamp.
        assert_eq!(store.list_fragments(h1.end()).unwrap(), vec![h1]);
    }

    #[test]
    fn test_consolidated_fragment_supersedes_inputs() {
        let (_dir, ctx) = setup(None);
        let store = FragmentStore::open(&ctx, "arr", None).unwrap();

        let h1 = store.write_fragment(&[put("a", 1)]).unwrap();
        let h2 = store.write_fragment(&[put("b", 2)]).unwrap();
        let merged = store
            .write_range(&[put("a", 1), put("b", 2)], h1.start(), h2.end() + 5)
            .unwrap();
        let later = h2.end() + 6;
        let h3 = store.write_range(&[put("c", 3)], later, later).unwrap();

        assert!(merged.is_consolidated());
        assert!(merged.covers(&h1) && merged.covers(&h2));
        assert_eq!(
            store.list_fragments(u64::MAX).unwrap(),
            vec![merged, h3]
        );
        // Before the consolidated end, the originals are still used.
        assert_eq!(store.list_fragments(h2.end()).unwrap(), vec![h1, h2]);
    }

    #[test]
    fn test_stray_files_ignored() {
        let (_dir, ctx) = setup(None);
        let store = FragmentStore::open(&ctx, "arr", None).unwrap();
        fs::write(store.dir.join("__1_1_0000000000000000.tmp"), b"x").unwrap();
        fs::write(store.dir.join("notes.meta"), b"x").unwrap();
        assert!(store.list_fragments(u64::MAX).unwrap().is_empty());
    }

    #[test]
    fn test_bit_flip_detected() {
        let (_dir, ctx) = setup(None);
        let store = FragmentStore::open(&ctx, "arr", None).unwrap();
        let h = store.write_fragment(&[put("a", 1)]).unwrap();

        let mut bytes = fs::read(h.path()).unwrap();
        bytes[HEADER_LEN + 2] ^= 0xFF;
        fs::write(h.path(), &bytes).unwrap();

        assert!(matches!(
            store.read_fragment(&h),
            Err(ArrayMetaError::Corruption(_))
        ));
    }

    #[test]
    fn test_encrypted_payload_is_opaque() {
        let key = EncryptionKey::aes256_gcm(KEY).unwrap();
        let (_dir, ctx) = setup(Some(&key));
        let store = FragmentStore::open(&ctx, "arr", Some(&key)).unwrap();
        assert!(store.is_encrypted());

        let h = store.write_fragment(&[put("secret_key", 7)]).unwrap();
        let raw = fs::read(h.path()).unwrap();
        assert!(!raw.windows(10).any(|w| w == b"secret_key"));
        assert_eq!(store.read_fragment(&h).unwrap(), vec![put("secret_key", 7)]);
    }

    #[test]
    fn test_open_with_wrong_key() {
        let key = EncryptionKey::aes256_gcm(KEY).unwrap();
        let (_dir, ctx) = setup(Some(&key));
        let wrong = EncryptionKey::aes256_gcm(&[9u8; 32]).unwrap();

        assert!(matches!(
            FragmentStore::open(&ctx, "arr", Some(&wrong)),
            Err(ArrayMetaError::Authentication(_))
        ));
        assert!(matches!(
            FragmentStore::open(&ctx, "arr", None),
            Err(ArrayMetaError::Authentication(_))
        ));
        assert_eq!(
            ctx.metrics()
                .auth_failures
                .load(std::sync::atomic::Ordering::Relaxed),
            2
        );
    }

    #[test]
    fn test_file_name_roundtrip() {
        let name = FragmentHandle::file_name(10, 20, 0xabc);
        let handle = FragmentHandle::parse(PathBuf::from(&name)).unwrap();
        assert_eq!((handle.start(), handle.end()), (10, 20));
        assert!(FragmentHandle::parse(PathBuf::from("__20_10_0000000000000abc.meta")).is_none());
    }
}
