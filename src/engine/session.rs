//! ARRAYMETA - Array Metadata Session
//! Client surface for reading and writing the metadata of one array.
//!
//! A session is opened either for writes, which buffer puts and deletes
//! and flush them as one fragment on close, or for reads, which see the
//! fragments written at or before the session timestamp.

use std::path::{Path, PathBuf};

use crate::error::{ArrayMetaError, Result};
use crate::types::{Datatype, Key, MetadataValue, QueryMode, Scalar, Timestamp};

use super::buffer::WriteBuffer;
use super::consolidation::{self, ConsolidationReport};
use super::crypto::EncryptionKey;
use super::fragment::FragmentStore;
use super::index::MetadataIndex;
use super::schema::ArrayHeader;
use super::Context;

/// How to open an array session.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    mode: QueryMode,
    key: Option<EncryptionKey>,
    timestamp: Option<Timestamp>,
}

impl OpenOptions {
    pub fn new(mode: QueryMode) -> Self {
        Self {
            mode,
            key: None,
            timestamp: None,
        }
    }

    pub fn read() -> Self {
        Self::new(QueryMode::Read)
    }

    pub fn write() -> Self {
        Self::new(QueryMode::Write)
    }

    /// Key material for an encrypted array.
    pub fn encryption_key(mut self, key: EncryptionKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Read the metadata as of `timestamp` (read mode only).
    /// Take it from [`Context::now_ms`] so that it orders correctly
    /// against fragment timestamps.
    pub fn timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn mode(&self) -> QueryMode {
        self.mode
    }
}

struct OpenState {
    mode: QueryMode,
    key: Option<EncryptionKey>,
    /// Effective read timestamp.
    timestamp: Timestamp,
    store: FragmentStore,
    buffer: WriteBuffer,
    /// Built on the first read.
    index: Option<MetadataIndex>,
}

/// A handle on one array's metadata. Open, operate, close; it can be
/// reopened as many times as needed.
///
/// ## Example
/// ```no_run
/// use arraymeta::config::Config;
/// use arraymeta::engine::{Array, Context, OpenOptions};
///
/// let ctx = Context::new(Config::new("./data")).unwrap();
/// Array::create(&ctx, "dense", None).unwrap();
///
/// let mut array = Array::open(&ctx, "dense", OpenOptions::write()).unwrap();
/// array.put(b"aaa", &[5i32]).unwrap();
/// array.close().unwrap();
///
/// array.open_with(OpenOptions::read()).unwrap();
/// let v = array.get_metadata(b"aaa").unwrap().unwrap();
/// assert_eq!(v.to_vec::<i32>(), Some(vec![5]));
/// ```
pub struct Array {
    ctx: Context,
    uri: PathBuf,
    state: Option<OpenState>,
}

impl Array {
    /// Create a new, empty array at `uri`, encrypted if `key` is given.
    pub fn create(ctx: &Context, uri: impl AsRef<Path>, key: Option<&EncryptionKey>) -> Result<()> {
        let dir = ctx.array_path(uri);
        ArrayHeader::create(&dir, key, ctx.now_ms(), ctx.config().sync_writes)?;
        log::info!("Created array at {:?}", dir);
        Ok(())
    }

    /// A closed handle on the array at `uri`.
    pub fn new(ctx: &Context, uri: impl AsRef<Path>) -> Self {
        Self {
            ctx: ctx.clone(),
            uri: uri.as_ref().to_path_buf(),
            state: None,
        }
    }

    /// Open the array at `uri`.
    pub fn open(ctx: &Context, uri: impl AsRef<Path>, options: OpenOptions) -> Result<Self> {
        let mut array = Self::new(ctx, uri);
        array.open_with(options)?;
        Ok(array)
    }

    /// Open this (closed) handle.
    pub fn open_with(&mut self, options: OpenOptions) -> Result<()> {
        if let Some(state) = &self.state {
            return Err(ArrayMetaError::InvalidState(format!(
                "array is already open for {}",
                state.mode
            )));
        }
        if options.mode == QueryMode::Write && options.timestamp.is_some() {
            return Err(ArrayMetaError::InvalidState(
                "a timestamp can only be given when opening for reads".into(),
            ));
        }

        let store = FragmentStore::open(&self.ctx, &self.uri, options.key.as_ref())?;
        let timestamp = options.timestamp.unwrap_or_else(|| self.ctx.now_ms());
        log::debug!(
            "Opened {:?} for {} at {}",
            self.uri,
            options.mode,
            timestamp
        );

        self.state = Some(OpenState {
            mode: options.mode,
            key: options.key,
            timestamp,
            store,
            buffer: WriteBuffer::new(),
            index: None,
        });
        Ok(())
    }

    /// Flush buffered writes (write mode) and release the session.
    /// Closing a closed array is a no-op. If the flush fails the session
    /// is still closed and its pending entries are discarded.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut state) = self.state.take() else {
            return Ok(());
        };
        if state.mode == QueryMode::Write && !state.buffer.is_empty() {
            let entries = state.buffer.drain();
            state.store.write_fragment(&entries)?;
        }
        Ok(())
    }

    /// Close and reopen in the same mode at the current time, making
    /// fragments written since the last index build visible.
    pub fn reopen(&mut self) -> Result<()> {
        self.reopen_with(None, None)
    }

    /// Close and reopen, optionally switching mode or read timestamp.
    pub fn reopen_with(
        &mut self,
        mode: Option<QueryMode>,
        timestamp: Option<Timestamp>,
    ) -> Result<()> {
        let (current, key) = match &self.state {
            Some(state) => (state.mode, state.key.clone()),
            None => {
                return Err(ArrayMetaError::InvalidState(
                    "cannot reopen a closed array".into(),
                ))
            }
        };
        self.close()?;
        self.open_with(OpenOptions {
            mode: mode.unwrap_or(current),
            key,
            timestamp,
        })
    }

    pub fn uri(&self) -> &Path {
        &self.uri
    }

    pub fn is_open(&self) -> bool {
        self.state.is_some()
    }

    /// Mode of the open session, if any.
    pub fn mode(&self) -> Option<QueryMode> {
        self.state.as_ref().map(|s| s.mode)
    }

    /// Effective read timestamp of the open session, if any.
    pub fn timestamp(&self) -> Option<Timestamp> {
        self.state.as_ref().map(|s| s.timestamp)
    }

    /// Buffer a put of `count` elements of `datatype` read from `value`.
    /// The last put or delete of a key within one session wins.
    pub fn put_metadata(
        &mut self,
        key: &[u8],
        datatype: Datatype,
        count: u32,
        value: Option<&[u8]>,
    ) -> Result<()> {
        let state = self.write_state()?;
        if key.is_empty() {
            return Err(ArrayMetaError::InvalidArgument(
                "metadata key must not be empty".into(),
            ));
        }
        let bytes = value.ok_or_else(|| {
            ArrayMetaError::InvalidArgument("metadata value must not be null".into())
        })?;
        let value = MetadataValue::new(datatype, count, bytes.to_vec())?;
        state.buffer.insert(key.to_vec(), value);
        self.ctx.metrics().record_put();
        Ok(())
    }

    /// Typed form of [`put_metadata`](Self::put_metadata).
    pub fn put<T: Scalar>(&mut self, key: &[u8], values: &[T]) -> Result<()> {
        let value = MetadataValue::from_slice(values)?;
        self.put_value(key, value)
    }

    /// Buffer a put of an already built value.
    pub fn put_value(&mut self, key: &[u8], value: MetadataValue) -> Result<()> {
        self.put_metadata(
            key,
            value.datatype(),
            value.count(),
            Some(value.as_bytes()),
        )
    }

    /// Buffer a deletion. Deleting a key that never existed is not an error.
    pub fn delete_metadata(&mut self, key: &[u8]) -> Result<()> {
        let state = self.write_state()?;
        if key.is_empty() {
            return Err(ArrayMetaError::InvalidArgument(
                "metadata key must not be empty".into(),
            ));
        }
        state.buffer.delete(key.to_vec());
        self.ctx.metrics().record_delete();
        Ok(())
    }

    /// Value of `key`, or `None` if there is no such key.
    pub fn get_metadata(&mut self, key: &[u8]) -> Result<Option<MetadataValue>> {
        self.ctx.metrics().record_get();
        Ok(self.index()?.get(key).cloned())
    }

    /// Datatype of `key`, or `None` if there is no such key.
    pub fn has_metadata(&mut self, key: &[u8]) -> Result<Option<Datatype>> {
        Ok(self.index()?.get(key).map(MetadataValue::datatype))
    }

    /// Key and value at ordinal position `index`.
    pub fn get_metadata_from_index(&mut self, index: u64) -> Result<(Key, MetadataValue)> {
        self.ctx.metrics().record_get();
        let (key, value) = self.index()?.get_by_ordinal(index)?;
        Ok((key.to_vec(), value.clone()))
    }

    /// Number of live metadata keys.
    pub fn metadata_num(&mut self) -> Result<u64> {
        Ok(self.index()?.len() as u64)
    }

    /// All live entries in ordinal order.
    pub fn metadata_entries(&mut self) -> Result<Vec<(Key, MetadataValue)>> {
        Ok(self
            .index()?
            .iter()
            .map(|(k, v)| (k.to_vec(), v.clone()))
            .collect())
    }

    /// Consolidate the metadata fragments of the array at `uri` up to now.
    pub fn consolidate_metadata(
        ctx: &Context,
        uri: impl AsRef<Path>,
        key: Option<&EncryptionKey>,
    ) -> Result<ConsolidationReport> {
        let max_timestamp = ctx.clock().next_timestamp();
        consolidation::consolidate(ctx, uri, key, max_timestamp)
    }

    fn write_state(&mut self) -> Result<&mut OpenState> {
        match self.state.as_mut() {
            Some(state) if state.mode == QueryMode::Write => Ok(state),
            Some(_) => Err(ArrayMetaError::InvalidState(
                "array is not opened for writes".into(),
            )),
            None => Err(ArrayMetaError::InvalidState("array is not open".into())),
        }
    }

    /// The session index, built on first use.
    fn index(&mut self) -> Result<&MetadataIndex> {
        let state = match self.state.as_mut() {
            Some(state) if state.mode == QueryMode::Read => state,
            Some(_) => {
                return Err(ArrayMetaError::InvalidState(
                    "array is not opened for reads".into(),
                ))
            }
            None => return Err(ArrayMetaError::InvalidState("array is not open".into())),
        };
        let index = match state.index.take() {
            Some(index) => index,
            None => state.store.load_index(state.timestamp)?,
        };
        let index: &MetadataIndex = state.index.insert(index);
        Ok(index)
    }
}

impl Drop for Array {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Failed to flush metadata of {:?} on drop: {}", self.uri, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::clock::ManualClock;
    use std::sync::Arc;

    fn setup() -> (tempfile::TempDir, Context) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path()).with_sync_writes(false);
        let ctx = Context::with_clock(config, Arc::new(ManualClock::new(1_000))).unwrap();
        Array::create(&ctx, "arr", None).unwrap();
        (dir, ctx)
    }

    #[test]
    fn test_put_requires_write_mode() {
        let (_dir, ctx) = setup();
        let mut array = Array::open(&ctx, "arr", OpenOptions::read()).unwrap();
        assert!(matches!(
            array.put(b"key", &[5i32]),
            Err(ArrayMetaError::InvalidState(_))
        ));
        assert!(matches!(
            array.delete_metadata(b"key"),
            Err(ArrayMetaError::InvalidState(_))
        ));
    }

    #[test]
    fn test_get_requires_read_mode() {
        let (_dir, ctx) = setup();
        let mut array = Array::open(&ctx, "arr", OpenOptions::write()).unwrap();
        assert!(matches!(
            array.get_metadata(b"key"),
            Err(ArrayMetaError::InvalidState(_))
        ));
        assert!(matches!(
            array.metadata_num(),
            Err(ArrayMetaError::InvalidState(_))
        ));
    }

    #[test]
    fn test_closed_array_rejects_everything() {
        let (_dir, ctx) = setup();
        let mut array = Array::new(&ctx, "arr");
        assert!(!array.is_open());
        assert!(array.put(b"k", &[1u8]).is_err());
        assert!(array.get_metadata(b"k").is_err());
        assert!(matches!(array.reopen(), Err(ArrayMetaError::InvalidState(_))));
        assert!(array.close().is_ok());
    }

    #[test]
    fn test_double_open_and_write_timestamp() {
        let (_dir, ctx) = setup();
        let mut array = Array::open(&ctx, "arr", OpenOptions::read()).unwrap();
        assert!(matches!(
            array.open_with(OpenOptions::write()),
            Err(ArrayMetaError::InvalidState(_))
        ));
        array.close().unwrap();
        assert!(matches!(
            array.open_with(OpenOptions::write().timestamp(5)),
            Err(ArrayMetaError::InvalidState(_))
        ));
        assert!(!array.is_open());
    }

    #[test]
    fn test_invalid_put_arguments() {
        let (_dir, ctx) = setup();
        let mut array = Array::open(&ctx, "arr", OpenOptions::write()).unwrap();
        let v = 5i32.to_le_bytes();

        for result in [
            array.put_metadata(b"key", Datatype::Int32, 1, None),
            array.put_metadata(b"key", Datatype::Int32, 0, Some(&v)),
            array.put_metadata(b"key", Datatype::Any, 1, Some(&v)),
            array.put_metadata(b"", Datatype::Int32, 1, Some(&v)),
            array.put_metadata(b"key", Datatype::Int64, 1, Some(&v)),
        ] {
            assert!(matches!(result, Err(ArrayMetaError::InvalidArgument(_))));
        }
        array.put_metadata(b"key", Datatype::Int32, 1, Some(&v)).unwrap();
    }

    #[test]
    fn test_write_session_produces_one_fragment() {
        let (_dir, ctx) = setup();
        let mut array = Array::open(&ctx, "arr", OpenOptions::write()).unwrap();
        array.put(b"a", &[1i32]).unwrap();
        array.put(b"a", &[2i32]).unwrap();
        array.delete_metadata(b"b").unwrap();
        array.close().unwrap();

        let store = FragmentStore::open(&ctx, "arr", None).unwrap();
        let fragments = store.list_fragments(u64::MAX).unwrap();
        assert_eq!(fragments.len(), 1);
        assert_eq!(store.read_fragment(&fragments[0]).unwrap().len(), 2);
    }

    #[test]
    fn test_empty_write_session_writes_nothing() {
        let (_dir, ctx) = setup();
        let mut array = Array::open(&ctx, "arr", OpenOptions::write()).unwrap();
        array.close().unwrap();
        let store = FragmentStore::open(&ctx, "arr", None).unwrap();
        assert!(store.list_fragments(u64::MAX).unwrap().is_empty());
    }

    #[test]
    fn test_drop_flushes_pending_writes() {
        let (_dir, ctx) = setup();
        {
            let mut array = Array::open(&ctx, "arr", OpenOptions::write()).unwrap();
            array.put(b"kept", &[1.5f64]).unwrap();
        }
        let mut array = Array::open(&ctx, "arr", OpenOptions::read()).unwrap();
        assert_eq!(
            array.get_metadata(b"kept").unwrap().unwrap().to_vec::<f64>(),
            Some(vec![1.5])
        );
    }

    #[test]
    fn test_reopen_switches_mode() {
        let (_dir, ctx) = setup();
        let mut array = Array::open(&ctx, "arr", OpenOptions::write()).unwrap();
        array.put(b"x", &[1u16]).unwrap();
        array.reopen_with(Some(QueryMode::Read), None).unwrap();
        assert_eq!(array.mode(), Some(QueryMode::Read));
        assert_eq!(array.metadata_num().unwrap(), 1);
        assert_eq!(array.has_metadata(b"x").unwrap(), Some(Datatype::UInt16));
        assert_eq!(array.has_metadata(b"y").unwrap(), None);
    }
}
