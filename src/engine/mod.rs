//! ARRAYMETA - Metadata Engine Module
//! Top-level module for the fragment-based metadata components.

pub mod buffer;
pub mod clock;
pub mod codec;
pub mod consolidation;
pub mod crypto;
pub mod fragment;
pub mod index;
pub mod metrics;
pub mod schema;
pub mod session;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::types::Timestamp;

use self::clock::{Clock, MonotonicClock, WriteTimestamps};
use self::metrics::EngineMetrics;

pub use self::consolidation::ConsolidationReport;
pub use self::crypto::{EncryptionKey, EncryptionType};
pub use self::session::{Array, OpenOptions};

/// Shared state for every array session of a process: configuration,
/// the fragment timestamp clock, and metrics.
///
/// Cloning is cheap; clones share the same clock, so fragments written
/// through any of them are strictly ordered.
#[derive(Clone)]
pub struct Context {
    config: Arc<Config>,
    timestamps: Arc<WriteTimestamps>,
    metrics: Arc<EngineMetrics>,
}

impl Context {
    /// Create a context backed by the wall clock.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    /// Create a context with an explicit clock.
    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        config.ensure_dirs()?;
        log::info!("ArrayMeta context ready at {:?}", config.data_dir);
        Ok(Self {
            config: Arc::new(config),
            timestamps: Arc::new(WriteTimestamps::new(clock)),
            metrics: Arc::new(EngineMetrics::new()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        self.timestamps.clock()
    }

    /// Fragment timestamp issuer shared by every store of this context.
    pub fn timestamps(&self) -> &Arc<WriteTimestamps> {
        &self.timestamps
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    /// Current time as seen by fragment ordering.
    ///
    /// Time-travel timestamps must come from here rather than the wall
    /// clock: fragment timestamps can run ahead of wall time, and a wall
    /// reading taken right after a close may precede the fragment just
    /// written.
    pub fn now_ms(&self) -> Timestamp {
        self.timestamps.clock().now_ms()
    }

    /// Resolve an array URI against the data directory.
    pub fn array_path(&self, uri: impl AsRef<Path>) -> PathBuf {
        self.config.array_path(uri)
    }
}
