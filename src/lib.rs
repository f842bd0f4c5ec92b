//! ARRAYMETA - Versioned Array Metadata Store
//!
//! An append-only key/value store for array metadata, layered on
//! immutable, timestamped fragments.
//!
//! ## Features
//! - **Fragments**: every write session persists one immutable, CRC-checked batch
//! - **Time travel**: read the metadata as it was at any past timestamp
//! - **Consolidation**: merge fragments into one, dropping deletion markers
//! - **Encryption**: optional AES-256-GCM per array
//! - **Ordinal access**: entries by position in replay order
//! - **Metrics**: lock-free atomic counters for observability
//!
//! ## Example
//! ```no_run
//! use arraymeta::config::Config;
//! use arraymeta::engine::{Array, Context, OpenOptions};
//!
//! let ctx = Context::new(Config::default()).unwrap();
//! Array::create(&ctx, "my_array", None).unwrap();
//!
//! let mut array = Array::open(&ctx, "my_array", OpenOptions::write()).unwrap();
//! array.put(b"aaa", &[5i32]).unwrap();
//! array.put(b"bb", &[1.1f32, 1.2f32]).unwrap();
//! array.close().unwrap();
//!
//! array.open_with(OpenOptions::read()).unwrap();
//! assert_eq!(array.metadata_num().unwrap(), 2);
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod types;
