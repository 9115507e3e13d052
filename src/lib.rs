//! Filesystem metadata cache.
//!
//! Resolves paths to shared, refcounted cache objects, remembers whole-path
//! results, and invalidates everything at once through two generation
//! counters. Names compare case-insensitively unless configured otherwise.

mod cache;
mod common;
mod config;
mod error;
mod ffi;
mod logging;

pub use crate::cache::arena::ObjHandle;
pub use crate::cache::backend::{DirEntryInfo, DirListing, FsBackend, StdBackend};
pub use crate::cache::dir::DirStamp;
pub use crate::cache::engine::{CacheStats, FsCache};
pub use crate::cache::object::{ObjInfo, ObjKind, ObjStat, VolumeFlags};
pub use crate::common::types::*;
pub use crate::common::unicode::{fold_key, names_equal_folded};
pub use crate::config::{
    CacheConfig, CacheFlags, DEFAULT_CHILD_HASH_THRESHOLD, DEFAULT_MAX_COMPONENT, DEFAULT_MAX_PATH,
    DEFAULT_PATH_TABLE_SIZE,
};
pub use crate::error::{BackendError, LookupError};
pub use crate::ffi::*;
pub use crate::logging::{
    log_disable, log_set_callback, log_set_hook, log_set_level, log_set_stderr, FsLogCallback,
    LogHook,
};
