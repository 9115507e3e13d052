use std::path::PathBuf;

use bitflags::bitflags;

use crate::common::types::{
    FsCacheConfig, FSCACHE_FLAG_CASE_SENSITIVE, FSCACHE_FLAG_MISSING_OBJECTS,
    FSCACHE_FLAG_MISSING_PATHS,
};

pub const DEFAULT_PATH_TABLE_SIZE: usize = 16381;
pub const DEFAULT_CHILD_HASH_THRESHOLD: usize = 16;
pub const DEFAULT_MAX_PATH: usize = 1024;
pub const DEFAULT_MAX_COMPONENT: usize = 255;

const ENV_CHILD_HASH_THRESHOLD: &str = "FSCACHE_CHILD_HASH_THRESHOLD";
const ENV_PATH_TABLE_SIZE: &str = "FSCACHE_PATH_TABLE_SIZE";

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CacheFlags: u32 {
        /// Materialize `Missing` objects for names that do not exist.
        const MISSING_OBJECTS = FSCACHE_FLAG_MISSING_OBJECTS;
        /// Remember negative lookup results in the path tables.
        const MISSING_PATHS = FSCACHE_FLAG_MISSING_PATHS;
        /// Compare names byte-exact instead of case-folded.
        const CASE_SENSITIVE = FSCACHE_FLAG_CASE_SENSITIVE;
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub flags: CacheFlags,
    /// Buckets per path table; 0 selects the environment or default value.
    pub path_table_size: usize,
    /// Child count above which a directory gets a hash index; 0 selects the
    /// environment or default value.
    pub child_hash_threshold: usize,
    pub max_path: usize,
    pub max_component: usize,
    /// Anchor for relative paths. `None` captures the working directory at
    /// cache creation.
    pub base_dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            flags: CacheFlags::empty(),
            path_table_size: 0,
            child_hash_threshold: 0,
            max_path: DEFAULT_MAX_PATH,
            max_component: DEFAULT_MAX_COMPONENT,
            base_dir: None,
        }
    }
}

impl CacheConfig {
    pub fn with_flags(flags: CacheFlags) -> Self {
        Self {
            flags,
            ..Self::default()
        }
    }

    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn child_hash_threshold(mut self, threshold: usize) -> Self {
        self.child_hash_threshold = threshold;
        self
    }

    pub fn path_table_size(mut self, size: usize) -> Self {
        self.path_table_size = size;
        self
    }

    /// Reads the C ABI config. `None` (a null pointer at the boundary)
    /// yields defaults; `size` gates fields added after the first revision.
    pub fn from_ffi(config: Option<&FsCacheConfig>) -> Self {
        let mut out = Self::default();
        let Some(cfg) = config else {
            return out;
        };
        out.flags = CacheFlags::from_bits_truncate(cfg.flags);
        if cfg.size as usize >= std::mem::size_of::<FsCacheConfig>() {
            out.path_table_size = cfg.path_table_size as usize;
            out.child_hash_threshold = cfg.child_hash_threshold as usize;
        }
        out
    }

    pub(crate) fn resolved_path_table_size(&self) -> usize {
        resolve_sized(self.path_table_size, ENV_PATH_TABLE_SIZE, DEFAULT_PATH_TABLE_SIZE)
    }

    pub(crate) fn resolved_child_hash_threshold(&self) -> usize {
        resolve_sized(
            self.child_hash_threshold,
            ENV_CHILD_HASH_THRESHOLD,
            DEFAULT_CHILD_HASH_THRESHOLD,
        )
    }

    pub(crate) fn resolved_base_dir(&self) -> PathBuf {
        match &self.base_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
        }
    }
}

fn resolve_sized(configured: usize, env_key: &str, default: usize) -> usize {
    if configured > 0 {
        return configured;
    }
    match std::env::var(env_key) {
        Ok(value) => value
            .parse::<usize>()
            .ok()
            .filter(|v| *v > 0)
            .unwrap_or(default),
        Err(_) => default,
    }
}
