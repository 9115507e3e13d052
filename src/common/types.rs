use core::ffi::c_char;

#[repr(i32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FsCacheStatus {
    Ok = 0,
    PathCompNotFound = 1,
    PathCompNotDir = 2,
    NotDir = 3,
    NotFound = 4,
    PathTooLong = 5,
    Unsupported = 6,
    OutOfMemory = 7,
    DirOpenError = 8,
    DirReadError = 9,
    AnsiConversionError = 10,
    Utf16ConversionError = 11,
    InternalError = 12,
    InvalidArgument = 13,
    IoError = 14,
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FsObjType {
    Invalid = 0,
    Dir = 1,
    File = 2,
    Other = 3,
    Missing = 4,
}

#[repr(i32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FsLogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct FsCacheConfig {
    pub size: u32,
    pub flags: u32,
    pub path_table_size: u32,
    pub child_hash_threshold: u32,
    pub reserved: [u64; 4],
}

impl Default for FsCacheConfig {
    fn default() -> Self {
        Self {
            size: std::mem::size_of::<FsCacheConfig>() as u32,
            flags: 0,
            path_table_size: 0,
            child_hash_threshold: 0,
            reserved: [0; 4],
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct FsStringView {
    pub ptr: *const c_char,
    pub len: usize,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct FsWideStringView {
    pub ptr: *const u16,
    pub len: usize,
}

#[repr(C)]
#[derive(Copy, Clone, Default, Debug)]
pub struct FsCacheStats {
    pub size: u32,
    pub gen_existing: u32,
    pub gen_missing: u32,
    pub objects: u64,
    pub objects_created: u64,
    pub objects_freed: u64,
    pub lookups: u64,
    pub path_hits: u64,
    pub walk_hits: u64,
    pub narrow_paths: u64,
    pub wide_paths: u64,
    pub path_collisions: u64,
    pub populations: u64,
    pub repopulations: u64,
    pub stamp_validations: u64,
    pub name_collisions: u64,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct FsLogRecord {
    pub level: FsLogLevel,
    pub target: FsStringView,
    pub message: FsStringView,
    pub file: FsStringView,
    pub line: u32,
}

pub const FSCACHE_FLAG_MISSING_OBJECTS: u32 = 1 << 0;
pub const FSCACHE_FLAG_MISSING_PATHS: u32 = 1 << 1;
pub const FSCACHE_FLAG_CASE_SENSITIVE: u32 = 1 << 2;

/// Opaque object handle as seen across the C ABI. Zero is never a valid handle.
pub type FsObjHandle = u64;
