use std::io;

use crate::common::types::FsCacheStatus;

/// Failure of a lookup. None of these are fatal to the cache itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum LookupError {
    #[error("a path component was not found")]
    PathCompNotFound,
    #[error("a path component is not a directory")]
    PathCompNotDir,
    #[error("the final path entry is not a directory")]
    NotDir,
    #[error("not found")]
    NotFound,
    #[error("the path is too long")]
    PathTooLong,
    #[error("unsupported path type")]
    Unsupported,
    #[error("out of memory")]
    OutOfMemory,
    #[error("error opening directory")]
    DirOpenError,
    #[error("error reading directory")]
    DirReadError,
    #[error("UTF-16 to narrow conversion error")]
    AnsiConversionError,
    #[error("narrow to UTF-16 conversion error")]
    Utf16ConversionError,
    #[error("internal error")]
    InternalError,
}

impl LookupError {
    pub fn status(self) -> FsCacheStatus {
        match self {
            LookupError::PathCompNotFound => FsCacheStatus::PathCompNotFound,
            LookupError::PathCompNotDir => FsCacheStatus::PathCompNotDir,
            LookupError::NotDir => FsCacheStatus::NotDir,
            LookupError::NotFound => FsCacheStatus::NotFound,
            LookupError::PathTooLong => FsCacheStatus::PathTooLong,
            LookupError::Unsupported => FsCacheStatus::Unsupported,
            LookupError::OutOfMemory => FsCacheStatus::OutOfMemory,
            LookupError::DirOpenError => FsCacheStatus::DirOpenError,
            LookupError::DirReadError => FsCacheStatus::DirReadError,
            LookupError::AnsiConversionError => FsCacheStatus::AnsiConversionError,
            LookupError::Utf16ConversionError => FsCacheStatus::Utf16ConversionError,
            LookupError::InternalError => FsCacheStatus::InternalError,
        }
    }

    /// Results that describe the filesystem rather than a transient failure.
    /// Only these may be remembered as negative path entries.
    pub fn is_negative_result(self) -> bool {
        matches!(
            self,
            LookupError::PathCompNotFound
                | LookupError::PathCompNotDir
                | LookupError::NotDir
                | LookupError::NotFound
        )
    }
}

/// Failure reported by a [`crate::FsBackend`] primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("entry does not exist")]
    NotFound,
    #[error("entry is not a directory")]
    NotDirectory,
    #[error("permission denied")]
    PermissionDenied,
    #[error("open failed: {0:?}")]
    Open(io::ErrorKind),
    #[error("read failed: {0:?}")]
    Read(io::ErrorKind),
}

impl BackendError {
    pub fn from_open(err: &io::Error) -> Self {
        if err.raw_os_error() == Some(libc::ENOTDIR) {
            return BackendError::NotDirectory;
        }
        match err.kind() {
            io::ErrorKind::NotFound => BackendError::NotFound,
            io::ErrorKind::PermissionDenied => BackendError::PermissionDenied,
            kind => BackendError::Open(kind),
        }
    }

    pub fn from_read(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => BackendError::PermissionDenied,
            kind => BackendError::Read(kind),
        }
    }
}

impl From<BackendError> for LookupError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotFound => LookupError::PathCompNotFound,
            BackendError::NotDirectory => LookupError::PathCompNotDir,
            BackendError::PermissionDenied | BackendError::Read(_) => LookupError::DirReadError,
            BackendError::Open(_) => LookupError::DirOpenError,
        }
    }
}
