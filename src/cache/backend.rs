//! The operating-system primitives the cache calls into.
//!
//! The cache never touches the filesystem directly; it goes through an
//! [`FsBackend`]. [`StdBackend`] implements it over `std::fs`.

use std::fs;
use std::io;
use std::path::Path;

use super::dir::DirStamp;
use super::object::{ObjKind, ObjStat, VolumeFlags};
use crate::error::BackendError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: String,
    pub short_name: Option<String>,
    pub kind: ObjKind,
}

impl DirEntryInfo {
    pub fn new(name: impl Into<String>, kind: ObjKind) -> Self {
        Self {
            name: name.into(),
            short_name: None,
            kind,
        }
    }

    pub fn with_short_name(mut self, short: impl Into<String>) -> Self {
        self.short_name = Some(short.into());
        self
    }
}

/// Complete result of enumerating one directory.
#[derive(Debug, Clone, Default)]
pub struct DirListing {
    pub stamp: DirStamp,
    pub entries: Vec<DirEntryInfo>,
    /// Entries dropped because their names are not valid Unicode.
    pub skipped: usize,
}

pub trait FsBackend: Send + Sync {
    /// Enumerates `path`. All-or-nothing: partial listings are never returned.
    fn read_dir(&self, path: &Path) -> Result<DirListing, BackendError>;

    /// Current stamp of the directory at `path`, without enumerating it.
    fn dir_stamp(&self, path: &Path) -> Result<DirStamp, BackendError>;

    /// Kind of the entry at `path`, or `None` if nothing is there.
    fn probe(&self, path: &Path) -> Result<Option<ObjKind>, BackendError>;

    fn stat(&self, path: &Path) -> Result<ObjStat, BackendError>;

    fn volume_flags(&self, path: &Path) -> VolumeFlags;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StdBackend;

fn kind_of(meta: &fs::Metadata) -> ObjKind {
    let file_type = meta.file_type();
    if file_type.is_dir() {
        ObjKind::Directory
    } else if file_type.is_file() {
        ObjKind::File
    } else {
        ObjKind::Other
    }
}

fn is_absent(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotFound || err.raw_os_error() == Some(libc::ENOTDIR)
}

impl FsBackend for StdBackend {
    fn read_dir(&self, path: &Path) -> Result<DirListing, BackendError> {
        let meta = fs::metadata(path).map_err(|err| BackendError::from_open(&err))?;
        if !meta.is_dir() {
            return Err(BackendError::NotDirectory);
        }
        let stamp = DirStamp::from_meta(&meta);
        let reader = fs::read_dir(path).map_err(|err| BackendError::from_open(&err))?;

        let mut listing = DirListing {
            stamp,
            ..DirListing::default()
        };
        for entry in reader {
            let entry = entry.map_err(|err| BackendError::from_read(&err))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                listing.skipped += 1;
                continue;
            };
            let file_type = entry
                .file_type()
                .map_err(|err| BackendError::from_read(&err))?;
            let kind = if file_type.is_symlink() {
                // Resolution follows links; a dangling link is just "other".
                match fs::metadata(entry.path()) {
                    Ok(meta) => kind_of(&meta),
                    Err(_) => ObjKind::Other,
                }
            } else if file_type.is_dir() {
                ObjKind::Directory
            } else if file_type.is_file() {
                ObjKind::File
            } else {
                ObjKind::Other
            };
            listing.entries.push(DirEntryInfo::new(name, kind));
        }
        Ok(listing)
    }

    fn dir_stamp(&self, path: &Path) -> Result<DirStamp, BackendError> {
        let meta = fs::metadata(path).map_err(|err| BackendError::from_open(&err))?;
        if !meta.is_dir() {
            return Err(BackendError::NotDirectory);
        }
        Ok(DirStamp::from_meta(&meta))
    }

    fn probe(&self, path: &Path) -> Result<Option<ObjKind>, BackendError> {
        match fs::metadata(path) {
            Ok(meta) => Ok(Some(kind_of(&meta))),
            Err(err) if is_absent(&err) => Ok(None),
            Err(err) => Err(BackendError::from_open(&err)),
        }
    }

    fn stat(&self, path: &Path) -> Result<ObjStat, BackendError> {
        let meta = fs::metadata(path).map_err(|err| BackendError::from_open(&err))?;
        Ok(stat_from_meta(&meta))
    }

    fn volume_flags(&self, _path: &Path) -> VolumeFlags {
        if cfg!(unix) {
            VolumeFlags::DIR_MTIME_TRACKS_CHILDREN
        } else {
            VolumeFlags::empty()
        }
    }
}

#[cfg(unix)]
fn stat_from_meta(meta: &fs::Metadata) -> ObjStat {
    use std::os::unix::fs::MetadataExt;
    ObjStat {
        size: meta.len(),
        mtime: meta.modified().ok(),
        mode: meta.mode(),
        dev: meta.dev(),
        ino: meta.ino(),
        readonly: meta.permissions().readonly(),
    }
}

#[cfg(not(unix))]
fn stat_from_meta(meta: &fs::Metadata) -> ObjStat {
    ObjStat {
        size: meta.len(),
        mtime: meta.modified().ok(),
        mode: 0,
        dev: 0,
        ino: 0,
        readonly: meta.permissions().readonly(),
    }
}
