use std::sync::atomic::{AtomicU32, Ordering};
use std::time::SystemTime;

use bitflags::bitflags;

use super::arena::ObjHandle;
use super::dir::DirState;
use super::names::ObjNames;
use crate::common::types::FsObjType;

/// Generation value exempting an object from generation checks.
pub const GEN_IGNORE: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjKind {
    Directory,
    File,
    Other,
    /// Cached negative result.
    Missing,
}

impl ObjKind {
    pub fn to_ffi(self) -> FsObjType {
        match self {
            ObjKind::Directory => FsObjType::Dir,
            ObjKind::File => FsObjType::File,
            ObjKind::Other => FsObjType::Other,
            ObjKind::Missing => FsObjType::Missing,
        }
    }
}

bitflags! {
    /// Properties of the volume an object lives on, inherited from the parent
    /// unless a device boundary is crossed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct VolumeFlags: u32 {
        /// Directory mtime changes whenever a child is added or removed, so an
        /// unchanged directory stamp proves an unchanged listing.
        const DIR_MTIME_TRACKS_CHILDREN = 1 << 0;
        /// The volume maintains 8.3 short names.
        const SHORT_NAMES = 1 << 1;
    }
}

/// Attribute snapshot, filled on first request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjStat {
    pub size: u64,
    pub mtime: Option<SystemTime>,
    pub mode: u32,
    pub dev: u64,
    pub ino: u64,
    pub readonly: bool,
}

pub(crate) struct CacheObject {
    refs: AtomicU32,
    pub generation: u32,
    pub kind: ObjKind,
    pub volume: VolumeFlags,
    /// Non-owning back reference; `None` only for the root.
    pub parent: Option<ObjHandle>,
    pub names: ObjNames,
    pub stat: Option<ObjStat>,
    /// Present exactly when `kind` is `Directory`.
    pub dir: Option<Box<DirState>>,
}

impl CacheObject {
    pub fn new(
        parent: Option<ObjHandle>,
        names: ObjNames,
        kind: ObjKind,
        generation: u32,
        volume: VolumeFlags,
    ) -> Self {
        let dir = (kind == ObjKind::Directory).then(|| Box::new(DirState::new()));
        Self {
            refs: AtomicU32::new(1),
            generation,
            kind,
            volume,
            parent,
            names,
            stat: None,
            dir,
        }
    }

    pub fn refs(&self) -> u32 {
        self.refs.load(Ordering::Acquire)
    }

    pub fn retain(&self) -> u32 {
        self.refs.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drops one reference unless it is the last one. Safe under a shared
    /// lock because the count cannot reach zero here.
    pub fn release_unless_last(&self) -> Option<u32> {
        self.refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |refs| {
                (refs > 1).then(|| refs - 1)
            })
            .ok()
            .map(|prev| prev - 1)
    }

    /// Drops one reference; requires exclusive access to the object graph.
    /// `None` means the count was already zero.
    pub fn release_exclusive(&self) -> Option<u32> {
        self.refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |refs| refs.checked_sub(1))
            .ok()
            .map(|prev| prev - 1)
    }

    /// Turns a `Missing` node into the kind it was found to be, keeping its
    /// identity. Names are left to the caller.
    pub fn metamorphose(&mut self, kind: ObjKind, generation: u32) {
        self.kind = kind;
        self.generation = generation;
        self.stat = None;
        self.dir = (kind == ObjKind::Directory).then(|| Box::new(DirState::new()));
    }

    pub fn is_dir(&self) -> bool {
        self.kind == ObjKind::Directory
    }
}

/// Read-only view of an object handed to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjInfo {
    pub kind: ObjKind,
    pub name: String,
    pub short_name: Option<String>,
    pub generation: u32,
    pub refs: u32,
    pub volume: VolumeFlags,
}
