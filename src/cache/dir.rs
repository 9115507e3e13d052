//! Directory node state: ordered children plus an optional hash index.
//!
//! The child vector is the authoritative enumeration order. Once a directory
//! grows past the promotion threshold a chained hash index is built over all
//! children at once; from then on it is maintained alongside the vector and
//! only consulted for lookups.

use std::fs::Metadata;

use super::arena::{Arena, ObjHandle};
use super::object::CacheObject;
use crate::common::unicode::{exact_hash, fold_hash, names_equal_folded};
use crate::error::LookupError;

/// How names on a volume compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameRule {
    CaseFolded,
    Exact,
}

impl NameRule {
    pub fn hash(self, name: &str) -> u32 {
        match self {
            NameRule::CaseFolded => fold_hash(name),
            NameRule::Exact => exact_hash(name),
        }
    }

    pub fn eq(self, a: &str, b: &str) -> bool {
        match self {
            NameRule::CaseFolded => names_equal_folded(a, b),
            NameRule::Exact => a == b,
        }
    }
}

/// Identity and change stamp of an enumerated directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirStamp {
    pub dev: u64,
    pub ino: u64,
    pub mtime_sec: i64,
    pub mtime_nsec: i64,
    pub ctime_sec: i64,
    pub ctime_nsec: i64,
}

impl DirStamp {
    #[cfg(unix)]
    pub fn from_meta(meta: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
            mtime_sec: meta.mtime(),
            mtime_nsec: meta.mtime_nsec(),
            ctime_sec: meta.ctime(),
            ctime_nsec: meta.ctime_nsec(),
        }
    }

    #[cfg(not(unix))]
    pub fn from_meta(meta: &Metadata) -> Self {
        let (mtime_sec, mtime_nsec) = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| (d.as_secs() as i64, d.subsec_nanos() as i64))
            .unwrap_or((0, 0));
        Self {
            mtime_sec,
            mtime_nsec,
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
struct ChildIndex {
    buckets: Vec<Vec<(u32, ObjHandle)>>,
    entries: usize,
}

impl ChildIndex {
    fn with_capacity(children: usize) -> Self {
        let size = (children * 2).next_power_of_two().max(16);
        Self {
            buckets: vec![Vec::new(); size],
            entries: 0,
        }
    }

    fn insert(&mut self, hash: u32, handle: ObjHandle) {
        let slot = hash as usize & (self.buckets.len() - 1);
        self.buckets[slot].push((hash, handle));
        self.entries += 1;
    }

    fn candidates(&self, hash: u32) -> impl Iterator<Item = ObjHandle> + '_ {
        let slot = hash as usize & (self.buckets.len() - 1);
        self.buckets[slot]
            .iter()
            .filter(move |(h, _)| *h == hash)
            .map(|(_, handle)| *handle)
    }

    fn overloaded(&self) -> bool {
        self.entries > self.buckets.len() * 2
    }
}

#[derive(Debug, Default)]
pub struct DirState {
    children: Vec<ObjHandle>,
    index: Option<ChildIndex>,
    pub populated: bool,
    /// Stamp of the last enumeration; stands in for an open directory handle.
    pub stamp: Option<DirStamp>,
    pub dev: u64,
    /// `gen_existing` the listing was last enumerated or stamp-checked under.
    pub generation: u32,
    /// `gen_missing` the listing was last checked for new entries under.
    pub missing_checked: u32,
}

impl DirState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn children(&self) -> &[ObjHandle] {
        &self.children
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    #[cfg(test)]
    pub fn is_indexed(&self) -> bool {
        self.index.is_some()
    }

    /// First child whose long or short name matches `name` under `rule`.
    pub fn find_child(
        &self,
        objects: &Arena<CacheObject>,
        name: &str,
        rule: NameRule,
    ) -> Option<ObjHandle> {
        let matches = |handle: &ObjHandle| {
            objects.get(*handle).is_some_and(|obj| {
                rule.eq(obj.names.long.narrow(), name)
                    || obj
                        .names
                        .short
                        .as_ref()
                        .is_some_and(|short| rule.eq(short.narrow(), name))
            })
        };
        match &self.index {
            Some(index) => index.candidates(rule.hash(name)).find(matches),
            None => self.children.iter().copied().find(matches),
        }
    }

    /// Appends `child`, rejecting names that collide with an existing child
    /// under `rule`. Crossing `threshold` builds the hash index.
    pub fn add_child(
        &mut self,
        objects: &Arena<CacheObject>,
        child: ObjHandle,
        rule: NameRule,
        threshold: usize,
    ) -> Result<(), LookupError> {
        let obj = objects.get(child).ok_or(LookupError::InternalError)?;
        let long = obj.names.long.narrow();
        let short = obj.names.short.as_ref().map(|s| s.narrow());
        if self.find_child(objects, long, rule).is_some()
            || short.is_some_and(|s| self.find_child(objects, s, rule).is_some())
        {
            return Err(LookupError::InternalError);
        }

        self.children
            .try_reserve(1)
            .map_err(|_| LookupError::OutOfMemory)?;
        self.children.push(child);

        match &mut self.index {
            Some(index) => {
                index.insert(rule.hash(long), child);
                if let Some(short) = short {
                    index.insert(rule.hash(short), child);
                }
                if index.overloaded() {
                    self.rebuild_index(objects, rule);
                }
            }
            None if self.children.len() > threshold => self.rebuild_index(objects, rule),
            None => {}
        }
        Ok(())
    }

    /// Unlinks every child for which `remove` returns true, returning them in
    /// enumeration order. The caller owns the released references.
    pub fn unlink_children<F>(
        &mut self,
        objects: &Arena<CacheObject>,
        rule: NameRule,
        mut remove: F,
    ) -> Vec<ObjHandle>
    where
        F: FnMut(ObjHandle) -> bool,
    {
        let mut removed = Vec::new();
        self.children.retain(|handle| {
            if remove(*handle) {
                removed.push(*handle);
                false
            } else {
                true
            }
        });
        if !removed.is_empty() && self.index.is_some() {
            self.rebuild_index(objects, rule);
        }
        removed
    }

    /// Empties the child vector, handing every reference to the caller.
    pub fn take_children(&mut self) -> Vec<ObjHandle> {
        self.index = None;
        std::mem::take(&mut self.children)
    }

    /// Rehashes an indexed directory after children were renamed in place.
    pub fn reindex(&mut self, objects: &Arena<CacheObject>, rule: NameRule) {
        if self.index.is_some() {
            self.rebuild_index(objects, rule);
        }
    }

    fn rebuild_index(&mut self, objects: &Arena<CacheObject>, rule: NameRule) {
        let mut index = ChildIndex::with_capacity(self.children.len());
        for &handle in &self.children {
            let Some(obj) = objects.get(handle) else {
                continue;
            };
            index.insert(rule.hash(obj.names.long.narrow()), handle);
            if let Some(short) = &obj.names.short {
                index.insert(rule.hash(short.narrow()), handle);
            }
        }
        self.index = Some(index);
    }
}
