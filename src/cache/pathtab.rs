//! Whole-path result tables.
//!
//! Keys are the path strings exactly as callers passed them. Buckets are
//! chained and the bucket count is fixed at creation.

use std::hash::Hasher;

use fnv::FnvHasher;

use super::arena::ObjHandle;
use crate::error::LookupError;

pub trait PathKey: Eq {
    fn path_hash(&self) -> u32;
    fn to_boxed(&self) -> Box<Self>;
}

impl PathKey for str {
    fn path_hash(&self) -> u32 {
        let mut hasher = FnvHasher::default();
        hasher.write(self.as_bytes());
        fold64(hasher.finish())
    }

    fn to_boxed(&self) -> Box<Self> {
        self.into()
    }
}

impl PathKey for [u16] {
    fn path_hash(&self) -> u32 {
        let mut hasher = FnvHasher::default();
        for unit in self {
            hasher.write_u16(*unit);
        }
        fold64(hasher.finish())
    }

    fn to_boxed(&self) -> Box<Self> {
        self.into()
    }
}

fn fold64(value: u64) -> u32 {
    (value ^ (value >> 32)) as u32
}

/// Stored outcome of a lookup. `Object` owns one reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathResult {
    Object(ObjHandle),
    Error(LookupError),
}

#[derive(Debug)]
pub struct PathEntry<K: ?Sized> {
    hash: u32,
    pub generation: u32,
    /// Stamped against the missing-object counter rather than the
    /// existing-object one.
    pub negative: bool,
    pub result: PathResult,
    key: Box<K>,
}

#[derive(Debug)]
pub struct PathTable<K: ?Sized> {
    buckets: Vec<Vec<PathEntry<K>>>,
    entries: usize,
    collisions: u64,
}

impl<K: PathKey + ?Sized> PathTable<K> {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let mut buckets = Vec::with_capacity(size);
        buckets.resize_with(size, Vec::new);
        Self {
            buckets,
            entries: 0,
            collisions: 0,
        }
    }

    fn slot(&self, hash: u32) -> usize {
        hash as usize % self.buckets.len()
    }

    pub fn get(&self, key: &K, hash: u32) -> Option<&PathEntry<K>> {
        self.buckets[self.slot(hash)]
            .iter()
            .find(|entry| entry.hash == hash && *entry.key == *key)
    }

    /// Stores `result` under `key`, returning the result it replaced so the
    /// caller can release any reference it held.
    pub fn insert(
        &mut self,
        key: &K,
        hash: u32,
        generation: u32,
        negative: bool,
        result: PathResult,
    ) -> Result<Option<PathResult>, LookupError> {
        let slot = self.slot(hash);
        let bucket = &mut self.buckets[slot];
        if let Some(entry) = bucket
            .iter_mut()
            .find(|entry| entry.hash == hash && *entry.key == *key)
        {
            entry.generation = generation;
            entry.negative = negative;
            return Ok(Some(std::mem::replace(&mut entry.result, result)));
        }
        bucket.try_reserve(1).map_err(|_| LookupError::OutOfMemory)?;
        if !bucket.is_empty() {
            self.collisions += 1;
        }
        bucket.push(PathEntry {
            hash,
            generation,
            negative,
            result,
            key: key.to_boxed(),
        });
        self.entries += 1;
        Ok(None)
    }

    pub fn remove(&mut self, key: &K, hash: u32) -> Option<PathResult> {
        let slot = self.slot(hash);
        let bucket = &mut self.buckets[slot];
        let pos = bucket
            .iter()
            .position(|entry| entry.hash == hash && *entry.key == *key)?;
        self.entries -= 1;
        Some(bucket.swap_remove(pos).result)
    }

    /// Removes every entry, returning the stored results.
    pub fn drain(&mut self) -> Vec<PathResult> {
        let mut results = Vec::with_capacity(self.entries);
        for bucket in &mut self.buckets {
            results.extend(bucket.drain(..).map(|entry| entry.result));
        }
        self.entries = 0;
        results
    }

    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn collisions(&self) -> u64 {
        self.collisions
    }
}
