//! The cache proper: whole-path tables in front of a lazily populated
//! object tree.
//!
//! All mutable state sits behind one `parking_lot::RwLock`. Path-table hits
//! are served under the shared lock; everything else takes the exclusive
//! lock, which is dropped around every filesystem call. A directory being
//! enumerated is retained across that gap, and a listing that lost the race
//! to a concurrent population is discarded.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use fnv::FnvHashSet;
use log::{debug, trace, warn};
use parking_lot::{RwLock, RwLockWriteGuard};

use super::arena::{Arena, ObjHandle};
use super::backend::{DirListing, FsBackend, StdBackend};
use super::dir::{DirStamp, DirState, NameRule};
use super::names::{ObjNames, ParentLengths};
use super::object::{CacheObject, ObjInfo, ObjKind, ObjStat, VolumeFlags, GEN_IGNORE};
use super::parser::{parse_path, Anchor};
use super::pathtab::{PathKey, PathResult, PathTable};
use crate::common::types::FsCacheStats;
use crate::common::unicode::narrow_from_wide;
use crate::config::{CacheConfig, CacheFlags};
use crate::error::{BackendError, LookupError};

const POSIX_ANCHOR: &str = "/";

#[derive(Debug, Default)]
struct Counters {
    objects_created: AtomicU64,
    objects_freed: AtomicU64,
    lookups: AtomicU64,
    path_hits: AtomicU64,
    walk_hits: AtomicU64,
    populations: AtomicU64,
    repopulations: AtomicU64,
    stamp_validations: AtomicU64,
    name_collisions: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn load(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

/// Snapshot of the cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub gen_existing: u32,
    pub gen_missing: u32,
    /// Live objects, including the root.
    pub objects: u64,
    pub objects_created: u64,
    pub objects_freed: u64,
    pub lookups: u64,
    /// Lookups answered from a path table.
    pub path_hits: u64,
    /// Lookups answered by walking the object tree.
    pub walk_hits: u64,
    pub narrow_paths: u64,
    pub wide_paths: u64,
    pub path_collisions: u64,
    pub populations: u64,
    pub repopulations: u64,
    /// Stale directories revalidated by stamp alone.
    pub stamp_validations: u64,
    pub name_collisions: u64,
}

impl From<CacheStats> for FsCacheStats {
    fn from(stats: CacheStats) -> Self {
        FsCacheStats {
            size: std::mem::size_of::<FsCacheStats>() as u32,
            gen_existing: stats.gen_existing,
            gen_missing: stats.gen_missing,
            objects: stats.objects,
            objects_created: stats.objects_created,
            objects_freed: stats.objects_freed,
            lookups: stats.lookups,
            path_hits: stats.path_hits,
            walk_hits: stats.walk_hits,
            narrow_paths: stats.narrow_paths,
            wide_paths: stats.wide_paths,
            path_collisions: stats.path_collisions,
            populations: stats.populations,
            repopulations: stats.repopulations,
            stamp_validations: stats.stamp_validations,
            name_collisions: stats.name_collisions,
        }
    }
}

struct CacheState {
    objects: Arena<CacheObject>,
    root: ObjHandle,
    gen_existing: u32,
    gen_missing: u32,
    narrow_paths: PathTable<str>,
    wide_paths: PathTable<[u16]>,
    torn_down: bool,
}

impl CacheState {
    fn current_generation(&self, kind: ObjKind) -> u32 {
        if kind == ObjKind::Missing {
            self.gen_missing
        } else {
            self.gen_existing
        }
    }

    fn is_current(&self, obj: &CacheObject) -> bool {
        obj.generation == GEN_IGNORE || obj.generation == self.current_generation(obj.kind)
    }

    fn object(&self, handle: ObjHandle) -> Result<&CacheObject, LookupError> {
        self.objects.get(handle).ok_or(LookupError::InternalError)
    }

    fn object_mut(&mut self, handle: ObjHandle) -> Result<&mut CacheObject, LookupError> {
        self.objects.get_mut(handle).ok_or(LookupError::InternalError)
    }

    /// Objects from the anchor down to `handle`, root excluded.
    fn chain(&self, handle: ObjHandle) -> Result<Vec<&CacheObject>, LookupError> {
        let mut chain = Vec::new();
        let mut cursor = Some(handle);
        while let Some(current) = cursor {
            if current == self.root {
                break;
            }
            let obj = self.object(current)?;
            chain.push(obj);
            cursor = obj.parent;
        }
        chain.reverse();
        Ok(chain)
    }

    fn narrow_path(&self, handle: ObjHandle, short: bool) -> Result<String, LookupError> {
        let chain = self.chain(handle)?;
        let capacity = chain.last().map_or(0, |obj| {
            let (parent, own) = if short {
                (obj.names.parent.cch_short, obj.names.short_or_long().cch())
            } else {
                (obj.names.parent.cch, obj.names.long.cch())
            };
            parent as usize + 1 + own
        });
        let mut out = String::with_capacity(capacity);
        for obj in chain {
            if obj.names.needs_separator() {
                out.push('/');
            }
            let forms = if short {
                obj.names.short_or_long()
            } else {
                &obj.names.long
            };
            out.push_str(forms.narrow());
        }
        Ok(out)
    }

    fn wide_path(&self, handle: ObjHandle) -> Result<Vec<u16>, LookupError> {
        let chain = self.chain(handle)?;
        let capacity = chain
            .last()
            .map_or(0, |obj| obj.names.parent.cwc as usize + 1 + obj.names.long.cwc());
        let mut out = Vec::with_capacity(capacity);
        for obj in chain {
            if obj.names.needs_separator() {
                out.push(u16::from(b'/'));
            }
            out.extend_from_slice(obj.names.long.wide());
        }
        Ok(out)
    }
}

fn narrow_table(state: &CacheState) -> &PathTable<str> {
    &state.narrow_paths
}

fn narrow_table_mut(state: &mut CacheState) -> &mut PathTable<str> {
    &mut state.narrow_paths
}

fn wide_table(state: &CacheState) -> &PathTable<[u16]> {
    &state.wide_paths
}

fn wide_table_mut(state: &mut CacheState) -> &mut PathTable<[u16]> {
    &mut state.wide_paths
}

/// Advances a generation counter, skipping the reserved sentinel.
fn next_generation(generation: u32) -> u32 {
    match generation.wrapping_add(1) {
        GEN_IGNORE => 0,
        next => next,
    }
}

fn is_listable_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

/// Outcome of the unlocked part of a directory (re)population.
enum Scan {
    /// The stored stamp still matches; the listing is known to be current.
    Unchanged,
    Listing {
        listing: DirListing,
        /// Set when the directory sits on a different device than its parent.
        volume: Option<VolumeFlags>,
    },
    Failed(BackendError),
}

/// Generation counters a scan was started under.
#[derive(Debug, Clone, Copy)]
struct Captured {
    existing: u32,
    missing: u32,
}

/// Whether `dir` needs no new scan. A listing taken under the `captured`
/// counters of a scan in flight counts as fresh for that scan.
fn listing_is_fresh(
    state: &CacheState,
    obj: &CacheObject,
    dir: &DirState,
    check_missing: bool,
    captured: Option<Captured>,
) -> bool {
    if obj.generation == GEN_IGNORE {
        // The root is never enumerated.
        return true;
    }
    if !dir.populated {
        return false;
    }
    let existing = dir.generation == state.gen_existing
        || captured.is_some_and(|c| dir.generation == c.existing);
    let missing = !check_missing
        || dir.missing_checked == state.gen_missing
        || captured.is_some_and(|c| dir.missing_checked == c.missing);
    existing && missing
}

struct NewChild<'a> {
    parent: ObjHandle,
    lengths: ParentLengths,
    volume: VolumeFlags,
    generation: u32,
    name: &'a str,
    short: Option<&'a str>,
    kind: ObjKind,
}

pub struct FsCache {
    backend: Arc<dyn FsBackend>,
    flags: CacheFlags,
    rule: NameRule,
    child_hash_threshold: usize,
    max_path: usize,
    max_component: usize,
    /// Components of the base directory relative lookups start from; `None`
    /// when it could not be expressed as an absolute POSIX path.
    base_components: Option<Vec<String>>,
    counters: Counters,
    state: RwLock<CacheState>,
}

impl std::fmt::Debug for FsCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsCache")
            .field("flags", &self.flags)
            .field("rule", &self.rule)
            .field("child_hash_threshold", &self.child_hash_threshold)
            .field("base_components", &self.base_components)
            .finish_non_exhaustive()
    }
}

impl FsCache {
    pub fn new(config: CacheConfig, backend: Arc<dyn FsBackend>) -> Result<Self, LookupError> {
        let mut objects = Arena::new();
        let mut root = CacheObject::new(
            None,
            ObjNames::root(),
            ObjKind::Directory,
            GEN_IGNORE,
            VolumeFlags::empty(),
        );
        if let Some(dir) = root.dir.as_mut() {
            dir.populated = true;
        }
        let root = objects.try_insert(root).ok_or(LookupError::OutOfMemory)?;

        let base_dir = config.resolved_base_dir();
        let base_components = base_dir
            .to_str()
            .and_then(|base| parse_path(base, config.max_component).ok())
            .filter(|parsed| parsed.anchor == Anchor::PosixRoot)
            .map(|parsed| parsed.components.iter().map(|c| c.to_string()).collect());
        if base_components.is_none() {
            warn!(
                "base directory {} is not an absolute path; relative lookups are unsupported",
                base_dir.display()
            );
        }

        let path_table_size = config.resolved_path_table_size();
        let child_hash_threshold = config.resolved_child_hash_threshold();
        let rule = if config.flags.contains(CacheFlags::CASE_SENSITIVE) {
            NameRule::Exact
        } else {
            NameRule::CaseFolded
        };
        debug!(
            "cache created: flags={:?} path_table_size={} child_hash_threshold={} base={}",
            config.flags,
            path_table_size,
            child_hash_threshold,
            base_dir.display()
        );

        let counters = Counters::default();
        bump(&counters.objects_created);
        Ok(Self {
            backend,
            flags: config.flags,
            rule,
            child_hash_threshold,
            max_path: config.max_path,
            max_component: config.max_component,
            base_components,
            counters,
            state: RwLock::new(CacheState {
                objects,
                root,
                gen_existing: 1,
                gen_missing: 1,
                narrow_paths: PathTable::new(path_table_size),
                wide_paths: PathTable::new(path_table_size),
                torn_down: false,
            }),
        })
    }

    /// A cache over the real filesystem with default tuning.
    pub fn with_flags(flags: CacheFlags) -> Result<Self, LookupError> {
        Self::new(CacheConfig::with_flags(flags), Arc::new(StdBackend))
    }

    pub fn flags(&self) -> CacheFlags {
        self.flags
    }

    /// Resolves a narrow path. On success the returned handle carries one
    /// reference owned by the caller.
    pub fn lookup(&self, path: &str) -> Result<ObjHandle, LookupError> {
        bump(&self.counters.lookups);
        if path.len() > self.max_path {
            return Err(LookupError::PathTooLong);
        }
        let hash = path.path_hash();
        if let Some(result) = self.probe_shared(path, hash, narrow_table) {
            return result;
        }

        let mut state = self.state.write();
        if let Some(result) = self.probe_table(&state, path, hash, narrow_table) {
            return result;
        }
        let result = self.walk(&mut state, path);
        bump(&self.counters.walk_hits);
        trace!("walked {path:?}: {result:?}");
        self.remember(&mut state, path, hash, narrow_table_mut, result)
    }

    /// Resolves a UTF-16 path. Wide paths are cached separately from narrow
    /// ones.
    pub fn lookup_wide(&self, path: &[u16]) -> Result<ObjHandle, LookupError> {
        bump(&self.counters.lookups);
        if path.len() > self.max_path {
            return Err(LookupError::PathTooLong);
        }
        let hash = path.path_hash();
        if let Some(result) = self.probe_shared(path, hash, wide_table) {
            return result;
        }
        let narrow = narrow_from_wide(path)?;

        let mut state = self.state.write();
        if let Some(result) = self.probe_table(&state, path, hash, wide_table) {
            return result;
        }
        let result = self.walk(&mut state, &narrow);
        bump(&self.counters.walk_hits);
        trace!("walked wide {narrow:?}: {result:?}");
        self.remember(&mut state, path, hash, wide_table_mut, result)
    }

    pub fn retain(&self, handle: ObjHandle) -> Result<u32, LookupError> {
        let state = self.state.read();
        Ok(state.object(handle)?.retain())
    }

    /// Drops one reference, destroying the object (and any children left
    /// unreferenced) when the count reaches zero.
    pub fn release(&self, handle: ObjHandle) -> Result<u32, LookupError> {
        {
            let state = self.state.read();
            if let Some(refs) = state.object(handle)?.release_unless_last() {
                return Ok(refs);
            }
        }
        let mut state = self.state.write();
        self.release_locked(&mut state, handle)
    }

    /// Marks every cached positive and negative result stale.
    pub fn invalidate_existing(&self) {
        let mut state = self.state.write();
        state.gen_existing = next_generation(state.gen_existing);
        state.gen_missing = next_generation(state.gen_missing);
        debug!(
            "invalidated existing: gen_existing={} gen_missing={}",
            state.gen_existing, state.gen_missing
        );
    }

    /// Marks only cached negative results stale.
    pub fn invalidate_missing(&self) {
        let mut state = self.state.write();
        state.gen_missing = next_generation(state.gen_missing);
        debug!("invalidated missing: gen_missing={}", state.gen_missing);
    }

    pub fn kind(&self, handle: ObjHandle) -> Result<ObjKind, LookupError> {
        let state = self.state.read();
        Ok(state.object(handle)?.kind)
    }

    pub fn info(&self, handle: ObjHandle) -> Result<ObjInfo, LookupError> {
        let state = self.state.read();
        let obj = state.object(handle)?;
        Ok(ObjInfo {
            kind: obj.kind,
            name: obj.names.long.narrow().to_string(),
            short_name: obj.names.short.as_ref().map(|s| s.narrow().to_string()),
            generation: obj.generation,
            refs: obj.refs(),
            volume: obj.volume,
        })
    }

    /// Attributes of the object, read from the backend on first request and
    /// kept until the object is next revalidated.
    pub fn stat(&self, handle: ObjHandle) -> Result<ObjStat, LookupError> {
        let path = {
            let state = self.state.read();
            let obj = state.object(handle)?;
            if obj.kind == ObjKind::Missing {
                return Err(LookupError::NotFound);
            }
            if let Some(stat) = obj.stat {
                return Ok(stat);
            }
            PathBuf::from(state.narrow_path(handle, false)?)
        };
        let stat = self.backend.stat(&path).map_err(|err| match err {
            BackendError::NotFound => LookupError::NotFound,
            other => other.into(),
        })?;
        let mut state = self.state.write();
        if let Some(obj) = state.objects.get_mut(handle) {
            if obj.kind != ObjKind::Missing {
                obj.stat = Some(stat);
            }
        }
        Ok(stat)
    }

    pub fn full_path(&self, handle: ObjHandle) -> Result<String, LookupError> {
        self.state.read().narrow_path(handle, false)
    }

    pub fn full_path_wide(&self, handle: ObjHandle) -> Result<Vec<u16>, LookupError> {
        self.state.read().wide_path(handle)
    }

    /// Full path built from short names wherever a component has one.
    pub fn short_path(&self, handle: ObjHandle) -> Result<String, LookupError> {
        self.state.read().narrow_path(handle, true)
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.read();
        CacheStats {
            gen_existing: state.gen_existing,
            gen_missing: state.gen_missing,
            objects: state.objects.len() as u64,
            objects_created: load(&self.counters.objects_created),
            objects_freed: load(&self.counters.objects_freed),
            lookups: load(&self.counters.lookups),
            path_hits: load(&self.counters.path_hits),
            walk_hits: load(&self.counters.walk_hits),
            narrow_paths: state.narrow_paths.len() as u64,
            wide_paths: state.wide_paths.len() as u64,
            path_collisions: state.narrow_paths.collisions() + state.wide_paths.collisions(),
            populations: load(&self.counters.populations),
            repopulations: load(&self.counters.repopulations),
            stamp_validations: load(&self.counters.stamp_validations),
            name_collisions: load(&self.counters.name_collisions),
        }
    }

    /// Tears the cache down and returns the final counters.
    pub fn destroy(self) -> CacheStats {
        self.teardown();
        self.stats()
    }

    fn teardown(&self) {
        let mut state = self.state.write();
        if state.torn_down {
            return;
        }
        state.torn_down = true;
        let mut results = state.narrow_paths.drain();
        results.extend(state.wide_paths.drain());
        for result in results {
            if let PathResult::Object(handle) = result {
                let _ = self.release_locked(&mut state, handle);
            }
        }
        let root = state.root;
        let _ = self.release_locked(&mut state, root);
        debug!(
            "cache destroyed: {} objects freed, {} still referenced",
            load(&self.counters.objects_freed),
            state.objects.len()
        );
    }

    fn probe_shared<K: PathKey + ?Sized>(
        &self,
        key: &K,
        hash: u32,
        table: fn(&CacheState) -> &PathTable<K>,
    ) -> Option<Result<ObjHandle, LookupError>> {
        let state = self.state.read();
        self.probe_table(&state, key, hash, table)
    }

    /// Answers from a path table if its entry is current. A positive answer
    /// is retained for the caller.
    fn probe_table<K: PathKey + ?Sized>(
        &self,
        state: &CacheState,
        key: &K,
        hash: u32,
        table: fn(&CacheState) -> &PathTable<K>,
    ) -> Option<Result<ObjHandle, LookupError>> {
        let entry = table(state).get(key, hash)?;
        let current = if entry.negative {
            state.gen_missing
        } else {
            state.gen_existing
        };
        if entry.generation != current {
            return None;
        }
        let result = match entry.result {
            PathResult::Object(handle) => {
                state.objects.get(handle)?.retain();
                Ok(handle)
            }
            PathResult::Error(err) => Err(err),
        };
        bump(&self.counters.path_hits);
        Some(result)
    }

    /// Records a walk result in a path table and retains a positive result
    /// for the caller.
    fn remember<K: PathKey + ?Sized>(
        &self,
        state: &mut CacheState,
        key: &K,
        hash: u32,
        table: fn(&mut CacheState) -> &mut PathTable<K>,
        result: Result<ObjHandle, LookupError>,
    ) -> Result<ObjHandle, LookupError> {
        let missing_paths = self.flags.contains(CacheFlags::MISSING_PATHS);
        let entry = match result {
            Ok(handle) => {
                let obj = state.object(handle)?;
                obj.retain();
                let negative = obj.kind == ObjKind::Missing;
                (!negative || missing_paths).then_some((PathResult::Object(handle), negative))
            }
            Err(err) => (err.is_negative_result() && missing_paths)
                .then_some((PathResult::Error(err), true)),
        };

        let replaced = match entry {
            Some((stored, negative)) => {
                if let PathResult::Object(handle) = stored {
                    state.object(handle)?.retain();
                }
                let generation = if negative {
                    state.gen_missing
                } else {
                    state.gen_existing
                };
                match table(state).insert(key, hash, generation, negative, stored) {
                    Ok(replaced) => replaced,
                    Err(err) => {
                        debug!("path entry not cached: {err}");
                        Some(stored)
                    }
                }
            }
            // A stale entry for this key would otherwise keep its object alive.
            None => table(state).remove(key, hash),
        };
        if let Some(PathResult::Object(old)) = replaced {
            let _ = self.release_locked(state, old);
        }
        result
    }

    fn walk(
        &self,
        guard: &mut RwLockWriteGuard<'_, CacheState>,
        path: &str,
    ) -> Result<ObjHandle, LookupError> {
        let parsed = parse_path(path, self.max_component)?;
        let mut components: Vec<&str> = Vec::new();
        match parsed.anchor {
            Anchor::PosixRoot => {}
            Anchor::Relative => {
                let base = self.base_components.as_ref().ok_or(LookupError::Unsupported)?;
                components.extend(base.iter().map(String::as_str));
            }
            Anchor::Drive(_) | Anchor::Unc { .. } => {
                trace!("no volume for anchor {:?}", parsed.anchor);
                return Err(LookupError::Unsupported);
            }
        }
        components.extend(parsed.components.iter().copied());

        let mut current = self.posix_anchor(guard)?;
        let count = components.len();
        for (i, name) in components.iter().enumerate() {
            let last = i + 1 == count;
            if *name == ".." {
                let state: &CacheState = guard;
                if let Some(parent) = state.object(current)?.parent.filter(|p| *p != state.root) {
                    current = parent;
                }
                continue;
            }

            self.ensure_populated(guard, current, false)?;
            let mut found = self.find_in(guard, current, name)?;
            if self.needs_missing_check(guard, current, found)? {
                self.ensure_populated(guard, current, true)?;
                found = self.find_in(guard, current, name)?;
            }
            let child = match found {
                Some(child) => child,
                None if self.flags.contains(CacheFlags::MISSING_OBJECTS) => {
                    let missing = self.create_object(guard, current, name, None, ObjKind::Missing)?;
                    if last {
                        return Ok(missing);
                    }
                    return Err(LookupError::PathCompNotFound);
                }
                None => return Err(LookupError::PathCompNotFound),
            };

            if self.rule == NameRule::Exact {
                self.refresh_missing(guard, child)?;
            }
            match guard.object(child)?.kind {
                ObjKind::Missing if last => return Ok(child),
                ObjKind::Missing => return Err(LookupError::PathCompNotFound),
                ObjKind::Directory => {}
                _ if !last => return Err(LookupError::PathCompNotDir),
                _ => {}
            }
            current = child;
        }

        let state: &mut CacheState = guard;
        let gen_existing = state.gen_existing;
        let obj = state.object_mut(current)?;
        if parsed.trailing_separator && !obj.is_dir() {
            return Err(LookupError::NotDir);
        }
        // Every directory above was validated on the way down, so the object
        // reached is known to exist now.
        if obj.generation != GEN_IGNORE {
            obj.generation = gen_existing;
        }
        Ok(current)
    }

    fn find_in(
        &self,
        state: &CacheState,
        dir: ObjHandle,
        name: &str,
    ) -> Result<Option<ObjHandle>, LookupError> {
        let dir = state
            .object(dir)?
            .dir
            .as_deref()
            .ok_or(LookupError::InternalError)?;
        Ok(dir.find_child(&state.objects, name, self.rule))
    }

    /// Whether a negative answer from `dir` is older than `gen_missing` and
    /// the listing should be checked for new entries before it is trusted.
    /// Under exact names a stale `Missing` child is queried by path instead.
    fn needs_missing_check(
        &self,
        state: &CacheState,
        dir: ObjHandle,
        found: Option<ObjHandle>,
    ) -> Result<bool, LookupError> {
        let listing = state
            .object(dir)?
            .dir
            .as_deref()
            .ok_or(LookupError::InternalError)?;
        if listing.missing_checked == state.gen_missing {
            return Ok(false);
        }
        match found {
            None => Ok(true),
            Some(child) => {
                let obj = state.object(child)?;
                Ok(obj.kind == ObjKind::Missing
                    && !state.is_current(obj)
                    && self.rule == NameRule::CaseFolded)
            }
        }
    }

    /// Returns the `/` anchor, creating it on first use.
    fn posix_anchor(&self, state: &mut CacheState) -> Result<ObjHandle, LookupError> {
        let root = state.root;
        let existing = state
            .object(root)?
            .dir
            .as_deref()
            .and_then(|dir| dir.find_child(&state.objects, POSIX_ANCHOR, self.rule));
        if let Some(anchor) = existing {
            return Ok(anchor);
        }
        let anchor = self.create_object(state, root, POSIX_ANCHOR, None, ObjKind::Directory)?;
        let volume = self.backend.volume_flags(Path::new(POSIX_ANCHOR));
        state.object_mut(anchor)?.volume = volume;
        debug!("created anchor {POSIX_ANCHOR} volume={volume:?}");
        Ok(anchor)
    }

    /// Creates a child under a populated directory, stamped with the
    /// generation matching its kind.
    fn create_object(
        &self,
        state: &mut CacheState,
        parent: ObjHandle,
        name: &str,
        short: Option<&str>,
        kind: ObjKind,
    ) -> Result<ObjHandle, LookupError> {
        if name.is_empty()
            || name.len() > self.max_component
            || short.is_some_and(|s| s.len() > self.max_component)
        {
            return Err(LookupError::InternalError);
        }
        let generation = state.current_generation(kind);
        let parent_obj = state.object_mut(parent)?;
        if !parent_obj.dir.as_deref().is_some_and(|dir| dir.populated) {
            return Err(LookupError::InternalError);
        }
        let lengths = parent_obj.names.child_parent_lengths();
        let volume = parent_obj.volume;
        let mut dir = parent_obj.dir.take().ok_or(LookupError::InternalError)?;
        let created = self.insert_child(
            &mut state.objects,
            &mut dir,
            NewChild {
                parent,
                lengths,
                volume,
                generation,
                name,
                short,
                kind,
            },
        );
        state.object_mut(parent)?.dir = Some(dir);
        if let Ok(handle) = created {
            trace!("created {kind:?} {name:?} as {handle:?}");
        }
        created
    }

    fn insert_child(
        &self,
        objects: &mut Arena<CacheObject>,
        dir: &mut DirState,
        child: NewChild<'_>,
    ) -> Result<ObjHandle, LookupError> {
        let names = ObjNames::new(child.name, child.short, child.lengths);
        let handle = objects
            .try_insert(CacheObject::new(
                Some(child.parent),
                names,
                child.kind,
                child.generation,
                child.volume,
            ))
            .ok_or(LookupError::OutOfMemory)?;
        if let Err(err) = dir.add_child(objects, handle, self.rule, self.child_hash_threshold) {
            objects.remove(handle);
            return Err(err);
        }
        bump(&self.counters.objects_created);
        Ok(handle)
    }

    /// Makes sure `handle` is a directory whose children reflect the current
    /// `gen_existing`, enumerating or revalidating it if needed. With
    /// `check_missing` the listing must also be no older than `gen_missing`.
    fn ensure_populated(
        &self,
        guard: &mut RwLockWriteGuard<'_, CacheState>,
        handle: ObjHandle,
        check_missing: bool,
    ) -> Result<(), LookupError> {
        let (path, stored, parent_dev, captured) = {
            let state: &CacheState = guard;
            let obj = state.object(handle)?;
            let dir = obj.dir.as_deref().ok_or(LookupError::InternalError)?;
            if listing_is_fresh(state, obj, dir, check_missing, None) {
                return Ok(());
            }
            let stored = if dir.populated
                && obj.volume.contains(VolumeFlags::DIR_MTIME_TRACKS_CHILDREN)
            {
                dir.stamp
            } else {
                None
            };
            let parent_dev = obj
                .parent
                .filter(|parent| *parent != state.root)
                .and_then(|parent| state.objects.get(parent))
                .and_then(|parent| parent.dir.as_deref())
                .filter(|parent| parent.populated)
                .map(|parent| parent.dev);
            let path = PathBuf::from(state.narrow_path(handle, false)?);
            obj.retain();
            let captured = Captured {
                existing: state.gen_existing,
                missing: state.gen_missing,
            };
            (path, stored, parent_dev, captured)
        };

        let scan = RwLockWriteGuard::unlocked(guard, || self.scan(&path, stored, parent_dev));
        let applied = self.apply_scan(guard, handle, &path, scan, check_missing, captured);
        let remaining = self.release_locked(guard, handle)?;
        applied?;
        if remaining == 0 {
            // Unlinked and dropped by a concurrent repopulation of its parent.
            return Err(LookupError::PathCompNotFound);
        }
        Ok(())
    }

    fn scan(&self, path: &Path, stored: Option<DirStamp>, parent_dev: Option<u64>) -> Scan {
        if let Some(stored) = stored {
            match self.backend.dir_stamp(path) {
                Ok(stamp) if stamp == stored => return Scan::Unchanged,
                Ok(_) => {}
                Err(err) => return Scan::Failed(err),
            }
        }
        match self.backend.read_dir(path) {
            Ok(listing) => {
                let volume = parent_dev
                    .filter(|dev| *dev != listing.stamp.dev)
                    .map(|_| self.backend.volume_flags(path));
                Scan::Listing { listing, volume }
            }
            Err(err) => Scan::Failed(err),
        }
    }

    fn apply_scan(
        &self,
        state: &mut CacheState,
        handle: ObjHandle,
        path: &Path,
        scan: Scan,
        check_missing: bool,
        captured: Captured,
    ) -> Result<(), LookupError> {
        let obj = state.object(handle)?;
        let dir = obj.dir.as_deref().ok_or(LookupError::InternalError)?;
        if listing_is_fresh(state, obj, dir, check_missing, Some(captured)) {
            trace!("discarding scan of {}: populated concurrently", path.display());
            return Ok(());
        }
        match scan {
            Scan::Failed(err) => {
                debug!("cannot enumerate {}: {err}", path.display());
                Err(err.into())
            }
            Scan::Unchanged => {
                bump(&self.counters.stamp_validations);
                trace!("stamp unchanged for {}", path.display());
                self.restamp_children(state, handle, captured)
            }
            Scan::Listing { listing, volume } => {
                self.apply_listing(state, handle, path, listing, volume, captured)
            }
        }
    }

    /// Brings the children of an unchanged directory up to the captured
    /// generations. Child listings are revalidated when descended into.
    fn restamp_children(
        &self,
        state: &mut CacheState,
        handle: ObjHandle,
        captured: Captured,
    ) -> Result<(), LookupError> {
        let mut dir = state
            .object_mut(handle)?
            .dir
            .take()
            .ok_or(LookupError::InternalError)?;
        for &child in dir.children() {
            if let Some(obj) = state.objects.get_mut(child) {
                if obj.kind == ObjKind::Missing {
                    obj.generation = captured.missing;
                } else {
                    obj.generation = captured.existing;
                    obj.stat = None;
                }
            }
        }
        dir.generation = captured.existing;
        dir.missing_checked = captured.missing;
        let obj = state.object_mut(handle)?;
        obj.dir = Some(dir);
        if obj.generation != GEN_IGNORE {
            obj.generation = captured.existing;
        }
        Ok(())
    }

    fn apply_listing(
        &self,
        state: &mut CacheState,
        handle: ObjHandle,
        path: &Path,
        listing: DirListing,
        volume: Option<VolumeFlags>,
        captured: Captured,
    ) -> Result<(), LookupError> {
        let generation = captured.existing;
        let obj = state.object_mut(handle)?;
        if let Some(volume) = volume {
            debug!("volume boundary at {}: {volume:?}", path.display());
            obj.volume = volume;
        }
        let volume = obj.volume;
        let lengths = obj.names.child_parent_lengths();
        let mut dir = obj.dir.take().ok_or(LookupError::InternalError)?;
        let repopulating = dir.populated;

        let mut seen: FnvHashSet<ObjHandle> = FnvHashSet::default();
        let mut fresh = Vec::new();
        let mut renamed = false;
        let mut oversized = 0usize;
        for entry in &listing.entries {
            if !is_listable_name(&entry.name) {
                trace!("skipping unaddressable entry {:?} in {}", entry.name, path.display());
                continue;
            }
            if entry.name.len() > self.max_component {
                trace!("skipping overlong entry {:?} in {}", entry.name, path.display());
                oversized += 1;
                continue;
            }
            let short = entry
                .short_name
                .as_deref()
                .filter(|short| short.len() <= self.max_component);
            let objects = &state.objects;
            let existing = dir
                .find_child(objects, &entry.name, self.rule)
                .or_else(|| {
                    // A name first looked up by its short alias.
                    short
                        .and_then(|short| dir.find_child(objects, short, self.rule))
                        .filter(|child| {
                            objects
                                .get(*child)
                                .is_some_and(|obj| obj.kind == ObjKind::Missing)
                        })
                })
                .filter(|child| !seen.contains(child));
            let Some(child) = existing else {
                fresh.push((entry, short));
                continue;
            };
            let Some(obj) = state.objects.get_mut(child) else {
                continue;
            };
            if obj.kind == ObjKind::Missing {
                trace!("{:?} appeared in {}", entry.name, path.display());
                obj.metamorphose(entry.kind, generation);
                // Take the on-disk spelling, not the one it was looked up by.
                obj.names = ObjNames::new(&entry.name, short, lengths);
                obj.volume = volume;
                renamed = true;
                seen.insert(child);
            } else if obj.kind == entry.kind {
                obj.generation = generation;
                obj.stat = None;
                seen.insert(child);
            } else {
                // Replaced by something of another kind: the old object is
                // unlinked below and a new one created in its place.
                fresh.push((entry, short));
            }
        }
        if renamed {
            dir.reindex(&state.objects, self.rule);
        }

        let objects = &state.objects;
        let removed = dir.unlink_children(objects, self.rule, |child| {
            !seen.contains(&child)
                && objects
                    .get(child)
                    .is_some_and(|obj| obj.kind != ObjKind::Missing)
        });
        // Whatever is still missing was confirmed absent by this listing.
        for &child in dir.children() {
            if let Some(obj) = state.objects.get_mut(child) {
                if obj.kind == ObjKind::Missing {
                    obj.generation = captured.missing;
                }
            }
        }

        for (entry, short) in fresh {
            let created = self.insert_child(
                &mut state.objects,
                &mut dir,
                NewChild {
                    parent: handle,
                    lengths,
                    volume,
                    generation,
                    name: &entry.name,
                    short,
                    kind: entry.kind,
                },
            );
            match created {
                Ok(_) => {}
                // Names are length-checked above, so this is a duplicate.
                Err(LookupError::InternalError) => {
                    bump(&self.counters.name_collisions);
                    warn!(
                        "skipping {:?} in {}: collides with an existing name",
                        entry.name,
                        path.display()
                    );
                }
                Err(err) => {
                    dir.populated = false;
                    state.object_mut(handle)?.dir = Some(dir);
                    for child in removed {
                        let _ = self.release_locked(state, child);
                    }
                    return Err(err);
                }
            }
        }

        dir.populated = true;
        dir.stamp = Some(listing.stamp);
        dir.dev = listing.stamp.dev;
        dir.generation = generation;
        dir.missing_checked = captured.missing;
        let count = dir.len();
        let obj = state.object_mut(handle)?;
        obj.dir = Some(dir);
        obj.stat = None;
        if obj.generation != GEN_IGNORE {
            obj.generation = generation;
        }

        if repopulating {
            bump(&self.counters.repopulations);
        } else {
            bump(&self.counters.populations);
        }
        debug!(
            "{} {}: {} children, {} removed, {} unreadable names, {} overlong names",
            if repopulating { "repopulated" } else { "populated" },
            path.display(),
            count,
            removed.len(),
            listing.skipped,
            oversized
        );
        for child in removed {
            let _ = self.release_locked(state, child);
        }
        Ok(())
    }

    /// Re-probes a stale `Missing` node by its exact path, turning it into a
    /// real object if something now exists there.
    fn refresh_missing(
        &self,
        guard: &mut RwLockWriteGuard<'_, CacheState>,
        handle: ObjHandle,
    ) -> Result<(), LookupError> {
        let path = {
            let state: &CacheState = guard;
            let obj = state.object(handle)?;
            if obj.kind != ObjKind::Missing || state.is_current(obj) {
                return Ok(());
            }
            let path = PathBuf::from(state.narrow_path(handle, false)?);
            obj.retain();
            path
        };

        let probed = RwLockWriteGuard::unlocked(guard, || self.backend.probe(&path));
        let state: &mut CacheState = guard;
        let applied: Result<(), LookupError> = match probed {
            Ok(found) => {
                let gen_existing = state.gen_existing;
                let gen_missing = state.gen_missing;
                let obj = state.object_mut(handle)?;
                if obj.kind == ObjKind::Missing {
                    match found {
                        Some(kind) => {
                            debug!("{} now exists as {kind:?}", path.display());
                            obj.metamorphose(kind, gen_existing);
                        }
                        None => obj.generation = gen_missing,
                    }
                }
                Ok(())
            }
            Err(err) => {
                debug!("cannot probe {}: {err}", path.display());
                Err(LookupError::from(err))
            }
        };
        let remaining = self.release_locked(state, handle)?;
        applied?;
        if remaining == 0 {
            return Err(LookupError::PathCompNotFound);
        }
        Ok(())
    }

    fn release_locked(&self, state: &mut CacheState, handle: ObjHandle) -> Result<u32, LookupError> {
        let obj = state.object(handle)?;
        match obj.release_exclusive() {
            None => {
                warn!("release of {handle:?} with no outstanding references");
                Err(LookupError::InternalError)
            }
            Some(0) => {
                self.free_tree(state, handle);
                Ok(0)
            }
            Some(refs) => Ok(refs),
        }
    }

    /// Frees `handle` and every descendant whose last reference was its
    /// parent's child link. Iterative so deep trees cannot overflow the stack.
    fn free_tree(&self, state: &mut CacheState, handle: ObjHandle) {
        let mut pending = vec![handle];
        while let Some(handle) = pending.pop() {
            let Some(mut obj) = state.objects.remove(handle) else {
                continue;
            };
            bump(&self.counters.objects_freed);
            let Some(mut dir) = obj.dir.take() else {
                continue;
            };
            for child in dir.take_children() {
                match state.objects.get(child).map(CacheObject::release_exclusive) {
                    Some(Some(0)) => pending.push(child),
                    // Still held by a caller or a path entry; lives on orphaned.
                    Some(Some(_)) => {}
                    _ => warn!("child {child:?} of freed directory was already released"),
                }
            }
        }
    }
}

impl Drop for FsCache {
    fn drop(&mut self) {
        self.teardown();
    }
}
