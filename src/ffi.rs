use core::ffi::{c_char, c_void};
use std::sync::Arc;

use crate::cache::arena::ObjHandle;
use crate::cache::backend::StdBackend;
use crate::cache::engine::FsCache;
use crate::common::types::*;
use crate::common::unicode::narrow_from_bytes;
use crate::config::CacheConfig;
use crate::error::LookupError;
use crate::logging::{self, FsLogCallback};

pub struct FsCacheHandle {
    inner: FsCache,
}

fn status_of(result: Result<(), LookupError>) -> FsCacheStatus {
    match result {
        Ok(()) => FsCacheStatus::Ok,
        Err(err) => err.status(),
    }
}

fn cache_ref<'a>(handle: *mut FsCacheHandle) -> Option<&'a FsCache> {
    unsafe { handle.as_ref() }.map(|h| &h.inner)
}

fn object_of(raw: FsObjHandle) -> Result<ObjHandle, LookupError> {
    ObjHandle::from_raw(raw).ok_or(LookupError::InternalError)
}

/// Creates a cache over the real filesystem. Returns null on failure.
#[no_mangle]
pub extern "C" fn fscache_create(config: *const FsCacheConfig) -> *mut FsCacheHandle {
    let config = CacheConfig::from_ffi(unsafe { config.as_ref() });
    match FsCache::new(config, Arc::new(StdBackend)) {
        Ok(inner) => Box::into_raw(Box::new(FsCacheHandle { inner })),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Destroys the cache, optionally reporting its final statistics.
#[no_mangle]
pub extern "C" fn fscache_destroy(handle: *mut FsCacheHandle, out_stats: *mut FsCacheStats) {
    if handle.is_null() {
        return;
    }
    let FsCacheHandle { inner } = *unsafe { Box::from_raw(handle) };
    let stats = inner.destroy();
    if let Some(out) = unsafe { out_stats.as_mut() } {
        *out = stats.into();
    }
}

#[no_mangle]
pub extern "C" fn fscache_lookup_a(
    handle: *mut FsCacheHandle,
    path: *const FsStringView,
    out_obj: *mut FsObjHandle,
) -> FsCacheStatus {
    let (Some(cache), Some(view), Some(out)) = (
        cache_ref(handle),
        unsafe { path.as_ref() },
        unsafe { out_obj.as_mut() },
    ) else {
        return FsCacheStatus::InvalidArgument;
    };
    *out = 0;
    if view.ptr.is_null() && view.len != 0 {
        return FsCacheStatus::InvalidArgument;
    }
    let bytes: &[u8] = if view.len == 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(view.ptr as *const u8, view.len) }
    };
    let result = narrow_from_bytes(bytes)
        .and_then(|path| cache.lookup(path))
        .map(|obj| *out = obj.to_raw());
    status_of(result)
}

#[no_mangle]
pub extern "C" fn fscache_lookup_w(
    handle: *mut FsCacheHandle,
    path: *const FsWideStringView,
    out_obj: *mut FsObjHandle,
) -> FsCacheStatus {
    let (Some(cache), Some(view), Some(out)) = (
        cache_ref(handle),
        unsafe { path.as_ref() },
        unsafe { out_obj.as_mut() },
    ) else {
        return FsCacheStatus::InvalidArgument;
    };
    *out = 0;
    if view.ptr.is_null() && view.len != 0 {
        return FsCacheStatus::InvalidArgument;
    }
    let units: &[u16] = if view.len == 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(view.ptr, view.len) }
    };
    let result = cache.lookup_wide(units).map(|obj| *out = obj.to_raw());
    status_of(result)
}

#[no_mangle]
pub extern "C" fn fscache_obj_retain(handle: *mut FsCacheHandle, obj: FsObjHandle) -> FsCacheStatus {
    let Some(cache) = cache_ref(handle) else {
        return FsCacheStatus::InvalidArgument;
    };
    status_of(object_of(obj).and_then(|obj| cache.retain(obj)).map(|_| ()))
}

#[no_mangle]
pub extern "C" fn fscache_obj_release(handle: *mut FsCacheHandle, obj: FsObjHandle) -> FsCacheStatus {
    let Some(cache) = cache_ref(handle) else {
        return FsCacheStatus::InvalidArgument;
    };
    status_of(object_of(obj).and_then(|obj| cache.release(obj)).map(|_| ()))
}

/// Kind of `obj`, or `Invalid` for a bad handle.
#[no_mangle]
pub extern "C" fn fscache_obj_type(handle: *mut FsCacheHandle, obj: FsObjHandle) -> FsObjType {
    let Some(cache) = cache_ref(handle) else {
        return FsObjType::Invalid;
    };
    object_of(obj)
        .and_then(|obj| cache.kind(obj))
        .map_or(FsObjType::Invalid, |kind| kind.to_ffi())
}

/// Writes the object's full path as a malloc'd, NUL-terminated string. The
/// caller frees it with `fscache_free_string`.
#[no_mangle]
pub extern "C" fn fscache_obj_path(
    handle: *mut FsCacheHandle,
    obj: FsObjHandle,
    out_path: *mut FsStringView,
) -> FsCacheStatus {
    let (Some(cache), Some(out)) = (cache_ref(handle), unsafe { out_path.as_mut() }) else {
        return FsCacheStatus::InvalidArgument;
    };
    *out = FsStringView {
        ptr: std::ptr::null(),
        len: 0,
    };
    let path = match object_of(obj).and_then(|obj| cache.full_path(obj)) {
        Ok(path) => path,
        Err(err) => return err.status(),
    };
    match malloc_string(path.as_bytes()) {
        Some(ptr) => {
            *out = FsStringView {
                ptr,
                len: path.len(),
            };
            FsCacheStatus::Ok
        }
        None => FsCacheStatus::OutOfMemory,
    }
}

fn malloc_string(bytes: &[u8]) -> Option<*const c_char> {
    let ptr = unsafe { libc::malloc(bytes.len() + 1) } as *mut u8;
    if ptr.is_null() {
        return None;
    }
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len());
        *ptr.add(bytes.len()) = 0;
    }
    Some(ptr as *const c_char)
}

#[no_mangle]
pub extern "C" fn fscache_free_string(value: FsStringView) {
    if value.ptr.is_null() {
        return;
    }
    unsafe {
        libc::free(value.ptr as *mut libc::c_void);
    }
}

#[no_mangle]
pub extern "C" fn fscache_invalidate_existing(handle: *mut FsCacheHandle) -> FsCacheStatus {
    let Some(cache) = cache_ref(handle) else {
        return FsCacheStatus::InvalidArgument;
    };
    cache.invalidate_existing();
    FsCacheStatus::Ok
}

#[no_mangle]
pub extern "C" fn fscache_invalidate_missing(handle: *mut FsCacheHandle) -> FsCacheStatus {
    let Some(cache) = cache_ref(handle) else {
        return FsCacheStatus::InvalidArgument;
    };
    cache.invalidate_missing();
    FsCacheStatus::Ok
}

#[no_mangle]
pub extern "C" fn fscache_get_stats(handle: *mut FsCacheHandle, out_stats: *mut FsCacheStats) -> FsCacheStatus {
    let (Some(cache), Some(out)) = (cache_ref(handle), unsafe { out_stats.as_mut() }) else {
        return FsCacheStatus::InvalidArgument;
    };
    // Older callers pass a smaller struct; never write past what they sized.
    if out.size != 0 && (out.size as usize) < std::mem::size_of::<FsCacheStats>() {
        return FsCacheStatus::InvalidArgument;
    }
    *out = cache.stats().into();
    FsCacheStatus::Ok
}

#[no_mangle]
pub extern "C" fn fscache_log_set_stderr(level: FsLogLevel) -> FsCacheStatus {
    logging::log_set_stderr(level)
}

#[no_mangle]
pub extern "C" fn fscache_log_set_callback(
    callback: FsLogCallback,
    user_data: *mut c_void,
    level: FsLogLevel,
) -> FsCacheStatus {
    logging::log_set_callback(callback, user_data, level)
}

#[no_mangle]
pub extern "C" fn fscache_log_set_level(level: FsLogLevel) -> FsCacheStatus {
    logging::log_set_level(level)
}

#[no_mangle]
pub extern "C" fn fscache_log_disable() -> FsCacheStatus {
    logging::log_disable()
}
