use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use fscache::*;

use crate::support::{cache_over, MemBackend};

static LOG_COUNT: AtomicUsize = AtomicUsize::new(0);
static LOG_MUTEX: Mutex<()> = Mutex::new(());
const TARGET: &str = "fscache::logging_test";

extern "C" fn log_callback(record: *const FsLogRecord, user_data: *mut c_void) {
    if record.is_null() {
        return;
    }
    let rec = unsafe { &*record };
    let target = unsafe { std::slice::from_raw_parts(rec.target.ptr as *const u8, rec.target.len) };
    if target != TARGET.as_bytes() {
        return;
    }
    LOG_COUNT.fetch_add(1, Ordering::SeqCst);
    if !user_data.is_null() {
        let counter = unsafe { &*(user_data as *const AtomicUsize) };
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn logging_callback_receives_records() {
    let _guard = LOG_MUTEX.lock().unwrap();
    log_disable();
    LOG_COUNT.store(0, Ordering::SeqCst);

    let user_counter = Box::new(AtomicUsize::new(0));
    let user_ptr = Box::into_raw(user_counter) as *mut c_void;

    let status = log_set_callback(Some(log_callback), user_ptr, FsLogLevel::Info);
    assert_eq!(status, FsCacheStatus::Ok);

    log::info!(target: TARGET, "logging smoke test");
    log::debug!(target: TARGET, "debug should be filtered");

    assert_eq!(LOG_COUNT.load(Ordering::SeqCst), 1);
    let user_count = unsafe { &*(user_ptr as *const AtomicUsize) }.load(Ordering::SeqCst);
    assert_eq!(user_count, 1);

    log_disable();
    unsafe { drop(Box::from_raw(user_ptr as *mut AtomicUsize)) };
}

#[test]
fn logging_level_off_suppresses_records() {
    let _guard = LOG_MUTEX.lock().unwrap();
    log_disable();
    LOG_COUNT.store(0, Ordering::SeqCst);

    let status = log_set_callback(Some(log_callback), std::ptr::null_mut(), FsLogLevel::Info);
    assert_eq!(status, FsCacheStatus::Ok);

    let status = log_set_level(FsLogLevel::Off);
    assert_eq!(status, FsCacheStatus::Ok);

    log::info!(target: TARGET, "should not be logged");
    assert_eq!(LOG_COUNT.load(Ordering::SeqCst), 0);

    log_disable();
}

#[test]
fn hook_sees_population_decisions() {
    let _guard = LOG_MUTEX.lock().unwrap();
    log_disable();

    let captured: Arc<Mutex<Vec<String>>> = Arc::default();
    let sink = captured.clone();
    let status = log_set_hook(
        Box::new(move |record: &log::Record| {
            if record.target().starts_with("fscache::") {
                sink.lock().unwrap().push(record.args().to_string());
            }
        }),
        FsLogLevel::Debug,
    );
    assert_eq!(status, FsCacheStatus::Ok);

    let backend = MemBackend::new();
    backend.touch("/logged/input.txt");
    let cache = cache_over(&backend, CacheFlags::empty());
    let handle = cache.lookup("/logged/input.txt").unwrap();
    cache.release(handle).unwrap();
    cache.invalidate_existing();
    cache.lookup("/logged/input.txt").unwrap();
    log_disable();

    let messages = captured.lock().unwrap();
    assert!(messages.iter().any(|m| m.starts_with("populated /logged:")));
    assert!(messages.iter().any(|m| m.starts_with("repopulated /logged:")));
    assert!(messages.iter().any(|m| m.starts_with("invalidated existing")));
}
