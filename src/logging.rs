//! Process-wide `log` sink for the cache.
//!
//! The crate logs through the `log` facade. If no other logger has been
//! installed, the first call into this module installs [`FsCacheLogger`],
//! which forwards records to stderr, a C callback or a Rust hook. When the
//! host already installed its own logger, only the max level is adjusted.

use crate::common::types::{FsCacheStatus, FsLogLevel, FsLogRecord, FsStringView};

use core::ffi::{c_char, c_void};
use log::{Level, LevelFilter, Log, Metadata, Record};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

pub type FsLogCallback = Option<extern "C" fn(record: *const FsLogRecord, user_data: *mut c_void)>;

/// Rust-side sink, for hosts that link the crate directly.
pub type LogHook = Box<dyn Fn(&Record) + Send + Sync>;

const MODE_DISABLED: u8 = 0;
const MODE_STDERR: u8 = 1;
const MODE_CALLBACK: u8 = 2;
const MODE_HOOK: u8 = 3;

struct CallbackState {
    callback: FsLogCallback,
    user_data: usize,
}

pub struct FsCacheLogger {
    mode: AtomicU8,
    level: AtomicU8,
    callback: Mutex<CallbackState>,
    hook: Mutex<Option<LogHook>>,
}

impl FsCacheLogger {
    const fn new() -> Self {
        Self {
            mode: AtomicU8::new(MODE_DISABLED),
            level: AtomicU8::new(FsLogLevel::Off as u8),
            callback: Mutex::new(CallbackState {
                callback: None,
                user_data: 0,
            }),
            hook: Mutex::new(None),
        }
    }

    fn level(&self) -> Option<Level> {
        level_from_u8(self.level.load(Ordering::Relaxed))
    }

    fn set_level(&self, level: FsLogLevel) {
        self.level.store(level as u8, Ordering::Relaxed);
        log::set_max_level(level_filter_from_u8(level as u8));
    }

    fn set_mode(&self, mode: u8) {
        self.mode.store(mode, Ordering::Relaxed);
    }

    fn set_callback(&self, callback: FsLogCallback, user_data: *mut c_void) {
        let mut state = self.callback.lock();
        state.callback = callback;
        state.user_data = user_data as usize;
    }

    fn set_hook(&self, hook: Option<LogHook>) {
        *self.hook.lock() = hook;
    }
}

impl Log for FsCacheLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        let Some(level) = self.level() else {
            return false;
        };
        metadata.level() <= level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        match self.mode.load(Ordering::Relaxed) {
            MODE_STDERR => {
                eprintln!("[fscache][{}] {}", record.level(), record.args());
            }
            MODE_CALLBACK => {
                let state = self.callback.lock();
                let Some(callback) = state.callback else {
                    return;
                };
                let message = record.args().to_string();
                let c_record = FsLogRecord {
                    level: fs_level_from_log(record.level()),
                    target: string_view_from_str(record.target()),
                    message: string_view_from_str(&message),
                    file: string_view_from_str(record.file().unwrap_or("")),
                    line: record.line().unwrap_or(0),
                };
                callback(&c_record as *const FsLogRecord, state.user_data as *mut c_void);
            }
            MODE_HOOK => {
                if let Some(hook) = self.hook.lock().as_ref() {
                    hook(record);
                }
            }
            _ => {}
        }
    }

    fn flush(&self) {}
}

static LOGGER: FsCacheLogger = FsCacheLogger::new();
static LOGGER_STATE: OnceLock<LoggerInstall> = OnceLock::new();

#[derive(Copy, Clone)]
enum LoggerInstall {
    Installed,
    External,
}

fn init_logger() -> LoggerInstall {
    *LOGGER_STATE.get_or_init(|| match log::set_logger(&LOGGER) {
        Ok(()) => {
            log::set_max_level(LevelFilter::Off);
            LoggerInstall::Installed
        }
        Err(_) => LoggerInstall::External,
    })
}

fn level_filter_from_u8(level: u8) -> LevelFilter {
    match level {
        x if x == FsLogLevel::Error as u8 => LevelFilter::Error,
        x if x == FsLogLevel::Warn as u8 => LevelFilter::Warn,
        x if x == FsLogLevel::Info as u8 => LevelFilter::Info,
        x if x == FsLogLevel::Debug as u8 => LevelFilter::Debug,
        x if x == FsLogLevel::Trace as u8 => LevelFilter::Trace,
        _ => LevelFilter::Off,
    }
}

fn level_from_u8(level: u8) -> Option<Level> {
    level_filter_from_u8(level).to_level()
}

fn fs_level_from_log(level: Level) -> FsLogLevel {
    match level {
        Level::Error => FsLogLevel::Error,
        Level::Warn => FsLogLevel::Warn,
        Level::Info => FsLogLevel::Info,
        Level::Debug => FsLogLevel::Debug,
        Level::Trace => FsLogLevel::Trace,
    }
}

fn string_view_from_str(value: &str) -> FsStringView {
    FsStringView {
        ptr: value.as_ptr() as *const c_char,
        len: value.len(),
    }
}

pub fn log_set_stderr(level: FsLogLevel) -> FsCacheStatus {
    if matches!(init_logger(), LoggerInstall::External) {
        return FsCacheStatus::IoError;
    }
    LOGGER.set_mode(MODE_STDERR);
    LOGGER.set_level(level);
    FsCacheStatus::Ok
}

pub fn log_set_callback(callback: FsLogCallback, user_data: *mut c_void, level: FsLogLevel) -> FsCacheStatus {
    if callback.is_none() {
        return log_disable();
    }
    if matches!(init_logger(), LoggerInstall::External) {
        return FsCacheStatus::IoError;
    }
    LOGGER.set_callback(callback, user_data);
    LOGGER.set_mode(MODE_CALLBACK);
    LOGGER.set_level(level);
    FsCacheStatus::Ok
}

/// Routes records to `hook`. Replaces any callback or stderr sink.
pub fn log_set_hook(hook: LogHook, level: FsLogLevel) -> FsCacheStatus {
    if matches!(init_logger(), LoggerInstall::External) {
        return FsCacheStatus::IoError;
    }
    LOGGER.set_hook(Some(hook));
    LOGGER.set_mode(MODE_HOOK);
    LOGGER.set_level(level);
    FsCacheStatus::Ok
}

pub fn log_set_level(level: FsLogLevel) -> FsCacheStatus {
    match init_logger() {
        LoggerInstall::Installed => LOGGER.set_level(level),
        LoggerInstall::External => log::set_max_level(level_filter_from_u8(level as u8)),
    }
    FsCacheStatus::Ok
}

pub fn log_disable() -> FsCacheStatus {
    match init_logger() {
        LoggerInstall::Installed => {
            LOGGER.set_mode(MODE_DISABLED);
            LOGGER.set_level(FsLogLevel::Off);
            LOGGER.set_hook(None);
        }
        LoggerInstall::External => log::set_max_level(LevelFilter::Off),
    }
    FsCacheStatus::Ok
}
