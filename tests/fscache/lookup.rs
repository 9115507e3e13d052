use fscache::*;

use crate::support::{cache_over, cache_with, wide, MemBackend};

fn usr_tree() -> std::sync::Arc<MemBackend> {
    let backend = MemBackend::new();
    backend.write("/usr/Include/Stdio.h", 120);
    backend.write("/usr/Include/sys/types.h", 40);
    backend.write("/usr/lib/libc.so", 4096);
    backend
}

#[test]
fn resolves_case_insensitively_and_keeps_disk_names() {
    let backend = usr_tree();
    let cache = cache_over(&backend, CacheFlags::empty());

    let upper = cache.lookup("/USR/INCLUDE/STDIO.H").unwrap();
    let lower = cache.lookup("/usr/include/stdio.h").unwrap();
    assert_eq!(upper, lower);
    assert_eq!(cache.kind(upper).unwrap(), ObjKind::File);
    assert_eq!(cache.full_path(upper).unwrap(), "/usr/Include/Stdio.h");
    assert_eq!(cache.info(upper).unwrap().name, "Stdio.h");

    cache.release(upper).unwrap();
    cache.release(lower).unwrap();
}

#[test]
fn repeated_lookup_is_a_path_hit() {
    let backend = usr_tree();
    let cache = cache_over(&backend, CacheFlags::empty());

    let first = cache.lookup("/usr/lib/libc.so").unwrap();
    let reads = backend.read_dir_count();
    let walks = cache.stats().walk_hits;

    let second = cache.lookup("/usr/lib/libc.so").unwrap();
    assert_eq!(first, second);
    let stats = cache.stats();
    assert_eq!(stats.walk_hits, walks);
    assert_eq!(stats.path_hits, 1);
    assert_eq!(stats.lookups, 2);
    assert_eq!(backend.read_dir_count(), reads);
}

#[test]
fn spellings_get_separate_entries_for_one_object() {
    let backend = usr_tree();
    let cache = cache_over(&backend, CacheFlags::empty());

    let plain = cache.lookup("/usr/include/stdio.h").unwrap();
    let doubled = cache.lookup("/usr//include/./stdio.h").unwrap();
    let backslashed = cache.lookup("\\usr\\include\\stdio.h").unwrap();
    assert_eq!(plain, doubled);
    assert_eq!(plain, backslashed);
    assert_eq!(cache.stats().narrow_paths, 3);
}

#[test]
fn walk_errors_are_specific() {
    let backend = usr_tree();
    let cache = cache_over(&backend, CacheFlags::empty());

    assert_eq!(cache.lookup("/usr/nope/x.h"), Err(LookupError::PathCompNotFound));
    assert_eq!(cache.lookup("/usr/include/nope.h"), Err(LookupError::PathCompNotFound));
    assert_eq!(
        cache.lookup("/usr/include/stdio.h/x"),
        Err(LookupError::PathCompNotDir)
    );
    assert_eq!(cache.lookup("/usr/include/stdio.h/"), Err(LookupError::NotDir));
    assert_eq!(cache.lookup("C:\\Windows"), Err(LookupError::Unsupported));
    assert_eq!(cache.lookup("\\\\server\\share\\x"), Err(LookupError::Unsupported));

    let long = format!("/{}", "a/".repeat(DEFAULT_MAX_PATH));
    assert_eq!(cache.lookup(&long), Err(LookupError::PathTooLong));
    let component = format!("/usr/{}", "x".repeat(DEFAULT_MAX_COMPONENT + 1));
    assert_eq!(cache.lookup(&component), Err(LookupError::PathTooLong));
}

#[test]
fn trailing_separator_accepts_directories() {
    let backend = usr_tree();
    let cache = cache_over(&backend, CacheFlags::empty());

    let dir = cache.lookup("/usr/include/").unwrap();
    assert_eq!(cache.kind(dir).unwrap(), ObjKind::Directory);
    assert_eq!(cache.full_path(dir).unwrap(), "/usr/Include");

    let anchor = cache.lookup("/").unwrap();
    assert_eq!(cache.kind(anchor).unwrap(), ObjKind::Directory);
    assert_eq!(cache.full_path(anchor).unwrap(), "/");
}

#[test]
fn dotdot_moves_up_and_stops_at_the_anchor() {
    let backend = usr_tree();
    let cache = cache_over(&backend, CacheFlags::empty());

    let via_parent = cache.lookup("/usr/include/../lib/libc.so").unwrap();
    let direct = cache.lookup("/usr/lib/libc.so").unwrap();
    assert_eq!(via_parent, direct);

    let above_root = cache.lookup("/../../usr").unwrap();
    assert_eq!(cache.full_path(above_root).unwrap(), "/usr");
}

#[test]
fn relative_paths_resolve_against_base_dir() {
    let backend = usr_tree();
    let cache = cache_with(&backend, CacheConfig::default().base_dir("/usr/include"));

    let header = cache.lookup("sys/types.h").unwrap();
    assert_eq!(cache.full_path(header).unwrap(), "/usr/Include/sys/types.h");

    let lib = cache.lookup("../lib/libc.so").unwrap();
    assert_eq!(cache.full_path(lib).unwrap(), "/usr/lib/libc.so");

    let base = cache.lookup("").unwrap();
    assert_eq!(cache.full_path(base).unwrap(), "/usr/Include");
}

#[test]
fn wide_lookups_share_objects_but_not_entries() {
    let backend = usr_tree();
    let cache = cache_over(&backend, CacheFlags::empty());

    let narrow = cache.lookup("/usr/include/stdio.h").unwrap();
    let wide_handle = cache.lookup_wide(&wide("/usr/include/stdio.h")).unwrap();
    assert_eq!(narrow, wide_handle);
    assert_eq!(
        cache.full_path_wide(wide_handle).unwrap(),
        wide("/usr/Include/Stdio.h")
    );

    let stats = cache.stats();
    assert_eq!(stats.narrow_paths, 1);
    assert_eq!(stats.wide_paths, 1);

    let again = cache.lookup_wide(&wide("/usr/include/stdio.h")).unwrap();
    assert_eq!(again, narrow);
    assert_eq!(cache.stats().path_hits, 1);

    let lone_surrogate = [u16::from(b'/'), 0xD800];
    assert_eq!(
        cache.lookup_wide(&lone_surrogate),
        Err(LookupError::AnsiConversionError)
    );
}

#[test]
fn short_names_match_and_build_short_paths() {
    let backend = MemBackend::new();
    backend.write("/Program Files/Tool/app.exe", 1);
    backend.set_short_name("/Program Files", "PROGRA~1");
    let cache = cache_over(&backend, CacheFlags::empty());

    let app = cache.lookup("/progra~1/tool/APP.EXE").unwrap();
    assert_eq!(cache.full_path(app).unwrap(), "/Program Files/Tool/app.exe");
    assert_eq!(cache.short_path(app).unwrap(), "/PROGRA~1/Tool/app.exe");

    let dir = cache.lookup("/Program Files").unwrap();
    let info = cache.info(dir).unwrap();
    assert_eq!(info.short_name.as_deref(), Some("PROGRA~1"));
}

#[test]
fn case_sensitive_flag_compares_exactly() {
    let backend = usr_tree();
    let cache = cache_over(&backend, CacheFlags::CASE_SENSITIVE);

    assert_eq!(cache.lookup("/USR"), Err(LookupError::PathCompNotFound));
    let exact = cache.lookup("/usr/Include/Stdio.h").unwrap();
    assert_eq!(cache.kind(exact).unwrap(), ObjKind::File);
}

#[test]
fn large_directories_stay_resolvable_once_indexed() {
    let backend = MemBackend::new();
    for i in 0..100 {
        backend.touch(&format!("/big/File{i:03}.c"));
    }
    let config = CacheConfig::default().base_dir("/").child_hash_threshold(4);
    let cache = cache_with(&backend, config);

    for i in (0..100).rev() {
        let handle = cache.lookup(&format!("/BIG/file{i:03}.C")).unwrap();
        assert_eq!(
            cache.full_path(handle).unwrap(),
            format!("/big/File{i:03}.c")
        );
    }
    assert_eq!(cache.lookup("/big/file100.c"), Err(LookupError::PathCompNotFound));
    assert_eq!(cache.stats().populations, 2);
}

#[test]
fn folding_collisions_keep_the_first_entry() {
    let backend = MemBackend::new();
    backend.touch("/src/Makefile");
    backend.touch("/src/makefile");
    let cache = cache_over(&backend, CacheFlags::empty());

    let handle = cache.lookup("/src/MAKEFILE").unwrap();
    assert_eq!(cache.full_path(handle).unwrap(), "/src/Makefile");
    assert_eq!(cache.stats().name_collisions, 1);
}

#[test]
fn other_entries_are_classified() {
    let backend = MemBackend::new();
    backend.add_other("/dev/null");
    let cache = cache_over(&backend, CacheFlags::empty());

    let handle = cache.lookup("/dev/null").unwrap();
    assert_eq!(cache.kind(handle).unwrap(), ObjKind::Other);
}

#[test]
fn unreadable_directory_is_a_read_error_and_not_cached() {
    let backend = usr_tree();
    backend.deny("/usr/lib");
    let cache = cache_over(&backend, CacheFlags::MISSING_PATHS);

    assert_eq!(cache.lookup("/usr/lib/libc.so"), Err(LookupError::DirReadError));
    assert_eq!(cache.lookup("/usr/lib/libc.so"), Err(LookupError::DirReadError));
    assert_eq!(cache.stats().narrow_paths, 0);
    assert_eq!(cache.stats().path_hits, 0);
}

#[test]
fn stat_is_lazy_and_cached() {
    let backend = usr_tree();
    let cache = cache_over(&backend, CacheFlags::MISSING_OBJECTS);

    let lib = cache.lookup("/usr/lib/libc.so").unwrap();
    assert_eq!(backend.stat_count(), 0);
    assert_eq!(cache.stat(lib).unwrap().size, 4096);
    assert_eq!(cache.stat(lib).unwrap().size, 4096);
    assert_eq!(backend.stat_count(), 1);

    let missing = cache.lookup("/usr/lib/libm.so").unwrap();
    assert_eq!(cache.stat(missing), Err(LookupError::NotFound));
}

#[test]
fn volume_boundaries_requery_flags() {
    let backend = MemBackend::with_volume(VolumeFlags::DIR_MTIME_TRACKS_CHILDREN);
    backend.touch("/mnt/usb/readme.txt");
    backend.mount("/mnt/usb", 7, VolumeFlags::SHORT_NAMES);
    let cache = cache_over(&backend, CacheFlags::empty());

    let file = cache.lookup("/mnt/usb/readme.txt").unwrap();
    assert_eq!(cache.info(file).unwrap().volume, VolumeFlags::SHORT_NAMES);
    let usb = cache.lookup("/mnt/usb").unwrap();
    assert_eq!(cache.info(usb).unwrap().volume, VolumeFlags::SHORT_NAMES);
    let mnt = cache.lookup("/mnt").unwrap();
    assert_eq!(cache.info(mnt).unwrap().volume, VolumeFlags::DIR_MTIME_TRACKS_CHILDREN);
}

#[test]
fn paths_longer_than_sixty_four_kib_resolve() {
    let backend = MemBackend::new();
    let component = "x".repeat(25_000);
    let path = format!("/{component}/{component}/{component}");
    backend.touch(&path);
    let config = CacheConfig {
        max_path: 80_000,
        max_component: 30_000,
        ..CacheConfig::default().base_dir("/")
    };
    let cache = cache_with(&backend, config);

    let handle = cache.lookup(&path).unwrap();
    assert_eq!(cache.kind(handle).unwrap(), ObjKind::File);
    assert_eq!(cache.full_path(handle).unwrap(), path);
    assert_eq!(cache.lookup(&path).unwrap(), handle);
}

#[test]
fn overlong_listing_entries_are_skipped_not_counted_as_collisions() {
    let backend = MemBackend::new();
    backend.touch("/d/ok.c");
    let overlong = format!("/d/{}", "n".repeat(300));
    backend.touch(&overlong);
    backend.set_short_name(&overlong, "NNNNNN~1");
    backend.touch("/d/also.c");
    let cache = cache_over(&backend, CacheFlags::empty());

    assert!(cache.lookup("/d/ok.c").is_ok());
    assert!(cache.lookup("/d/also.c").is_ok());
    assert_eq!(cache.lookup("/d/nnnnnn~1"), Err(LookupError::PathCompNotFound));
    assert_eq!(cache.lookup(&overlong), Err(LookupError::PathTooLong));
    assert_eq!(cache.stats().name_collisions, 0);
}
