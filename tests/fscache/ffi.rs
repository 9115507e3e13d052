use std::ffi::c_char;

use fscache::*;

fn view(path: &str) -> FsStringView {
    FsStringView {
        ptr: path.as_ptr() as *const c_char,
        len: path.len(),
    }
}

fn wide_view(units: &[u16]) -> FsWideStringView {
    FsWideStringView {
        ptr: units.as_ptr(),
        len: units.len(),
    }
}

fn owned(value: FsStringView) -> String {
    let bytes = unsafe { std::slice::from_raw_parts(value.ptr as *const u8, value.len) };
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[test]
fn c_abi_round_trip() {
    let temp = tempfile::tempdir().unwrap();
    std::fs::create_dir(temp.path().join("Dir")).unwrap();
    std::fs::write(temp.path().join("Dir").join("File.txt"), b"hello").unwrap();
    let root = temp.path().to_str().unwrap().to_string();

    let cache = fscache_create(std::ptr::null());
    assert!(!cache.is_null());

    let query = format!("{root}/dir/FILE.TXT");
    let mut obj: FsObjHandle = 0;
    assert_eq!(fscache_lookup_a(cache, &view(&query), &mut obj), FsCacheStatus::Ok);
    assert_ne!(obj, 0);
    assert_eq!(fscache_obj_type(cache, obj), FsObjType::File);

    let mut path = view("");
    assert_eq!(fscache_obj_path(cache, obj, &mut path), FsCacheStatus::Ok);
    assert_eq!(owned(path), format!("{root}/Dir/File.txt"));
    assert_eq!(unsafe { *path.ptr.add(path.len) }, 0);
    fscache_free_string(path);

    let wide: Vec<u16> = query.encode_utf16().collect();
    let mut wide_obj: FsObjHandle = 0;
    assert_eq!(fscache_lookup_w(cache, &wide_view(&wide), &mut wide_obj), FsCacheStatus::Ok);
    assert_eq!(wide_obj, obj);

    assert_eq!(fscache_obj_retain(cache, obj), FsCacheStatus::Ok);
    assert_eq!(fscache_obj_release(cache, obj), FsCacheStatus::Ok);
    assert_eq!(fscache_obj_release(cache, obj), FsCacheStatus::Ok);
    assert_eq!(fscache_obj_release(cache, wide_obj), FsCacheStatus::Ok);

    let dir_query = format!("{root}/DIR/");
    let mut dir: FsObjHandle = 0;
    assert_eq!(fscache_lookup_a(cache, &view(&dir_query), &mut dir), FsCacheStatus::Ok);
    assert_eq!(fscache_obj_type(cache, dir), FsObjType::Dir);
    assert_eq!(fscache_obj_release(cache, dir), FsCacheStatus::Ok);

    let missing = format!("{root}/Dir/none.txt");
    let mut none: FsObjHandle = 7;
    assert_eq!(
        fscache_lookup_a(cache, &view(&missing), &mut none),
        FsCacheStatus::PathCompNotFound
    );
    assert_eq!(none, 0);

    let mut stats = FsCacheStats::default();
    assert_eq!(fscache_get_stats(cache, &mut stats), FsCacheStatus::Ok);
    assert_eq!(stats.size as usize, std::mem::size_of::<FsCacheStats>());
    assert_eq!(stats.lookups, 4);
    assert_eq!(stats.path_hits, 0);

    let mut last = FsCacheStats::default();
    fscache_destroy(cache, &mut last);
    assert_eq!(last.objects_created, last.objects_freed);
    assert_eq!(last.objects, 0);
}

#[test]
fn c_abi_rejects_bad_input() {
    let cache = fscache_create(std::ptr::null());
    assert!(!cache.is_null());
    let mut obj: FsObjHandle = 0;

    let invalid = [b'/', 0xff, b'x'];
    let bad = FsStringView {
        ptr: invalid.as_ptr() as *const c_char,
        len: invalid.len(),
    };
    assert_eq!(fscache_lookup_a(cache, &bad, &mut obj), FsCacheStatus::Utf16ConversionError);

    let dangling = FsStringView {
        ptr: std::ptr::null(),
        len: 3,
    };
    assert_eq!(fscache_lookup_a(cache, &dangling, &mut obj), FsCacheStatus::InvalidArgument);
    assert_eq!(
        fscache_lookup_a(std::ptr::null_mut(), &view("/"), &mut obj),
        FsCacheStatus::InvalidArgument
    );

    assert_eq!(fscache_obj_type(cache, 0), FsObjType::Invalid);
    assert_eq!(fscache_obj_release(cache, 0), FsCacheStatus::InternalError);
    assert_eq!(fscache_obj_retain(cache, 0), FsCacheStatus::InternalError);

    let mut small = FsCacheStats {
        size: 8,
        ..FsCacheStats::default()
    };
    assert_eq!(fscache_get_stats(cache, &mut small), FsCacheStatus::InvalidArgument);
    assert_eq!(fscache_invalidate_existing(std::ptr::null_mut()), FsCacheStatus::InvalidArgument);
    assert_eq!(fscache_invalidate_missing(cache), FsCacheStatus::Ok);

    fscache_destroy(cache, std::ptr::null_mut());
    fscache_destroy(std::ptr::null_mut(), std::ptr::null_mut());
}

#[test]
fn c_abi_honors_missing_object_flag() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().to_str().unwrap().to_string();

    let config = FsCacheConfig {
        flags: FSCACHE_FLAG_MISSING_OBJECTS | FSCACHE_FLAG_MISSING_PATHS,
        ..FsCacheConfig::default()
    };
    let cache = fscache_create(&config);
    assert!(!cache.is_null());

    let query = format!("{root}/optional.cfg");
    let mut first: FsObjHandle = 0;
    assert_eq!(fscache_lookup_a(cache, &view(&query), &mut first), FsCacheStatus::Ok);
    assert_eq!(fscache_obj_type(cache, first), FsObjType::Missing);

    std::fs::write(temp.path().join("optional.cfg"), b"").unwrap();
    assert_eq!(fscache_invalidate_missing(cache), FsCacheStatus::Ok);

    let mut second: FsObjHandle = 0;
    assert_eq!(fscache_lookup_a(cache, &view(&query), &mut second), FsCacheStatus::Ok);
    assert_eq!(second, first);
    assert_eq!(fscache_obj_type(cache, second), FsObjType::File);

    fscache_obj_release(cache, first);
    fscache_obj_release(cache, second);
    let mut last = FsCacheStats::default();
    fscache_destroy(cache, &mut last);
    assert_eq!(last.objects_created, last.objects_freed);
}
