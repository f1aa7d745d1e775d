use super::*;
use crate::types::{ChecksumAlgorithm, Status, Validation};
use tempfile::TempDir;


/// Cache rooted in a fresh temporary directory, with its own system tmp area
fn test_cache() -> (Cache, TempDir) {
    let dir = TempDir::new().unwrap();
    let config = CacheConfig {
        root_dir: dir.path().join("root"),
        system_tmp_dir: dir.path().join("system-tmp"),
    };
    std::fs::create_dir_all(&config.system_tmp_dir).unwrap();
    (Cache::new("unit", &config), dir)
}

fn descriptor(url: &str, status: Status) -> TaskDescriptor {
    let mut d = TaskDescriptor::new(url, crate::utils::default_file_name(url));
    d.status = status;
    d
}

#[tokio::test]
async fn layout_is_rooted_under_identifier() {
    let (cache, dir) = test_cache();
    let base = dir.path().join("root").join("unit").join("Downloads");
    assert_eq!(cache.download_path(), base);
    assert_eq!(cache.download_tmp_path(), base.join("Tmp"));
    assert_eq!(cache.download_file_path(), base.join("File"));
    assert_eq!(cache.tasks_path(), base.join("unit_Tasks.json"));
    assert_eq!(cache.file_path("a.bin"), base.join("File").join("a.bin"));
}

#[test]
fn create_directory_is_idempotent() {
    let (cache, _dir) = test_cache();
    tokio_test::block_on(cache.create_directory()).unwrap();
    tokio_test::block_on(cache.create_directory()).unwrap();
    assert!(cache.download_tmp_path().is_dir());
    assert!(cache.download_file_path().is_dir());
}

#[tokio::test]
async fn create_directory_reports_blocked_path() {
    let (cache, _dir) = test_cache();
    std::fs::create_dir_all(cache.download_path().parent().unwrap()).unwrap();
    // A plain file where the root directory should be
    std::fs::write(cache.download_path(), b"in the way").unwrap();

    let err = cache.create_directory().await.unwrap_err();
    assert!(
        matches!(err, CacheError::CreateDirectory { .. }),
        "expected CreateDirectory, got {err:?}"
    );
}

#[tokio::test]
async fn completed_length_checks_expected_size() {
    let (cache, _dir) = test_cache();
    cache.create_directory().await.unwrap();
    std::fs::write(cache.file_path("f.bin"), vec![0u8; 10]).unwrap();

    assert_eq!(cache.completed_length("f.bin", 0).await, Some(10));
    assert_eq!(cache.completed_length("f.bin", 10).await, Some(10));
    assert_eq!(cache.completed_length("f.bin", 11).await, None);
    assert_eq!(cache.completed_length("missing.bin", 0).await, None);
    assert!(cache.file_exists("f.bin").await);
}

#[test]
fn checksum_fields_survive_descriptor_round_trip() {
    let mut d = descriptor("https://example.com/a.iso", Status::Succeeded);
    d.verification_code = Some("abc".into());
    d.verification_type = ChecksumAlgorithm::Sha1;
    d.validation = Validation::Incorrect;
    let json = serde_json::to_string(&d).unwrap();
    assert_eq!(serde_json::from_str::<TaskDescriptor>(&json).unwrap(), d);
}
