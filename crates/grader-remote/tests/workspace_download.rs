//! Workspace downloads and per-attempt accessor caching over the in-memory repository.

use std::sync::Arc;

use grader_remote::fakes::MemoryRepository;
use grader_remote::{RepositoryFileAccessor, RepositoryInfo, RepositorySelection};

fn selection() -> RepositorySelection {
    RepositorySelection {
        info: RepositoryInfo::new("ventas", "acme/ventas", "main"),
        branch: "main".to_string(),
        base_path: "students/ana".to_string(),
    }
}

fn repository() -> Arc<MemoryRepository> {
    Arc::new(
        MemoryRepository::new()
            .with_file("acme/ventas", "main", "students/ana/scripts/m1.py", b"print(1)")
            .with_file("acme/ventas", "main", "students/ana/data/orders.csv", b"id\n1\n")
            .with_file("acme/ventas", "main", "students/ana/data/raw/q1.csv", b"q\n")
            .with_file("acme/ventas", "main", "students/ana/data/raw/deep/q2.csv", b"q2\n"),
    )
}

#[tokio::test]
async fn test_download_tree_materializes_directories_recursively() {
    let repo = repository();
    let accessor = RepositoryFileAccessor::new(repo.clone(), selection());
    let dir = tempfile::tempdir().unwrap();

    accessor
        .download_workspace(&["./data/".to_string()], dir.path())
        .await
        .unwrap();

    assert_eq!(std::fs::read(dir.path().join("data/orders.csv")).unwrap(), b"id\n1\n");
    assert_eq!(std::fs::read(dir.path().join("data/raw/q1.csv")).unwrap(), b"q\n");
    assert_eq!(
        std::fs::read(dir.path().join("data/raw/deep/q2.csv")).unwrap(),
        b"q2\n"
    );
    assert!(!dir.path().join("scripts").exists());
}

#[tokio::test]
async fn test_download_tree_single_file_entry() {
    let accessor = RepositoryFileAccessor::new(repository(), selection());
    let dir = tempfile::tempdir().unwrap();

    accessor
        .download_workspace(&["scripts/m1.py".to_string(), "".to_string()], dir.path())
        .await
        .unwrap();

    assert_eq!(std::fs::read(dir.path().join("scripts/m1.py")).unwrap(), b"print(1)");
}

#[tokio::test]
async fn test_download_tree_missing_path_is_not_found() {
    let accessor = RepositoryFileAccessor::new(repository(), selection());
    let dir = tempfile::tempdir().unwrap();

    let err = accessor
        .download_workspace(&["nope".to_string()], dir.path())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_download_tree_rejects_parent_segments() {
    let accessor = RepositoryFileAccessor::new(repository(), selection());
    let dir = tempfile::tempdir().unwrap();

    let err = accessor
        .download_workspace(&["../other".to_string()], dir.path())
        .await
        .unwrap_err();
    assert!(err.is_configuration());
}

#[tokio::test]
async fn test_accessor_caches_by_remote_path() {
    let repo = repository();
    let accessor = RepositoryFileAccessor::new(repo.clone(), selection());

    let first = accessor.read_bytes("scripts/m1.py").await.unwrap();
    let second = accessor
        .read_remote("students/ana/scripts/m1.py")
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(repo.fetch_count(), 1);
    assert_eq!(accessor.cached_paths(), vec!["students/ana/scripts/m1.py"]);
}

#[tokio::test]
async fn test_accessor_cache_is_per_instance() {
    let repo = repository();
    let one = RepositoryFileAccessor::new(repo.clone(), selection());
    let two = RepositoryFileAccessor::new(repo.clone(), selection());

    one.read_bytes("scripts/m1.py").await.unwrap();
    two.read_bytes("scripts/m1.py").await.unwrap();
    assert_eq!(repo.fetch_count(), 2);
}

#[tokio::test]
async fn test_accessor_exists_and_describe_source() {
    let accessor = RepositoryFileAccessor::new(repository(), selection());

    assert!(accessor.exists("data/orders.csv").await.unwrap());
    assert!(!accessor.exists("data/missing.csv").await.unwrap());
    assert_eq!(
        accessor.describe_source(Some("data/orders.csv")),
        "acme/ventas (branch main) at students/ana/data/orders.csv"
    );
    assert_eq!(accessor.describe_source(None), "acme/ventas (branch main)");
    assert_eq!(accessor.read_text("scripts/m1.py").await.unwrap(), "print(1)");
}

#[tokio::test]
async fn test_accessor_exists_propagates_download_errors() {
    let repo = repository();
    repo.fail_path("acme/ventas", "students/ana/data/orders.csv", "503 unavailable");
    let accessor = RepositoryFileAccessor::new(repo, selection());

    let err = accessor.exists("data/orders.csv").await.unwrap_err();
    assert!(!err.is_not_found());
}
