//! End-to-end verification against in-memory repositories.
//!
//! Scripts here are POSIX shell scripts run with `sh`, so these tests need no
//! Python interpreter.

use std::sync::Arc;

use grader_core::engine::short_digest;
use grader_core::{
    AttemptResult, Contract, EngineConfig, MemoryCompletionRecorder, VerificationContext,
    VerificationEngine, VerificationOutcome, VerificationRequest, VerificationStatus,
};
use grader_remote::fakes::{MemoryRepository, StaticRepositoryResolver};
use grader_remote::{EnvLookup, Identity, RepositoryInfo, RepositorySelector, RepositorySet};

const DATAFRAME_SCRIPT: &str = r#"cat <<'EOF'
Orders loaded
shape: (2, 2)
columns: ['id', 'total']
head:
   id  total
0   1   10.5
1   2    7.0

dtypes:
id         int64
total    float64
dtype: object
EOF
"#;

struct Harness {
    repo: Arc<MemoryRepository>,
    recorder: Arc<MemoryCompletionRecorder>,
    engine: VerificationEngine,
}

fn no_env() -> EnvLookup {
    Arc::new(|_: &str| -> Option<String> { None })
}

fn harness(repositories: RepositorySet, config: EngineConfig) -> Harness {
    let repo = Arc::new(MemoryRepository::new());
    let recorder = Arc::new(MemoryCompletionRecorder::new());
    let engine = VerificationEngine::new(
        repo.clone(),
        Arc::new(StaticRepositoryResolver::new(repositories)),
        recorder.clone(),
        config,
    )
    .with_selector(RepositorySelector::default().with_env(no_env()));
    Harness {
        repo,
        recorder,
        engine,
    }
}

fn sales_only() -> RepositorySet {
    vec![RepositoryInfo::new("ventas", "acme/ventas", "main")]
        .into_iter()
        .collect()
}

fn sales_and_operations() -> RepositorySet {
    vec![
        RepositoryInfo::new("ventas", "acme/ventas", "main"),
        RepositoryInfo::new("operaciones", "acme/operaciones", "main"),
    ]
    .into_iter()
    .collect()
}

fn sh_config() -> EngineConfig {
    EngineConfig::new().with_python("sh")
}

fn request(contract: &str) -> VerificationRequest {
    VerificationRequest {
        identity: Identity::new("ana", Some("ventas")),
        mission_id: "m3".to_string(),
        mission_roles: Vec::new(),
        contract: Contract::from_json(contract).unwrap(),
    }
}

async fn verify(h: &Harness, request: &VerificationRequest) -> VerificationOutcome {
    h.engine.verify(request, &VerificationContext::new()).await
}

#[tokio::test]
async fn test_dataframe_round_trip_passes_and_records_completion() {
    let h = harness(sales_only(), sh_config());
    h.repo
        .add_file("acme/ventas", "main", "scripts/report.sh", DATAFRAME_SCRIPT.as_bytes());

    let req = request(
        r#"{
            "script_path": "scripts/report.sh",
            "validations": [
                {"type": "output_contains", "text": "Orders loaded"},
                {"type": "dataframe_output",
                 "shape": [2, 2],
                 "columns": ["id", "total"],
                 "head": "   id  total\n0   1   10.5\n1   2    7.0",
                 "dtypes": {"id": "int64", "total": "float64"}}
            ]
        }"#,
    );

    let outcome = verify(&h, &req).await;
    assert_eq!(outcome.status, VerificationStatus::Passed, "{:?}", outcome.feedback);
    assert!(outcome.feedback.is_empty());
    assert!(outcome.completion_recorded);
    assert_eq!(outcome.repository.as_deref(), Some("acme/ventas"));
    assert_eq!(
        outcome.script_digest,
        Some(short_digest(DATAFRAME_SCRIPT.as_bytes()))
    );
    assert!(h.recorder.contains("ana", "m3"));
}

#[tokio::test]
async fn test_repeated_pass_records_completion_once() {
    let h = harness(sales_only(), sh_config());
    h.repo
        .add_file("acme/ventas", "main", "run.sh", b"echo 'Shape: (3, 7)'\n");
    let req = request(
        r#"{"script_path": "run.sh",
            "validations": [{"type": "output_contains", "text": "Shape: "}]}"#,
    );

    let first = verify(&h, &req).await;
    let second = verify(&h, &req).await;
    assert!(first.passed());
    assert!(second.passed());
    assert!(second.completion_recorded);
    assert_eq!(h.recorder.entries().len(), 1);
}

#[tokio::test]
async fn test_output_contains_failure_names_text() {
    let h = harness(sales_only(), sh_config());
    h.repo
        .add_file("acme/ventas", "main", "run.sh", b"echo 'rows=3 cols=7'\n");
    let req = request(
        r#"{"script_path": "run.sh",
            "validations": [{"type": "output_contains", "text": "Shape: "}]}"#,
    );

    let outcome = verify(&h, &req).await;
    assert_eq!(outcome.status, VerificationStatus::Failed);
    assert_eq!(outcome.feedback.len(), 1);
    assert!(outcome.feedback[0].contains("Shape: "));
    assert!(!outcome.completion_recorded);
    assert!(h.recorder.entries().is_empty());
}

#[tokio::test]
async fn test_candidate_fallback_uses_second_repository_only() {
    let h = harness(sales_and_operations(), sh_config());
    // sales has the script and one data file but lacks the second
    h.repo.add_file(
        "acme/ventas",
        "main",
        "students/ana/run.sh",
        b"echo from-sales\n",
    );
    h.repo
        .add_file("acme/ventas", "main", "students/ana/a.csv", b"sales-a\n");

    let ops_script = b"cd \"$(dirname \"$0\")\"\ncat a.csv b.csv\n";
    h.repo
        .add_file("acme/operaciones", "main", "students/ana/run.sh", ops_script);
    h.repo
        .add_file("acme/operaciones", "main", "students/ana/a.csv", b"ops-a\n");
    h.repo
        .add_file("acme/operaciones", "main", "students/ana/b.csv", b"ops-b\n");

    let mut req = request(
        r#"{
            "script_path": "run.sh",
            "required_files": ["a.csv", "b.csv"],
            "source": {"prefer_repository_by_role": true, "base_path_template": "students/{slug}"},
            "validations": [{"type": "output_contains", "text": "ops-a\nops-b\n"}]
        }"#,
    );
    req.mission_roles = vec!["operaciones".to_string()];

    let outcome = verify(&h, &req).await;
    assert_eq!(outcome.status, VerificationStatus::Passed, "{:?}", outcome.feedback);
    assert_eq!(outcome.repository.as_deref(), Some("acme/operaciones"));
    assert_eq!(outcome.script_digest, Some(short_digest(ops_script)));

    assert_eq!(outcome.attempts.len(), 2);
    assert_eq!(outcome.attempts[0].key, "ventas");
    assert_eq!(outcome.attempts[0].result, AttemptResult::Missing);
    assert_eq!(outcome.attempts[0].detail.as_deref(), Some("b.csv"));
    assert_eq!(outcome.attempts[1].key, "operaciones");
    assert_eq!(outcome.attempts[1].result, AttemptResult::Passed);
}

#[tokio::test]
async fn test_last_candidate_missing_file_uses_custom_feedback() {
    let h = harness(sales_only(), sh_config());
    let req = request(
        r#"{
            "script_path": "scripts/m3.sh",
            "source": {"base_path_template": "students/{slug}"},
            "feedback_script_missing": "Upload {script_path}. Looked in {source}."
        }"#,
    );

    let outcome = verify(&h, &req).await;
    assert_eq!(outcome.status, VerificationStatus::Failed);
    assert_eq!(
        outcome.feedback,
        vec![
            "Upload scripts/m3.sh. Looked in acme/ventas (branch main) at students/ana/scripts/m3.sh."
                .to_string()
        ]
    );
    assert_eq!(outcome.attempts[0].result, AttemptResult::Missing);
}

#[tokio::test]
async fn test_download_error_does_not_fall_back() {
    let h = harness(sales_and_operations(), sh_config());
    h.repo.fail_path("acme/ventas", "run.sh", "GitHub answered 502");
    h.repo
        .add_file("acme/operaciones", "main", "run.sh", b"echo ok\n");

    let mut req = request(
        r#"{"script_path": "run.sh", "source": {"prefer_repository_by_role": true}}"#,
    );
    req.mission_roles = vec!["operaciones".to_string()];

    let outcome = verify(&h, &req).await;
    assert_eq!(outcome.status, VerificationStatus::Failed);
    assert_eq!(outcome.attempts.len(), 1);
    assert_eq!(outcome.attempts[0].result, AttemptResult::Error);
    assert!(outcome.feedback[0].contains("502"));
    assert_eq!(h.repo.fetch_count(), 1);
}

#[tokio::test]
async fn test_backup_root_supplies_missing_required_file() {
    let backup = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(backup.path().join("sources")).unwrap();
    std::fs::write(backup.path().join("sources/seed.csv"), b"id\n9\n").unwrap();

    let h = harness(sales_only(), sh_config().with_backup_root(backup.path()));
    h.repo
        .add_file("acme/ventas", "main", "run.sh", b"cat sources/seed.csv\n");
    let req = request(
        r#"{"script_path": "run.sh",
            "required_files": ["sources/seed.csv"],
            "validations": [{"type": "output_contains", "text": "id\n9"}]}"#,
    );

    let outcome = verify(&h, &req).await;
    assert_eq!(outcome.status, VerificationStatus::Passed, "{:?}", outcome.feedback);
    assert_eq!(outcome.backups_used, vec!["sources/seed.csv".to_string()]);
}

#[tokio::test]
async fn test_nonzero_exit_reports_streams() {
    let h = harness(sales_only(), sh_config());
    h.repo.add_file(
        "acme/ventas",
        "main",
        "run.sh",
        b"echo partial\necho 'KeyError: total' >&2\nexit 1\n",
    );
    let req = request(
        r#"{"script_path": "run.sh",
            "validations": [{"type": "output_contains", "text": "partial"}]}"#,
    );

    let outcome = verify(&h, &req).await;
    assert_eq!(outcome.status, VerificationStatus::Failed);
    assert_eq!(outcome.feedback[0], "The script exited with status 1.");
    assert_eq!(outcome.feedback[1], "stdout:\npartial\n");
    assert_eq!(outcome.feedback[2], "stderr:\nKeyError: total\n");
}

#[tokio::test]
async fn test_timeout_fails_without_hanging() {
    let h = harness(sales_only(), sh_config());
    h.repo
        .add_file("acme/ventas", "main", "run.sh", b"sleep 30\n");
    let req = request(r#"{"script_path": "run.sh", "timeout_seconds": 1}"#);

    let started = std::time::Instant::now();
    let outcome = verify(&h, &req).await;
    assert_eq!(outcome.status, VerificationStatus::Failed);
    assert!(outcome.feedback[0].contains("timed out"), "{:?}", outcome.feedback);
    assert!(started.elapsed() < std::time::Duration::from_secs(15));
    assert!(!outcome.completion_recorded);
}

#[tokio::test]
async fn test_unknown_repository_key_is_config_error() {
    let h = harness(sales_only(), sh_config());
    let req = request(r#"{"script_path": "run.sh", "source": {"repository": "finanzas"}}"#);

    let outcome = verify(&h, &req).await;
    assert_eq!(outcome.status, VerificationStatus::ConfigError);
    assert!(outcome.feedback[0].contains("finanzas"));
    assert!(outcome.attempts.is_empty());
}

#[tokio::test]
async fn test_no_configured_repositories_is_config_error() {
    let h = harness(RepositorySet::new(), sh_config());
    let outcome = verify(&h, &request(r#"{"script_path": "run.sh"}"#)).await;
    assert_eq!(outcome.status, VerificationStatus::ConfigError);
}

#[tokio::test]
async fn test_cancelled_request_does_not_run() {
    let h = harness(sales_only(), sh_config());
    h.repo
        .add_file("acme/ventas", "main", "run.sh", b"echo ok\n");
    let ctx = VerificationContext::new();
    ctx.cancel();

    let outcome = h
        .engine
        .verify(&request(r#"{"script_path": "run.sh"}"#), &ctx)
        .await;
    assert_eq!(outcome.status, VerificationStatus::Failed);
    assert!(outcome.feedback[0].contains("cancelled"));
    assert_eq!(h.repo.fetch_count(), 0);
    assert!(h.recorder.entries().is_empty());
}
