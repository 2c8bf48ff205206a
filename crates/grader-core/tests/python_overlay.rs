//! Overlay behaviour as seen from a real Python child.
//!
//! Each test returns early when no `python3` is on PATH.

use std::sync::Arc;

use grader_core::{
    Contract, EngineConfig, MemoryCompletionRecorder, VerificationContext, VerificationEngine,
    VerificationOutcome, VerificationRequest, VerificationStatus,
};
use grader_remote::fakes::{MemoryRepository, StaticRepositoryResolver};
use grader_remote::{EnvLookup, Identity, RepositoryInfo, RepositorySelector, RepositorySet};

const REPO: &str = "acme/ventas";

fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn no_env() -> EnvLookup {
    Arc::new(|_: &str| -> Option<String> { None })
}

fn engine(repo: Arc<MemoryRepository>) -> VerificationEngine {
    let repositories: RepositorySet = vec![RepositoryInfo::new("ventas", REPO, "main")]
        .into_iter()
        .collect();
    VerificationEngine::new(
        repo,
        Arc::new(StaticRepositoryResolver::new(repositories)),
        Arc::new(MemoryCompletionRecorder::new()),
        EngineConfig::new().with_python("python3").with_timeout_secs(20),
    )
    .with_selector(RepositorySelector::default().with_env(no_env()))
}

async fn run(repo: Arc<MemoryRepository>, contract: &str) -> VerificationOutcome {
    let request = VerificationRequest {
        identity: Identity::new("ana", Some("ventas")),
        mission_id: "m1".to_string(),
        mission_roles: Vec::new(),
        contract: Contract::from_json(contract).unwrap(),
    };
    engine(repo)
        .verify(&request, &VerificationContext::new())
        .await
}

fn student_repo(script: &str) -> Arc<MemoryRepository> {
    Arc::new(
        MemoryRepository::new()
            .with_file(REPO, "main", "students/ana/scripts/m1.py", script.as_bytes())
            .with_file(REPO, "main", "students/ana/sources/orders.csv", b"id,total\n1,10\n2,7\n")
            .with_file(REPO, "main", "students/ana/sources/extra.csv", b"region\nnorth\n"),
    )
}

#[tokio::test]
async fn test_required_file_opens_after_chdir() {
    if !python_available() {
        return;
    }
    let script = r#"
import os
os.chdir("/")
with open("sources/orders.csv") as fh:
    rows = fh.read().splitlines()
print("rows:", len(rows) - 1)
"#;
    let outcome = run(
        student_repo(script),
        r#"{
            "script_path": "scripts/m1.py",
            "required_files": ["sources/orders.csv"],
            "source": {"base_path_template": "students/{slug}"},
            "validations": [{"type": "output_contains", "text": "rows: 2"}]
        }"#,
    )
    .await;
    assert_eq!(outcome.status, VerificationStatus::Passed, "{:?}", outcome.feedback);
}

#[tokio::test]
async fn test_optional_file_is_served_without_materialising() {
    if !python_available() {
        return;
    }
    let script = r#"
import os
print("on disk:", os.path.exists("sources/extra.csv"))
with open("sources/extra.csv", "rb") as fh:
    print("extra:", fh.read().decode().splitlines()[1])
"#;
    let outcome = run(
        student_repo(script),
        r#"{
            "script_path": "scripts/m1.py",
            "optional_files": ["sources/extra.csv"],
            "source": {"base_path_template": "students/{slug}"},
            "validations": [
                {"type": "output_contains", "text": "on disk: False"},
                {"type": "output_contains", "text": "extra: north"}
            ]
        }"#,
    )
    .await;
    assert_eq!(outcome.status, VerificationStatus::Passed, "{:?}", outcome.feedback);
}

#[tokio::test]
async fn test_writes_reach_the_real_filesystem() {
    if !python_available() {
        return;
    }
    let script = r#"
with open("report.txt", "w") as fh:
    fh.write("total=17")
with open("report.txt", "a") as fh:
    fh.write(";rows=2")
with open("report.txt") as fh:
    print("report:", fh.read())
"#;
    let outcome = run(
        student_repo(script),
        r#"{
            "script_path": "scripts/m1.py",
            "source": {"base_path_template": "students/{slug}"},
            "validations": [{"type": "output_contains", "text": "report: total=17;rows=2"}]
        }"#,
    )
    .await;
    assert_eq!(outcome.status, VerificationStatus::Passed, "{:?}", outcome.feedback);
}

#[tokio::test]
async fn test_pathlib_open_uses_overlay() {
    if !python_available() {
        return;
    }
    let script = r#"
import os
import pathlib
os.chdir(os.path.dirname(os.path.abspath(__file__)))
with pathlib.Path("../sources/orders.csv").open() as fh:
    print("header:", fh.readline().strip())
print("broker env hidden:", "GRADER_FILE_BROKER" not in os.environ)
"#;
    let outcome = run(
        student_repo(script),
        r#"{
            "script_path": "scripts/m1.py",
            "required_files": ["sources/orders.csv"],
            "source": {"base_path_template": "students/{slug}"},
            "validations": [
                {"type": "output_contains", "text": "header: id,total"},
                {"type": "output_contains", "text": "broker env hidden: True"}
            ]
        }"#,
    )
    .await;
    assert_eq!(outcome.status, VerificationStatus::Passed, "{:?}", outcome.feedback);
}

#[tokio::test]
async fn test_unknown_file_raises_in_child() {
    if !python_available() {
        return;
    }
    let script = r#"
open("sources/missing.csv").read()
"#;
    let outcome = run(
        student_repo(script),
        r#"{
            "script_path": "scripts/m1.py",
            "source": {"base_path_template": "students/{slug}"}
        }"#,
    )
    .await;
    assert_eq!(outcome.status, VerificationStatus::Failed);
    assert!(outcome.feedback[0].starts_with("The script exited with status 1"));
    assert!(outcome
        .feedback
        .iter()
        .any(|line| line.contains("FileNotFoundError")));
}
