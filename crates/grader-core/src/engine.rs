//! Verification engine.
//!
//! One call to [`VerificationEngine::verify`] takes a request through
//! repository resolution, candidate ranking and, for each candidate in turn,
//! fetch → stage → run → validate. A candidate missing its script or a
//! required file hands over to the next candidate; every other error ends the
//! request. Candidates never share an accessor cache or an execution root.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use grader_remote::{
    EnvRepositoryResolver, GitHubClient, Identity, RepositoryContent, RepositoryFileAccessor,
    RepositoryResolver, RepositorySelection, RepositorySelector,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, Instrument};

use crate::broker::{FileBroker, Overlay};
use crate::completion::CompletionRecorder;
use crate::config::EngineConfig;
use crate::context::VerificationContext;
use crate::contract::Contract;
use crate::error::{ExecutionError, Result, VerifyError};
use crate::executor::{ExecutionConfig, SandboxedExecutor};
use crate::obs;
use crate::shim::{install_shim, BROKER_ENV};
use crate::validation::{evaluate_run, VerificationResult};
use crate::vfs::{canonical_key, AnchorSet, VirtualFileSet};

/// One mission submission to verify.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRequest {
    pub identity: Identity,
    pub mission_id: String,
    /// Roles the mission is declared for, used as repository hints.
    #[serde(default)]
    pub mission_roles: Vec<String>,
    pub contract: Contract,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Passed,
    Failed,
    ConfigError,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Passed => "passed",
            VerificationStatus::Failed => "failed",
            VerificationStatus::ConfigError => "config_error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptResult {
    Passed,
    Failed,
    /// The script or a required file was absent.
    Missing,
    Error,
}

/// Diagnostics for one candidate repository that was tried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub key: String,
    pub repository: String,
    pub branch: String,
    pub base_path: String,
    pub result: AttemptResult,
    pub detail: Option<String>,
}

impl AttemptRecord {
    fn new(key: &str, selection: &RepositorySelection, result: AttemptResult) -> Self {
        Self {
            key: key.to_string(),
            repository: selection.repository().to_string(),
            branch: selection.branch.clone(),
            base_path: selection.base_path.clone(),
            result,
            detail: None,
        }
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub status: VerificationStatus,
    pub feedback: Vec<String>,
    /// Repository of the candidate that produced the outcome.
    pub repository: Option<String>,
    pub attempts: Vec<AttemptRecord>,
    /// Short SHA-256 of the script that ran.
    pub script_digest: Option<String>,
    /// Required files served from the local backup root.
    pub backups_used: Vec<String>,
    pub completion_recorded: bool,
}

impl VerificationOutcome {
    fn new(
        status: VerificationStatus,
        feedback: Vec<String>,
        attempts: Vec<AttemptRecord>,
    ) -> Self {
        Self {
            status,
            feedback,
            repository: None,
            attempts,
            script_digest: None,
            backups_used: Vec::new(),
            completion_recorded: false,
        }
    }

    pub fn passed(&self) -> bool {
        self.status == VerificationStatus::Passed
    }

    pub fn result(&self) -> VerificationResult {
        VerificationResult {
            passed: self.passed(),
            feedback: self.feedback.clone(),
        }
    }
}

/// Why a single candidate attempt stopped early.
enum AttemptError {
    Missing { path: String, feedback: String },
    Failed(VerifyError),
}

impl From<VerifyError> for AttemptError {
    fn from(err: VerifyError) -> Self {
        AttemptError::Failed(err)
    }
}

impl From<std::io::Error> for AttemptError {
    fn from(err: std::io::Error) -> Self {
        AttemptError::Failed(err.into())
    }
}

struct AttemptReport {
    result: VerificationResult,
    script_digest: String,
    backups_used: Vec<String>,
}

pub struct VerificationEngine {
    content: Arc<dyn RepositoryContent>,
    resolver: Arc<dyn RepositoryResolver>,
    recorder: Arc<dyn CompletionRecorder>,
    selector: RepositorySelector,
    executor: SandboxedExecutor,
    config: EngineConfig,
}

impl std::fmt::Debug for VerificationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl VerificationEngine {
    pub fn new(
        content: Arc<dyn RepositoryContent>,
        resolver: Arc<dyn RepositoryResolver>,
        recorder: Arc<dyn CompletionRecorder>,
        config: EngineConfig,
    ) -> Self {
        Self {
            content,
            resolver,
            recorder,
            selector: RepositorySelector::default(),
            executor: SandboxedExecutor::new(&config.python),
            config,
        }
    }

    /// Engine backed by the GitHub client and resolver configured from the
    /// process environment.
    pub fn from_env(recorder: Arc<dyn CompletionRecorder>) -> Result<Self> {
        let client = GitHubClient::from_env()?;
        Ok(Self::new(
            Arc::new(client),
            Arc::new(EnvRepositoryResolver::from_env()),
            recorder,
            EngineConfig::from_env(),
        ))
    }

    pub fn with_selector(mut self, selector: RepositorySelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Verify one submission. Never fails: every error becomes an outcome.
    pub async fn verify(
        &self,
        request: &VerificationRequest,
        ctx: &VerificationContext,
    ) -> VerificationOutcome {
        let span = obs::verification_span(
            ctx.request_id(),
            &request.identity.slug,
            &request.mission_id,
        );
        async {
            let started = Instant::now();
            let mut outcome = self.run_candidates(request, ctx).await;

            if outcome.passed() {
                match self
                    .recorder
                    .record_completion(&request.identity.slug, &request.mission_id)
                    .await
                {
                    Ok(new) => {
                        debug!(new_completion = new, "completion recorded");
                        outcome.completion_recorded = true;
                    }
                    Err(e) => obs::emit_internal_error(ctx.request_id(), &e),
                }
            }

            obs::emit_verification_finished(
                ctx.request_id(),
                outcome.status.as_str(),
                outcome.attempts.len(),
                started.elapsed().as_millis() as u64,
            );
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run_candidates(
        &self,
        request: &VerificationRequest,
        ctx: &VerificationContext,
    ) -> VerificationOutcome {
        let request_id = ctx.request_id();
        let contract = &request.contract;
        let identity = &request.identity;

        if let Err(e) = contract.validate() {
            return error_outcome(request_id, e, Vec::new());
        }

        let repositories = match self
            .resolver
            .resolve_repositories(&identity.slug, identity.role.as_deref())
        {
            Ok(repositories) => repositories,
            Err(e) => return error_outcome(request_id, e.into(), Vec::new()),
        };

        let candidates = match self.selector.rank_candidates(
            &contract.source,
            identity,
            &repositories,
            &request.mission_roles,
        ) {
            Ok(candidates) => candidates,
            Err(e) => return error_outcome(request_id, e.into(), Vec::new()),
        };
        obs::emit_verification_started(
            request_id,
            &identity.slug,
            &request.mission_id,
            &candidates,
        );

        let mut attempts: Vec<AttemptRecord> = Vec::new();
        for (index, key) in candidates.iter().enumerate() {
            if ctx.is_cancelled() {
                return error_outcome(request_id, VerifyError::Cancelled, attempts);
            }

            let selection = match self
                .selector
                .resolve(key, &contract.source, identity, &repositories)
            {
                Ok(selection) => selection,
                Err(e) => return error_outcome(request_id, e.into(), attempts),
            };
            obs::emit_candidate(
                request_id,
                key,
                selection.repository(),
                &selection.branch,
                &selection.base_path,
            );
            let repository = selection.repository().to_string();
            let has_next = index + 1 < candidates.len();

            match self.attempt(contract, &selection, ctx).await {
                Ok(report) => {
                    let result = if report.result.passed {
                        AttemptResult::Passed
                    } else {
                        AttemptResult::Failed
                    };
                    attempts.push(AttemptRecord::new(key, &selection, result));
                    let status = if report.result.passed {
                        VerificationStatus::Passed
                    } else {
                        VerificationStatus::Failed
                    };
                    let mut outcome =
                        VerificationOutcome::new(status, report.result.feedback, attempts);
                    outcome.repository = Some(repository);
                    outcome.script_digest = Some(report.script_digest);
                    outcome.backups_used = report.backups_used;
                    return outcome;
                }
                Err(AttemptError::Missing { path, feedback }) => {
                    attempts.push(
                        AttemptRecord::new(key, &selection, AttemptResult::Missing)
                            .with_detail(&path),
                    );
                    if has_next {
                        obs::emit_fallback(request_id, key, &path);
                        continue;
                    }
                    let mut outcome = VerificationOutcome::new(
                        VerificationStatus::Failed,
                        vec![feedback],
                        attempts,
                    );
                    outcome.repository = Some(repository);
                    return outcome;
                }
                Err(AttemptError::Failed(e)) => {
                    attempts.push(
                        AttemptRecord::new(key, &selection, AttemptResult::Error)
                            .with_detail(e.to_string()),
                    );
                    let mut outcome = error_outcome(request_id, e, attempts);
                    outcome.repository = Some(repository);
                    return outcome;
                }
            }
        }

        error_outcome(
            request_id,
            VerifyError::configuration(format!(
                "no repository candidates for student '{}'",
                identity.slug
            )),
            attempts,
        )
    }

    /// Fetch, stage, run and validate against one candidate.
    async fn attempt(
        &self,
        contract: &Contract,
        selection: &RepositorySelection,
        ctx: &VerificationContext,
    ) -> std::result::Result<AttemptReport, AttemptError> {
        let accessor = Arc::new(RepositoryFileAccessor::new(
            self.content.clone(),
            selection.clone(),
        ));

        let script_key = workspace_key(&contract.script_path)?;
        let script_bytes = match ctx.guard(accessor.read_bytes(&script_key)).await? {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => {
                let source = accessor.describe_source(Some(&script_key));
                return Err(AttemptError::Missing {
                    path: contract.script_path.clone(),
                    feedback: contract.script_missing_feedback(&source)?,
                });
            }
            Err(e) => return Err(VerifyError::from(e).into()),
        };
        let script_digest = short_digest(&script_bytes);

        let mut required: Vec<(String, Vec<u8>)> = Vec::new();
        let mut backups_used = Vec::new();
        for path in &contract.required_files {
            let key = workspace_key(path)?;
            let bytes = match ctx.guard(accessor.read_bytes(&key)).await? {
                Ok(bytes) => bytes,
                Err(e) if e.is_not_found() => match self.read_backup(&key).await {
                    Some(bytes) => {
                        obs::emit_backup_used(ctx.request_id(), &key);
                        backups_used.push(key.clone());
                        bytes
                    }
                    None => {
                        let source = accessor.describe_source(Some(&key));
                        return Err(AttemptError::Missing {
                            path: path.clone(),
                            feedback: contract.required_missing_feedback(path, &source)?,
                        });
                    }
                },
                Err(e) => return Err(VerifyError::from(e).into()),
            };
            required.push((key, bytes));
        }

        let workdir = tempfile::Builder::new().prefix("grader-run-").tempdir()?;
        let root = workdir.path().join("workspace");
        let hooks = workdir.path().join("hooks");
        let base_dir = join_relative(&root, &selection.base_path);
        tokio::fs::create_dir_all(&base_dir).await?;

        if !contract.workspace_paths.is_empty() {
            ctx.guard(accessor.download_workspace(&contract.workspace_paths, &base_dir))
                .await?
                .map_err(VerifyError::from)?;
        }

        let script_file = join_relative(&base_dir, &script_key);
        write_file(&script_file, &script_bytes).await?;
        for (key, bytes) in &required {
            write_file(&join_relative(&base_dir, key), bytes).await?;
        }

        let script_dir = script_file.parent().unwrap_or(&base_dir);
        let anchors: AnchorSet = [script_dir, base_dir.as_path(), root.as_path()]
            .into_iter()
            .collect();
        let files = stage_files(contract, selection, &accessor, &required, anchors)?;
        let overlay = Arc::new(Overlay::new(files, Some(accessor.clone())));
        let broker = FileBroker::start(overlay).await?;
        install_shim(&hooks).await?;

        let timeout = Duration::from_secs(
            contract
                .timeout_seconds
                .unwrap_or(self.config.script_timeout_secs),
        );
        let exec_config = ExecutionConfig::new()
            .with_hook_dir(&hooks)
            .with_env(BROKER_ENV, &broker.child_config(timeout));

        let run = self
            .executor
            .run(&script_file, &root, &exec_config, timeout, ctx.cancellation())
            .await;
        drop(broker);

        let result = match run {
            Ok(output) => evaluate_run(&contract.validations, &output),
            Err(ExecutionError::Cancelled) => return Err(VerifyError::Cancelled.into()),
            Err(e) => VerificationResult::fail(e.to_string()),
        };

        Ok(AttemptReport {
            result,
            script_digest,
            backups_used,
        })
    }

    async fn read_backup(&self, key: &str) -> Option<Vec<u8>> {
        let root = self.config.backup_root.as_ref()?;
        tokio::fs::read(join_relative(root, key)).await.ok()
    }
}

/// Build the virtual file set for one run.
///
/// Required files are staged under their own key and aliased under the base
/// path; required and optional files are mapped to remote paths.
fn stage_files(
    contract: &Contract,
    selection: &RepositorySelection,
    accessor: &RepositoryFileAccessor,
    required: &[(String, Vec<u8>)],
    anchors: AnchorSet,
) -> Result<VirtualFileSet> {
    let mut files = VirtualFileSet::new(anchors);
    let base = selection.base_path.as_str();

    for (key, bytes) in required {
        files.insert(key, bytes.clone());
    }
    if !base.is_empty() {
        for (key, bytes) in required {
            files.insert_alias(&format!("{}/{}", base, key), bytes);
        }
    }

    for path in contract.required_files.iter().chain(&contract.optional_files) {
        let key = workspace_key(path)?;
        let remote = accessor.resolve_remote_path(&key);
        files.add_remote(&key, &remote);
        if !base.is_empty() {
            files.add_remote(&format!("{}/{}", base, key), &remote);
        }
    }
    debug!(staged = files.len(), anchors = files.anchors().len(), "virtual files staged");
    Ok(files)
}

fn error_outcome(
    request_id: &str,
    err: VerifyError,
    attempts: Vec<AttemptRecord>,
) -> VerificationOutcome {
    let status = match &err {
        VerifyError::Configuration(_) => {
            obs::emit_config_error(request_id, &err);
            VerificationStatus::ConfigError
        }
        VerifyError::Io(_) | VerifyError::Completion(_) => {
            obs::emit_internal_error(request_id, &err);
            VerificationStatus::Failed
        }
        _ => VerificationStatus::Failed,
    };
    VerificationOutcome::new(status, vec![err.to_string()], attempts)
}

fn workspace_key(path: &str) -> Result<String> {
    canonical_key(path).ok_or_else(|| {
        VerifyError::configuration(format!(
            "path '{}' does not name a file inside the student workspace",
            path
        ))
    })
}

fn join_relative(root: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .filter(|part| !part.is_empty())
        .fold(root.to_path_buf(), |acc, part| acc.join(part))
}

async fn write_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await
}

/// First 12 hex characters of the SHA-256 digest.
pub fn short_digest(bytes: &[u8]) -> String {
    let mut digest = hex::encode(Sha256::digest(bytes));
    digest.truncate(12);
    digest
}
