//! grader-core: mission verification for PortalKids
//!
//! Fetches a student's script and its data from the code host, runs it
//! behind a virtual file overlay with a hard deadline, and checks the
//! captured output against the mission's contract.
//!
//! - [`engine`]: per-request orchestration with candidate fallback
//! - [`vfs`], [`broker`], [`shim`]: the file overlay seen by the child
//! - [`executor`]: bounded subprocess execution
//! - [`validation`], [`dataframe`]: output contract checks

pub mod broker;
pub mod completion;
pub mod config;
pub mod context;
pub mod contract;
pub mod dataframe;
pub mod engine;
pub mod error;
pub mod executor;
pub mod obs;
pub mod shim;
pub mod telemetry;
pub mod validation;
pub mod vfs;

pub use broker::{FileBroker, Overlay};
pub use completion::{CompletionEntry, CompletionRecorder, MemoryCompletionRecorder};
pub use config::EngineConfig;
pub use context::{CancellationToken, VerificationContext};
pub use contract::{Contract, DataframeExpectation, ExpectedDtypes, ExpectedValue, ValidationRule};
pub use dataframe::{DataFrameSummary, SummaryField};
pub use engine::{
    AttemptRecord, AttemptResult, VerificationEngine, VerificationOutcome, VerificationRequest,
    VerificationStatus,
};
pub use error::{ExecutionError, Result, VerifyError};
pub use executor::{ExecutionConfig, SandboxedExecutor, ScriptOutput};
pub use telemetry::init_tracing;
pub use validation::{validate_output, VerificationResult};
pub use vfs::{canonical_key, AnchorSet, VirtualFileSet};
