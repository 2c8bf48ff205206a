//! grader-remote: GitHub access for the mission grader
//!
//! This crate is the integration layer between the grader and the code host:
//!
//! - [`client`]: authenticated GitHub contents API client
//! - [`content`]: the [`RepositoryContent`] seam the rest of the grader uses
//! - [`selection`]: repository/branch/base-path selection for contracts
//! - [`hints`]: role heuristics table used by selection and resolution
//! - [`resolver`]: identity → available repositories
//! - [`accessor`]: per-attempt cached file access for one selection
//! - [`workspace`]: recursive workspace downloads
//! - [`fakes`]: in-memory implementations for tests

pub mod accessor;
pub mod client;
pub mod config;
pub mod content;
pub mod error;
pub mod fakes;
pub mod hints;
pub mod resolver;
pub mod selection;
pub mod template;
pub mod workspace;

pub use accessor::RepositoryFileAccessor;
pub use client::GitHubClient;
pub use config::{process_env, EnvLookup, GitHubConfig};
pub use content::{ContentEntry, EntryKind, RepositoryContent};
pub use error::{RemoteError, Result};
pub use hints::{HintTable, RepositoryHint, RoleMatcher, OPERATIONS_KEY, SALES_KEY};
pub use resolver::{EnvRepositoryResolver, RepositoryResolver};
pub use selection::{
    default_key, normalize_branch, Identity, RepositoryInfo, RepositorySelection,
    RepositorySelector, RepositorySet, SourceConfig, DEFAULT_KEY,
};
pub use template::{format_template, TemplateError};
pub use workspace::{download_tree, normalize_workspace_entry};
