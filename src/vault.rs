//! Document access for the classification pipeline.
//!
//! The orchestrator reads inputs from and writes results to notes only
//! through [`DocumentAdapter`]. [`FsVault`] implements it over a directory of
//! Markdown files; tests substitute an in-memory fake.

mod fs_vault;
pub mod markdown;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::classifier::AggregatedOutput;
use crate::settings::CommandOption;

pub use fs_vault::FsVault;

/// Errors raised by document adapters.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("note not found: {0}")]
    NoteNotFound(PathBuf),

    #[error("invalid front matter: {0}")]
    FrontMatter(String),

    #[error("note has no callout to write into")]
    NoCallout,

    #[error("cannot rename note to {0:?}: name is empty after removing forbidden characters")]
    InvalidTitle(String),

    #[error("cannot rename note: {0} already exists")]
    TitleConflict(PathBuf),

    #[error("failed to scan vault: {0}")]
    Walk(String),
}

/// A note, identified by its path relative to the vault root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NoteRef(PathBuf);

impl NoteRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// The note title: its file name without extension.
    pub fn title(&self) -> String {
        self.0
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl std::fmt::Display for NoteRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Which part of a note is classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputKind {
    /// Text selected in the editor.
    Selection,
    /// The note title.
    Title,
    /// The value stored under a front-matter key.
    FrontMatter { key: String },
    /// The body after the front matter.
    Content,
    /// Each callout block, optionally only those of one kind.
    Callouts { kind: Option<String> },
}

/// One piece of text to classify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputItem {
    pub text: String,
    /// Position of the callout this text came from, among all callouts of the note.
    pub callout_index: Option<usize>,
}

impl InputItem {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callout_index: None,
        }
    }

    pub fn from_callout(text: impl Into<String>, index: usize) -> Self {
        Self {
            text: text.into(),
            callout_index: Some(index),
        }
    }
}

/// Host-document operations consumed by the orchestrator.
pub trait DocumentAdapter {
    /// Notes that whole-vault commands iterate over, in a stable order.
    fn list_notes(&self) -> Result<Vec<NoteRef>, DocumentError>;

    /// Extracts input items from `note`.
    ///
    /// Returns `Ok(None)` when the note has nothing of the requested kind
    /// (no selection, missing front-matter key, no callouts).
    fn input_text(
        &self,
        note: &NoteRef,
        kind: &InputKind,
    ) -> Result<Option<Vec<InputItem>>, DocumentError>;

    /// Writes `output` into `note` as configured by `option`.
    ///
    /// Returns the note's reference afterwards, which differs from `note`
    /// when the output renamed it.
    fn insert_result(
        &self,
        note: &NoteRef,
        item: &InputItem,
        output: &AggregatedOutput,
        option: &CommandOption,
    ) -> Result<NoteRef, DocumentError>;

    /// Creates an empty note called `name` unless one already exists.
    fn ensure_placeholder_exists(&self, name: &str) -> Result<(), DocumentError>;

    /// Every tag used anywhere in the vault, deduplicated and sorted.
    fn all_tags(&self) -> Result<Vec<String>, DocumentError>;
}
