//! Runs a classification command over one note or the whole vault.
//!
//! For every note the orchestrator reads the input items, classifies each
//! one, makes sure a note exists for every generated name and writes the
//! formatted output back through the [`DocumentAdapter`]. Notes and items are
//! processed strictly in sequence.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cancel::CancellationToken;
use crate::classifier::{ClassificationRequest, Classifier, ClassifyError};
use crate::openai::ChatError;
use crate::settings::{CommandOption, ReferenceSource};
use crate::vault::{DocumentAdapter, DocumentError, InputItem, InputKind, NoteRef};

/// What happens to the rest of a run after one item fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure and carry on with the next item and note.
    #[default]
    Continue,
    /// Stop the run at the first failed item.
    Halt,
}

/// Which notes a run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Note(NoteRef),
    Vault,
}

/// Failure of a single input item.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error(transparent)]
    Classify(#[from] ClassifyError),

    #[error(transparent)]
    Document(#[from] DocumentError),
}

/// Errors that end a run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("classification aborted")]
    Cancelled,

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("failed to classify {note}: {source}")]
    Item {
        note: NoteRef,
        #[source]
        source: ItemError,
    },
}

/// Output written for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedItem {
    /// The note as it is named after the write.
    pub note: NoteRef,
    pub text: String,
}

/// A failed item under [`FailurePolicy::Continue`].
#[derive(Debug)]
pub struct ItemFailure {
    pub note: NoteRef,
    pub error: ItemError,
}

/// Summary of a finished run.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Notes visited.
    pub files: usize,
    pub classified: Vec<ClassifiedItem>,
    /// Items whose reply had no classification above the threshold.
    pub empty_results: usize,
    /// Notes without input of the requested kind, plus blank items.
    pub skipped: usize,
    pub failures: Vec<ItemFailure>,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} note(s): {} classified, {} without result, {} skipped, {} failed",
            self.files,
            self.classified.len(),
            self.empty_results,
            self.skipped,
            self.failures.len()
        )
    }
}

/// Placeholder names already ensured during the current run.
type Ensured = HashSet<String>;

/// Sequences input extraction, classification and output insertion.
pub struct Orchestrator<'a> {
    classifier: Classifier,
    adapter: &'a dyn DocumentAdapter,
    option: CommandOption,
}

impl<'a> Orchestrator<'a> {
    pub fn new(classifier: Classifier, adapter: &'a dyn DocumentAdapter, option: CommandOption) -> Self {
        Self {
            classifier,
            adapter,
            option,
        }
    }

    /// Classifies `input` for every note in `scope`.
    ///
    /// Per-item failures are handled according to the option's
    /// [`FailurePolicy`]. Cancellation is checked before each note; notes
    /// already written stay written.
    ///
    /// # Errors
    ///
    /// - [`RunError::Config`] if references are required but none resolve, or
    ///   if a selection is classified across the whole vault
    /// - [`RunError::Cancelled`] if `cancel` fires before or during the run
    /// - [`RunError::Document`] if the vault cannot be listed
    /// - [`RunError::Item`] for the first failed item under [`FailurePolicy::Halt`]
    pub fn run(
        &self,
        scope: &Scope,
        input: &InputKind,
        cancel: &CancellationToken,
    ) -> Result<RunReport, RunError> {
        if *scope == Scope::Vault && *input == InputKind::Selection {
            return Err(RunError::Config(
                "a selection belongs to a single note; pass a note instead of the whole vault"
                    .to_string(),
            ));
        }

        let references = self.resolve_references()?;
        tracing::debug!(count = references.len(), "resolved references");

        let notes = match scope {
            Scope::Note(note) => vec![note.clone()],
            Scope::Vault => self.adapter.list_notes()?,
        };

        let mut report = RunReport::default();
        let mut ensured = Ensured::new();

        for note in &notes {
            if cancel.is_cancelled() {
                tracing::info!(completed = report.files, "run aborted");
                return Err(RunError::Cancelled);
            }

            report.files += 1;
            tracing::info!(note = %note, "classifying");
            self.process_note(note, input, &references, cancel, &mut ensured, &mut report)?;
        }

        Ok(report)
    }

    fn resolve_references(&self) -> Result<Vec<String>, RunError> {
        let references = match self.option.reference_source {
            ReferenceSource::Manual => self.option.references.clone(),
            ReferenceSource::VaultTags => self.adapter.all_tags()?,
            ReferenceSource::VaultNotes => {
                let mut titles: Vec<String> = self
                    .adapter
                    .list_notes()?
                    .iter()
                    .map(NoteRef::title)
                    .collect();
                titles.sort();
                titles.dedup();
                titles
            }
        };

        if self.option.use_references && references.is_empty() {
            return Err(RunError::Config(format!(
                "no references found (source: {:?}); add references or turn off use_references",
                self.option.reference_source
            )));
        }
        Ok(references)
    }

    fn process_note(
        &self,
        note: &NoteRef,
        input: &InputKind,
        references: &[String],
        cancel: &CancellationToken,
        ensured: &mut Ensured,
        report: &mut RunReport,
    ) -> Result<(), RunError> {
        let items = match self.adapter.input_text(note, input) {
            Ok(Some(items)) => items,
            Ok(None) => {
                tracing::warn!(note = %note, ?input, "no input found");
                report.skipped += 1;
                return Ok(());
            }
            Err(e) => return self.record_failure(note, e.into(), report),
        };

        // Title output renames the note, later items write to the new name
        let mut current = note.clone();
        for item in &items {
            if item.text.trim().is_empty() {
                tracing::warn!(note = %current, "skipping empty input");
                report.skipped += 1;
                continue;
            }

            match self.process_item(&current, item, references, cancel, ensured) {
                Ok(Some(classified)) => {
                    current = classified.note.clone();
                    report.classified.push(classified);
                }
                Ok(None) => report.empty_results += 1,
                Err(ItemError::Classify(e)) if e.is_aborted() => return Err(RunError::Cancelled),
                Err(e) => self.record_failure(&current, e, report)?,
            }
        }

        Ok(())
    }

    fn process_item(
        &self,
        note: &NoteRef,
        item: &InputItem,
        references: &[String],
        cancel: &CancellationToken,
        ensured: &mut Ensured,
    ) -> Result<Option<ClassifiedItem>, ItemError> {
        let request = ClassificationRequest::new(&item.text, references, &self.option);
        let output = self.classifier.classify(&request, cancel)?;

        // Nothing is written once the run has been aborted
        if cancel.is_cancelled() {
            return Err(ClassifyError::Chat(ChatError::Aborted).into());
        }

        if output.is_empty() {
            tracing::info!(note = %note, "no classification above the reliability threshold");
            return Ok(None);
        }

        if self.option.create_placeholders {
            for name in output.names() {
                if !ensured.contains(name) {
                    self.adapter.ensure_placeholder_exists(name)?;
                    ensured.insert(name.clone());
                }
            }
        }

        let updated = self.adapter.insert_result(note, item, &output, &self.option)?;
        tracing::debug!(note = %updated, output = %output, "wrote classification");

        Ok(Some(ClassifiedItem {
            note: updated,
            text: output.text(),
        }))
    }

    fn record_failure(
        &self,
        note: &NoteRef,
        error: ItemError,
        report: &mut RunReport,
    ) -> Result<(), RunError> {
        match self.option.failure_policy {
            FailurePolicy::Continue => {
                tracing::warn!(note = %note, error = %error, "item failed, continuing");
                report.failures.push(ItemFailure {
                    note: note.clone(),
                    error,
                });
                Ok(())
            }
            FailurePolicy::Halt => Err(RunError::Item {
                note: note.clone(),
                source: error,
            }),
        }
    }
}
