use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};
use walkdir::WalkDir;

use super::markdown::{
    find_callouts, inline_tags, insert_line, parse_front_matter, replace_front_matter, split_note,
    value_list, value_text,
};
use super::{DocumentAdapter, DocumentError, InputItem, InputKind, NoteRef};
use crate::classifier::{AggregatedOutput, sanitize_note_name};
use crate::settings::{CommandOption, OutputLocation, OutputType};

const NOTE_EXTENSION: &str = "md";

/// Tag written by every inline aggregate; never offered back as a reference.
const MARKER_TAG: &str = "auto-classifier";

/// A vault backed by a directory of Markdown files.
///
/// Notes are the `.md` files under the root; hidden files and directories
/// (such as `.obsidian` or `.trash`) are skipped. The editor-only concepts of
/// the host application are supplied by the caller: an optional selected
/// text and an optional cursor line. Without a cursor line, cursor output
/// lands at the end of the note.
#[derive(Debug, Clone)]
pub struct FsVault {
    root: PathBuf,
    selection: Option<String>,
    cursor_line: Option<usize>,
}

impl FsVault {
    /// Opens the vault rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::NoteNotFound`] if `root` is not a directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, DocumentError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(DocumentError::NoteNotFound(root));
        }
        Ok(Self {
            root,
            selection: None,
            cursor_line: None,
        })
    }

    /// Sets the text returned for [`InputKind::Selection`].
    pub fn with_selection(mut self, selection: impl Into<String>) -> Self {
        self.selection = Some(selection.into());
        self
    }

    /// Sets the 0-based line that cursor output is inserted before.
    pub fn with_cursor_line(mut self, line: usize) -> Self {
        self.cursor_line = Some(line);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a user-supplied path (absolute, or relative to the vault) to a note.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::NoteNotFound`] if no such file exists in the vault.
    pub fn note_ref(&self, path: &Path) -> Result<NoteRef, DocumentError> {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        if relative.is_absolute() || !self.root.join(relative).is_file() {
            return Err(DocumentError::NoteNotFound(path.to_path_buf()));
        }
        Ok(NoteRef::new(relative))
    }

    fn full_path(&self, note: &NoteRef) -> PathBuf {
        self.root.join(note.path())
    }

    fn read(&self, note: &NoteRef) -> Result<String, DocumentError> {
        let path = self.full_path(note);
        std::fs::read_to_string(&path).map_err(|source| match source.kind() {
            ErrorKind::NotFound => DocumentError::NoteNotFound(note.path().to_path_buf()),
            _ => DocumentError::Io { path, source },
        })
    }

    fn write(&self, note: &NoteRef, text: &str) -> Result<(), DocumentError> {
        let path = self.full_path(note);
        std::fs::write(&path, text).map_err(|source| DocumentError::Io { path, source })
    }

    fn insert_inline(
        &self,
        text: &str,
        item: &InputItem,
        output: &AggregatedOutput,
        location: OutputLocation,
    ) -> Result<String, DocumentError> {
        let sections = split_note(text);
        let line = output.text();

        match location {
            OutputLocation::Cursor => {
                let at = self.cursor_line.unwrap_or(sections.lines.len());
                Ok(insert_line(text, at, &line))
            }
            OutputLocation::ContentTop => Ok(insert_line(text, sections.body_line, &line)),
            OutputLocation::CalloutTop => {
                let callouts = find_callouts(&sections);
                let callout = callouts
                    .get(item.callout_index.unwrap_or(0))
                    .ok_or(DocumentError::NoCallout)?;
                Ok(insert_line(text, callout.header_line + 1, &format!(">{line}")))
            }
        }
    }

    fn rename(&self, note: &NoteRef, output: &AggregatedOutput) -> Result<NoteRef, DocumentError> {
        let Some(first) = output.tokens().first() else {
            return Ok(note.clone());
        };
        let title =
            sanitize_note_name(first).ok_or_else(|| DocumentError::InvalidTitle(first.clone()))?;

        let renamed = NoteRef::new(
            note.path()
                .with_file_name(format!("{title}.{NOTE_EXTENSION}")),
        );
        if renamed == *note {
            return Ok(renamed);
        }

        let from = self.full_path(note);
        let to = self.full_path(&renamed);
        if to.exists() {
            return Err(DocumentError::TitleConflict(renamed.path().to_path_buf()));
        }
        std::fs::rename(&from, &to).map_err(|source| DocumentError::Io { path: from, source })?;

        tracing::info!(from = %note, to = %renamed, "renamed note");
        Ok(renamed)
    }
}

impl DocumentAdapter for FsVault {
    fn list_notes(&self) -> Result<Vec<NoteRef>, DocumentError> {
        let mut notes = Vec::new();
        let walker = WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()));

        for entry in walker {
            let entry = entry.map_err(|e| DocumentError::Walk(e.to_string()))?;
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|ext| ext.to_str()) != Some(NOTE_EXTENSION)
            {
                continue;
            }
            if let Ok(relative) = path.strip_prefix(&self.root) {
                notes.push(NoteRef::new(relative));
            }
        }

        notes.sort();
        Ok(notes)
    }

    fn input_text(
        &self,
        note: &NoteRef,
        kind: &InputKind,
    ) -> Result<Option<Vec<InputItem>>, DocumentError> {
        match kind {
            InputKind::Selection => Ok(self
                .selection
                .as_ref()
                .filter(|selection| !selection.trim().is_empty())
                .map(|selection| vec![InputItem::new(selection.clone())])),
            InputKind::Title => {
                if !self.full_path(note).is_file() {
                    return Err(DocumentError::NoteNotFound(note.path().to_path_buf()));
                }
                Ok(Some(vec![InputItem::new(note.title())]))
            }
            InputKind::FrontMatter { key } => {
                let text = self.read(note)?;
                let Some(yaml) = split_note(&text).front_matter else {
                    return Ok(None);
                };
                let mapping = parse_front_matter(&yaml)?;
                Ok(mapping
                    .get(key.as_str())
                    .and_then(value_text)
                    .map(|value| vec![InputItem::new(value)]))
            }
            InputKind::Content => {
                let text = self.read(note)?;
                let body = split_note(&text).body();
                Ok(Some(vec![InputItem::new(body.trim())]))
            }
            InputKind::Callouts { kind } => {
                let text = self.read(note)?;
                let items: Vec<InputItem> = find_callouts(&split_note(&text))
                    .into_iter()
                    .enumerate()
                    .filter(|(_, callout)| {
                        kind.as_deref()
                            .is_none_or(|wanted| callout.kind.eq_ignore_ascii_case(wanted))
                    })
                    .map(|(index, callout)| InputItem::from_callout(callout.content, index))
                    .collect();
                Ok((!items.is_empty()).then_some(items))
            }
        }
    }

    fn insert_result(
        &self,
        note: &NoteRef,
        item: &InputItem,
        output: &AggregatedOutput,
        option: &CommandOption,
    ) -> Result<NoteRef, DocumentError> {
        match option.output_type {
            OutputType::Tag | OutputType::Wikilink => {
                let text = self.read(note)?;
                let updated = self.insert_inline(&text, item, output, option.output_location)?;
                self.write(note, &updated)?;
                Ok(note.clone())
            }
            OutputType::FrontMatter => {
                let text = self.read(note)?;
                let updated = merge_front_matter(&text, output, option)?;
                self.write(note, &updated)?;
                Ok(note.clone())
            }
            OutputType::Title => self.rename(note, output),
        }
    }

    fn ensure_placeholder_exists(&self, name: &str) -> Result<(), DocumentError> {
        let name =
            sanitize_note_name(name).ok_or_else(|| DocumentError::InvalidTitle(name.to_string()))?;
        let path = self.root.join(format!("{name}.{NOTE_EXTENSION}"));

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => {
                tracing::info!(note = %path.display(), "created placeholder note");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(source) => Err(DocumentError::Io { path, source }),
        }
    }

    fn all_tags(&self) -> Result<Vec<String>, DocumentError> {
        let mut tags = BTreeSet::new();

        for note in self.list_notes()? {
            let text = self.read(&note)?;
            let sections = split_note(&text);

            if let Some(yaml) = &sections.front_matter {
                // A broken front matter block should not hide the rest of the vault
                match parse_front_matter(yaml) {
                    Ok(mapping) => {
                        for key in ["tags", "tag"] {
                            if let Some(value) = mapping.get(key) {
                                tags.extend(
                                    value_list(value)
                                        .into_iter()
                                        .map(|t| t.trim_start_matches('#').to_string()),
                                );
                            }
                        }
                    }
                    Err(e) => tracing::warn!(note = %note, error = %e, "skipping front matter"),
                }
            }
            tags.extend(inline_tags(&sections.body()));
        }

        tags.remove(MARKER_TAG);
        tags.remove("");
        Ok(tags.into_iter().collect())
    }
}

/// Appends (or, with `overwrite`, replaces) the output under `option.output_key`.
fn merge_front_matter(
    text: &str,
    output: &AggregatedOutput,
    option: &CommandOption,
) -> Result<String, DocumentError> {
    let mut mapping = match split_note(text).front_matter {
        Some(yaml) => parse_front_matter(&yaml)?,
        None => Mapping::new(),
    };

    let key = Value::from(option.output_key.as_str());
    let mut values = if option.overwrite {
        Vec::new()
    } else {
        mapping.get(&key).map(value_list).unwrap_or_default()
    };
    for token in output.tokens() {
        if !values.contains(token) {
            values.push(token.clone());
        }
    }

    mapping.insert(
        key,
        Value::Sequence(values.into_iter().map(Value::String).collect()),
    );
    replace_front_matter(text, &mapping)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|name| name.starts_with('.'))
}
