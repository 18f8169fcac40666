use std::collections::HashSet;

use tracing::{debug, warn};

use crate::config::{DEFAULT_MAX_FILES, DEFAULT_MAX_FILE_SIZE};
use crate::document::{FileId, IncomingFile, PageCount, UploadedFile};
use crate::error::{ParseError, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_files: usize,
    pub max_file_size: usize,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_files: DEFAULT_MAX_FILES,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    TooLarge { size: usize, max: usize },
    DuplicateName,
    NotPdf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub name: String,
    pub reason: SkipReason,
}

impl std::fmt::Display for SkippedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.reason {
            SkipReason::TooLarge { size, max } => write!(
                f,
                "{} skipped: {} bytes exceeds the {} byte limit",
                self.name, size, max
            ),
            SkipReason::DuplicateName => write!(f, "{} skipped: already loaded", self.name),
            SkipReason::NotPdf => write!(f, "{} skipped: not a PDF", self.name),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddOutcome {
    pub accepted: Vec<FileId>,
    pub skipped: Vec<SkippedFile>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Removal {
    pub removed: Vec<String>,
    /// Whether the removed set included the file that was selected.
    pub selection_removed: bool,
}

impl Removal {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
    }
}

/// Uploaded documents in drop order.
#[derive(Debug, Default)]
pub struct FileRegistry {
    files: Vec<UploadedFile>,
    limits: UploadLimits,
}

impl FileRegistry {
    pub fn new(limits: UploadLimits) -> Self {
        Self {
            files: Vec::new(),
            limits,
        }
    }

    pub fn limits(&self) -> UploadLimits {
        self.limits
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UploadedFile> {
        self.files.iter()
    }

    pub fn get(&self, id: FileId) -> Option<&UploadedFile> {
        self.files.iter().find(|file| file.id == id)
    }

    pub fn get_index(&self, index: usize) -> Option<&UploadedFile> {
        self.files.get(index)
    }

    pub fn index_of(&self, id: FileId) -> Option<usize> {
        self.files.iter().position(|file| file.id == id)
    }

    pub fn index_of_name(&self, name: &str) -> Option<usize> {
        self.files.iter().position(|file| file.name == name)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.index_of_name(name).is_some()
    }

    pub fn is_viewable(&self, index: usize) -> bool {
        self.files.get(index).is_some_and(UploadedFile::is_viewable)
    }

    /// Files whose page count has not been resolved yet.
    pub fn pending(&self) -> Vec<&UploadedFile> {
        self.files
            .iter()
            .filter(|file| file.page_count.is_pending())
            .collect()
    }

    /// Validates and appends a batch. Exceeding the file cap rejects the whole
    /// batch; oversized, non-PDF and duplicate-name files are skipped
    /// individually.
    pub fn add(&mut self, incoming: Vec<IncomingFile>) -> Result<AddOutcome, ValidationError> {
        if self.files.len() + incoming.len() > self.limits.max_files {
            warn!(
                current = self.files.len(),
                incoming = incoming.len(),
                max = self.limits.max_files,
                "rejecting upload batch"
            );
            return Err(ValidationError::TooManyFiles {
                current: self.files.len(),
                incoming: incoming.len(),
                max: self.limits.max_files,
            });
        }

        let mut outcome = AddOutcome::default();
        let mut seen: HashSet<String> = self.files.iter().map(|f| f.name.clone()).collect();

        for file in incoming {
            let reason = if !has_pdf_extension(&file.name) {
                Some(SkipReason::NotPdf)
            } else if file.size() > self.limits.max_file_size {
                Some(SkipReason::TooLarge {
                    size: file.size(),
                    max: self.limits.max_file_size,
                })
            } else if seen.contains(&file.name) {
                Some(SkipReason::DuplicateName)
            } else {
                None
            };

            if let Some(reason) = reason {
                debug!(name = %file.name, ?reason, "skipping upload");
                outcome.skipped.push(SkippedFile {
                    name: file.name,
                    reason,
                });
                continue;
            }

            let id = FileId::new();
            seen.insert(file.name.clone());
            self.files.push(UploadedFile {
                id,
                name: file.name,
                bytes: file.bytes,
                page_count: PageCount::Pending,
            });
            outcome.accepted.push(id);
        }

        Ok(outcome)
    }

    /// Records the adapter outcome for one file. Ids that are no longer
    /// registered are ignored.
    pub fn resolve_page_count(
        &mut self,
        id: FileId,
        outcome: Result<usize, String>,
    ) -> Option<ParseError> {
        let file = self.files.iter_mut().find(|file| file.id == id)?;
        match outcome {
            Ok(count) => {
                file.page_count = PageCount::Ready(count);
                None
            }
            Err(reason) => {
                warn!(name = %file.name, %reason, "failed to parse document");
                file.page_count = PageCount::Failed(reason.clone());
                Some(ParseError {
                    name: file.name.clone(),
                    reason,
                })
            }
        }
    }

    /// Removes the given files. `selected` is the caller's selected index; it
    /// is updated in place to keep pointing at the same file, or reset to the
    /// first file (or `None`) if the selected file itself went away.
    pub fn remove(&mut self, ids: &[FileId], selected: &mut Option<usize>) -> Removal {
        let selected_id = selected.and_then(|index| self.files.get(index)).map(|f| f.id);
        let mut removal = Removal::default();

        self.files.retain(|file| {
            if ids.contains(&file.id) {
                removal.removed.push(file.name.clone());
                false
            } else {
                true
            }
        });

        removal.selection_removed = selected_id.is_some_and(|id| ids.contains(&id));
        *selected = match selected_id {
            Some(id) if !removal.selection_removed => self.index_of(id),
            _ if self.files.is_empty() => None,
            _ => Some(0),
        };
        removal
    }

    pub fn remove_all(&mut self, selected: &mut Option<usize>) -> Removal {
        let ids: Vec<FileId> = self.files.iter().map(|file| file.id).collect();
        self.remove(&ids, selected)
    }

    pub fn names(&self) -> HashSet<&str> {
        self.files.iter().map(|file| file.name.as_str()).collect()
    }
}

fn has_pdf_extension(name: &str) -> bool {
    std::path::Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}
