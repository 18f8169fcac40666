use thiserror::Error;

/// Local, synchronous input problems. Never fatal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("cannot add {incoming} file(s): {current} already loaded, at most {max} allowed")]
    TooManyFiles {
        current: usize,
        incoming: usize,
        max: usize,
    },
    #[error("minimum score must be a number between 0 and 1, got {0}")]
    InvalidMinScore(String),
    #[error("page {page} is outside 1..={page_count}")]
    PageOutOfRange { page: usize, page_count: usize },
}

/// A document the PDF adapter could not parse. The file stays registered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to process {name}: {reason}")]
pub struct ParseError {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    #[error("Please upload files before starting the analysis.")]
    NoFiles,
    #[error("Please add topics or enable topic generation before starting the analysis.")]
    NoTopics,
    #[error("an analysis is already running")]
    AlreadyRunning,
    #[error(transparent)]
    InvalidInput(#[from] ValidationError),
    #[error("Analysis failed: {status} {reason}{}", detail_suffix(.detail))]
    Http {
        status: u16,
        reason: String,
        detail: Option<String>,
    },
    #[error("Analysis failed: {0}")]
    Transport(String),
    #[error("Analysis failed: unexpected response ({0})")]
    InvalidResponse(String),
}

impl AnalysisError {
    /// Guard failures are detected locally before anything is sent.
    pub fn is_guard(&self) -> bool {
        matches!(
            self,
            AnalysisError::NoFiles
                | AnalysisError::NoTopics
                | AnalysisError::AlreadyRunning
                | AnalysisError::InvalidInput(_)
        )
    }
}

fn detail_suffix(detail: &Option<String>) -> String {
    match detail {
        Some(detail) if !detail.is_empty() => format!(" ({detail})"),
        _ => String::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("no document selected")]
    NoDocument,
    #[error("{name} is still being processed")]
    NotReady { name: String },
    #[error("{name} could not be opened")]
    Degraded { name: String },
    #[error("failed to render page: {0}")]
    Backend(String),
}
