use serde::Serialize;

use docscope_core::{ResultPage, TopicSummary, Workspace};

/// JSON written to stdout by `--batch`.
#[derive(Debug, Serialize)]
pub struct BatchReport {
    pub files: Vec<FileReport>,
    pub topics: Vec<String>,
    pub summary: Vec<TopicSummary>,
    pub results: ResultPage,
}

#[derive(Debug, Serialize)]
pub struct FileReport {
    pub name: String,
    pub size: usize,
    /// `None` while unknown or when the document could not be parsed.
    pub pages: Option<usize>,
}

impl BatchReport {
    /// Collects the report from a workspace whose analysis has succeeded.
    pub fn from_workspace(workspace: &Workspace) -> Option<Self> {
        let result = workspace.result()?;
        let results = workspace.result_page()?;
        Some(Self {
            files: workspace
                .registry()
                .iter()
                .map(|file| FileReport {
                    name: file.name.clone(),
                    size: file.size(),
                    pages: Some(file.page_count.pages()).filter(|&pages| pages > 0),
                })
                .collect(),
            topics: workspace.topics().labels().to_vec(),
            summary: result.summary(),
            results,
        })
    }
}
