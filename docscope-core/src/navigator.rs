use crate::document::TextRun;
use crate::registry::FileRegistry;
use crate::results::AnalysisResult;
use crate::topics::{Rgb, TopicSet};
use crate::view::{FileFilter, ViewState};

#[derive(Debug, Clone, PartialEq)]
pub struct Highlight {
    pub run_index: usize,
    pub topic: String,
    pub color: Rgb,
}

/// Moves the view to the file and page a result points at, and narrows the
/// result list to that file. Returns `false` when the document is not
/// registered.
pub fn on_result_click(
    view: &mut ViewState,
    registry: &FileRegistry,
    _topic: &str,
    document: &str,
    page: usize,
) -> bool {
    let Some(index) = registry.index_of_name(document) else {
        return false;
    };

    let page_count = registry
        .get_index(index)
        .map(|file| file.page_count.pages())
        .unwrap_or(0);
    let page = if page_count > 0 {
        page.clamp(1, page_count)
    } else {
        page.max(1)
    };

    view.current_file = Some(index);
    view.current_page = page;
    if view.filters.file != FileFilter::Named(document.to_string()) {
        view.set_file_filter(FileFilter::Named(document.to_string()));
    }
    true
}

/// Colours the text runs of one rendered page. A run is highlighted by the
/// first passage (in response order) for this document and page whose text it
/// contains.
pub fn highlights_for_page(
    runs: &[TextRun],
    result: &AnalysisResult,
    document: &str,
    page: usize,
    topics: &TopicSet,
) -> Vec<Highlight> {
    let candidates: Vec<(&str, &str)> = result
        .topics
        .iter()
        .flat_map(|topic| {
            topic
                .similar_passages
                .iter()
                .filter(|p| p.document == document && p.page == page && !p.text.is_empty())
                .map(move |p| (topic.topic.as_str(), p.text.as_str()))
        })
        .collect();

    if candidates.is_empty() {
        return Vec::new();
    }

    runs.iter()
        .enumerate()
        .filter_map(|(run_index, run)| {
            let (topic, _) = candidates
                .iter()
                .find(|(_, text)| run.text.contains(text))?;
            Some(Highlight {
                run_index,
                topic: topic.to_string(),
                color: topics.color_of(topic).unwrap_or_else(|| topics.color_at(0)),
            })
        })
        .collect()
}
