//! Derived, read-only projections of an [`AnalysisResult`] and the view state
//! that drives them.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::Serialize;

use crate::config::DEFAULT_RESULTS_PAGE_SIZE;
use crate::error::ValidationError;
use crate::results::{AnalysisResult, Passage};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FileFilter {
    #[default]
    All,
    Named(String),
}

impl FileFilter {
    pub fn matches(&self, document: &str) -> bool {
        match self {
            FileFilter::All => true,
            FileFilter::Named(name) => name == document,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultFilters {
    /// Empty means every topic.
    pub topics: BTreeSet<String>,
    pub min_score: f32,
    pub file: FileFilter,
}

impl Default for ResultFilters {
    fn default() -> Self {
        Self {
            topics: BTreeSet::new(),
            min_score: 0.0,
            file: FileFilter::All,
        }
    }
}

impl ResultFilters {
    pub fn accepts(&self, topic: &str, passage: &Passage) -> bool {
        (self.topics.is_empty() || self.topics.contains(topic))
            && passage.score >= self.min_score
            && self.file.matches(&passage.document)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Score,
    Page,
    File,
}

impl SortKey {
    pub fn next(self) -> Self {
        match self {
            SortKey::Score => SortKey::Page,
            SortKey::Page => SortKey::File,
            SortKey::File => SortKey::Score,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SortKey::Score => "score",
            SortKey::Page => "page",
            SortKey::File => "file",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn toggled(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SortOrder {
    pub key: SortKey,
    pub direction: SortDirection,
}

/// One passage with the topic it was reported under.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultEntry {
    pub topic: String,
    #[serde(flatten)]
    pub passage: Passage,
    /// Position in the flattened response, used to break ties.
    #[serde(skip)]
    pub ordinal: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultPage {
    pub entries: Vec<ResultEntry>,
    pub page_number: usize,
    pub total_pages: usize,
    pub total_entries: usize,
}

pub fn flatten(result: &AnalysisResult) -> Vec<ResultEntry> {
    result
        .topics
        .iter()
        .flat_map(|topic| {
            topic
                .similar_passages
                .iter()
                .map(move |passage| (topic.topic.as_str(), passage))
        })
        .enumerate()
        .map(|(ordinal, (topic, passage))| ResultEntry {
            topic: topic.to_string(),
            passage: passage.clone(),
            ordinal,
        })
        .collect()
}

/// Filters then stable-sorts the flattened result.
pub fn query(result: &AnalysisResult, filters: &ResultFilters, sort: SortOrder) -> Vec<ResultEntry> {
    let mut entries: Vec<ResultEntry> = flatten(result)
        .into_iter()
        .filter(|entry| filters.accepts(&entry.topic, &entry.passage))
        .collect();

    entries.sort_by(|a, b| {
        let ordering = compare_by_key(a, b, sort.key);
        let ordering = match sort.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        };
        ordering.then(a.ordinal.cmp(&b.ordinal))
    });
    entries
}

fn compare_by_key(a: &ResultEntry, b: &ResultEntry, key: SortKey) -> Ordering {
    match key {
        SortKey::Score => a.passage.score.total_cmp(&b.passage.score),
        SortKey::Page => a.passage.page.cmp(&b.passage.page),
        SortKey::File => a
            .passage
            .document
            .cmp(&b.passage.document)
            .then(a.passage.page.cmp(&b.passage.page)),
    }
}

pub fn total_pages(total_entries: usize, page_size: usize) -> usize {
    let page_size = page_size.max(1);
    total_entries.div_ceil(page_size).max(1)
}

/// Slices one page out of `entries`. `page_number` is 1-based and clamped.
pub fn paginate(entries: Vec<ResultEntry>, page_number: usize, page_size: usize) -> ResultPage {
    let page_size = page_size.max(1);
    let total_entries = entries.len();
    let total_pages = total_pages(total_entries, page_size);
    let page_number = page_number.clamp(1, total_pages);
    let entries = entries
        .into_iter()
        .skip((page_number - 1) * page_size)
        .take(page_size)
        .collect();
    ResultPage {
        entries,
        page_number,
        total_pages,
        total_entries,
    }
}

/// What is on screen: selected file and page, zoom, and the result list
/// controls.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    pub current_file: Option<usize>,
    /// 1-based.
    pub current_page: usize,
    pub scale: f32,
    pub filters: ResultFilters,
    pub sort: SortOrder,
    /// 1-based page of the result list.
    pub page_number: usize,
    pub page_size: usize,
}

impl Default for ViewState {
    fn default() -> Self {
        Self::new(DEFAULT_RESULTS_PAGE_SIZE)
    }
}

impl ViewState {
    pub const MIN_SCALE: f32 = 0.25;
    pub const MAX_SCALE: f32 = 4.0;

    pub fn new(page_size: usize) -> Self {
        Self {
            current_file: None,
            current_page: 1,
            scale: 1.0,
            filters: ResultFilters::default(),
            sort: SortOrder::default(),
            page_number: 1,
            page_size: page_size.max(1),
        }
    }

    pub fn set_min_score(&mut self, min_score: f32) -> Result<(), ValidationError> {
        let min_score = validate_min_score(min_score)?;
        self.filters.min_score = min_score;
        self.page_number = 1;
        Ok(())
    }

    /// Parses user input; invalid text leaves the filter untouched.
    pub fn set_min_score_text(&mut self, input: &str) -> Result<(), ValidationError> {
        self.set_min_score(parse_min_score(input)?)
    }

    pub fn toggle_topic_filter(&mut self, topic: &str) {
        if !self.filters.topics.remove(topic) {
            self.filters.topics.insert(topic.to_string());
        }
        self.page_number = 1;
    }

    pub fn set_topic_filter<I>(&mut self, topics: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.filters.topics = topics.into_iter().collect();
        self.page_number = 1;
    }

    /// Drops topic filter entries rejected by `keep`. Pagination resets only
    /// when the filter actually changed.
    pub fn retain_topic_filter<F>(&mut self, mut keep: F)
    where
        F: FnMut(&str) -> bool,
    {
        let before = self.filters.topics.len();
        self.filters.topics.retain(|topic| keep(topic));
        if self.filters.topics.len() != before {
            self.page_number = 1;
        }
    }

    pub fn set_file_filter(&mut self, filter: FileFilter) {
        self.filters.file = filter;
        self.page_number = 1;
    }

    pub fn set_sort(&mut self, sort: SortOrder) {
        self.sort = sort;
        self.page_number = 1;
    }

    pub fn next_results_page(&mut self, total_pages: usize) -> bool {
        if self.page_number < total_pages {
            self.page_number += 1;
            true
        } else {
            false
        }
    }

    pub fn prev_results_page(&mut self) -> bool {
        if self.page_number > 1 {
            self.page_number -= 1;
            true
        } else {
            false
        }
    }

    pub fn result_page(&self, result: &AnalysisResult) -> ResultPage {
        paginate(
            query(result, &self.filters, self.sort),
            self.page_number,
            self.page_size,
        )
    }
}

/// Parses a score typed by the user and checks it is within `0.0..=1.0`.
pub fn parse_min_score(input: &str) -> Result<f32, ValidationError> {
    let value: f32 = input
        .trim()
        .parse()
        .map_err(|_| ValidationError::InvalidMinScore(input.trim().to_string()))?;
    validate_min_score(value)
}

pub fn validate_min_score(min_score: f32) -> Result<f32, ValidationError> {
    if min_score.is_finite() && (0.0..=1.0).contains(&min_score) {
        Ok(min_score)
    } else {
        Err(ValidationError::InvalidMinScore(min_score.to_string()))
    }
}
