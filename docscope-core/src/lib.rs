pub mod analysis;
pub mod config;
pub mod document;
pub mod error;
pub mod navigator;
pub mod registry;
pub mod results;
pub mod topics;
pub mod view;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Error, Result};
use futures_util::future::join_all;
use parking_lot::Mutex;
use tracing::{info, instrument, warn};

pub use analysis::{AnalysisPhase, AnalysisRequest, AnalysisService, AnalysisSession, RequestFile};
pub use config::Config;
pub use document::{
    DocumentBackend, DocumentProvider, FileId, IncomingFile, NormalizedRect, PageCount,
    RenderImage, RenderRequest, TextRun, UploadedFile,
};
pub use error::{AnalysisError, ParseError, RenderError, ValidationError};
pub use navigator::Highlight;
pub use registry::{AddOutcome, FileRegistry, Removal, SkipReason, SkippedFile, UploadLimits};
pub use results::{AnalysisResult, Passage, TopicResult, TopicSummary};
pub use topics::{Rgb, TopicSet};
pub use view::{
    FileFilter, ResultEntry, ResultFilters, ResultPage, SortDirection, SortKey, SortOrder,
    ViewState,
};

/// A parsed document plus a small cache of rendered pages around the
/// current one.
pub struct OpenDocument {
    backend: Arc<dyn DocumentBackend>,
    render_cache: Mutex<HashMap<CacheKey, RenderImage>>,
}

impl OpenDocument {
    pub fn new(backend: Arc<dyn DocumentBackend>) -> Self {
        Self {
            backend,
            render_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn page_count(&self) -> usize {
        self.backend.page_count()
    }

    pub fn text_runs(&self, page_index: usize) -> Result<Vec<TextRun>> {
        self.backend.text_runs(page_index)
    }

    pub fn render(&self, page_index: usize, scale: f32) -> Result<RenderImage> {
        self.render_page_internal(page_index, scale, page_index)
    }

    pub fn prefetch_neighbors(&self, page_index: usize, range: usize, scale: f32) -> Result<()> {
        if range == 0 {
            return Ok(());
        }

        let page_count = self.page_count();
        let mut last_error: Option<Error> = None;

        for offset in 1..=range {
            if let Some(prev) = page_index.checked_sub(offset) {
                if let Err(err) = self.render_page_internal(prev, scale, page_index) {
                    last_error = Some(err);
                }
            }

            let next = page_index + offset;
            if next < page_count {
                if let Err(err) = self.render_page_internal(next, scale, page_index) {
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn render_page_internal(
        &self,
        page_index: usize,
        scale: f32,
        reference_page: usize,
    ) -> Result<RenderImage> {
        if page_index >= self.page_count() {
            return Err(anyhow!("page {} out of range", page_index + 1));
        }

        let key = CacheKey::new(page_index, scale);
        if let Some(image) = self.render_cache.lock().get(&key).cloned() {
            return Ok(image);
        }

        let image = self.backend.render_page(RenderRequest { page_index, scale })?;
        self.store_cached_render(key, &image, reference_page);
        Ok(image)
    }

    fn store_cached_render(&self, key: CacheKey, image: &RenderImage, reference_page: usize) {
        let mut cache = self.render_cache.lock();
        cache.insert(key, image.clone());

        if cache.len() > CACHE_CAPACITY {
            let mut keys: Vec<_> = cache.keys().cloned().collect();
            keys.sort_by_key(|k| k.distance(reference_page));
            for stale in keys.into_iter().skip(CACHE_CAPACITY) {
                cache.remove(&stale);
            }
        }
    }
}

const CACHE_CAPACITY: usize = 10;

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
struct CacheKey {
    page_index: usize,
    scale_milli: u32,
}

impl CacheKey {
    fn new(page_index: usize, scale: f32) -> Self {
        Self {
            page_index,
            scale_milli: quantize_scale(scale),
        }
    }

    fn distance(&self, reference_page: usize) -> usize {
        self.page_index.abs_diff(reference_page)
    }
}

fn quantize_scale(scale: f32) -> u32 {
    let scaled = (scale * 1000.0).round();
    if !scaled.is_finite() || scaled <= 0.0 {
        1
    } else if scaled > u32::MAX as f32 {
        u32::MAX
    } else {
        scaled as u32
    }
}

#[derive(Debug, Clone)]
pub enum Command {
    NextPage { count: usize },
    PrevPage { count: usize },
    GotoPage { page: usize },
    LastPage,
    ScaleBy { factor: f32 },
    ResetScale,
    SelectFile { index: usize },
    NextFile,
    RemoveFile { index: usize },
    RemoveAllFiles,
    AddTopic { label: String },
    RemoveTopic { label: String },
    ClearTopics,
    SetGenerateTopics { enabled: bool },
    /// Minimum score sent with the next analysis request.
    SetThreshold { value: f32 },
    /// Minimum score of the result list filter.
    SetMinScore { value: f32 },
    ToggleTopicFilter { topic: String },
    ClearTopicFilter,
    SetFileFilter { filter: FileFilter },
    SetSort { sort: SortOrder },
    CycleSortKey,
    ToggleSortDirection,
    NextResultsPage,
    PrevResultsPage,
    /// Index into the current page of results.
    OpenResult { index: usize },
}

#[derive(Debug, Clone)]
pub enum WorkspaceEvent {
    FilesAdded(Vec<FileId>),
    FileSkipped(SkippedFile),
    UploadRejected(ValidationError),
    PageCountResolved { id: FileId, pages: usize },
    ParseFailed(ParseError),
    FilesRemoved(Vec<String>),
    SelectionChanged(Option<FileId>),
    TopicsChanged,
    AnalysisStarted,
    AnalysisFinished { topics: usize, passages: usize },
    AnalysisFailed(String),
    RedrawNeeded,
}

/// A rendered page with the text runs the highlights refer to.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub file_name: String,
    /// 1-based.
    pub page: usize,
    pub page_count: usize,
    pub image: RenderImage,
    pub runs: Vec<TextRun>,
    pub highlights: Vec<Highlight>,
}

/// Everything one user session works on: uploaded files, topics, the analysis
/// coordinator and the view derived from them.
pub struct Workspace {
    registry: FileRegistry,
    topics: TopicSet,
    analysis: AnalysisSession,
    view: ViewState,
    threshold: f32,
    documents: HashMap<FileId, OpenDocument>,
    events: Arc<Mutex<Vec<WorkspaceEvent>>>,
    notice: Option<String>,
}

impl Workspace {
    pub fn new(config: &Config) -> Self {
        Self {
            registry: FileRegistry::new(UploadLimits {
                max_files: config.max_files,
                max_file_size: config.max_file_size,
            }),
            topics: TopicSet::with_palette(config.palette.clone()),
            analysis: AnalysisSession::new(false),
            view: ViewState::new(config.results_page_size),
            threshold: config.default_min_score,
            documents: HashMap::new(),
            events: Arc::new(Mutex::new(Vec::new())),
            notice: None,
        }
    }

    pub fn events(&self) -> Arc<Mutex<Vec<WorkspaceEvent>>> {
        Arc::clone(&self.events)
    }

    pub fn registry(&self) -> &FileRegistry {
        &self.registry
    }

    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    pub fn analysis(&self) -> &AnalysisSession {
        &self.analysis
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Last user-facing message (rejected upload, parse failure, analysis
    /// error), cleared by the next successful action that reports.
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn current_file(&self) -> Option<&UploadedFile> {
        self.view
            .current_file
            .and_then(|index| self.registry.get_index(index))
    }

    pub fn document(&self, id: FileId) -> Option<&OpenDocument> {
        self.documents.get(&id)
    }

    fn emit(&self, event: WorkspaceEvent) {
        self.events.lock().push(event);
    }

    /// Ingests a batch. The first accepted file becomes the current one.
    pub fn add_files(&mut self, incoming: Vec<IncomingFile>) -> Result<AddOutcome, ValidationError> {
        let outcome = match self.registry.add(incoming) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.notice = Some(err.to_string());
                self.emit(WorkspaceEvent::UploadRejected(err.clone()));
                return Err(err);
            }
        };

        for skipped in &outcome.skipped {
            self.emit(WorkspaceEvent::FileSkipped(skipped.clone()));
        }
        self.notice = if outcome.skipped.is_empty() {
            None
        } else {
            Some(
                outcome
                    .skipped
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        };

        if let Some(first) = outcome.accepted.first() {
            self.view.current_file = self.registry.index_of(*first);
            self.view.current_page = 1;
            self.emit(WorkspaceEvent::FilesAdded(outcome.accepted.clone()));
            self.emit(WorkspaceEvent::SelectionChanged(Some(*first)));
        }
        Ok(outcome)
    }

    /// Parses every file whose page count is still pending. Files resolve
    /// independently; a failure only marks its own file as degraded.
    #[instrument(skip_all)]
    pub async fn load_documents<P>(&mut self, provider: &P) -> Vec<ParseError>
    where
        P: DocumentProvider + ?Sized,
    {
        let pending: Vec<(FileId, String, Arc<[u8]>)> = self
            .registry
            .pending()
            .into_iter()
            .map(|file| (file.id, file.name.clone(), Arc::clone(&file.bytes)))
            .collect();

        let opened = join_all(pending.into_iter().map(|(id, name, bytes)| async move {
            let outcome = provider.open(&name, bytes).await;
            (id, outcome)
        }))
        .await;

        let mut failures = Vec::new();
        for (id, outcome) in opened {
            match outcome {
                Ok(backend) => self.attach_document(id, backend),
                Err(err) => {
                    if let Some(failure) = self.registry.resolve_page_count(id, Err(format!("{err:#}"))) {
                        failures.push(failure);
                    }
                }
            }
        }

        for failure in &failures {
            self.emit(WorkspaceEvent::ParseFailed(failure.clone()));
        }
        if let Some(first) = failures.first() {
            self.notice = Some(first.to_string());
        }
        failures
    }

    /// Records a parsed document. Documents for files removed in the meantime
    /// are dropped.
    pub fn attach_document(&mut self, id: FileId, backend: Arc<dyn DocumentBackend>) {
        if self.registry.get(id).is_none() {
            return;
        }
        let pages = backend.page_count();
        self.registry.resolve_page_count(id, Ok(pages));
        self.documents.insert(id, OpenDocument::new(backend));
        self.emit(WorkspaceEvent::PageCountResolved { id, pages });
        if self.current_file().map(|f| f.id) == Some(id) {
            self.emit(WorkspaceEvent::RedrawNeeded);
        }
    }

    pub fn remove_files(&mut self, ids: &[FileId]) -> Removal {
        let removal = self.registry.remove(ids, &mut self.view.current_file);
        if removal.is_empty() {
            return removal;
        }

        for id in ids {
            self.documents.remove(id);
        }
        if removal.selection_removed {
            self.view.current_page = 1;
        }

        let present = self.registry.names();
        if let Some(result) = self.analysis.result_mut() {
            result.prune_missing_documents(&present);
        }
        let filtered_file_gone = matches!(
            &self.view.filters.file,
            FileFilter::Named(name) if !present.contains(name.as_str())
        );
        if filtered_file_gone {
            self.view.set_file_filter(FileFilter::All);
        }
        let max_pages = self.result_total_pages();
        if self.view.page_number > max_pages {
            self.view.page_number = max_pages;
        }

        info!(removed = ?removal.removed, "files removed");
        self.emit(WorkspaceEvent::FilesRemoved(removal.removed.clone()));
        self.emit(WorkspaceEvent::SelectionChanged(self.current_file().map(|f| f.id)));
        removal
    }

    pub fn set_generate_topics(&mut self, enabled: bool) {
        self.analysis.set_generate_topics(enabled);
    }

    pub fn set_threshold(&mut self, value: f32) -> Result<(), ValidationError> {
        self.threshold = view::validate_min_score(value)?;
        Ok(())
    }

    pub fn begin_analysis(&mut self) -> Result<AnalysisRequest, AnalysisError> {
        match self.analysis.begin(&self.registry, &self.topics, self.threshold) {
            Ok(request) => {
                self.notice = None;
                self.emit(WorkspaceEvent::AnalysisStarted);
                Ok(request)
            }
            Err(err) => {
                self.notice = Some(err.to_string());
                self.emit(WorkspaceEvent::AnalysisFailed(err.to_string()));
                Err(err)
            }
        }
    }

    /// Publishes a finished run. Passages for files removed while the run was
    /// in flight are pruned before the result becomes visible.
    pub fn complete_analysis(
        &mut self,
        outcome: Result<AnalysisResult, AnalysisError>,
    ) -> Result<(), AnalysisError> {
        let completed = self
            .analysis
            .complete(outcome, &mut self.topics)
            .map(|result| (result.topics.len(), result.passage_count()));

        match completed {
            Ok((topics, passages)) => {
                let present = self.registry.names();
                if let Some(result) = self.analysis.result_mut() {
                    result.prune_missing_documents(&present);
                }
                self.view.page_number = 1;
                self.emit(WorkspaceEvent::TopicsChanged);
                self.emit(WorkspaceEvent::AnalysisFinished { topics, passages });
                self.emit(WorkspaceEvent::RedrawNeeded);
                Ok(())
            }
            Err(err) => {
                self.notice = Some(err.to_string());
                self.emit(WorkspaceEvent::AnalysisFailed(err.to_string()));
                Err(err)
            }
        }
    }

    #[instrument(skip_all)]
    pub async fn run_analysis<S>(&mut self, service: &S) -> Result<(), AnalysisError>
    where
        S: AnalysisService + ?Sized,
    {
        let request = self.begin_analysis()?;
        let outcome = service.analyze(&request).await;
        self.complete_analysis(outcome)
    }

    pub fn result(&self) -> Option<&AnalysisResult> {
        self.analysis.result()
    }

    pub fn result_page(&self) -> Option<ResultPage> {
        self.result().map(|result| self.view.result_page(result))
    }

    fn result_total_pages(&self) -> usize {
        self.result_page().map(|page| page.total_pages).unwrap_or(1)
    }

    fn current_page_count(&self) -> usize {
        self.current_file()
            .map(|file| file.page_count.pages())
            .unwrap_or(0)
    }

    /// Applies one user command. A rejected command leaves the state as it was
    /// and its message becomes the notice.
    pub fn apply(&mut self, command: Command) -> Result<(), ValidationError> {
        let outcome = self.apply_inner(command);
        if let Err(err) = &outcome {
            self.notice = Some(err.to_string());
        }
        outcome
    }

    pub fn set_notice(&mut self, notice: impl Into<String>) {
        self.notice = Some(notice.into());
    }

    pub fn clear_notice(&mut self) {
        self.notice = None;
    }

    fn apply_inner(&mut self, command: Command) -> Result<(), ValidationError> {
        match command {
            Command::NextPage { count } => {
                let page_count = self.current_page_count();
                if page_count > 0 {
                    self.move_to_page((self.view.current_page + count).min(page_count));
                }
            }
            Command::PrevPage { count } => {
                let next = self.view.current_page.saturating_sub(count).max(1);
                self.move_to_page(next);
            }
            Command::GotoPage { page } => {
                let page_count = self.current_page_count();
                if page == 0 || page > page_count {
                    return Err(ValidationError::PageOutOfRange { page, page_count });
                }
                self.move_to_page(page);
            }
            Command::LastPage => {
                let page_count = self.current_page_count();
                if page_count > 0 {
                    self.move_to_page(page_count);
                }
            }
            Command::ScaleBy { factor } => {
                let scale = (self.view.scale * factor).clamp(ViewState::MIN_SCALE, ViewState::MAX_SCALE);
                if (self.view.scale - scale).abs() > f32::EPSILON {
                    self.view.scale = scale;
                    self.emit(WorkspaceEvent::RedrawNeeded);
                }
            }
            Command::ResetScale => {
                if (self.view.scale - 1.0).abs() > f32::EPSILON {
                    self.view.scale = 1.0;
                    self.emit(WorkspaceEvent::RedrawNeeded);
                }
            }
            Command::SelectFile { index } => self.select_file(index),
            Command::NextFile => {
                if !self.registry.is_empty() {
                    let next = self
                        .view
                        .current_file
                        .map(|index| (index + 1) % self.registry.len())
                        .unwrap_or(0);
                    self.select_file(next);
                }
            }
            Command::RemoveFile { index } => {
                if let Some(file) = self.registry.get_index(index) {
                    let id = file.id;
                    self.remove_files(&[id]);
                }
            }
            Command::RemoveAllFiles => {
                let ids: Vec<FileId> = self.registry.iter().map(|file| file.id).collect();
                self.remove_files(&ids);
            }
            Command::AddTopic { label } => {
                if self.topics.add(&label) {
                    self.emit(WorkspaceEvent::TopicsChanged);
                }
            }
            Command::RemoveTopic { label } => {
                if self.topics.remove(&label) {
                    self.view.retain_topic_filter(|topic| topic != label);
                    self.emit(WorkspaceEvent::TopicsChanged);
                }
            }
            Command::ClearTopics => {
                if !self.topics.is_empty() {
                    self.topics.clear();
                    self.view.retain_topic_filter(|_| false);
                    self.emit(WorkspaceEvent::TopicsChanged);
                }
            }
            Command::SetGenerateTopics { enabled } => self.set_generate_topics(enabled),
            Command::SetThreshold { value } => self.set_threshold(value)?,
            Command::SetMinScore { value } => self.view.set_min_score(value)?,
            Command::ToggleTopicFilter { topic } => self.view.toggle_topic_filter(&topic),
            Command::ClearTopicFilter => self.view.set_topic_filter(Vec::new()),
            Command::SetFileFilter { filter } => self.view.set_file_filter(filter),
            Command::SetSort { sort } => self.view.set_sort(sort),
            Command::CycleSortKey => {
                let sort = SortOrder {
                    key: self.view.sort.key.next(),
                    ..self.view.sort
                };
                self.view.set_sort(sort);
            }
            Command::ToggleSortDirection => {
                let sort = SortOrder {
                    direction: self.view.sort.direction.toggled(),
                    ..self.view.sort
                };
                self.view.set_sort(sort);
            }
            Command::NextResultsPage => {
                let total = self.result_total_pages();
                self.view.next_results_page(total);
            }
            Command::PrevResultsPage => {
                self.view.prev_results_page();
            }
            Command::OpenResult { index } => {
                let entry = self
                    .result_page()
                    .and_then(|page| page.entries.into_iter().nth(index));
                if let Some(entry) = entry {
                    if navigator::on_result_click(
                        &mut self.view,
                        &self.registry,
                        &entry.topic,
                        &entry.passage.document,
                        entry.passage.page,
                    ) {
                        self.emit(WorkspaceEvent::SelectionChanged(
                            self.current_file().map(|f| f.id),
                        ));
                        self.emit(WorkspaceEvent::RedrawNeeded);
                    }
                }
            }
        }
        Ok(())
    }

    fn select_file(&mut self, index: usize) {
        if let Some(file) = self.registry.get_index(index) {
            let id = file.id;
            self.view.current_file = Some(index);
            self.view.current_page = 1;
            self.emit(WorkspaceEvent::SelectionChanged(Some(id)));
            self.emit(WorkspaceEvent::RedrawNeeded);
        }
    }

    fn move_to_page(&mut self, page: usize) {
        if page != self.view.current_page {
            self.view.current_page = page;
            self.emit(WorkspaceEvent::RedrawNeeded);
        }
    }

    fn current_document(&self) -> Result<(&UploadedFile, &OpenDocument), RenderError> {
        let file = self.current_file().ok_or(RenderError::NoDocument)?;
        match &file.page_count {
            PageCount::Pending => {
                return Err(RenderError::NotReady {
                    name: file.name.clone(),
                })
            }
            PageCount::Failed(_) | PageCount::Ready(0) => {
                return Err(RenderError::Degraded {
                    name: file.name.clone(),
                })
            }
            PageCount::Ready(_) => {}
        }
        let document = self
            .documents
            .get(&file.id)
            .ok_or_else(|| RenderError::NotReady {
                name: file.name.clone(),
            })?;
        Ok((file, document))
    }

    pub fn render_current(&self) -> Result<RenderedPage, RenderError> {
        self.render_current_with_scale(self.view.scale)
    }

    /// Renders the current page and colours the text runs that contain a
    /// passage reported for it.
    pub fn render_current_with_scale(&self, scale: f32) -> Result<RenderedPage, RenderError> {
        let (file, document) = self.current_document()?;
        let page_index = self.view.current_page.saturating_sub(1);

        let image = document
            .render(page_index, scale)
            .map_err(|err| RenderError::Backend(format!("{err:#}")))?;

        let runs = match document.text_runs(page_index) {
            Ok(runs) => runs,
            Err(err) => {
                warn!(?err, name = %file.name, page = self.view.current_page, "failed to extract text runs");
                Vec::new()
            }
        };

        let highlights = match self.result() {
            Some(result) => navigator::highlights_for_page(
                &runs,
                result,
                &file.name,
                self.view.current_page,
                &self.topics,
            ),
            None => Vec::new(),
        };

        Ok(RenderedPage {
            file_name: file.name.clone(),
            page: self.view.current_page,
            page_count: file.page_count.pages(),
            image,
            runs,
            highlights,
        })
    }

    pub fn prefetch_neighbors(&self, range: usize, scale: f32) -> Result<()> {
        match self.current_document() {
            Ok((_, document)) => {
                document.prefetch_neighbors(self.view.current_page.saturating_sub(1), range, scale)
            }
            Err(_) => Ok(()),
        }
    }

    pub fn status_line(&self) -> String {
        let mut status = match self.current_file() {
            Some(file) => format!(
                "{} | page {}/{} | {:.0}%",
                file.name,
                self.view.current_page,
                file.page_count,
                self.view.scale * 100.0
            ),
            None => "no files".to_string(),
        };

        status.push_str(&format!(
            " | {} topic(s){}",
            self.topics.len(),
            if self.analysis.generate_topics() {
                " +auto"
            } else {
                ""
            }
        ));

        match self.analysis.phase() {
            AnalysisPhase::Idle => {}
            AnalysisPhase::Running => status.push_str(" | analyzing…"),
            AnalysisPhase::Succeeded => {
                if let Some(page) = self.result_page() {
                    status.push_str(&format!(
                        " | results {}/{} ({} by {} {})",
                        page.page_number,
                        page.total_pages,
                        page.total_entries,
                        self.view.sort.key.label(),
                        match self.view.sort.direction {
                            SortDirection::Asc => "↑",
                            SortDirection::Desc => "↓",
                        }
                    ));
                }
            }
            AnalysisPhase::Failed(_) => status.push_str(" | analysis failed"),
        }

        if let Some(notice) = &self.notice {
            status.push_str(" | ");
            status.push_str(notice);
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeBackend {
        pages: usize,
        runs: Vec<TextRun>,
        renders: Arc<AtomicUsize>,
    }

    impl DocumentBackend for FakeBackend {
        fn page_count(&self) -> usize {
            self.pages
        }

        fn render_page(&self, request: RenderRequest) -> Result<RenderImage> {
            self.renders.fetch_add(1, Ordering::SeqCst);
            Ok(RenderImage {
                width: 1,
                height: 1,
                pixels: vec![request.page_index as u8, 0, 0, 255],
            })
        }

        fn text_runs(&self, _page_index: usize) -> Result<Vec<TextRun>> {
            Ok(self.runs.clone())
        }
    }

    #[derive(Default)]
    struct FakeProvider {
        renders: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl DocumentProvider for FakeProvider {
        async fn open(&self, name: &str, bytes: Arc<[u8]>) -> Result<Arc<dyn DocumentBackend>> {
            if Path::new(name).file_stem().and_then(|s| s.to_str()) == Some("broken") {
                return Err(anyhow!("no trailer found"));
            }
            Ok(Arc::new(FakeBackend {
                pages: bytes.len(),
                runs: vec![TextRun {
                    text: "Wind capacity doubled in 2023.".into(),
                    rect: NormalizedRect {
                        left: 0.1,
                        top: 0.1,
                        right: 0.5,
                        bottom: 0.15,
                    },
                }],
                renders: Arc::clone(&self.renders),
            }))
        }
    }

    struct FixedService(Result<AnalysisResult, AnalysisError>);

    #[async_trait::async_trait]
    impl AnalysisService for FixedService {
        async fn analyze(&self, _request: &AnalysisRequest) -> Result<AnalysisResult, AnalysisError> {
            self.0.clone()
        }
    }

    /// File with `pages` pages in the fake provider.
    fn file(name: &str, pages: usize) -> IncomingFile {
        IncomingFile::new(name, vec![0u8; pages])
    }

    fn passage(document: &str, page: usize, text: &str, score: f32) -> Passage {
        Passage {
            document: document.into(),
            page,
            text: text.into(),
            score,
        }
    }

    fn two_document_result() -> AnalysisResult {
        AnalysisResult::new(vec![
            TopicResult {
                topic: "wind".into(),
                similar_passages: vec![
                    passage("A.pdf", 2, "Wind capacity doubled", 0.9),
                    passage("B.pdf", 4, "Offshore wind", 0.7),
                ],
            },
            TopicResult {
                topic: "grid".into(),
                similar_passages: vec![passage("A.pdf", 1, "Grid upgrades", 0.6)],
            },
        ])
    }

    async fn loaded_workspace() -> Workspace {
        let mut workspace = Workspace::new(&Config::default());
        workspace
            .add_files(vec![file("A.pdf", 5), file("B.pdf", 8)])
            .unwrap();
        let failures = workspace.load_documents(&FakeProvider::default()).await;
        assert!(failures.is_empty());
        workspace
    }

    #[tokio::test]
    async fn loading_resolves_page_counts_and_selects_first_file() {
        let workspace = loaded_workspace().await;
        assert_eq!(workspace.view().current_file, Some(0));
        assert_eq!(workspace.view().current_page, 1);
        assert_eq!(
            workspace.registry().get_index(1).unwrap().page_count,
            PageCount::Ready(8)
        );
    }

    #[tokio::test]
    async fn parse_failure_keeps_file_degraded() {
        let mut workspace = Workspace::new(&Config::default());
        workspace
            .add_files(vec![file("broken.pdf", 3), file("ok.pdf", 2)])
            .unwrap();
        let failures = workspace.load_documents(&FakeProvider::default()).await;

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].name, "broken.pdf");
        assert_eq!(workspace.registry().len(), 2);
        assert!(workspace.registry().get_index(0).unwrap().page_count.is_degraded());
        assert!(workspace.registry().is_viewable(1));
        assert!(matches!(
            workspace.render_current(),
            Err(RenderError::Degraded { .. })
        ));
        assert!(workspace.notice().unwrap().contains("broken.pdf"));
    }

    #[tokio::test]
    async fn each_accepted_batch_selects_its_first_file() {
        let mut workspace = loaded_workspace().await;
        workspace.apply(Command::GotoPage { page: 3 }).unwrap();

        workspace.add_files(vec![file("A.pdf", 2)]).unwrap();
        assert_eq!(workspace.view().current_file, Some(0));
        assert_eq!(workspace.view().current_page, 3);

        workspace.add_files(vec![file("C.pdf", 2)]).unwrap();
        assert_eq!(workspace.view().current_file, Some(2));
        assert_eq!(workspace.view().current_page, 1);
    }

    #[test]
    fn pending_file_cannot_be_rendered() {
        let mut workspace = Workspace::new(&Config::default());
        workspace.add_files(vec![file("A.pdf", 2)]).unwrap();
        assert!(matches!(
            workspace.render_current(),
            Err(RenderError::NotReady { .. })
        ));
    }

    #[test]
    fn rejected_batch_is_reported() {
        let mut workspace = Workspace::new(&Config::default());
        let err = workspace
            .add_files(vec![
                file("a.pdf", 1),
                file("b.pdf", 1),
                file("c.pdf", 1),
                file("d.pdf", 1),
            ])
            .unwrap_err();
        assert!(matches!(err, ValidationError::TooManyFiles { .. }));
        assert!(workspace.registry().is_empty());
        assert!(workspace.notice().is_some());
        assert!(workspace
            .events()
            .lock()
            .iter()
            .any(|e| matches!(e, WorkspaceEvent::UploadRejected(_))));
    }

    #[tokio::test]
    async fn page_navigation_stays_within_document() {
        let mut workspace = loaded_workspace().await;
        workspace.apply(Command::NextPage { count: 3 }).unwrap();
        assert_eq!(workspace.view().current_page, 4);
        workspace.apply(Command::NextPage { count: 10 }).unwrap();
        assert_eq!(workspace.view().current_page, 5);
        workspace.apply(Command::PrevPage { count: 10 }).unwrap();
        assert_eq!(workspace.view().current_page, 1);

        assert!(workspace.apply(Command::GotoPage { page: 6 }).is_err());
        assert!(workspace.apply(Command::GotoPage { page: 0 }).is_err());
        assert_eq!(workspace.view().current_page, 1);
        workspace.apply(Command::GotoPage { page: 3 }).unwrap();
        assert_eq!(workspace.view().current_page, 3);
        workspace.apply(Command::LastPage).unwrap();
        assert_eq!(workspace.view().current_page, 5);

        workspace.apply(Command::SelectFile { index: 1 }).unwrap();
        assert_eq!(workspace.view().current_file, Some(1));
        assert_eq!(workspace.view().current_page, 1);
    }

    #[tokio::test]
    async fn zoom_is_clamped() {
        let mut workspace = loaded_workspace().await;
        for _ in 0..40 {
            workspace.apply(Command::ScaleBy { factor: 1.1 }).unwrap();
        }
        assert_eq!(workspace.view().scale, ViewState::MAX_SCALE);
        for _ in 0..80 {
            workspace.apply(Command::ScaleBy { factor: 0.9 }).unwrap();
        }
        assert_eq!(workspace.view().scale, ViewState::MIN_SCALE);
        workspace.apply(Command::ResetScale).unwrap();
        assert_eq!(workspace.view().scale, 1.0);
    }

    #[tokio::test]
    async fn removing_a_file_prunes_results() {
        let mut workspace = loaded_workspace().await;
        workspace.apply(Command::AddTopic { label: "wind".into() }).unwrap();
        workspace.begin_analysis().unwrap();
        workspace.complete_analysis(Ok(two_document_result())).unwrap();
        assert_eq!(workspace.topics().labels(), ["wind", "grid"]);

        workspace.apply(Command::RemoveFile { index: 0 }).unwrap();

        let result = workspace.result().unwrap();
        assert_eq!(result.topics.len(), 1);
        assert_eq!(result.topics[0].topic, "wind");
        assert_eq!(
            result.topics[0].similar_passages,
            vec![passage("B.pdf", 4, "Offshore wind", 0.7)]
        );
        assert_eq!(workspace.view().current_file, Some(0));
        assert_eq!(workspace.current_file().unwrap().name, "B.pdf");
        assert_eq!(workspace.view().current_page, 1);
    }

    #[tokio::test]
    async fn removing_filtered_file_resets_file_filter() {
        let mut workspace = loaded_workspace().await;
        workspace
            .apply(Command::SetFileFilter {
                filter: FileFilter::Named("A.pdf".into()),
            })
            .unwrap();
        workspace.apply(Command::RemoveFile { index: 0 }).unwrap();
        assert_eq!(workspace.view().filters.file, FileFilter::All);

        workspace.apply(Command::RemoveAllFiles).unwrap();
        assert!(workspace.registry().is_empty());
        assert_eq!(workspace.view().current_file, None);
    }

    #[tokio::test]
    async fn opening_a_result_navigates_and_highlights() {
        let mut workspace = loaded_workspace().await;
        workspace.set_generate_topics(true);
        workspace
            .run_analysis(&FixedService(Ok(two_document_result())))
            .await
            .unwrap();

        let page = workspace.result_page().unwrap();
        assert_eq!(page.entries[0].passage.text, "Wind capacity doubled");
        workspace.apply(Command::OpenResult { index: 1 }).unwrap();
        assert_eq!(workspace.view().current_file, Some(1));
        assert_eq!(workspace.view().current_page, 4);
        assert_eq!(
            workspace.view().filters.file,
            FileFilter::Named("B.pdf".into())
        );

        workspace.apply(Command::SelectFile { index: 0 }).unwrap();
        workspace.apply(Command::GotoPage { page: 2 }).unwrap();
        let rendered = workspace.render_current().unwrap();
        assert_eq!(rendered.page, 2);
        assert_eq!(rendered.highlights.len(), 1);
        assert_eq!(rendered.highlights[0].topic, "wind");
        assert_eq!(
            Some(rendered.highlights[0].color),
            workspace.topics().color_of("wind")
        );
    }

    #[tokio::test]
    async fn result_controls_reset_pagination() {
        let mut config = Config::default();
        config.results_page_size = 1;
        let mut workspace = Workspace::new(&config);
        workspace
            .add_files(vec![file("A.pdf", 5), file("B.pdf", 8)])
            .unwrap();
        workspace.load_documents(&FakeProvider::default()).await;
        workspace.set_generate_topics(true);
        workspace
            .run_analysis(&FixedService(Ok(two_document_result())))
            .await
            .unwrap();

        workspace.apply(Command::NextResultsPage).unwrap();
        workspace.apply(Command::NextResultsPage).unwrap();
        assert_eq!(workspace.view().page_number, 3);
        workspace.apply(Command::NextResultsPage).unwrap();
        assert_eq!(workspace.view().page_number, 3);

        workspace.apply(Command::SetMinScore { value: 0.65 }).unwrap();
        assert_eq!(workspace.view().page_number, 1);

        workspace.apply(Command::NextResultsPage).unwrap();
        workspace
            .apply(Command::ToggleTopicFilter {
                topic: "wind".into(),
            })
            .unwrap();
        assert_eq!(workspace.view().page_number, 1);

        workspace.apply(Command::NextResultsPage).unwrap();
        workspace.apply(Command::CycleSortKey).unwrap();
        assert_eq!(workspace.view().page_number, 1);
        assert_eq!(workspace.view().sort.key, SortKey::Page);
    }

    #[tokio::test]
    async fn removing_topics_prunes_the_topic_filter() {
        let mut config = Config::default();
        config.results_page_size = 1;
        let mut workspace = Workspace::new(&config);
        workspace
            .add_files(vec![file("A.pdf", 5), file("B.pdf", 8)])
            .unwrap();
        workspace.load_documents(&FakeProvider::default()).await;
        workspace.set_generate_topics(true);
        workspace
            .run_analysis(&FixedService(Ok(two_document_result())))
            .await
            .unwrap();

        workspace
            .apply(Command::ToggleTopicFilter {
                topic: "wind".into(),
            })
            .unwrap();
        workspace.apply(Command::NextResultsPage).unwrap();
        assert_eq!(workspace.result_page().unwrap().total_entries, 2);

        workspace
            .apply(Command::RemoveTopic {
                label: "wind".into(),
            })
            .unwrap();
        assert_eq!(workspace.topics().labels(), ["grid"]);
        assert!(workspace.view().filters.topics.is_empty());
        assert_eq!(workspace.view().page_number, 1);
        assert_eq!(workspace.result_page().unwrap().total_entries, 3);

        workspace
            .apply(Command::ToggleTopicFilter {
                topic: "grid".into(),
            })
            .unwrap();
        workspace.apply(Command::ClearTopics).unwrap();
        assert!(workspace.topics().is_empty());
        assert!(workspace.view().filters.topics.is_empty());
    }

    #[tokio::test]
    async fn failed_run_is_visible_and_changes_nothing_else() {
        let mut workspace = loaded_workspace().await;
        workspace.apply(Command::AddTopic { label: "wind".into() }).unwrap();
        let err = workspace
            .run_analysis(&FixedService(Err(AnalysisError::Transport(
                "connection refused".into(),
            ))))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Analysis failed: connection refused");
        assert!(workspace.result().is_none());
        assert_eq!(workspace.topics().labels(), ["wind"]);
        assert_eq!(workspace.registry().len(), 2);
        assert!(workspace.status_line().contains("analysis failed"));
    }

    #[tokio::test]
    async fn invalid_threshold_is_rejected() {
        let mut workspace = loaded_workspace().await;
        assert!(workspace.apply(Command::SetThreshold { value: -0.1 }).is_err());
        assert_eq!(workspace.threshold(), 0.5);
        assert!(workspace.notice().unwrap().contains("minimum score"));
        workspace.apply(Command::SetThreshold { value: 0.2 }).unwrap();
        assert_eq!(workspace.threshold(), 0.2);
    }

    #[tokio::test]
    async fn rendering_is_cached_per_page_and_scale() {
        let provider = FakeProvider::default();
        let mut workspace = Workspace::new(&Config::default());
        workspace.add_files(vec![file("A.pdf", 5)]).unwrap();
        workspace.load_documents(&provider).await;

        workspace.render_current().unwrap();
        workspace.render_current().unwrap();
        assert_eq!(provider.renders.load(Ordering::SeqCst), 1);

        workspace.prefetch_neighbors(2, 1.0).unwrap();
        assert_eq!(provider.renders.load(Ordering::SeqCst), 3);

        workspace.render_current_with_scale(2.0).unwrap();
        assert_eq!(provider.renders.load(Ordering::SeqCst), 4);
    }
}
