use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::error::AnalysisError;
use crate::registry::FileRegistry;
use crate::results::AnalysisResult;
use crate::topics::TopicSet;
use crate::view::validate_min_score;

#[derive(Debug, Clone)]
pub struct RequestFile {
    pub name: String,
    pub bytes: Arc<[u8]>,
}

/// Snapshot of everything sent for one run.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub files: Vec<RequestFile>,
    pub topics: Vec<String>,
    pub min_score: f32,
    pub generate_topics: bool,
}

impl AnalysisRequest {
    pub fn topics_field(&self) -> String {
        self.topics.join(",")
    }

    pub fn min_score_field(&self) -> String {
        self.min_score.to_string()
    }

    pub fn generate_topics_field(&self) -> &'static str {
        if self.generate_topics {
            "true"
        } else {
            "false"
        }
    }
}

#[async_trait::async_trait]
pub trait AnalysisService: Send + Sync {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, AnalysisError>;
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum AnalysisPhase {
    #[default]
    Idle,
    Running,
    Succeeded,
    Failed(String),
}

/// Owns the lifecycle of analysis runs: `Idle → Running → Succeeded | Failed`,
/// and back to `Running` on the next start. Holds the last published result.
#[derive(Debug, Default)]
pub struct AnalysisSession {
    phase: AnalysisPhase,
    generate_topics: bool,
    result: Option<AnalysisResult>,
    runs: usize,
}

impl AnalysisSession {
    pub fn new(generate_topics: bool) -> Self {
        Self {
            generate_topics,
            ..Self::default()
        }
    }

    pub fn phase(&self) -> &AnalysisPhase {
        &self.phase
    }

    pub fn is_running(&self) -> bool {
        matches!(self.phase, AnalysisPhase::Running)
    }

    pub fn generate_topics(&self) -> bool {
        self.generate_topics
    }

    pub fn set_generate_topics(&mut self, enabled: bool) {
        self.generate_topics = enabled;
    }

    pub fn result(&self) -> Option<&AnalysisResult> {
        self.result.as_ref()
    }

    pub fn result_mut(&mut self) -> Option<&mut AnalysisResult> {
        self.result.as_mut()
    }

    pub fn last_error(&self) -> Option<&str> {
        match &self.phase {
            AnalysisPhase::Failed(message) => Some(message.as_str()),
            _ => None,
        }
    }

    /// Number of runs that were actually sent.
    pub fn runs(&self) -> usize {
        self.runs
    }

    /// Checks the guards and, if they pass, moves to `Running` and returns the
    /// request to send. Starting a run switches topic generation off for the
    /// runs after it.
    pub fn begin(
        &mut self,
        registry: &FileRegistry,
        topics: &TopicSet,
        min_score: f32,
    ) -> Result<AnalysisRequest, AnalysisError> {
        if self.is_running() {
            return Err(AnalysisError::AlreadyRunning);
        }

        if let Err(err) = self.check_guards(registry, topics, min_score) {
            warn!(%err, "analysis not started");
            self.phase = AnalysisPhase::Failed(err.to_string());
            return Err(err);
        }

        let request = AnalysisRequest {
            files: registry
                .iter()
                .map(|file| RequestFile {
                    name: file.name.clone(),
                    bytes: Arc::clone(&file.bytes),
                })
                .collect(),
            topics: topics.labels().to_vec(),
            min_score,
            generate_topics: self.generate_topics,
        };

        self.generate_topics = false;
        self.phase = AnalysisPhase::Running;
        self.runs += 1;
        info!(
            files = request.files.len(),
            topics = request.topics.len(),
            min_score,
            generate_topics = request.generate_topics,
            "analysis started"
        );
        Ok(request)
    }

    fn check_guards(
        &self,
        registry: &FileRegistry,
        topics: &TopicSet,
        min_score: f32,
    ) -> Result<(), AnalysisError> {
        if registry.is_empty() {
            return Err(AnalysisError::NoFiles);
        }
        if topics.is_empty() && !self.generate_topics {
            return Err(AnalysisError::NoTopics);
        }
        validate_min_score(min_score)?;
        Ok(())
    }

    /// Publishes the outcome of the run started by [`begin`](Self::begin).
    /// On success, topics the service reported that are not yet known are
    /// merged into `topics`. On failure nothing but the phase changes.
    pub fn complete(
        &mut self,
        outcome: Result<AnalysisResult, AnalysisError>,
        topics: &mut TopicSet,
    ) -> Result<&AnalysisResult, AnalysisError> {
        match outcome {
            Ok(result) => {
                let added = topics.merge_generated(result.topic_labels());
                if !added.is_empty() {
                    debug!(?added, "merged topics reported by the service");
                }
                info!(
                    topics = result.topics.len(),
                    passages = result.passage_count(),
                    "analysis finished"
                );
                self.phase = AnalysisPhase::Succeeded;
                Ok(self.result.insert(result))
            }
            Err(err) => {
                warn!(%err, "analysis failed");
                self.phase = AnalysisPhase::Failed(err.to_string());
                Err(err)
            }
        }
    }

    #[instrument(skip_all)]
    pub async fn run<S>(
        &mut self,
        service: &S,
        registry: &FileRegistry,
        topics: &mut TopicSet,
        min_score: f32,
    ) -> Result<&AnalysisResult, AnalysisError>
    where
        S: AnalysisService + ?Sized,
    {
        let request = self.begin(registry, topics, min_score)?;
        let outcome = service.analyze(&request).await;
        self.complete(outcome, topics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use crate::document::IncomingFile;
    use crate::results::{Passage, TopicResult};

    struct FakeService {
        calls: AtomicUsize,
        last_request: Mutex<Option<AnalysisRequest>>,
        response: Result<AnalysisResult, AnalysisError>,
    }

    impl FakeService {
        fn replying(response: Result<AnalysisResult, AnalysisError>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                last_request: Mutex::new(None),
                response,
            }
        }
    }

    #[async_trait::async_trait]
    impl AnalysisService for FakeService {
        async fn analyze(
            &self,
            request: &AnalysisRequest,
        ) -> Result<AnalysisResult, AnalysisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock() = Some(request.clone());
            self.response.clone()
        }
    }

    fn registry_with(names: &[&str]) -> FileRegistry {
        let mut registry = FileRegistry::default();
        registry
            .add(
                names
                    .iter()
                    .map(|n| IncomingFile::new(*n, n.as_bytes().to_vec()))
                    .collect(),
            )
            .unwrap();
        registry
    }

    fn response(topics: &[&str]) -> AnalysisResult {
        AnalysisResult::new(
            topics
                .iter()
                .map(|topic| TopicResult {
                    topic: topic.to_string(),
                    similar_passages: vec![Passage {
                        document: "a.pdf".into(),
                        page: 1,
                        text: format!("about {topic}"),
                        score: 0.7,
                    }],
                })
                .collect(),
        )
    }

    #[tokio::test]
    async fn empty_registry_never_calls_service() {
        let service = FakeService::replying(Ok(response(&["x"])));
        let mut session = AnalysisSession::new(true);
        let registry = FileRegistry::default();
        let mut topics = TopicSet::new();
        topics.add("x");

        let err = session
            .run(&service, &registry, &mut topics, 0.5)
            .await
            .unwrap_err();
        assert_eq!(err, AnalysisError::NoFiles);
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            session.last_error(),
            Some("Please upload files before starting the analysis.")
        );
        assert_eq!(session.runs(), 0);
    }

    #[tokio::test]
    async fn no_topics_without_generation_never_calls_service() {
        let service = FakeService::replying(Ok(response(&["x"])));
        let mut session = AnalysisSession::new(false);
        let registry = registry_with(&["a.pdf"]);
        let mut topics = TopicSet::new();

        let err = session
            .run(&service, &registry, &mut topics, 0.5)
            .await
            .unwrap_err();
        assert_eq!(err, AnalysisError::NoTopics);
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
        assert!(matches!(session.phase(), AnalysisPhase::Failed(_)));
    }

    #[test]
    fn invalid_min_score_is_a_guard_failure() {
        let mut session = AnalysisSession::new(false);
        let registry = registry_with(&["a.pdf"]);
        let mut topics = TopicSet::new();
        topics.add("x");
        let err = session.begin(&registry, &topics, 1.2).unwrap_err();
        assert!(err.is_guard());
        assert!(!session.is_running());
    }

    #[tokio::test]
    async fn success_merges_new_topics_and_disables_generation() {
        let service = FakeService::replying(Ok(response(&["climate", "policy", "energy"])));
        let mut session = AnalysisSession::new(true);
        let registry = registry_with(&["a.pdf", "b.pdf"]);
        let mut topics = TopicSet::new();
        topics.add("climate");

        let result = session
            .run(&service, &registry, &mut topics, 0.25)
            .await
            .unwrap();
        assert_eq!(result.topics.len(), 3);
        assert_eq!(topics.labels(), ["climate", "policy", "energy"]);
        assert_eq!(session.phase(), &AnalysisPhase::Succeeded);
        assert!(!session.generate_topics());

        let sent = service.last_request.lock().clone().unwrap();
        assert!(sent.generate_topics);
        assert_eq!(sent.generate_topics_field(), "true");
        assert_eq!(sent.topics_field(), "climate");
        assert_eq!(sent.min_score_field(), "0.25");
        let names: Vec<_> = sent.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["a.pdf", "b.pdf"]);
        assert_eq!(&*sent.files[1].bytes, b"b.pdf");
    }

    #[tokio::test]
    async fn generation_is_off_for_the_following_run() {
        let service = FakeService::replying(Ok(response(&["generated"])));
        let mut session = AnalysisSession::new(true);
        let registry = registry_with(&["a.pdf"]);
        let mut topics = TopicSet::new();

        session
            .run(&service, &registry, &mut topics, 0.5)
            .await
            .unwrap();
        assert_eq!(topics.labels(), ["generated"]);

        session
            .run(&service, &registry, &mut topics, 0.5)
            .await
            .unwrap();
        let sent = service.last_request.lock().clone().unwrap();
        assert!(!sent.generate_topics);
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failure_keeps_topics_and_previous_result() {
        let mut session = AnalysisSession::new(false);
        let registry = registry_with(&["a.pdf"]);
        let mut topics = TopicSet::new();
        topics.add("x");

        let ok = FakeService::replying(Ok(response(&["x"])));
        session.run(&ok, &registry, &mut topics, 0.5).await.unwrap();

        let failing = FakeService::replying(Err(AnalysisError::Http {
            status: 500,
            reason: "Internal Server Error".into(),
            detail: None,
        }));
        let err = session
            .run(&failing, &registry, &mut topics, 0.5)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Analysis failed: 500 Internal Server Error");
        assert_eq!(
            session.last_error(),
            Some("Analysis failed: 500 Internal Server Error")
        );
        assert_eq!(topics.labels(), ["x"]);
        assert_eq!(session.result(), Some(&response(&["x"])));
    }

    #[test]
    fn second_begin_while_running_is_rejected() {
        let mut session = AnalysisSession::new(false);
        let registry = registry_with(&["a.pdf"]);
        let mut topics = TopicSet::new();
        topics.add("x");

        session.begin(&registry, &topics, 0.5).unwrap();
        assert_eq!(
            session.begin(&registry, &topics, 0.5).unwrap_err(),
            AnalysisError::AlreadyRunning
        );
        assert!(session.is_running());

        session
            .complete(Ok(response(&["x"])), &mut topics)
            .unwrap();
        assert!(session.begin(&registry, &topics, 0.5).is_ok());
    }
}
