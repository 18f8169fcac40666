use std::collections::HashSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub document: String,
    /// 1-based page number within `document`.
    pub page: usize,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicResult {
    pub topic: String,
    #[serde(default)]
    pub similar_passages: Vec<Passage>,
}

/// Response body of the analysis service, in response order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalysisResult {
    pub topics: Vec<TopicResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicSummary {
    pub topic: String,
    pub passages: usize,
    pub best_score: Option<f32>,
}

impl AnalysisResult {
    pub fn new(topics: Vec<TopicResult>) -> Self {
        Self { topics }
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn passage_count(&self) -> usize {
        self.topics.iter().map(|t| t.similar_passages.len()).sum()
    }

    /// Topic labels in response order.
    pub fn topic_labels(&self) -> impl Iterator<Item = &str> {
        self.topics.iter().map(|t| t.topic.as_str())
    }

    /// Drops passages whose document is not in `present`, then drops topics
    /// left without passages.
    pub fn prune_missing_documents(&mut self, present: &HashSet<&str>) {
        for topic in &mut self.topics {
            topic
                .similar_passages
                .retain(|passage| present.contains(passage.document.as_str()));
        }
        self.topics.retain(|topic| !topic.similar_passages.is_empty());
    }

    pub fn summary(&self) -> Vec<TopicSummary> {
        self.topics
            .iter()
            .map(|topic| TopicSummary {
                topic: topic.topic.clone(),
                passages: topic.similar_passages.len(),
                best_score: topic
                    .similar_passages
                    .iter()
                    .map(|p| p.score)
                    .fold(None, |best: Option<f32>, score| {
                        Some(best.map_or(score, |b| b.max(score)))
                    }),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(document: &str, page: usize, score: f32) -> Passage {
        Passage {
            document: document.into(),
            page,
            text: format!("{document} p{page}"),
            score,
        }
    }

    #[test]
    fn decodes_service_response() {
        let body = r#"[
            {"topic": "energy", "similar_passages": [
                {"document": "a.pdf", "page": 3, "text": "Solar output rose.", "score": 0.81}
            ]},
            {"topic": "policy", "similar_passages": []}
        ]"#;
        let result: AnalysisResult = serde_json::from_str(body).unwrap();
        assert_eq!(result.topics.len(), 2);
        assert_eq!(result.topics[0].similar_passages[0].page, 3);
        assert_eq!(result.passage_count(), 1);
        assert_eq!(result.topic_labels().collect::<Vec<_>>(), ["energy", "policy"]);
    }

    #[test]
    fn rejects_wrong_shape() {
        assert!(serde_json::from_str::<AnalysisResult>(r#"{"error": "boom"}"#).is_err());
    }

    #[test]
    fn pruning_drops_removed_documents_and_empty_topics() {
        let mut result = AnalysisResult::new(vec![
            TopicResult {
                topic: "only-a".into(),
                similar_passages: vec![passage("A.pdf", 1, 0.9), passage("A.pdf", 2, 0.7)],
            },
            TopicResult {
                topic: "mixed".into(),
                similar_passages: vec![passage("A.pdf", 4, 0.6), passage("B.pdf", 1, 0.8)],
            },
        ]);

        let present: HashSet<&str> = ["B.pdf"].into_iter().collect();
        result.prune_missing_documents(&present);

        assert_eq!(result.topics.len(), 1);
        assert_eq!(result.topics[0].topic, "mixed");
        assert_eq!(result.topics[0].similar_passages, vec![passage("B.pdf", 1, 0.8)]);
    }

    #[test]
    fn summary_reports_best_score() {
        let result = AnalysisResult::new(vec![TopicResult {
            topic: "t".into(),
            similar_passages: vec![passage("a.pdf", 1, 0.4), passage("a.pdf", 2, 0.9)],
        }]);
        let summary = result.summary();
        assert_eq!(summary[0].passages, 2);
        assert_eq!(summary[0].best_score, Some(0.9));
    }
}
