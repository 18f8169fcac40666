use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_PALETTE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub fn as_array(self) -> [u8; 3] {
        [self.0, self.1, self.2]
    }
}

/// Ordered, duplicate-free topic labels.
///
/// Colours are positional: a label's colour is derived from its current index
/// every time it is asked for, so removing or clearing topics shifts the
/// colours of the labels after it.
#[derive(Debug, Clone)]
pub struct TopicSet {
    labels: Vec<String>,
    palette: Vec<Rgb>,
}

impl Default for TopicSet {
    fn default() -> Self {
        Self::new()
    }
}

impl TopicSet {
    pub fn new() -> Self {
        Self::with_palette(DEFAULT_PALETTE.to_vec())
    }

    pub fn with_palette(palette: Vec<Rgb>) -> Self {
        let palette = if palette.is_empty() {
            DEFAULT_PALETTE.to_vec()
        } else {
            palette
        };
        Self {
            labels: Vec::new(),
            palette,
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|existing| existing == label)
    }

    pub fn position(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|existing| existing == label)
    }

    /// Appends `label` unless it is blank or already present.
    pub fn add(&mut self, label: &str) -> bool {
        let label = label.trim();
        if label.is_empty() || self.contains(label) {
            return false;
        }
        self.labels.push(label.to_string());
        true
    }

    pub fn remove(&mut self, label: &str) -> bool {
        match self.position(label) {
            Some(index) => {
                self.labels.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.labels.clear();
    }

    /// Union with server-provided labels, keeping first-seen order.
    /// Labels are stored verbatim so they match the result's topic strings;
    /// only empty ones are skipped. Returns the labels that were not present
    /// before.
    pub fn merge_generated<I, S>(&mut self, labels: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut added = Vec::new();
        for label in labels {
            let label = label.as_ref();
            if label.is_empty() || self.contains(label) {
                continue;
            }
            self.labels.push(label.to_string());
            added.push(label.to_string());
        }
        added
    }

    pub fn color_at(&self, index: usize) -> Rgb {
        self.palette[index % self.palette.len()]
    }

    pub fn color_of(&self, label: &str) -> Option<Rgb> {
        self.position(label).map(|index| self.color_at(index))
    }

    /// Wire form for the `topics` field.
    pub fn joined(&self) -> String {
        self.labels.join(",")
    }
}
