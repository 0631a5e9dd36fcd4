//! Ordered substring pattern tables.
//!
//! Tables are evaluated top to bottom and the first hit wins. They are kept
//! as vectors rather than maps because match order decides attribution.

use serde::{Deserialize, Serialize};

/// A named group of substring patterns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternCategory {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub patterns: Vec<String>,
}

impl PatternCategory {
    pub fn new(name: &str, description: &str, patterns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            patterns: patterns.iter().map(|p| (*p).to_string()).collect(),
        }
    }

    /// Whether any pattern is a substring of `text`.
    pub fn matches(&self, text: &str) -> bool {
        self.patterns
            .iter()
            .any(|p| !p.is_empty() && text.contains(p.as_str()))
    }

    /// The first pattern found in `text`.
    pub fn matching_pattern(&self, text: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|p| !p.is_empty() && text.contains(p.as_str()))
            .map(String::as_str)
    }
}

/// An ordered list of categories.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PatternTable {
    categories: Vec<PatternCategory>,
}

/// Where a frame-first walk found its match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMatch {
    /// Index into the table.
    pub category: usize,
    /// Index into the stack.
    pub frame: usize,
}

impl PatternTable {
    pub fn new(categories: Vec<PatternCategory>) -> Self {
        Self { categories }
    }

    pub fn categories(&self) -> &[PatternCategory] {
        &self.categories
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PatternCategory> {
        self.categories.get(index)
    }

    /// Append categories after the existing ones, so built-in entries keep
    /// priority.
    pub fn extend(&mut self, extra: impl IntoIterator<Item = PatternCategory>) {
        self.categories.extend(extra);
    }

    /// Index of the first category matching a single string.
    pub fn first_match(&self, text: &str) -> Option<usize> {
        self.categories.iter().position(|c| c.matches(text))
    }

    /// Walk frames leaf to root; at each frame try categories in table
    /// order. Returns the first hit.
    pub fn first_frame_match<S: AsRef<str>>(&self, frames: &[S]) -> Option<FrameMatch> {
        frames.iter().enumerate().find_map(|(frame, name)| {
            self.first_match(name.as_ref())
                .map(|category| FrameMatch { category, frame })
        })
    }

    /// Try categories in table order; for each, scan the whole stack.
    /// Returns the highest-priority category present anywhere.
    pub fn first_category_match<S: AsRef<str>>(&self, frames: &[S]) -> Option<usize> {
        self.categories
            .iter()
            .position(|c| frames.iter().any(|f| c.matches(f.as_ref())))
    }
}
