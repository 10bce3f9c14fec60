//! Classification-marking detection.
//!
//! A lookup file lists one marking per line (e.g. `CONFIDENTIAL`,
//! `INTERNAL USE ONLY`, `A/B RESTRICTED`). Markings are tried longest
//! first so that a specific marking wins over a shorter one it contains;
//! markings of equal length keep their file order.
//! Matching is case-insensitive and on word boundaries, except for
//! markings containing `/`, which match anywhere. The first line of text
//! holding the winning marking is kept with it.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};

use crate::models::Marking;

#[derive(Debug, Clone, Default)]
pub struct MarkingSet {
    patterns: Vec<(String, Regex)>,
}

impl MarkingSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read markings file: {}", path.display()))?;
        Self::from_lines(content.lines())
    }

    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut markings: Vec<String> = lines
            .into_iter()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .filter(|l| seen.insert(*l))
            .map(str::to_string)
            .collect();
        markings.sort_by_key(|m| std::cmp::Reverse(m.chars().count()));

        let patterns = markings
            .into_iter()
            .map(|m| {
                let escaped = regex::escape(&m);
                let pattern = if m.contains('/') {
                    escaped
                } else {
                    format!(r"\b{}\b", escaped)
                };
                let re = RegexBuilder::new(&pattern)
                    .case_insensitive(true)
                    .build()
                    .with_context(|| format!("Invalid marking: {}", m))?;
                Ok((m, re))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// The highest-priority marking present in `text`, with the first line
    /// that contains it.
    pub fn find(&self, text: &str) -> Option<Marking> {
        self.patterns.iter().find_map(|(marking, re)| {
            text.lines().find(|line| re.is_match(line)).map(|line| Marking {
                marking: marking.clone(),
                line: line.to_string(),
            })
        })
    }

    /// Search `primary`, then each fallback text in turn.
    pub fn find_in<'a>(
        &self,
        primary: &str,
        fallbacks: impl IntoIterator<Item = &'a str>,
    ) -> Option<Marking> {
        self.find(primary)
            .or_else(|| fallbacks.into_iter().find_map(|t| self.find(t)))
    }
}
