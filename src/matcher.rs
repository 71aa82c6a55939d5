//! Ranks the photos of one collection against the faces of a query image.
//!
//! Every query face is scored against every entry: O(Q * N) cosine
//! computations. That is fine for one event's photos (tens to low thousands);
//! far larger collections would need a nearest-neighbour index instead of a
//! linear scan.

use std::collections::HashMap;

use eventlens_vision::{similarity, Embedding, Image};
use log::debug;

use crate::collection::{Collection, CollectionEntry};
use crate::config::DEFAULT_THRESHOLD;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOptions {
    /// Inclusive lower bound on similarity.
    pub threshold: f32,
    /// Keep only the best N matches.
    pub max_results: Option<usize>,
}

impl MatchOptions {
    pub fn new(threshold: f32, max_results: Option<usize>) -> Result<Self> {
        Ok(Self {
            threshold: validate_threshold(threshold)?,
            max_results,
        })
    }
}

/// Cosine similarity lives in [-1, 1]; anything else (NaN included) would
/// silently accept or reject every photo.
pub fn validate_threshold(threshold: f32) -> Result<f32> {
    if (-1.0..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(Error::InvalidThreshold(threshold))
    }
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            max_results: None,
        }
    }
}

/// A collection entry that matched at least one query face.
#[derive(Debug, Clone, Copy)]
pub struct MatchResult<'a> {
    entry: &'a CollectionEntry,
    position: usize,
    /// Best similarity over all query faces, full precision.
    pub similarity: f32,
}

impl<'a> MatchResult<'a> {
    pub fn identifier(&self) -> &'a str {
        &self.entry.identifier
    }

    pub fn image(&self) -> &'a Image {
        &self.entry.image
    }

    /// Index of the entry in collection order.
    pub fn position(&self) -> usize {
        self.position
    }
}

/// Match query faces against a collection.
///
/// Query faces are checked independently (never averaged). An entry is kept
/// when any face scores at or above the threshold, and appears once, with its
/// best score. Results are sorted by similarity, descending; equal scores keep
/// collection order.
pub fn match_faces<'a>(
    queries: &[Embedding],
    collection: &'a Collection,
    options: &MatchOptions,
) -> Result<Vec<MatchResult<'a>>> {
    validate_threshold(options.threshold)?;
    let mut best: HashMap<&'a str, MatchResult<'a>> = HashMap::new();

    for (q, query) in queries.iter().enumerate() {
        for (position, entry) in collection.entries().iter().enumerate() {
            let s = similarity(query, &entry.embedding)?;
            debug!("face {q} vs {}: {s:.4}", entry.identifier);
            if s < options.threshold {
                continue;
            }

            best.entry(entry.identifier.as_str())
                .and_modify(|m| m.similarity = m.similarity.max(s))
                .or_insert(MatchResult {
                    entry,
                    position,
                    similarity: s,
                });
        }
    }

    let mut results: Vec<MatchResult<'a>> = best.into_values().collect();
    results.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then(a.position.cmp(&b.position))
    });
    if let Some(limit) = options.max_results {
        results.truncate(limit);
    }
    Ok(results)
}
