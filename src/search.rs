use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// A validated search request.
///
/// `top_n` bounds the number of matches and must be positive;
/// `min_quality` is an inclusive floor in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    query: String,
    top_n: usize,
    min_quality: f64,
}

impl SearchQuery {
    pub fn new(
        query: impl Into<String>,
        top_n: usize,
        min_quality: f64,
    ) -> Result<Self> {
        if top_n == 0 {
            return Err(Error::InvalidQuery("topN must be positive".into()));
        }
        if !(0.0..=1.0).contains(&min_quality) {
            return Err(Error::InvalidQuery(format!(
                "minQuality must be within [0, 1], got {min_quality}"
            )));
        }
        Ok(Self {
            query: query.into(),
            top_n,
            min_quality,
        })
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn top_n(&self) -> usize {
        self.top_n
    }

    pub fn min_quality(&self) -> f64 {
        self.min_quality
    }
}

/// One ranked hit: the indexed record, its quality and the term that
/// produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub entity: Value,
    pub quality: f64,
    pub matched_string: String,
}

/// Matches for one query, sorted by descending quality.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub matches: Vec<Match>,
    pub query: SearchQuery,
    #[serde(rename = "queryDurationMs", serialize_with = "as_millis")]
    pub duration: Duration,
}

impl SearchResult {
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }
}

fn as_millis<S: serde::Serializer>(
    d: &Duration,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1000.0)
}

/// Format results for human-readable terminal output.
pub fn format_human(result: &SearchResult) {
    if result.is_empty() {
        println!("No results found.");
        return;
    }

    for (rank, m) in result.matches.iter().enumerate() {
        println!(
            "{:>3}. [{:.3}] {}",
            rank + 1,
            m.quality,
            m.matched_string
        );
        if let Some(id) = m.entity.get("id") {
            println!("     id: {id}");
        }
    }
    println!(
        "\n{} result(s) in {:.2}ms",
        result.len(),
        result.duration.as_secs_f64() * 1000.0
    );
}

/// Format results as JSON output.
pub fn format_json(result: &SearchResult) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(result)?);
    Ok(())
}
