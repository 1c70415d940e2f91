use std::{collections::HashMap, time::Instant};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    config::EngineConfig,
    error::{Error, Result},
    normalize::{ngrams, normalize},
    search::{Match, SearchQuery, SearchResult},
    snapshot::Snapshot,
};

/// Fuzzy matcher over character n-grams.
///
/// Every text of every entity becomes a term. A term's quality for a query
/// is the Dice coefficient of their n-gram multisets,
/// `2 * shared / (query_ngrams + term_ngrams)`, so identical normalized
/// strings score exactly `1.0`. An entity is represented by its best term.
///
/// Build instances with [`EngineConfig::build_engine`].
pub struct MatchEngine {
    config: EngineConfig,
    state: IndexState,
}

/// Counts reported by [`MatchEngine::index_entities`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    pub entity_count: usize,
    pub term_count: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexState {
    entities: Vec<Value>,
    terms: Vec<Term>,
    postings: HashMap<String, Vec<Posting>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Term {
    entity: u32,
    text: String,
    ngram_count: u32,
}

/// What a snapshot holds: the index and the config it was built with.
#[derive(Serialize)]
struct SavedIndexRef<'a> {
    config: &'a EngineConfig,
    index: &'a IndexState,
}

#[derive(Deserialize)]
struct SavedIndex {
    config: EngineConfig,
    index: IndexState,
}

/// (term index, occurrences of the n-gram in that term)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Posting(u32, u32);

struct PreparedEntity {
    key: String,
    record: Value,
    terms: Vec<PreparedTerm>,
}

struct PreparedTerm {
    text: String,
    grams: HashMap<String, u32>,
    ngram_count: u32,
}

fn prepare_term(text: String, config: &EngineConfig) -> Option<PreparedTerm> {
    let normalized = normalize(&text, config);
    let (grams, ngram_count) = ngrams(&normalized, config);
    (ngram_count > 0).then_some(PreparedTerm {
        text,
        grams,
        ngram_count,
    })
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| Error::Indexing(format!("too many {what}: {value}")))
}

impl MatchEngine {
    pub(crate) fn new(config: EngineConfig) -> Self {
        Self {
            config,
            state: IndexState::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn entity_count(&self) -> usize {
        self.state.entities.len()
    }

    pub fn term_count(&self) -> usize {
        self.state.terms.len()
    }

    /// Replace the index with `records`.
    ///
    /// `id_of` yields the identity of a record; records sharing an identity
    /// collapse into one entity, the last one winning. `texts_of` yields the
    /// searchable strings of a record. Texts that normalize to nothing are
    /// skipped.
    pub fn index_entities<I, T>(
        &mut self,
        records: Vec<Value>,
        id_of: I,
        texts_of: T,
    ) -> Result<EngineStats>
    where
        I: Fn(&Value) -> Option<Value> + Sync,
        T: Fn(&Value) -> Vec<String> + Sync,
    {
        let config = &self.config;
        let prepared: Vec<PreparedEntity> = records
            .into_par_iter()
            .enumerate()
            .map(|(index, record)| {
                let id = id_of(&record).ok_or(Error::MissingId { index })?;
                let terms = texts_of(&record)
                    .into_iter()
                    .filter_map(|text| prepare_term(text, config))
                    .collect();
                Ok(PreparedEntity {
                    key: id.to_string(),
                    record,
                    terms,
                })
            })
            .collect::<Result<_>>()?;

        let mut slots: HashMap<String, usize> = HashMap::new();
        let mut merged: Vec<PreparedEntity> = Vec::with_capacity(prepared.len());
        for entity in prepared {
            match slots.get(&entity.key) {
                Some(&slot) => merged[slot] = entity,
                None => {
                    slots.insert(entity.key.clone(), merged.len());
                    merged.push(entity);
                }
            }
        }

        let mut state = IndexState::default();
        for (entity_idx, entity) in merged.into_iter().enumerate() {
            let entity_idx = to_u32(entity_idx, "entities")?;
            for term in entity.terms {
                let term_idx = to_u32(state.terms.len(), "terms")?;
                for (gram, count) in term.grams {
                    state
                        .postings
                        .entry(gram)
                        .or_default()
                        .push(Posting(term_idx, count));
                }
                state.terms.push(Term {
                    entity: entity_idx,
                    text: term.text,
                    ngram_count: term.ngram_count,
                });
            }
            state.entities.push(entity.record);
        }

        self.state = state;
        Ok(EngineStats {
            entity_count: self.entity_count(),
            term_count: self.term_count(),
        })
    }

    /// Rank entities against `query`.
    ///
    /// Matches are sorted by descending quality; ties keep entity insertion
    /// order. Nothing below `min_quality` is returned and at most `top_n`
    /// matches are.
    pub fn get_matches(&self, query: &SearchQuery) -> SearchResult {
        let started = Instant::now();
        let normalized = normalize(query.query(), &self.config);
        let (grams, query_count) = ngrams(&normalized, &self.config);

        let mut shared: HashMap<u32, u32> = HashMap::new();
        for (gram, count) in &grams {
            let Some(postings) = self.state.postings.get(gram) else {
                continue;
            };
            for &Posting(term, term_count) in postings {
                *shared.entry(term).or_insert(0) += term_count.min(*count);
            }
        }

        // entity -> (quality, term)
        let mut best: HashMap<u32, (f64, u32)> = HashMap::new();
        for (term_idx, common) in shared {
            let term = &self.state.terms[term_idx as usize];
            let quality = 2.0 * f64::from(common)
                / f64::from(query_count + term.ngram_count);
            if quality < query.min_quality() {
                continue;
            }
            best.entry(term.entity)
                .and_modify(|current| {
                    if quality > current.0
                        || (quality == current.0 && term_idx < current.1)
                    {
                        *current = (quality, term_idx);
                    }
                })
                .or_insert((quality, term_idx));
        }

        let mut ranked: Vec<(u32, f64, u32)> = best
            .into_iter()
            .map(|(entity, (quality, term))| (entity, quality, term))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(query.top_n());

        let matches = ranked
            .into_iter()
            .map(|(entity, quality, term)| Match {
                entity: self.state.entities[entity as usize].clone(),
                quality,
                matched_string: self.state.terms[term as usize].text.clone(),
            })
            .collect();

        SearchResult {
            matches,
            query: query.clone(),
            duration: started.elapsed(),
        }
    }

    /// Capture the built index.
    pub fn save(&self) -> Result<Snapshot> {
        Snapshot::encode(&SavedIndexRef {
            config: &self.config,
            index: &self.state,
        })
    }

    /// Replace the index with the one captured in `snapshot`.
    ///
    /// The snapshot must have been saved by an engine with the same config;
    /// terms split one way never match queries split another way.
    pub fn load(&mut self, snapshot: &Snapshot) -> Result<()> {
        let saved: SavedIndex = snapshot.decode()?;
        if saved.config != self.config {
            return Err(Error::Snapshot(format!(
                "snapshot was built with {:?}, engine uses {:?}",
                saved.config, self.config
            )));
        }
        saved.index.check()?;
        self.state = saved.index;
        Ok(())
    }
}

impl IndexState {
    fn check(&self) -> Result<()> {
        let entities = self.entities.len();
        let terms = self.terms.len();
        if self.terms.iter().any(|t| t.entity as usize >= entities) {
            return Err(Error::Snapshot(
                "term refers to a missing entity".into(),
            ));
        }
        let dangling = self
            .postings
            .values()
            .flatten()
            .any(|p| p.0 as usize >= terms);
        if dangling {
            return Err(Error::Snapshot(
                "posting refers to a missing term".into(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for MatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchEngine")
            .field("entities", &self.entity_count())
            .field("terms", &self.term_count())
            .finish_non_exhaustive()
    }
}
