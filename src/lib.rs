//! docsift - fuzzy search over in-memory datasets, indexed in the background.
//!
//! A dataset is handed to an [`IndexCoordinator`], which ships it to a
//! worker thread. The worker builds an n-gram [`MatchEngine`], saves it into
//! a [`Snapshot`] and sends that back; the coordinator loads the snapshot
//! into its own engine and starts answering searches. Searches issued while
//! no index is loaded wait in line and are answered, in order, as soon as
//! one is.
//!
//! # Quick start
//!
//! ```no_run
//! use docsift::{Dataset, IndexCoordinator, Settings};
//! use serde_json::json;
//!
//! # async fn run() -> docsift::Result<()> {
//! let coordinator = IndexCoordinator::from_settings(&Settings::default())?;
//!
//! let dataset = Dataset::Persons {
//!     records: vec![
//!         json!({"id": 23501, "firstName": "Alice", "lastName": "King"}),
//!         json!({"id": 99234, "firstName": "Bob", "lastName": "Bishop"}),
//!     ],
//! };
//!
//! // Issued before the index exists; answered once it is loaded.
//! let search = coordinator.search_with("alice kign", 10, 0.3);
//! coordinator.index_data(dataset).await?;
//!
//! for m in search.await?.matches {
//!     println!("{:.3} {}", m.quality, m.matched_string);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod normalize;
pub mod search;
pub mod snapshot;
pub mod worker;

pub use config::{CoordinatorConfig, EngineConfig, OverlapPolicy, Settings};
pub use coordinator::{IndexCoordinator, ReadyState};
pub use dataset::{Dataset, DatasetShape};
pub use engine::MatchEngine;
pub use error::{Error, Result};
pub use search::{Match, SearchQuery, SearchResult};
pub use snapshot::Snapshot;
pub use worker::{IndexWorker, IndexingMeta};
