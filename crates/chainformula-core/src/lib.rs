//! chainformula-core — deterministic formula computation over versioned
//! chain state.
//!
//! # Architecture
//!
//! ```text
//! execute_query → compute / compute_range (+ cached variants)
//!                      ├── Environment      (typed getters + per-eval memo)
//!                      │        └── DependencyRecorder
//!                      ├── FormulaRegistry  (compiled-in catalogue)
//!                      ├── EventStore       (history-aware reads, backend trait)
//!                      ├── ComputationStore (validity-interval memo, backend trait)
//!                      └── assemble_range   (grid sampling)
//! ```
//!
//! Every read a formula makes is pinned to the target block
//! (`block_height <= target`) and recorded as a dependent key, so the
//! engine knows exactly how long a result stays valid and where the next
//! change happens.

pub mod assemble;
pub mod cache;
pub mod compute;
pub mod config;
pub mod deps;
pub mod env;
pub mod error;
pub mod keys;
pub mod range;
pub mod registry;
pub mod request;
pub mod store;
pub mod tracker;
pub mod types;

pub use assemble::{assemble_range, RangeSample, SampleGrid};
pub use cache::{compute_cached, compute_range_cached, update_validity_up_to};
pub use compute::{compute, ComputeRequest};
pub use config::ComputeConfig;
pub use env::{EnvOptions, Environment, OnFetch};
pub use error::ComputeError;
pub use range::{compute_range, ComputeRangeRequest};
pub use registry::{formula_id, Formula, FormulaRegistry, FormulaType};
pub use request::{execute_query, ComputeQuery, QueryResponse, QueryTarget};
pub use store::{ComputationStore, EventStore, FeegrantSide};
pub use tracker::StateTracker;
pub use types::{BlockInfo, Computation, ComputationResult, DependentKey, Event, Namespace};
