//! # mnemo Core Library
//!
//! Episodic memory for conversational agents. Facts a user states are
//! remembered across sessions without hand-written rules about what to keep.
//!
//! Two flows pass through the [`MemoryEngine`]:
//!
//! - **Formation**: user text → [`extract`] candidates → [`classify`]
//!   importance → [`reinforcement`] gate → [`index`] append.
//! - **Retrieval**: query → [`index`] nearest neighbours → [`retrieval::scoring`]
//!   (semantic × temporal × access × entity × importance) → filter,
//!   dedupe, truncate → formatted context block.
//!
//! Every failure in this crate is local and recoverable: embedding
//! timeouts yield empty results, corrupt files yield a fresh store.

#![deny(clippy::unwrap_used)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod classify;
pub mod config;
pub mod decay;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod extract;
pub mod formation;
pub mod index;
pub mod metrics;
pub mod persistence;
pub mod reinforcement;
pub mod retrieval;
pub mod types;

pub use config::MnemoConfig;
pub use engine::MemoryEngine;
pub use error::MnemoError;
pub use retrieval::ScoredMemory;
pub use types::*;
