//! Rating, probability and forecast-scoring math used by the paddock pipeline.
//!
//! Everything here is pure: no I/O, no clocks. The core crate loads rows from
//! the store, calls into these functions, and persists the results.

pub mod elo;
pub mod probability;
pub mod scoring;

pub use elo::{EloParams, Standing};
pub use probability::win_probabilities;
pub use scoring::{brier_score, log_loss};
