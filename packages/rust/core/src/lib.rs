//! Harvest orchestration: drives the listing scan, detail extraction, and
//! asset transfer stages and assembles the final record set.

pub mod pipeline;

pub use pipeline::{Harvester, HarvestOutcome, ProgressReporter, SilentProgress};
