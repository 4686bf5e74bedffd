//! Optimal pack selection
//!
//! This crate computes how to fulfil an order of items from a catalog of
//! fixed-size packs: the fewest items shipped beyond the order, then the
//! fewest packs.

pub mod calculator;
pub mod catalog;
pub mod error;
pub mod optimizer;

pub use calculator::PackCalculator;
pub use catalog::{CatalogSnapshot, CatalogStore, PackCatalog, DEFAULT_PACK_SIZES};
pub use error::{PackingError, Result};
pub use optimizer::{compute, Packer, DEFAULT_MAX_HORIZON};
