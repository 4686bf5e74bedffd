//! Error types for catalog validation and pack selection

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PackingError {
    // Catalog errors
    #[error("provided packages are empty")]
    EmptyCatalog,

    #[error("provided packages have duplicates: {size}")]
    DuplicatePackSize { size: u64 },

    #[error("pack size must be positive, got {size}")]
    NonPositivePackSize { size: i64 },

    #[error("{count} pack sizes exceed the maximum of {max}")]
    TooManyPackSizes { count: usize, max: usize },

    #[error("pack size {largest} with orders up to {max_order} exceeds the search horizon limit of {max_horizon}")]
    PackTooLargeForHorizon { largest: u64, max_order: i64, max_horizon: u64 },

    // Order intake errors
    #[error("provided order is negative or zero: {order}")]
    InvalidOrder { order: i64 },

    #[error("order {order} exceeds the maximum of {max}")]
    OrderTooLarge { order: i64, max: i64 },

    // Optimizer bounds
    #[error("search horizon overflows for order {order} with largest pack {largest}")]
    HorizonOverflow { order: i64, largest: u64 },

    #[error("search horizon {horizon} exceeds the limit of {max}")]
    HorizonTooLarge { horizon: u64, max: u64 },

    #[error("pack usage counter overflowed")]
    UsageOverflow,

    #[error("no composition covers order {order}")]
    NoComposition { order: i64 },
}

pub type Result<T> = std::result::Result<T, PackingError>;
