//! Pack catalog: the set of pack sizes available for shipping

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::error::{PackingError, Result};

/// Default pack sizes used when no catalog is configured
pub const DEFAULT_PACK_SIZES: [i64; 5] = [250, 500, 1000, 2000, 5000];

/// Validated, immutable set of pack sizes sorted ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackCatalog {
    sizes: Vec<u64>,
}

impl PackCatalog {
    /// Validate raw pack sizes and build a catalog from them.
    ///
    /// Rejects an empty list, any size that is zero or negative, and any
    /// size given more than once.
    pub fn new(sizes: Vec<i64>) -> Result<Self> {
        if sizes.is_empty() {
            return Err(PackingError::EmptyCatalog);
        }

        let mut seen = HashSet::with_capacity(sizes.len());
        let mut validated = Vec::with_capacity(sizes.len());
        for size in sizes {
            if size <= 0 {
                return Err(PackingError::NonPositivePackSize { size });
            }
            let size = size as u64;
            if !seen.insert(size) {
                return Err(PackingError::DuplicatePackSize { size });
            }
            validated.push(size);
        }

        validated.sort_unstable();
        Ok(Self { sizes: validated })
    }

    /// Pack sizes, ascending
    pub fn sizes(&self) -> &[u64] {
        &self.sizes
    }

    pub fn largest(&self) -> u64 {
        // a validated catalog is never empty
        self.sizes[self.sizes.len() - 1]
    }
}

impl Default for PackCatalog {
    fn default() -> Self {
        Self {
            sizes: DEFAULT_PACK_SIZES.iter().map(|&size| size as u64).collect(),
        }
    }
}

/// A catalog as observed at one point in time.
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    pub version: u64,
    pub catalog: Arc<PackCatalog>,
}

#[derive(Debug)]
struct Current {
    version: u64,
    catalog: Arc<PackCatalog>,
}

/// Shared holder of the current catalog.
///
/// Replacement swaps in a new immutable catalog; readers holding an older
/// snapshot keep using it unchanged.
#[derive(Debug)]
pub struct CatalogStore {
    current: Mutex<Current>,
}

impl CatalogStore {
    pub fn new(catalog: PackCatalog) -> Self {
        Self {
            current: Mutex::new(Current {
                version: 1,
                catalog: Arc::new(catalog),
            }),
        }
    }

    /// Current catalog and its version.
    pub fn snapshot(&self) -> CatalogSnapshot {
        let current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        CatalogSnapshot {
            version: current.version,
            catalog: Arc::clone(&current.catalog),
        }
    }

    /// Validate `sizes` and make them the current catalog.
    ///
    /// Nothing changes if validation fails.
    pub fn replace(&self, sizes: Vec<i64>) -> Result<CatalogSnapshot> {
        Ok(self.install(PackCatalog::new(sizes)?))
    }

    /// Make an already validated catalog the current one.
    pub fn install(&self, catalog: PackCatalog) -> CatalogSnapshot {
        let catalog = Arc::new(catalog);

        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        current.version += 1;
        current.catalog = Arc::clone(&catalog);

        log::info!(
            "Pack catalog updated to version {}: {:?}",
            current.version,
            catalog.sizes()
        );

        CatalogSnapshot {
            version: current.version,
            catalog,
        }
    }
}

impl Default for CatalogStore {
    fn default() -> Self {
        Self::new(PackCatalog::default())
    }
}
