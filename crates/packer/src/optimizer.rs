//! Pack selection over an unbounded catalog of pack sizes
//!
//! Given an order quantity and a set of pack sizes, the optimizer picks the
//! multiset of packs whose total covers the order with the least surplus,
//! and among those the one using the fewest packs.
//!
//! The search is a bounded dynamic program over every achievable sum from
//! `0` up to `order + largest pack`. Any composition above that horizon can
//! drop one of its largest packs and still cover the order, so nothing past
//! it is ever optimal.

use crate::error::{PackingError, Result};

/// Horizon bound used by the service and the CLI unless configured otherwise
pub const DEFAULT_MAX_HORIZON: u64 = 2_000_000;

/// Pack selection engine.
///
/// A `Packer` holds no state between calls; every call builds and discards
/// its own table, so a single value can be shared freely across threads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Packer {
    /// Upper bound on the search horizon (`order + largest pack`)
    max_horizon: Option<u64>,
}

impl Packer {
    /// Create a packer without a horizon limit
    pub fn new() -> Self {
        Self { max_horizon: None }
    }

    /// Reject requests whose horizon would exceed `max` instead of
    /// allocating a table for them.
    pub fn with_max_horizon(mut self, max: u64) -> Self {
        self.max_horizon = Some(max);
        self
    }

    /// Compute the packs to ship for `order` items.
    ///
    /// Returns the pack sizes in descending order, one entry per physical
    /// pack. A non-positive order needs no packs and yields an empty list.
    ///
    /// Fails if `pack_sizes` is empty, contains a zero or a duplicate, or if
    /// the search horizon cannot be represented or exceeds the configured
    /// limit.
    pub fn compute(&self, order: i64, pack_sizes: &[u64]) -> Result<Vec<u64>> {
        let sizes = sorted_sizes(pack_sizes)?;

        if order <= 0 {
            return Ok(Vec::new());
        }

        // sorted_sizes guarantees at least one element
        let smallest = sizes[0];
        let largest = sizes[sizes.len() - 1];

        // order is positive here, so the cast is lossless
        if order as u64 <= smallest {
            return Ok(vec![smallest]);
        }

        let bounds = Bounds::new(order, &sizes, self.max_horizon)?;
        log::trace!(
            "order {} over {} pack sizes: horizon {} (largest pack {})",
            order,
            sizes.len(),
            bounds.horizon,
            largest
        );

        let table = SumTable::tabulate(&bounds)?;
        let sum = table
            .select(bounds.order)
            .ok_or(PackingError::NoComposition { order })?;

        Ok(table.compose(sum, &sizes))
    }
}

/// Compute the packs to ship for `order` items with an unbounded [`Packer`].
pub fn compute(order: i64, pack_sizes: &[u64]) -> Result<Vec<u64>> {
    Packer::new().compute(order, pack_sizes)
}

/// Validate pack sizes and return them as a sorted local copy.
fn sorted_sizes(pack_sizes: &[u64]) -> Result<Vec<u64>> {
    if pack_sizes.is_empty() {
        return Err(PackingError::EmptyCatalog);
    }

    let mut sizes = pack_sizes.to_vec();
    sizes.sort_unstable();

    if sizes[0] == 0 {
        return Err(PackingError::NonPositivePackSize { size: 0 });
    }

    if let Some(pair) = sizes.windows(2).find(|pair| pair[0] == pair[1]) {
        return Err(PackingError::DuplicatePackSize { size: pair[0] });
    }

    Ok(sizes)
}

/// Index-space view of one request: order, pack sizes and horizon, all as
/// table indices.
struct Bounds {
    order: usize,
    sizes: Vec<usize>,
    horizon: usize,
}

impl Bounds {
    fn new(order: i64, sizes: &[u64], max_horizon: Option<u64>) -> Result<Self> {
        let largest = sizes[sizes.len() - 1];
        let overflow = PackingError::HorizonOverflow { order, largest };

        let horizon = (order as u64).checked_add(largest).ok_or(overflow.clone())?;
        if let Some(max) = max_horizon {
            if horizon > max {
                return Err(PackingError::HorizonTooLarge { horizon, max });
            }
        }

        let horizon = usize::try_from(horizon).map_err(|_| overflow.clone())?;

        // The usage table holds one counter per size for every cell.
        horizon
            .checked_add(1)
            .and_then(|cells| cells.checked_mul(sizes.len()))
            .ok_or(overflow)?;

        // Every size is at most the horizon, and order is below it.
        Ok(Self {
            order: order as usize,
            sizes: sizes.iter().map(|&size| size as usize).collect(),
            horizon,
        })
    }
}

/// Achievable-sum table.
///
/// Cell `s` holds the fewest packs summing to exactly `s` (or `None` while
/// unreached) and, in `usage`, how many packs of each size realise it.
struct SumTable {
    width: usize,
    boxes: Vec<Option<u32>>,
    usage: Vec<u32>,
}

impl SumTable {
    /// Fill the table for every sum up to the horizon.
    fn tabulate(bounds: &Bounds) -> Result<Self> {
        let width = bounds.sizes.len();
        let cells = bounds.horizon + 1;

        let mut table = Self {
            width,
            boxes: vec![None; cells],
            usage: vec![0; cells * width],
        };
        table.boxes[0] = Some(0);

        for sum in 1..cells {
            for (slot, &size) in bounds.sizes.iter().enumerate() {
                // sizes are ascending
                if size > sum {
                    break;
                }

                let Some(previous) = table.boxes[sum - size] else {
                    continue;
                };
                let candidate = previous.checked_add(1).ok_or(PackingError::UsageOverflow)?;

                if table.boxes[sum].map_or(true, |current| candidate < current) {
                    table.boxes[sum] = Some(candidate);
                    table.derive_usage(sum - size, sum, slot)?;
                }
            }
        }

        Ok(table)
    }

    /// Copy the usage vector of `from` into `to` and add one pack at `slot`.
    fn derive_usage(&mut self, from: usize, to: usize, slot: usize) -> Result<()> {
        let start = from * self.width;
        self.usage.copy_within(start..start + self.width, to * self.width);

        let count = &mut self.usage[to * self.width + slot];
        *count = count.checked_add(1).ok_or(PackingError::UsageOverflow)?;
        Ok(())
    }

    /// Pick the reached sum at or above `order` with the least overshoot,
    /// breaking ties on the fewest packs.
    fn select(&self, order: usize) -> Option<usize> {
        self.boxes
            .iter()
            .enumerate()
            .skip(order)
            .filter_map(|(sum, boxes)| boxes.map(|boxes| (sum, boxes)))
            .min_by_key(|&(sum, boxes)| (sum, boxes))
            .map(|(sum, _)| sum)
    }

    /// Expand the usage vector of `sum` into one entry per pack, largest
    /// first.
    fn compose(&self, sum: usize, sizes: &[u64]) -> Vec<u64> {
        let counts = &self.usage[sum * self.width..(sum + 1) * self.width];

        sizes
            .iter()
            .zip(counts)
            .rev()
            .flat_map(|(&size, &count)| std::iter::repeat(size).take(count as usize))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_catalog_is_rejected() {
        assert_eq!(compute(10, &[]), Err(PackingError::EmptyCatalog));
        assert_eq!(compute(0, &[]), Err(PackingError::EmptyCatalog));
    }

    #[test]
    fn test_zero_pack_size_is_rejected() {
        assert_eq!(
            compute(10, &[5, 0, 3]),
            Err(PackingError::NonPositivePackSize { size: 0 })
        );
    }

    #[test]
    fn test_duplicate_pack_size_is_rejected() {
        assert_eq!(
            compute(10, &[5, 3, 5]),
            Err(PackingError::DuplicatePackSize { size: 5 })
        );
    }

    #[test]
    fn test_unsorted_input_is_accepted() {
        assert_eq!(compute(7, &[5, 3]).unwrap(), vec![5, 3]);
    }

    #[test]
    fn test_single_pack_size() {
        assert_eq!(compute(7, &[3]).unwrap(), vec![3, 3, 3]);
        assert_eq!(compute(9, &[3]).unwrap(), vec![3, 3, 3]);
    }

    #[test]
    fn test_exact_fit_beats_fewer_packs() {
        // a single 11 overshoots by one
        assert_eq!(compute(10, &[5, 11]).unwrap(), vec![5, 5]);
        assert_eq!(compute(51, &[3, 5, 8, 10]).unwrap(), vec![10, 10, 10, 10, 8, 3]);
    }

    #[test]
    fn test_horizon_limit() {
        let packer = Packer::new().with_max_horizon(1_000);
        assert_eq!(packer.compute(990, &[10]).unwrap().len(), 99);
        assert_eq!(
            packer.compute(991, &[10]),
            Err(PackingError::HorizonTooLarge { horizon: 1_001, max: 1_000 })
        );
    }

    #[test]
    fn test_horizon_limit_ignored_for_degenerate_orders() {
        let packer = Packer::new().with_max_horizon(1);
        assert_eq!(packer.compute(-3, &[10]).unwrap(), Vec::<u64>::new());
        assert_eq!(packer.compute(4, &[10]).unwrap(), vec![10]);
    }

    #[test]
    fn test_horizon_overflow() {
        let largest = u64::MAX - 1;
        assert_eq!(
            compute(i64::MAX, &[3, largest]),
            Err(PackingError::HorizonOverflow { order: i64::MAX, largest })
        );
    }

    #[test]
    fn test_table_cells() {
        let bounds = Bounds::new(7, &[3, 5], None).unwrap();
        assert_eq!(bounds.horizon, 12);

        let table = SumTable::tabulate(&bounds).unwrap();
        assert_eq!(table.boxes[0], Some(0));
        assert_eq!(table.boxes[1], None);
        assert_eq!(table.boxes[4], None);
        assert_eq!(table.boxes[8], Some(2));
        assert_eq!(table.boxes[10], Some(2));
        assert_eq!(&table.usage[8 * 2..9 * 2], &[1, 1]);
        assert_eq!(table.select(7), Some(8));
        assert_eq!(table.compose(8, &[3, 5]), vec![5, 3]);
    }
}
