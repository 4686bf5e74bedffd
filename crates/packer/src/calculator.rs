use crate::catalog::PackCatalog;
use crate::error::Result;
use crate::optimizer::Packer;

/// Something that can turn an order into a list of packs.
///
/// The request layer depends on this rather than on [`Packer`] directly so
/// it can be driven with a stub in tests.
pub trait PackCalculator: Send + Sync {
    fn calculate(&self, order: i64, catalog: &PackCatalog) -> Result<Vec<u64>>;
}

impl PackCalculator for Packer {
    fn calculate(&self, order: i64, catalog: &PackCatalog) -> Result<Vec<u64>> {
        self.compute(order, catalog.sizes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packer_uses_catalog_sizes() {
        let catalog = PackCatalog::new(vec![23, 31, 53]).unwrap();
        let packs = Packer::new().calculate(500_000, &catalog).unwrap();
        assert_eq!(packs.iter().sum::<u64>(), 500_000);
        assert!(packs.windows(2).all(|pair| pair[0] >= pair[1]));
    }
}
