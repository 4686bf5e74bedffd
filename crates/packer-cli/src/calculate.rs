//! Calculate command - compute the packs for a single order without the HTTP layer.

use anyhow::Result;
use clap::Args;
use console::style;
use packer::{PackCalculator, PackCatalog, Packer, DEFAULT_MAX_HORIZON, DEFAULT_PACK_SIZES};
use std::io::{self, Write};

use crate::model::CalculateResponse;

#[derive(Args, Debug)]
pub struct CalculateArgs {
    /// Number of items to ship
    #[arg(short, long, allow_hyphen_values = true)]
    pub order: i64,

    /// Pack sizes, comma separated
    #[arg(short, long, value_delimiter = ',', default_values_t = DEFAULT_PACK_SIZES)]
    pub packs: Vec<i64>,

    /// Largest search horizon (order plus largest pack) to attempt
    #[arg(long, default_value_t = DEFAULT_MAX_HORIZON)]
    pub max_horizon: u64,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: CalculateArgs) -> Result<i32> {
    let mut stdout = io::stdout().lock();
    run(&args, &mut stdout)?;
    Ok(0)
}

fn run(args: &CalculateArgs, out: &mut impl Write) -> Result<()> {
    let catalog = PackCatalog::new(args.packs.clone())?;
    let packages = Packer::new()
        .with_max_horizon(args.max_horizon)
        .calculate(args.order, &catalog)?;

    if args.json {
        writeln!(out, "{}", serde_json::to_string_pretty(&CalculateResponse { packages })?)?;
        return Ok(());
    }

    if packages.is_empty() {
        writeln!(out, "{} order {} needs no packs", style("Info:").cyan(), args.order)?;
        return Ok(());
    }

    // packages is only non-empty for a positive order
    let total: u64 = packages.iter().sum();
    writeln!(
        out,
        "{} {} packs, {} items for an order of {} ({} spare)",
        style("Packs:").cyan().bold(),
        packages.len(),
        total,
        args.order,
        total - args.order as u64
    )?;
    for (size, count) in group(&packages) {
        writeln!(out, "  {} {} x {}", style("-").dim(), style(size).green(), count)?;
    }

    Ok(())
}

/// Collapse runs of equal sizes into `(size, count)` pairs.
fn group(packages: &[u64]) -> Vec<(u64, usize)> {
    let mut groups: Vec<(u64, usize)> = Vec::new();
    for &size in packages {
        match groups.last_mut() {
            Some((last, count)) if *last == size => *count += 1,
            _ => groups.push((size, 1)),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use packer::PackingError;

    fn args(order: i64, packs: &[i64], json: bool) -> CalculateArgs {
        CalculateArgs {
            order,
            packs: packs.to_vec(),
            max_horizon: DEFAULT_MAX_HORIZON,
            json,
        }
    }

    fn output(args: &CalculateArgs) -> String {
        let mut out = Vec::new();
        run(args, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_group() {
        assert_eq!(
            group(&[5000, 5000, 2000, 250]),
            vec![(5000, 2), (2000, 1), (250, 1)]
        );
        assert!(group(&[]).is_empty());
    }

    #[test]
    fn test_json_output() {
        let out = output(&args(12001, &[250, 500, 1000, 2000, 5000], true));
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value, serde_json::json!({"packages": [5000, 5000, 2000, 250]}));
    }

    #[test]
    fn test_summary_counts_spare_items() {
        let out = output(&args(131, &[11, 34, 59, 70], false));
        assert!(out.contains("12 packs, 132 items for an order of 131 (1 spare)"), "{}", out);
        assert_eq!(out.lines().count(), 2);
    }

    #[test]
    fn test_non_positive_order_needs_no_packs() {
        let out = output(&args(-5, &[250, 500], false));
        assert!(out.contains("order -5 needs no packs"), "{}", out);
    }

    #[test]
    fn test_huge_order_fails_fast() {
        let err = execute(args(10_000_000_000_000, &[250, 500], true)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PackingError>(),
            Some(PackingError::HorizonTooLarge { max: DEFAULT_MAX_HORIZON, .. })
        ));
    }

    #[test]
    fn test_invalid_packs_are_rejected() {
        let err = execute(args(10, &[5, 5], false)).unwrap_err();
        assert_eq!(
            err.downcast_ref::<PackingError>(),
            Some(&PackingError::DuplicatePackSize { size: 5 })
        );
    }
}
