//! Stock ledger replay tool.
//!
//! Reads a JSON-lines file of movement requests, appends them to an in-memory
//! ledger and prints valuation, reorder, turnover, movement-activity, transfer
//! and ABC reports as one JSON document.
//!
//! ```text
//! stockledger-cli movements.jsonl --method avg --config ledger.toml
//! ```

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use rust_decimal::Decimal;
use serde::Serialize;

use stockledger_inventory::{
    AbcEntry, CostingMethod, InMemoryCatalog, InventoryAnalytics, LedgerConfig, MovementLedger,
    MovementRequest, MovementStats, ProductTurnover, ReorderSuggestion, TransferFlow, ValuationEngine,
    ValuationResult, ValuationSummary, WarehouseUtilization,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON-lines file, one movement request per line
    movements: PathBuf,

    /// Ledger config file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Valuation method: fifo, lifo or avg
    #[arg(long, default_value = "fifo")]
    method: String,

    /// Per-warehouse capacity; adds a utilization section when set
    #[arg(long)]
    capacity: Option<Decimal>,
}

#[derive(Debug, Serialize)]
struct Report {
    movements: usize,
    valuation: Vec<ValuationResult>,
    summary: ValuationSummary,
    reorder: Vec<ReorderSuggestion>,
    turnover: Vec<ProductTurnover>,
    movement_stats: Vec<MovementStats>,
    transfer_flows: Vec<TransferFlow>,
    abc: Vec<AbcEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    utilization: Option<Vec<WarehouseUtilization>>,
}

fn main() -> Result<()> {
    stockledger_observability::init();
    let args = Args::parse();

    let method: CostingMethod = args.method.parse()?;
    let config = LedgerConfig::load(args.config.as_deref()).context("failed to load ledger config")?;

    let requests = read_requests(&args.movements)?;
    let ledger = MovementLedger::new(config, catalog_for(requests.iter().map(|(_, r)| r)));

    for (line, request) in requests {
        ledger
            .append_movement(request)
            .with_context(|| format!("{}:{line}: movement rejected", args.movements.display()))?;
    }

    let report = build_report(&ledger, method, args.capacity)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Parse requests, skipping blank lines and `#` comments. Returns 1-based line numbers.
fn read_requests(path: &Path) -> Result<Vec<(usize, MovementRequest)>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;

    let mut requests = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let request: MovementRequest = serde_json::from_str(trimmed)
            .with_context(|| format!("{}:{}: invalid movement", path.display(), idx + 1))?;
        requests.push((idx + 1, request));
    }

    tracing::info!(count = requests.len(), path = %path.display(), "loaded movement requests");
    Ok(requests)
}

/// Catalog that knows every product and warehouse the requests mention.
fn catalog_for<'a>(requests: impl IntoIterator<Item = &'a MovementRequest>) -> InMemoryCatalog {
    let catalog = InMemoryCatalog::new();
    for request in requests {
        catalog.add_product(request.product_id);
        for warehouse_id in [
            request.warehouse_id,
            request.from_warehouse_id,
            request.to_warehouse_id,
        ]
        .into_iter()
        .flatten()
        {
            catalog.add_warehouse(warehouse_id);
        }
    }
    catalog
}

fn build_report(
    ledger: &MovementLedger<InMemoryCatalog>,
    method: CostingMethod,
    capacity: Option<Decimal>,
) -> Result<Report> {
    let snapshot = ledger.snapshot()?;
    let movements = ledger.movements();
    let analytics = InventoryAnalytics::new(&snapshot, &movements);

    let valuation = ValuationEngine::value_inventory(&snapshot, method);
    let summary = ValuationEngine::summarize(method, &valuation);

    Ok(Report {
        movements: movements.len(),
        summary,
        valuation,
        reorder: ledger.reorder_suggestions(None)?,
        turnover: analytics.turnover_report(),
        movement_stats: analytics.movement_stats(),
        transfer_flows: analytics.transfer_flows(),
        abc: analytics.abc_classification(method),
        utilization: capacity.map(|c| analytics.warehouse_utilization(c)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use stockledger_core::{ProductId, WarehouseId};
    use stockledger_inventory::Thresholds;

    #[test]
    fn catalog_covers_every_referenced_id() {
        let p = ProductId::new();
        let (w1, w2) = (WarehouseId::new(), WarehouseId::new());
        let requests = [
            MovementRequest::receipt(p, w1, dec!(1), dec!(1)),
            MovementRequest::transfer(p, w1, w2, dec!(1)),
        ];

        let ledger = MovementLedger::new(LedgerConfig::default(), catalog_for(&requests));
        for request in requests {
            ledger.append_movement(request).unwrap();
        }

        let report = build_report(&ledger, CostingMethod::Fifo, Some(dec!(10))).unwrap();
        assert_eq!(report.movements, 2);
        assert_eq!(report.valuation.len(), 1);
        assert_eq!(report.summary.total_quantity, dec!(1));
        assert_eq!(report.utilization.map(|u| u.len()), Some(2));
        assert_eq!(report.turnover.len(), 1);
        assert_eq!(report.movement_stats.len(), 1);
        assert_eq!(report.transfer_flows.len(), 1);
        assert_eq!(report.transfer_flows[0].from_warehouse_id, w1);
    }

    #[test]
    fn report_ranks_reorder_suggestions() {
        let p = ProductId::new();
        let w = WarehouseId::new();
        let requests = [MovementRequest::receipt(p, w, dec!(3), dec!(1))];
        let catalog = catalog_for(&requests);
        catalog.set_thresholds(p, w, Thresholds::new(dec!(5), dec!(1)));

        let ledger = MovementLedger::new(LedgerConfig::default(), catalog);
        for request in requests {
            ledger.append_movement(request).unwrap();
        }

        let report = build_report(&ledger, CostingMethod::Fifo, None).unwrap();
        assert_eq!(report.reorder.len(), 1);
        assert_eq!(report.reorder[0].shortage, dec!(3));
        assert!(report.utilization.is_none());

        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("utilization").is_none());
        assert!(json["movement_stats"].is_array());
    }

    #[test]
    fn requests_parse_from_json_lines() {
        let p = ProductId::new();
        let w = WarehouseId::new();
        let dir = std::env::temp_dir().join(format!("stockledger-cli-{p}"));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("movements.jsonl");

        let body = format!(
            "# opening stock\n{{\"product_id\":\"{p}\",\"type\":\"IN\",\"warehouse_id\":\"{w}\",\"quantity\":\"5\",\"unit_cost\":\"2.50\"}}\n\n{{\"product_id\":\"{p}\",\"type\":\"OUT\",\"warehouse_id\":\"{w}\",\"quantity\":\"2\"}}\n"
        );
        std::fs::write(&path, body).unwrap();

        let requests = read_requests(&path).unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].0, 2);
        assert_eq!(requests[1].0, 4);
        assert_eq!(requests[0].1.unit_cost, Some(dec!(2.50)));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
