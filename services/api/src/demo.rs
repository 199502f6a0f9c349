use crate::infra::{InMemoryContractSource, InMemoryRunRepository};
use chrono::NaiveDate;
use clap::Args;
use royalty_engine::calculation::{
    AggregationReport, CalculationPeriod, CalculationService, ContractSnapshot, RunRecord,
    SalesTransaction, TransactionId, TransactionImporter,
};
use royalty_engine::config::{AppConfig, CalculationConfig};
use royalty_engine::error::AppError;
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

type LocalService = CalculationService<InMemoryContractSource, InMemoryRunRepository>;

#[derive(Args, Debug)]
pub(crate) struct CalculateArgs {
    /// Contract snapshot (JSON) holding the rules, ERP rule sets and mappings
    #[arg(long)]
    pub(crate) snapshot: PathBuf,
    /// Sales export (CSV) with id, date, quantity and gross_amount columns
    #[arg(long)]
    pub(crate) sales: PathBuf,
    /// First day of the calculation period (YYYY-MM-DD)
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) start: NaiveDate,
    /// Last day of the calculation period (YYYY-MM-DD)
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) end: NaiveDate,
    /// Also report fees grouped by this dimension (vendor, territory, period, ...)
    #[arg(long)]
    pub(crate) dimension: Option<String>,
    /// Print the stored run and its line items as JSON
    #[arg(long)]
    pub(crate) json: bool,
}

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Calendar year the synthetic sales fall in
    #[arg(long, default_value_t = 2025)]
    pub(crate) year: i32,
    /// Dimension for the closing fee report
    #[arg(long, default_value = "period")]
    pub(crate) dimension: String,
    /// Leave the run pending instead of approving and paying it
    #[arg(long)]
    pub(crate) skip_approval: bool,
}

pub(crate) fn run_calculate(args: CalculateArgs) -> Result<(), AppError> {
    let CalculateArgs {
        snapshot,
        sales,
        start,
        end,
        dimension,
        json,
    } = args;

    let raw = std::fs::read_to_string(snapshot)?;
    let snapshot: ContractSnapshot = serde_json::from_str(&raw)?;
    let transactions = TransactionImporter::from_path(sales)?;
    let config = AppConfig::load()?;

    let contract_id = snapshot.contract_id.clone();
    let service = local_service(snapshot, transactions, config.calculation);
    let record = service.run_calculation(&contract_id, CalculationPeriod { start, end })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        render_run(&record);
    }

    if let Some(dimension) = dimension {
        let report = service.get_aggregate(&record.run.id, &dimension)?;
        render_report(&report);
    }

    Ok(())
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        year,
        dimension,
        skip_approval,
    } = args;

    let period = CalculationPeriod {
        start: demo_date(year, 1, 1)?,
        end: demo_date(year, 12, 31)?,
    };
    let snapshot = demo_snapshot()?;
    let transactions = demo_transactions(year)?;
    println!(
        "Royalty calculation demo: {} ({} sales, {}..{})",
        snapshot.contract_id,
        transactions.len(),
        period.start,
        period.end
    );

    let contract_id = snapshot.contract_id.clone();
    let service = local_service(snapshot, transactions, CalculationConfig::default());

    let preview = service.preview(&contract_id, period, None)?;
    println!(
        "- Preview total {} across {} line items (not stored)",
        preview.run.total_fee,
        preview.line_items.len()
    );

    let record = service.run_calculation(&contract_id, period)?;
    render_run(&record);

    let report = service.get_aggregate(&record.run.id, &dimension)?;
    render_report(&report);

    if skip_approval {
        return Ok(());
    }

    let approved = service.approve(&record.run.id, "finance-controller")?;
    println!("\n- Run {} -> {}", approved.id, approved.status);
    let paid = service.mark_paid(&record.run.id, "accounts-payable")?;
    println!("- Run {} -> {}", paid.id, paid.status);
    for approval in &paid.approvals {
        println!(
            "  - {} by {} at {}",
            approval.status,
            approval.actor,
            approval.at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    Ok(())
}

fn local_service(
    snapshot: ContractSnapshot,
    transactions: Vec<SalesTransaction>,
    config: CalculationConfig,
) -> LocalService {
    let contracts = Arc::new(InMemoryContractSource::default());
    contracts.load(snapshot, transactions);
    CalculationService::new(contracts, Arc::new(InMemoryRunRepository::default()), config)
}

fn render_run(record: &RunRecord) {
    let run = &record.run;
    println!(
        "\nRun {} for {} ({}..{}) -> {}",
        run.id, run.contract_id, run.period.start, run.period.end, run.status
    );
    println!(
        "- {} sales totalling {} | {} matched, {} unmatched, {} failed",
        run.sales_count,
        run.total_sales_amount,
        run.counts.matched,
        run.counts.unmatched,
        run.counts.failed
    );
    println!(
        "- Calculated fee {} | payable total {}",
        run.calculated_fee, run.total_fee
    );

    if !run.breakdown.is_empty() {
        println!("Fees by rule:");
        for entry in &run.breakdown {
            println!(
                "  - {} ({}): {} line items, {}",
                entry.rule_name,
                entry.rule_type.label(),
                entry.line_items,
                entry.total_fee
            );
        }
    }

    for guarantee in &run.minimum_guarantees {
        let verdict = if guarantee.minimum_guarantee_applied {
            format!("shortfall {} added", guarantee.shortfall)
        } else {
            "met".to_string()
        };
        println!(
            "- Minimum guarantee {}: earned {} vs minimum {} ({})",
            guarantee.scope.label(),
            guarantee.calculated_total,
            guarantee.minimum,
            verdict
        );
    }

    for warning in &run.warnings {
        println!("! {warning}");
    }
    if let Some(message) = &run.error_message {
        println!("! run failed: {message}");
    }
}

fn render_report(report: &AggregationReport) {
    println!("\nFees by {}:", report.dimension);
    for row in &report.rows {
        println!(
            "  - {}: {} sales | {} units | {} sales amount | {} fees ({}%)",
            row.dimension_value,
            row.transaction_count,
            row.total_quantity,
            row.total_sales_amount,
            row.total_fee,
            row.percent_of_total
        );
    }
    println!(
        "  = {} sales | {} fees",
        report.totals.transaction_count, report.totals.total_fee
    );
}

fn demo_date(year: i32, month: u32, day: u32) -> Result<NaiveDate, AppError> {
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
        AppError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{year}-{month:02}-{day:02} is not a calendar date"),
        ))
    })
}

/// Nursery licence with container pricing, a grass royalty, a fallback rate,
/// a Canadian marketing bonus and quarterly minimums with a year-end true-up.
fn demo_snapshot() -> Result<ContractSnapshot, AppError> {
    let created_at = "2025-01-01T00:00:00Z";
    let snapshot = json!({
        "contract_id": "green-acres-2025",
        "vendor": "Green Acres Nursery",
        "rules": [
            {
                "id": "containers",
                "contract_id": "green-acres-2025",
                "created_at": created_at,
                "rule_type": "container_size_tiered",
                "rule_name": "Perennial containers",
                "priority": 1,
                "criteria": [{
                    "dimension": "container_size",
                    "kind": "set_membership",
                    "values": ["1-gallon", "3-gallon"]
                }],
                "container_size_rates": [
                    {"container_size": "1-gallon", "base_rate": "1.25", "volume_threshold": "5000", "discounted_rate": "1.10"},
                    {"container_size": "3-gallon", "base_rate": "2.40", "volume_threshold": "2000", "discounted_rate": "2.10"}
                ]
            },
            {
                "id": "grasses",
                "contract_id": "green-acres-2025",
                "created_at": created_at,
                "rule_type": "percentage",
                "rule_name": "Ornamental grasses",
                "priority": 2,
                "criteria": [{
                    "dimension": "product_category",
                    "kind": "set_membership",
                    "values": ["Grasses"]
                }],
                "base_rate": "0.08"
            },
            {
                "id": "standard",
                "contract_id": "green-acres-2025",
                "created_at": created_at,
                "rule_type": "percentage",
                "rule_name": "Standard royalty",
                "priority": 3,
                "base_rate": "0.05"
            },
            {
                "id": "canada-bonus",
                "contract_id": "green-acres-2025",
                "created_at": created_at,
                "rule_type": "bonus",
                "rule_name": "Canadian marketing bonus",
                "priority": 10,
                "criteria": [{
                    "dimension": "territory",
                    "kind": "set_membership",
                    "values": ["CA"]
                }],
                "base_rate": "0.01"
            },
            {
                "id": "minimums",
                "contract_id": "green-acres-2025",
                "created_at": created_at,
                "rule_type": "minimum_guarantee",
                "rule_name": "Quarterly minimums",
                "priority": 90,
                "minimum_guarantee": {
                    "schedule": "quarterly",
                    "quarters": ["1500", "1500", "2500", "1500"],
                    "annual_true_up": "9000"
                }
            }
        ]
    });
    Ok(serde_json::from_value(snapshot)?)
}

fn demo_transactions(year: i32) -> Result<Vec<SalesTransaction>, AppError> {
    let rows: [(&str, u32, u32, &str, &str, &str, Option<&str>, i64, i64); 10] = [
        ("s-01", 1, 18, "Blue Fescue", "Grasses", "US", None, 1200, 14_400),
        ("s-02", 2, 9, "Catmint", "Perennials", "US", Some("1-gallon"), 3200, 22_400),
        ("s-03", 3, 27, "Karl Foerster", "Grasses", "CA", None, 600, 9_000),
        ("s-04", 4, 14, "Catmint", "Perennials", "US", Some("1-gallon"), 2600, 18_200),
        ("s-05", 5, 2, "Dwarf Lilac", "Shrubs", "CA", Some("3-gallon"), 900, 19_800),
        ("s-06", 6, 21, "Coneflower", "Perennials", "US", None, 400, 3_200),
        ("s-07", 8, 11, "Blue Fescue", "Grasses", "US", None, 800, 9_600),
        ("s-08", 9, 30, "Dwarf Lilac", "Shrubs", "US", Some("3-gallon"), 1300, 28_600),
        ("s-09", 10, 6, "Catmint", "Perennials", "CA", Some("1-gallon"), 700, 4_900),
        ("s-10", 11, 19, "Switchgrass", "Grasses", "US", None, 300, 4_500),
    ];

    rows.iter()
        .map(
            |(id, month, day, product, category, territory, container, quantity, amount)|
             -> Result<SalesTransaction, AppError> {
                Ok(SalesTransaction {
                    id: TransactionId((*id).to_string()),
                    date: demo_date(year, *month, *day)?,
                    product: Some((*product).to_string()),
                    category: Some((*category).to_string()),
                    territory: Some((*territory).to_string()),
                    container_size: (*container).map(str::to_string),
                    vendor: None,
                    quantity: Decimal::from(*quantity),
                    gross_amount: Decimal::from(*amount),
                    custom_fields: BTreeMap::new(),
                })
            },
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use royalty_engine::calculation::{LineItemStatus, RunStatus};

    #[test]
    fn demo_contract_prices_every_sale() {
        let snapshot = demo_snapshot().expect("demo snapshot parses");
        let contract_id = snapshot.contract_id.clone();
        let service = local_service(
            snapshot,
            demo_transactions(2025).expect("demo sales"),
            CalculationConfig::default(),
        );
        let period = CalculationPeriod {
            start: demo_date(2025, 1, 1).expect("valid start"),
            end: demo_date(2025, 12, 31).expect("valid end"),
        };

        let record = service
            .run_calculation(&contract_id, period)
            .expect("demo run succeeds");

        assert_eq!(record.run.status, RunStatus::PendingApproval);
        assert_eq!(record.run.counts.matched, 10);
        assert!(record
            .line_items
            .iter()
            .all(|item| item.status == LineItemStatus::Matched));
        let line_total: Decimal = record.line_items.iter().map(|item| item.calculated_fee).sum();
        assert_eq!(line_total, record.run.total_fee);
        assert!(record.run.total_fee >= Decimal::from(9000));
    }

    #[test]
    fn demo_rejects_impossible_dates() {
        assert!(demo_date(2025, 2, 30).is_err());
    }
}
