use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, NaiveDate};
use rust_decimal::Decimal;

use super::domain::{parse_decimal, SalesTransaction, TransactionId};

#[derive(Debug)]
pub enum ImportError {
    Io(std::io::Error),
    Csv(csv::Error),
    Row { line: u64, message: String },
}

impl std::fmt::Display for ImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportError::Io(err) => write!(f, "failed to read sales export: {}", err),
            ImportError::Csv(err) => write!(f, "invalid sales CSV data: {}", err),
            ImportError::Row { line, message } => write!(f, "line {}: {}", line, message),
        }
    }
}

impl std::error::Error for ImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ImportError::Io(err) => Some(err),
            ImportError::Csv(err) => Some(err),
            ImportError::Row { .. } => None,
        }
    }
}

impl From<std::io::Error> for ImportError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<csv::Error> for ImportError {
    fn from(value: csv::Error) -> Self {
        Self::Csv(value)
    }
}

/// Reads sales transactions from CSV exports. Columns other than the standard
/// ones are kept as custom ERP fields.
pub struct TransactionImporter;

impl TransactionImporter {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Vec<SalesTransaction>, ImportError> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Vec<SalesTransaction>, ImportError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut transactions = Vec::new();

        for (index, row) in csv_reader
            .deserialize::<BTreeMap<String, String>>()
            .enumerate()
        {
            let row = row?;
            // Header is line 1.
            let line = index as u64 + 2;
            transactions.push(parse_row(row, line)?);
        }

        Ok(transactions)
    }
}

fn parse_row(mut row: BTreeMap<String, String>, line: u64) -> Result<SalesTransaction, ImportError> {
    let mut take = |column: &str| {
        row.remove(column)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    let id = take("id").ok_or_else(|| missing(line, "id"))?;
    let raw_date = take("date").ok_or_else(|| missing(line, "date"))?;
    let date = parse_date(&raw_date).ok_or_else(|| ImportError::Row {
        line,
        message: format!("unrecognised date '{raw_date}'"),
    })?;
    let quantity = number(line, "quantity", take("quantity"))?;
    let gross_amount = number(line, "gross_amount", take("gross_amount"))?;
    let product = take("product");
    let category = take("category");
    let territory = take("territory");
    let container_size = take("container_size");
    let vendor = take("vendor");

    let custom_fields = row
        .into_iter()
        .filter(|(_, value)| !value.trim().is_empty())
        .collect();

    Ok(SalesTransaction {
        id: TransactionId(id),
        date,
        product,
        category,
        territory,
        container_size,
        vendor,
        quantity,
        gross_amount,
        custom_fields,
    })
}

fn missing(line: u64, column: &str) -> ImportError {
    ImportError::Row {
        line,
        message: format!("missing required column '{column}'"),
    }
}

fn number(line: u64, column: &str, raw: Option<String>) -> Result<Decimal, ImportError> {
    let raw = raw.ok_or_else(|| missing(line, column))?;
    parse_decimal(&raw).ok_or_else(|| ImportError::Row {
        line,
        message: format!("'{raw}' in column '{column}' is not a number"),
    })
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%m/%d/%Y") {
        return Some(date);
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.naive_utc().date())
}
