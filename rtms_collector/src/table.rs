use std::collections::HashSet;
use std::fmt::Display;
use std::str::FromStr;

use polars::prelude::*;
use rust_xlsxwriter::{Format, Workbook};
use serde::{Deserialize, Serialize};

use crate::collector::CollectionPlan;
use crate::error::ExportError;
use crate::row::{FieldValue, TransactionRow};

const SHEET_NAME: &str = "거래내역";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Xlsx,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
        }
    }
}

impl Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "xlsx" | "excel" => Ok(ExportFormat::Xlsx),
            _ => Err(ExportError::UnknownFormat(s.to_string())),
        }
    }
}

/// Columns are the union of all row keys in first-seen order; a row lacking
/// a column gets a null there. Integer-only columns become `Int64`.
pub fn rows_to_frame(rows: &[TransactionRow]) -> PolarsResult<DataFrame> {
    let mut names: Vec<&str> = Vec::new();
    let mut seen = HashSet::new();
    for row in rows {
        for key in row.keys() {
            if seen.insert(key) {
                names.push(key);
            }
        }
    }

    let mut columns: Vec<Column> = Vec::with_capacity(names.len());
    for name in names {
        let values: Vec<Option<&FieldValue>> = rows.iter().map(|r| r.get(name).flatten()).collect();
        let integral = values.iter().any(Option::is_some)
            && values
                .iter()
                .flatten()
                .all(|v| matches!(v, FieldValue::Integer(_)));
        let series = if integral {
            let ints: Vec<Option<i64>> = values
                .iter()
                .map(|v| match v {
                    Some(FieldValue::Integer(n)) => Some(*n),
                    _ => None,
                })
                .collect();
            Series::new(name.into(), ints)
        } else {
            let strs: Vec<Option<String>> = values
                .iter()
                .map(|v| v.map(ToString::to_string))
                .collect();
            Series::new(name.into(), strs)
        };
        columns.push(series.into());
    }
    DataFrame::new(columns)
}

pub fn export(df: &mut DataFrame, format: ExportFormat) -> Result<Vec<u8>, ExportError> {
    match format {
        ExportFormat::Csv => write_csv(df),
        ExportFormat::Xlsx => write_xlsx(df),
    }
}

/// UTF-8 with BOM so spreadsheet tools pick the right encoding for Hangul.
pub fn write_csv(df: &mut DataFrame) -> Result<Vec<u8>, ExportError> {
    let mut buf = Vec::new();
    CsvWriter::new(&mut buf)
        .include_bom(true)
        .include_header(true)
        .with_separator(b',')
        .finish(df)?;
    Ok(buf)
}

/// Single sheet: a bold header row, then one row per transaction.
pub fn write_xlsx(df: &DataFrame) -> Result<Vec<u8>, ExportError> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();
    let sheet = workbook.add_worksheet();
    sheet.set_name(SHEET_NAME)?;

    for (col, column) in df.get_columns().iter().enumerate() {
        let col = col as u16;
        sheet.write_string_with_format(0, col, column.name().as_str(), &header)?;
        match column.dtype() {
            DataType::Int64 => {
                for (row, value) in column.i64()?.into_iter().enumerate() {
                    if let Some(value) = value {
                        sheet.write_number(row as u32 + 1, col, value as f64)?;
                    }
                }
            }
            _ => {
                let as_text = column.cast(&DataType::String)?;
                for (row, value) in as_text.str()?.into_iter().enumerate() {
                    if let Some(value) = value {
                        sheet.write_string(row as u32 + 1, col, value)?;
                    }
                }
            }
        }
    }

    Ok(workbook.save_to_buffer()?)
}

/// `apt_11680_202401.csv` for one request, ranges and counts otherwise.
pub fn export_file_name(plan: &CollectionPlan, format: ExportFormat) -> String {
    let districts = match plan.districts() {
        [only] => only.code.clone(),
        many => format!("{}districts", many.len()),
    };
    let first = plan.periods().iter().min();
    let last = plan.periods().iter().max();
    let periods = match (first, last) {
        (Some(first), Some(last)) if first == last => first.to_string(),
        (Some(first), Some(last)) => format!("{first}-{last}"),
        _ => String::new(),
    };
    format!("apt_{districts}_{periods}.{0}", format.extension())
}
