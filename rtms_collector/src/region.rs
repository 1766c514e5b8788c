//! Legal-dong code dataset → (province, district) → `LAWD_CD` table.
//!
//! The dataset is the Ministry of the Interior "법정동코드 전체자료" export: one
//! row per legal dong with its 10-digit code, full name and whether it still
//! exists. Only the first five digits of the code address the transaction API.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::str::FromStr;

use encoding_rs::{Encoding, UTF_8};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::DatasetConfig;
use crate::error::RegionError;

const CODE_LEN: usize = 5;

/// How the district is cut out of a full administrative name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DistrictNaming {
    /// "경기도 성남시 분당구 정자동" → "성남시"
    #[default]
    FirstToken,
    /// "경기도 성남시 분당구 정자동" → "성남시 분당구 정자동"
    RemainingTokens,
}

impl Display for DistrictNaming {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DistrictNaming::FirstToken => write!(f, "first-token"),
            DistrictNaming::RemainingTokens => write!(f, "remaining-tokens"),
        }
    }
}

impl FromStr for DistrictNaming {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first-token" => Ok(DistrictNaming::FirstToken),
            "remaining-tokens" => Ok(DistrictNaming::RemainingTokens),
            other => Err(format!("unknown district naming {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionStatus {
    Active,
    Abolished,
}

/// One raw dataset row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionRecord {
    pub full_name: String,
    pub raw_code: String,
    pub status: RegionStatus,
}

impl RegionRecord {
    pub fn new(full_name: impl Into<String>, raw_code: impl Into<String>, status: RegionStatus) -> Self {
        RegionRecord {
            full_name: full_name.into(),
            raw_code: raw_code.into(),
            status,
        }
    }

    /// `(province, district)`, or `None` for a province-only name.
    pub fn split_name(&self, naming: DistrictNaming) -> Option<(String, String)> {
        let mut tokens = self.full_name.split_whitespace();
        let province = tokens.next()?;
        let district = match naming {
            DistrictNaming::FirstToken => tokens.next()?.to_string(),
            DistrictNaming::RemainingTokens => {
                let rest: Vec<&str> = tokens.collect();
                if rest.is_empty() {
                    return None;
                }
                rest.join(" ")
            }
        };
        Some((province.to_string(), district))
    }

    pub fn district_code(&self) -> Option<String> {
        let code: String = self.raw_code.trim().chars().take(CODE_LEN).collect();
        (code.len() == CODE_LEN && code.bytes().all(|b| b.is_ascii_digit())).then_some(code)
    }
}

/// A district the API can be queried for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct District {
    pub province: String,
    pub district: String,
    pub code: String,
}

impl Display for District {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.province.is_empty() && self.district.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} {} ({})", self.province, self.district, self.code)
        }
    }
}

/// Deduplicated (province, district) → code mapping in dataset order.
#[derive(Debug, Clone, Default)]
pub struct RegionTable {
    entries: Vec<District>,
    index: HashMap<(String, String), usize>,
}

impl RegionTable {
    /// Keeps active rows with a district part and a usable code. The first
    /// row seen for a (province, district) pair wins.
    pub fn from_records(
        records: impl IntoIterator<Item = RegionRecord>,
        naming: DistrictNaming,
    ) -> Self {
        let mut table = RegionTable::default();
        for record in records {
            if record.status != RegionStatus::Active {
                continue;
            }
            let Some((province, district)) = record.split_name(naming) else {
                continue;
            };
            let Some(code) = record.district_code() else {
                continue;
            };
            let key = (province, district);
            if table.index.contains_key(&key) {
                continue;
            }
            table.index.insert(key.clone(), table.entries.len());
            table.entries.push(District {
                province: key.0,
                district: key.1,
                code,
            });
        }
        table
    }

    pub fn load(config: &DatasetConfig) -> Result<Self, RegionError> {
        load_region_table(&config.path, config)
    }

    /// Like [`RegionTable::load`] but an unusable dataset becomes an empty
    /// table.
    pub fn load_or_empty(config: &DatasetConfig) -> Self {
        match Self::load(config) {
            Ok(table) => table,
            Err(e) => {
                warn!("no regions available: {e}");
                RegionTable::default()
            }
        }
    }

    pub fn entries(&self) -> &[District] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn provinces(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .map(|d| d.province.as_str())
            .filter(|p| seen.insert(*p))
            .collect()
    }

    pub fn districts<'a>(&'a self, province: &'a str) -> impl Iterator<Item = &'a District> + 'a {
        self.entries.iter().filter(move |d| d.province == province)
    }

    pub fn lookup_code(&self, province: &str, district: &str) -> Option<&str> {
        self.index
            .get(&(province.to_string(), district.to_string()))
            .map(|&i| self.entries[i].code.as_str())
    }

    fn by_code(&self, code: &str) -> Option<&District> {
        self.entries.iter().find(|d| d.code == code)
    }

    /// Turns a user selection into districts to query, ordered as selected and
    /// unique by code.
    pub fn resolve(&self, selection: &RegionSelection) -> Result<Vec<District>, RegionError> {
        if self.is_empty() && !(selection.provinces.is_empty() && selection.districts.is_empty()) {
            return Err(RegionError::NoRegionsAvailable);
        }
        for province in &selection.provinces {
            if self.districts(province).next().is_none() {
                return Err(RegionError::UnknownProvince(province.clone()));
            }
        }

        let mut picked: Vec<District> = Vec::new();
        let search: Vec<&str> = if selection.provinces.is_empty() {
            self.provinces()
        } else {
            selection.provinces.iter().map(String::as_str).collect()
        };

        if selection.all_districts || (selection.districts.is_empty() && selection.codes.is_empty())
        {
            for province in selection.provinces.iter() {
                picked.extend(self.districts(province).cloned());
            }
        }

        for name in &selection.districts {
            let found: Vec<&District> = search
                .iter()
                .filter_map(|province| self.index.get(&(province.to_string(), name.clone())))
                .map(|&i| &self.entries[i])
                .collect();
            if found.is_empty() {
                return Err(RegionError::UnknownDistrict {
                    province: selection.provinces.join(","),
                    district: name.clone(),
                });
            }
            picked.extend(found.into_iter().cloned());
        }

        for code in &selection.codes {
            let code = code.trim();
            if code.len() != CODE_LEN || !code.bytes().all(|b| b.is_ascii_digit()) {
                return Err(RegionError::InvalidCode(code.to_string()));
            }
            picked.push(self.by_code(code).cloned().unwrap_or_else(|| District {
                province: String::new(),
                district: String::new(),
                code: code.to_string(),
            }));
        }

        let mut seen = HashSet::new();
        picked.retain(|d| seen.insert(d.code.clone()));
        Ok(picked)
    }
}

/// What the user picked, before it is checked against a [`RegionTable`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionSelection {
    pub provinces: Vec<String>,
    pub districts: Vec<String>,
    /// Every district of `provinces`.
    pub all_districts: bool,
    /// Raw `LAWD_CD` values, used as-is.
    pub codes: Vec<String>,
}

pub fn load_region_table(
    path: impl AsRef<Path>,
    config: &DatasetConfig,
) -> Result<RegionTable, RegionError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| RegionError::DatasetUnreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let records = read_records(path, &bytes, config)?;
    let table = RegionTable::from_records(records, config.district_naming);
    info!(
        path = %path.display(),
        districts = table.len(),
        "loaded region table"
    );
    Ok(table)
}

fn read_records(
    path: &Path,
    bytes: &[u8],
    config: &DatasetConfig,
) -> Result<Vec<RegionRecord>, RegionError> {
    let mut missing = None;
    for label in &config.encodings {
        let Some(encoding) = Encoding::for_label(label.as_bytes()) else {
            warn!("unknown encoding label {label:?}, skipping");
            continue;
        };
        let Some(text) = decode_strict(bytes, encoding) else {
            debug!("{} does not decode as {}", path.display(), encoding.name());
            continue;
        };
        match parse_records(&text, config) {
            Ok(records) => {
                debug!("decoded {} as {}", path.display(), encoding.name());
                return Ok(records);
            }
            Err(e @ RegionError::MissingColumns(_)) => missing = Some(e),
            Err(e) => debug!("{} as {}: {e}", path.display(), encoding.name()),
        }
    }
    Err(missing.unwrap_or_else(|| RegionError::DatasetUnreadable {
        path: path.to_path_buf(),
        reason: format!("no usable encoding among {:?}", config.encodings),
    }))
}

fn decode_strict<'a>(bytes: &'a [u8], encoding: &'static Encoding) -> Option<Cow<'a, str>> {
    let bytes = if encoding == UTF_8 {
        bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes)
    } else {
        bytes
    };
    encoding.decode_without_bom_handling_and_without_replacement(bytes)
}

fn parse_records(text: &str, config: &DatasetConfig) -> Result<Vec<RegionRecord>, RegionError> {
    let unreadable = |e: PolarsError| RegionError::DatasetUnreadable {
        path: config.path.clone(),
        reason: e.to_string(),
    };

    // The official export is tab separated, re-saved copies are usually CSV.
    let separator = match text.lines().next() {
        Some(header) if header.contains('\t') => b'\t',
        _ => b',',
    };
    let mut cursor = Cursor::new(text.as_bytes());
    let opts = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .map_parse_options(|o| o.with_separator(separator).with_truncate_ragged_lines(true));
    let df = opts
        .into_reader_with_file_handle(&mut cursor)
        .finish()
        .map_err(unreadable)?;

    let required = [
        &config.code_column,
        &config.name_column,
        &config.status_column,
    ];
    let missing: Vec<String> = required
        .iter()
        .filter(|name| df.column(name.as_str()).is_err())
        .map(|name| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(RegionError::MissingColumns(missing));
    }

    let codes = df.column(&config.code_column).and_then(|c| c.str()).map_err(unreadable)?;
    let names = df.column(&config.name_column).and_then(|c| c.str()).map_err(unreadable)?;
    let statuses = df
        .column(&config.status_column)
        .and_then(|c| c.str())
        .map_err(unreadable)?;

    let records = codes
        .into_iter()
        .zip(names)
        .zip(statuses)
        .filter_map(|((code, name), status)| {
            let status = if status?.trim() == config.active_value {
                RegionStatus::Active
            } else {
                RegionStatus::Abolished
            };
            Some(RegionRecord::new(name?.trim(), code?.trim(), status))
        })
        .collect();
    Ok(records)
}
