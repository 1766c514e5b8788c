use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegionError {
    #[error("region dataset {} is unreadable: {reason}", path.display())]
    DatasetUnreadable { path: PathBuf, reason: String },

    #[error("region dataset is missing column(s): {0:?}")]
    MissingColumns(Vec<String>),

    #[error("no regions available: the region dataset could not be loaded")]
    NoRegionsAvailable,

    #[error("unknown district: {province} {district}")]
    UnknownDistrict { province: String, district: String },

    #[error("unknown province: {0}")]
    UnknownProvince(String),

    #[error("invalid district code {0:?}: expected 5 digits")]
    InvalidCode(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PeriodError {
    #[error("invalid year-month {0:?}: expected YYYYMM")]
    Invalid(String),

    #[error("period range is inverted: {from} > {to}")]
    Inverted { from: String, to: String },
}

#[derive(Error, Debug)]
pub enum CollectError {
    #[error("no service key supplied")]
    MissingCredential,

    #[error("no region selected")]
    NoRegionsSelected,

    #[error("no period selected")]
    NoPeriodsSelected,

    #[error(transparent)]
    Region(#[from] RegionError),

    #[error(transparent)]
    Period(#[from] PeriodError),

    #[error("http client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("unknown export format {0:?}")]
    UnknownFormat(String),

    #[error(transparent)]
    Polars(#[from] polars::error::PolarsError),

    #[error(transparent)]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ResponseError {
    #[error("malformed response body: {0}")]
    Malformed(String),

    #[error("response carries no result header")]
    MissingHeader,
}

/// Anything between sending a request and holding its body: connection,
/// timeout, HTTP status, unparsable document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError(format!("timed out: {e}"))
        } else if let Some(status) = e.status() {
            TransportError(format!("HTTP {status}"))
        } else {
            TransportError(e.to_string())
        }
    }
}

impl From<ResponseError> for TransportError {
    fn from(e: ResponseError) -> Self {
        TransportError(e.to_string())
    }
}
