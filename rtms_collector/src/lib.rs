//! Apartment trade collector for the MOLIT real-transaction (RTMS) open API.
//!
//! A legal-dong code dataset is reduced to a (province, district) → `LAWD_CD`
//! table, the selected districts are queried month by month, and every
//! returned `item` is flattened into one table for CSV or XLSX export.
//!
//! ```rust,ignore
//! use rtms_collector::{Collector, CollectionPlan, Config, HttpSource, RegionTable};
//!
//! let config = Config::discover(None)?;
//! let regions = RegionTable::load_or_empty(&config.dataset);
//! let districts = regions.resolve(&selection)?;
//! let plan = CollectionPlan::new(districts, rtms_collector::period::default_window())?;
//! let collector = Collector::new(HttpSource::new(&config.api)?, config.api.mode)
//!     .with_delay(config.api.delay());
//! let collection = collector.collect(&service_key, &plan).await?;
//! ```

pub mod api;
pub mod collector;
pub mod config;
pub mod error;
pub mod logging;
pub mod period;
pub mod region;
pub mod response;
pub mod row;
pub mod table;

pub use api::{HttpSource, TransactionSource};
pub use collector::{
    Collection, CollectionPlan, CollectionRequest, Collector, Outcome, RequestReport,
};
pub use config::Config;
pub use error::{
    CollectError, ConfigError, ExportError, PeriodError, RegionError, ResponseError,
    TransportError,
};
pub use period::YearMonth;
pub use region::{District, DistrictNaming, RegionSelection, RegionTable};
pub use response::ResponseMode;
pub use row::{FieldValue, PostProcess, TransactionRow};
pub use table::ExportFormat;
