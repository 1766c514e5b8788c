use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use rtms_collector::period::default_window;
use rtms_collector::table::{export, export_file_name, rows_to_frame};
use rtms_collector::{
    CollectError, CollectionPlan, Collector, Config, District, ExportError, ExportFormat,
    HttpSource, PostProcess, RegionError, RegionSelection, RegionTable, YearMonth,
};

const FAILED_REQUESTS: HeaderName = HeaderName::from_static("x-failed-requests");

#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    regions: Arc<RegionTable>,
    source: HttpSource,
    service_key: Option<String>,
}

impl AppState {
    pub fn new(
        config: Config,
        regions: RegionTable,
        service_key: Option<String>,
    ) -> Result<Self, CollectError> {
        let source = HttpSource::new(&config.api)?;
        Ok(AppState {
            config: Arc::new(config),
            regions: Arc::new(regions),
            source,
            service_key: service_key.filter(|k| !k.trim().is_empty()),
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/regions", get(regions))
        .route("/collect", post(collect))
        .with_state(state)
}

async fn root() -> &'static str {
    "RTMS apartment trade collector"
}

#[derive(Serialize)]
struct ProvinceEntry<'a> {
    province: &'a str,
    districts: Vec<&'a District>,
}

async fn regions(State(state): State<AppState>) -> Response {
    let provinces: Vec<ProvinceEntry<'_>> = state
        .regions
        .provinces()
        .into_iter()
        .map(|province| ProvinceEntry {
            province,
            districts: state.regions.districts(province).collect(),
        })
        .collect();
    Json(provinces).into_response()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ReplyFormat {
    #[default]
    Json,
    Csv,
    Xlsx,
}

#[derive(Debug, Deserialize)]
struct CollectBody {
    service_key: Option<String>,
    #[serde(flatten)]
    selection: RegionSelection,
    /// Defaults to the twelve months ending now.
    months: Option<Vec<YearMonth>>,
    #[serde(default)]
    format: ReplyFormat,
    #[serde(default)]
    raw_keys: bool,
}

async fn collect(
    State(state): State<AppState>,
    Json(body): Json<CollectBody>,
) -> Result<Response, AppError> {
    let service_key = body
        .service_key
        .filter(|k| !k.trim().is_empty())
        .or_else(|| state.service_key.clone())
        .ok_or(CollectError::MissingCredential)?;
    let districts = state
        .regions
        .resolve(&body.selection)
        .map_err(CollectError::from)?;
    let periods = body.months.unwrap_or_else(default_window);
    let plan = CollectionPlan::new(districts, periods)?;
    info!(
        "collect: {0} districts x {1} months",
        plan.districts().len(),
        plan.periods().len()
    );

    let collector = Collector::new(state.source.clone(), state.config.api.mode)
        .with_delay(state.config.api.delay());
    let mut collection = collector.collect(&service_key, &plan).await?;
    let post = if body.raw_keys {
        PostProcess::RAW
    } else {
        PostProcess::default()
    };
    post.apply(&mut collection.rows);

    let format = match body.format {
        ReplyFormat::Json => return Ok(Json(collection).into_response()),
        ReplyFormat::Csv => ExportFormat::Csv,
        ReplyFormat::Xlsx => ExportFormat::Xlsx,
    };
    let mut df = rows_to_frame(&collection.rows).map_err(ExportError::from)?;
    let bytes = export(&mut df, format)?;
    let file_name = export_file_name(&plan, format);
    let failed = collection.failures().count();
    Ok((
        [
            (header::CONTENT_TYPE, format.mime_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
            (FAILED_REQUESTS, failed.to_string()),
        ],
        bytes,
    )
        .into_response())
}

#[derive(Debug)]
enum AppError {
    Collect(CollectError),
    Export(ExportError),
}

impl From<CollectError> for AppError {
    fn from(e: CollectError) -> Self {
        AppError::Collect(e)
    }
}

impl From<ExportError> for AppError {
    fn from(e: ExportError) -> Self {
        AppError::Export(e)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Collect(CollectError::Region(
                RegionError::UnknownDistrict { .. } | RegionError::UnknownProvince(_),
            )) => StatusCode::NOT_FOUND,
            AppError::Collect(CollectError::Region(RegionError::NoRegionsAvailable)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Collect(
                CollectError::MissingCredential
                | CollectError::NoRegionsSelected
                | CollectError::NoPeriodsSelected
                | CollectError::Period(_)
                | CollectError::Region(_),
            ) => StatusCode::BAD_REQUEST,
            AppError::Collect(CollectError::Client(_)) | AppError::Export(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let message = match &self {
            AppError::Collect(e) => e.to_string(),
            AppError::Export(e) => e.to_string(),
        };
        if status.is_server_error() {
            error!("{message}");
        }
        (status, Json(ErrorBody { error: message })).into_response()
    }
}
