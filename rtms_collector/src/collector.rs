use std::collections::HashSet;
use std::fmt::Display;
use std::time::Duration;

use serde::Serialize;
use tokio_utils::RateLimiter;
use tracing::{debug, info, warn};

use crate::api::TransactionSource;
use crate::error::{CollectError, TransportError};
use crate::period::YearMonth;
use crate::region::District;
use crate::response::{parse_document, ResponseMode, Verdict};
use crate::row::TransactionRow;

// The rate limiter cannot tick on a zero interval.
const MIN_DELAY: Duration = Duration::from_millis(1);

/// One remote call: a district in a month.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CollectionRequest {
    pub district_code: String,
    pub period: YearMonth,
}

impl CollectionRequest {
    pub fn new(district_code: impl Into<String>, period: YearMonth) -> Self {
        CollectionRequest {
            district_code: district_code.into(),
            period,
        }
    }
}

impl Display for CollectionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{0}/{1}", self.district_code, self.period)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success { rows: usize },
    Empty,
    ApiError { code: String, message: String },
    TransportError { detail: String },
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::ApiError { .. } | Outcome::TransportError { .. })
    }
}

impl Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success { rows } => write!(f, "{rows} rows"),
            Outcome::Empty => write!(f, "no transactions"),
            Outcome::ApiError { code, message } => write!(f, "API error {code}: {message}"),
            Outcome::TransportError { detail } => write!(f, "transport error: {detail}"),
        }
    }
}

impl From<TransportError> for Outcome {
    fn from(e: TransportError) -> Self {
        Outcome::TransportError { detail: e.0 }
    }
}

/// The selection handed from whoever gathered it to the collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionPlan {
    districts: Vec<District>,
    periods: Vec<YearMonth>,
}

impl CollectionPlan {
    /// Drops repeated district codes and months, keeping the first.
    pub fn new(districts: Vec<District>, periods: Vec<YearMonth>) -> Result<Self, CollectError> {
        let mut seen_codes = HashSet::new();
        let districts: Vec<District> = districts
            .into_iter()
            .filter(|d| seen_codes.insert(d.code.clone()))
            .collect();
        let mut seen_periods = HashSet::new();
        let periods: Vec<YearMonth> = periods
            .into_iter()
            .filter(|p| seen_periods.insert(*p))
            .collect();
        if districts.is_empty() {
            return Err(CollectError::NoRegionsSelected);
        }
        if periods.is_empty() {
            return Err(CollectError::NoPeriodsSelected);
        }
        Ok(CollectionPlan { districts, periods })
    }

    pub fn districts(&self) -> &[District] {
        &self.districts
    }

    pub fn periods(&self) -> &[YearMonth] {
        &self.periods
    }

    /// Periods outer, districts inner.
    pub fn requests(&self) -> Vec<CollectionRequest> {
        self.periods
            .iter()
            .flat_map(|period| {
                self.districts
                    .iter()
                    .map(move |d| CollectionRequest::new(d.code.clone(), *period))
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestReport {
    pub request: CollectionRequest,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Collection {
    pub rows: Vec<TransactionRow>,
    pub reports: Vec<RequestReport>,
}

impl Collection {
    pub fn outcome(&self, request: &CollectionRequest) -> Option<&Outcome> {
        self.reports
            .iter()
            .find(|r| &r.request == request)
            .map(|r| &r.outcome)
    }

    pub fn failures(&self) -> impl Iterator<Item = &RequestReport> {
        self.reports.iter().filter(|r| r.outcome.is_failure())
    }

    pub fn succeeded(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Success { .. }))
            .count()
    }
}

pub struct Collector<S> {
    source: S,
    mode: ResponseMode,
    delay: Duration,
}

impl<S: TransactionSource> Collector<S> {
    pub fn new(source: S, mode: ResponseMode) -> Self {
        Collector {
            source,
            mode,
            delay: Duration::from_millis(200),
        }
    }

    /// Pause between consecutive requests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub async fn collect(
        &self,
        service_key: &str,
        plan: &CollectionPlan,
    ) -> Result<Collection, CollectError> {
        self.collect_requests(service_key, &plan.requests()).await
    }

    /// Runs every distinct request in the given order. Per-request failures
    /// end up in the reports; only a missing key fails the whole call.
    pub async fn collect_requests(
        &self,
        service_key: &str,
        requests: &[CollectionRequest],
    ) -> Result<Collection, CollectError> {
        if service_key.trim().is_empty() {
            return Err(CollectError::MissingCredential);
        }

        let mut seen = HashSet::new();
        let requests: Vec<&CollectionRequest> =
            requests.iter().filter(|r| seen.insert(*r)).collect();
        let num_requests = requests.len();

        let rate_limiter = RateLimiter::new(self.delay.max(MIN_DELAY));
        let mut collection = Collection::default();
        for (i, request) in requests.into_iter().enumerate() {
            let (rows, outcome) = rate_limiter
                .throttle(|| self.run_one(service_key, request))
                .await;
            match &outcome {
                Outcome::Success { rows: n } => {
                    info!("[{0}/{num_requests}] {request}: {n} rows", i + 1)
                }
                Outcome::Empty => info!("[{0}/{num_requests}] {request}: empty", i + 1),
                failure => warn!("[{0}/{num_requests}] {request}: {failure}", i + 1),
            }
            collection.rows.extend(rows);
            collection.reports.push(RequestReport {
                request: request.clone(),
                outcome,
            });
        }

        info!(
            requests = num_requests,
            succeeded = collection.succeeded(),
            failed = collection.failures().count(),
            rows = collection.rows.len(),
            "collection finished"
        );
        Ok(collection)
    }

    /// Fetches pages until `totalCount` rows are in hand or a page comes back
    /// empty. A failing page fails the whole request.
    async fn run_one(
        &self,
        service_key: &str,
        request: &CollectionRequest,
    ) -> (Vec<TransactionRow>, Outcome) {
        let mut rows = Vec::new();
        for page_no in 1u32.. {
            if page_no > 1 {
                tokio::time::sleep(self.delay).await;
            }
            let (items, total_count) = match self.fetch_page(service_key, request, page_no).await
            {
                Ok(Verdict::Rows { items, total_count }) => (items, total_count),
                Ok(Verdict::ApiError { code, message }) => {
                    return (Vec::new(), Outcome::ApiError { code, message })
                }
                Err(e) => return (Vec::new(), e.into()),
            };
            let page_len = items.len();
            rows.extend(items);
            match total_count {
                Some(total) if page_len > 0 && (rows.len() as u64) < total => {
                    debug!("{request}: {0} of {total} rows after page {page_no}", rows.len());
                }
                Some(total) if (rows.len() as u64) < total => {
                    warn!("{request}: {total} transactions reported but only {0} served", rows.len());
                    break;
                }
                _ => break,
            }
        }
        if rows.is_empty() {
            return (rows, Outcome::Empty);
        }
        let n = rows.len();
        (rows, Outcome::Success { rows: n })
    }

    async fn fetch_page(
        &self,
        service_key: &str,
        request: &CollectionRequest,
        page_no: u32,
    ) -> Result<Verdict, TransportError> {
        let body = self.source.fetch(service_key, request, page_no).await?;
        Ok(parse_document(&body).and_then(|doc| doc.verdict(self.mode))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn page(code: &str, apartments: &[&str], total: usize) -> String {
        let items: String = apartments
            .iter()
            .map(|apt| format!("<item><aptNm>{apt}</aptNm><dealAmount>10,000</dealAmount></item>"))
            .collect();
        format!(
            "<response><header><resultCode>{code}</resultCode><resultMsg>msg {code}</resultMsg></header>\
             <body><items>{items}</items><totalCount>{total}</totalCount></body></response>"
        )
    }

    fn body(code: &str, apartments: &[&str]) -> String {
        page(code, apartments, apartments.len())
    }

    #[derive(Default)]
    struct StubSource {
        bodies: HashMap<(CollectionRequest, u32), Result<String, TransportError>>,
        calls: Mutex<Vec<(CollectionRequest, u32)>>,
    }

    impl StubSource {
        fn with(self, request: CollectionRequest, body: Result<String, TransportError>) -> Self {
            self.with_page(request, 1, body)
        }

        fn with_page(
            mut self,
            request: CollectionRequest,
            page_no: u32,
            body: Result<String, TransportError>,
        ) -> Self {
            self.bodies.insert((request, page_no), body);
            self
        }

        fn calls(&self) -> Vec<CollectionRequest> {
            self.paged_calls().into_iter().map(|(r, _)| r).collect()
        }

        fn paged_calls(&self) -> Vec<(CollectionRequest, u32)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TransactionSource for StubSource {
        async fn fetch(
            &self,
            _service_key: &str,
            request: &CollectionRequest,
            page_no: u32,
        ) -> Result<String, TransportError> {
            self.calls.lock().unwrap().push((request.clone(), page_no));
            self.bodies
                .get(&(request.clone(), page_no))
                .cloned()
                .unwrap_or_else(|| Err(TransportError("connection refused".to_string())))
        }
    }

    fn ym(s: &str) -> YearMonth {
        s.parse().unwrap()
    }

    fn req(code: &str, period: &str) -> CollectionRequest {
        CollectionRequest::new(code, ym(period))
    }

    fn district(code: &str) -> District {
        District {
            province: "서울특별시".to_string(),
            district: format!("d{code}"),
            code: code.to_string(),
        }
    }

    fn collector(source: StubSource) -> Collector<StubSource> {
        Collector::new(source, ResponseMode::Current).with_delay(Duration::ZERO)
    }

    #[test]
    fn plan_enumerates_periods_outer_districts_inner() {
        let plan = CollectionPlan::new(
            vec![district("11110"), district("11680"), district("11110")],
            vec![ym("202401"), ym("202402"), ym("202401")],
        )
        .unwrap();
        assert_eq!(
            plan.requests(),
            [
                req("11110", "202401"),
                req("11680", "202401"),
                req("11110", "202402"),
                req("11680", "202402"),
            ]
        );
    }

    #[test]
    fn plan_needs_regions_and_periods() {
        assert!(matches!(
            CollectionPlan::new(vec![], vec![ym("202401")]),
            Err(CollectError::NoRegionsSelected)
        ));
        assert!(matches!(
            CollectionPlan::new(vec![district("11110")], vec![]),
            Err(CollectError::NoPeriodsSelected)
        ));
    }

    #[tokio::test]
    async fn success_and_api_error() {
        let ok = req("11110", "202401");
        let limited = req("11680", "202401");
        let source = StubSource::default()
            .with(ok.clone(), Ok(body("00", &["래미안", "자이"])))
            .with(limited.clone(), Ok(body("99", &[])));
        let collection = collector(source)
            .collect_requests("key", &[ok.clone(), limited.clone()])
            .await
            .unwrap();

        assert_eq!(collection.rows.len(), 2);
        assert_eq!(collection.outcome(&ok), Some(&Outcome::Success { rows: 2 }));
        assert_eq!(
            collection.outcome(&limited),
            Some(&Outcome::ApiError {
                code: "99".to_string(),
                message: "msg 99".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn transport_failure_is_isolated() {
        let first = req("11110", "202401");
        let second = req("11140", "202401");
        let third = req("11680", "202401");
        let source = StubSource::default()
            .with(first.clone(), Ok(body("000", &["a"])))
            .with(
                second.clone(),
                Err(TransportError("timed out".to_string())),
            )
            .with(third.clone(), Ok(body("000", &["b", "c"])));
        let collector = collector(source);
        let collection = collector
            .collect_requests("key", &[first.clone(), second.clone(), third.clone()])
            .await
            .unwrap();

        assert_eq!(collector.source().calls(), [first.clone(), second.clone(), third.clone()]);
        assert_eq!(collection.reports.len(), 3);
        assert_eq!(collection.rows.len(), 3);
        assert_eq!(
            collection.outcome(&second),
            Some(&Outcome::TransportError {
                detail: "timed out".to_string()
            })
        );
        assert_eq!(collection.failures().count(), 1);
        assert_eq!(collection.succeeded(), 2);
    }

    #[tokio::test]
    async fn row_count_is_the_sum_of_successes() {
        let plan = CollectionPlan::new(
            vec![district("11110"), district("11680")],
            vec![ym("202312"), ym("202401")],
        )
        .unwrap();
        let source = StubSource::default()
            .with(req("11110", "202312"), Ok(body("00", &["a", "b"])))
            .with(req("11680", "202312"), Ok(body("00", &[])))
            .with(req("11110", "202401"), Ok("<html>gateway".to_string()))
            .with(req("11680", "202401"), Ok(body("00", &["c"])));
        let collection = collector(source).collect("key", &plan).await.unwrap();

        assert_eq!(collection.reports.len(), plan.requests().len());
        let expected: usize = collection
            .reports
            .iter()
            .map(|r| match r.outcome {
                Outcome::Success { rows } => rows,
                _ => 0,
            })
            .sum();
        assert_eq!(collection.rows.len(), expected);
        assert_eq!(expected, 3);
        assert_eq!(
            collection.outcome(&req("11680", "202312")),
            Some(&Outcome::Empty)
        );
        assert!(matches!(
            collection.outcome(&req("11110", "202401")),
            Some(Outcome::TransportError { .. })
        ));
    }

    #[tokio::test]
    async fn rows_keep_enumeration_order_and_repeat_identically() {
        let plan = CollectionPlan::new(
            vec![district("11110"), district("11680")],
            vec![ym("202401"), ym("202402")],
        )
        .unwrap();
        let source = StubSource::default()
            .with(req("11110", "202401"), Ok(body("00", &["a1"])))
            .with(req("11680", "202401"), Ok(body("00", &["b1"])))
            .with(req("11110", "202402"), Ok(body("00", &["a2"])))
            .with(req("11680", "202402"), Ok(body("00", &["b2"])));
        let collector = collector(source);
        let first = collector.collect("key", &plan).await.unwrap();
        let second = collector.collect("key", &plan).await.unwrap();

        let names: Vec<String> = first
            .rows
            .iter()
            .filter_map(|r| r.get("aptNm").flatten().map(ToString::to_string))
            .collect();
        assert_eq!(names, ["a1", "b1", "a2", "b2"]);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn missing_key_issues_no_request() {
        let collector = collector(StubSource::default());
        let result = collector
            .collect_requests("  ", &[req("11110", "202401")])
            .await;
        assert!(matches!(result, Err(CollectError::MissingCredential)));
        assert!(collector.source().calls().is_empty());
    }

    #[tokio::test]
    async fn duplicate_requests_run_once() {
        let r = req("11110", "202401");
        let source = StubSource::default().with(r.clone(), Ok(body("00", &["a"])));
        let collector = collector(source);
        let collection = collector
            .collect_requests("key", &[r.clone(), r.clone()])
            .await
            .unwrap();
        assert_eq!(collection.reports.len(), 1);
        assert_eq!(collector.source().calls().len(), 1);
    }

    #[tokio::test]
    async fn follows_pages_up_to_total_count() {
        let r = req("11680", "202401");
        let source = StubSource::default()
            .with_page(r.clone(), 1, Ok(page("00", &["a", "b"], 5)))
            .with_page(r.clone(), 2, Ok(page("00", &["c", "d"], 5)))
            .with_page(r.clone(), 3, Ok(page("00", &["e"], 5)));
        let collector = collector(source);
        let collection = collector.collect_requests("key", &[r.clone()]).await.unwrap();

        assert_eq!(collection.outcome(&r), Some(&Outcome::Success { rows: 5 }));
        assert_eq!(collection.rows.len(), 5);
        let pages: Vec<u32> = collector.source().paged_calls().iter().map(|(_, p)| *p).collect();
        assert_eq!(pages, [1, 2, 3]);
    }

    #[tokio::test]
    async fn short_served_total_stops_at_the_empty_page() {
        let r = req("11680", "202401");
        let source = StubSource::default()
            .with_page(r.clone(), 1, Ok(page("00", &["a"], 3)))
            .with_page(r.clone(), 2, Ok(page("00", &[], 3)));
        let collector = collector(source);
        let collection = collector.collect_requests("key", &[r.clone()]).await.unwrap();
        assert_eq!(collection.outcome(&r), Some(&Outcome::Success { rows: 1 }));
        assert_eq!(collector.source().paged_calls().len(), 2);
    }

    #[tokio::test]
    async fn failing_later_page_fails_the_request() {
        let r = req("11680", "202401");
        let other = req("11110", "202401");
        let source = StubSource::default()
            .with_page(r.clone(), 1, Ok(page("00", &["a"], 2)))
            .with_page(r.clone(), 2, Err(TransportError("timed out".to_string())))
            .with(other.clone(), Ok(body("00", &["b"])));
        let collection = collector(source)
            .collect_requests("key", &[r.clone(), other.clone()])
            .await
            .unwrap();
        assert!(matches!(
            collection.outcome(&r),
            Some(Outcome::TransportError { .. })
        ));
        assert_eq!(collection.rows.len(), 1);
        assert_eq!(collection.succeeded(), 1);
    }

    #[tokio::test]
    async fn legacy_mode_reads_items_without_header() {
        let r = req("11110", "201512");
        let legacy = "<response><body><items><item><거래금액>  82,500</거래금액></item>\
                      </items></body></response>";
        let source = StubSource::default().with(r.clone(), Ok(legacy.to_string()));
        let collection = Collector::new(source, ResponseMode::Legacy)
            .with_delay(Duration::ZERO)
            .collect_requests("key", &[r.clone()])
            .await
            .unwrap();
        assert_eq!(collection.outcome(&r), Some(&Outcome::Success { rows: 1 }));
    }
}
