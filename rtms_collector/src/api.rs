use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::collector::CollectionRequest;
use crate::config::ApiConfig;
use crate::error::TransportError;

/// Where response bodies come from. The collector only sees this.
#[async_trait]
pub trait TransactionSource: Send + Sync {
    /// One result page of `request`; pages count from 1.
    async fn fetch(
        &self,
        service_key: &str,
        request: &CollectionRequest,
        page_no: u32,
    ) -> Result<String, TransportError>;
}

/// GETs the configured endpoint, `page_size` items per page.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    endpoint: String,
    page_size: u32,
}

impl HttpSource {
    pub fn new(config: &ApiConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(HttpSource {
            client,
            endpoint: config.endpoint.clone(),
            page_size: config.page_size,
        })
    }
}

#[async_trait]
impl TransactionSource for HttpSource {
    async fn fetch(
        &self,
        service_key: &str,
        request: &CollectionRequest,
        page_no: u32,
    ) -> Result<String, TransportError> {
        debug!("GET {0} {request} page {page_no}", self.endpoint);
        let body = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("serviceKey", service_key.to_string()),
                ("LAWD_CD", request.district_code.clone()),
                ("DEAL_YMD", request.period.to_string()),
                ("numOfRows", self.page_size.to_string()),
                ("pageNo", page_no.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(body)
    }
}
