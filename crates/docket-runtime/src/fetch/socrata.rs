//! Socrata (SODA) client for the Cook County court datasets.

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use std::time::Duration;
use tracing::{debug, warn};

use docket_core::{Dataset, RawRecord};

use super::{DispositionSource, FetchError, RecordSource};
use crate::config::{RetryConfig, SocrataConfig};
use crate::secrets::{ApiCredential, SOCRATA_APP_TOKEN_ENV};

pub struct SocrataClient {
    client: reqwest::Client,
    config: SocrataConfig,
    app_token: Option<ApiCredential>,
}

impl std::fmt::Debug for SocrataClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocrataClient")
            .field("base_url", &self.config.base_url)
            .field("app_token", &self.app_token)
            .finish()
    }
}

impl SocrataClient {
    /// The app token comes from `socrata.app_token`, else `SOCRATA_APP_TOKEN`.
    pub fn new(config: SocrataConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| FetchError::NotConfigured(e.to_string()))?;

        let app_token = ApiCredential::from_config_or_env(
            config.app_token.as_deref(),
            SOCRATA_APP_TOKEN_ENV,
            "Socrata app token",
        )
        .ok();

        Ok(Self {
            client,
            config,
            app_token,
        })
    }

    fn resource_url(&self, dataset: Dataset) -> String {
        format!(
            "{}/{}.json",
            self.config.base_url.trim_end_matches('/'),
            self.config.datasets.id(dataset)
        )
    }

    async fn get_rows(
        &self,
        url: &str,
        params: &[(String, String)],
        timeout: Duration,
    ) -> Result<Vec<RawRecord>, FetchError> {
        let mut request = self.client.get(url).query(params).timeout(timeout);
        if let Some(token) = &self.app_token {
            request = request.header("X-App-Token", token.expose());
        }

        let resp = request.send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(timeout)
            } else {
                FetchError::Http(e.to_string())
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        resp.json::<Vec<RawRecord>>()
            .await
            .map_err(|e| FetchError::Parse(e.to_string()))
    }

    /// `get_rows` under exponential backoff for retryable failures.
    async fn get_rows_with_retry(
        &self,
        url: &str,
        params: Vec<(String, String)>,
        timeout: Duration,
    ) -> Result<Vec<RawRecord>, FetchError> {
        let backoff = backoff(&self.config.retry);
        let params = &params;

        (move || async move { self.get_rows(url, params, timeout).await })
            .retry(backoff)
            .when(|e: &FetchError| e.is_retryable())
            .notify(|e: &FetchError, after: Duration| {
                warn!(url, error = %e, retry_in = ?after, "socrata request failed, retrying");
            })
            .await
    }
}

fn backoff(retry: &RetryConfig) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(retry.min_backoff)
        .with_max_delay(retry.max_backoff)
        .with_factor(2.0)
        .with_max_times(retry.max_retries)
}

#[async_trait]
impl RecordSource for SocrataClient {
    async fn find_first(
        &self,
        dataset: Dataset,
        field: &str,
        value: &str,
    ) -> Result<Option<RawRecord>, FetchError> {
        let url = self.resource_url(dataset);
        debug!(dataset = %dataset, field, "socrata lookup");

        let params = vec![
            (field.to_string(), value.to_string()),
            ("$limit".to_string(), "1".to_string()),
        ];
        let rows = self
            .get_rows_with_retry(&url, params, self.config.timeout)
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn latest(
        &self,
        dataset: Dataset,
        order_field: &str,
        limit: usize,
    ) -> Result<Vec<RawRecord>, FetchError> {
        let url = self.resource_url(dataset);
        debug!(dataset = %dataset, order_field, limit, "socrata latest rows");

        let params = vec![
            ("$order".to_string(), format!("{} DESC", order_field)),
            ("$limit".to_string(), limit.to_string()),
        ];
        self.get_rows_with_retry(&url, params, self.config.timeout)
            .await
    }
}

#[async_trait]
impl DispositionSource for SocrataClient {
    async fn fetch_page(
        &self,
        where_clause: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<RawRecord>, FetchError> {
        let url = self.resource_url(Dataset::Disposition);
        let mut params = vec![
            ("$limit".to_string(), limit.to_string()),
            ("$offset".to_string(), offset.to_string()),
        ];
        if !where_clause.is_empty() {
            params.push(("$where".to_string(), where_clause.to_string()));
        }

        debug!(offset, limit, "socrata disposition page");
        self.get_rows_with_retry(&url, params, self.config.disposition_timeout)
            .await
    }
}
