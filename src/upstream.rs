#![doc = "HTTP implementation of the catalogue source: request shaping, retries and response indexing."]
//
//! # Upstream client
//!
//! [`HttpCatalogClient`] implements [`CatalogSource`] over the partner REST API.
//!
//! - Every request carries `exp-api-key`, the versioned `Accept` header and, for
//!   localised endpoints, `Accept-Language`.
//! - Timeouts, connection failures, interrupted response bodies and HTTP
//!   429/500/503 are retried with exponential backoff up to `max_attempts`
//!   total attempts. Any other non-success status fails immediately.
//! - List responses are keyed by each entity's natural id before they reach the
//!   engine.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use catalog_sync_core::contract::{CatalogSource, CursorPage, Documents, Since};
use catalog_sync_core::error::SourceError;
use catalog_sync_core::payload::{index_by, path, scalar_key};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::load_config::UpstreamSettings;

const API_VERSION_ACCEPT: &str = "application/json;version=2.0";
const USER_AGENT: &str = concat!("catalog-sync/", env!("CARGO_PKG_VERSION"));
const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub struct HttpCatalogClient {
    client: Client,
    base_url: String,
    max_attempts: usize,
    base_backoff: Duration,
    source_currencies: Vec<String>,
    target_currencies: Vec<String>,
}

impl HttpCatalogClient {
    pub fn new(settings: &UpstreamSettings) -> Result<Self, SourceError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&settings.api_key)
            .map_err(|e| SourceError::Transport(format!("invalid API key header: {e}")))?;
        headers.insert("exp-api-key", key);
        headers.insert(ACCEPT, HeaderValue::from_static(API_VERSION_ACCEPT));

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        info!(
            base_url = %settings.base_url,
            max_attempts = settings.max_attempts,
            timeout_secs = settings.timeout_secs,
            "Initialised upstream client"
        );
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            max_attempts: settings.max_attempts.max(1),
            base_backoff: Duration::from_millis(settings.backoff_ms),
            source_currencies: settings.source_currencies.clone(),
            target_currencies: settings.target_currencies.clone(),
        })
    }

    fn retry_policy(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.base_backoff,
            initial_interval: self.base_backoff,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: MAX_BACKOFF,
            // Attempts are bounded by `max_attempts` instead.
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }

    /// Sends one logical request, retrying transient failures, and decodes the JSON body.
    async fn send(
        &self,
        method: Method,
        endpoint: &str,
        locale: Option<&str>,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, SourceError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let url = url.as_str();
        let attempts = AtomicUsize::new(0);
        let attempts = &attempts;
        let max_attempts = self.max_attempts;

        retry(self.retry_policy(), move || {
            let method = method.clone();
            async move {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                let last_attempt = attempt >= max_attempts;
                // Transient failures stop being retried once the budget is spent.
                let transient = |err: SourceError| {
                    if last_attempt {
                        backoff::Error::permanent(err)
                    } else {
                        backoff::Error::transient(err)
                    }
                };

                let mut request = self.client.request(method.clone(), url);
                if !query.is_empty() {
                    request = request.query(query);
                }
                if let Some(locale) = locale {
                    request = request.header(ACCEPT_LANGUAGE, locale);
                }
                if let Some(body) = body {
                    request = request.json(body);
                }

                debug!(attempt, %method, %url, ?locale, "Sending upstream request");
                let response = match request.send().await {
                    Ok(response) => response,
                    Err(e) => {
                        let retryable = e.is_timeout() || e.is_connect() || e.is_request();
                        warn!(attempt, %url, error = %e, retryable, "Upstream request failed");
                        let err = SourceError::Transport(e.to_string());
                        return Err(if retryable {
                            transient(err)
                        } else {
                            backoff::Error::permanent(err)
                        });
                    }
                };

                let status = response.status();
                let text = match response.text().await {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(attempt, %url, error = %e, "Failed to read upstream response body");
                        return Err(transient(SourceError::Transport(e.to_string())));
                    }
                };

                if !status.is_success() {
                    warn!(
                        attempt,
                        %url,
                        status = status.as_u16(),
                        "Upstream returned error status"
                    );
                    let err = SourceError::Status {
                        status: status.as_u16(),
                        body: text,
                    };
                    return Err(if is_retryable_status(status) {
                        transient(err)
                    } else {
                        backoff::Error::permanent(err)
                    });
                }

                debug!(
                    %url,
                    status = status.as_u16(),
                    body_len = text.len(),
                    "Upstream response received"
                );
                serde_json::from_str::<Value>(&text)
                    .map_err(|e| backoff::Error::permanent(SourceError::Decode(e.to_string())))
            }
        })
        .await
    }

    async fn get(&self, endpoint: &str, locale: Option<&str>) -> Result<Value, SourceError> {
        self.send(Method::GET, endpoint, locale, &[], None).await
    }

    async fn post(
        &self,
        endpoint: &str,
        locale: Option<&str>,
        body: &Value,
    ) -> Result<Value, SourceError> {
        self.send(Method::POST, endpoint, locale, &[], Some(body))
            .await
    }

    async fn modified_since(
        &self,
        endpoint: &str,
        locale: Option<&str>,
        since: &Since,
        count: u32,
        list_key: &str,
        id_field: &str,
    ) -> Result<CursorPage, SourceError> {
        let mut query = vec![("count", count.to_string())];
        match since {
            Since::Timestamp(ts) => query.push(("modified-since", ts.clone())),
            Since::Cursor(cursor) => query.push(("cursor", cursor.clone())),
        }
        let response = self
            .send(Method::GET, endpoint, locale, &query, None)
            .await?;
        Ok(CursorPage {
            items: index_by(list(&response, list_key), id_field),
            next_cursor: response
                .get("nextCursor")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::SERVICE_UNAVAILABLE
    )
}

fn list<'a>(response: &'a Value, key: &str) -> &'a [Value] {
    response
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

#[async_trait]
impl CatalogSource for HttpCatalogClient {
    async fn tags(&self) -> Result<Documents, SourceError> {
        let response = self.get("/products/tags", None).await?;
        Ok(index_by(list(&response, "tags"), "tagId"))
    }

    async fn exchange_rates(&self) -> Result<Documents, SourceError> {
        let body = json!({
            "sourceCurrencies": self.source_currencies,
            "targetCurrencies": self.target_currencies,
        });
        let response = self.post("/exchange-rates", None, &body).await?;
        let mut rates = Documents::new();
        for rate in list(&response, "rates") {
            let source = path(rate, "sourceCurrency").and_then(scalar_key);
            let target = path(rate, "targetCurrency").and_then(scalar_key);
            if let (Some(source), Some(target)) = (source, target) {
                rates.insert(format!("{source}-{target}"), rate.clone());
            }
        }
        Ok(rates)
    }

    async fn destinations(&self, locale: &str) -> Result<Documents, SourceError> {
        let response = self.get("/v1/taxonomy/destinations", Some(locale)).await?;
        Ok(index_by(list(&response, "data"), "destinationId"))
    }

    async fn booking_questions(&self, locale: &str) -> Result<Documents, SourceError> {
        let response = self
            .get("/products/booking-questions", Some(locale))
            .await?;
        Ok(index_by(list(&response, "bookingQuestions"), "id"))
    }

    async fn cancel_reasons(&self, locale: &str) -> Result<Documents, SourceError> {
        let response = self.get("/bookings/cancel-reasons", Some(locale)).await?;
        Ok(index_by(list(&response, "reasons"), "cancellationReasonCode"))
    }

    async fn attractions(
        &self,
        locale: &str,
        destination_id: &str,
        offset: u32,
        limit: u32,
    ) -> Result<Documents, SourceError> {
        let offset = offset.max(1);
        let dest_id = destination_id
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::from(destination_id));
        let body = json!({
            "destId": dest_id,
            "topX": format!("{}-{}", offset, offset + limit),
            "sortOrder": "SEO_PUBLISHED_DATE_A",
        });
        let response = self
            .post("/v1/taxonomy/attractions", Some(locale), &body)
            .await?;
        Ok(index_by(list(&response, "data"), "seoId"))
    }

    async fn schedules_modified_since(
        &self,
        since: &Since,
        count: u32,
    ) -> Result<CursorPage, SourceError> {
        self.modified_since(
            "/availability/schedules/modified-since",
            None,
            since,
            count,
            "availabilitySchedules",
            "productCode",
        )
        .await
    }

    async fn products_modified_since(
        &self,
        locale: &str,
        since: &Since,
        count: u32,
    ) -> Result<CursorPage, SourceError> {
        self.modified_since(
            "/products/modified-since",
            Some(locale),
            since,
            count,
            "products",
            "productCode",
        )
        .await
    }

    async fn locations_bulk(
        &self,
        locale: &str,
        refs: &[String],
    ) -> Result<Documents, SourceError> {
        if refs.is_empty() {
            return Ok(Documents::new());
        }
        let body = json!({ "locations": refs });
        let response = self.post("/locations/bulk", Some(locale), &body).await?;
        Ok(index_by(list(&response, "locations"), "reference"))
    }
}
