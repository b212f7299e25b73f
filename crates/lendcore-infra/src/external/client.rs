//! Resilient gateway over the CRM, credit bureau, and offer mart services.
//!
//! Every call runs through a per-endpoint circuit breaker, bounded retry
//! with exponential backoff and jitter, and response-shape validation.
//! When retries exhaust or the circuit is open, conservative fallback data
//! keeps the conversation moving instead of failing it; fallback records
//! are flagged so downstream consumers can require manual verification.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use serde_json::Value;

use lendcore_core::errors::ErrorReporter;
use lendcore_core::storage::{CreditReport, CustomerRecord, ExternalServices, OfferSheet};
use lendcore_types::config::ServiceEndpoints;
use lendcore_types::error::GatewayError;

use super::breaker::CircuitBreaker;

/// Consecutive failures before an endpoint's circuit opens.
const FAILURE_THRESHOLD: u32 = 5;

/// Seconds an open circuit waits before probing again.
const RECOVERY_TIMEOUT_SECS: u64 = 60;

/// Fallback credit score when the bureau is unreachable.
const FALLBACK_CREDIT_SCORE: i32 = 650;

/// Fallback pre-approved limit when the offer mart is unreachable.
const FALLBACK_PRE_APPROVED_LIMIT: f64 = 100_000.0;

/// Fallback interest rate offered without live offer data.
const FALLBACK_INTEREST_RATE: f64 = 18.0;

/// Observed health of one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApiStatus {
    Healthy,
    Degraded,
    Unavailable,
}

impl ApiStatus {
    fn as_str(&self) -> &'static str {
        match self {
            ApiStatus::Healthy => "healthy",
            ApiStatus::Degraded => "degraded",
            ApiStatus::Unavailable => "unavailable",
        }
    }
}

/// Retry tunables. Tests shrink the backoff unit and disable jitter.
#[derive(Debug, Clone, Copy)]
pub struct GatewayPolicy {
    pub max_retries: u32,
    pub backoff_unit_ms: u64,
    pub backoff_cap_ms: u64,
    pub jitter: bool,
}

impl Default for GatewayPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_unit_ms: 1_000,
            backoff_cap_ms: 60_000,
            jitter: true,
        }
    }
}

impl GatewayPolicy {
    /// Delay before retry attempt `n` (1-based): `2^n` units, capped, plus
    /// a small uniform jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.min(20);
        let ms = 2u64
            .saturating_pow(exp)
            .saturating_mul(self.backoff_unit_ms)
            .min(self.backoff_cap_ms);
        let jitter_ms = if self.jitter {
            rand::thread_rng().gen_range(100..=500)
        } else {
            0
        };
        Duration::from_millis(ms + jitter_ms)
    }
}

/// The resilient client behind [`ExternalServices`].
pub struct ResilientGateway {
    http: reqwest::Client,
    endpoints: ServiceEndpoints,
    policy: GatewayPolicy,
    reporter: Arc<ErrorReporter>,
    breakers: Mutex<HashMap<&'static str, CircuitBreaker>>,
    health: Mutex<HashMap<&'static str, ApiStatus>>,
}

impl ResilientGateway {
    pub fn new(endpoints: ServiceEndpoints, reporter: Arc<ErrorReporter>) -> Self {
        Self::with_policy(endpoints, reporter, GatewayPolicy::default())
    }

    pub fn with_policy(
        endpoints: ServiceEndpoints,
        reporter: Arc<ErrorReporter>,
        policy: GatewayPolicy,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoints,
            policy,
            reporter,
            breakers: Mutex::new(HashMap::new()),
            health: Mutex::new(HashMap::new()),
        }
    }

    fn set_health(&self, api: &'static str, status: ApiStatus) {
        self.health
            .lock()
            .expect("health lock poisoned")
            .insert(api, status);
    }

    fn breaker_allows(&self, api: &'static str) -> bool {
        let mut breakers = self.breakers.lock().expect("breaker lock poisoned");
        breakers
            .entry(api)
            .or_insert_with(|| {
                CircuitBreaker::new(FAILURE_THRESHOLD, Duration::from_secs(RECOVERY_TIMEOUT_SECS))
            })
            .can_execute()
    }

    fn record_outcome(&self, api: &'static str, success: bool) {
        let mut breakers = self.breakers.lock().expect("breaker lock poisoned");
        let breaker = breakers.entry(api).or_insert_with(|| {
            CircuitBreaker::new(FAILURE_THRESHOLD, Duration::from_secs(RECOVERY_TIMEOUT_SECS))
        });
        if success {
            breaker.record_success();
        } else {
            breaker.record_failure();
        }
    }

    /// One resilient GET: breaker gate, retry loop with backoff, JSON
    /// decode, and caller-supplied shape validation. 404 is terminal (the
    /// record does not exist) and does not count against the breaker.
    async fn fetch_json(
        &self,
        api: &'static str,
        url: String,
        validate: impl Fn(&Value) -> Result<(), String>,
    ) -> Result<Value, GatewayError> {
        if !self.breaker_allows(api) {
            tracing::warn!(api, "circuit open, skipping request");
            self.set_health(api, ApiStatus::Unavailable);
            return Err(GatewayError::CircuitOpen(api.to_string()));
        }

        let timeout = Duration::from_secs(self.endpoints.timeout_secs);
        let mut last_error = String::new();

        for attempt in 0..=self.policy.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.policy.backoff(attempt)).await;
            }
            tracing::debug!(api, attempt = attempt + 1, "requesting {url}");

            let outcome = async {
                let response = self
                    .http
                    .get(&url)
                    .timeout(timeout)
                    .send()
                    .await
                    .map_err(|e| format!("request error: {e}"))?;

                if response.status() == reqwest::StatusCode::NOT_FOUND {
                    return Err("not_found".to_string());
                }
                if !response.status().is_success() {
                    return Err(format!("HTTP {}", response.status()));
                }

                let value: Value = response
                    .json()
                    .await
                    .map_err(|e| format!("invalid JSON response: {e}"))?;
                validate(&value)?;
                Ok(value)
            }
            .await;

            match outcome {
                Ok(value) => {
                    self.record_outcome(api, true);
                    self.set_health(api, ApiStatus::Healthy);
                    return Ok(value);
                }
                Err(message) if message == "not_found" => {
                    // A well-formed miss, not an outage.
                    self.record_outcome(api, true);
                    return Err(GatewayError::Request {
                        api: api.to_string(),
                        message: "not found".to_string(),
                    });
                }
                Err(message) => {
                    self.record_outcome(api, false);
                    self.set_health(api, ApiStatus::Degraded);
                    self.reporter.handle_api_error(api, &message, None, None);
                    tracing::warn!(api, attempt = attempt + 1, "request failed: {message}");
                    last_error = message;
                }
            }
        }

        self.set_health(api, ApiStatus::Unavailable);
        Err(GatewayError::Exhausted {
            api: api.to_string(),
            attempts: self.policy.max_retries + 1,
            message: last_error,
        })
    }

    /// Per-endpoint health and breaker snapshot.
    pub fn api_health(&self) -> Value {
        let health = self.health.lock().expect("health lock poisoned");
        let breakers = self.breakers.lock().expect("breaker lock poisoned");

        let mut snapshot = serde_json::Map::new();
        for api in ["crm", "credit_bureau", "offer_mart"] {
            let status = health.get(api).copied().unwrap_or(ApiStatus::Healthy);
            let (state, failures) = breakers
                .get(api)
                .map(|b| (b.state().as_str(), b.failure_count()))
                .unwrap_or(("closed", 0));
            snapshot.insert(
                api.to_string(),
                serde_json::json!({
                    "status": status.as_str(),
                    "circuit_breaker_state": state,
                    "failure_count": failures,
                }),
            );
        }
        Value::Object(snapshot)
    }

    fn fallback_customer(&self, customer_id: &str) -> CustomerRecord {
        CustomerRecord {
            id: customer_id.to_string(),
            name: "Valued Customer".to_string(),
            phone: "Please provide your phone number".to_string(),
            address: "Please provide your address".to_string(),
            age: None,
            city: None,
            salary: None,
            employment_type: None,
            from_fallback: true,
            requires_manual_verification: true,
        }
    }
}

impl ExternalServices for ResilientGateway {
    async fn fetch_customer(&self, customer_id: &str) -> Result<CustomerRecord, GatewayError> {
        let url = format!("{}/crm/{customer_id}", self.endpoints.crm_url);
        let result = self
            .fetch_json("crm", url, |value| {
                for field in ["id", "name"] {
                    if value.get(field).and_then(Value::as_str).is_none() {
                        return Err(format!("missing required field: {field}"));
                    }
                }
                Ok(())
            })
            .await;

        match result {
            Ok(value) => Ok(CustomerRecord {
                id: value["id"].as_str().unwrap_or(customer_id).to_string(),
                name: value["name"].as_str().unwrap_or_default().to_string(),
                phone: value["phone"].as_str().unwrap_or_default().to_string(),
                address: value["address"].as_str().unwrap_or_default().to_string(),
                age: value["age"].as_u64().map(|a| a as u32),
                city: value["city"].as_str().map(str::to_string),
                salary: value["salary"].as_f64(),
                employment_type: value["employmentType"].as_str().map(str::to_string),
                from_fallback: false,
                requires_manual_verification: false,
            }),
            Err(GatewayError::Request { message, .. }) if message == "not found" => {
                Err(GatewayError::CustomerNotFound(customer_id.to_string()))
            }
            Err(err) => {
                tracing::warn!("CRM unavailable, using fallback profile: {err}");
                Ok(self.fallback_customer(customer_id))
            }
        }
    }

    async fn fetch_credit_report(&self, customer_id: &str) -> Result<CreditReport, GatewayError> {
        let url = format!(
            "{}/credit-score/{customer_id}",
            self.endpoints.credit_bureau_url
        );
        let result = self
            .fetch_json("credit_bureau", url, |value| {
                if value.get("creditScore").and_then(Value::as_i64).is_none() {
                    return Err("missing required field: creditScore".to_string());
                }
                Ok(())
            })
            .await;

        match result {
            Ok(value) => {
                let score = value["creditScore"].as_i64().unwrap_or(0) as i32;
                if !(300..=900).contains(&score) {
                    tracing::warn!(score, "credit score outside expected 300-900 range");
                }
                Ok(CreditReport {
                    credit_score: score,
                    from_fallback: false,
                })
            }
            Err(err) => {
                tracing::warn!("credit bureau unavailable, using fallback score: {err}");
                Ok(CreditReport {
                    credit_score: FALLBACK_CREDIT_SCORE,
                    from_fallback: true,
                })
            }
        }
    }

    async fn fetch_offers(&self, customer_id: &str) -> Result<OfferSheet, GatewayError> {
        let url = format!("{}/offers/{customer_id}", self.endpoints.offer_mart_url);
        let result = self
            .fetch_json("offer_mart", url, |value| {
                if value.get("preApprovedLimit").and_then(Value::as_f64).is_none() {
                    return Err("missing required field: preApprovedLimit".to_string());
                }
                Ok(())
            })
            .await;

        match result {
            Ok(value) => {
                let mut limit = value["preApprovedLimit"].as_f64().unwrap_or(0.0);
                if limit < 0.0 {
                    tracing::warn!(limit, "negative pre-approved limit, clamping to zero");
                    limit = 0.0;
                }
                Ok(OfferSheet {
                    pre_approved_limit: limit,
                    interest_rate: value["interestRate"].as_f64(),
                    from_fallback: false,
                })
            }
            Err(err) => {
                tracing::warn!("offer mart unavailable, using fallback offers: {err}");
                Ok(OfferSheet {
                    pre_approved_limit: FALLBACK_PRE_APPROVED_LIMIT,
                    interest_rate: Some(FALLBACK_INTEREST_RATE),
                    from_fallback: true,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn fast_policy() -> GatewayPolicy {
        GatewayPolicy {
            max_retries: 1,
            backoff_unit_ms: 0,
            backoff_cap_ms: 0,
            jitter: false,
        }
    }

    fn endpoints(base: &str) -> ServiceEndpoints {
        ServiceEndpoints {
            crm_url: base.to_string(),
            credit_bureau_url: base.to_string(),
            offer_mart_url: base.to_string(),
            timeout_secs: 2,
        }
    }

    fn gateway(base: &str) -> ResilientGateway {
        ResilientGateway::with_policy(
            endpoints(base),
            Arc::new(ErrorReporter::new()),
            fast_policy(),
        )
    }

    /// Serve canned HTTP responses on a local port until dropped.
    async fn serve(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_live_credit_report() {
        let base = serve("200 OK", r#"{"success": true, "creditScore": 785}"#).await;
        let gateway = gateway(&base);

        let report = gateway.fetch_credit_report("CUST001").await.unwrap();
        assert_eq!(report.credit_score, 785);
        assert!(!report.from_fallback);

        let health = gateway.api_health();
        assert_eq!(health["credit_bureau"]["status"], "healthy");
        assert_eq!(health["credit_bureau"]["circuit_breaker_state"], "closed");
    }

    #[tokio::test]
    async fn test_live_offers_and_customer() {
        let base = serve(
            "200 OK",
            r#"{"success": true, "preApprovedLimit": 500000, "interestRate": 11.5,
                "id": "CUST001", "name": "Ajay Kumar", "phone": "9876543210",
                "address": "42 MG Road", "salary": 80000, "employmentType": "salaried"}"#,
        )
        .await;
        let gateway = gateway(&base);

        let offers = gateway.fetch_offers("CUST001").await.unwrap();
        assert_eq!(offers.pre_approved_limit, 500_000.0);
        assert_eq!(offers.interest_rate, Some(11.5));

        let customer = gateway.fetch_customer("CUST001").await.unwrap();
        assert_eq!(customer.name, "Ajay Kumar");
        assert_eq!(customer.salary, Some(80_000.0));
        assert!(!customer.requires_manual_verification);
    }

    #[tokio::test]
    async fn test_unreachable_bureau_falls_back_conservatively() {
        // Nothing listens on this port; every attempt fails fast.
        let gateway = gateway("http://127.0.0.1:9");

        let report = gateway.fetch_credit_report("CUST001").await.unwrap();
        assert_eq!(report.credit_score, 650);
        assert!(report.from_fallback);

        let offers = gateway.fetch_offers("CUST001").await.unwrap();
        assert_eq!(offers.pre_approved_limit, 100_000.0);
        assert_eq!(offers.interest_rate, Some(18.0));
        assert!(offers.from_fallback);

        let health = gateway.api_health();
        assert_eq!(health["credit_bureau"]["status"], "unavailable");
    }

    #[tokio::test]
    async fn test_unreachable_crm_requires_manual_verification() {
        let gateway = gateway("http://127.0.0.1:9");
        let customer = gateway.fetch_customer("CUST007").await.unwrap();
        assert_eq!(customer.id, "CUST007");
        assert!(customer.from_fallback);
        assert!(customer.requires_manual_verification);
    }

    #[tokio::test]
    async fn test_crm_404_is_customer_not_found() {
        let base = serve("404 Not Found", r#"{"error": "no such customer"}"#).await;
        let gateway = gateway(&base);

        let err = gateway.fetch_customer("NOBODY").await.unwrap_err();
        assert!(matches!(err, GatewayError::CustomerNotFound(_)));

        // A miss is not an outage; the breaker stays closed.
        let health = gateway.api_health();
        assert_eq!(health["crm"]["circuit_breaker_state"], "closed");
    }

    #[tokio::test]
    async fn test_malformed_response_retries_then_falls_back() {
        let base = serve("200 OK", r#"{"success": true}"#).await;
        let gateway = gateway(&base);

        let report = gateway.fetch_credit_report("CUST001").await.unwrap();
        assert!(report.from_fallback);

        let health = gateway.api_health();
        // max_retries=1 means two failed attempts were recorded.
        assert_eq!(health["credit_bureau"]["failure_count"], 2);
    }

    #[tokio::test]
    async fn test_open_circuit_short_circuits_to_fallback() {
        let gateway = ResilientGateway::with_policy(
            endpoints("http://127.0.0.1:9"),
            Arc::new(ErrorReporter::new()),
            GatewayPolicy {
                max_retries: 4,
                backoff_unit_ms: 0,
                backoff_cap_ms: 0,
                jitter: false,
            },
        );

        // 5 failures in one call trip the breaker.
        let report = gateway.fetch_credit_report("CUST001").await.unwrap();
        assert!(report.from_fallback);
        let health = gateway.api_health();
        assert_eq!(health["credit_bureau"]["circuit_breaker_state"], "open");

        // The next call never leaves the building.
        let report = gateway.fetch_credit_report("CUST001").await.unwrap();
        assert!(report.from_fallback);
    }
}
