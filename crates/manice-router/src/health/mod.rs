//! Health probe for the three local backends

use futures::future::join_all;
use manice_llm::{ProviderEndpoints, ProviderKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Liveness requests give up after this long
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of probing one backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub provider_name: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-provider health, keyed by provider name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HealthReport {
    pub providers: BTreeMap<String, ProviderHealth>,
}

impl HealthReport {
    pub fn any_available(&self) -> bool {
        self.providers.values().any(|p| p.available)
    }

    /// `"healthy"` when at least one backend answers, `"degraded"` otherwise
    pub fn status(&self) -> &'static str {
        if self.any_available() {
            "healthy"
        } else {
            "degraded"
        }
    }
}

impl From<BTreeMap<String, ProviderHealth>> for HealthReport {
    fn from(providers: BTreeMap<String, ProviderHealth>) -> Self {
        Self { providers }
    }
}

#[derive(Debug, Clone)]
pub struct HealthProbe {
    endpoints: ProviderEndpoints,
    client: reqwest::Client,
    timeout: Duration,
}

impl HealthProbe {
    pub fn new(endpoints: ProviderEndpoints, client: reqwest::Client) -> Self {
        Self {
            endpoints,
            client,
            timeout: PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Probe every backend concurrently. Unreachable backends are reported, not raised.
    pub async fn check(&self) -> BTreeMap<String, ProviderHealth> {
        let probes = ProviderKind::ALL.into_iter().map(|kind| self.probe(kind));
        join_all(probes)
            .await
            .into_iter()
            .map(|health| (health.provider_name.clone(), health))
            .collect()
    }

    pub async fn report(&self) -> HealthReport {
        self.check().await.into()
    }

    async fn probe(&self, kind: ProviderKind) -> ProviderHealth {
        let url = format!(
            "{}{}",
            self.endpoints.url_for(kind).trim_end_matches('/'),
            kind.health_path()
        );
        let start = Instant::now();

        match self.client.get(&url).timeout(self.timeout).send().await {
            Ok(response) => {
                let status = response.status();
                let available = status == reqwest::StatusCode::OK;
                ProviderHealth {
                    provider_name: kind.to_string(),
                    available,
                    latency_seconds: Some(start.elapsed().as_secs_f64()),
                    error: (!available).then(|| format!("HTTP {}", status.as_u16())),
                }
            }
            Err(e) => {
                tracing::debug!(provider = %kind, url = %url, error = %e, "Health probe failed");
                ProviderHealth {
                    provider_name: kind.to_string(),
                    available: false,
                    latency_seconds: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_mixed_availability() {
        let ollama = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"models": []})),
            )
            .expect(1)
            .mount(&ollama)
            .await;

        let lm_studio = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&lm_studio)
            .await;

        let endpoints = ProviderEndpoints {
            ollama_url: ollama.uri(),
            lm_studio_url: lm_studio.uri(),
            // Nothing listens on the discard port
            jan_url: "http://127.0.0.1:9".to_string(),
        };
        let probe = HealthProbe::new(endpoints, reqwest::Client::new());
        let health = probe.check().await;

        assert_eq!(health.len(), 3);
        let ollama_health = &health["ollama"];
        assert!(ollama_health.available);
        assert!(ollama_health.latency_seconds.unwrap() >= 0.0);
        assert!(ollama_health.error.is_none());

        let lm_health = &health["lm_studio"];
        assert!(!lm_health.available);
        assert_eq!(lm_health.error.as_deref(), Some("HTTP 503"));

        let jan_health = &health["jan"];
        assert!(!jan_health.available);
        assert!(jan_health.latency_seconds.is_none());
        assert!(jan_health.error.is_some());
    }

    #[tokio::test]
    async fn test_report_status() {
        let endpoints = ProviderEndpoints {
            ollama_url: "http://127.0.0.1:9".to_string(),
            lm_studio_url: "http://127.0.0.1:9".to_string(),
            jan_url: "http://127.0.0.1:9".to_string(),
        };
        let probe = HealthProbe::new(endpoints, reqwest::Client::new())
            .with_timeout(Duration::from_millis(500));
        let report = probe.report().await;
        assert_eq!(report.status(), "degraded");
        assert!(!report.any_available());

        let mut providers = report.providers.clone();
        providers.insert(
            "ollama".to_string(),
            ProviderHealth {
                provider_name: "ollama".to_string(),
                available: true,
                latency_seconds: Some(0.01),
                error: None,
            },
        );
        assert_eq!(HealthReport::from(providers).status(), "healthy");
    }

    #[test]
    fn test_report_serializes_as_map() {
        let mut providers = BTreeMap::new();
        providers.insert(
            "jan".to_string(),
            ProviderHealth {
                provider_name: "jan".to_string(),
                available: false,
                latency_seconds: None,
                error: Some("connection refused".to_string()),
            },
        );
        let value = serde_json::to_value(HealthReport::from(providers)).unwrap();
        assert_eq!(value["jan"]["available"], false);
        assert!(value["jan"].get("latency_seconds").is_none());
    }
}
