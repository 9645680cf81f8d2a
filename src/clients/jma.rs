use std::collections::BTreeMap;
use std::time::Instant;

use futures_util::future::try_join_all;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::error::GatewayError;
use crate::infra::config::WeatherConfig;
use crate::infra::http::headers::{add_standard_headers, generate_request_id};
use crate::infra::runtime::limits::{make_http_client_with, retry_async};

/// Japan Meteorological Agency forecast API (`/bosai`).
#[derive(Clone)]
pub struct JmaRemote {
    base: String,
    http: Client,
    retries: u32,
}

/// One entry of `area.json`'s `offices` map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Office {
    pub name: String,
    #[serde(rename = "enName", default)]
    pub en_name: String,
    #[serde(rename = "officeName", default)]
    pub office_name: Option<String>,
}

#[derive(Deserialize)]
struct AreaWire {
    #[serde(default)]
    offices: BTreeMap<String, Office>,
}

#[derive(Deserialize)]
struct OverviewWire {
    #[serde(rename = "publishingOffice", default)]
    publishing_office: String,
    #[serde(rename = "targetArea", default)]
    target_area: String,
    text: String,
}

impl JmaRemote {
    pub fn new(base: impl Into<String>) -> Result<Self, GatewayError> {
        Self::from_config(&WeatherConfig { base_url: base.into(), ..WeatherConfig::default() })
    }

    pub fn from_config(cfg: &WeatherConfig) -> Result<Self, GatewayError> {
        Ok(Self {
            base: cfg.base_url.clone(),
            http: make_http_client_with(&cfg.http)?,
            retries: cfg.http.retries,
        })
    }

    async fn get_json<T: DeserializeOwned + Send>(&self, path: &str) -> Result<T, GatewayError> {
        let url = format!("{}{}", self.base.trim_end_matches('/'), path);
        tracing::debug!(endpoint = %url, "jma request");
        let req_id = generate_request_id();
        retry_async(self.retries, GatewayError::is_retryable, |_| {
            let (builder, _rid) = add_standard_headers(self.http.get(&url), Some(req_id.clone()));
            async move {
                let resp = builder.send().await?;
                if !resp.status().is_success() {
                    return Err(GatewayError::UpstreamStatus(resp.status().as_u16()));
                }
                Ok::<_, GatewayError>(resp.json::<T>().await?)
            }
        })
        .await
    }

    /// Forecast offices keyed by area code.
    pub async fn offices(&self) -> Result<BTreeMap<String, Office>, GatewayError> {
        let area: AreaWire = self.get_json("/bosai/common/const/area.json").await?;
        Ok(area.offices)
    }

    /// Overview text for one office.
    pub async fn overview(&self, office_id: &str) -> Result<String, GatewayError> {
        let path = format!("/bosai/forecast/data/overview_forecast/{office_id}.json");
        let wire: OverviewWire = self.get_json(&path).await?;
        tracing::debug!(office = %wire.publishing_office, area = %wire.target_area, "jma overview");
        Ok(wire.text)
    }

    /// Overviews for every office whose name contains `area_name`, in area-code
    /// order. Empty when nothing matches.
    pub async fn forecast_for(&self, area_name: &str) -> Result<Vec<String>, GatewayError> {
        let start = Instant::now();
        let res = async {
            let offices = self.offices().await?;
            let ids: Vec<&String> = offices
                .iter()
                .filter(|(_, office)| office.name.contains(area_name))
                .map(|(id, _)| id)
                .collect();
            try_join_all(ids.into_iter().map(|id| self.overview(id))).await
        }
        .await;
        if res.is_err() {
            crate::infra::logging::log_metric("weather", "jma_error_total", 1.0);
        }
        let texts = res?;
        let elapsed_ms = start.elapsed().as_millis() as f64;
        crate::infra::logging::log_metric("weather", "jma_latency_ms", elapsed_ms);
        Ok(texts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn area_body() -> serde_json::Value {
        json!({
            "centers": {"010300": {"name": "関東甲信地方", "enName": "Kanto Koshin"}},
            "offices": {
                "130000": {"name": "東京都", "enName": "Tokyo", "officeName": "気象庁"},
                "016000": {"name": "石狩・空知・後志地方", "enName": "Ishikari"},
                "140000": {"name": "神奈川県", "enName": "Kanagawa"}
            },
            "class10s": {}
        })
    }

    #[tokio::test]
    async fn parses_offices_from_area_list() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(GET).path("/bosai/common/const/area.json").header_exists("x-request-id");
            then.status(200).json_body(area_body());
        });
        let jma = JmaRemote::new(server.base_url()).unwrap();
        let offices = jma.offices().await.unwrap();
        m.assert();
        assert_eq!(offices.len(), 3);
        assert_eq!(offices["130000"].en_name, "Tokyo");
        assert_eq!(offices["130000"].office_name.as_deref(), Some("気象庁"));
    }

    #[tokio::test]
    async fn forecast_fetches_only_matching_offices() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/bosai/common/const/area.json");
            then.status(200).json_body(area_body());
        });
        let tokyo = server.mock(|when, then| {
            when.method(GET).path("/bosai/forecast/data/overview_forecast/130000.json");
            then.status(200).json_body(json!({
                "publishingOffice": "気象庁", "targetArea": "東京都", "text": "東京地方は晴れ"
            }));
        });
        let other = server.mock(|when, then| {
            when.method(GET).path("/bosai/forecast/data/overview_forecast/140000.json");
            then.status(200).json_body(json!({"text": "神奈川は雨"}));
        });

        let jma = JmaRemote::new(server.base_url()).unwrap();
        let out = jma.forecast_for("東京").await.unwrap();
        assert_eq!(out, vec!["東京地方は晴れ".to_string()]);
        tokyo.assert();
        other.assert_hits(0);
    }

    #[tokio::test]
    async fn no_matching_office_is_empty() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/bosai/common/const/area.json");
            then.status(200).json_body(area_body());
        });
        let jma = JmaRemote::new(server.base_url()).unwrap();
        assert!(jma.forecast_for("大阪").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(GET).path("/bosai/common/const/area.json");
            then.status(404).body("missing");
        });
        let jma = JmaRemote::new(server.base_url()).unwrap();
        let err = jma.forecast_for("東京").await.unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamStatus(404)));
        m.assert_hits(1);
    }
}
