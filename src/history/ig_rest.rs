use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{format_row_time, HistoricalDataSource, HistoricalRow, REQUEST_TIME_FORMAT};
use crate::error::AppError;
use crate::model::resolution::Resolution;

/// Session tokens for the REST gateway. Obtaining them is left to the
/// operator; they are read from the environment at start-up.
#[derive(Debug, Clone)]
pub struct IgCredentials {
    pub api_key: String,
    pub cst: String,
    pub security_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceHistoryResponse {
    #[serde(default)]
    prices: Vec<PriceSnapshot>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceSnapshot {
    snapshot_time: String,
    open_price: PricePoint,
    close_price: PricePoint,
    high_price: PricePoint,
    low_price: PricePoint,
    #[serde(default)]
    last_traded_volume: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PricePoint {
    bid: Option<f64>,
}

impl PriceSnapshot {
    fn into_row(self) -> Result<HistoricalRow, AppError> {
        let bid = |point: &PricePoint, field: &str| {
            point
                .bid
                .ok_or_else(|| AppError::parse(field, format!("<no bid at {}>", self.snapshot_time)))
        };
        Ok(HistoricalRow {
            open: bid(&self.open_price, "openPrice")?,
            close: bid(&self.close_price, "closePrice")?,
            high: bid(&self.high_price, "highPrice")?,
            low: bid(&self.low_price, "lowPrice")?,
            volume: self.last_traded_volume.unwrap_or(0.0),
            timestamp: self.snapshot_time,
        })
    }
}

/// One instrument returned by the market search endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSummary {
    pub epic: String,
    pub instrument_name: String,
    #[serde(default)]
    pub instrument_type: String,
    #[serde(default)]
    pub expiry: String,
    #[serde(default)]
    pub bid: Option<f64>,
    #[serde(default)]
    pub offer: Option<f64>,
    #[serde(default)]
    pub market_status: String,
}

#[derive(Debug, Deserialize)]
struct MarketSearchResponse {
    #[serde(default)]
    markets: Vec<MarketSummary>,
}

/// Parse a market search response body.
pub fn parse_market_search(body: &str) -> Result<Vec<MarketSummary>, AppError> {
    let response: MarketSearchResponse = serde_json::from_str(body)?;
    Ok(response.markets)
}

/// Live price history from the REST gateway (price history API version 2).
pub struct IgRestHistory {
    http: reqwest::Client,
    base_url: url::Url,
    credentials: IgCredentials,
}

impl IgRestHistory {
    pub fn new(base_url: &str, credentials: IgCredentials) -> Result<Self, AppError> {
        let base_url = url::Url::parse(base_url).map_err(|e| {
            AppError::Configuration(format!("invalid REST base url '{}': {}", base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(AppError::Configuration(format!(
                "REST base url '{}' cannot carry a path",
                base_url
            )));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            credentials,
        })
    }

    pub fn prices_url(
        &self,
        epic: &str,
        resolution: Resolution,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> url::Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend([
                "prices",
                epic,
                resolution.rest_code(),
                &start.format(REQUEST_TIME_FORMAT).to_string(),
                &end.format(REQUEST_TIME_FORMAT).to_string(),
            ]);
        }
        url
    }

    pub fn markets_url(&self, term: &str) -> url::Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("markets");
        }
        url.query_pairs_mut().append_pair("searchTerm", term);
        url
    }

    async fn get(&self, url: url::Url, version: &str) -> Result<reqwest::Response, AppError> {
        let resp = self
            .http
            .get(url)
            .header("X-IG-API-KEY", &self.credentials.api_key)
            .header("CST", &self.credentials.cst)
            .header("X-SECURITY-TOKEN", &self.credentials.security_token)
            .header("Version", version)
            .header("Accept", "application/json; charset=UTF-8")
            .send()
            .await?;
        Ok(resp)
    }

    /// Look up instruments whose name or epic matches `term`.
    pub async fn search_markets(&self, term: &str) -> Result<Vec<MarketSummary>, AppError> {
        tracing::info!(term, "Searching markets");
        let resp = self.get(self.markets_url(term), "1").await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(AppError::HistoryApi {
                status: status.as_u16(),
                msg: format!("market search '{}': {}", term, body),
            });
        }
        let markets = parse_market_search(&body)?;
        tracing::info!(term, count = markets.len(), "Market search complete");
        Ok(markets)
    }
}

#[async_trait]
impl HistoricalDataSource for IgRestHistory {
    async fn fetch(
        &self,
        epic: &str,
        resolution: Resolution,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HistoricalRow>, AppError> {
        let url = self.prices_url(epic, resolution, start, end);
        tracing::info!(
            epic,
            resolution = %resolution,
            start = %format_row_time(start),
            end = %format_row_time(end),
            "Fetching price history"
        );

        let resp = self.get(url, "2").await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::HistoryApi {
                status: status.as_u16(),
                msg: format!("{} {}: {}", epic, resolution, body),
            });
        }

        let body: PriceHistoryResponse = resp.json().await?;
        let rows = body
            .prices
            .into_iter()
            .map(PriceSnapshot::into_row)
            .collect::<Result<Vec<_>, _>>()?;
        tracing::info!(epic, count = rows.len(), "Fetched price history");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn client() -> IgRestHistory {
        IgRestHistory::new(
            "https://demo-api.ig.com/gateway/deal",
            IgCredentials {
                api_key: "key".to_string(),
                cst: "cst".to_string(),
                security_token: "token".to_string(),
            },
        )
        .unwrap()
    }

    #[test]
    fn builds_encoded_prices_url() {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap();
        let url = client().prices_url("CS.D.CFDGOLD.CFDGC.IP", Resolution::FifteenMinute, start, end);
        assert_eq!(
            url.as_str(),
            "https://demo-api.ig.com/gateway/deal/prices/CS.D.CFDGOLD.CFDGC.IP/MINUTE_15/2024-03-04%2010:00:00/2024-03-05%2010:00:00"
        );
    }

    #[test]
    fn parses_price_history_payload() {
        let payload = r#"{
            "prices": [{
                "snapshotTime": "2024:03:04-10:00:00",
                "openPrice": {"bid": 2050.1, "ask": 2050.5, "lastTraded": null},
                "closePrice": {"bid": 2051.0, "ask": 2051.4, "lastTraded": null},
                "highPrice": {"bid": 2052.0, "ask": 2052.4, "lastTraded": null},
                "lowPrice": {"bid": 2049.0, "ask": 2049.4, "lastTraded": null},
                "lastTradedVolume": 312
            }],
            "instrumentType": "CURRENCIES"
        }"#;
        let body: PriceHistoryResponse = serde_json::from_str(payload).unwrap();
        let rows: Vec<HistoricalRow> = body
            .prices
            .into_iter()
            .map(|p| p.into_row().unwrap())
            .collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].timestamp, "2024:03:04-10:00:00");
        assert!((rows[0].open - 2050.1).abs() < 1e-9);
        assert!((rows[0].volume - 312.0).abs() < f64::EPSILON);
    }

    #[test]
    fn builds_market_search_url() {
        let url = client().markets_url("gold spot");
        assert_eq!(
            url.as_str(),
            "https://demo-api.ig.com/gateway/deal/markets?searchTerm=gold+spot"
        );
    }

    #[test]
    fn parses_market_search_payload() {
        let payload = r#"{
            "markets": [{
                "epic": "CS.D.CFDGOLD.CFDGC.IP",
                "instrumentName": "Spot Gold",
                "instrumentType": "CURRENCIES",
                "expiry": "-",
                "high": 2060.2,
                "low": 2041.7,
                "percentageChange": 0.41,
                "netChange": 8.4,
                "bid": 2050.1,
                "offer": 2050.4,
                "updateTime": "10:00:00",
                "delayTime": 0,
                "streamingPricesAvailable": true,
                "marketStatus": "TRADEABLE",
                "scalingFactor": 1
            }, {
                "epic": "MT.D.GC.Month2.IP",
                "instrumentName": "Gold",
                "instrumentType": "COMMODITIES",
                "expiry": "JUN-24",
                "bid": null,
                "offer": null,
                "marketStatus": "CLOSED"
            }]
        }"#;
        let markets = parse_market_search(payload).unwrap();
        assert_eq!(markets.len(), 2);
        assert_eq!(markets[0].epic, "CS.D.CFDGOLD.CFDGC.IP");
        assert_eq!(markets[0].instrument_name, "Spot Gold");
        assert_eq!(markets[0].market_status, "TRADEABLE");
        assert!((markets[0].offer.unwrap() - 2050.4).abs() < 1e-9);
        assert_eq!(markets[1].expiry, "JUN-24");
        assert!(markets[1].bid.is_none());
    }

    #[test]
    fn empty_market_search_has_no_markets() {
        assert!(parse_market_search("{}").unwrap().is_empty());
        assert!(matches!(parse_market_search("not json"), Err(AppError::Json(_))));
    }

    #[test]
    fn missing_bid_is_parse_error() {
        let payload = r#"{"prices": [{
            "snapshotTime": "2024:03:04-10:00:00",
            "openPrice": {"bid": null},
            "closePrice": {"bid": 1.0},
            "highPrice": {"bid": 1.0},
            "lowPrice": {"bid": 1.0}
        }]}"#;
        let body: PriceHistoryResponse = serde_json::from_str(payload).unwrap();
        let err = body.prices.into_iter().next().unwrap().into_row().unwrap_err();
        assert!(err.is_parse());
    }
}
