//! Exchange-rate lookup used by the storefront to show prices in other
//! currencies.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::AppState;

use super::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct ExchangeRateQuery {
    #[serde(default = "default_base")]
    pub base: String,
    pub target: Option<String>,
}

fn default_base() -> String {
    "NGN".to_string()
}

#[derive(Debug, Serialize)]
pub struct ExchangeRateResponse {
    pub rate: f64,
    pub base: String,
    pub date: Option<String>,
}

/// Upstream body: `{"base": "NGN", "date": "2025-01-01", "rates": {"USD": 0.00065, ...}}`
#[derive(Debug, Deserialize)]
struct RatesBody {
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    rates: HashMap<String, f64>,
}

fn currency_code(value: &str, field: &str) -> Result<String, ApiError> {
    let code = value.trim().to_uppercase();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ApiError::validation_field(
            field,
            "Currency must be a three-letter ISO code",
        ));
    }
    Ok(code)
}

fn pick_rate(body: RatesBody, base: String, target: &str) -> Result<ExchangeRateResponse, ApiError> {
    let rate = body
        .rates
        .get(target)
        .copied()
        .ok_or_else(|| ApiError::bad_request(format!("No exchange rate available for {}", target)))?;
    Ok(ExchangeRateResponse {
        rate,
        base,
        date: body.date,
    })
}

pub async fn exchange_rate(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ExchangeRateQuery>,
) -> Result<Json<ExchangeRateResponse>, ApiError> {
    let base = currency_code(&query.base, "base")?;
    let target = query
        .target
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::validation_field("target", "Target currency is required"))?;
    let target = currency_code(target, "target")?;

    let url = format!(
        "{}/{}",
        state.config.currency.api_base_url.trim_end_matches('/'),
        base
    );
    let response = state.http.get(&url).send().await.map_err(|e| {
        tracing::error!(error = %e, url = %url, "Exchange rate request failed");
        ApiError::external_service("Exchange rate service is unavailable")
    })?;

    if !response.status().is_success() {
        tracing::warn!(status = %response.status(), base = %base, "Exchange rate service returned an error");
        return Err(ApiError::external_service("Exchange rate service is unavailable"));
    }

    let body: RatesBody = response.json().await.map_err(|e| {
        tracing::error!(error = %e, "Unreadable exchange rate response");
        ApiError::external_service("Exchange rate service returned an invalid response")
    })?;

    Ok(Json(pick_rate(body, base, &target)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_currency_code_normalises() {
        assert_eq!(currency_code(" usd ", "target").unwrap(), "USD");
        assert!(currency_code("US", "target").is_err());
        assert!(currency_code("U$D", "target").is_err());
    }

    #[test]
    fn test_pick_rate() {
        let body: RatesBody =
            serde_json::from_str(r#"{"base":"NGN","date":"2025-01-01","rates":{"USD":0.00065,"GBP":0.0005}}"#)
                .unwrap();
        let response = pick_rate(body, "NGN".to_string(), "USD").unwrap();
        assert_eq!(response.rate, 0.00065);
        assert_eq!(response.date.as_deref(), Some("2025-01-01"));
    }

    #[test]
    fn test_pick_rate_missing_target_is_bad_request() {
        let body: RatesBody = serde_json::from_str(r#"{"rates":{"USD":0.00065}}"#).unwrap();
        let err = pick_rate(body, "NGN".to_string(), "EUR").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
