//! HTTP exchange-rate sources.
//!
//! Each source wraps one public rate API behind the [`RateSource`] port. Any
//! transport or decoding failure is logged and reported as `None` so the
//! refresh loop can move on to the next source.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;

use crate::domain::money::Currency;
use crate::ports::rate_source_port::RateSource;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

fn http_client() -> Option<Client> {
    match Client::builder().timeout(REQUEST_TIMEOUT).build() {
        Ok(client) => Some(client),
        Err(e) => {
            tracing::warn!(error = %e, "failed to build http client");
            None
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenErApiResponse {
    result: String,
    rates: HashMap<String, f64>,
}

/// open.er-api.com, one request per base currency.
pub struct OpenErApiSource;

impl RateSource for OpenErApiSource {
    fn name(&self) -> &str {
        "open-er-api"
    }

    fn fetch(&self, from: Currency, to: Currency) -> Option<f64> {
        let client = http_client()?;
        let url = format!("https://open.er-api.com/v6/latest/{}", from.as_str());
        let response = client
            .get(&url)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json::<OpenErApiResponse>());
        match response {
            Ok(body) if body.result == "success" => body.rates.get(to.as_str()).copied(),
            Ok(body) => {
                tracing::warn!(source = self.name(), result = %body.result, "rate api reported failure");
                None
            }
            Err(e) => {
                tracing::warn!(source = self.name(), error = %e, "rate fetch failed");
                None
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct FrankfurterResponse {
    rates: HashMap<String, f64>,
}

/// api.frankfurter.app, queried per currency pair.
pub struct FrankfurterSource;

impl RateSource for FrankfurterSource {
    fn name(&self) -> &str {
        "frankfurter"
    }

    fn fetch(&self, from: Currency, to: Currency) -> Option<f64> {
        let client = http_client()?;
        let url = format!(
            "https://api.frankfurter.app/latest?from={}&to={}",
            from.as_str(),
            to.as_str()
        );
        let response = client
            .get(&url)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json::<FrankfurterResponse>());
        match response {
            Ok(body) => body.rates.get(to.as_str()).copied(),
            Err(e) => {
                tracing::warn!(source = self.name(), error = %e, "rate fetch failed");
                None
            }
        }
    }
}

/// The default source priority order.
pub fn default_sources() -> Vec<Box<dyn RateSource + Send + Sync>> {
    vec![Box::new(OpenErApiSource), Box::new(FrankfurterSource)]
}
