//! Betfair Exchange client.
//!
//! Horse-racing market data over the Betfair Exchange API (JSON-RPC).
//!
//! Auth is the certificate login flow: a mutual-TLS POST to the
//! `identitysso-cert` host with form credentials yields a session
//! token, which is cached in the secrets blob and sent on every
//! betting call as `X-Authentication` alongside `X-Application`.
//!
//! Error discipline:
//! - network failures, 5xx and 429 are retried with doubling backoff
//!   and jitter, up to `max_retries` attempts;
//! - an expired session (HTTP 401 or `INVALID_SESSION_INFORMATION`)
//!   triggers exactly one re-login per call, then fails as an
//!   authentication error;
//! - any other 4xx or malformed payload fails immediately.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, TimeZone, Utc};
use chrono_tz::Europe::London;
use rand::Rng;
use reqwest::{Client, Identity, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::secrets::BetfairSecrets;
use super::{ExchangeApi, MarketBook, MarketStatus, RaceMarket, RunnerEntry, RunnerPrice, RunnerStatus};
use crate::config::ExchangeConfig;
use crate::types::PipelineError;

/// Horse Racing event type on the exchange.
const HORSE_RACING_EVENT_TYPE: &str = "7";

/// Maximum markets per catalogue request.
const CATALOGUE_FETCH_LIMIT: u32 = 200;

/// Maximum market IDs per listMarketBook request (API limit).
const BOOK_CHUNK_SIZE: usize = 40;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Certificate login response.
#[derive(Debug, Deserialize)]
struct CertLoginResponse {
    #[serde(rename = "sessionToken")]
    session_token: Option<String>,
    #[serde(rename = "loginStatus")]
    login_status: String,
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope<T> {
    #[serde(default = "Option::default")]
    result: Option<T>,
    #[serde(default = "Option::default")]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

impl RpcError {
    /// APING error code buried in the JSON-RPC error data.
    fn aping_code(&self) -> Option<&str> {
        self.data
            .as_ref()?
            .get("APINGException")?
            .get("errorCode")?
            .as_str()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarketCatalogue {
    market_id: String,
    #[serde(default)]
    market_start_time: Option<String>,
    #[serde(default)]
    event: Option<EventInfo>,
    #[serde(default)]
    description: Option<MarketDescription>,
    #[serde(default)]
    runners: Vec<RunnerCatalogue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventInfo {
    #[serde(default)]
    venue: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarketDescription {
    #[serde(default)]
    clarifications: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunnerCatalogue {
    selection_id: i64,
    runner_name: String,
    #[serde(default)]
    metadata: Option<HashMap<String, Option<String>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMarketBook {
    market_id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    runners: Vec<WireRunnerBook>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRunnerBook {
    selection_id: i64,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    last_price_traded: Option<f64>,
    #[serde(default)]
    ex: Option<ExchangePrices>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangePrices {
    #[serde(default)]
    available_to_back: Vec<PriceSize>,
}

#[derive(Debug, Deserialize)]
struct PriceSize {
    price: f64,
    #[allow(dead_code)]
    size: f64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Live exchange client with cached session state.
pub struct BetfairClient {
    http: Client,
    config: ExchangeConfig,
    secrets_path: PathBuf,
    /// Single-flight guard: one login at a time, one cached token.
    secrets: Mutex<BetfairSecrets>,
}

impl BetfairClient {
    /// Build a client from config, loading the secrets blob and the
    /// client certificate pair it points at.
    pub fn new(config: &ExchangeConfig) -> anyhow::Result<Self> {
        use anyhow::Context;

        let secrets_path = PathBuf::from(&config.secrets_file);
        let secrets = BetfairSecrets::load(&secrets_path)?;

        let cert_pem = std::fs::read(&secrets.cert_file).with_context(|| {
            format!("Failed to read client cert: {}", secrets.cert_file.display())
        })?;
        let key_pem = std::fs::read(&secrets.key_file).with_context(|| {
            format!("Failed to read client key: {}", secrets.key_file.display())
        })?;
        let identity = Identity::from_pkcs8_pem(&cert_pem, &key_pem)
            .context("Failed to build TLS identity from cert/key pair")?;

        let http = Client::builder()
            .identity(identity)
            .timeout(Duration::from_secs(30))
            .user_agent("surebet/0.1.0")
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            config: config.clone(),
            secrets_path,
            secrets: Mutex::new(secrets),
        })
    }

    // -- Authentication ----------------------------------------------------

    /// Certificate login. Caller holds the secrets lock.
    async fn login(&self, secrets: &mut BetfairSecrets) -> Result<(), PipelineError> {
        info!("Authenticating with exchange (cert login)...");

        let resp = self
            .http
            .post(&self.config.identity_url)
            .header("X-Application", &secrets.app_key)
            .header("Accept", "application/json")
            .form(&[
                ("username", secrets.username.as_str()),
                ("password", secrets.password.as_str()),
            ])
            .send()
            .await
            .map_err(|e| PipelineError::TransientExchange(format!("login request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(PipelineError::AuthenticationFailed(format!(
                "cert login HTTP {status}: {body}"
            )));
        }

        let login: CertLoginResponse = resp.json().await.map_err(|e| {
            PipelineError::ExchangeContract(format!("unparseable login response: {e}"))
        })?;

        if login.login_status != "SUCCESS" {
            return Err(PipelineError::AuthenticationFailed(format!(
                "cert login rejected: {}",
                login.login_status
            )));
        }

        let token = login.session_token.ok_or_else(|| {
            PipelineError::AuthenticationFailed(
                "login succeeded but no session token returned".to_string(),
            )
        })?;

        secrets.set_session_token(token);
        if let Err(e) = secrets.save(&self.secrets_path) {
            // Caching the token is best-effort; the login itself stands.
            warn!(error = %e, "Failed to cache session token to secrets file");
        }

        info!("Exchange authentication successful");
        Ok(())
    }

    /// Get a valid session token and app key, logging in if needed.
    async fn ensure_session(&self) -> Result<(String, String), PipelineError> {
        let mut secrets = self.secrets.lock().await;
        if secrets.session_token.is_none() {
            self.login(&mut secrets).await?;
        }
        let token = secrets.session_token.clone().ok_or_else(|| {
            PipelineError::AuthenticationFailed("session token missing after login".to_string())
        })?;
        Ok((token, secrets.app_key.clone()))
    }

    /// Drop the cached token so the next call re-authenticates.
    async fn invalidate_session(&self) {
        let mut secrets = self.secrets.lock().await;
        secrets.invalidate();
    }

    // -- JSON-RPC plumbing -------------------------------------------------

    /// One JSON-RPC call with retry, backoff and single re-login.
    async fn rpc<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, PipelineError> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": format!("SportsAPING/v1.0/{method}"),
            "params": params,
            "id": 1,
        });

        let mut relogged = false;
        let mut attempt: u32 = 0;

        loop {
            let (token, app_key) = self.ensure_session().await?;

            debug!(method = %method, attempt, "Exchange API request");

            let result = self
                .http
                .post(&self.config.betting_url)
                .header("X-Application", &app_key)
                .header("X-Authentication", &token)
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            let resp = match result {
                Ok(resp) => resp,
                Err(e) => {
                    self.backoff_or_fail(&mut attempt, &format!("network error: {e}"))
                        .await?;
                    continue;
                }
            };

            let status = resp.status();

            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                self.relogin_once(&mut relogged, &format!("HTTP {status}"))
                    .await?;
                continue;
            }

            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                let retry_after = resp
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok());
                if let Some(secs) = retry_after {
                    if attempt + 1 >= self.config.max_retries {
                        return Err(PipelineError::TransientExchange(format!(
                            "{method} exhausted retries at HTTP {status}"
                        )));
                    }
                    attempt += 1;
                    warn!(method = %method, secs, "Exchange asked us to back off");
                    tokio::time::sleep(Duration::from_secs(secs)).await;
                } else {
                    self.backoff_or_fail(&mut attempt, &format!("HTTP {status}"))
                        .await?;
                }
                continue;
            }

            if !status.is_success() {
                let body_text = resp.text().await.unwrap_or_default();
                return Err(PipelineError::ExchangeContract(format!(
                    "{method} HTTP {status}: {body_text}"
                )));
            }

            let envelope: RpcEnvelope<T> = resp.json().await.map_err(|e| {
                PipelineError::ExchangeContract(format!("unparseable {method} response: {e}"))
            })?;

            if let Some(error) = envelope.error {
                let code = error.aping_code().unwrap_or("UNKNOWN").to_string();
                if code == "INVALID_SESSION_INFORMATION" || code == "NO_SESSION" {
                    self.relogin_once(&mut relogged, &code).await?;
                    continue;
                }
                return Err(PipelineError::ExchangeContract(format!(
                    "{method} rejected: {code} ({})",
                    error.message.unwrap_or_default()
                )));
            }

            return envelope.result.ok_or_else(|| {
                PipelineError::ExchangeContract(format!("{method} returned no result"))
            });
        }
    }

    /// Re-login exactly once per call; a second auth failure is final.
    async fn relogin_once(&self, relogged: &mut bool, reason: &str) -> Result<(), PipelineError> {
        if *relogged {
            return Err(PipelineError::AuthenticationFailed(format!(
                "session still rejected after re-login: {reason}"
            )));
        }
        warn!(reason = %reason, "Exchange session expired, re-authenticating...");
        self.invalidate_session().await;
        *relogged = true;
        Ok(())
    }

    /// Sleep with doubling backoff and jitter, or fail once attempts
    /// are exhausted.
    async fn backoff_or_fail(&self, attempt: &mut u32, reason: &str) -> Result<(), PipelineError> {
        *attempt += 1;
        if *attempt >= self.config.max_retries {
            return Err(PipelineError::TransientExchange(format!(
                "exhausted {} attempts: {reason}",
                self.config.max_retries
            )));
        }
        let base = self.config.backoff_base_ms * 2u64.pow(*attempt - 1);
        let jitter = rand::thread_rng().gen_range(0..=self.config.backoff_base_ms / 2 + 1);
        let delay = Duration::from_millis(base + jitter);
        warn!(reason = %reason, delay_ms = delay.as_millis() as u64, "Exchange call failed, retrying");
        tokio::time::sleep(delay).await;
        Ok(())
    }

    // -- Conversion helpers ------------------------------------------------

    /// Pull a going description out of the market clarifications text,
    /// e.g. "Going: Soft (Good to Soft in places)".
    fn extract_going(description: Option<&MarketDescription>) -> Option<String> {
        let text = description?.clarifications.as_deref()?;
        for line in text.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("Going:") {
                let going = rest.trim();
                if !going.is_empty() {
                    return Some(going.to_string());
                }
            }
        }
        None
    }

    fn to_race_market(catalogue: MarketCatalogue) -> Option<RaceMarket> {
        let race_time = catalogue
            .market_start_time
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))?;

        let (course, country_code) = match catalogue.event.as_ref() {
            Some(event) => (
                event
                    .venue
                    .clone()
                    .or_else(|| event.name.clone())
                    .unwrap_or_else(|| "Unknown".to_string()),
                event.country_code.clone().unwrap_or_default(),
            ),
            None => ("Unknown".to_string(), String::new()),
        };

        let going = Self::extract_going(catalogue.description.as_ref());

        let runners = catalogue
            .runners
            .into_iter()
            .map(|r| {
                let meta = |key: &str| -> Option<String> {
                    r.metadata
                        .as_ref()
                        .and_then(|m| m.get(key).cloned().flatten())
                        .filter(|v| !v.is_empty())
                };
                RunnerEntry {
                    selection_id: r.selection_id,
                    form: meta("FORM"),
                    trainer_name: meta("TRAINER_NAME"),
                    jockey_name: meta("JOCKEY_NAME"),
                    runner_name: r.runner_name,
                }
            })
            .collect();

        Some(RaceMarket {
            market_id: catalogue.market_id,
            course,
            country_code,
            race_time,
            runners,
            going,
        })
    }

    fn parse_market_status(status: Option<&str>) -> MarketStatus {
        match status {
            Some("OPEN") => MarketStatus::Open,
            Some("SUSPENDED") => MarketStatus::Suspended,
            Some("CLOSED") => MarketStatus::Closed,
            _ => MarketStatus::Inactive,
        }
    }

    fn parse_runner_status(status: Option<&str>) -> RunnerStatus {
        match status {
            Some("ACTIVE") => RunnerStatus::Active,
            Some("WINNER") => RunnerStatus::Winner,
            Some("LOSER") => RunnerStatus::Loser,
            Some("PLACED") => RunnerStatus::Placed,
            Some("REMOVED_VACANT") => RunnerStatus::RemovedVacant,
            Some("REMOVED") => RunnerStatus::Removed,
            _ => RunnerStatus::Hidden,
        }
    }

    fn to_market_book(book: WireMarketBook) -> MarketBook {
        MarketBook {
            market_id: book.market_id,
            status: Self::parse_market_status(book.status.as_deref()),
            runners: book
                .runners
                .into_iter()
                .map(|r| RunnerPrice {
                    selection_id: r.selection_id,
                    status: Self::parse_runner_status(r.status.as_deref()),
                    last_price_traded: r.last_price_traded,
                    best_back: r
                        .ex
                        .as_ref()
                        .and_then(|ex| ex.available_to_back.first())
                        .map(|p| p.price),
                })
                .collect(),
        }
    }
}

/// UTC bounds of one London-local race day.
///
/// The exchange filters on UTC timestamps but race cards are local,
/// so during BST the day runs from 23:00Z the evening before.
fn race_day_window(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let midnight = |d: NaiveDate| {
        London
            .from_local_datetime(&d.and_time(NaiveTime::MIN))
            .earliest()
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN)))
    };
    (midnight(date), midnight(date.succ_opt().unwrap_or(date)))
}

// ---------------------------------------------------------------------------
// ExchangeApi implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ExchangeApi for BetfairClient {
    /// WIN markets for one race day, with runner form metadata.
    async fn list_win_markets(
        &self,
        date: NaiveDate,
        countries: &[String],
    ) -> Result<Vec<RaceMarket>, PipelineError> {
        let (from, to) = race_day_window(date);
        let from = from.to_rfc3339_opts(SecondsFormat::Secs, true);
        let to = to.to_rfc3339_opts(SecondsFormat::Secs, true);

        let params = json!({
            "filter": {
                "eventTypeIds": [HORSE_RACING_EVENT_TYPE],
                "marketCountries": countries,
                "marketTypeCodes": ["WIN"],
                "marketStartTime": { "from": from, "to": to }
            },
            "maxResults": CATALOGUE_FETCH_LIMIT,
            "marketProjection": [
                "EVENT",
                "MARKET_START_TIME",
                "MARKET_DESCRIPTION",
                "RUNNER_DESCRIPTION",
                "RUNNER_METADATA"
            ],
            "sort": "FIRST_TO_START"
        });

        let catalogues: Vec<MarketCatalogue> = self.rpc("listMarketCatalogue", params).await?;

        info!(count = catalogues.len(), date = %date, "Exchange WIN markets fetched");

        Ok(catalogues
            .into_iter()
            .filter_map(Self::to_race_market)
            .collect())
    }

    /// Market books in chunks of 40, best back prices only.
    async fn list_market_books(
        &self,
        market_ids: &[String],
    ) -> Result<Vec<MarketBook>, PipelineError> {
        let mut books = Vec::with_capacity(market_ids.len());

        for chunk in market_ids.chunks(BOOK_CHUNK_SIZE) {
            let params = json!({
                "marketIds": chunk,
                "priceProjection": {
                    "priceData": ["EX_BEST_OFFERS"],
                    "virtualise": false
                }
            });
            let wire: Vec<WireMarketBook> = self.rpc("listMarketBook", params).await?;
            books.extend(wire.into_iter().map(Self::to_market_book));
        }

        Ok(books)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
