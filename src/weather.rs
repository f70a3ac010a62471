//! Weather forecast and national warning feed.
//!
//! Independent of the water-level pipeline: a separate poller fetches the
//! OpenWeather current conditions and 5-day forecast for one coordinate, plus
//! the Thai Meteorological Department warning feed (XML), and caches the last
//! good result of each. Response payloads are deserialized into typed schemas
//! with optional fields so a partial payload degrades instead of failing.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use crate::Config;

const OPENWEATHER_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";
const USER_AGENT: &str = "FloodMonitoringSystem/1.0";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Forecast entries are 3 hours apart; every 8th one is a day later.
const ENTRIES_PER_DAY: usize = 8;
const FORECAST_DAYS: usize = 5;
const HOURLY_ENTRIES: usize = 8;

// ---

#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    #[error("Weather service not configured: OPENWEATHER_API_KEY is missing")]
    NotConfigured,

    #[error("Weather service authentication failed: invalid or inactive API key")]
    Unauthorized,

    #[error("Weather service rate limit exceeded")]
    RateLimited,

    #[error("Weather service returned HTTP {0}")]
    Status(u16),

    #[error("Weather request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid weather payload: {0}")]
    Parse(String),
}

fn check_status(status: StatusCode) -> Result<(), WeatherError> {
    // ---
    match status {
        s if s.is_success() => Ok(()),
        StatusCode::UNAUTHORIZED => Err(WeatherError::Unauthorized),
        StatusCode::TOO_MANY_REQUESTS => Err(WeatherError::RateLimited),
        s => Err(WeatherError::Status(s.as_u16())),
    }
}

// ---
// OpenWeather payloads

#[derive(Debug, Default, Deserialize)]
struct OwmMain {
    temp: Option<f64>,
    temp_min: Option<f64>,
    temp_max: Option<f64>,
    humidity: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct OwmCondition {
    #[serde(default)]
    description: String,
    #[serde(default)]
    icon: String,
}

#[derive(Debug, Default, Deserialize)]
struct OwmWind {
    speed: Option<f64>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Precipitation {
    #[serde(rename = "1h", default, skip_serializing_if = "Option::is_none")]
    pub one_hour: Option<f64>,
    #[serde(rename = "3h", default, skip_serializing_if = "Option::is_none")]
    pub three_hours: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct OwmSys {
    country: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OwmCurrent {
    name: Option<String>,
    sys: Option<OwmSys>,
    main: Option<OwmMain>,
    wind: Option<OwmWind>,
    #[serde(default)]
    weather: Vec<OwmCondition>,
    rain: Option<Precipitation>,
    snow: Option<Precipitation>,
}

#[derive(Debug, Deserialize)]
struct OwmForecastEntry {
    dt_txt: Option<String>,
    #[serde(default)]
    main: OwmMain,
    #[serde(default)]
    weather: Vec<OwmCondition>,
    wind: Option<OwmWind>,
    rain: Option<Precipitation>,
}

#[derive(Debug, Deserialize)]
struct OwmForecast {
    #[serde(default)]
    list: Vec<OwmForecastEntry>,
}

// ---
// Dashboard payloads

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentConditions {
    pub temp: i64,
    pub humidity: Option<f64>,
    pub wind_speed: Option<f64>,
    pub description: String,
    pub icon: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rain: Option<Precipitation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snow: Option<Precipitation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyForecast {
    pub date: String,
    pub temp: Option<i64>,
    pub temp_max: Option<i64>,
    pub temp_min: Option<i64>,
    pub description: String,
    pub icon: String,
    /// Millimeters over the 3-hour slot.
    pub precipitation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyForecast {
    pub time: String,
    pub temp: Option<i64>,
    pub description: String,
    pub icon: String,
    pub precipitation: f64,
    pub humidity: Option<f64>,
    pub wind_speed: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherReport {
    pub city: String,
    pub country: String,
    pub coordinates: Coordinates,
    pub current: CurrentConditions,
    pub forecast: Vec<DailyForecast>,
    pub hourly: Vec<HourlyForecast>,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

/// Latest national weather warning, Thai and English.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WarningBulletin {
    pub has_warning: bool,
    pub title_thai: String,
    pub description_thai: String,
    pub headline_thai: String,
    pub title_english: String,
    pub description_english: String,
    pub headline_english: String,
    pub timestamp: DateTime<Utc>,
}

fn round_wind(speed: f64) -> f64 {
    (speed * 10.0).round() / 10.0
}

fn first_condition(conditions: &[OwmCondition]) -> (String, String) {
    // ---
    conditions
        .first()
        .map(|c| (c.description.clone(), c.icon.clone()))
        .unwrap_or_default()
}

/// Shape raw OpenWeather responses into the dashboard report.
///
/// A missing forecast yields empty `forecast`/`hourly` lists; current
/// conditions without a temperature are rejected.
fn build_report(
    current: OwmCurrent,
    forecast: Option<OwmForecast>,
    fallback_city: &str,
    coordinates: Coordinates,
    now: DateTime<Utc>,
) -> Result<WeatherReport, WeatherError> {
    // ---
    let main = current.main.unwrap_or_default();
    let temp = main
        .temp
        .ok_or_else(|| WeatherError::Parse("current conditions missing main.temp".into()))?;
    let (description, icon) = first_condition(&current.weather);

    let entries = forecast.map(|f| f.list).unwrap_or_default();
    let precipitation = |rain: &Option<Precipitation>| {
        rain.as_ref().and_then(|r| r.three_hours).unwrap_or(0.0)
    };

    let daily = entries
        .iter()
        .step_by(ENTRIES_PER_DAY)
        .take(FORECAST_DAYS)
        .map(|entry| {
            let (description, icon) = first_condition(&entry.weather);
            DailyForecast {
                date: entry.dt_txt.clone().unwrap_or_default(),
                temp: entry.main.temp.map(|t| t.round() as i64),
                temp_max: entry.main.temp_max.map(|t| t.round() as i64),
                temp_min: entry.main.temp_min.map(|t| t.round() as i64),
                description,
                icon,
                precipitation: precipitation(&entry.rain),
            }
        })
        .collect();

    let hourly = entries
        .iter()
        .take(HOURLY_ENTRIES)
        .map(|entry| {
            let (description, icon) = first_condition(&entry.weather);
            HourlyForecast {
                time: entry.dt_txt.clone().unwrap_or_default(),
                temp: entry.main.temp.map(|t| t.round() as i64),
                description,
                icon,
                precipitation: precipitation(&entry.rain),
                humidity: entry.main.humidity,
                wind_speed: entry.wind.as_ref().and_then(|w| w.speed).map(round_wind),
            }
        })
        .collect();

    Ok(WeatherReport {
        city: current
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| fallback_city.to_string()),
        country: current.sys.and_then(|s| s.country).unwrap_or_default(),
        coordinates,
        current: CurrentConditions {
            temp: temp.round() as i64,
            humidity: main.humidity,
            wind_speed: current.wind.and_then(|w| w.speed).map(round_wind),
            description,
            icon,
            rain: current.rain,
            snow: current.snow,
        },
        forecast: daily,
        hourly,
        source: "OpenWeather API (Live Data)".to_string(),
        timestamp: now,
    })
}

// ---
// Warning feed

/// Text between `<tag>` and `</tag>`, matched case-insensitively.
fn extract_tag(xml: &str, tag: &str) -> String {
    // ---
    let lower = xml.to_ascii_lowercase();
    let open = format!("<{}>", tag.to_ascii_lowercase());
    let close = format!("</{}>", tag.to_ascii_lowercase());

    let Some(start) = lower.find(&open).map(|i| i + open.len()) else {
        return String::new();
    };
    let Some(len) = lower[start..].find(&close) else {
        return String::new();
    };
    decode_entities(xml[start..start + len].trim())
}

/// Decode the five predefined XML entities and numeric character references.
fn decode_entities(text: &str) -> String {
    // ---
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').and_then(|semi| {
            let entity = &tail[1..semi];
            let ch = match entity {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ if entity.starts_with("#x") || entity.starts_with("#X") => {
                    u32::from_str_radix(&entity[2..], 16).ok().and_then(char::from_u32)
                }
                _ if entity.starts_with('#') => {
                    entity[1..].parse::<u32>().ok().and_then(char::from_u32)
                }
                _ => None,
            };
            ch.map(|c| (c, semi + 1))
        });

        match decoded {
            Some((c, consumed)) => {
                out.push(c);
                rest = &tail[consumed..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn parse_warning_feed(xml: &str, now: DateTime<Utc>) -> WarningBulletin {
    // ---
    let has_warning =
        xml.contains("<Warning>") || (xml.contains("<Warnings>") && !xml.contains("<Warnings/>"));
    if !has_warning {
        return WarningBulletin {
            timestamp: now,
            ..Default::default()
        };
    }

    WarningBulletin {
        has_warning,
        title_thai: extract_tag(xml, "TitleThai"),
        description_thai: extract_tag(xml, "DescriptionThai"),
        headline_thai: extract_tag(xml, "HeadlineThai"),
        title_english: extract_tag(xml, "TitleEnglish"),
        description_english: extract_tag(xml, "DescriptionEnglish"),
        headline_english: extract_tag(xml, "HeadlineEnglish"),
        timestamp: now,
    }
}

// ---
// Client

#[derive(Debug, Clone)]
pub struct WeatherClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    coordinates: Coordinates,
    city_name: String,
    warning_feed_url: String,
}

impl WeatherClient {
    // ---
    pub fn from_config(config: &Config) -> Result<Self, WeatherError> {
        // ---
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            http,
            base_url: OPENWEATHER_BASE_URL.to_string(),
            api_key: config.openweather_api_key.clone(),
            coordinates: Coordinates {
                lat: config.latitude,
                lon: config.longitude,
            },
            city_name: config.city_name.clone(),
            warning_feed_url: config.warning_feed_url.clone(),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        api_key: &str,
    ) -> Result<T, WeatherError> {
        // ---
        let url = format!("{}/{}", self.base_url, endpoint);
        let lat = self.coordinates.lat.to_string();
        let lon = self.coordinates.lon.to_string();
        debug!("Fetching {} for ({}, {})", url, lat, lon);

        let response = self
            .http
            .get(&url)
            .query(&[
                ("lat", lat.as_str()),
                ("lon", lon.as_str()),
                ("appid", api_key),
                ("units", "metric"),
            ])
            .send()
            .await?;
        check_status(response.status())?;

        response
            .json::<T>()
            .await
            .map_err(|e| WeatherError::Parse(e.to_string()))
    }

    /// Current conditions plus forecast. A failed forecast degrades to
    /// current conditions only.
    pub async fn fetch_report(&self) -> Result<WeatherReport, WeatherError> {
        // ---
        let api_key = self.api_key.as_deref().ok_or(WeatherError::NotConfigured)?;

        let current: OwmCurrent = self.get_json("weather", api_key).await?;
        let forecast = match self.get_json::<OwmForecast>("forecast", api_key).await {
            Ok(forecast) => Some(forecast),
            Err(e) => {
                warn!("Forecast unavailable, returning current weather only: {}", e);
                None
            }
        };

        build_report(
            current,
            forecast,
            &self.city_name,
            self.coordinates.clone(),
            Utc::now(),
        )
    }

    pub async fn fetch_warning(&self) -> Result<WarningBulletin, WeatherError> {
        // ---
        let response = self.http.get(&self.warning_feed_url).send().await?;
        check_status(response.status())?;
        let xml = response.text().await?;
        Ok(parse_warning_feed(&xml, Utc::now()))
    }
}

// ---
// Poller

#[derive(Debug, Default)]
struct WeatherState {
    report: Option<WeatherReport>,
    report_error: Option<String>,
    warning: Option<WarningBulletin>,
    warning_error: Option<String>,
}

/// Last known value plus the error from the most recent failed attempt.
#[derive(Debug, Clone, Serialize)]
pub struct Cached<T> {
    pub value: Option<T>,
    pub error: Option<String>,
}

pub struct WeatherMonitor {
    client: WeatherClient,
    state: RwLock<WeatherState>,
}

impl WeatherMonitor {
    // ---
    pub fn new(client: WeatherClient) -> Self {
        Self {
            client,
            state: RwLock::new(WeatherState::default()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.client.is_configured()
    }

    pub async fn refresh_report(&self) {
        // ---
        let result = self.client.fetch_report().await;
        let mut state = self.state.write().await;
        match result {
            Ok(report) => {
                info!(
                    "Weather for {}: {}°C, {}",
                    report.city, report.current.temp, report.current.description
                );
                state.report = Some(report);
                state.report_error = None;
            }
            Err(e) => {
                warn!("Weather fetch failed: {}", e);
                state.report_error = Some(e.to_string());
            }
        }
    }

    pub async fn refresh_warning(&self) {
        // ---
        let result = self.client.fetch_warning().await;
        let mut state = self.state.write().await;
        match result {
            Ok(bulletin) => {
                if bulletin.has_warning {
                    info!("Weather warning active: {}", bulletin.title_english);
                }
                state.warning = Some(bulletin);
                state.warning_error = None;
            }
            Err(e) => {
                warn!("Warning feed fetch failed: {}", e);
                state.warning_error = Some(e.to_string());
            }
        }
    }

    /// Cached report; fetched on demand if nothing has been tried yet.
    pub async fn report(&self) -> Cached<WeatherReport> {
        // ---
        let untried = {
            let state = self.state.read().await;
            state.report.is_none() && state.report_error.is_none()
        };
        if untried {
            self.refresh_report().await;
        }

        let state = self.state.read().await;
        Cached {
            value: state.report.clone(),
            error: state.report_error.clone(),
        }
    }

    /// Cached warning bulletin; fetched on demand if nothing has been tried yet.
    pub async fn warning(&self) -> Cached<WarningBulletin> {
        // ---
        let untried = {
            let state = self.state.read().await;
            state.warning.is_none() && state.warning_error.is_none()
        };
        if untried {
            self.refresh_warning().await;
        }

        let state = self.state.read().await;
        Cached {
            value: state.warning.clone(),
            error: state.warning_error.clone(),
        }
    }

    /// Poll both sources every `period` until `shutdown` flips.
    pub async fn run(&self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        // ---
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.is_configured() {
                        self.refresh_report().await;
                    }
                    self.refresh_warning().await;
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("Weather poller stopped");
    }
}
