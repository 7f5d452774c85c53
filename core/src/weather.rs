//! Current-conditions lookup against OpenWeatherMap

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use serde::Deserialize;

pub const WEATHER_HOST: &str = "api.openweathermap.org";

#[derive(Debug, Clone, PartialEq)]
pub struct WeatherConfig {
    pub api_key: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl WeatherConfig {
    pub fn new(api_key: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            api_key: api_key.into(),
            latitude,
            longitude,
        }
    }

    /// Current weather in imperial units
    pub fn request_url(&self) -> String {
        format!(
            "http://{}/data/2.5/weather?lat={:.6}&lon={:.6}&appid={}&units=imperial",
            WEATHER_HOST, self.latitude, self.longitude, self.api_key
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WeatherError {
    Parse,
    /// `weather` array was empty
    NoConditions,
}

impl core::fmt::Display for WeatherError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Parse => write!(f, "Invalid weather response"),
            Self::NoConditions => write!(f, "No weather conditions reported"),
        }
    }
}

impl core::error::Error for WeatherError {}

#[derive(Debug, Clone, PartialEq)]
pub struct WeatherReport {
    pub temperature_f: f32,
    pub description: String,
}

impl WeatherReport {
    /// e.g. `72.5°F, clear sky`
    pub fn summary(&self) -> String {
        format!("{:.1}°F, {}", self.temperature_f, self.description)
    }
}

#[derive(Deserialize)]
struct RawReport {
    main: RawMain,
    weather: Vec<RawCondition>,
}

#[derive(Deserialize)]
struct RawMain {
    temp: f32,
}

#[derive(Deserialize)]
struct RawCondition {
    description: String,
}

pub fn parse_report(body: &str) -> Result<WeatherReport, WeatherError> {
    let raw: RawReport = serde_json::from_str(body).map_err(|_| WeatherError::Parse)?;
    let condition = raw
        .weather
        .into_iter()
        .next()
        .ok_or(WeatherError::NoConditions)?;
    Ok(WeatherReport {
        temperature_f: raw.main.temp,
        description: condition.description,
    })
}
