//! Unit conversion and the derived feels-like temperature.

use serde::{Deserialize, Serialize};

/// Display unit system for stored weather values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnitSystem {
    /// °F, mph, hPa, miles, inches.
    #[default]
    Imperial,
    /// °C, km/h, hPa, kilometres, millimetres.
    Metric,
}

impl UnitSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Imperial => "imperial",
            Self::Metric => "metric",
        }
    }

    /// Display a temperature given in Celsius.
    pub fn temperature(&self, celsius: f64) -> f64 {
        match self {
            Self::Imperial => celsius_to_fahrenheit(celsius),
            Self::Metric => celsius,
        }
    }

    /// Display a speed given in km/h.
    pub fn speed(&self, kmh: f64) -> f64 {
        match self {
            Self::Imperial => kmh_to_mph(kmh),
            Self::Metric => kmh,
        }
    }

    /// Display a distance given in metres.
    pub fn distance(&self, metres: f64) -> f64 {
        match self {
            Self::Imperial => metres_to_miles(metres),
            Self::Metric => metres / 1000.0,
        }
    }

    /// Display a precipitation depth given in millimetres.
    pub fn precipitation(&self, mm: f64) -> f64 {
        match self {
            Self::Imperial => mm_to_inches(mm),
            Self::Metric => mm,
        }
    }
}

pub fn celsius_to_fahrenheit(c: f64) -> f64 {
    c * 9.0 / 5.0 + 32.0
}

pub fn fahrenheit_to_celsius(f: f64) -> f64 {
    (f - 32.0) * 5.0 / 9.0
}

pub fn kmh_to_mph(kmh: f64) -> f64 {
    kmh * 0.621_371
}

pub fn mph_to_kmh(mph: f64) -> f64 {
    mph / 0.621_371
}

pub fn pascal_to_hpa(pa: f64) -> f64 {
    pa / 100.0
}

pub fn metres_to_miles(m: f64) -> f64 {
    m * 0.000_621_371
}

pub fn mm_to_inches(mm: f64) -> f64 {
    mm * 0.039_370_1
}

/// Feels-like temperature in °F.
///
/// Wind chill applies at or below 50°F with wind above 3 mph; the heat index
/// applies at or above 80°F when humidity is known. Otherwise the air
/// temperature is returned unchanged.
pub fn feels_like_f(temp_f: f64, wind_mph: Option<f64>, relative_humidity: Option<f64>) -> f64 {
    match (wind_mph, relative_humidity) {
        (Some(wind), _) if temp_f <= 50.0 && wind > 3.0 => wind_chill_f(temp_f, wind),
        (_, Some(rh)) if temp_f >= 80.0 => heat_index_f(temp_f, rh),
        _ => temp_f,
    }
}

/// NWS wind chill formula.
pub fn wind_chill_f(temp_f: f64, wind_mph: f64) -> f64 {
    let v = wind_mph.powf(0.16);
    35.74 + 0.6215 * temp_f - 35.75 * v + 0.4275 * temp_f * v
}

/// Rothfusz regression with the NWS low/high humidity adjustments.
pub fn heat_index_f(t: f64, rh: f64) -> f64 {
    let simple = 0.5 * (t + 61.0 + (t - 68.0) * 1.2 + rh * 0.094);
    if (simple + t) / 2.0 < 80.0 {
        return simple;
    }

    let mut hi = -42.379 + 2.049_015_23 * t + 10.143_331_27 * rh
        - 0.224_755_41 * t * rh
        - 0.006_837_83 * t * t
        - 0.054_817_17 * rh * rh
        + 0.001_228_74 * t * t * rh
        + 0.000_852_82 * t * rh * rh
        - 0.000_001_99 * t * t * rh * rh;

    if rh < 13.0 && (80.0..=112.0).contains(&t) {
        hi -= ((13.0 - rh) / 4.0) * ((17.0 - (t - 95.0).abs()) / 17.0).sqrt();
    } else if rh > 85.0 && (80.0..=87.0).contains(&t) {
        hi += ((rh - 85.0) / 10.0) * ((87.0 - t) / 5.0);
    }
    hi
}
