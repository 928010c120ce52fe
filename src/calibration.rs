//! Calibration parameters and their resolution from image
//! metadata, optionally overridden by a weather-log match.
//!
//! Exiftool reports most temperature fields as descriptive
//! strings (`"21.3 C"`, `"50.0 %"`). These are resolved into
//! a strongly-typed [`CalibrationParameters`] here, so that
//! parsing failures surface before any pixel is converted.

use lazy_static::lazy_static;
use regex::Regex;
use serde_derive::*;
use serde_json::{Map, Value};

use crate::{
    error::{PipelineError, Result},
    weather::WeatherMatch,
};

/// Everything the raw-to-temperature conversion needs.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct CalibrationParameters {
    pub emissivity: f64,
    /// Object distance in metres.
    pub object_distance: f64,
    pub reflected_temperature: f64,
    pub atmospheric_temperature: f64,
    pub ir_window_temperature: f64,
    pub ir_window_transmission: f64,
    pub relative_humidity: f64,
    pub planck: PlanckConstants,
}

/// Sensor photon-response constants.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct PlanckConstants {
    pub r1: f64,
    pub b: f64,
    pub f: f64,
    pub o: f64,
    pub r2: f64,
}

impl PlanckConstants {
    /// Constants of the reference FLIR sensor used across the
    /// test-suite and benches.
    pub const REFERENCE: PlanckConstants = PlanckConstants {
        r1: 21106.77,
        b: 1501.,
        f: 1.,
        o: -7340.,
        r2: 0.012545258,
    };
}

/// Fixed values used when a weather-log match replaces the
/// embedded atmosphere.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct EngineeringDefaults {
    pub emissivity: f64,
    pub object_distance: f64,
    pub reflected_temperature: f64,
}

impl Default for EngineeringDefaults {
    fn default() -> Self {
        EngineeringDefaults {
            emissivity: 0.98,
            object_distance: 15.24,
            reflected_temperature: 30.0,
        }
    }
}

/// Loosely-typed record of named calibration fields, as
/// produced by `exiftool -j`.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(transparent)]
pub struct EmbeddedMetadata(pub Map<String, Value>);

impl EmbeddedMetadata {
    pub fn number(&self, field: &str) -> Result<f64> {
        match self.0.get(field) {
            None | Some(Value::Null) => Err(PipelineError::parse(field, "missing")),
            Some(Value::Number(n)) => n
                .as_f64()
                .ok_or_else(|| PipelineError::parse(field, format!("not representable: {}", n))),
            Some(Value::String(s)) => extract_first_number(s)
                .ok_or_else(|| PipelineError::parse(field, format!("no number in `{}`", s))),
            Some(other) => Err(PipelineError::parse(
                field,
                format!("unexpected value: {}", other),
            )),
        }
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.get(field).map_or(false, |v| !v.is_null())
    }
}

impl From<Map<String, Value>> for EmbeddedMetadata {
    fn from(map: Map<String, Value>) -> Self {
        EmbeddedMetadata(map)
    }
}

/// Extract the first signed or unsigned decimal number in a
/// descriptive string.
pub fn extract_first_number(text: &str) -> Option<f64> {
    lazy_static! {
        static ref RE: Regex = Regex::new(r"[-+]?(\d*\.\d+|\d+)").unwrap();
    }
    RE.find(text)?.as_str().parse().ok()
}

#[derive(Debug, Clone, Default)]
pub struct CalibrationParameterResolver {
    pub defaults: EngineeringDefaults,
    /// Replaces the embedded subject distance, which is
    /// unreliable on some cameras.
    pub distance_override: Option<f64>,
}

impl CalibrationParameterResolver {
    pub fn new(defaults: EngineeringDefaults, distance_override: Option<f64>) -> Self {
        CalibrationParameterResolver {
            defaults,
            distance_override,
        }
    }

    /// Build the parameter set for one image.
    ///
    /// Without a weather match every field comes from the
    /// embedded record. With one, the atmosphere (temperature
    /// and humidity) comes from the log, emissivity, distance
    /// and reflected temperature from the engineering
    /// defaults, and the window and Planck fields stay
    /// embedded.
    pub fn resolve(
        &self,
        meta: &EmbeddedMetadata,
        weather: Option<&WeatherMatch>,
    ) -> Result<CalibrationParameters> {
        let planck = PlanckConstants {
            r1: meta.number("PlanckR1")?,
            b: meta.number("PlanckB")?,
            f: meta.number("PlanckF")?,
            o: meta.number("PlanckO")?,
            r2: meta.number("PlanckR2")?,
        };
        let ir_window_temperature = meta.number("IRWindowTemperature")?;
        let ir_window_transmission = meta.number("IRWindowTransmission")?;

        let params = match weather {
            Some(w) => CalibrationParameters {
                emissivity: self.defaults.emissivity,
                object_distance: self
                    .distance_override
                    .unwrap_or(self.defaults.object_distance),
                reflected_temperature: self.defaults.reflected_temperature,
                atmospheric_temperature: w.temperature,
                ir_window_temperature,
                ir_window_transmission,
                relative_humidity: w.humidity,
                planck,
            },
            None => CalibrationParameters {
                emissivity: meta.number("Emissivity")?,
                object_distance: match self.distance_override {
                    Some(d) => d,
                    None => meta.number("SubjectDistance")?,
                },
                reflected_temperature: meta.number("ReflectedApparentTemperature")?,
                atmospheric_temperature: meta.number("AtmosphericTemperature")?,
                ir_window_temperature,
                ir_window_transmission,
                relative_humidity: meta.number("RelativeHumidity")?,
                planck,
            },
        };
        params.validate()?;
        Ok(params)
    }
}

impl CalibrationParameters {
    /// Reference parameters of the field sensor.
    pub fn reference() -> Self {
        CalibrationParameters {
            emissivity: 0.98,
            object_distance: 15.24,
            reflected_temperature: 30.,
            atmospheric_temperature: 20.,
            ir_window_temperature: 20.,
            ir_window_transmission: 1.,
            relative_humidity: 50.,
            planck: PlanckConstants::REFERENCE,
        }
    }

    /// Check the physical ranges of the fields.
    pub fn validate(&self) -> Result<()> {
        fn check(field: &str, value: f64, ok: bool) -> Result<()> {
            if value.is_finite() && ok {
                Ok(())
            } else {
                Err(PipelineError::parse(field, format!("out of range: {}", value)))
            }
        }
        let e = self.emissivity;
        check("Emissivity", e, e > 0. && e <= 1.)?;
        check("SubjectDistance", self.object_distance, self.object_distance > 0.)?;
        let t = self.ir_window_transmission;
        check("IRWindowTransmission", t, t > 0. && t <= 1.)?;
        let rh = self.relative_humidity;
        check("RelativeHumidity", rh, (0. ..=100.).contains(&rh))?;
        check("ReflectedApparentTemperature", self.reflected_temperature, true)?;
        check("AtmosphericTemperature", self.atmospheric_temperature, true)?;
        check("IRWindowTemperature", self.ir_window_temperature, true)?;
        Ok(())
    }
}
