//! Property codec for sparse sensor readings.
//!
//! A reading carries a sparse map from a closed set of sensor keys to `f64`
//! values. It is stored as a flat JSON object (`{"SPEED": 42.0, "RPM": 1800.0}`).
//! Keys this build does not know are skipped on decode so that rows written by
//! older or newer versions stay readable.

use std::collections::BTreeMap;
use std::fmt;

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::{Result, TrackError};

/// Known sensor property keys. The stored name is the SCREAMING_SNAKE form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PropertyKey {
    Speed,
    Maf,
    CalculatedMaf,
    Rpm,
    IntakeTemperature,
    IntakePressure,
    Co2,
    Consumption,
    ThrottlePosition,
    EngineLoad,
    GpsAccuracy,
    GpsSpeed,
    GpsBearing,
    GpsAltitude,
    GpsPdop,
    GpsHdop,
    GpsVdop,
    LambdaVoltage,
    LambdaVoltageEr,
    LambdaCurrent,
    LambdaCurrentEr,
    FuelSystemLoop,
    FuelSystemStatusCode,
    #[serde(rename = "LONG_TERM_TRIM_1")]
    LongTermTrim1,
    #[serde(rename = "SHORT_TERM_TRIM_1")]
    ShortTermTrim1,
}

impl PropertyKey {
    /// Every known key, in storage order.
    pub const ALL: [PropertyKey; 25] = [
        PropertyKey::Speed,
        PropertyKey::Maf,
        PropertyKey::CalculatedMaf,
        PropertyKey::Rpm,
        PropertyKey::IntakeTemperature,
        PropertyKey::IntakePressure,
        PropertyKey::Co2,
        PropertyKey::Consumption,
        PropertyKey::ThrottlePosition,
        PropertyKey::EngineLoad,
        PropertyKey::GpsAccuracy,
        PropertyKey::GpsSpeed,
        PropertyKey::GpsBearing,
        PropertyKey::GpsAltitude,
        PropertyKey::GpsPdop,
        PropertyKey::GpsHdop,
        PropertyKey::GpsVdop,
        PropertyKey::LambdaVoltage,
        PropertyKey::LambdaVoltageEr,
        PropertyKey::LambdaCurrent,
        PropertyKey::LambdaCurrentEr,
        PropertyKey::FuelSystemLoop,
        PropertyKey::FuelSystemStatusCode,
        PropertyKey::LongTermTrim1,
        PropertyKey::ShortTermTrim1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyKey::Speed => "SPEED",
            PropertyKey::Maf => "MAF",
            PropertyKey::CalculatedMaf => "CALCULATED_MAF",
            PropertyKey::Rpm => "RPM",
            PropertyKey::IntakeTemperature => "INTAKE_TEMPERATURE",
            PropertyKey::IntakePressure => "INTAKE_PRESSURE",
            PropertyKey::Co2 => "CO2",
            PropertyKey::Consumption => "CONSUMPTION",
            PropertyKey::ThrottlePosition => "THROTTLE_POSITION",
            PropertyKey::EngineLoad => "ENGINE_LOAD",
            PropertyKey::GpsAccuracy => "GPS_ACCURACY",
            PropertyKey::GpsSpeed => "GPS_SPEED",
            PropertyKey::GpsBearing => "GPS_BEARING",
            PropertyKey::GpsAltitude => "GPS_ALTITUDE",
            PropertyKey::GpsPdop => "GPS_PDOP",
            PropertyKey::GpsHdop => "GPS_HDOP",
            PropertyKey::GpsVdop => "GPS_VDOP",
            PropertyKey::LambdaVoltage => "LAMBDA_VOLTAGE",
            PropertyKey::LambdaVoltageEr => "LAMBDA_VOLTAGE_ER",
            PropertyKey::LambdaCurrent => "LAMBDA_CURRENT",
            PropertyKey::LambdaCurrentEr => "LAMBDA_CURRENT_ER",
            PropertyKey::FuelSystemLoop => "FUEL_SYSTEM_LOOP",
            PropertyKey::FuelSystemStatusCode => "FUEL_SYSTEM_STATUS_CODE",
            PropertyKey::LongTermTrim1 => "LONG_TERM_TRIM_1",
            PropertyKey::ShortTermTrim1 => "SHORT_TERM_TRIM_1",
        }
    }

    /// Look up a key by its stored name. Unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sparse sensor readings. Absent keys were not sensed.
pub type PropertyMap = BTreeMap<PropertyKey, f64>;

/// Result of a tolerant decode: the known values plus every skipped key name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedProperties {
    pub values: PropertyMap,
    pub unknown_keys: Vec<String>,
}

/// Encode a property map as a flat JSON object.
///
/// Fails with [`TrackError::Serialization`] when a value has no JSON
/// representation (NaN or infinite), instead of silently dropping it.
pub fn encode(properties: &PropertyMap) -> Result<String> {
    let mut object = Map::new();
    for (key, value) in properties {
        let number = Number::from_f64(*value).ok_or_else(|| {
            TrackError::Serialization(format!("{} has non-finite value {}", key, value))
        })?;
        object.insert(key.as_str().to_string(), Value::Number(number));
    }
    Ok(serde_json::to_string(&Value::Object(object))?)
}

/// Decode a stored property object, skipping unknown keys.
///
/// Missing or `null` input decodes to an empty map.
pub fn decode(text: Option<&str>) -> Result<PropertyMap> {
    let decoded = decode_detailed(text)?;
    if !decoded.unknown_keys.is_empty() {
        warn!(
            "[PropertyCodec] Skipped unknown property keys: {}",
            decoded.unknown_keys.join(", ")
        );
    }
    Ok(decoded.values)
}

/// Decode a stored property object and report which keys were skipped.
pub fn decode_detailed(text: Option<&str>) -> Result<DecodedProperties> {
    let mut decoded = DecodedProperties::default();

    let text = match text.map(str::trim) {
        None | Some("") => return Ok(decoded),
        Some(t) => t,
    };

    let object = match serde_json::from_str::<Value>(text)? {
        Value::Null => return Ok(decoded),
        Value::Object(map) => map,
        other => {
            return Err(TrackError::Serialization(format!(
                "expected a property object, found {}",
                other
            )));
        }
    };

    for (name, value) in object {
        match PropertyKey::from_name(&name) {
            Some(key) => match value.as_f64() {
                Some(v) => {
                    decoded.values.insert(key, v);
                }
                None => warn!("[PropertyCodec] Ignoring non-numeric value for {}", name),
            },
            None => decoded.unknown_keys.push(name),
        }
    }

    Ok(decoded)
}
