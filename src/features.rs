//! Fixed-schema model input.
//!
//! The fare model was trained on exactly these 23 columns; a row with a
//! different shape makes it silently predict garbage, so the count is checked
//! at compile time and again whenever a row leaves this module.

use chrono::{Datelike, NaiveDateTime, Timelike};
use log::{debug, error};
use ndarray::Array1;
use serde::Serialize;
use serde::ser::SerializeMap;

use crate::error::PipelineError;

pub const MONTHS: usize = 12;
pub const WEEKDAYS: usize = 7;
const SCALAR_FEATURES: usize = 4;

/// Number of columns the fare model expects
pub const FEATURE_COUNT: usize = SCALAR_FEATURES + MONTHS + WEEKDAYS;

const _: () = assert!(FEATURE_COUNT == 23);

pub const MIN_PASSENGERS: i64 = 1;
pub const MAX_PASSENGERS: i64 = 6;

/// Column names in model order
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "passenger_count",
    "distance_km",
    "hour",
    "is_weekend",
    "month_1",
    "month_2",
    "month_3",
    "month_4",
    "month_5",
    "month_6",
    "month_7",
    "month_8",
    "month_9",
    "month_10",
    "month_11",
    "month_12",
    "dow_0",
    "dow_1",
    "dow_2",
    "dow_3",
    "dow_4",
    "dow_5",
    "dow_6",
];

/// One model input row
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureVector {
    pub passenger_count: u8,
    pub distance_km: f64,
    pub hour: u8,
    pub is_weekend: u8,
    /// `month[0]` is January
    pub month: [u8; MONTHS],
    /// `dow[0]` is Monday
    pub dow: [u8; WEEKDAYS],
}

impl FeatureVector {
    /// Assemble the row for a trip.
    ///
    /// Passenger count is clamped to 1..=6 and distance floored at 0; the
    /// minimum trip distance is the caller's concern.
    pub fn build(distance_km: f64, timestamp: NaiveDateTime, passenger_count: i64) -> Self {
        let weekday = timestamp.weekday().num_days_from_monday() as usize;
        let month = timestamp.month0() as usize;

        let mut month_one_hot = [0u8; MONTHS];
        month_one_hot[month] = 1;
        let mut dow_one_hot = [0u8; WEEKDAYS];
        dow_one_hot[weekday] = 1;

        let distance_km = if distance_km.is_finite() {
            distance_km.max(0.0)
        } else {
            0.0
        };

        Self {
            passenger_count: clamp_passengers(passenger_count),
            distance_km,
            hour: timestamp.hour() as u8,
            is_weekend: u8::from(weekday >= 5),
            month: month_one_hot,
            dow: dow_one_hot,
        }
    }

    /// Values in [`FEATURE_NAMES`] order
    pub fn values(&self) -> Vec<f64> {
        let mut values = Vec::with_capacity(FEATURE_COUNT);
        values.push(f64::from(self.passenger_count));
        values.push(self.distance_km);
        values.push(f64::from(self.hour));
        values.push(f64::from(self.is_weekend));
        values.extend(self.month.iter().map(|&v| f64::from(v)));
        values.extend(self.dow.iter().map(|&v| f64::from(v)));
        values
    }

    pub fn named_values(&self) -> impl Iterator<Item = (&'static str, f64)> {
        FEATURE_NAMES.into_iter().zip(self.values())
    }

    /// Model row, refusing to emit anything that is not exactly
    /// [`FEATURE_COUNT`] wide with valid one-hot groups
    pub fn to_row(&self) -> Result<Array1<f64>, PipelineError> {
        self.validate()?;
        Ok(Array1::from(self.values()))
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let values = self.values();
        if values.len() != FEATURE_COUNT {
            error!(
                "Feature count mismatch! Expected {}, got {}",
                FEATURE_COUNT,
                values.len()
            );
            return Err(PipelineError::FeatureSchemaMismatch {
                expected: FEATURE_COUNT,
                actual: values.len(),
            });
        }

        let hot_months = self.month.iter().filter(|&&v| v == 1).count();
        let hot_days = self.dow.iter().filter(|&&v| v == 1).count();
        let groups_ok = hot_months == 1
            && hot_days == 1
            && self.month.iter().chain(self.dow.iter()).all(|&v| v <= 1);
        if !groups_ok {
            error!(
                "One-hot groups are corrupt: {} months and {} weekdays set",
                hot_months, hot_days
            );
            return Err(PipelineError::FeatureSchemaMismatch {
                expected: 2,
                actual: hot_months + hot_days,
            });
        }

        debug!("Feature row: {:?}", values);
        Ok(())
    }
}

impl Serialize for FeatureVector {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(FEATURE_COUNT))?;
        for (name, value) in self.named_values() {
            map.serialize_entry(name, &value)?;
        }
        map.end()
    }
}

pub fn clamp_passengers(passenger_count: i64) -> u8 {
    passenger_count.clamp(MIN_PASSENGERS, MAX_PASSENGERS) as u8
}

/// Compare the model's declared columns against [`FEATURE_NAMES`]
pub fn check_schema<S: AsRef<str>>(names: &[S]) -> Result<(), PipelineError> {
    if names.len() != FEATURE_COUNT {
        error!(
            "Feature count mismatch! Expected {}, got {}",
            FEATURE_COUNT,
            names.len()
        );
        return Err(PipelineError::FeatureSchemaMismatch {
            expected: FEATURE_COUNT,
            actual: names.len(),
        });
    }

    let mismatched: Vec<(&str, &str)> = FEATURE_NAMES
        .iter()
        .zip(names)
        .filter(|(expected, actual)| **expected != actual.as_ref())
        .map(|(expected, actual)| (*expected, actual.as_ref()))
        .collect();
    if !mismatched.is_empty() {
        error!("Feature name mismatch (expected, actual): {:?}", mismatched);
        return Err(PipelineError::FeatureSchemaMismatch {
            expected: FEATURE_COUNT,
            actual: FEATURE_COUNT - mismatched.len(),
        });
    }
    Ok(())
}
