use serde::{Deserialize, Serialize};
use std::fmt;

/// The four telemetry slots a peripheral can fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Humidity,
    Temperature,
    Pressure,
    Pm2_5,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Field::Humidity => "humidity",
            Field::Temperature => "temperature",
            Field::Pressure => "pressure",
            Field::Pm2_5 => "pm2_5",
        })
    }
}

/// One telemetry record. Every field is independently optional because the
/// link delivers them at different times, or not at all. `timestamp` is only
/// ever stamped by the sink.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pm2_5: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl SensorReading {
    pub fn set(&mut self, field: Field, value: f32) {
        let slot = match field {
            Field::Humidity => &mut self.humidity,
            Field::Temperature => &mut self.temperature,
            Field::Pressure => &mut self.pressure,
            Field::Pm2_5 => &mut self.pm2_5,
        };
        *slot = Some(value);
    }

    pub fn is_empty(&self) -> bool {
        self.humidity.is_none()
            && self.temperature.is_none()
            && self.pressure.is_none()
            && self.pm2_5.is_none()
    }

    fn values(&self) -> impl Iterator<Item = f32> {
        [self.humidity, self.temperature, self.pressure, self.pm2_5]
            .into_iter()
            .flatten()
    }

    /// True if at least one measurement is present, finite and not zero.
    ///
    /// This is the sink's acceptance rule: a reading whose only values are
    /// exactly `0` is rejected just like an empty one.
    pub fn has_truthy_field(&self) -> bool {
        self.values().any(|v| v != 0.0 && v.is_finite())
    }

    /// False if any present value is NaN or infinite, which JSON cannot carry.
    pub fn is_finite(&self) -> bool {
        self.values().all(f32::is_finite)
    }
}

impl fmt::Display for SensorReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn value(v: Option<f32>) -> String {
            v.map(|v| format!("{v:.2}")).unwrap_or_else(|| "--".into())
        }

        write!(
            f,
            "Temp: {}°C | Humidity: {}% | Pressure: {} | PM2.5: {}",
            value(self.temperature),
            value(self.humidity),
            value(self.pressure),
            value(self.pm2_5),
        )?;
        if let Some(ts) = &self.timestamp {
            write!(f, " | {ts}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_fields_are_not_serialized() {
        let reading = SensorReading {
            temperature: Some(21.5),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_string(&reading).unwrap(),
            r#"{"temperature":21.5}"#
        );
    }

    #[test]
    fn null_fields_deserialize_as_absent() {
        let reading: SensorReading =
            serde_json::from_str(r#"{"humidity":null,"pm2_5":12.0}"#).unwrap();
        assert_eq!(reading.humidity, None);
        assert_eq!(reading.pm2_5, Some(12.0));
    }

    #[test]
    fn zero_only_reading_is_not_truthy() {
        let mut reading = SensorReading::default();
        assert!(!reading.has_truthy_field());

        reading.set(Field::Pm2_5, 0.0);
        assert!(!reading.is_empty());
        assert!(!reading.has_truthy_field());

        reading.set(Field::Pressure, -3.0);
        assert!(reading.has_truthy_field());
    }

    #[test]
    fn out_of_range_values_are_not_finite() {
        // serde_json narrows 1e39 to f32::INFINITY
        let reading: SensorReading = serde_json::from_str(r#"{"pressure":1e39}"#).unwrap();
        assert_eq!(reading.pressure, Some(f32::INFINITY));
        assert!(!reading.is_finite());
        assert!(!reading.has_truthy_field());

        let mixed = SensorReading {
            temperature: Some(20.0),
            pressure: Some(f32::NAN),
            ..Default::default()
        };
        assert!(mixed.has_truthy_field());
        assert!(!mixed.is_finite());
        assert!(SensorReading::default().is_finite());
    }

    #[test]
    fn display_marks_missing_fields() {
        let reading = SensorReading {
            temperature: Some(21.5),
            pm2_5: Some(8.0),
            ..Default::default()
        };
        assert_eq!(
            reading.to_string(),
            "Temp: 21.50°C | Humidity: --% | Pressure: -- | PM2.5: 8.00"
        );
    }
}
