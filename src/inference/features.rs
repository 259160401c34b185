//! Tabular feature vector for the stage-1 classifier

use crate::protocol::SensorReading;
use serde::Serialize;

/// Guards the colour ratios against a zero red channel
pub const EPSILON: f64 = 1e-6;

/// Feature order expected by the tabular model
pub const FEATURE_NAMES: [&str; 10] = [
    "temperature",
    "humidity",
    "light",
    "R",
    "G",
    "B",
    "RGB_mean",
    "RGB_std",
    "G_over_R",
    "B_over_R",
];

/// Raw channels followed by the derived colour statistics
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeatureVector([f64; 10]);

impl FeatureVector {
    pub fn from_reading(reading: &SensorReading) -> Self {
        let (r, g, b) = (
            f64::from(reading.r),
            f64::from(reading.g),
            f64::from(reading.b),
        );
        let mean = (r + g + b) / 3.0;
        // Population standard deviation
        let variance = ((r - mean).powi(2) + (g - mean).powi(2) + (b - mean).powi(2)) / 3.0;

        Self([
            reading.temperature,
            reading.humidity,
            reading.light,
            r,
            g,
            b,
            mean,
            variance.sqrt(),
            g / (r + EPSILON),
            b / (r + EPSILON),
        ])
    }

    pub fn values(&self) -> &[f64; 10] {
        &self.0
    }

    pub fn rgb_mean(&self) -> f64 {
        self.0[6]
    }

    pub fn rgb_std(&self) -> f64 {
        self.0[7]
    }

    pub fn g_over_r(&self) -> f64 {
        self.0[8]
    }

    pub fn b_over_r(&self) -> f64 {
        self.0[9]
    }

    /// Feature names paired with values, in model order
    pub fn named(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        FEATURE_NAMES.iter().copied().zip(self.0.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn reading(r: u8, g: u8, b: u8) -> SensorReading {
        SensorReading {
            temperature: 31.5,
            humidity: 40.0,
            light: 820.0,
            r,
            g,
            b,
            image: None,
            extra: Map::new(),
        }
    }

    #[test]
    fn test_derived_features() {
        let features = FeatureVector::from_reading(&reading(142, 136, 125));

        assert!((features.rgb_mean() - 134.333_333).abs() < 1e-5);
        assert!((features.g_over_r() - 136.0 / 142.000_001).abs() < 1e-12);
        assert!((features.g_over_r() - 0.9577).abs() < 1e-4);
        assert!((features.b_over_r() - 125.0 / 142.000_001).abs() < 1e-12);
        // sqrt(((142-m)^2 + (136-m)^2 + (125-m)^2) / 3)
        assert!((features.rgb_std() - 7.039_570).abs() < 1e-5);
    }

    #[test]
    fn test_feature_order() {
        let features = FeatureVector::from_reading(&reading(10, 20, 30));
        let values = features.values();

        assert_eq!(values[0], 31.5);
        assert_eq!(values[1], 40.0);
        assert_eq!(values[2], 820.0);
        assert_eq!(&values[3..6], &[10.0, 20.0, 30.0]);
        assert_eq!(values[6], 20.0);

        let names: Vec<_> = features.named().map(|(name, _)| name).collect();
        assert_eq!(names, FEATURE_NAMES.to_vec());
    }

    #[test]
    fn test_zero_red_channel_is_finite() {
        let features = FeatureVector::from_reading(&reading(0, 0, 0));

        assert_eq!(features.g_over_r(), 0.0);
        assert_eq!(features.rgb_std(), 0.0);

        let features = FeatureVector::from_reading(&reading(0, 255, 1));
        assert!(features.g_over_r().is_finite());
        assert!((features.g_over_r() - 255.0 / EPSILON).abs() < 1.0);
    }
}
