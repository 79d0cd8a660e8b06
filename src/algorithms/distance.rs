//! Log-distance path-loss model converting signal strength to range

use crate::core::{BLUETOOTH_RSSI_AT_ONE_METER, DEFAULT_PATH_LOSS_EXPONENT, WIFI_RSSI_AT_ONE_METER};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Radio technology the readings were captured with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Technology {
    Bluetooth,
    Wifi,
}

impl Technology {
    /// Empirically calibrated signal strength at one meter (dBm)
    pub fn reference_at_one_meter(&self) -> f64 {
        match self {
            Technology::Bluetooth => BLUETOOTH_RSSI_AT_ONE_METER,
            Technology::Wifi => WIFI_RSSI_AT_ONE_METER,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Technology::Bluetooth => "bluetooth",
            Technology::Wifi => "wifi",
        }
    }
}

impl fmt::Display for Technology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Technology {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bluetooth" | "ble" => Ok(Technology::Bluetooth),
            "wifi" | "wlan" => Ok(Technology::Wifi),
            other => Err(format!("unknown technology '{}', expected bluetooth or wifi", other)),
        }
    }
}

/// `10 ^ ((reference - signal) / (10 * exponent))`
///
/// Strictly decreasing in `signal_strength` for a positive exponent, and
/// exactly `1.0` when the signal equals the reference.
pub fn estimate_distance(signal_strength: f64, reference_at_one_meter: f64, path_loss_exponent: f64) -> f64 {
    10_f64.powf((reference_at_one_meter - signal_strength) / (10.0 * path_loss_exponent))
}

/// Path-loss parameters for one run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistanceModel {
    /// Signal strength at one meter (dBm)
    pub reference_at_one_meter: f64,
    /// Attenuation steepness; larger values shrink estimated ranges
    pub path_loss_exponent: f64,
}

impl DistanceModel {
    pub fn new(reference_at_one_meter: f64, path_loss_exponent: f64) -> Self {
        Self {
            reference_at_one_meter,
            path_loss_exponent,
        }
    }

    /// Calibration preset for a technology with the default exponent
    pub fn for_technology(technology: Technology) -> Self {
        Self::new(technology.reference_at_one_meter(), DEFAULT_PATH_LOSS_EXPONENT)
    }

    pub fn with_path_loss_exponent(mut self, exponent: f64) -> Self {
        self.path_loss_exponent = exponent;
        self
    }

    /// Estimated range in meters for a received signal strength
    pub fn distance(&self, signal_strength: f64) -> f64 {
        estimate_distance(signal_strength, self.reference_at_one_meter, self.path_loss_exponent)
    }

    /// Inverse of [`DistanceModel::distance`]
    pub fn signal_at(&self, distance: f64) -> f64 {
        if distance <= 0.0 {
            return f64::INFINITY;
        }
        self.reference_at_one_meter - 10.0 * self.path_loss_exponent * distance.log10()
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.reference_at_one_meter.is_finite() {
            return Err(format!(
                "reference signal strength must be finite, got {}",
                self.reference_at_one_meter
            ));
        }
        if !self.path_loss_exponent.is_finite() || self.path_loss_exponent <= 0.0 {
            return Err(format!(
                "path-loss exponent must be positive, got {}",
                self.path_loss_exponent
            ));
        }
        Ok(())
    }
}

impl Default for DistanceModel {
    fn default() -> Self {
        Self::for_technology(Technology::Bluetooth)
    }
}

impl fmt::Display for DistanceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "path-loss model: {:.2} dBm @ 1 m, n = {:.2}",
            self.reference_at_one_meter, self.path_loss_exponent
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_signal_is_one_meter() {
        for n in [1.0, 2.0, 2.7, 4.0, 6.5] {
            for r in [-47.69767441860465, -34.40682414698163, -60.0, 0.0] {
                assert_eq!(estimate_distance(r, r, n), 1.0);
            }
        }
    }

    #[test]
    fn test_strictly_decreasing_in_signal() {
        let model = DistanceModel::for_technology(Technology::Wifi);
        let mut previous = f64::INFINITY;
        for rssi in -100..=-20 {
            let d = model.distance(rssi as f64);
            assert!(d < previous, "distance not decreasing at {} dBm", rssi);
            previous = d;
        }
    }

    #[test]
    fn test_known_value() {
        // 40 dB below reference with n = 4 is one decade
        let d = estimate_distance(-87.0, -47.0, 4.0);
        assert!((d - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_signal_at_inverts_distance() {
        let model = DistanceModel::for_technology(Technology::Bluetooth).with_path_loss_exponent(2.5);
        for d in [0.5, 1.0, 3.7, 12.0, 40.0] {
            let back = model.distance(model.signal_at(d));
            assert!((back - d).abs() < 1e-9);
        }
    }

    #[test]
    fn test_presets_and_parsing() {
        assert_eq!(DistanceModel::for_technology(Technology::Bluetooth).reference_at_one_meter, BLUETOOTH_RSSI_AT_ONE_METER);
        assert_eq!(DistanceModel::for_technology(Technology::Wifi).reference_at_one_meter, WIFI_RSSI_AT_ONE_METER);
        assert_eq!(DistanceModel::default().path_loss_exponent, 4.0);
        assert_eq!("BLE".parse::<Technology>(), Ok(Technology::Bluetooth));
        assert_eq!("wlan".parse::<Technology>(), Ok(Technology::Wifi));
        assert!("zigbee".parse::<Technology>().is_err());
    }

    #[test]
    fn test_validate() {
        assert!(DistanceModel::default().validate().is_ok());
        assert!(DistanceModel::new(-50.0, 0.0).validate().is_err());
        assert!(DistanceModel::new(f64::NAN, 4.0).validate().is_err());
    }
}
