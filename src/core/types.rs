//! Core data types for the positioning pipeline

use serde::{Deserialize, Serialize};
use std::fmt;

/// Planar coordinates in meters
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point
    pub fn distance_to(&self, other: &Point2) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Fixed receiver recording signal strength of detected transmissions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sniffer {
    pub id: String,
    pub position: Point2,
}

impl Sniffer {
    pub fn new(id: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            id: id.into(),
            position: Point2::new(x, y),
        }
    }
}

/// One detected transmission at one sniffer, as produced by a decoder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    pub transmitter_id: String,
    /// Sequence number, or coarse time bucket where the radio has none
    pub token: i64,
    pub sniffer_id: String,
    /// Received signal strength (dBm)
    pub signal_strength: i32,
}

impl Reading {
    pub fn new(
        transmitter_id: impl Into<String>,
        token: i64,
        sniffer_id: impl Into<String>,
        signal_strength: i32,
    ) -> Self {
        Self {
            transmitter_id: transmitter_id.into(),
            token,
            sniffer_id: sniffer_id.into(),
            signal_strength,
        }
    }

    /// Key under which this reading is correlated with other sniffers
    pub fn key(&self) -> CorrelationKey {
        CorrelationKey {
            transmitter_id: self.transmitter_id.clone(),
            token: self.token,
        }
    }
}

/// Identifies one transmission event across independent sniffers
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationKey {
    pub transmitter_id: String,
    pub token: i64,
}

impl CorrelationKey {
    pub fn new(transmitter_id: impl Into<String>, token: i64) -> Self {
        Self {
            transmitter_id: transmitter_id.into(),
            token,
        }
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.transmitter_id, self.token)
    }
}

/// Range circle around a sniffer, derived at solve time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceEstimate {
    pub sniffer_position: Point2,
    pub distance: f64,
}

impl DistanceEstimate {
    pub fn new(sniffer_position: Point2, distance: f64) -> Self {
        Self {
            sniffer_position,
            distance,
        }
    }
}

/// Unfiltered solver output for one observation set
pub type PositionEstimate = Point2;

/// Position that passed the result filter; the only externally visible output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidatedPosition {
    pub x: f64,
    pub y: f64,
}

impl ValidatedPosition {
    pub fn as_pair(&self) -> [f64; 2] {
        [self.x, self.y]
    }
}

impl From<ValidatedPosition> for Point2 {
    fn from(p: ValidatedPosition) -> Self {
        Point2::new(p.x, p.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_distance() {
        let a = Point2::new(0.0, 0.0);
        let b = Point2::new(3.0, 4.0);
        assert_eq!(a.distance_to(&b), 5.0);
    }

    #[test]
    fn test_reading_key() {
        let reading = Reading::new("aa:bb:cc:dd:ee:ff", 1700000000, "s1", -60);
        let key = reading.key();
        assert_eq!(key, CorrelationKey::new("aa:bb:cc:dd:ee:ff", 1700000000));
        assert_eq!(key.to_string(), "aa:bb:cc:dd:ee:ff@1700000000");
    }
}
