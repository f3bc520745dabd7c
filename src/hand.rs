//! Per-frame hand observations as produced by the upstream pose estimator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const LANDMARK_COUNT: usize = 21;

pub const WRIST: usize = 0;
pub const THUMB_TIP: usize = 4;
pub const INDEX_MCP: usize = 5;
pub const INDEX_TIP: usize = 8;
pub const MIDDLE_MCP: usize = 9;
pub const MIDDLE_TIP: usize = 12;
pub const RING_MCP: usize = 13;
pub const RING_TIP: usize = 16;
pub const PINKY_MCP: usize = 17;
pub const PINKY_TIP: usize = 20;

/// Index, middle, ring, pinky.
pub const FINGER_TIPS: [usize; 4] = [INDEX_TIP, MIDDLE_TIP, RING_TIP, PINKY_TIP];
pub const FINGER_MCPS: [usize; 4] = [INDEX_MCP, MIDDLE_MCP, RING_MCP, PINKY_MCP];

const PALM: [usize; 5] = [WRIST, INDEX_MCP, MIDDLE_MCP, RING_MCP, PINKY_MCP];

/// Frame-space position, pixels.
pub type Point = (f64, f64);

#[derive(Debug, Error, PartialEq)]
pub enum HandError {
    #[error("expected {expected} landmarks, got {got}")]
    LandmarkCount { expected: usize, got: usize },
    #[error("landmark {index} has a non-finite coordinate")]
    NonFinite { index: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarkPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl LandmarkPoint {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn xy(&self) -> Point {
        (self.x, self.y)
    }

    /// Planar (x, y) distance; depth is ignored.
    pub fn distance(&self, other: &LandmarkPoint) -> f64 {
        distance(self.xy(), other.xy())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Handedness {
    Left,
    #[default]
    Right,
}

/// Identity the upstream detector attaches to an observation. Only meaningful
/// within the detector's own notion of "same hand"; it is not re-derived from
/// appearance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandId(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub struct HandObservation {
    pub id: HandId,
    pub handedness: Handedness,
    landmarks: [LandmarkPoint; LANDMARK_COUNT],
}

impl HandObservation {
    /// Validates shape and finiteness; a frame carrying anything else is rejected.
    pub fn new(
        id: HandId,
        handedness: Handedness,
        landmarks: Vec<LandmarkPoint>,
    ) -> Result<Self, HandError> {
        let got = landmarks.len();
        let landmarks: [LandmarkPoint; LANDMARK_COUNT] =
            landmarks.try_into().map_err(|_| HandError::LandmarkCount {
                expected: LANDMARK_COUNT,
                got,
            })?;
        if let Some(index) = landmarks
            .iter()
            .position(|p| !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()))
        {
            return Err(HandError::NonFinite { index });
        }
        Ok(Self {
            id,
            handedness,
            landmarks,
        })
    }

    pub fn landmark(&self, index: usize) -> &LandmarkPoint {
        &self.landmarks[index]
    }

    pub fn index_tip(&self) -> Point {
        self.landmarks[INDEX_TIP].xy()
    }

    /// Wrist to middle fingertip; stands in for distance from the camera.
    pub fn scale(&self) -> f64 {
        self.landmarks[WRIST].distance(&self.landmarks[MIDDLE_TIP])
    }

    /// Mean of wrist and the four knuckles.
    pub fn palm_centroid(&self) -> Point {
        let n = PALM.len() as f64;
        let (sx, sy) = PALM.iter().fold((0.0, 0.0), |(sx, sy), &i| {
            (sx + self.landmarks[i].x, sy + self.landmarks[i].y)
        });
        (sx / n, sy / n)
    }

    pub fn with_id(mut self, id: HandId) -> Self {
        self.id = id;
        self
    }
}

pub fn distance(a: Point, b: Point) -> f64 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    (dx * dx + dy * dy).sqrt()
}

/// Test fixture: 21 zeroed landmarks with selected ones overwritten.
#[cfg(test)]
pub fn hand_with(id: u64, points: &[(usize, f64, f64)]) -> HandObservation {
    let mut lm = vec![LandmarkPoint::default(); LANDMARK_COUNT];
    for &(i, x, y) in points {
        lm[i] = LandmarkPoint::new(x, y, 0.0);
    }
    HandObservation::new(HandId(id), Handedness::Right, lm).unwrap()
}
