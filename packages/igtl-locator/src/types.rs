// Common types shared by the locator components

use chrono::{DateTime, Utc};
use nalgebra::{Isometry3, Matrix3, Point3, Rotation3, Translation3, UnitQuaternion};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Prefix of every marker name; the suffix is the stream identifier
pub const MARKER_NAME_PREFIX: &str = "Needle_";

/// Identifier of a pose stream as announced by the device (tracking element name)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the marker that represents this stream in the scene
    pub fn marker_name(&self) -> String {
        format!("{}{}", MARKER_NAME_PREFIX, self.0)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for StreamId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for StreamId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Display colour with unit-interval components
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Rgb {
    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// Build from 8-bit components as delivered by colour pickers
    pub fn from_rgb8(r: u8, g: u8, b: u8) -> Self {
        Self {
            r: r as f32 / 255.0,
            g: g as f32 / 255.0,
            b: b as f32 / 255.0,
        }
    }

    pub fn to_rgb8(self) -> [u8; 3] {
        let scale = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        [scale(self.r), scale(self.g), scale(self.b)]
    }

    pub fn clamped(self) -> Self {
        Self {
            r: self.r.clamp(0.0, 1.0),
            g: self.g.clamp(0.0, 1.0),
            b: self.b.clamp(0.0, 1.0),
        }
    }
}

/// Kind of tracked instrument reported in a TDATA element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentType {
    Tracker,
    SixDof,
    ThreeDof,
    FiveDof,
    Unknown(u8),
}

impl From<u8> for InstrumentType {
    fn from(value: u8) -> Self {
        match value {
            1 => InstrumentType::Tracker,
            2 => InstrumentType::SixDof,
            3 => InstrumentType::ThreeDof,
            5 => InstrumentType::FiveDof,
            other => InstrumentType::Unknown(other),
        }
    }
}

impl From<InstrumentType> for u8 {
    fn from(value: InstrumentType) -> Self {
        match value {
            InstrumentType::Tracker => 1,
            InstrumentType::SixDof => 2,
            InstrumentType::ThreeDof => 3,
            InstrumentType::FiveDof => 5,
            InstrumentType::Unknown(other) => other,
        }
    }
}

/// Latest pose of a tracked stream
#[derive(Debug, Clone, PartialEq)]
pub struct Pose {
    pub transform: Isometry3<f64>,
    pub instrument: InstrumentType,
    pub received_at: DateTime<Utc>,
}

impl Pose {
    pub fn new(transform: Isometry3<f64>, instrument: InstrumentType) -> Self {
        Self {
            transform,
            instrument,
            received_at: Utc::now(),
        }
    }

    pub fn from_translation(x: f64, y: f64, z: f64) -> Self {
        Self::new(
            Isometry3::from_parts(Translation3::new(x, y, z), UnitQuaternion::identity()),
            InstrumentType::SixDof,
        )
    }

    /// Build from the OpenIGTLink 3x4 layout `r11 r21 r31 r12 r22 r32 r13 r23 r33 tx ty tz`
    pub fn from_igtl_matrix(m: &[f32; 12], instrument: InstrumentType) -> Self {
        let rotation = Matrix3::new(
            m[0] as f64, m[3] as f64, m[6] as f64,
            m[1] as f64, m[4] as f64, m[7] as f64,
            m[2] as f64, m[5] as f64, m[8] as f64,
        );
        let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(rotation));
        let translation = Translation3::new(m[9] as f64, m[10] as f64, m[11] as f64);
        Self::new(Isometry3::from_parts(translation, rotation), instrument)
    }

    /// Inverse of [`Pose::from_igtl_matrix`]
    pub fn to_igtl_matrix(&self) -> [f32; 12] {
        let r = self.transform.rotation.to_rotation_matrix();
        let r = r.matrix();
        let t = &self.transform.translation.vector;
        [
            r[(0, 0)] as f32, r[(1, 0)] as f32, r[(2, 0)] as f32,
            r[(0, 1)] as f32, r[(1, 1)] as f32, r[(2, 1)] as f32,
            r[(0, 2)] as f32, r[(1, 2)] as f32, r[(2, 2)] as f32,
            t.x as f32, t.y as f32, t.z as f32,
        ]
    }

    pub fn position(&self) -> Point3<f64> {
        Point3::from(self.transform.translation.vector)
    }
}

/// Handle of a marker node owned by the scene collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerRef(pub u64);

/// Handle of a marker's display sub-object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DisplayRef(pub u64);

impl fmt::Display for MarkerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "marker#{}", self.0)
    }
}

/// Locator shape handed to the scene: a shaft with a spherical tip at the origin.
/// The shaft is rotated 90 degrees about X and extends along +Z from the tip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkerGeometry {
    pub shaft_radius: f64,
    pub shaft_length: f64,
    pub tip_radius: f64,
}

impl Default for MarkerGeometry {
    fn default() -> Self {
        Self {
            shaft_radius: 1.5,
            shaft_length: 100.0,
            tip_radius: 3.0,
        }
    }
}

/// Events marshaled from the I/O task (and the scene) onto the owning bridge
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    StreamAnnounced(StreamId),
    StreamRemoved(StreamId),
    PoseUpdated { stream: StreamId, pose: Pose },
    /// A marker was removed from the scene by someone other than the bridge
    MarkerRemoved(MarkerRef),
    /// The device link dropped without a stop request
    ConnectionLost,
}
