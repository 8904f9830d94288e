//! Stereo gain model for positional voice.
//!
//! Listener and sources live on a flat 2D plane. [`compute_stereo_gain`] turns
//! the offset between them into a pair of per-ear gains; [`SpatialChannel`]
//! applies those gains to a live output.

mod channel;

pub use channel::{SpatialChannel, StereoSink};

use serde::{Deserialize, Serialize};

/// Point on the shared plane.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Position) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }

    /// Clamp both coordinates into `[-radius, radius]`. The sign of `radius`
    /// is ignored; a NaN or infinite radius leaves the position unchanged.
    pub fn clamped(self, radius: f64) -> Self {
        let radius = radius.abs();
        if !radius.is_finite() {
            return self;
        }
        Self {
            x: self.x.clamp(-radius, radius),
            y: self.y.clamp(-radius, radius),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// The three distances that shape the falloff curve.
///
/// Inside `near` both ears get full volume. Between `near` and `far` the
/// field blends from full volume toward the directional split. Between `far`
/// and `cutoff` the directional split fades out, and beyond `cutoff` the
/// source is silent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GainRadii {
    pub near: f64,
    pub far: f64,
    pub cutoff: f64,
}

impl GainRadii {
    pub const DEFAULT_NEAR: f64 = 30.0;
    pub const DEFAULT_FAR: f64 = 70.0;
    pub const DEFAULT_CUTOFF: f64 = 95.0;

    /// Returns `None` unless `0 <= near < far < cutoff`.
    pub fn new(near: f64, far: f64, cutoff: f64) -> Option<Self> {
        let ordered = near >= 0.0 && near < far && far < cutoff && cutoff.is_finite();
        ordered.then_some(Self { near, far, cutoff })
    }
}

impl Default for GainRadii {
    fn default() -> Self {
        Self {
            near: Self::DEFAULT_NEAR,
            far: Self::DEFAULT_FAR,
            cutoff: Self::DEFAULT_CUTOFF,
        }
    }
}

/// Per-ear gain, each component in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StereoGain {
    pub left: f64,
    pub right: f64,
}

impl StereoGain {
    pub const SILENT: StereoGain = StereoGain {
        left: 0.0,
        right: 0.0,
    };
    pub const FULL: StereoGain = StereoGain {
        left: 1.0,
        right: 1.0,
    };

    pub fn new(left: f64, right: f64) -> Self {
        Self {
            left: clamp_unit(left),
            right: clamp_unit(right),
        }
    }

    pub fn is_silent(&self) -> bool {
        self.left == 0.0 && self.right == 0.0
    }
}

/// Compute the gain a listener hears from a source.
///
/// Pure function of the two positions and the radii. Sources on the listener's
/// negative x side favor the left ear; sources straight along y are centered.
pub fn compute_stereo_gain(listener: Position, source: Position, radii: &GainRadii) -> StereoGain {
    let dx = source.x - listener.x;
    let dy = source.y - listener.y;
    let dist = dx.hypot(dy);

    if !dist.is_finite() || dist > radii.cutoff {
        return StereoGain::SILENT;
    }
    if dist < radii.near {
        return StereoGain::FULL;
    }

    let theta = dy.atan2(dx);
    let (sin, cos) = theta.sin_cos();
    let sin_sq = sin * sin;
    let left = if cos < 0.0 { cos * cos } else { 0.0 } + sin_sq;
    let right = if cos > 0.0 { cos * cos } else { 0.0 } + sin_sq;

    if dist < radii.far {
        let blend = (dist - radii.near) / (radii.far - radii.near);
        return StereoGain::new(
            blend * left + (1.0 - blend),
            blend * right + (1.0 - blend),
        );
    }

    let fade = 1.0 - (dist - radii.far) / (radii.cutoff - radii.far);
    StereoGain::new(left * fade, right * fade)
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
