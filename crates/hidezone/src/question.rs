//! Questions: the closed set of constraint kinds a seeker can ask.
//!
//! Adding a kind means adding a `QuestionKind` variant; every match over it
//! (engine, codec, canonical ordering) then fails to compile until handled.

use std::cmp::Ordering;
use std::fmt;

use geo::{Destination, Haversine};
use geo_types::Point;

use crate::error::ValidationError;
use crate::region::{Distance, Unit};

/// Radius of a freshly added radius question.
pub const DEFAULT_QUESTION_RADIUS: f64 = 50.0;
/// Distance from A to B of a freshly added thermometer, in meters.
const DEFAULT_THERMOMETER_SPAN_M: f64 = 5_000.0;

/// Stable question identity. Assigned by the store, never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QuestionKey(pub u64);

impl fmt::Display for QuestionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// "The hider is within (or not within) `radius` of `center`."
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RadiusQuestion {
    pub center: Point<f64>,
    pub radius: f64,
    pub unit: Unit,
    /// `true`: inside the disk. `false`: outside it.
    pub within: bool,
}

impl RadiusQuestion {
    #[inline]
    pub fn distance(&self) -> Distance {
        Distance::new(self.radius, self.unit)
    }
}

/// "Moving from A to B, did the seeker get warmer?"
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ThermometerQuestion {
    pub a: Point<f64>,
    pub b: Point<f64>,
    /// `true`: the hider is closer to B than to A. `false`: closer to A.
    pub warmer: bool,
}

impl ThermometerQuestion {
    /// A at `a`, B 5 km due east of it, warmer.
    pub fn starting_at(a: Point<f64>) -> Self {
        Self {
            a,
            b: Haversine::destination(a, 90.0, DEFAULT_THERMOMETER_SPAN_M),
            warmer: true,
        }
    }

    /// (near, far): the hider is at least as close to `near` as to `far`.
    #[inline]
    pub fn near_far(&self) -> (Point<f64>, Point<f64>) {
        if self.warmer {
            (self.b, self.a)
        } else {
            (self.a, self.b)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum QuestionKind {
    Radius(RadiusQuestion),
    Thermometer(ThermometerQuestion),
}

impl QuestionKind {
    /// Radius question with the interactive defaults around `center`.
    pub fn radius_at(center: Point<f64>, unit: Unit) -> Self {
        Self::Radius(RadiusQuestion {
            center,
            radius: DEFAULT_QUESTION_RADIUS,
            unit,
            within: true,
        })
    }

    /// Thermometer from `center` to a point 5 km due east of it.
    pub fn thermometer_at(center: Point<f64>) -> Self {
        Self::Thermometer(ThermometerQuestion::starting_at(center))
    }

    /// Wire tag, shared with the snapshot format.
    pub fn tag(&self) -> &'static str {
        match self {
            QuestionKind::Radius(_) => "radius",
            QuestionKind::Thermometer(_) => "thermometer",
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            QuestionKind::Radius(r) => {
                validate_point(r.center)?;
                if !r.radius.is_finite() {
                    return Err(ValidationError::NonFinite("radius"));
                }
                if r.radius <= 0.0 {
                    return Err(ValidationError::NonPositiveRadius(r.radius));
                }
                Ok(())
            }
            QuestionKind::Thermometer(t) => {
                validate_point(t.a)?;
                validate_point(t.b)?;
                if t.a == t.b {
                    return Err(ValidationError::CoincidentPoints);
                }
                Ok(())
            }
        }
    }

    /// Total order on question contents, independent of keys and insertion.
    ///
    /// Radii compare in meters so equal disks in different units tie.
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        let (ta, pa) = self.canonical_parts();
        let (tb, pb) = other.canonical_parts();
        ta.cmp(&tb).then_with(|| {
            pa.iter()
                .zip(pb.iter())
                .map(|(x, y)| x.total_cmp(y))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        })
    }

    fn canonical_parts(&self) -> (u8, [f64; 5]) {
        match self {
            QuestionKind::Radius(r) => (
                0,
                [
                    r.center.x(),
                    r.center.y(),
                    r.distance().meters(),
                    f64::from(u8::from(r.within)),
                    0.0,
                ],
            ),
            QuestionKind::Thermometer(t) => (
                1,
                [
                    t.a.x(),
                    t.a.y(),
                    t.b.x(),
                    t.b.y(),
                    f64::from(u8::from(t.warmer)),
                ],
            ),
        }
    }
}

/// A question as held by the store.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Question {
    pub key: QuestionKey,
    pub kind: QuestionKind,
}

/// Finite, latitude in [-90, 90], longitude in [-180, 180].
pub fn validate_point(p: Point<f64>) -> Result<(), ValidationError> {
    if !p.y().is_finite() {
        return Err(ValidationError::NonFinite("latitude"));
    }
    if !p.x().is_finite() {
        return Err(ValidationError::NonFinite("longitude"));
    }
    if !(-90.0..=90.0).contains(&p.y()) {
        return Err(ValidationError::LatitudeOutOfRange(p.y()));
    }
    if !(-180.0..=180.0).contains(&p.x()) {
        return Err(ValidationError::LongitudeOutOfRange(p.x()));
    }
    Ok(())
}
