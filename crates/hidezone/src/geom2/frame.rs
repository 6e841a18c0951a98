//! Gnomonic tangent frame around a point on the unit sphere.
//!
//! A point `p` at angle < 90° from the centre `u` maps to
//! `(p·e, p·n) / (p·u)`, with `e`/`n` the local east/north unit vectors.
//! Great circles map to straight lines, so the set of points equally far
//! from two references (itself a great circle) is a half-plane boundary.

use geo_types::Point;
use nalgebra::{Vector2, Vector3};

use super::types::Hs2;

/// Points at or beyond this cosine from the centre have no image.
const MIN_COS: f64 = 1e-6;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocalFrame {
    center: Vector3<f64>,
    east: Vector3<f64>,
    north: Vector3<f64>,
}

/// Unit vector of a lng/lat point (degrees).
fn unit_vector(p: Point<f64>) -> Vector3<f64> {
    let (lng, lat) = (p.x().to_radians(), p.y().to_radians());
    Vector3::new(lat.cos() * lng.cos(), lat.cos() * lng.sin(), lat.sin())
}

impl LocalFrame {
    pub fn new(origin: Point<f64>) -> Self {
        let center = unit_vector(origin);
        let east = Vector3::z().cross(&center);
        // At a pole any horizontal direction serves as east.
        let east = if east.norm() > 1e-12 {
            east.normalize()
        } else {
            Vector3::y()
        };
        let north = center.cross(&east);
        Self {
            center,
            east,
            north,
        }
    }

    /// `None` for points 90° or more from the centre.
    pub fn project(&self, p: Point<f64>) -> Option<Vector2<f64>> {
        let v = unit_vector(p);
        let d = v.dot(&self.center);
        if d < MIN_COS {
            return None;
        }
        Some(Vector2::new(v.dot(&self.east) / d, v.dot(&self.north) / d))
    }

    pub fn unproject(&self, v: Vector2<f64>) -> Point<f64> {
        let w = (self.center + self.east * v.x + self.north * v.y).normalize();
        Point::new(
            w.y.atan2(w.x).to_degrees(),
            w.z.clamp(-1.0, 1.0).asin().to_degrees(),
        )
    }

    /// Points on the visible hemisphere at least as close (great-circle
    /// distance) to `near` as to `far`, as `n·x <= c` in frame coordinates.
    ///
    /// `p·near >= p·far` on the sphere; with `p ∝ u + x e + y n` this is linear
    /// in `(x, y)`. The normal is zero when the bisector is the frame's horizon.
    /// Returns `None` when `near` and `far` coincide.
    pub fn nearer_to(&self, near: Point<f64>, far: Point<f64>) -> Option<Hs2> {
        let d = unit_vector(far) - unit_vector(near);
        if !(d.norm() > 1e-15) {
            return None;
        }
        Some(Hs2::new(
            Vector2::new(d.dot(&self.east), d.dot(&self.north)),
            -d.dot(&self.center),
        ))
    }
}
