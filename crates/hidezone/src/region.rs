//! Geographic regions: disks, bisector half-planes and the Candidate Region.
//!
//! Coordinates are `geo_types::Point<f64>` with x = longitude and
//! y = latitude. Distances follow the Haversine model; thermometer sides are
//! bounded by the equidistant great circle, built as a half-plane in a
//! gnomonic [`LocalFrame`]. No antimeridian wrapping is attempted.

use geo::{
    Area, BooleanOps, BoundingRect, ChamberlainDuquetteArea, Contains, Destination, Haversine,
    Intersects,
};
use geo_types::{coord, LineString, MultiPolygon, Point, Polygon, Rect};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::geom2::{GeomCfg, HalfspaceIntersection, LocalFrame, Poly2};

/// Parts smaller than this (in squared degrees) are numeric debris.
const AREA_EPS: f64 = 1e-14;

const MIN_STEPS: usize = 8;

/// Distance unit declared per question and for the hiding radius.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Meters,
    #[default]
    Kilometers,
    Miles,
}

impl Unit {
    #[inline]
    pub fn meters_per_unit(self) -> f64 {
        match self {
            Unit::Meters => 1.0,
            Unit::Kilometers => 1_000.0,
            Unit::Miles => 1_609.344,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Unit::Meters => "meters",
            Unit::Kilometers => "kilometers",
            Unit::Miles => "miles",
        }
    }
}

impl std::str::FromStr for Unit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "meters" | "m" => Ok(Unit::Meters),
            "kilometers" | "km" => Ok(Unit::Kilometers),
            "miles" | "mi" => Ok(Unit::Miles),
            other => Err(format!("unknown unit {other:?}")),
        }
    }
}

/// A length with its unit.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Distance {
    pub value: f64,
    pub unit: Unit,
}

impl Distance {
    #[inline]
    pub fn new(value: f64, unit: Unit) -> Self {
        Self { value, unit }
    }

    #[inline]
    pub fn kilometers(value: f64) -> Self {
        Self::new(value, Unit::Kilometers)
    }

    #[inline]
    pub fn meters(&self) -> f64 {
        self.value * self.unit.meters_per_unit()
    }
}

/// Axis-aligned bounding box in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub min_lng: f64,
    pub min_lat: f64,
    pub max_lng: f64,
    pub max_lat: f64,
}

impl BBox {
    pub fn new(min_lng: f64, min_lat: f64, max_lng: f64, max_lat: f64) -> Self {
        Self {
            min_lng,
            min_lat,
            max_lng,
            max_lat,
        }
    }

    pub fn from_rect(rect: Rect<f64>) -> Self {
        Self::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }

    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            coord! { x: self.min_lng, y: self.min_lat },
            coord! { x: self.max_lng, y: self.max_lat },
        )
    }

    /// Grow by `margin` degrees on every side.
    pub fn expand(&self, margin: f64) -> Self {
        Self::new(
            self.min_lng - margin,
            self.min_lat - margin,
            self.max_lng + margin,
            self.max_lat + margin,
        )
    }

    pub fn union(&self, other: &BBox) -> Self {
        Self::new(
            self.min_lng.min(other.min_lng),
            self.min_lat.min(other.min_lat),
            self.max_lng.max(other.max_lng),
            self.max_lat.max(other.max_lat),
        )
    }

    pub fn center(&self) -> Point<f64> {
        Point::new(
            (self.min_lng + self.max_lng) * 0.5,
            (self.min_lat + self.max_lat) * 0.5,
        )
    }

    /// `steps` points along each side, counterclockwise from the south-west corner.
    fn boundary(&self, steps: usize) -> impl Iterator<Item = Point<f64>> + '_ {
        let corners = [
            (self.min_lng, self.min_lat),
            (self.max_lng, self.min_lat),
            (self.max_lng, self.max_lat),
            (self.min_lng, self.max_lat),
        ];
        (0..4).flat_map(move |i| {
            let (x0, y0) = corners[i];
            let (x1, y1) = corners[(i + 1) % 4];
            (0..steps).map(move |k| {
                let t = k as f64 / steps as f64;
                Point::new(x0 + (x1 - x0) * t, y0 + (y1 - y0) * t)
            })
        })
    }

    pub fn contains_point(&self, p: Point<f64>) -> bool {
        p.x() >= self.min_lng && p.x() <= self.max_lng && p.y() >= self.min_lat && p.y() <= self.max_lat
    }
}

/// Geodesic disk approximated by `cfg.circle_steps` Haversine destinations.
///
/// Vertices sit on the circle, so the polygon lies inside the disk. Use it
/// where the region must stay within the disk.
pub fn disk(center: Point<f64>, radius: Distance, cfg: &GeomCfg) -> Polygon<f64> {
    ring_at(center, radius.meters(), cfg.circle_steps.max(MIN_STEPS))
}

/// Polygon containing the whole disk: vertices are pushed out so that every
/// edge midpoint sits on the circle. Use it where the disk is removed.
pub fn disk_enclosing(center: Point<f64>, radius: Distance, cfg: &GeomCfg) -> Polygon<f64> {
    let steps = cfg.circle_steps.max(MIN_STEPS);
    let half_step = std::f64::consts::PI / steps as f64;
    ring_at(center, radius.meters() / half_step.cos(), steps)
}

fn ring_at(center: Point<f64>, meters: f64, steps: usize) -> Polygon<f64> {
    let ring: Vec<_> = (0..steps)
        .map(|k| {
            let bearing = 360.0 * (k as f64) / (steps as f64);
            Haversine::destination(center, bearing, meters).0
        })
        .collect();
    Polygon::new(LineString::new(ring), vec![])
}

/// Part of (a cover of) `bounds` at least as close to `near` as to `far`,
/// by great-circle distance.
///
/// The boundary is the equidistant great circle, traced with
/// `cfg.circle_steps` segments per edge. Returns `None` when `near` and
/// `far` coincide or `bounds` reaches 90° from its own centre.
pub fn half_plane(
    near: Point<f64>,
    far: Point<f64>,
    bounds: &BBox,
    cfg: &GeomCfg,
) -> Option<CandidateRegion> {
    let frame = LocalFrame::new(bounds.center());
    let cut = frame.nearer_to(near, far)?;
    let steps = cfg.circle_steps.max(MIN_STEPS);
    let (mut lo, mut hi) = (Vector2::repeat(f64::INFINITY), Vector2::repeat(f64::NEG_INFINITY));
    for p in bounds.boundary(steps) {
        let v = frame.project(p)?;
        lo = lo.inf(&v);
        hi = hi.sup(&v);
    }
    let Some(cut) = cut.normalized() else {
        // The bisector is the frame's horizon: the whole visible side agrees.
        return Some(if cut.c >= 0.0 {
            CandidateRegion::from_polygon(bounds.to_rect().to_polygon())
        } else {
            CandidateRegion::empty()
        });
    };
    let pad = (hi - lo) * 0.05 + Vector2::repeat(1e-9);
    let clipped = Poly2::rect(lo - pad, hi + pad).with_cut(cut);
    let region = match clipped.clip(cfg) {
        HalfspaceIntersection::Bounded(verts) => {
            let m = verts.len();
            let ring: Vec<_> = (0..m)
                .flat_map(|i| {
                    let (from, to) = (verts[i], verts[(i + 1) % m]);
                    (0..steps).map(move |k| from + (to - from) * (k as f64 / steps as f64))
                })
                .map(|v| frame.unproject(v).0)
                .collect();
            CandidateRegion::from_polygon(Polygon::new(LineString::new(ring), vec![]))
        }
        // The box is bounded, so anything else means the cut misses it.
        HalfspaceIntersection::Empty | HalfspaceIntersection::Unbounded => {
            CandidateRegion::empty()
        }
    };
    Some(region)
}

/// Set of locations consistent with every constraint and exclusion.
///
/// Possibly multi-part, possibly with holes, possibly empty. The empty region
/// is a meaningful value: no location satisfies the constraints.
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateRegion(MultiPolygon<f64>);

impl Default for CandidateRegion {
    fn default() -> Self {
        Self::empty()
    }
}

impl CandidateRegion {
    pub fn empty() -> Self {
        Self(MultiPolygon::new(vec![]))
    }

    pub fn from_polygon(polygon: Polygon<f64>) -> Self {
        Self::from_multi(MultiPolygon::new(vec![polygon]))
    }

    /// Wrap boolean-op output, dropping parts without positive area.
    pub fn from_multi(mp: MultiPolygon<f64>) -> Self {
        let parts: Vec<_> = mp
            .0
            .into_iter()
            .filter(|p| p.unsigned_area() > AREA_EPS)
            .collect();
        Self(MultiPolygon::new(parts))
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 .0.is_empty()
    }

    #[inline]
    pub fn as_multi_polygon(&self) -> &MultiPolygon<f64> {
        &self.0
    }

    #[inline]
    pub fn into_multi_polygon(self) -> MultiPolygon<f64> {
        self.0
    }

    pub fn part_count(&self) -> usize {
        self.0 .0.len()
    }

    pub fn intersect(&self, other: &CandidateRegion) -> Self {
        if self.is_empty() || other.is_empty() {
            return Self::empty();
        }
        Self::from_multi(self.0.intersection(&other.0))
    }

    pub fn intersect_polygon(&self, polygon: &Polygon<f64>) -> Self {
        if self.is_empty() {
            return Self::empty();
        }
        Self::from_multi(self.0.intersection(polygon))
    }

    pub fn subtract(&self, other: &CandidateRegion) -> Self {
        if self.is_empty() || other.is_empty() {
            return self.clone();
        }
        Self::from_multi(self.0.difference(&other.0))
    }

    pub fn subtract_polygon(&self, polygon: &Polygon<f64>) -> Self {
        if self.is_empty() {
            return Self::empty();
        }
        Self::from_multi(self.0.difference(polygon))
    }

    pub fn union(&self, other: &CandidateRegion) -> Self {
        if self.is_empty() {
            return other.clone();
        }
        if other.is_empty() {
            return self.clone();
        }
        Self::from_multi(self.0.union(&other.0))
    }

    /// Union of many polygons, folded in the given order.
    pub fn union_all<'a>(polygons: impl IntoIterator<Item = &'a Polygon<f64>>) -> Self {
        polygons.into_iter().fold(Self::empty(), |acc, p| {
            if acc.is_empty() {
                Self::from_polygon(p.clone())
            } else {
                Self::from_multi(acc.0.union(p))
            }
        })
    }

    pub fn contains(&self, p: Point<f64>) -> bool {
        self.0.contains(&p)
    }

    pub fn intersects_polygon(&self, polygon: &Polygon<f64>) -> bool {
        !self.is_empty() && self.0.intersects(polygon)
    }

    pub fn bbox(&self) -> Option<BBox> {
        self.0.bounding_rect().map(BBox::from_rect)
    }

    /// Planar area in squared degrees; only meaningful for comparisons.
    pub fn area(&self) -> f64 {
        self.0.unsigned_area()
    }

    pub fn geodesic_area_km2(&self) -> f64 {
        self.0.chamberlain_duquette_unsigned_area() / 1e6
    }

    /// Area of `self` outside `other`, in squared degrees.
    pub fn area_outside(&self, other: &CandidateRegion) -> f64 {
        self.subtract(other).area()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Distance as _, Haversine as H};
    use proptest::prelude::*;

    fn amsterdam() -> Point<f64> {
        Point::new(4.89, 52.37)
    }

    #[test]
    fn disk_vertices_sit_on_the_radius() {
        let cfg = GeomCfg::default();
        let d = disk(amsterdam(), Distance::kilometers(5.0), &cfg);
        assert_eq!(d.exterior().0.len(), cfg.circle_steps + 1);
        for c in d.exterior().points() {
            let meters = H::distance(amsterdam(), c);
            assert!((meters - 5_000.0).abs() < 1.0, "vertex at {meters} m");
        }
    }

    #[test]
    fn enclosing_disk_covers_points_between_vertices() {
        let cfg = GeomCfg::default();
        let outer = CandidateRegion::from_polygon(disk_enclosing(amsterdam(), Distance::kilometers(5.0), &cfg));
        let inner = CandidateRegion::from_polygon(disk(amsterdam(), Distance::kilometers(5.0), &cfg));
        let half_step = 180.0 / cfg.circle_steps as f64;
        for k in 0..cfg.circle_steps {
            let bearing = half_step * (2 * k + 1) as f64;
            let p = Haversine::destination(amsterdam(), bearing, 4_995.0);
            assert!(H::distance(amsterdam(), p) < 5_000.0);
            assert!(outer.contains(p), "bearing {bearing} uncovered");
        }
        assert!(inner.area_outside(&outer) < 1e-10);
        assert!(outer.area() > inner.area());
    }

    #[test]
    fn units_convert_to_meters() {
        assert_eq!(Distance::new(2.0, Unit::Meters).meters(), 2.0);
        assert_eq!(Distance::kilometers(0.5).meters(), 500.0);
        assert!((Distance::new(1.0, Unit::Miles).meters() - 1609.344).abs() < 1e-9);
        assert_eq!("km".parse::<Unit>(), Ok(Unit::Kilometers));
        assert!("furlongs".parse::<Unit>().is_err());
    }

    #[test]
    fn half_plane_keeps_the_near_side() {
        let cfg = GeomCfg::default();
        let bounds = BBox::new(4.0, 52.0, 6.0, 53.0);
        let a = Point::new(4.5, 52.5);
        let b = Point::new(5.5, 52.5);
        let hp = half_plane(a, b, &bounds, &cfg).unwrap();
        assert!(hp.contains(Point::new(4.2, 52.8)));
        assert!(!hp.contains(Point::new(5.8, 52.2)));
        // Equidistant from two points on one parallel is their middle meridian.
        let full = CandidateRegion::from_polygon(bounds.to_rect().to_polygon());
        let west = BBox::new(4.0, 52.0, 5.0, 53.0).to_rect().to_polygon();
        assert!((hp.intersect(&full).area() - full.area() / 2.0).abs() < 1e-6);
        assert!(hp.intersect(&full).subtract_polygon(&west).area() < 1e-6);
    }

    #[test]
    fn half_plane_missing_the_bounds_is_empty() {
        let cfg = GeomCfg::default();
        let bounds = BBox::new(4.0, 52.0, 5.0, 53.0);
        // Bisector at lng 10, far east of the box; near side is the east.
        let hp = half_plane(Point::new(11.0, 52.5), Point::new(9.0, 52.5), &bounds, &cfg).unwrap();
        assert!(hp.is_empty());
        assert!(half_plane(amsterdam(), amsterdam(), &bounds, &cfg).is_none());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn half_plane_follows_great_circle_distance(
            (ax, ay) in (4.2f64..5.6, 52.0f64..52.8),
            (bx, by) in (4.2f64..5.6, 52.0f64..52.8),
        ) {
            let (a, b) = (Point::new(ax, ay), Point::new(bx, by));
            prop_assume!(H::distance(a, b) > 100.0);
            let cfg = GeomCfg::default();
            let bounds = BBox::new(4.0, 51.9, 5.8, 52.9);
            let hp = half_plane(a, b, &bounds, &cfg).unwrap();
            for i in 0..=12 {
                for j in 0..=12 {
                    let p = Point::new(4.0 + 0.15 * i as f64, 51.9 + j as f64 / 12.0);
                    let (to_a, to_b) = (H::distance(p, a), H::distance(p, b));
                    if hp.contains(p) {
                        prop_assert!(to_a <= to_b + 2.0, "kept {p:?}: {to_a} vs {to_b}");
                    } else {
                        prop_assert!(to_b <= to_a + 2.0, "dropped {p:?}: {to_a} vs {to_b}");
                    }
                }
            }
        }
    }

    #[test]
    fn boolean_ops_short_circuit_on_empty() {
        let cfg = GeomCfg::default();
        let d = CandidateRegion::from_polygon(disk(amsterdam(), Distance::kilometers(1.0), &cfg));
        let e = CandidateRegion::empty();
        assert!(e.intersect(&d).is_empty());
        assert_eq!(d.subtract(&e), d);
        assert_eq!(e.union(&d), d);
        assert!(d.subtract(&d).is_empty());
        assert!(e.bbox().is_none());
    }

    #[test]
    fn hole_removes_the_center() {
        let cfg = GeomCfg::default();
        let outer = CandidateRegion::from_polygon(disk(amsterdam(), Distance::kilometers(5.0), &cfg));
        let ring = outer.subtract_polygon(&disk(amsterdam(), Distance::kilometers(1.0), &cfg));
        assert!(!ring.contains(amsterdam()));
        assert!(ring.contains(Point::new(4.89, 52.395)));
        assert!(ring.area() < outer.area());
        let km2 = outer.geodesic_area_km2();
        assert!((km2 - std::f64::consts::PI * 25.0).abs() < 1.0, "area {km2}");
    }
}
