//! Geometry Engine: base area plus questions in, Candidate Region out.
//!
//! Purpose
//! - `reduce` is a pure function of its inputs. The session calls it on every
//!   change; nothing here holds state between calls.
//! - `schedule` hands out generation tokens so that late results computed for
//!   an older state can be recognised and dropped.
//!
//! Code cross-refs: `region::{disk, half_plane, CandidateRegion}`,
//! `question::QuestionKind::canonical_cmp`

mod reduce;
mod schedule;

pub use reduce::{reduce, reduce_sorted};
pub use schedule::{Generation, Scheduler};

use geo::{Area, BooleanOps};
use geo_types::{MultiPolygon, Point, Polygon};
use serde_json::{json, Map, Value};

use crate::error::EngineError;
use crate::geom2::GeomCfg;
use crate::question::validate_point;
use crate::region::{disk, CandidateRegion, Distance};

/// Engine knobs. `Default` is what the session uses.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EngineCfg {
    pub geom: GeomCfg,
    /// Radius applied to a zone base area when none is given.
    pub default_zone_radius: Distance,
}

impl Default for EngineCfg {
    fn default() -> Self {
        Self {
            geom: GeomCfg::default(),
            default_zone_radius: Distance::kilometers(50.0),
        }
    }
}

/// Property keys the snapshot codec writes next to location metadata.
pub const RESERVED_PROPERTIES: [&str; 4] =
    ["isHidingZone", "questions", "zoneRadius", "zoneRadiusUnits"];

/// A named place with arbitrary metadata (name, osm_id, extent, ...).
///
/// Metadata never holds a [`RESERVED_PROPERTIES`] key.
#[derive(Clone, Debug, PartialEq)]
pub struct Location {
    pub point: Point<f64>,
    properties: Map<String, Value>,
}

impl Location {
    pub fn new(point: Point<f64>) -> Self {
        Self {
            point,
            properties: Map::new(),
        }
    }

    /// Location with `properties`, minus any reserved key.
    pub fn with_properties(point: Point<f64>, mut properties: Map<String, Value>) -> Self {
        for key in RESERVED_PROPERTIES {
            properties.remove(key);
        }
        Self { point, properties }
    }

    pub fn named(point: Point<f64>, name: &str) -> Self {
        let mut loc = Self::new(point);
        loc.set_property("name", Value::String(name.to_string()));
        loc
    }

    /// Set one metadata entry. Returns `false` (and stores nothing) for a
    /// reserved key.
    pub fn set_property(&mut self, key: &str, value: Value) -> bool {
        if RESERVED_PROPERTIES.contains(&key) {
            return false;
        }
        self.properties.insert(key.to_string(), value);
        true
    }

    #[inline]
    pub fn properties(&self) -> &Map<String, Value> {
        &self.properties
    }

    pub fn name(&self) -> Option<&str> {
        self.properties.get("name").and_then(Value::as_str)
    }
}

/// Starting region before any question applies.
#[derive(Clone, Debug, PartialEq)]
pub enum BaseArea {
    /// Disk of `radius` around a named location.
    Zone { location: Location, radius: Distance },
    /// Explicit polygonal area.
    Polygon(MultiPolygon<f64>),
}

impl BaseArea {
    /// Amsterdam, 50 km. Used when nothing was persisted.
    pub fn default_zone(cfg: &EngineCfg) -> Self {
        let properties = json!({
            "osm_type": "R",
            "osm_id": 271110,
            "extent": [52.4310638, 4.7287776, 52.2781742, 5.0791622],
            "country": "Netherlands",
            "osm_key": "place",
            "countrycode": "NL",
            "osm_value": "city",
            "name": "Amsterdam",
            "type": "city",
            "state": "North Holland",
        });
        let properties = match properties {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        BaseArea::Zone {
            location: Location::with_properties(Point::new(4.8924534, 52.3730796), properties),
            radius: cfg.default_zone_radius,
        }
    }

    pub fn polygon(polygon: Polygon<f64>) -> Self {
        BaseArea::Polygon(MultiPolygon::new(vec![polygon]))
    }

    /// Validated region of the base area. Never falls back to a default.
    pub fn region(&self, cfg: &GeomCfg) -> Result<CandidateRegion, EngineError> {
        match self {
            BaseArea::Zone { location, radius } => {
                validate_point(location.point)
                    .map_err(|e| EngineError::MalformedBaseArea(format!("zone center: {e}")))?;
                let meters = radius.meters();
                if !(meters.is_finite() && meters > 0.0) {
                    return Err(EngineError::MalformedBaseArea(format!(
                        "zone radius must be positive, got {}",
                        radius.value
                    )));
                }
                Ok(CandidateRegion::from_polygon(disk(location.point, *radius, cfg)))
            }
            BaseArea::Polygon(mp) => {
                validate_multi_polygon(mp)?;
                // Self-union fixes ring orientation and merges overlapping parts.
                let normalized = CandidateRegion::from_multi(mp.union(&MultiPolygon::new(vec![])));
                if normalized.is_empty() {
                    return Err(EngineError::MalformedBaseArea(
                        "polygon has no positive area".to_string(),
                    ));
                }
                Ok(normalized)
            }
        }
    }
}

fn validate_multi_polygon(mp: &MultiPolygon<f64>) -> Result<(), EngineError> {
    let malformed = |msg: String| EngineError::MalformedBaseArea(msg);
    if mp.0.is_empty() {
        return Err(malformed("polygon has no parts".to_string()));
    }
    for (i, polygon) in mp.0.iter().enumerate() {
        let rings = std::iter::once(polygon.exterior()).chain(polygon.interiors());
        for ring in rings {
            if ring.0.len() < 4 {
                return Err(malformed(format!(
                    "part {i}: ring has {} coordinates, need at least 4",
                    ring.0.len()
                )));
            }
            if !ring.is_closed() {
                return Err(malformed(format!("part {i}: ring is not closed")));
            }
            for c in &ring.0 {
                validate_point(Point::from(*c))
                    .map_err(|e| malformed(format!("part {i}: {e}")))?;
            }
        }
        if polygon.unsigned_area() <= 0.0 {
            return Err(malformed(format!("part {i}: zero area")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests;
