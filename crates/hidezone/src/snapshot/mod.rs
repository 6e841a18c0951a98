//! Snapshot Codec: the portable, shareable text form of a session.
//!
//! The document is a GeoJSON `Feature`:
//! - zone base: `Point` geometry with the location as `[lat, lng]`, and
//!   `properties` holding the location metadata plus `isHidingZone`,
//!   `questions`, `zoneRadius` and `zoneRadiusUnits`;
//! - polygon base: `Polygon`/`MultiPolygon` geometry (`[lng, lat]`) with
//!   `questions` at the top level.
//!
//! Both carry `disabledStations`, `hidingRadius`, `hidingRadiusUnits` and
//! `schemaVersion` at the top level. Unknown fields are ignored anywhere;
//! every other defect is [`SnapshotError::InvalidSnapshot`].
//!
//! Code cross-refs: `wire` (question and geometry shapes), `share` (base64
//! and URL forms), `crate::engine::BaseArea::region` (base validation).

mod share;
mod wire;

pub use share::{decode_share, encode_share, share_url, SHARE_PARAM};

use std::collections::BTreeSet;

use geo_types::{MultiPolygon, Point};
use serde_json::{json, Map, Value};

use crate::engine::{BaseArea, EngineCfg, Location};
use crate::error::SnapshotError;
use crate::question::{Question, QuestionKey, QuestionKind};
use crate::region::{CandidateRegion, Distance, Unit};
use crate::stations::StationId;
use crate::store::assign_keys;

pub const SCHEMA_VERSION: u64 = 1;

/// Hiding radius of documents that do not carry one.
const DEFAULT_HIDING_RADIUS: f64 = 0.5;


#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub base: BaseArea,
    pub questions: Vec<Question>,
    pub disabled_stations: BTreeSet<StationId>,
    pub hiding_radius: f64,
    pub unit: Unit,
}

impl Snapshot {
    pub fn encode(&self) -> String {
        encode(self)
    }

    pub fn decode(text: &str) -> Result<Self, SnapshotError> {
        decode(text)
    }

    #[inline]
    pub fn hiding_distance(&self) -> Distance {
        Distance::new(self.hiding_radius, self.unit)
    }
}

pub fn encode(snapshot: &Snapshot) -> String {
    let mut doc = encode_base(&snapshot.base, encode_questions(&snapshot.questions));
    doc.insert(
        "disabledStations".to_string(),
        json!(snapshot.disabled_stations),
    );
    doc.insert("hidingRadius".to_string(), json!(snapshot.hiding_radius));
    doc.insert("hidingRadiusUnits".to_string(), json!(snapshot.unit));
    doc.insert("schemaVersion".to_string(), json!(SCHEMA_VERSION));
    Value::Object(doc).to_string()
}

/// Parse, migrate to the current schema, validate. All-or-nothing.
pub fn decode(text: &str) -> Result<Snapshot, SnapshotError> {
    let value: Value = serde_json::from_str(text.trim())
        .map_err(|e| SnapshotError::invalid(format!("not JSON: {e}")))?;
    let version = match value.get("schemaVersion") {
        None | Some(Value::Null) => 0,
        Some(v) => v
            .as_u64()
            .ok_or_else(|| SnapshotError::invalid("schemaVersion must be a non-negative integer"))?,
    };
    let value = migrate(value, version)?;
    let doc = value
        .as_object()
        .ok_or_else(|| SnapshotError::invalid("document must be a JSON object"))?;

    let (base, questions) = decode_base(doc)?;
    let disabled_stations = decode_disabled(doc.get("disabledStations"))?;
    let hiding_radius = doc
        .get("hidingRadius")
        .and_then(Value::as_f64)
        .filter(|r| r.is_finite() && *r > 0.0)
        .ok_or_else(|| SnapshotError::invalid("hidingRadius must be a positive number"))?;
    let unit = match doc.get("hidingRadiusUnits") {
        None | Some(Value::Null) => Unit::default(),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| SnapshotError::invalid(format!("hidingRadiusUnits: {e}")))?,
    };

    Ok(Snapshot {
        base,
        questions,
        disabled_stations,
        hiding_radius,
        unit,
    })
}

/// Upgrade a document from `from_version` to [`SCHEMA_VERSION`].
///
/// v0 is the unversioned format: `disabledStations` and `hidingRadius` may be
/// missing or null and there is no `hidingRadiusUnits`.
pub fn migrate(mut value: Value, from_version: u64) -> Result<Value, SnapshotError> {
    if from_version > SCHEMA_VERSION {
        return Err(SnapshotError::invalid(format!(
            "schemaVersion {from_version} is newer than supported {SCHEMA_VERSION}"
        )));
    }
    let doc = value
        .as_object_mut()
        .ok_or_else(|| SnapshotError::invalid("document must be a JSON object"))?;
    if from_version == 0 {
        for (key, default) in [
            ("disabledStations", json!([])),
            ("hidingRadius", json!(DEFAULT_HIDING_RADIUS)),
            ("hidingRadiusUnits", json!(Unit::Kilometers)),
        ] {
            match doc.get(key) {
                None | Some(Value::Null) => {
                    doc.insert(key.to_string(), default);
                }
                Some(_) => {}
            }
        }
        doc.insert("schemaVersion".to_string(), json!(SCHEMA_VERSION));
    }
    Ok(value)
}

pub fn encode_questions(questions: &[Question]) -> Value {
    Value::Array(questions.iter().map(wire::question_to_value).collect())
}

/// Decode and validate a question list; keys are normalized so that every
/// question ends up with a unique key.
pub fn decode_questions(value: &Value) -> Result<Vec<Question>, SnapshotError> {
    let items = value
        .as_array()
        .ok_or_else(|| SnapshotError::invalid("questions must be an array"))?
        .iter()
        .map(wire::question_from_value)
        .collect::<Result<Vec<(Option<QuestionKey>, QuestionKind)>, _>>()?;
    Ok(assign_keys(items))
}

/// Base area as a GeoJSON `Feature`, with `questions` in the place the
/// format expects for that base kind.
pub fn encode_base(base: &BaseArea, questions: Value) -> Map<String, Value> {
    let mut doc = Map::new();
    doc.insert("type".to_string(), json!("Feature"));
    match base {
        BaseArea::Zone { location, radius } => {
            let mut props = location.properties().clone();
            props.insert("isHidingZone".to_string(), json!(true));
            props.insert("questions".to_string(), questions);
            props.insert("zoneRadius".to_string(), json!(radius.value));
            props.insert("zoneRadiusUnits".to_string(), json!(radius.unit));
            doc.insert(
                "geometry".to_string(),
                json!({
                    "type": "Point",
                    "coordinates": [location.point.y(), location.point.x()],
                }),
            );
            doc.insert("properties".to_string(), Value::Object(props));
        }
        BaseArea::Polygon(mp) => {
            doc.insert("geometry".to_string(), wire::multi_polygon_to_geometry(mp));
            doc.insert("properties".to_string(), json!({}));
            doc.insert("questions".to_string(), questions);
        }
    }
    doc
}

/// Base area and questions of a (migrated) document.
pub fn decode_base(doc: &Map<String, Value>) -> Result<(BaseArea, Vec<Question>), SnapshotError> {
    let props = doc.get("properties").and_then(Value::as_object);
    let is_zone = props
        .and_then(|p| p.get("isHidingZone"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let (base, questions) = if let (true, Some(props)) = (is_zone, props) {
        (decode_zone(doc, props)?, props.get("questions"))
    } else {
        (decode_polygon(doc)?, doc.get("questions"))
    };
    let questions = match questions {
        None | Some(Value::Null) => Vec::new(),
        Some(v) => decode_questions(v)?,
    };
    base.region(&EngineCfg::default().geom)
        .map_err(|e| SnapshotError::invalid(e.to_string()))?;
    Ok((base, questions))
}

fn decode_zone(
    doc: &Map<String, Value>,
    props: &Map<String, Value>,
) -> Result<BaseArea, SnapshotError> {
    let geometry = doc
        .get("geometry")
        .and_then(Value::as_object)
        .ok_or_else(|| SnapshotError::invalid("hiding zone has no geometry"))?;
    if geometry.get("type").and_then(Value::as_str) != Some("Point") {
        return Err(SnapshotError::invalid("hiding zone geometry must be a Point"));
    }
    let coords = geometry
        .get("coordinates")
        .ok_or_else(|| SnapshotError::invalid("hiding zone point has no coordinates"))?;
    let (lat, lng) = wire::position(coords)?;

    let default = EngineCfg::default().default_zone_radius;
    let value = match props.get("zoneRadius") {
        None | Some(Value::Null) => default.value,
        Some(v) => v
            .as_f64()
            .ok_or_else(|| SnapshotError::invalid("zoneRadius must be a number"))?,
    };
    let unit = match props.get("zoneRadiusUnits") {
        None | Some(Value::Null) => default.unit,
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| SnapshotError::invalid(format!("zoneRadiusUnits: {e}")))?,
    };

    Ok(BaseArea::Zone {
        location: Location::with_properties(Point::new(lng, lat), props.clone()),
        radius: Distance::new(value, unit),
    })
}

fn decode_polygon(doc: &Map<String, Value>) -> Result<BaseArea, SnapshotError> {
    let found = match doc.get("type").and_then(Value::as_str) {
        Some("Feature") => match doc.get("geometry") {
            None | Some(Value::Null) => {
                return Err(SnapshotError::invalid("feature has no geometry"));
            }
            Some(g) => wire::geometry_to_multi_polygon(g)?,
        },
        Some("FeatureCollection") => {
            let features = doc
                .get("features")
                .and_then(Value::as_array)
                .ok_or_else(|| SnapshotError::invalid("FeatureCollection has no features"))?;
            wire::union_parts(features.iter().map(|f| match f.get("geometry") {
                None | Some(Value::Null) => Ok(None),
                Some(g) => wire::geometry_to_multi_polygon(g),
            }))?
        }
        Some(_) => wire::geometry_to_multi_polygon(&Value::Object(doc.clone()))?,
        None => return Err(SnapshotError::invalid("document has no type")),
    };
    found
        .map(BaseArea::Polygon)
        .ok_or_else(|| SnapshotError::invalid("no polygonal geometry found"))
}

fn decode_disabled(value: Option<&Value>) -> Result<BTreeSet<StationId>, SnapshotError> {
    let Some(value) = value.filter(|v| !v.is_null()) else {
        return Ok(BTreeSet::new());
    };
    let items = value
        .as_array()
        .ok_or_else(|| SnapshotError::invalid("disabledStations must be an array"))?;
    items
        .iter()
        .map(|v| {
            v.as_str()
                .map(StationId::new)
                .ok_or_else(|| SnapshotError::invalid("disabledStations entries must be strings"))
        })
        .collect()
}

/// Region as a bare GeoJSON geometry (for hosts that draw it).
pub fn region_to_geojson(region: &CandidateRegion) -> Value {
    let mp: &MultiPolygon<f64> = region.as_multi_polygon();
    wire::multi_polygon_to_geometry(mp)
}
