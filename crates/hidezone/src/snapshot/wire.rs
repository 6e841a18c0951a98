//! JSON shapes of questions and base-area geometry.

use geo_types::{Coord, LineString, MultiPolygon, Point, Polygon};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::SnapshotError;
use crate::question::{
    Question, QuestionKey, QuestionKind, RadiusQuestion, ThermometerQuestion,
    DEFAULT_QUESTION_RADIUS,
};
use crate::region::{CandidateRegion, Unit};

fn yes() -> bool {
    true
}

fn default_radius() -> f64 {
    DEFAULT_QUESTION_RADIUS
}

#[derive(Serialize, Deserialize)]
struct RadiusData {
    lat: f64,
    lng: f64,
    #[serde(default = "default_radius")]
    radius: f64,
    #[serde(default)]
    unit: Unit,
    #[serde(default = "yes")]
    within: bool,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThermometerData {
    lat_a: f64,
    lng_a: f64,
    #[serde(default)]
    lat_b: Option<f64>,
    #[serde(default)]
    lng_b: Option<f64>,
    #[serde(default = "yes")]
    warmer: bool,
}

#[derive(Deserialize)]
struct WireQuestion {
    id: String,
    #[serde(default)]
    key: Value,
    #[serde(default)]
    data: Value,
}

pub(crate) fn question_to_value(q: &Question) -> Value {
    let data = match q.kind {
        QuestionKind::Radius(r) => json!(RadiusData {
            lat: r.center.y(),
            lng: r.center.x(),
            radius: r.radius,
            unit: r.unit,
            within: r.within,
        }),
        QuestionKind::Thermometer(t) => json!(ThermometerData {
            lat_a: t.a.y(),
            lng_a: t.a.x(),
            lat_b: Some(t.b.y()),
            lng_b: Some(t.b.x()),
            warmer: t.warmer,
        }),
    };
    json!({ "id": q.kind.tag(), "key": q.key.0, "data": data })
}

/// One wire question. The key is `None` when absent or not a non-negative
/// integer; the caller assigns a fresh one.
pub(crate) fn question_from_value(
    v: &Value,
) -> Result<(Option<QuestionKey>, QuestionKind), SnapshotError> {
    let wire: WireQuestion = serde_json::from_value(v.clone())
        .map_err(|e| SnapshotError::invalid(format!("question: {e}")))?;
    let key = wire.key.as_u64().map(QuestionKey);
    let data = if wire.data.is_null() {
        Value::Object(Map::new())
    } else {
        wire.data
    };
    let bad = |e: serde_json::Error| SnapshotError::invalid(format!("{} question: {e}", wire.id));
    let kind = match wire.id.as_str() {
        "radius" => {
            let d: RadiusData = serde_json::from_value(data).map_err(bad)?;
            QuestionKind::Radius(RadiusQuestion {
                center: Point::new(d.lng, d.lat),
                radius: d.radius,
                unit: d.unit,
                within: d.within,
            })
        }
        "thermometer" => {
            let d: ThermometerData = serde_json::from_value(data).map_err(bad)?;
            let a = Point::new(d.lng_a, d.lat_a);
            match (d.lat_b, d.lng_b) {
                (Some(lat), Some(lng)) => QuestionKind::Thermometer(ThermometerQuestion {
                    a,
                    b: Point::new(lng, lat),
                    warmer: d.warmer,
                }),
                _ => QuestionKind::Thermometer(ThermometerQuestion {
                    warmer: d.warmer,
                    ..ThermometerQuestion::starting_at(a)
                }),
            }
        }
        other => return Err(SnapshotError::invalid(format!("unknown question type {other:?}"))),
    };
    kind.validate()
        .map_err(|e| SnapshotError::invalid(format!("{} question: {e}", kind.tag())))?;
    Ok((key, kind))
}

fn coord_to_value(c: Coord<f64>) -> Value {
    json!([c.x, c.y])
}

fn ring_to_value(ring: &LineString<f64>) -> Value {
    Value::Array(ring.0.iter().copied().map(coord_to_value).collect())
}

fn polygon_to_value(p: &Polygon<f64>) -> Value {
    let mut rings = vec![ring_to_value(p.exterior())];
    rings.extend(p.interiors().iter().map(ring_to_value));
    Value::Array(rings)
}

/// GeoJSON geometry object; a single part is written as `Polygon`.
pub(crate) fn multi_polygon_to_geometry(mp: &MultiPolygon<f64>) -> Value {
    match mp.0.as_slice() {
        [single] => json!({ "type": "Polygon", "coordinates": polygon_to_value(single) }),
        parts => json!({
            "type": "MultiPolygon",
            "coordinates": Value::Array(parts.iter().map(polygon_to_value).collect()),
        }),
    }
}

/// `[x, y, ...]`; extra ordinates (altitude) are ignored.
pub(crate) fn position(v: &Value) -> Result<(f64, f64), SnapshotError> {
    let arr = v
        .as_array()
        .filter(|a| a.len() >= 2)
        .ok_or_else(|| SnapshotError::invalid("position must be an array of two numbers"))?;
    match (arr[0].as_f64(), arr[1].as_f64()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(SnapshotError::invalid("position must be an array of two numbers")),
    }
}

fn ring(v: &Value) -> Result<LineString<f64>, SnapshotError> {
    let coords = v
        .as_array()
        .ok_or_else(|| SnapshotError::invalid("ring must be an array"))?
        .iter()
        .map(|p| position(p).map(|(x, y)| Coord { x, y }))
        .collect::<Result<Vec<_>, _>>()?;
    if coords.len() < 4 {
        return Err(SnapshotError::invalid(format!(
            "ring has {} positions, need at least 4",
            coords.len()
        )));
    }
    if coords.first() != coords.last() {
        return Err(SnapshotError::invalid("ring is not closed"));
    }
    Ok(LineString::new(coords))
}

fn polygon(v: &Value) -> Result<Polygon<f64>, SnapshotError> {
    let rings = v
        .as_array()
        .filter(|r| !r.is_empty())
        .ok_or_else(|| SnapshotError::invalid("polygon needs at least one ring"))?;
    let exterior = ring(&rings[0])?;
    let interiors = rings[1..].iter().map(ring).collect::<Result<Vec<_>, _>>()?;
    Ok(Polygon::new(exterior, interiors))
}

/// Polygonal part of a GeoJSON geometry. `Ok(None)` for other geometry types.
pub(crate) fn geometry_to_multi_polygon(
    geometry: &Value,
) -> Result<Option<MultiPolygon<f64>>, SnapshotError> {
    let obj = geometry
        .as_object()
        .ok_or_else(|| SnapshotError::invalid("geometry must be an object"))?;
    let coords = || {
        obj.get("coordinates")
            .ok_or_else(|| SnapshotError::invalid("geometry has no coordinates"))
    };
    match obj.get("type").and_then(Value::as_str) {
        Some("Polygon") => Ok(Some(MultiPolygon::new(vec![polygon(coords()?)?]))),
        Some("MultiPolygon") => {
            let parts = coords()?
                .as_array()
                .ok_or_else(|| SnapshotError::invalid("MultiPolygon coordinates must be an array"))?
                .iter()
                .map(polygon)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(MultiPolygon::new(parts)))
        }
        Some("GeometryCollection") => {
            let members = obj
                .get("geometries")
                .and_then(Value::as_array)
                .ok_or_else(|| SnapshotError::invalid("GeometryCollection has no geometries"))?;
            union_parts(members.iter().map(geometry_to_multi_polygon))
        }
        Some(_) => Ok(None),
        None => Err(SnapshotError::invalid("geometry has no type")),
    }
}

/// Union of the polygonal results; `None` if there were none.
pub(crate) fn union_parts(
    parts: impl Iterator<Item = Result<Option<MultiPolygon<f64>>, SnapshotError>>,
) -> Result<Option<MultiPolygon<f64>>, SnapshotError> {
    let mut acc: Option<CandidateRegion> = None;
    for part in parts {
        if let Some(mp) = part? {
            let region = CandidateRegion::from_multi(mp);
            acc = Some(match acc {
                Some(prev) => prev.union(&region),
                None => region,
            });
        }
    }
    Ok(acc.map(CandidateRegion::into_multi_polygon))
}
