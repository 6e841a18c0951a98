use geo_types::Polygon;

use super::{BaseArea, EngineCfg};
use crate::error::EngineError;
use crate::question::{Question, QuestionKind};
use crate::region::{disk, disk_enclosing, half_plane, BBox, CandidateRegion};

/// Margin around the base bbox that thermometer half-planes are clipped to.
const BOUNDS_MARGIN_DEG: f64 = 0.05;

/// Reduce `base` by every question.
///
/// Questions are validated, then sorted by content, so any permutation of the
/// same multiset runs the same boolean operations and yields the same region.
pub fn reduce(
    base: &BaseArea,
    questions: &[Question],
    cfg: &EngineCfg,
) -> Result<CandidateRegion, EngineError> {
    let base_region = base.region(&cfg.geom)?;
    for q in questions {
        q.kind
            .validate()
            .map_err(|source| EngineError::InvalidQuestion { key: q.key, source })?;
    }
    let mut kinds: Vec<QuestionKind> = questions.iter().map(|q| q.kind).collect();
    kinds.sort_by(QuestionKind::canonical_cmp);
    Ok(reduce_sorted(base_region, &kinds, cfg))
}

/// Core loop over already validated, canonically ordered questions.
///
/// Inside disks and thermometer half-planes are intersected in order; outside
/// disks are unioned and subtracted once at the end. Inside disks are
/// inscribed and outside disks enclosing, so the result never claims a
/// location the questions rule out.
pub fn reduce_sorted(
    base_region: CandidateRegion,
    kinds: &[QuestionKind],
    cfg: &EngineCfg,
) -> CandidateRegion {
    let Some(bounds) = base_region.bbox().map(|b| b.expand(BOUNDS_MARGIN_DEG)) else {
        return CandidateRegion::empty();
    };
    let mut acc = base_region;
    let mut outside: Vec<Polygon<f64>> = Vec::new();
    for kind in kinds {
        if acc.is_empty() {
            tracing::debug!("reduce_short_circuit");
            return acc;
        }
        match kind {
            QuestionKind::Radius(r) if r.within => {
                acc = acc.intersect_polygon(&disk(r.center, r.distance(), &cfg.geom));
            }
            QuestionKind::Radius(r) => {
                outside.push(disk_enclosing(r.center, r.distance(), &cfg.geom));
            }
            QuestionKind::Thermometer(t) => acc = apply_thermometer(&acc, t.near_far(), &bounds, cfg),
        }
    }
    if acc.is_empty() || outside.is_empty() {
        return acc;
    }
    acc.subtract(&CandidateRegion::union_all(&outside))
}

fn apply_thermometer(
    acc: &CandidateRegion,
    (near, far): (geo_types::Point<f64>, geo_types::Point<f64>),
    bounds: &BBox,
    cfg: &EngineCfg,
) -> CandidateRegion {
    match half_plane(near, far, bounds, &cfg.geom) {
        Some(side) => acc.intersect(&side),
        // Validated questions never have coincident endpoints; bounds this
        // far from the base area would need a zone spanning a hemisphere.
        None => acc.clone(),
    }
}
