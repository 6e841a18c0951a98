//! Selection Refiner: "the hider is not at this station".
//!
//! Eliminating a station subtracts a disk of the hiding radius around it from
//! the Candidate Region. An elimination that turns a non-empty region empty
//! is a contradiction; what happens then is chosen by [`ContradictionPolicy`].

use std::collections::HashMap;

use geo_types::Polygon;

use crate::error::RefineError;
use crate::geom2::GeomCfg;
use crate::region::{disk_enclosing, BBox, CandidateRegion, Distance};
use crate::stations::{StationFeature, StationId, StationSet};

pub trait StationLookup {
    fn station(&self, id: &StationId) -> Option<&StationFeature>;
}

impl StationLookup for StationSet {
    fn station(&self, id: &StationId) -> Option<&StationFeature> {
        self.get(id)
    }
}

impl StationLookup for HashMap<StationId, StationFeature> {
    fn station(&self, id: &StationId) -> Option<&StationFeature> {
        self.get(id)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ContradictionPolicy {
    /// Keep the empty region and flag the contradiction.
    #[default]
    Commit,
    /// Keep the previous region and flag the contradiction.
    Reject,
}

/// Outcome of one elimination.
#[derive(Clone, Debug, PartialEq)]
pub struct Elimination {
    /// Region to commit (after applying the policy).
    pub region: CandidateRegion,
    /// Input was non-empty and the subtraction left nothing.
    pub contradiction: bool,
    /// Whether the station's exclusion should be recorded.
    pub committed: bool,
    pub focus: StationId,
    /// Area the view should fit: the station's mask.
    pub viewport: BBox,
}

/// Polygon covering the disk of `hiding_radius` around the station.
#[inline]
pub fn exclusion_mask(
    station: &StationFeature,
    hiding_radius: Distance,
    cfg: &GeomCfg,
) -> Polygon<f64> {
    disk_enclosing(station.point, hiding_radius, cfg)
}

/// Bounding box of the station's mask, for fitting the view.
pub fn viewport_for(station: &StationFeature, hiding_radius: Distance, cfg: &GeomCfg) -> BBox {
    let (x, y) = station.point.x_y();
    CandidateRegion::from_polygon(exclusion_mask(station, hiding_radius, cfg))
        .bbox()
        .unwrap_or_else(|| BBox::new(x, y, x, y))
}

pub fn eliminate<L: StationLookup + ?Sized>(
    id: &StationId,
    region: &CandidateRegion,
    lookup: &L,
    hiding_radius: Distance,
    cfg: &GeomCfg,
    policy: ContradictionPolicy,
) -> Result<Elimination, RefineError> {
    let station = lookup
        .station(id)
        .ok_or_else(|| RefineError::UnknownStation(id.clone()))?;
    let mask = exclusion_mask(station, hiding_radius, cfg);
    let viewport = viewport_for(station, hiding_radius, cfg);

    if !region.intersects_polygon(&mask) {
        return Ok(Elimination {
            region: region.clone(),
            contradiction: false,
            committed: true,
            focus: id.clone(),
            viewport,
        });
    }

    let reduced = region.subtract_polygon(&mask);
    let contradiction = !region.is_empty() && reduced.is_empty();
    if contradiction {
        tracing::warn!(station = %id, ?policy, "hider cannot be in this hiding zone");
    }
    let (region, committed) = match (contradiction, policy) {
        (true, ContradictionPolicy::Reject) => (region.clone(), false),
        _ => (reduced, true),
    };
    Ok(Elimination {
        region,
        contradiction,
        committed,
        focus: id.clone(),
        viewport,
    })
}
