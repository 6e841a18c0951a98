//! Planar geometry in a local tangent frame (ordered H-representation).
//!
//! Purpose
//! - Give the thermometer bisector an exact planar treatment: in a gnomonic
//!   frame centred on the area of interest the great circle equidistant from
//!   the two reference points is a line, so the warmer side is a half-plane
//!   `n·x <= c`. Clip it against a box covering the area and hand the
//!   vertices back to the geographic layer.
//! - Keep the API minimal and numerically explicit (eps-aware).
//!
//! Code cross-refs: `Poly2`, `Hs2`, `LocalFrame`, `GeomCfg`,
//! `crate::region::half_plane`.

mod frame;
pub mod ordered;
mod types;

pub use frame::LocalFrame;
pub use ordered::{HalfspaceIntersection, Poly2};
pub use types::{GeomCfg, Hs2};

#[cfg(test)]
mod tests;
