//! Convex clipping in the local frame: a small, angle-ordered set of
//! half-planes and the sweep that turns it into vertices.
//!
//! Only the thermometer construction feeds this (four box sides plus one
//! great-circle bisector, straight in the gnomonic frame), so the sweep result is always re-checked against every
//! half-plane before it is trusted.
//!
//! Code cross-refs: `types::{Hs2, GeomCfg}`, `frame::LocalFrame`

use std::collections::VecDeque;
use std::f64::consts::PI;

use nalgebra::{Matrix2, Vector2};

use super::types::{GeomCfg, Hs2};

/// Normals closer than this are treated as the same direction.
const SAME_DIRECTION: f64 = 1e-9;

/// Half-planes with unit normals, sorted by normal angle, one per direction
/// (the most restrictive offset wins).
#[derive(Clone, Debug, Default)]
pub struct Poly2 {
    hs: Vec<Hs2>,
}

impl Poly2 {
    /// Axis-aligned box `min <= x <= max`.
    pub fn rect(min: Vector2<f64>, max: Vector2<f64>) -> Self {
        let mut p = Self::default();
        for (n, c) in [
            (Vector2::new(1.0, 0.0), max.x),
            (Vector2::new(0.0, 1.0), max.y),
            (Vector2::new(-1.0, 0.0), -min.x),
            (Vector2::new(0.0, -1.0), -min.y),
        ] {
            p.insert(Hs2::new(n, c));
        }
        p
    }

    /// Copy of `self` with `cut` added.
    pub fn with_cut(&self, cut: Hs2) -> Self {
        let mut out = self.clone();
        out.insert(cut);
        out
    }

    /// Add a half-plane. Degenerate normals are ignored.
    pub fn insert(&mut self, h: Hs2) {
        let Some(h) = h.normalized() else {
            return;
        };
        let angle = h.angle();
        let at = self.hs.partition_point(|g| g.angle() <= angle);
        let neighbours = [at.checked_sub(1), Some(at)];
        for i in neighbours.into_iter().flatten() {
            if let Some(g) = self.hs.get_mut(i) {
                if (g.n - h.n).norm() < SAME_DIRECTION {
                    g.c = g.c.min(h.c);
                    return;
                }
            }
        }
        self.hs.insert(at, h);
    }

    /// `p` satisfies every half-plane up to `slack`.
    pub fn contains(&self, p: Vector2<f64>, slack: f64) -> bool {
        self.hs.iter().all(|h| h.satisfies_eps(p, slack))
    }

    /// Vertices of the intersection, counterclockwise.
    pub fn clip(&self, cfg: &GeomCfg) -> HalfspaceIntersection {
        match sweep(&self.hs, cfg) {
            HalfspaceIntersection::Bounded(verts) => {
                let slack = cfg.eps_feas.max(1e-9) * 1e3;
                if verts.iter().all(|v| self.contains(*v, slack)) {
                    HalfspaceIntersection::Bounded(verts)
                } else {
                    HalfspaceIntersection::Empty
                }
            }
            other => other,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum HalfspaceIntersection {
    Empty,
    Unbounded,
    Bounded(Vec<Vector2<f64>>),
}

impl HalfspaceIntersection {
    pub fn vertices(self) -> Option<Vec<Vector2<f64>>> {
        match self {
            HalfspaceIntersection::Bounded(v) => Some(v),
            _ => None,
        }
    }
}

/// Deque sweep over angle-sorted half-planes.
fn sweep(hs: &[Hs2], cfg: &GeomCfg) -> HalfspaceIntersection {
    if hs.is_empty() {
        return HalfspaceIntersection::Unbounded;
    }
    if has_disjoint_opposites(hs, cfg.eps_feas) {
        return HalfspaceIntersection::Empty;
    }
    let eps = cfg.eps_feas;
    let corner = |a: usize, b: usize| meet(&hs[a], &hs[b], cfg.eps_det);
    let keeps = |p: Option<Vector2<f64>>, h: &Hs2| p.is_some_and(|p| h.satisfies_eps(p, eps));

    let mut dq: VecDeque<usize> = VecDeque::with_capacity(hs.len());
    for (i, h) in hs.iter().enumerate() {
        while dq.len() >= 2 && !keeps(corner(dq[dq.len() - 2], dq[dq.len() - 1]), h) {
            dq.pop_back();
        }
        while dq.len() >= 2 && !keeps(corner(dq[0], dq[1]), h) {
            dq.pop_front();
        }
        dq.push_back(i);
    }
    while dq.len() >= 3 && !keeps(corner(dq[dq.len() - 2], dq[dq.len() - 1]), &hs[dq[0]]) {
        dq.pop_back();
    }
    while dq.len() >= 3 && !keeps(corner(dq[0], dq[1]), &hs[dq[dq.len() - 1]]) {
        dq.pop_front();
    }
    if dq.len() < 3 {
        return HalfspaceIntersection::Unbounded;
    }

    let m = dq.len();
    let verts: Option<Vec<_>> = (0..m).map(|k| corner(dq[k], dq[(k + 1) % m])).collect();
    match verts {
        Some(v) => HalfspaceIntersection::Bounded(v),
        None => HalfspaceIntersection::Unbounded,
    }
}

/// `n·x <= c1` together with `-n·x <= c2` is empty when `c1 < -c2`.
fn has_disjoint_opposites(hs: &[Hs2], eps: f64) -> bool {
    hs.iter().any(|h| {
        let mut opposite = h.angle() + PI;
        if opposite > PI {
            opposite -= 2.0 * PI;
        }
        hs.iter()
            .filter(|g| (g.angle() - opposite).abs() < 1e-12)
            .any(|g| -g.c > h.c + eps)
    })
}

/// Corner where the boundary lines of `a` and `b` cross.
fn meet(a: &Hs2, b: &Hs2, eps_det: f64) -> Option<Vector2<f64>> {
    let m = Matrix2::new(a.n.x, a.n.y, b.n.x, b.n.y);
    if m.determinant().abs() < eps_det {
        return None;
    }
    m.try_inverse().map(|inv| inv * Vector2::new(a.c, b.c))
}
