//! Basic 2D types and tolerances for the local-frame clipping.
//!
//! - `GeomCfg`: centralizes epsilons and the disk approximation resolution.
//! - `Hs2`: closed half‑space `n·x <= c` with helper predicates.

use nalgebra::Vector2;

/// Geometry configuration (tolerances and polygon resolution).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeomCfg {
    pub eps_det: f64,
    pub eps_feas: f64,
    /// Vertices used to approximate one geodesic disk.
    pub circle_steps: usize,
}

impl Default for GeomCfg {
    fn default() -> Self {
        Self {
            eps_det: 1e-12,
            eps_feas: 1e-9,
            circle_steps: 64,
        }
    }
}

/// Closed half‑space `n · x <= c` (no normalization required here).
#[derive(Clone, Copy, Debug)]
pub struct Hs2 {
    pub n: Vector2<f64>,
    pub c: f64,
}

impl Hs2 {
    #[inline]
    pub fn new(n: Vector2<f64>, c: f64) -> Self {
        Self { n, c }
    }

    /// Same half-plane with a unit normal; `None` for a zero or non-finite
    /// normal.
    pub fn normalized(&self) -> Option<Self> {
        let norm = self.n.norm();
        if !norm.is_finite() || norm <= 0.0 {
            return None;
        }
        Some(Self::new(self.n / norm, self.c / norm))
    }

    /// Direction of the outward normal in `(-pi, pi]`.
    #[inline]
    pub fn angle(&self) -> f64 {
        self.n.y.atan2(self.n.x)
    }

    #[inline]
    pub fn satisfies_eps(&self, p: Vector2<f64>, eps: f64) -> bool {
        self.n.dot(&p) <= self.c + eps
    }
}
