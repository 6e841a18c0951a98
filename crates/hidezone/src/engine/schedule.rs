use std::fmt;

/// Monotonic token identifying one state of the inputs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(pub u64);

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Owns the current generation. Only results tagged with it may be committed.
#[derive(Clone, Debug, Default)]
pub struct Scheduler {
    current: Generation,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invalidate everything issued so far and return the new token.
    pub fn advance(&mut self) -> Generation {
        self.current = Generation(self.current.0 + 1);
        self.current
    }

    #[inline]
    pub fn current(&self) -> Generation {
        self.current
    }

    #[inline]
    pub fn is_current(&self, generation: Generation) -> bool {
        generation == self.current
    }
}
