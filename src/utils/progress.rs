//! Coarse progress reporting at fixed fraction steps.

/// Tracks which fraction boundaries have already been reported, so a long
/// transfer logs roughly once per step instead of once per chunk.
pub struct ProgressPoints {
    next: f64,
    step: f64,
}

impl ProgressPoints {
    pub fn new(step: f64) -> Self {
        Self { next: step, step }
    }

    /// Returns the whole percentage to report when `fraction` has reached the
    /// next boundary. A single event that jumps across several boundaries
    /// reports once and skips past all of them, so later reports never lag
    /// behind the true position.
    pub fn crossed(&mut self, fraction: f64) -> Option<u32> {
        if fraction < self.next {
            return None;
        }
        while fraction >= self.next {
            self.next += self.step;
        }
        Some((fraction * 100.0) as u32)
    }
}
