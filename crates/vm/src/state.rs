//! Running state: the per-point active mask implementing structured
//! control flow over a grid.
//!
//! Entering a conditional saves the current mask and narrows it to the
//! points taking the branch; the else-side inverts within the saved set;
//! leaving restores. Loops re-narrow against the saved set every
//! iteration, and `break` punches points out of as many enclosing levels
//! as the statement names. Mutating opcodes consult the current mask and
//! leave inactive points untouched.

use crate::error::{RunResult, RuntimeError};

/// The running-state stack.
#[derive(Debug, Clone)]
pub struct RunningState {
    current: Vec<bool>,
    saved: Vec<Vec<bool>>,
}

impl RunningState {
    /// All points active.
    pub fn new(npoints: usize) -> Self {
        Self {
            current: vec![true; npoints.max(1)],
            saved: Vec::new(),
        }
    }

    pub fn npoints(&self) -> usize {
        self.current.len()
    }

    #[inline]
    pub fn is_active(&self, i: usize) -> bool {
        self.current[i]
    }

    pub fn mask(&self) -> &[bool] {
        &self.current
    }

    pub fn any_active(&self) -> bool {
        self.current.iter().any(|&b| b)
    }

    pub fn active_count(&self) -> usize {
        self.current.iter().filter(|&&b| b).count()
    }

    /// Save the current mask (entering a nested construct).
    pub fn push(&mut self) {
        self.saved.push(self.current.clone());
    }

    /// Restore the mask saved by the matching [`push`](Self::push).
    pub fn pop(&mut self) -> RunResult<()> {
        self.current = self.saved.pop().ok_or(RuntimeError::StateUnderflow)?;
        Ok(())
    }

    /// Narrow the current mask to points satisfying `cond`, within the
    /// set that was active at the enclosing save point.
    pub fn get(&mut self, cond: impl Fn(usize) -> bool) {
        let parent = self.saved.last();
        for (i, bit) in self.current.iter_mut().enumerate() {
            let enclosing = parent.map(|p| p[i]).unwrap_or(true);
            *bit = enclosing && cond(i);
        }
    }

    /// Flip to the untaken side: active becomes the enclosing set minus
    /// the points that were just active.
    pub fn invert(&mut self) {
        let parent = self.saved.last();
        for (i, bit) in self.current.iter_mut().enumerate() {
            let enclosing = parent.map(|p| p[i]).unwrap_or(true);
            *bit = enclosing && !*bit;
        }
    }

    /// Reactivate every point.
    pub fn clear(&mut self) {
        self.current.fill(true);
    }

    /// Early exit: deactivate the currently active points in the current
    /// mask and in the top `depth` saved levels, so they stay inactive
    /// until the enclosing construct pops past them.
    pub fn break_out(&mut self, depth: usize) {
        let broken: Vec<bool> = self.current.clone();
        let levels = self.saved.len().min(depth);
        for level in self.saved.iter_mut().rev().take(levels) {
            for (bit, &b) in level.iter_mut().zip(&broken) {
                *bit = *bit && !b;
            }
        }
        self.current.fill(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_conditional_masking() {
        let mut rs = RunningState::new(4);
        rs.push();
        rs.get(|i| i < 2); // if: points 0,1
        assert_eq!(rs.mask(), &[true, true, false, false]);

        rs.invert(); // else: points 2,3
        assert_eq!(rs.mask(), &[false, false, true, true]);

        rs.pop().unwrap();
        assert_eq!(rs.mask(), &[true, true, true, true]);
    }

    #[test]
    fn test_inner_condition_bounded_by_outer() {
        let mut rs = RunningState::new(4);
        rs.push();
        rs.get(|i| i < 2);
        rs.push();
        rs.get(|i| i % 2 == 1); // inner: odd points, bounded by outer
        assert_eq!(rs.mask(), &[false, true, false, false]);
        rs.pop().unwrap();
        rs.pop().unwrap();
        assert!(rs.any_active());
        assert_eq!(rs.active_count(), 4);
    }

    #[test]
    fn test_break_punches_through_levels() {
        let mut rs = RunningState::new(3);
        rs.push(); // loop level
        rs.get(|_| true);
        rs.push(); // if level
        rs.get(|i| i == 1);

        rs.break_out(2);
        assert!(!rs.any_active());

        rs.pop().unwrap(); // back to loop level: point 1 stays out
        assert_eq!(rs.mask(), &[true, false, true]);
    }

    #[test]
    fn test_pop_underflow() {
        let mut rs = RunningState::new(1);
        assert!(matches!(rs.pop(), Err(RuntimeError::StateUnderflow)));
    }

    #[test]
    fn test_clear_reactivates() {
        let mut rs = RunningState::new(3);
        rs.push();
        rs.get(|_| false);
        assert!(!rs.any_active());
        rs.clear();
        assert_eq!(rs.active_count(), 3);
    }
}
