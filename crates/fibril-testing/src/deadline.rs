use std::cell::Cell;

use fibril_core::Deadline;

/// Allows a fixed number of units of work per callback.
///
/// The work loop asks for the remaining time once before every unit, so a
/// budget of `n` performs exactly `n` units before yielding.
pub struct UnitBudget {
    remaining: Cell<usize>,
}

impl UnitBudget {
    pub fn new(units: usize) -> Self {
        Self {
            remaining: Cell::new(units),
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining.get()
    }
}

impl Deadline for UnitBudget {
    fn time_remaining(&self) -> f64 {
        match self.remaining.get() {
            0 => 0.0,
            n => {
                self.remaining.set(n - 1);
                f64::INFINITY
            }
        }
    }
}

/// A deadline that has already passed.
pub struct Expired;

impl Deadline for Expired {
    fn time_remaining(&self) -> f64 {
        0.0
    }
}
