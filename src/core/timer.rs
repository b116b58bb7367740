//! One-shot, re-armable timer bound to an engine

use super::engine::{Engine, TimerId};
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

/// Arming replaces any pending expiry. Dropping the timer disarms it, so a
/// timer never outlives its owner.
pub struct Timer {
    engine: Rc<dyn Engine>,
    armed: Rc<Cell<Option<TimerId>>>,
}

impl Timer {
    pub fn new(engine: Rc<dyn Engine>) -> Self {
        Self {
            engine,
            armed: Rc::new(Cell::new(None)),
        }
    }

    pub fn arm<F>(&self, duration: Duration, callback: F)
    where
        F: FnOnce() + 'static,
    {
        self.disarm();
        let armed = self.armed.clone();
        let id = self.engine.arm_timer(
            duration,
            Box::new(move || {
                armed.set(None);
                callback();
            }),
        );
        self.armed.set(Some(id));
    }

    pub fn disarm(&self) {
        if let Some(id) = self.armed.take() {
            self.engine.disarm_timer(id);
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.get().is_some()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.disarm();
    }
}
