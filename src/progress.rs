/// Receives progress of long reads and writes: the fraction done (0..=1) and the same as a
/// percentage.
pub trait ProgressCallback {
    fn update(&mut self, fraction: f64, percent: u8);
}

impl<F: FnMut(f64, u8)> ProgressCallback for F {
    fn update(&mut self, fraction: f64, percent: u8) {
        self(fraction, percent)
    }
}

/// Calls back only once progress has moved by more than `interval` since the last call.
pub(crate) struct ProgressTracker {
    callback: Box<dyn ProgressCallback>,
    interval: f64,
    last: f64,
}

impl ProgressTracker {
    pub(crate) fn from(callback: Box<dyn ProgressCallback>, interval: f64) -> Self {
        ProgressTracker {
            callback,
            interval: interval.clamp(0.0, 1.0),
            last: 0.0,
        }
    }

    pub(crate) fn restart(&mut self) {
        self.last = 0.0;
    }

    pub(crate) fn advance(&mut self, done: usize, total: usize) {
        let fraction = match total {
            0 => 1.0,
            total => (done as f64 / total as f64).min(1.0),
        };

        if fraction - self.last > self.interval || (fraction >= 1.0 && self.last < 1.0) {
            self.last = fraction;
            self.callback.update(fraction, (fraction * 100.0).round() as u8);
        }
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("interval", &self.interval)
            .field("last", &self.last)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_reports_at_interval() {
        let seen = Rc::new(RefCell::new(vec![]));
        let sink = Rc::clone(&seen);
        let mut tracker = ProgressTracker::from(
            Box::new(move |_: f64, percent: u8| sink.borrow_mut().push(percent)),
            0.25,
        );

        for done in 0..=10 {
            tracker.advance(done, 10);
        }

        assert_eq!(*seen.borrow(), vec![30, 60, 90, 100]);
    }
}
