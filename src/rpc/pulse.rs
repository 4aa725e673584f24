use std::sync::atomic::{AtomicU32, Ordering};

/// Keep-alive bookkeeping: counts check intervals without traffic from the server.
#[derive(Debug, Default)]
pub struct Pulse {
    checks: AtomicU32,
}
impl Pulse {
    pub fn new() -> Pulse {
        Pulse::default()
    }

    /// Called once per pulse interval. Returns `true` if two consecutive intervals passed without
    ///  a reset, i.e. if a heartbeat should be sent; the counter starts over in that case.
    pub fn check(&self) -> bool {
        let checks = self.checks.fetch_add(1, Ordering::AcqRel) + 1;
        if checks > 1 {
            self.reset();
            return true;
        }
        false
    }

    /// called for any traffic received from the server
    pub fn reset(&self) {
        self.checks.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_every_second_check() {
        let pulse = Pulse::new();
        let fired: Vec<bool> = (0..6).map(|_| pulse.check()).collect();
        assert_eq!(fired, vec![false, true, false, true, false, true]);
    }

    #[test]
    fn test_reset_postpones() {
        let pulse = Pulse::new();
        assert!(!pulse.check());
        pulse.reset();
        assert!(!pulse.check());
        pulse.reset();
        assert!(!pulse.check());
        assert!(pulse.check());
    }
}
