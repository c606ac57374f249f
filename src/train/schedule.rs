use serde::{Deserialize, Serialize};

/// Step decay of the learning rate, evaluated per epoch (0-based).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LrSchedule {
    /// Multiplies the rate by `decay` every `period` epochs.
    ///
    /// Example: base = 1.0, decay = 0.5, period = 2:
    /// (0→1.0, 1→1.0), (2→0.5, 3→0.5), (4→0.25, ...)
    Periodic { base: f64, decay: f64, period: usize },
    /// Multiplies the rate by `decay` once each milestone epoch is reached.
    ///
    /// Example: base = 1.0, decay = 0.1, epochs = [2, 4]:
    /// (0→1.0, 1→1.0), (2→0.1, 3→0.1), (4→0.01, ...)
    Milestones {
        base: f64,
        decay: f64,
        epochs: Vec<usize>,
    },
}

impl LrSchedule {
    pub fn lr_at(&self, epoch: usize) -> f64 {
        match self {
            LrSchedule::Periodic {
                base,
                decay,
                period,
            } => {
                let steps = if *period == 0 { 0 } else { epoch / period };
                base * decay.powi(steps as i32)
            }
            LrSchedule::Milestones {
                base,
                decay,
                epochs,
            } => {
                let steps = epochs.iter().filter(|&&m| m <= epoch).count();
                base * decay.powi(steps as i32)
            }
        }
    }

    /// Whether the rate changes when entering `epoch`.
    pub fn decays_at(&self, epoch: usize) -> bool {
        epoch > 0 && self.lr_at(epoch) != self.lr_at(epoch - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn periodic_decay() {
        let schedule = LrSchedule::Periodic {
            base: 0.045,
            decay: 0.98,
            period: 1,
        };
        assert!(close(schedule.lr_at(0), 0.045));
        assert!(close(schedule.lr_at(1), 0.045 * 0.98));
        assert!(close(schedule.lr_at(3), 0.045 * 0.98 * 0.98 * 0.98));
        assert!(!schedule.decays_at(0));
        assert!(schedule.decays_at(1));
    }

    #[test]
    fn milestone_decay() {
        let schedule = LrSchedule::Milestones {
            base: 0.1,
            decay: 0.1,
            epochs: vec![30, 60, 90],
        };
        assert!(close(schedule.lr_at(29), 0.1));
        assert!(close(schedule.lr_at(30), 0.01));
        assert!(close(schedule.lr_at(75), 0.001));
        assert!(close(schedule.lr_at(200), 0.0001));
        assert!(schedule.decays_at(60));
        assert!(!schedule.decays_at(61));
    }
}
