use crate::validator::ValidationOutcome;

/// Per-run counters. `total` counts non-blank input lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub cancelled: usize,
}

impl RunSummary {
    pub fn record(&mut self, outcome: &ValidationOutcome) {
        match outcome {
            ValidationOutcome::Success => self.succeeded += 1,
            ValidationOutcome::Failure(_) => self.failed += 1,
            ValidationOutcome::Timeout => self.timed_out += 1,
        }
    }

    pub fn validated(&self) -> usize {
        self.succeeded + self.failed + self.timed_out
    }

    pub fn success_rate(&self) -> f64 {
        if self.validated() == 0 {
            0.0
        } else {
            (self.succeeded as f64 / self.validated() as f64) * 100.0
        }
    }
}

pub fn display_summary(summary: &RunSummary) {
    println!("\n=== xrayprobe summary ===");
    println!("{:<12} {}", "Lines", summary.total);
    println!("{:<12} {}", "Skipped", summary.skipped);
    println!("{:<12} {}", "Valid", summary.succeeded);
    println!("{:<12} {}", "Rejected", summary.failed);
    println!("{:<12} {}", "Timed out", summary.timed_out);
    if summary.cancelled > 0 {
        println!("{:<12} {}", "Cancelled", summary.cancelled);
    }
    println!("{}", "=".repeat(25));
    println!("Success rate: {:.1}%", summary.success_rate());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_rate() {
        let mut summary = RunSummary::default();
        assert_eq!(summary.success_rate(), 0.0);

        summary.record(&ValidationOutcome::Success);
        summary.record(&ValidationOutcome::Failure("x".into()));
        summary.record(&ValidationOutcome::Timeout);
        summary.record(&ValidationOutcome::Success);

        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.timed_out, 1);
        assert_eq!(summary.validated(), 4);
        assert_eq!(summary.success_rate(), 50.0);
    }
}
