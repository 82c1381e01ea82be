//! Per-kernel timing aggregation for profiled runs.

use std::fmt;
use std::time::Duration;

/// One timed dispatch.
#[derive(Debug, Clone)]
pub struct StepTiming {
    pub entry_point: String,
    pub duration: Duration,
}

/// Timing for all dispatches of one entry point.
#[derive(Debug, Clone)]
pub struct KernelProfile {
    pub entry_point: String,
    pub count: usize,
    pub total: Duration,
    /// Share of the whole run's time, in `[0, 1]`.
    pub ratio: f64,
}

/// Aggregated timings of one profiled run.
#[derive(Debug, Clone)]
pub struct ProfileSummary {
    /// Per-entry-point rows, in first-dispatch order.
    pub kernels: Vec<KernelProfile>,
    pub total: Duration,
}

impl ProfileSummary {
    /// Aggregate per-step timings by entry-point name.
    pub fn from_timings(timings: &[StepTiming]) -> Self {
        let total: Duration = timings.iter().map(|t| t.duration).sum();

        let mut kernels: Vec<KernelProfile> = Vec::new();
        for timing in timings {
            match kernels
                .iter_mut()
                .find(|k| k.entry_point == timing.entry_point)
            {
                Some(kernel) => {
                    kernel.count += 1;
                    kernel.total += timing.duration;
                }
                None => kernels.push(KernelProfile {
                    entry_point: timing.entry_point.clone(),
                    count: 1,
                    total: timing.duration,
                    ratio: 0.0,
                }),
            }
        }

        let total_secs = total.as_secs_f64();
        if total_secs > 0.0 {
            for kernel in &mut kernels {
                kernel.ratio = kernel.total.as_secs_f64() / total_secs;
            }
        }

        Self { kernels, total }
    }
}

impl fmt::Display for ProfileSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} dispatches over {} kernels, {:.3} ms total",
            self.kernels.iter().map(|k| k.count).sum::<usize>(),
            self.kernels.len(),
            self.total.as_secs_f64() * 1e3
        )?;
        for kernel in &self.kernels {
            writeln!(
                f,
                "  {:<32} count {:<5} {:>10.3} ms  {:>5.1}%",
                kernel.entry_point,
                kernel.count,
                kernel.total.as_secs_f64() * 1e3,
                kernel.ratio * 100.0
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timing(entry: &str, millis: u64) -> StepTiming {
        StepTiming {
            entry_point: entry.to_string(),
            duration: Duration::from_millis(millis),
        }
    }

    #[test]
    fn aggregates_by_entry_point() {
        let summary = ProfileSummary::from_timings(&[
            timing("matmul", 30),
            timing("relu", 10),
            timing("matmul", 60),
        ]);

        assert_eq!(summary.total, Duration::from_millis(100));
        assert_eq!(summary.kernels.len(), 2);

        let matmul = &summary.kernels[0];
        assert_eq!(matmul.entry_point, "matmul");
        assert_eq!(matmul.count, 2);
        assert_eq!(matmul.total, Duration::from_millis(90));
        assert!((matmul.ratio - 0.9).abs() < 1e-9);

        let relu = &summary.kernels[1];
        assert_eq!(relu.count, 1);
        assert!((relu.ratio - 0.1).abs() < 1e-9);
    }

    #[test]
    fn ratios_sum_to_one() {
        let summary = ProfileSummary::from_timings(&[
            timing("a", 7),
            timing("b", 13),
            timing("c", 21),
            timing("a", 9),
        ]);
        let sum: f64 = summary.kernels.iter().map(|k| k.ratio).sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn empty_run_has_zero_total() {
        let summary = ProfileSummary::from_timings(&[]);
        assert!(summary.kernels.is_empty());
        assert_eq!(summary.total, Duration::ZERO);
    }
}
