//! Fixed-bin frequency counter used for partition load balancing.

/// A histogram with uniformly sized bins over `[0, max_range]`.
///
/// Accumulates one count per observed value; values beyond `max_range` land in the
/// final bin so the total is never lost. Intended use: profile per-callset encoded
/// cell sizes during a conversion pass, then consume the distribution when choosing
/// the next run's partition boundaries.
#[derive(Debug, Clone)]
pub struct UniformHistogram {
    bins: Vec<u64>,
    bin_width: u64,
    max_range: u64,
    total: u64,
}

impl UniformHistogram {
    /// Create a histogram with `num_bins` uniform bins covering `[0, max_range]`.
    ///
    /// # Panics
    ///
    /// Panics if `num_bins` is zero.
    #[must_use]
    pub fn new(max_range: u64, num_bins: usize) -> Self {
        assert!(num_bins > 0, "histogram requires at least one bin");
        // floors; values past num_bins * bin_width clamp into the final bin
        let bin_width = (max_range / num_bins as u64).max(1);
        Self {
            bins: vec![0; num_bins],
            bin_width,
            max_range,
            total: 0,
        }
    }

    /// Record one observation.
    pub fn add(&mut self, value: u64) {
        let idx = if value >= self.max_range {
            self.bins.len() - 1
        } else {
            ((value / self.bin_width) as usize).min(self.bins.len() - 1)
        };
        self.bins[idx] += 1;
        self.total += 1;
    }

    /// Number of bins.
    #[must_use]
    pub fn num_bins(&self) -> usize {
        self.bins.len()
    }

    /// Width of each bin in value units.
    #[must_use]
    pub fn bin_width(&self) -> u64 {
        self.bin_width
    }

    /// Count accumulated in bin `idx`.
    #[must_use]
    pub fn bin_count(&self, idx: usize) -> u64 {
        self.bins[idx]
    }

    /// Total number of observations.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Sum of counts over bins `[0, idx]`, useful for quantile-style splitting.
    #[must_use]
    pub fn cumulative_count(&self, idx: usize) -> u64 {
        self.bins[..=idx].iter().sum()
    }
}
