//! Progress aggregation across tracks and reporting cadence.

/// Combines per-track progress into one weighted job fraction.
///
/// Each track carries a weight, normally its media duration within the
/// selected range. As soon as one track's duration is unknown every track
/// weighs the same, so that track still moves the job forward.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    weights: Vec<f64>,
    fractions: Vec<f64>,
}

impl ProgressTracker {
    /// `weights[i]` is the weight of track `i`; non-positive weights are
    /// treated as unknown.
    pub fn new(weights: Vec<i64>) -> Self {
        let weights = if weights.iter().all(|w| *w > 0) {
            weights.iter().map(|w| *w as f64).collect()
        } else {
            vec![1.0; weights.len()]
        };
        let fractions = vec![0.0; weights.len()];
        Self { weights, fractions }
    }

    /// Record the progress of one track. A track never moves backwards.
    pub fn update(&mut self, track: usize, fraction: f64) {
        if let Some(current) = self.fractions.get_mut(track) {
            *current = current.max(fraction.clamp(0.0, 1.0));
        }
    }

    pub fn complete(&mut self, track: usize) {
        self.update(track, 1.0);
    }

    /// Weighted progress of the whole job in `[0, 1]`.
    pub fn overall(&self) -> f32 {
        let total: f64 = self.weights.iter().sum();
        if total <= 0.0 {
            return 0.0;
        }
        let done: f64 = self
            .weights
            .iter()
            .zip(&self.fractions)
            .map(|(w, f)| w * f)
            .sum();
        (done / total).clamp(0.0, 1.0) as f32
    }
}

/// Decides which progress values reach the listener.
///
/// With granularity 0 every non-decreasing value is reported. With
/// granularity `N` a value is reported once it is at least `1/N` past the
/// last reported one, so at most `N` intermediate reports are made. A
/// final 1.0 is always reported by [`GranularityGate::finish`] unless it
/// has already been.
#[derive(Debug, Clone)]
pub struct GranularityGate {
    step: Option<f32>,
    last: Option<f32>,
}

impl GranularityGate {
    pub fn new(granularity: u32) -> Self {
        let step = (granularity > 0).then(|| 1.0 / granularity as f32);
        Self { step, last: None }
    }

    /// Returns the value to report, if any.
    pub fn update(&mut self, progress: f32) -> Option<f32> {
        let progress = progress.clamp(0.0, 1.0);
        let report = match (self.step, self.last) {
            (_, Some(last)) if progress < last => false,
            (None, _) => true,
            (Some(step), Some(last)) => progress - last >= step,
            (Some(step), None) => progress >= step,
        };
        if report {
            self.last = Some(progress);
            Some(progress)
        } else {
            None
        }
    }

    /// The closing 1.0, unless it was already reported.
    pub fn finish(&mut self) -> Option<f32> {
        if self.last == Some(1.0) {
            None
        } else {
            self.last = Some(1.0);
            Some(1.0)
        }
    }

    pub fn last_reported(&self) -> Option<f32> {
        self.last
    }
}
