use serde::Serialize;

/// Aggregate statistics over one group of minimum-speed observations.
/// All values are whole seconds, rounded to nearest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DialStats {
    pub call_count: i64,
    pub avg_dial_speed: i64,
    pub percentiles: Vec<PercentileValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PercentileValue {
    pub percentile: u8,
    pub value: i64,
}

impl DialStats {
    pub fn zero(percentiles: &[u8]) -> Self {
        Self {
            call_count: 0,
            avg_dial_speed: 0,
            percentiles: percentiles
                .iter()
                .map(|p| PercentileValue {
                    percentile: *p,
                    value: 0,
                })
                .collect(),
        }
    }
}

/// Continuous (linearly interpolated) quantile over a sorted slice,
/// matching `QUANTILE_CONT` semantics rather than nearest-rank.
pub fn quantile_cont(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    if lower == upper {
        return Some(sorted[lower]);
    }
    let weight = pos - lower as f64;
    Some(sorted[lower] + weight * (sorted[upper] - sorted[lower]))
}

/// Count, mean and requested percentiles of one observation group.
pub fn summarize(mut values: Vec<f64>, percentiles: &[u8]) -> DialStats {
    if values.is_empty() {
        return DialStats::zero(percentiles);
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let count = values.len() as i64;
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let percentiles = percentiles
        .iter()
        .map(|p| PercentileValue {
            percentile: *p,
            value: quantile_cont(&values, f64::from(*p) / 100.0)
                .map(|v| v.round() as i64)
                .unwrap_or(0),
        })
        .collect();

    DialStats {
        call_count: count,
        avg_dial_speed: mean.round() as i64,
        percentiles,
    }
}
