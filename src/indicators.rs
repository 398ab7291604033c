// =============================================================================
// Overlay Indicators
// =============================================================================
//
// Moving averages for chart overlays.  Output is aligned index-for-index with
// the input: positions before the first full window are `None`, which the
// chart renders as gaps.
//
// EMA:
//   multiplier = 2 / (period + 1)
//   EMA_t      = value_t * multiplier + EMA_{t-1} * (1 - multiplier)
// seeded with the SMA of the first `period` values.
// =============================================================================

/// Simple moving average over `period` values.
///
/// `period == 0` yields all `None`.  A window holding a non-finite value is
/// `None`; later windows recover once it has slid out.
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    for (i, window) in values.windows(period).enumerate() {
        let sum: f64 = window.iter().sum();
        out[i + period - 1] = finite(sum / period as f64);
    }
    out
}

/// Exponential moving average over `period` values.
///
/// Once a non-finite value appears the rest of the series is `None`;
/// downstream consumers should not trust a broken series.
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    let multiplier = 2.0 / (period + 1) as f64;
    let seed = values[..period].iter().sum::<f64>() / period as f64;
    if !seed.is_finite() {
        return out;
    }
    out[period - 1] = Some(seed);

    let mut prev = seed;
    for (i, &value) in values.iter().enumerate().skip(period) {
        let next = value * multiplier + prev * (1.0 - multiplier);
        if !next.is_finite() {
            break;
        }
        out[i] = Some(next);
        prev = next;
    }
    out
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}
