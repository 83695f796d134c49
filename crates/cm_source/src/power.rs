//! Hash-rate math over epoch samples
//!
//! Both backends fetch raw samples and reduce them here so the rate
//! definitions live in one place.

use crate::EpochSample;

/// Hashes per reported power unit (rates are in millions/sec)
pub const HASHES_PER_UNIT: f64 = 1_000_000.0;

/// Average rate over a trailing window.
///
/// The oldest sample in the window is discarded because its hash count was
/// accumulated before the window opened. The rest are summed and divided by
/// the time between the newest and oldest remaining samples.
pub fn window_power(samples: &[EpochSample]) -> f64 {
    let mut sorted: Vec<&EpochSample> = samples.iter().collect();
    sorted.sort_by_key(|s| s.at);

    let remaining = sorted.get(1..).unwrap_or_default();
    let (Some(first), Some(last)) = (remaining.first(), remaining.last()) else {
        return 0.0;
    };

    let elapsed_secs = elapsed_secs(first, last);
    if elapsed_secs <= 0.0 {
        return 0.0;
    }

    let hashes: f64 = remaining.iter().map(|s| s.hash_count).sum();
    hashes / elapsed_secs / HASHES_PER_UNIT
}

/// Rate of the most recent epoch: the latest hash count over the gap to the
/// sample before it.
pub fn latest_epoch_power(samples: &[EpochSample]) -> f64 {
    let mut sorted: Vec<&EpochSample> = samples.iter().collect();
    sorted.sort_by_key(|s| std::cmp::Reverse(s.at));

    let [latest, previous, ..] = sorted.as_slice() else {
        return 0.0;
    };

    let elapsed_secs = elapsed_secs(previous, latest);
    if elapsed_secs <= 0.0 {
        return 0.0;
    }

    latest.hash_count / elapsed_secs / HASHES_PER_UNIT
}

fn elapsed_secs(from: &EpochSample, to: &EpochSample) -> f64 {
    (to.at - from.at).num_milliseconds() as f64 / 1000.0
}
