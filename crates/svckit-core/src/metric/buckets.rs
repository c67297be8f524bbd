use crate::MetricError;

/// Upper bound on the number of magnitudes (in the chosen base) a histogram
/// may span.
pub const MAX_MAGNITUDES: f64 = 15.0;

/// Derives exponential histogram boundaries covering `[min, max]`.
///
/// Starts with a growth factor of `2` and bumps it by one until `max` is
/// less than [`MAX_MAGNITUDES`] powers of the factor above `min`. The result
/// is `min * factor^i` for every `i` with `i <= magnitudes + 1`, so it starts
/// at `min`, ends above `max`, and never holds more than 16 boundaries.
///
/// # Errors
///
/// [`MetricError::InvalidRange`] unless `0 < min < max` and both are finite.
pub fn exponential_buckets(min: f64, max: f64) -> Result<Vec<f64>, MetricError> {
    if !(min.is_finite() && max.is_finite() && min > 0.0 && max > min) {
        return Err(MetricError::InvalidRange { min, max });
    }

    // log_b(x) = log_2(x) / log_2(b)
    let log = |x: f64, base: f64| x.log2() / base.log2();

    let mut factor = 2.0_f64;
    let magnitudes = loop {
        let magnitudes = log(max, factor) - log(min, factor);
        if magnitudes < MAX_MAGNITUDES {
            break magnitudes;
        }
        factor += 1.0;
    };

    let steps = (magnitudes + 1.0).floor() as i32;
    Ok((0..=steps).map(|i| min * factor.powi(i)).collect())
}
