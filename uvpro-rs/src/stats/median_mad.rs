use crate::error::{Result, UvProError};

/// Scale factor making the MAD a consistent estimator of the standard
/// deviation for normally distributed data
pub const MAD_SCALE_FACTOR: f64 = 1.4826;

/// Calculate median and Median Absolute Deviation (MAD)
///
/// MAD = median(|x - median(x)|)
///
/// # Returns
/// * (median, mad)
pub fn median_mad(data: &[f64]) -> Result<(f64, f64)> {
    let med = median(data)?;
    let abs_devs: Vec<f64> = data.iter().map(|&x| (x - med).abs()).collect();
    let mad = median(&abs_devs)?;
    Ok((med, mad))
}

/// Median and MAD scaled by [`MAD_SCALE_FACTOR`]
pub fn median_mad_scaled(data: &[f64]) -> Result<(f64, f64)> {
    let (med, mad) = median_mad(data)?;
    Ok((med, mad * MAD_SCALE_FACTOR))
}

/// Calculate median of a slice of f64 values
pub fn median(data: &[f64]) -> Result<f64> {
    if data.is_empty() {
        return Err(UvProError::StatsError("Empty data".to_string()));
    }

    let mut sorted = data.to_vec();
    sorted.sort_by(f64::total_cmp);

    let len = sorted.len();
    let median_value = if len % 2 == 0 {
        (sorted[len / 2 - 1] + sorted[len / 2]) / 2.0
    } else {
        sorted[len / 2]
    };

    Ok(median_value)
}
