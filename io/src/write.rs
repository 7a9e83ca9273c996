//! Tabular export of spectra and time traces
//!
//! All writers create new files and never touch the source data. Values are
//! written with Rust's shortest round-trip float formatting, so a table written
//! here and read back with [`crate::table::read_table`] reproduces the values
//! exactly.

use crate::error::{Result, SpectraError};
use ndarray::ArrayView2;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const WAVELENGTH_COLUMN: &str = "Wavelength (nm)";
pub const ABSORBANCE_COLUMN: &str = "Absorbance (AU)";

/// Write spectra as one wide table: a wavelength column, then one column per
/// spectrum headed by its time
///
/// # Errors
/// Returns an error if the matrix shape disagrees with the axes or the file
/// cannot be written.
pub fn write_spectra_csv(
    path: impl AsRef<Path>,
    wavelengths: &[f64],
    times: &[f64],
    spectra: ArrayView2<f64>,
) -> Result<()> {
    let path = path.as_ref();
    check_shape(wavelengths.len(), times.len(), spectra)?;

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(
        std::iter::once(WAVELENGTH_COLUMN.to_string()).chain(times.iter().map(f64::to_string)),
    )?;
    for (wavelength, row) in wavelengths.iter().zip(spectra.rows()) {
        writer.write_record(
            std::iter::once(wavelength.to_string()).chain(row.iter().map(f64::to_string)),
        )?;
    }
    writer.flush()?;

    debug!(
        "Wrote {} spectra to {}",
        times.len(),
        path.display()
    );
    Ok(())
}

/// Write one `Wavelength (nm),Absorbance (AU)` table per spectrum into `dir`
///
/// Files are numbered from 1 and zero-padded so that file-name order is
/// spectrum order. Returns the written paths.
///
/// # Errors
/// Returns an error if the matrix shape disagrees with the wavelength axis or
/// a file cannot be written.
pub fn write_table_directory(
    dir: impl AsRef<Path>,
    wavelengths: &[f64],
    spectra: ArrayView2<f64>,
) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    check_shape(wavelengths.len(), spectra.ncols(), spectra)?;
    std::fs::create_dir_all(dir)?;

    let digits = spectra.ncols().to_string().len();
    let mut written = Vec::with_capacity(spectra.ncols());
    for (i, column) in spectra.columns().into_iter().enumerate() {
        let path = dir.join(format!("{:0digits$}.csv", i + 1));
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record([WAVELENGTH_COLUMN, ABSORBANCE_COLUMN])?;
        for (wavelength, value) in wavelengths.iter().zip(column.iter()) {
            writer.write_record([wavelength.to_string(), value.to_string()])?;
        }
        writer.flush()?;
        written.push(path);
    }

    debug!("Wrote {} tables to {}", written.len(), dir.display());
    Ok(written)
}

/// Write absorbance-vs-time traces: a time column, then one column per wavelength
///
/// `traces` is laid out cycle x wavelength.
///
/// # Errors
/// Returns an error if the trace shape disagrees with the axes or the file
/// cannot be written.
pub fn write_traces_csv(
    path: impl AsRef<Path>,
    times: &[f64],
    wavelengths: &[f64],
    traces: ArrayView2<f64>,
) -> Result<()> {
    let path = path.as_ref();
    check_shape(times.len(), wavelengths.len(), traces)?;

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(
        std::iter::once("Time (s)".to_string()).chain(wavelengths.iter().map(f64::to_string)),
    )?;
    for (time, row) in times.iter().zip(traces.rows()) {
        writer.write_record(std::iter::once(time.to_string()).chain(row.iter().map(f64::to_string)))?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the combined time trace with its baseline and outlier flags
///
/// # Errors
/// Returns an error if the columns differ in length or the file cannot be written.
pub fn write_trace_csv(
    path: impl AsRef<Path>,
    times: &[f64],
    trace: &[f64],
    baseline: &[f64],
    outliers: &[bool],
) -> Result<()> {
    let n = times.len();
    if trace.len() != n || baseline.len() != n || outliers.len() != n {
        return Err(SpectraError::Export(format!(
            "column lengths differ: {} times, {} trace, {} baseline, {} flags",
            n,
            trace.len(),
            baseline.len(),
            outliers.len()
        )));
    }

    let mut writer = csv::Writer::from_path(path.as_ref())?;
    writer.write_record(["Time", "Combined trace", "Baseline", "Outlier"])?;
    for i in 0..n {
        writer.write_record([
            times[i].to_string(),
            trace[i].to_string(),
            baseline[i].to_string(),
            u8::from(outliers[i]).to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// First free path of the form `dir/stem.ext`, `dir/stem (1).ext`, ...
#[must_use]
pub fn unique_path(dir: impl AsRef<Path>, stem: &str, extension: &str) -> PathBuf {
    let dir = dir.as_ref();
    let extension = extension.trim_start_matches('.');
    let candidate = |suffix: String| {
        if extension.is_empty() {
            dir.join(format!("{stem}{suffix}"))
        } else {
            dir.join(format!("{stem}{suffix}.{extension}"))
        }
    };

    let mut path = candidate(String::new());
    let mut n = 1;
    while path.exists() {
        path = candidate(format!(" ({n})"));
        n += 1;
    }
    path
}

fn check_shape(rows: usize, cols: usize, data: ArrayView2<f64>) -> Result<()> {
    if data.dim() != (rows, cols) {
        return Err(SpectraError::Export(format!(
            "data is {:?}, expected ({rows}, {cols})",
            data.dim()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_write_spectra_csv_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spectra.csv");
        let spectra = array![[0.1, 0.2], [0.3, 0.4], [0.5, 0.6]];
        write_spectra_csv(&path, &[300.0, 301.0, 302.0], &[0.0, 2.5], spectra.view()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Wavelength (nm),0,2.5");
        assert_eq!(lines[1], "300,0.1,0.2");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let spectra = array![[0.1, 0.2]];
        let result = write_spectra_csv(dir.path().join("x.csv"), &[300.0, 301.0], &[0.0, 1.0], spectra.view());
        assert!(matches!(result, Err(SpectraError::Export(_))));
    }

    #[test]
    fn test_table_directory_names_are_padded() {
        let dir = tempfile::tempdir().unwrap();
        let spectra = ndarray::Array2::<f64>::zeros((2, 12));
        let written = write_table_directory(dir.path().join("out"), &[300.0, 301.0], spectra.view()).unwrap();
        assert_eq!(written.len(), 12);
        assert!(written[0].ends_with("01.csv"));
        assert!(written[11].ends_with("12.csv"));
    }

    #[test]
    fn test_unique_path() {
        let dir = tempfile::tempdir().unwrap();
        let first = unique_path(dir.path(), "run", "csv");
        assert!(first.ends_with("run.csv"));
        std::fs::write(&first, "").unwrap();
        let second = unique_path(dir.path(), "run", ".csv");
        assert!(second.ends_with("run (1).csv"));
    }

    #[test]
    fn test_trace_csv_rejects_ragged_columns() {
        let dir = tempfile::tempdir().unwrap();
        let result = write_trace_csv(dir.path().join("t.csv"), &[0.0, 1.0], &[1.0], &[1.0, 1.0], &[false, true]);
        assert!(matches!(result, Err(SpectraError::Export(_))));
    }
}
