//! Directories of exported per-spectrum tables
//!
//! ChemStation exports one `.csv` per spectrum with a `Wavelength (nm)` and an
//! `Absorbance (AU)` column, encoded as UTF-16. Tables written by
//! [`crate::write::write_table_directory`] use the same layout in UTF-8.

use crate::{
    error::{Result, SpectraError},
    spectra::{RawSpectra, SpectralDecoder, source_name, validate_cycle_time},
};
use byteorder::{BigEndian as BE, ByteOrder, LittleEndian as LE};
use derive_builder::Builder;
use itertools::Itertools;
use ndarray::Array2;
use rayon::prelude::*;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, warn};
use walkdir::WalkDir;

static WAVELENGTH_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)wavelength|\bnm\b").expect("valid regex"));
static ABSORBANCE_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)absorbance|\babs\b|\bau\b").expect("valid regex"));

/// Relative tolerance when comparing wavelength axes between files
const AXIS_TOLERANCE: f64 = 1e-9;

/// A directory holding one table per spectrum
///
/// Files are ordered by file name; that order is the time order.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct TableDirectory {
    pub path: PathBuf,
    /// Seconds between spectra. Without it, spectra are spaced one index apart.
    #[builder(default)]
    pub cycle_time: Option<f64>,
    /// File extension of the tables (compared case-insensitively)
    #[builder(default = "String::from(\"csv\")")]
    pub extension: String,
}

impl TableDirectory {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            cycle_time: None,
            extension: String::from("csv"),
        }
    }

    /// List the table files in file-name order
    ///
    /// # Errors
    /// Will return `Err` if the directory cannot be read
    pub fn table_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.path)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| {
                SpectraError::Io(e.into_io_error().unwrap_or_else(|| {
                    std::io::Error::other(format!("cannot walk {}", self.path.display()))
                }))
            })?;
            let path = entry.path();
            if !entry.file_type().is_file() {
                continue;
            }
            let matches_ext = path
                .extension()
                .and_then(|s| s.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.extension));
            if matches_ext {
                files.push(path.to_path_buf());
            }
        }
        Ok(files)
    }

    /// Read every table and assemble the spectrum matrix
    ///
    /// # Errors
    /// Will return `Err` if:
    /// - the cycle time is not a positive, finite number
    /// - a table has an unrecognized header or a non-numeric value (`Format`)
    /// - no table contains data (`EmptyDataset`)
    /// - tables disagree on the wavelength axis (`InconsistentAxis`)
    pub fn read(&self) -> Result<RawSpectra> {
        let name = source_name(&self.path);
        if let Some(ct) = self.cycle_time {
            validate_cycle_time(ct)?;
        }

        let files = self.table_files()?;
        debug!("{}: found {} table files", name, files.len());

        let tables: Vec<(PathBuf, Option<Table>)> = files
            .into_par_iter()
            .map(|path| read_table(&path).map(|table| (path, table)))
            .collect::<Result<_>>()?;

        let mut usable = Vec::with_capacity(tables.len());
        for (path, table) in tables {
            match table {
                Some(table) => usable.push((path, table)),
                None => warn!("Skipping {}: table has no data rows", path.display()),
            }
        }

        let Some((_, reference)) = usable.first() else {
            return Err(SpectraError::EmptyDataset(name));
        };
        let wavelengths = reference.wavelengths.clone();
        for (path, table) in &usable[1..] {
            check_axis(path, &wavelengths, &table.wavelengths)?;
        }

        let n_cycles = usable.len();
        let spectra = Array2::from_shape_fn((wavelengths.len(), n_cycles), |(row, col)| {
            usable[col].1.absorbance[row]
        });
        let times = match self.cycle_time {
            Some(ct) => (0..n_cycles).map(|i| i as f64 * ct).collect(),
            None => (0..n_cycles).map(|i| i as f64).collect(),
        };

        RawSpectra::new(name, wavelengths, spectra, times, self.cycle_time)
    }
}

impl SpectralDecoder for TableDirectory {
    fn decode(&self) -> Result<RawSpectra> {
        self.read()
    }
}

/// One parsed spectrum table
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub wavelengths: Vec<f64>,
    pub absorbance: Vec<f64>,
}

/// Parse a single table file
///
/// Returns `Ok(None)` for a table with a valid header but no data rows.
///
/// # Errors
/// Will return `Err` if the file cannot be read, is neither UTF-8 nor UTF-16,
/// has an unrecognized header row, or holds a non-numeric value.
pub fn read_table(path: &Path) -> Result<Option<Table>> {
    let bytes = std::fs::read(path)?;
    let text = decode_text(&bytes)
        .map_err(|reason| SpectraError::Format(format!("{}: {reason}", path.display())))?;
    parse_table(&text).map_err(|e| match e {
        SpectraError::Format(reason) => SpectraError::Format(format!("{}: {reason}", path.display())),
        other => other,
    })
}

/// Parse table text: a header row followed by `wavelength, absorbance` rows
///
/// Columns after the second are ignored.
///
/// # Errors
/// Will return `Format` for an unrecognized header or a row whose first two
/// fields are missing or non-numeric.
pub fn parse_table(text: &str) -> Result<Option<Table>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.clone();
    let recognized = headers.len() >= 2
        && WAVELENGTH_HEADER.is_match(&headers[0])
        && ABSORBANCE_HEADER.is_match(&headers[1]);
    if !recognized {
        return Err(SpectraError::Format(format!(
            "unrecognized header row: {}",
            headers.iter().join(",")
        )));
    }

    let mut wavelengths = Vec::new();
    let mut absorbance = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        let parse = |column: usize| -> Result<f64> {
            record
                .get(column)
                .and_then(|field| field.parse::<f64>().ok())
                .ok_or_else(|| {
                    SpectraError::Format(format!(
                        "row {}: column {} is not a number",
                        line + 2,
                        column + 1
                    ))
                })
        };
        wavelengths.push(parse(0)?);
        absorbance.push(parse(1)?);
    }

    if wavelengths.is_empty() {
        return Ok(None);
    }
    Ok(Some(Table {
        wavelengths,
        absorbance,
    }))
}

/// Decode UTF-16 (by byte-order mark) or UTF-8 text
fn decode_text(bytes: &[u8]) -> std::result::Result<String, String> {
    let utf16 = |body: &[u8], big_endian: bool| {
        if body.len() % 2 != 0 {
            return Err("odd number of bytes in UTF-16 text".to_string());
        }
        let mut units = vec![0u16; body.len() / 2];
        if big_endian {
            BE::read_u16_into(body, &mut units);
        } else {
            LE::read_u16_into(body, &mut units);
        }
        String::from_utf16(&units).map_err(|e| e.to_string())
    };

    match bytes {
        [0xFF, 0xFE, body @ ..] => utf16(body, false),
        [0xFE, 0xFF, body @ ..] => utf16(body, true),
        [0xEF, 0xBB, 0xBF, body @ ..] => String::from_utf8(body.to_vec()).map_err(|e| e.to_string()),
        _ => String::from_utf8(bytes.to_vec())
            .map_err(|_| "only UTF-16 and UTF-8 encodings are supported".to_string()),
    }
}

fn check_axis(path: &Path, expected: &[f64], found: &[f64]) -> Result<()> {
    if expected.len() != found.len() {
        return Err(SpectraError::InconsistentAxis {
            file: path.to_path_buf(),
            expected: format!("{} wavelengths", expected.len()),
            found: format!("{} wavelengths", found.len()),
        });
    }
    if let Some((i, (a, b))) = expected
        .iter()
        .zip(found)
        .enumerate()
        .find(|(_, (a, b))| (*a - *b).abs() > AXIS_TOLERANCE * a.abs().max(1.0))
    {
        return Err(SpectraError::InconsistentAxis {
            file: path.to_path_buf(),
            expected: format!("{a} nm at row {}", i + 1),
            found: format!("{b} nm"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_table(dir: &Path, name: &str, rows: &[(f64, f64)]) {
        let mut text = String::from("Wavelength (nm),Absorbance (AU)\n");
        for (wl, abs) in rows {
            text.push_str(&format!("{wl},{abs}\n"));
        }
        std::fs::write(dir.join(name), text).unwrap();
    }

    #[test]
    fn test_parse_table() {
        let table = parse_table("Wavelength (nm),Absorbance (AU)\n300,0.5\n301,0.25\n")
            .unwrap()
            .unwrap();
        assert_eq!(table.wavelengths, vec![300.0, 301.0]);
        assert_eq!(table.absorbance, vec![0.5, 0.25]);
    }

    #[test]
    fn test_unrecognized_header() {
        let result = parse_table("time,signal\n0,1\n");
        assert!(matches!(result, Err(SpectraError::Format(_))));
    }

    #[test]
    fn test_header_only_table_is_unusable() {
        assert_eq!(parse_table("Wavelength (nm),Absorbance (AU)\n").unwrap(), None);
    }

    #[test]
    fn test_utf16_chemstation_export() {
        let text = "Wavelength (nm),Absorbance (AU)\r\n190,1.5\r\n191,1.25\r\n";
        let mut bytes = vec![0xFF, 0xFE];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("001.csv");
        std::fs::write(&path, bytes).unwrap();

        let table = read_table(&path).unwrap().unwrap();
        assert_eq!(table.wavelengths, vec![190.0, 191.0]);
        assert_eq!(table.absorbance, vec![1.5, 1.25]);
    }

    #[test]
    fn test_directory_sorted_by_name() {
        let dir = tempfile::tempdir().unwrap();
        write_table(dir.path(), "02.csv", &[(300.0, 0.2), (301.0, 0.3)]);
        write_table(dir.path(), "01.csv", &[(300.0, 0.1), (301.0, 0.15)]);
        write_table(dir.path(), "03.CSV", &[(300.0, 0.3), (301.0, 0.45)]);
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let raw = TableDirectory::new(dir.path()).decode().unwrap();
        assert_eq!(raw.n_cycles(), 3);
        assert_eq!(raw.spectra[[0, 0]], 0.1);
        assert_eq!(raw.spectra[[0, 1]], 0.2);
        assert_eq!(raw.spectra[[1, 2]], 0.45);
        assert_eq!(raw.times, vec![0.0, 1.0, 2.0]);
        assert_eq!(raw.cycle_time, None);
    }

    #[test]
    fn test_directory_with_cycle_time() {
        let dir = tempfile::tempdir().unwrap();
        write_table(dir.path(), "a.csv", &[(300.0, 0.1)]);
        write_table(dir.path(), "b.csv", &[(300.0, 0.2)]);

        let source = TableDirectoryBuilder::default()
            .path(dir.path())
            .cycle_time(Some(1.5))
            .build()
            .unwrap();
        let raw = source.decode().unwrap();
        assert_eq!(raw.times, vec![0.0, 1.5]);
        assert_eq!(raw.cycle_time, Some(1.5));
    }

    #[test]
    fn test_inconsistent_axis() {
        let dir = tempfile::tempdir().unwrap();
        write_table(dir.path(), "a.csv", &[(300.0, 0.1), (301.0, 0.2)]);
        write_table(dir.path(), "b.csv", &[(300.0, 0.1), (302.0, 0.2)]);
        let result = TableDirectory::new(dir.path()).decode();
        match result {
            Err(SpectraError::InconsistentAxis { file, expected, found }) => {
                assert!(file.ends_with("b.csv"));
                assert_eq!(expected, "301 nm at row 2");
                assert_eq!(found, "302 nm");
            }
            other => panic!("expected InconsistentAxis, got {other:?}"),
        }

        write_table(dir.path(), "c.csv", &[(300.0, 0.1)]);
        let result = TableDirectory::new(dir.path()).decode();
        assert!(matches!(result, Err(SpectraError::InconsistentAxis { .. })));
    }

    #[test]
    fn test_short_and_long_rows() {
        let short = parse_table("Wavelength (nm),Absorbance (AU)\n300,0.5\n301\n");
        match short {
            Err(SpectraError::Format(reason)) => assert!(reason.contains("row 3"), "{reason}"),
            other => panic!("expected Format, got {other:?}"),
        }

        let long = parse_table("Wavelength (nm),Absorbance (AU)\n300,0.5,extra\n")
            .unwrap()
            .unwrap();
        assert_eq!(long.wavelengths, vec![300.0]);
        assert_eq!(long.absorbance, vec![0.5]);
    }

    #[test]
    fn test_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let result = TableDirectory::new(dir.path()).decode();
        assert!(matches!(result, Err(SpectraError::EmptyDataset(_))));

        std::fs::write(dir.path().join("blank.csv"), "Wavelength (nm),Absorbance (AU)\n").unwrap();
        let result = TableDirectory::new(dir.path()).decode();
        assert!(matches!(result, Err(SpectraError::EmptyDataset(_))));
    }
}
