//! Agilent ChemStation `.KD` container decoding
//!
//! A `.KD` file is not parsed structurally. Instead the container is scanned for
//! three UTF-16LE tags, each followed (at a fixed distance) by little-endian
//! `f64` payloads:
//!
//! | Tag             | Payload offset | Payload                                   |
//! |-----------------|----------------|-------------------------------------------|
//! | `(AU)`          | 17 bytes       | one absorbance value per grid wavelength  |
//! | `RelTime`       | 20 bytes       | spectrum acquisition time (s)             |
//! | `CycleTimew`    | 24 bytes       | experiment cycle time (s), first hit only |
//!
//! After every hit the scan resumes one absorbance block past the payload start.

use crate::{
    error::{Result, SpectraError},
    spectra::{RawSpectra, SpectralDecoder, source_name},
};
use byteorder::{ByteOrder, LittleEndian as LE};
use memchr::memmem;
use memmap3::MmapOptions;
use ndarray::Array2;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A tag searched for in the container bytes
#[derive(Debug, Clone, Copy)]
pub struct Tag {
    pub signature: &'static [u8],
    /// Distance in bytes from the start of the tag to the start of its payload
    pub payload_offset: usize,
}

/// `(AU)` in UTF-16LE, precedes every absorbance block
pub const ABSORBANCE_TAG: Tag = Tag {
    signature: b"(\x00A\x00U\x00)\x00",
    payload_offset: 17,
};

/// `RelTime` in UTF-16LE, precedes every spectrum timestamp
pub const SPECTRUM_TIME_TAG: Tag = Tag {
    signature: b"R\x00e\x00l\x00T\x00i\x00m\x00e\x00",
    payload_offset: 20,
};

/// `CycleTimew` in UTF-16LE plus padding, precedes the cycle time
pub const CYCLE_TIME_TAG: Tag = Tag {
    signature: b"C\x00y\x00c\x00l\x00e\x00T\x00i\x00m\x00e\x00w\x00\x00\x00\x00\x00",
    payload_offset: 24,
};

/// Wavelength grid recorded by the spectrometer
///
/// The detector writes one `f64` per integer wavelength in
/// `first_wavelength..last_wavelength` (exclusive upper bound).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KdLayout {
    pub first_wavelength: u32,
    pub last_wavelength: u32,
}

impl Default for KdLayout {
    fn default() -> Self {
        Self {
            first_wavelength: 190,
            last_wavelength: 1100,
        }
    }
}

impl KdLayout {
    #[must_use]
    pub fn n_wavelengths(&self) -> usize {
        self.last_wavelength.saturating_sub(self.first_wavelength) as usize
    }

    /// Length in bytes of one absorbance block
    #[must_use]
    pub fn block_len(&self) -> usize {
        self.n_wavelengths() * std::mem::size_of::<f64>()
    }

    #[must_use]
    pub fn wavelengths(&self) -> Vec<f64> {
        (self.first_wavelength..self.last_wavelength)
            .map(f64::from)
            .collect()
    }
}

/// A `.KD` container on disk
#[derive(Debug, Clone)]
pub struct KdFile {
    pub path: PathBuf,
    pub layout: KdLayout,
}

impl KdFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            layout: KdLayout::default(),
        }
    }

    #[must_use]
    pub fn with_layout(mut self, layout: KdLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Memory-map the container and decode it
    ///
    /// # Errors
    /// Will return `Err` if:
    /// - the file cannot be opened or memory-mapped
    /// - the file is empty or carries no `.KD` signatures
    /// - see [`decode_kd_bytes`] for the remaining failure modes
    pub fn read(&self) -> Result<RawSpectra> {
        let file = File::open(&self.path)?;
        let name = source_name(&self.path);

        if file.metadata()?.len() == 0 {
            return Err(SpectraError::Format(format!("{name} is empty")));
        }

        // The map is read-only and dropped before this function returns.
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        decode_kd_bytes(&name, &mmap, &self.layout)
    }
}

impl SpectralDecoder for KdFile {
    fn decode(&self) -> Result<RawSpectra> {
        self.read()
    }
}

/// Decode the bytes of a `.KD` container
///
/// # Errors
/// Will return `Err` if:
/// - neither absorbance nor time signatures are present (`Format`)
/// - absorbance tags exist but none carries a complete block (`EmptyDataset`)
/// - the number of timestamps differs from the number of spectra (`Format`)
/// - the timestamps decrease (`Format`)
pub fn decode_kd_bytes(name: &str, bytes: &[u8], layout: &KdLayout) -> Result<RawSpectra> {
    let block_len = layout.block_len();
    if block_len == 0 {
        return Err(SpectraError::Format(format!(
            "{name}: spectrometer range {}..{} holds no wavelengths",
            layout.first_wavelength, layout.last_wavelength
        )));
    }

    let has_absorbance = memmem::find(bytes, ABSORBANCE_TAG.signature).is_some();
    let has_times = memmem::find(bytes, SPECTRUM_TIME_TAG.signature).is_some();
    if !has_absorbance && !has_times {
        return Err(SpectraError::Format(format!(
            "{name}: no absorbance or spectrum time signatures (not a .KD container?)"
        )));
    }

    let n_wavelengths = layout.n_wavelengths();
    let blocks = scan_tag(bytes, &ABSORBANCE_TAG, block_len, |start| {
        let block = bytes.get(start..start + block_len)?;
        let mut values = vec![0.0; n_wavelengths];
        LE::read_f64_into(block, &mut values);
        Some(values)
    });
    if blocks.is_empty() {
        return Err(SpectraError::EmptyDataset(name.to_string()));
    }

    let times = scan_tag(bytes, &SPECTRUM_TIME_TAG, block_len, |start| read_f64(bytes, start));
    if times.len() != blocks.len() {
        return Err(SpectraError::Format(format!(
            "{name}: found {} spectra but {} spectrum times",
            blocks.len(),
            times.len()
        )));
    }

    // Only constant cycle times are recorded; fractional seconds are dropped.
    let cycle_time = scan_tag(bytes, &CYCLE_TIME_TAG, block_len, |start| read_f64(bytes, start))
        .first()
        .map(|ct| ct.trunc())
        .filter(|ct| {
            let usable = ct.is_finite() && *ct > 0.0;
            if !usable {
                warn!("{name}: ignoring unusable cycle time {ct}");
            }
            usable
        });

    debug!(
        "{}: decoded {} spectra, cycle time {:?}",
        name,
        blocks.len(),
        cycle_time
    );

    let n_cycles = blocks.len();
    let spectra = Array2::from_shape_fn((n_wavelengths, n_cycles), |(row, col)| blocks[col][row]);

    RawSpectra::new(name, layout.wavelengths(), spectra, times, cycle_time)
}

/// Find every occurrence of `tag` and parse its payload
///
/// Payloads that `parse` rejects (e.g. truncated at end of file) are skipped.
fn scan_tag<T>(
    bytes: &[u8],
    tag: &Tag,
    stride: usize,
    mut parse: impl FnMut(usize) -> Option<T>,
) -> Vec<T> {
    let finder = memmem::Finder::new(tag.signature);
    let mut found = Vec::new();
    let mut position = 0;

    while position < bytes.len() {
        let Some(hit) = finder.find(&bytes[position..]) else {
            break;
        };
        let payload_start = position + hit + tag.payload_offset;
        match parse(payload_start) {
            Some(value) => found.push(value),
            None => debug!("Skipping truncated payload at byte {}", payload_start),
        }
        position = payload_start + stride;
    }

    found
}

fn read_f64(bytes: &[u8], start: usize) -> Option<f64> {
    bytes.get(start..start + 8).map(LE::read_f64)
}
