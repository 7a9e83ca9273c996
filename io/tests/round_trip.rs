//! Table sources written back out must reproduce the original axis and values

use approx::assert_relative_eq;
use uvpro_io::{SpectralDecoder, TableDirectory, write_table_directory};

fn write_source(dir: &std::path::Path, n_spectra: usize) {
    for i in 0..n_spectra {
        let mut text = String::from("Wavelength (nm),Absorbance (AU)\n");
        for wl in 0..25 {
            let wavelength = 400.0 + wl as f64 * 2.0;
            let absorbance = 0.1 + (wl as f64 * 0.37 + i as f64 * 0.11).sin().abs() / 3.0;
            text.push_str(&format!("{wavelength},{absorbance}\n"));
        }
        std::fs::write(dir.join(format!("spectrum_{i:03}.csv")), text).unwrap();
    }
}

#[test]
fn test_table_directory_round_trip() {
    let source_dir = tempfile::tempdir().unwrap();
    write_source(source_dir.path(), 7);

    let original = TableDirectory::new(source_dir.path()).decode().unwrap();
    assert_eq!(original.n_cycles(), 7);
    assert_eq!(original.wavelengths.len(), 25);

    let export_dir = tempfile::tempdir().unwrap();
    write_table_directory(export_dir.path(), &original.wavelengths, original.spectra.view()).unwrap();

    let reread = TableDirectory::new(export_dir.path()).decode().unwrap();
    assert_eq!(reread.wavelengths, original.wavelengths);
    assert_eq!(reread.spectra.dim(), original.spectra.dim());
    for (a, b) in reread.spectra.iter().zip(original.spectra.iter()) {
        assert_relative_eq!(*a, *b, max_relative = 1e-12);
    }
    assert_eq!(reread.times, original.times);
}
