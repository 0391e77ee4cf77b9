use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

/// Expands measurement inputs into a flat list of FITS files. Directories
/// are scanned one level deep and their FITS entries sorted; plain FITS
/// paths are passed through.
pub fn resolve_inputs<I, P>(paths: I) -> Result<Vec<PathBuf>>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut resolved = Vec::new();
    for path in paths {
        let path = path.as_ref();
        if path.is_dir() {
            let mut fits: Vec<PathBuf> = fs::read_dir(path)
                .with_context(|| format!("Failed to read directory {:?}", path))?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| is_fits_path(p))
                .collect();
            fits.sort();
            if fits.is_empty() {
                bail!("No .fits files found in directory {:?}", path);
            }
            resolved.extend(fits);
        } else if is_fits_path(path) {
            resolved.push(path.to_path_buf());
        } else {
            bail!("{:?} is neither a FITS file nor a directory", path);
        }
    }
    Ok(resolved)
}

fn is_fits_path(p: &Path) -> bool {
    p.extension()
        .map(|ext| {
            let e = ext.to_ascii_lowercase();
            e == "fits" || e == "fit" || e == "fts"
        })
        .unwrap_or(false)
}
