use crate::io::{BandType, RasterFormat, RasterRef, DEFAULT_OUTPUT_FORMAT};
use crate::types::{MaskError, MaskResult, SUPPRESS};
use gdal::raster::{Buffer, RasterCreationOption};
use gdal::{Dataset, DatasetOptions, DriverManager, GdalOpenFlags};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Minimum rows per read/write window; windows are whole blocks
const MIN_STRIP_ROWS: usize = 256;

/// The working copy is uncompressed and may pass 4 GB
const WORKING_COPY_OPTIONS: [RasterCreationOption<'static>; 1] = [RasterCreationOption {
    key: "BIGTIFF",
    value: "IF_SAFER",
}];

/// Compression applied to formats that support the COMPRESS creation option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Lzw,
    Deflate,
    Packbits,
    Jpeg,
}

impl Compression {
    /// Value for the GDAL COMPRESS creation option
    pub fn gdal_name(&self) -> &'static str {
        match self {
            Compression::None => "NONE",
            Compression::Lzw => "LZW",
            Compression::Deflate => "DEFLATE",
            Compression::Packbits => "PACKBITS",
            Compression::Jpeg => "JPEG",
        }
    }
}

impl Default for Compression {
    fn default() -> Self {
        Compression::Deflate
    }
}

/// Sentinel written into suppressed pixels of a band
///
/// Uses the declared no-data value, else 0 for integer and NaN for
/// floating-point bands.
pub fn nodata_sentinel(declared: Option<f64>, band_type: &BandType) -> f64 {
    match declared {
        Some(value) => value,
        None if band_type.floating => f64::NAN,
        None => 0.0,
    }
}

/// Writes masked copies of multi-band rasters
pub struct MaskApplicator {
    format: RasterFormat,
    compression: Compression,
    overwrite: bool,
}

impl MaskApplicator {
    pub fn new(format: RasterFormat, compression: Compression, overwrite: bool) -> Self {
        Self {
            format,
            compression,
            overwrite,
        }
    }

    /// Write `input` to `output` with every pixel where `mask` is 0 set to no-data
    ///
    /// The output only appears at `output` once it is complete; a failed
    /// write leaves nothing behind.
    pub fn apply(&self, input: &RasterRef, mask: &Path, output: &Path) -> MaskResult<PathBuf> {
        let mask_raster = RasterRef::open(mask)?;
        if !mask_raster.grid.matches(&input.grid) {
            return Err(MaskError::GridMismatch(format!(
                "mask {:?} does not match {} {:?}",
                mask_raster.grid,
                input.path.display(),
                input.grid
            )));
        }

        self.prepare_output(output)?;
        let stage = StagedOutput::new(output)?;

        let working = stage.path("working.tif");
        let suppressed = mask_working_copy(input, mask, &working)?;

        let file_name = output
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| "output".to_string());
        let payload = stage.path(&file_name);
        self.write_payload(&working, &payload)?;
        if let Err(e) = std::fs::remove_file(&working) {
            log::debug!("Could not remove {}: {}", working.display(), e);
        }

        stage.commit(&payload, output, self.format.is_envi())?;

        let (width, height) = input.grid.size;
        log::info!(
            "Wrote {} ({}, {:.2}% masked)",
            output.display(),
            self.format.name,
            suppressed as f64 / (width * height).max(1) as f64 * 100.0
        );
        Ok(output.to_path_buf())
    }

    fn creation_options(&self) -> Vec<RasterCreationOption<'static>> {
        if self.format.supports_compression() && self.compression != Compression::None {
            vec![RasterCreationOption {
                key: "COMPRESS",
                value: self.compression.gdal_name(),
            }]
        } else {
            Vec::new()
        }
    }

    fn prepare_output(&self, output: &Path) -> MaskResult<()> {
        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        if output.exists() {
            if !self.overwrite {
                return Err(MaskError::Processing(format!(
                    "Output already exists: {}",
                    output.display()
                )));
            }
            log::debug!("Replacing existing output {}", output.display());
        }
        Ok(())
    }

    fn write_payload(&self, working: &Path, payload: &Path) -> MaskResult<()> {
        let driver = DriverManager::get_driver_by_name(&self.format.name)?;
        let source = Dataset::open(working)?;
        let written = source.create_copy(&driver, payload, &self.creation_options())?;
        drop(written);
        Ok(())
    }
}

/// Copy `input` to an uncompressed GeoTIFF at `working` and mask it in place
///
/// Bands are processed in row strips so memory stays bounded by the strip
/// size. Returns the number of suppressed pixels.
fn mask_working_copy(input: &RasterRef, mask: &Path, working: &Path) -> MaskResult<usize> {
    let gtiff = DriverManager::get_driver_by_name(DEFAULT_OUTPUT_FORMAT)?;
    {
        let source = Dataset::open(&input.path)?;
        let copy = source.create_copy(&gtiff, working, &WORKING_COPY_OPTIONS)?;
        drop(copy);
    }

    let dataset = Dataset::open_ex(
        working,
        DatasetOptions {
            open_flags: GdalOpenFlags::GDAL_OF_UPDATE | GdalOpenFlags::GDAL_OF_RASTER,
            ..Default::default()
        },
    )?;
    let mask_dataset = Dataset::open(mask)?;
    let mask_band = mask_dataset.rasterband(1)?;

    let mut bands = Vec::with_capacity(input.band_count());
    let mut sentinels = Vec::with_capacity(input.band_count());
    for (index, band_type) in input.band_types.iter().enumerate() {
        let band = dataset.rasterband((index + 1) as isize)?;
        sentinels.push(nodata_sentinel(band.no_data_value(), band_type));
        bands.push(band);
    }

    let (width, height) = input.grid.size;
    let rows = strip_rows(bands.first().map_or(1, |band| band.block_size().1));
    let mut suppressed = 0;
    for (row, strip_height) in strips(height, rows) {
        let window = (0, row as isize);
        let size = (width, strip_height);
        let keep = mask_band.read_as::<u8>(window, size, size, None)?.data;
        let strip_suppressed = keep.iter().filter(|&&v| v == SUPPRESS).count();
        if strip_suppressed == 0 {
            continue;
        }
        suppressed += strip_suppressed;

        for (band, &sentinel) in bands.iter_mut().zip(sentinels.iter()) {
            let mut values = band.read_as::<f64>(window, size, size, None)?.data;
            mask_values(&mut values, &keep, sentinel);
            let buffer = Buffer::new(size, values);
            band.write(window, size, &buffer)?;
        }
    }

    for (band, &sentinel) in bands.iter_mut().zip(sentinels.iter()) {
        band.set_no_data_value(Some(sentinel))?;
    }

    log::debug!(
        "Masked {} band(s) of {} in {}-row strips",
        bands.len(),
        input.path.display(),
        rows
    );
    Ok(suppressed)
}

/// Rows per strip: whole blocks, at least [`MIN_STRIP_ROWS`]
fn strip_rows(block_rows: usize) -> usize {
    let block = block_rows.max(1);
    ((MIN_STRIP_ROWS + block - 1) / block) * block
}

/// (first row, row count) of each strip covering `height` rows
fn strips(height: usize, rows: usize) -> impl Iterator<Item = (usize, usize)> {
    (0..height)
        .step_by(rows.max(1))
        .map(move |row| (row, rows.max(1).min(height - row)))
}

fn mask_values(values: &mut [f64], keep: &[u8], sentinel: f64) {
    for (value, &flag) in values.iter_mut().zip(keep.iter()) {
        if flag == SUPPRESS {
            *value = sentinel;
        }
    }
}

/// Files written beside an output and moved into place once complete
///
/// Everything lives in a hidden directory next to the output, so the final
/// rename stays on one filesystem. Dropping an uncommitted stage removes it.
struct StagedOutput {
    dir: TempDir,
}

impl StagedOutput {
    fn new(output: &Path) -> MaskResult<Self> {
        let parent = match output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let stem = output
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let dir = tempfile::Builder::new()
            .prefix(&format!(".{}.", stem))
            .suffix(".partial")
            .tempdir_in(parent)?;
        Ok(Self { dir })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Move `payload` to `output`; an ENVI header goes first so the payload
    /// never appears without it
    fn commit(self, payload: &Path, output: &Path, envi: bool) -> MaskResult<()> {
        let mut moved_header = None;
        if envi {
            let header = payload.with_extension("hdr");
            if header.exists() {
                let target = output.with_extension("hdr");
                std::fs::rename(&header, &target)?;
                moved_header = Some(target);
            } else {
                log::warn!("ENVI header missing for {}", payload.display());
            }
        }

        if let Err(e) = std::fs::rename(payload, output) {
            if let Some(header) = moved_header {
                if let Err(e) = std::fs::remove_file(&header) {
                    log::debug!("Could not remove {}: {}", header.display(), e);
                }
            }
            return Err(e.into());
        }

        if let Err(e) = self.dir.close() {
            log::debug!("Could not remove staging directory: {}", e);
        }
        Ok(())
    }
}
