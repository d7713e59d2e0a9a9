use crate::types::{BinaryMask, GridSpec, MaskError, MaskResult};
use gdal::raster::Buffer;
use gdal::{Dataset, DriverManager, Metadata};
use ndarray::Array2;
use std::path::{Path, PathBuf};

/// Driver formats that never live on disk and are replaced on output
const NON_PHYSICAL_FORMATS: &[&str] = &["VRT", "MEM"];

/// Format used when the source format cannot be written back
pub const DEFAULT_OUTPUT_FORMAT: &str = "GTiff";

/// Sample type of a single raster band
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandType {
    /// GDAL data type name, e.g. "UInt16"
    pub name: String,
    pub floating: bool,
}

impl BandType {
    fn from_name(name: String) -> Self {
        let floating = matches!(
            name.as_str(),
            "Float32" | "Float64" | "CFloat32" | "CFloat64"
        );
        Self { name, floating }
    }
}

/// Georeferenced raster on disk, as described by GDAL
#[derive(Debug, Clone)]
pub struct RasterRef {
    pub path: PathBuf,
    pub grid: GridSpec,
    /// Coordinate reference system as WKT
    pub crs: String,
    pub band_types: Vec<BandType>,
    /// No-data value declared on the first band
    pub no_data: Option<f64>,
    /// Short name of the GDAL driver that opened the file
    pub driver: String,
}

impl RasterRef {
    /// Read raster geometry and band layout
    pub fn open<P: AsRef<Path>>(path: P) -> MaskResult<Self> {
        let path = path.as_ref();
        let dataset = Dataset::open(path)?;
        let raster = Self::describe(path, &dataset)?;

        log::debug!(
            "Opened {} ({}x{}, {} band(s), driver {})",
            path.display(),
            raster.grid.size.0,
            raster.grid.size.1,
            raster.band_count(),
            raster.driver
        );

        Ok(raster)
    }

    fn describe(path: &Path, dataset: &Dataset) -> MaskResult<Self> {
        let geo_transform = dataset.geo_transform()?;
        let size = dataset.raster_size();

        let band_count = dataset.raster_count() as usize;
        if band_count == 0 {
            return Err(MaskError::Processing(format!(
                "Raster has no bands: {}",
                path.display()
            )));
        }

        let mut band_types = Vec::with_capacity(band_count);
        let mut no_data = None;
        for index in 1..=band_count {
            let band = dataset.rasterband(index as isize)?;
            if index == 1 {
                no_data = band.no_data_value();
            }
            band_types.push(BandType::from_name(format!("{:?}", band.band_type())));
        }

        Ok(Self {
            path: path.to_path_buf(),
            grid: GridSpec::from_geo_transform(&geo_transform, size),
            crs: dataset.projection(),
            band_types,
            no_data,
            driver: dataset.driver().short_name(),
        })
    }

    pub fn band_count(&self) -> usize {
        self.band_types.len()
    }
}

/// Writable raster format known to the GDAL installation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterFormat {
    /// GDAL driver short name
    pub name: String,
    /// Canonical file extension, without the dot
    pub extension: String,
}

impl RasterFormat {
    /// Look up a writable GDAL driver by short name
    pub fn lookup(name: &str) -> MaskResult<Self> {
        let driver = DriverManager::get_driver_by_name(name)
            .map_err(|_| MaskError::UnsupportedFormat(name.to_string()))?;

        let can_write = ["DCAP_CREATE", "DCAP_CREATECOPY"]
            .iter()
            .any(|cap| driver.metadata_item(cap, "").as_deref() == Some("YES"));
        if !can_write {
            return Err(MaskError::UnsupportedFormat(format!(
                "{} (driver cannot write files)",
                name
            )));
        }

        let extension = match driver.metadata_item("DMD_EXTENSION", "") {
            Some(ext) if !ext.trim().is_empty() => ext.trim().to_string(),
            _ if name.eq_ignore_ascii_case("ENVI") => "dat".to_string(),
            _ => name.to_lowercase(),
        };

        Ok(Self {
            name: driver.short_name(),
            extension,
        })
    }

    /// Output format for a source raster written by `driver`
    ///
    /// Virtual and in-memory sources fall back to GeoTIFF.
    pub fn for_source(driver: &str) -> MaskResult<Self> {
        if NON_PHYSICAL_FORMATS
            .iter()
            .any(|f| f.eq_ignore_ascii_case(driver))
        {
            log::debug!(
                "Source format {} is not physical, writing {}",
                driver,
                DEFAULT_OUTPUT_FORMAT
            );
            return Self::lookup(DEFAULT_OUTPUT_FORMAT);
        }
        Self::lookup(driver)
    }

    /// Uncompressed interleaved format whose header lives in a sidecar file
    pub fn is_envi(&self) -> bool {
        self.name.eq_ignore_ascii_case("ENVI")
    }

    /// Whether the COMPRESS creation option applies to this format
    pub fn supports_compression(&self) -> bool {
        self.name.eq_ignore_ascii_case("GTiff")
    }
}

/// Read a single-band mask raster into memory
pub fn read_mask<P: AsRef<Path>>(path: P) -> MaskResult<BinaryMask> {
    let path = path.as_ref();
    let dataset = Dataset::open(path)?;
    let grid = GridSpec::from_geo_transform(&dataset.geo_transform()?, dataset.raster_size());
    let (width, height) = grid.size;

    let band = dataset.rasterband(1)?;
    let buffer = band.read_as::<u8>((0, 0), (width, height), (width, height), None)?;
    let data = Array2::from_shape_vec(grid.shape(), buffer.data)
        .map_err(|e| MaskError::Processing(format!("Failed to reshape mask data: {}", e)))?;

    Ok(BinaryMask {
        data,
        grid,
        crs: dataset.projection(),
    })
}

/// Write a mask as an untagged single-band Byte GeoTIFF
pub fn write_mask<P: AsRef<Path>>(mask: &BinaryMask, path: P) -> MaskResult<()> {
    let path = path.as_ref();
    let (width, height) = mask.grid.size;
    if mask.data.dim() != mask.grid.shape() {
        return Err(MaskError::GridMismatch(format!(
            "mask array {:?} does not fit grid {:?}",
            mask.data.dim(),
            mask.grid.shape()
        )));
    }

    let driver = DriverManager::get_driver_by_name(DEFAULT_OUTPUT_FORMAT)?;
    let mut dataset = driver.create_with_band_type::<u8, _>(path, width as _, height as _, 1)?;
    dataset.set_geo_transform(&mask.grid.geo_transform())?;
    if !mask.crs.is_empty() {
        dataset.set_projection(&mask.crs)?;
    }

    let values: Vec<u8> = mask.data.iter().copied().collect();
    let buffer = Buffer::new((width, height), values);
    let mut band = dataset.rasterband(1)?;
    band.write((0, 0), (width, height), &buffer)?;

    log::debug!("Wrote mask {} ({}x{})", path.display(), width, height);
    Ok(())
}
