use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Mask value for pixels that must be suppressed
pub const SUPPRESS: u8 = 0;

/// Mask value for pixels that are kept
pub const KEEP: u8 = 1;

/// Relative tolerance used when comparing grid origins and pixel sizes
const GRID_TOLERANCE: f64 = 1e-9;

/// Pixel grid of a north-up raster
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    /// Upper-left corner (x, y) in CRS units
    pub origin: (f64, f64),
    /// Signed pixel size (width, height); height is negative for north-up rasters
    pub resolution: (f64, f64),
    /// Raster size in pixels (width, height)
    pub size: (usize, usize),
}

impl GridSpec {
    /// Build a grid from a GDAL geotransform and raster size
    pub fn from_geo_transform(gt: &[f64; 6], size: (usize, usize)) -> Self {
        Self {
            origin: (gt[0], gt[3]),
            resolution: (gt[1], gt[5]),
            size,
        }
    }

    /// GDAL geotransform for this grid (no rotation terms)
    pub fn geo_transform(&self) -> [f64; 6] {
        [
            self.origin.0,
            self.resolution.0,
            0.0,
            self.origin.1,
            0.0,
            self.resolution.1,
        ]
    }

    /// Mean absolute pixel size across both axes
    pub fn mean_resolution(&self) -> f64 {
        (self.resolution.0.abs() + self.resolution.1.abs()) / 2.0
    }

    /// Bounding box as (xmin, ymin, xmax, ymax)
    pub fn extent(&self) -> (f64, f64, f64, f64) {
        let x_end = self.origin.0 + self.size.0 as f64 * self.resolution.0;
        let y_end = self.origin.1 + self.size.1 as f64 * self.resolution.1;
        (
            self.origin.0.min(x_end),
            self.origin.1.min(y_end),
            self.origin.0.max(x_end),
            self.origin.1.max(y_end),
        )
    }

    /// Whether both axes have the same absolute pixel size
    pub fn same_resolution(&self, other: &GridSpec) -> bool {
        approx_eq(self.resolution.0.abs(), other.resolution.0.abs())
            && approx_eq(self.resolution.1.abs(), other.resolution.1.abs())
    }

    /// Whether origin, resolution and size all agree
    pub fn matches(&self, other: &GridSpec) -> bool {
        self.size == other.size
            && approx_eq(self.origin.0, other.origin.0)
            && approx_eq(self.origin.1, other.origin.1)
            && approx_eq(self.resolution.0, other.resolution.0)
            && approx_eq(self.resolution.1, other.resolution.1)
    }

    /// Array shape (rows, cols) matching this grid
    pub fn shape(&self) -> (usize, usize) {
        (self.size.1, self.size.0)
    }
}

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= GRID_TOLERANCE * a.abs().max(b.abs()).max(1.0)
}

/// Binary keep/suppress mask (1 = keep, 0 = suppress) on a georeferenced grid
#[derive(Debug, Clone)]
pub struct BinaryMask {
    pub data: Array2<u8>,
    pub grid: GridSpec,
    /// Coordinate reference system as WKT (may be empty)
    pub crs: String,
}

impl BinaryMask {
    /// Number of pixels marked for suppression
    pub fn suppressed_count(&self) -> usize {
        self.data.iter().filter(|&&v| v == SUPPRESS).count()
    }

    /// Fraction of suppressed pixels, in percent
    pub fn suppressed_percentage(&self) -> f64 {
        let total = self.data.len();
        if total == 0 {
            return 0.0;
        }
        self.suppressed_count() as f64 / total as f64 * 100.0
    }
}

/// Resampling kernel used when a mask is regridded onto an input raster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResampleKernel {
    Nearest,
    Mode,
    Bilinear,
    Cubic,
    Average,
}

impl ResampleKernel {
    /// Kernel name as understood by gdalwarp `-r`
    pub fn gdal_name(&self) -> &'static str {
        match self {
            ResampleKernel::Nearest => "near",
            ResampleKernel::Mode => "mode",
            ResampleKernel::Bilinear => "bilinear",
            ResampleKernel::Cubic => "cubic",
            ResampleKernel::Average => "average",
        }
    }
}

impl Default for ResampleKernel {
    fn default() -> Self {
        ResampleKernel::Mode
    }
}

impl std::fmt::Display for ResampleKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.gdal_name())
    }
}

/// Error types for masking operations
#[derive(Debug, thiserror::Error)]
pub enum MaskError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Filename does not follow the product naming convention: {0}")]
    MetadataParse(String),

    #[error("No {product_type} raster matches {input}")]
    MissingAncillary { input: String, product_type: String },

    #[error("Unsupported masking policy: {0}")]
    UnsupportedPolicy(String),

    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),

    #[error("External tool failed: {command} (exit status {status:?}): {stderr}")]
    ExternalTool {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("Grid mismatch: {0}")]
    GridMismatch(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

impl MaskError {
    /// Errors that invalidate the whole call rather than a single input
    pub fn is_call_wide(&self) -> bool {
        matches!(
            self,
            MaskError::UnsupportedPolicy(_) | MaskError::UnsupportedFormat(_)
        )
    }
}

/// Result type for masking operations
pub type MaskResult<T> = Result<T, MaskError>;
