//! I/O modules for raster access and external GDAL utilities

pub mod raster;
pub mod tools;

pub use raster::{read_mask, write_mask, BandType, RasterFormat, RasterRef, DEFAULT_OUTPUT_FORMAT};
pub use tools::{GdalBinaries, GdalCommandTools, RasterTools, ToolInvocation};
