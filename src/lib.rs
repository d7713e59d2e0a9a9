//! scenemask: cloud and no-data masking for Sentinel-2 rasters
//!
//! Pairs Sentinel-2 products with their scene classification (SCL) rasters by
//! filename, builds binary keep/suppress masks from a named policy, optionally
//! smooths and buffers them, brings them onto each product's grid and writes
//! masked copies of the products.
//!
//! ```no_run
//! use scenemask::{mask_rasters, MaskRequest};
//! use std::path::PathBuf;
//!
//! let request = MaskRequest::new(
//!     vec![PathBuf::from("S2A2A_20200101_022_32TNR_BOA_10.tif")],
//!     vec![PathBuf::from("S2A2A_20200101_022_32TNR_SCL_10.tif")],
//!     "cloud_high_proba",
//!     "masked",
//! );
//! let outputs = mask_rasters(&request)?;
//! # Ok::<(), scenemask::MaskError>(())
//! ```

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{BinaryMask, GridSpec, MaskError, MaskResult, ResampleKernel, KEEP, SUPPRESS};

pub use io::{GdalBinaries, GdalCommandTools, RasterFormat, RasterRef, RasterTools};

pub use crate::core::{
    mask_rasters, smooth_mask, BatchMasker, BatchReport, Compression, MaskPolicy, MaskRequest,
    ProductMetadata, SmoothingParams, SubdirMode,
};
