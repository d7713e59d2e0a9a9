use crate::io::{RasterRef, RasterTools};
use crate::types::{MaskError, MaskResult, ResampleKernel};
use std::path::{Path, PathBuf};

/// Brings a mask onto the pixel grid of the raster it will be applied to
pub struct ResolutionReconciler {
    kernel: ResampleKernel,
}

impl ResolutionReconciler {
    pub fn new(kernel: ResampleKernel) -> Self {
        Self { kernel }
    }

    /// Return a mask on `target`'s grid
    ///
    /// When both axes already have the target's pixel size the input path is
    /// returned untouched; otherwise the mask is regridded into `scratch_dir`
    /// and the result is checked against the target grid.
    pub fn reconcile(
        &self,
        mask: &Path,
        target: &RasterRef,
        tools: &dyn RasterTools,
        scratch_dir: &Path,
    ) -> MaskResult<PathBuf> {
        let mask_raster = RasterRef::open(mask)?;

        if mask_raster.grid.same_resolution(&target.grid) {
            log::debug!("Mask {} already at target resolution", mask.display());
            return Ok(mask.to_path_buf());
        }

        log::info!(
            "Resampling mask from {:?} to {:?} ({} kernel)",
            mask_raster.grid.resolution,
            target.grid.resolution,
            self.kernel
        );

        let stem = mask
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "mask".to_string());
        let regridded = scratch_dir.join(format!(
            "{}_{}x{}.tif",
            stem,
            target.grid.size.0,
            target.grid.size.1
        ));

        tools.regrid(mask, &regridded, &target.grid, &target.crs, self.kernel)?;

        let result = RasterRef::open(&regridded)?;
        if !result.grid.matches(&target.grid) {
            return Err(MaskError::GridMismatch(format!(
                "regridded mask {:?} does not match {} {:?}",
                result.grid,
                target.path.display(),
                target.grid
            )));
        }

        Ok(regridded)
    }
}

impl Default for ResolutionReconciler {
    fn default() -> Self {
        Self::new(ResampleKernel::default())
    }
}
