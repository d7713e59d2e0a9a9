use crate::io::{RasterRef, RasterTools};
use crate::types::{MaskError, MaskResult, KEEP, SUPPRESS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Smoothing iterations passed to every fill stage
const FILL_SMOOTHING_ITERATIONS: u32 = 0;

/// Smoothing parameters, in the linear unit of the mask CRS
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmoothingParams {
    /// Smoothing radius (positive)
    pub radius: f64,
    /// Signed buffer: positive grows the suppressed region, negative shrinks it
    pub buffer: f64,
}

impl Default for SmoothingParams {
    fn default() -> Self {
        Self {
            radius: 250.0,
            buffer: 0.0,
        }
    }
}

/// One tag-and-fill pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothingStage {
    /// Mask value tagged as no-data before filling
    pub nodata: u8,
    /// Maximum fill distance in pixels
    pub max_distance: f64,
}

/// Ordered fill passes for a given radius and buffer
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothingPlan {
    pub radius_px: f64,
    pub buffer_px: f64,
    pub stages: Vec<SmoothingStage>,
}

impl SmoothingPlan {
    /// Build the pass sequence from pixel distances
    ///
    /// Passes 1-3 close, open and re-close the suppressed region; pass 3
    /// overshoots a positive buffer by half, which pass 4 takes back.
    pub fn new(radius_px: f64, buffer_px: f64) -> Self {
        let buffer_term = if buffer_px > 0.0 { buffer_px * 1.5 } else { buffer_px };

        let mut stages = vec![
            SmoothingStage {
                nodata: KEEP,
                max_distance: radius_px * 0.75,
            },
            SmoothingStage {
                nodata: SUPPRESS,
                max_distance: radius_px * 2.0,
            },
            SmoothingStage {
                nodata: KEEP,
                max_distance: radius_px * 1.25 + buffer_term,
            },
        ];
        if buffer_px > 0.0 {
            stages.push(SmoothingStage {
                nodata: SUPPRESS,
                max_distance: buffer_px / 2.0,
            });
        }

        Self {
            radius_px,
            buffer_px,
            stages,
        }
    }

    /// Convert linear distances to pixels using the mean pixel size
    pub fn for_resolution(params: &SmoothingParams, mean_resolution: f64) -> MaskResult<Self> {
        if !(mean_resolution.is_finite() && mean_resolution > 0.0) {
            return Err(MaskError::Processing(format!(
                "Invalid mask resolution for smoothing: {}",
                mean_resolution
            )));
        }
        if params.radius < 0.0 {
            return Err(MaskError::Processing(format!(
                "Smoothing radius must not be negative: {}",
                params.radius
            )));
        }
        Ok(Self::new(
            params.radius / mean_resolution,
            params.buffer / mean_resolution,
        ))
    }

    /// Fill distances in execution order
    pub fn distances(&self) -> Vec<f64> {
        self.stages.iter().map(|s| s.max_distance).collect()
    }
}

/// Smooths and buffers binary masks through external fill passes
pub struct MaskSmoother {
    params: SmoothingParams,
}

impl MaskSmoother {
    pub fn new(params: SmoothingParams) -> Self {
        Self { params }
    }

    /// Smooth `mask`, writing intermediates into a unique directory under `scratch_dir`
    ///
    /// Returns the path of the smoothed mask, which carries no no-data tag.
    pub fn smooth(
        &self,
        mask: &Path,
        tools: &dyn RasterTools,
        scratch_dir: &Path,
    ) -> MaskResult<PathBuf> {
        let raster = RasterRef::open(mask)?;
        let plan = SmoothingPlan::for_resolution(&self.params, raster.grid.mean_resolution())?;

        log::info!(
            "Smoothing {} (radius {} px, buffer {} px, {} passes)",
            mask.display(),
            plan.radius_px,
            plan.buffer_px,
            plan.stages.len()
        );

        let work_dir = tempfile::Builder::new()
            .prefix("smooth_")
            .tempdir_in(scratch_dir)?
            .into_path();

        let mut intermediates = Vec::new();
        let mut current = mask.to_path_buf();
        for (index, stage) in plan.stages.iter().enumerate() {
            let tagged = work_dir.join(format!("stage{}_tagged.tif", index + 1));
            let filled = work_dir.join(format!("stage{}_filled.tif", index + 1));
            let distance = stage.max_distance.max(0.0);

            log::debug!(
                "Pass {}: nodata={} max distance {} px",
                index + 1,
                stage.nodata,
                distance
            );
            tools.set_nodata(&current, &tagged, Some(stage.nodata as f64))?;
            tools.fill_nodata(&tagged, &filled, distance, FILL_SMOOTHING_ITERATIONS)?;

            intermediates.push(tagged);
            intermediates.push(filled.clone());
            current = filled;
        }

        let smoothed = work_dir.join("smoothed.tif");
        tools.set_nodata(&current, &smoothed, None)?;

        for path in intermediates {
            if let Err(e) = std::fs::remove_file(&path) {
                log::debug!("Could not remove {}: {}", path.display(), e);
            }
        }

        Ok(smoothed)
    }
}

/// Smooth a mask raster with the given radius and signed buffer
pub fn smooth_mask(
    mask: &Path,
    tools: &dyn RasterTools,
    scratch_dir: &Path,
    radius: f64,
    buffer: f64,
) -> MaskResult<PathBuf> {
    MaskSmoother::new(SmoothingParams { radius, buffer }).smooth(mask, tools, scratch_dir)
}
