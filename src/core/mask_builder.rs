use crate::core::policy::{ClassValueSet, MaskLayer};
use crate::types::{BinaryMask, GridSpec, MaskError, MaskResult, KEEP, SUPPRESS};
use gdal::Dataset;
use ndarray::{Array2, Zip};
use std::path::Path;

/// Builds binary keep/suppress masks from classification rasters
pub struct MaskBuilder;

impl MaskBuilder {
    /// Build the mask for one classification layer
    pub fn build_layer<P: AsRef<Path>>(
        class_raster: P,
        layer: &MaskLayer,
    ) -> MaskResult<BinaryMask> {
        let path = class_raster.as_ref();
        log::debug!(
            "Building {} mask from {} (codes {:?})",
            layer.product_type,
            path.display(),
            layer.suppressed.codes()
        );

        let dataset = Dataset::open(path)?;
        let grid = GridSpec::from_geo_transform(&dataset.geo_transform()?, dataset.raster_size());
        let (width, height) = grid.size;

        let band = dataset.rasterband(1)?;
        let no_data = band.no_data_value();
        let buffer = band.read_as::<i32>((0, 0), (width, height), (width, height), None)?;
        let classes = Array2::from_shape_vec(grid.shape(), buffer.data)
            .map_err(|e| {
                MaskError::Processing(format!("Failed to reshape classification data: {}", e))
            })?;

        let mask = BinaryMask {
            data: Self::classify(&classes, no_data, &layer.suppressed),
            grid,
            crs: dataset.projection(),
        };

        log::info!(
            "{} mask from {}: {:.2}% suppressed",
            layer.product_type,
            path.display(),
            mask.suppressed_percentage()
        );
        Ok(mask)
    }

    /// Map classification codes to keep/suppress values
    ///
    /// Pixels equal to the band's declared no-data value count as code 0.
    pub fn classify(
        classes: &Array2<i32>,
        no_data: Option<f64>,
        suppressed: &ClassValueSet,
    ) -> Array2<u8> {
        classes.mapv(|code| {
            let code = match no_data {
                Some(nd) if code as f64 == nd => 0,
                _ => code,
            };
            if suppressed.contains(code) {
                SUPPRESS
            } else {
                KEEP
            }
        })
    }

    /// Combine per-layer masks: a pixel is kept only if every layer keeps it
    pub fn combine(mut masks: Vec<BinaryMask>) -> MaskResult<BinaryMask> {
        if masks.is_empty() {
            return Err(MaskError::Processing("No masks to combine".to_string()));
        }
        if masks.len() == 1 {
            return Ok(masks.remove(0));
        }

        let mut combined = masks.remove(0);
        for mask in &masks {
            if !mask.grid.matches(&combined.grid) {
                return Err(MaskError::GridMismatch(format!(
                    "classification layers differ: {:?} vs {:?}",
                    combined.grid, mask.grid
                )));
            }
            Zip::from(&mut combined.data)
                .and(&mask.data)
                .for_each(|acc, &value| {
                    let keep = *acc == KEEP && value == KEEP;
                    *acc = if keep { KEEP } else { SUPPRESS };
                });
        }

        log::debug!("Combined {} masks", masks.len() + 1);
        Ok(combined)
    }
}
