#![allow(dead_code)]

use gdal::raster::{Buffer, GdalType};
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};
use ndarray::Array2;
use scenemask::io::{read_mask, write_mask, GdalBinaries, RasterTools};
use scenemask::{BinaryMask, GridSpec, MaskError, MaskResult, ResampleKernel, SUPPRESS};
use std::path::Path;
use std::sync::Mutex;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn grid(origin: (f64, f64), pixel: f64, size: (usize, usize)) -> GridSpec {
    GridSpec {
        origin,
        resolution: (pixel, -pixel),
        size,
    }
}

pub fn utm32n_wkt() -> String {
    SpatialRef::from_epsg(32632)
        .and_then(|srs| srs.to_wkt())
        .unwrap_or_default()
}

/// Write a multi-band GeoTIFF, one `Vec` per band in row-major order
pub fn write_raster<T: GdalType + Copy>(
    path: &Path,
    grid: &GridSpec,
    bands: &[Vec<T>],
    nodata: Option<f64>,
) {
    let (width, height) = grid.size;
    let driver = DriverManager::get_driver_by_name("GTiff").unwrap();
    let mut dataset = driver
        .create_with_band_type::<T, _>(path, width as isize, height as isize, bands.len() as isize)
        .unwrap();
    dataset.set_geo_transform(&grid.geo_transform()).unwrap();
    let wkt = utm32n_wkt();
    if !wkt.is_empty() {
        dataset.set_projection(&wkt).unwrap();
    }

    for (index, values) in bands.iter().enumerate() {
        assert_eq!(values.len(), width * height);
        let mut band = dataset.rasterband(index as isize + 1).unwrap();
        let buffer = Buffer::new((width, height), values.clone());
        band.write((0, 0), (width, height), &buffer).unwrap();
        if nodata.is_some() {
            band.set_no_data_value(nodata).unwrap();
        }
    }
}

/// Write a single-band UInt8 scene classification raster
pub fn write_scl(path: &Path, grid: &GridSpec, codes: Vec<u8>) {
    write_raster(path, grid, &[codes], None);
}

pub fn read_band<T: GdalType + Copy>(path: &Path, index: isize) -> Vec<T> {
    let dataset = Dataset::open(path).unwrap();
    let size = dataset.raster_size();
    let band = dataset.rasterband(index).unwrap();
    band.read_as::<T>((0, 0), size, size, None).unwrap().data
}

pub fn band_nodata(path: &Path, index: isize) -> Option<f64> {
    Dataset::open(path)
        .unwrap()
        .rasterband(index)
        .unwrap()
        .no_data_value()
}

/// GDAL utilities on `PATH`, if every one of them is installed
pub fn gdal_utilities() -> Option<GdalBinaries> {
    let binaries = GdalBinaries::discover();
    if binaries.available() {
        Some(binaries)
    } else {
        None
    }
}

/// One call received by [`RecordingTools`]
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    SetNodata(Option<f64>),
    Fill(f64),
    Regrid((usize, usize), ResampleKernel),
}

/// In-process `RasterTools` double
///
/// Tagging and filling copy the raster unchanged; regridding is a
/// nearest-neighbour lookup onto the target grid. Every call is recorded.
#[derive(Default)]
pub struct RecordingTools {
    calls: Mutex<Vec<ToolCall>>,
    fail_regrid: bool,
}

impl RecordingTools {
    pub fn failing_regrid() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_regrid: true,
        }
    }

    pub fn calls(&self) -> Vec<ToolCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fill_distances(&self) -> Vec<f64> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ToolCall::Fill(distance) => Some(distance),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ToolCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl RasterTools for RecordingTools {
    fn set_nodata(&self, src: &Path, dst: &Path, nodata: Option<f64>) -> MaskResult<()> {
        self.record(ToolCall::SetNodata(nodata));
        std::fs::copy(src, dst)?;
        Ok(())
    }

    fn fill_nodata(
        &self,
        src: &Path,
        dst: &Path,
        max_distance: f64,
        _smoothing_iterations: u32,
    ) -> MaskResult<()> {
        self.record(ToolCall::Fill(max_distance));
        std::fs::copy(src, dst)?;
        Ok(())
    }

    fn regrid(
        &self,
        src: &Path,
        dst: &Path,
        grid: &GridSpec,
        crs: &str,
        kernel: ResampleKernel,
    ) -> MaskResult<()> {
        self.record(ToolCall::Regrid(grid.size, kernel));
        if self.fail_regrid {
            return Err(MaskError::ExternalTool {
                command: "regrid".to_string(),
                status: Some(1),
                stderr: "simulated failure".to_string(),
            });
        }

        let source = read_mask(src)?;
        let (src_rows, src_cols) = source.grid.shape();
        let data = Array2::from_shape_fn(grid.shape(), |(row, col)| {
            let x = grid.origin.0 + (col as f64 + 0.5) * grid.resolution.0;
            let y = grid.origin.1 + (row as f64 + 0.5) * grid.resolution.1;
            let src_col = ((x - source.grid.origin.0) / source.grid.resolution.0).floor();
            let src_row = ((y - source.grid.origin.1) / source.grid.resolution.1).floor();
            if src_col < 0.0 || src_row < 0.0 {
                return SUPPRESS;
            }
            let (src_row, src_col) = (src_row as usize, src_col as usize);
            if src_row >= src_rows || src_col >= src_cols {
                return SUPPRESS;
            }
            source.data[[src_row, src_col]]
        });

        write_mask(
            &BinaryMask {
                data,
                grid: *grid,
                crs: crs.to_string(),
            },
            dst,
        )
    }
}
