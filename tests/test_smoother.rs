mod common;

use common::{gdal_utilities, grid, init_logging, RecordingTools, ToolCall};
use ndarray::Array2;
use scenemask::core::smooth_mask;
use scenemask::io::{read_mask, write_mask, GdalCommandTools, RasterRef};
use scenemask::{BinaryMask, KEEP, SUPPRESS};
use std::path::Path;
use tempfile::TempDir;

/// 10 m mask with a suppressed 4x4 block in the middle of a 12x12 tile
fn write_block_mask(path: &Path) -> BinaryMask {
    let data = Array2::from_shape_fn((12, 12), |(row, col)| {
        if (4..8).contains(&row) && (4..8).contains(&col) {
            SUPPRESS
        } else {
            KEEP
        }
    });
    let mask = BinaryMask {
        data,
        grid: grid((600000.0, 5100000.0), 10.0, (12, 12)),
        crs: common::utm32n_wkt(),
    };
    write_mask(&mask, path).unwrap();
    mask
}

#[test]
fn test_pass_sequence_for_radius_and_positive_buffer() {
    init_logging();
    let temp_dir = TempDir::new().unwrap();
    let mask_path = temp_dir.path().join("mask.tif");
    write_block_mask(&mask_path);

    let tools = RecordingTools::default();
    let smoothed = smooth_mask(&mask_path, &tools, temp_dir.path(), 100.0, 50.0).unwrap();

    assert_eq!(tools.fill_distances(), vec![7.5, 20.0, 20.0, 2.5]);
    assert_eq!(
        tools.calls(),
        vec![
            ToolCall::SetNodata(Some(1.0)),
            ToolCall::Fill(7.5),
            ToolCall::SetNodata(Some(0.0)),
            ToolCall::Fill(20.0),
            ToolCall::SetNodata(Some(1.0)),
            ToolCall::Fill(20.0),
            ToolCall::SetNodata(Some(0.0)),
            ToolCall::Fill(2.5),
            ToolCall::SetNodata(None),
        ]
    );

    assert!(smoothed.starts_with(temp_dir.path()));
    assert!(smoothed.exists());
    let raster = RasterRef::open(&smoothed).unwrap();
    assert_eq!(raster.grid.size, (12, 12));
}

#[test]
fn test_negative_buffer_clamps_distances() {
    init_logging();
    let temp_dir = TempDir::new().unwrap();
    let mask_path = temp_dir.path().join("mask.tif");
    write_block_mask(&mask_path);

    let tools = RecordingTools::default();
    smooth_mask(&mask_path, &tools, temp_dir.path(), 10.0, -200.0).unwrap();

    // radius 1 px, buffer -20 px: pass 3 would be 1.25 - 20
    assert_eq!(tools.fill_distances(), vec![0.75, 2.0, 0.0]);
}

#[test]
fn test_runs_use_separate_work_directories() {
    init_logging();
    let temp_dir = TempDir::new().unwrap();
    let mask_path = temp_dir.path().join("mask.tif");
    write_block_mask(&mask_path);

    let tools = RecordingTools::default();
    let first = smooth_mask(&mask_path, &tools, temp_dir.path(), 20.0, 0.0).unwrap();
    let second = smooth_mask(&mask_path, &tools, temp_dir.path(), 20.0, 0.0).unwrap();

    assert_ne!(first.parent(), second.parent());
    assert!(first.exists() && second.exists());
}

#[test]
fn test_zero_radius_and_buffer_is_stable_with_gdal() {
    init_logging();
    let binaries = match gdal_utilities() {
        Some(binaries) => binaries,
        None => {
            println!("GDAL utilities not on PATH, skipping smoothing test");
            return;
        }
    };

    let temp_dir = TempDir::new().unwrap();
    let mask_path = temp_dir.path().join("mask.tif");
    let original = write_block_mask(&mask_path);
    let tools = GdalCommandTools::new(binaries);

    let once_path = smooth_mask(&mask_path, &tools, temp_dir.path(), 0.0, 0.0).unwrap();
    let twice_path = smooth_mask(&once_path, &tools, temp_dir.path(), 0.0, 0.0).unwrap();
    assert_eq!(RasterRef::open(&once_path).unwrap().no_data, None);

    let once = read_mask(&once_path).unwrap();
    let twice = read_mask(&twice_path).unwrap();
    assert_eq!(once.data, twice.data);
    // away from the block edges nothing moves
    assert_eq!(once.data[[0, 0]], original.data[[0, 0]]);
    assert_eq!(once.data[[5, 5]], original.data[[5, 5]]);
}
