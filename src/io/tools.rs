//! Typed wrappers around the GDAL command line utilities

use crate::types::{GridSpec, MaskError, MaskResult, ResampleKernel};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Locations of the GDAL utilities used by the masking pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GdalBinaries {
    pub gdal_translate: PathBuf,
    pub gdal_fillnodata: PathBuf,
    pub gdalwarp: PathBuf,
}

impl Default for GdalBinaries {
    fn default() -> Self {
        Self {
            gdal_translate: PathBuf::from("gdal_translate"),
            gdal_fillnodata: PathBuf::from("gdal_fillnodata"),
            gdalwarp: PathBuf::from("gdalwarp"),
        }
    }
}

impl GdalBinaries {
    /// Probe `PATH` for the utilities
    ///
    /// Older GDAL releases only install `gdal_fillnodata.py`, so both names
    /// are tried. Utilities that cannot be found keep their bare name.
    pub fn discover() -> Self {
        let defaults = Self::default();
        let found = Self {
            gdal_translate: find_in_path(&["gdal_translate"])
                .unwrap_or(defaults.gdal_translate),
            gdal_fillnodata: find_in_path(&["gdal_fillnodata", "gdal_fillnodata.py"])
                .unwrap_or(defaults.gdal_fillnodata),
            gdalwarp: find_in_path(&["gdalwarp"]).unwrap_or(defaults.gdalwarp),
        };
        log::debug!("GDAL utilities: {:?}", found);
        found
    }

    /// Whether every utility resolves to an existing file
    pub fn available(&self) -> bool {
        [&self.gdal_translate, &self.gdal_fillnodata, &self.gdalwarp]
            .iter()
            .all(|p| p.is_file() || find_in_path(&[p.as_os_str()]).is_some())
    }
}

fn find_in_path<S: AsRef<std::ffi::OsStr>>(names: &[S]) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).find_map(|dir| {
        names
            .iter()
            .map(|name| dir.join(name.as_ref()))
            .find(|candidate| candidate.is_file())
    })
}

/// A single external program call, built from an argument vector
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ToolInvocation {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg<S: Into<OsString>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    /// Run the program and check that it produced `expected_output`
    pub fn run(&self, expected_output: &Path) -> MaskResult<()> {
        log::debug!("Running: {}", self);

        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .map_err(|e| {
                log::error!("Failed to start {}: {}", self, e);
                MaskError::ExternalTool {
                    command: self.to_string(),
                    status: None,
                    stderr: e.to_string(),
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            log::error!("Command failed ({}): {}\n{}", output.status, self, stderr);
            return Err(MaskError::ExternalTool {
                command: self.to_string(),
                status: output.status.code(),
                stderr,
            });
        }

        if !expected_output.exists() {
            log::error!("Command produced no output: {}", self);
            return Err(MaskError::ExternalTool {
                command: self.to_string(),
                status: output.status.code(),
                stderr: format!("expected output {} was not created", expected_output.display()),
            });
        }

        Ok(())
    }
}

impl std::fmt::Display for ToolInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Raster operations delegated to external utilities
///
/// Every method reads `src` and writes a new file at `dst`.
pub trait RasterTools: Send + Sync {
    /// Copy `src`, declaring `nodata` as the no-data value (`None` removes the tag)
    fn set_nodata(&self, src: &Path, dst: &Path, nodata: Option<f64>) -> MaskResult<()>;

    /// In-paint no-data pixels up to `max_distance` pixels away
    fn fill_nodata(
        &self,
        src: &Path,
        dst: &Path,
        max_distance: f64,
        smoothing_iterations: u32,
    ) -> MaskResult<()>;

    /// Resample `src` onto `grid` in the `crs` coordinate system
    fn regrid(
        &self,
        src: &Path,
        dst: &Path,
        grid: &GridSpec,
        crs: &str,
        kernel: ResampleKernel,
    ) -> MaskResult<()>;
}

/// `RasterTools` backed by the GDAL command line utilities
#[derive(Debug, Clone, Default)]
pub struct GdalCommandTools {
    binaries: GdalBinaries,
}

impl GdalCommandTools {
    pub fn new(binaries: GdalBinaries) -> Self {
        Self { binaries }
    }

    pub fn set_nodata_command(
        &self,
        src: &Path,
        dst: &Path,
        nodata: Option<f64>,
    ) -> ToolInvocation {
        let value = match nodata {
            Some(v) => format_number(v),
            None => "none".to_string(),
        };
        ToolInvocation::new(&self.binaries.gdal_translate)
            .args(["-q", "-of", "GTiff", "-a_nodata"])
            .arg(value)
            .arg(src)
            .arg(dst)
    }

    pub fn fill_nodata_command(
        &self,
        src: &Path,
        dst: &Path,
        max_distance: f64,
        smoothing_iterations: u32,
    ) -> ToolInvocation {
        ToolInvocation::new(&self.binaries.gdal_fillnodata)
            .args(["-q", "-md"])
            .arg(format_number(max_distance))
            .arg("-si")
            .arg(smoothing_iterations.to_string())
            .args(["-of", "GTiff"])
            .arg(src)
            .arg(dst)
    }

    pub fn regrid_command(
        &self,
        src: &Path,
        dst: &Path,
        grid: &GridSpec,
        crs: &str,
        kernel: ResampleKernel,
    ) -> ToolInvocation {
        let (xmin, ymin, xmax, ymax) = grid.extent();
        let mut command = ToolInvocation::new(&self.binaries.gdalwarp)
            .args(["-q", "-overwrite", "-of", "GTiff", "-ot", "Byte", "-r"])
            .arg(kernel.gdal_name())
            .arg("-te")
            .args([xmin, ymin, xmax, ymax].iter().map(|v| format_number(*v)))
            .arg("-ts")
            .arg(grid.size.0.to_string())
            .arg(grid.size.1.to_string());
        if !crs.trim().is_empty() {
            command = command.arg("-t_srs").arg(crs);
        }
        command.arg(src).arg(dst)
    }
}

impl RasterTools for GdalCommandTools {
    fn set_nodata(&self, src: &Path, dst: &Path, nodata: Option<f64>) -> MaskResult<()> {
        self.set_nodata_command(src, dst, nodata).run(dst)
    }

    fn fill_nodata(
        &self,
        src: &Path,
        dst: &Path,
        max_distance: f64,
        smoothing_iterations: u32,
    ) -> MaskResult<()> {
        self.fill_nodata_command(src, dst, max_distance, smoothing_iterations)
            .run(dst)
    }

    fn regrid(
        &self,
        src: &Path,
        dst: &Path,
        grid: &GridSpec,
        crs: &str,
        kernel: ResampleKernel,
    ) -> MaskResult<()> {
        self.regrid_command(src, dst, grid, crs, kernel).run(dst)
    }
}

/// Shortest decimal representation, e.g. `7.5` or `20`
fn format_number(value: f64) -> String {
    format!("{}", value)
}
