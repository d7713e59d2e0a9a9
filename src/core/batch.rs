//! Batch masking of Sentinel-2 rasters
//!
//! Every input is paired with its classification rasters, masked and written
//! independently. Inputs that cannot be processed are reported and skipped;
//! only an invalid policy or output format fails the whole call.

use crate::core::apply::{Compression, MaskApplicator};
use crate::core::executor::{executor_for, Executor, TaskResult};
use crate::core::mask_builder::MaskBuilder;
use crate::core::metadata::{MetadataMatcher, ProductMetadata};
use crate::core::policy::{MaskLayer, MaskPolicy};
use crate::core::reconcile::ResolutionReconciler;
use crate::core::smoother::{MaskSmoother, SmoothingParams};
use crate::io::{write_mask, GdalBinaries, GdalCommandTools, RasterFormat, RasterRef, RasterTools};
use crate::types::{MaskError, MaskResult, ResampleKernel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Whether outputs are grouped into one directory per product type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubdirMode {
    /// Group only when the inputs span more than one product type
    Auto,
    On,
    Off,
}

impl Default for SubdirMode {
    fn default() -> Self {
        SubdirMode::Auto
    }
}

/// Parameters of one batch masking call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskRequest {
    /// Rasters to mask
    pub inputs: Vec<PathBuf>,
    /// Candidate classification rasters, searched in order
    pub classification: Vec<PathBuf>,
    /// Masking policy name, e.g. "cloud_high_proba"
    pub policy: String,
    pub out_dir: PathBuf,
    /// GDAL driver short name; `None` keeps each input's own format
    pub format: Option<String>,
    pub subdirs: SubdirMode,
    pub compression: Compression,
    pub parallel: bool,
    pub overwrite: bool,
    pub smoothing: Option<SmoothingParams>,
    pub kernel: ResampleKernel,
    /// Root for per-input scratch directories; the system temp dir if unset
    pub scratch_dir: Option<PathBuf>,
    pub binaries: GdalBinaries,
}

impl MaskRequest {
    pub fn new<P: Into<PathBuf>>(
        inputs: Vec<PathBuf>,
        classification: Vec<PathBuf>,
        policy: &str,
        out_dir: P,
    ) -> Self {
        Self {
            inputs,
            classification,
            policy: policy.to_string(),
            out_dir: out_dir.into(),
            format: None,
            subdirs: SubdirMode::default(),
            compression: Compression::default(),
            parallel: false,
            overwrite: false,
            smoothing: None,
            kernel: ResampleKernel::default(),
            scratch_dir: None,
            binaries: GdalBinaries::default(),
        }
    }
}

/// An input left out of the batch and the reason why
#[derive(Debug)]
pub struct SkippedInput {
    pub input: PathBuf,
    pub reason: MaskError,
}

/// Outcome of a batch call
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Written or already existing outputs, in input order
    pub outputs: Vec<PathBuf>,
    /// Inputs that produced no output, in input order
    pub skipped: Vec<SkippedInput>,
}

/// Input that found all of its classification rasters
#[derive(Debug, Clone)]
struct MaskJob {
    index: usize,
    input: PathBuf,
    metadata: ProductMetadata,
    layers: Vec<(MaskLayer, PathBuf)>,
}

/// Settings shared by every task of one call
struct BatchContext<'a> {
    request: &'a MaskRequest,
    format: Option<RasterFormat>,
    subdirs: bool,
    scratch_root: PathBuf,
    tools: &'a dyn RasterTools,
}

/// Runs mask requests
///
/// By default tools are the GDAL command line utilities named in the request
/// and the executor follows the request's `parallel` flag.
#[derive(Default)]
pub struct BatchMasker {
    tools: Option<Arc<dyn RasterTools>>,
    executor: Option<Box<dyn Executor>>,
}

impl BatchMasker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `tools` instead of the request's GDAL utilities
    pub fn with_tools(mut self, tools: Arc<dyn RasterTools>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Use `executor` instead of the one chosen from the request
    pub fn with_executor(mut self, executor: Box<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn run(&self, request: &MaskRequest) -> MaskResult<BatchReport> {
        let policy = MaskPolicy::parse(&request.policy)?;
        let format = match &request.format {
            Some(name) => Some(RasterFormat::lookup(name)?),
            None => None,
        };

        log::info!(
            "Masking {} input(s) with policy {} ({} classification candidate(s))",
            request.inputs.len(),
            policy,
            request.classification.len()
        );

        let mut report = BatchReport::default();
        let mut skipped: Vec<(usize, SkippedInput)> = Vec::new();
        let (jobs, product_types) = plan_jobs(request, policy, &mut skipped);

        let subdirs = match request.subdirs {
            SubdirMode::On => true,
            SubdirMode::Off => false,
            SubdirMode::Auto => product_types.len() > 1,
        };

        let scratch_root = request
            .scratch_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        std::fs::create_dir_all(&scratch_root)?;

        let default_tools;
        let tools: &dyn RasterTools = match &self.tools {
            Some(tools) => tools.as_ref(),
            None => {
                default_tools = GdalCommandTools::new(request.binaries.clone());
                &default_tools
            }
        };

        let default_executor;
        let executor: &dyn Executor = match &self.executor {
            Some(executor) => executor.as_ref(),
            None => {
                default_executor = executor_for(request.parallel, jobs.len());
                default_executor.as_ref()
            }
        };

        let context = BatchContext {
            request,
            format,
            subdirs,
            scratch_root,
            tools,
        };

        log::debug!(
            "{} job(s) on {} worker(s), subdirectories {}",
            jobs.len(),
            executor.workers(),
            if subdirs { "on" } else { "off" }
        );
        let task = |i: usize| -> TaskResult { process_job(&jobs[i], &context) };
        let results = executor.execute(jobs.len(), &task);

        let mut outputs: Vec<(usize, PathBuf)> = Vec::new();
        for (job, result) in jobs.iter().zip(results) {
            match result {
                Ok(path) => outputs.push((job.index, path)),
                Err(reason) => {
                    log::warn!("Skipping {}: {}", job.input.display(), reason);
                    skipped.push((
                        job.index,
                        SkippedInput {
                            input: job.input.clone(),
                            reason,
                        },
                    ));
                }
            }
        }

        outputs.sort_by_key(|(index, _)| *index);
        skipped.sort_by_key(|(index, _)| *index);
        report.outputs = outputs.into_iter().map(|(_, path)| path).collect();
        report.skipped = skipped.into_iter().map(|(_, s)| s).collect();

        log::info!(
            "Batch finished: {} output(s), {} skipped",
            report.outputs.len(),
            report.skipped.len()
        );
        Ok(report)
    }
}

/// Mask every input of `request`, returning the output paths in input order
pub fn mask_rasters(request: &MaskRequest) -> MaskResult<Vec<PathBuf>> {
    Ok(BatchMasker::new().run(request)?.outputs)
}

/// Parse inputs and pair them with classification rasters
///
/// Returns the runnable jobs and the product types of every parsed input.
fn plan_jobs(
    request: &MaskRequest,
    policy: MaskPolicy,
    skipped: &mut Vec<(usize, SkippedInput)>,
) -> (Vec<MaskJob>, BTreeSet<String>) {
    let matcher = MetadataMatcher::new(request.classification.as_slice());
    let layers = policy.layers();

    let mut jobs = Vec::new();
    let mut product_types = BTreeSet::new();
    for (index, input) in request.inputs.iter().enumerate() {
        let metadata = match ProductMetadata::parse(input) {
            Ok(metadata) => metadata,
            Err(reason) => {
                log::warn!("Skipping {}: {}", input.display(), reason);
                skipped.push((
                    index,
                    SkippedInput {
                        input: input.clone(),
                        reason,
                    },
                ));
                continue;
            }
        };
        product_types.insert(metadata.product_type.clone());

        let paired: MaskResult<Vec<(MaskLayer, PathBuf)>> = layers
            .iter()
            .map(|layer| {
                matcher
                    .require(input, &metadata, layer.product_type)
                    .map(|path| (layer.clone(), path))
            })
            .collect();

        match paired {
            Ok(layers) => jobs.push(MaskJob {
                index,
                input: input.clone(),
                metadata,
                layers,
            }),
            Err(reason) => {
                log::warn!("Skipping {}: {}", input.display(), reason);
                skipped.push((
                    index,
                    SkippedInput {
                        input: input.clone(),
                        reason,
                    },
                ));
            }
        }
    }

    (jobs, product_types)
}

fn output_path(job: &MaskJob, format: &RasterFormat, context: &BatchContext) -> PathBuf {
    let dir = if context.subdirs {
        context.request.out_dir.join(&job.metadata.product_type)
    } else {
        context.request.out_dir.clone()
    };
    let stem = job
        .input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    dir.join(format!("{}.{}", stem, format.extension))
}

fn process_job(job: &MaskJob, context: &BatchContext) -> TaskResult {
    let raster = RasterRef::open(&job.input)?;
    let format = match &context.format {
        Some(format) => format.clone(),
        None => RasterFormat::for_source(&raster.driver)?,
    };

    let output = output_path(job, &format, context);
    if output.exists() && !context.request.overwrite {
        log::info!("Output {} exists, not overwriting", output.display());
        return Ok(output);
    }

    let scratch = tempfile::Builder::new()
        .prefix(&format!("scenemask_{}_", job.index))
        .tempdir_in(&context.scratch_root)?;

    let written = mask_one(job, &raster, format, &output, scratch.path(), context)?;

    if let Err(e) = scratch.close() {
        log::debug!("Could not remove scratch directory: {}", e);
    }
    Ok(written)
}

fn mask_one(
    job: &MaskJob,
    raster: &RasterRef,
    format: RasterFormat,
    output: &Path,
    scratch: &Path,
    context: &BatchContext,
) -> MaskResult<PathBuf> {
    log::info!("Masking {}", job.input.display());

    let masks = job
        .layers
        .iter()
        .map(|(layer, path)| MaskBuilder::build_layer(path, layer))
        .collect::<MaskResult<Vec<_>>>()?;
    let combined = MaskBuilder::combine(masks)?;

    let mut mask_path = scratch.join("mask.tif");
    write_mask(&combined, &mask_path)?;

    if let Some(params) = context.request.smoothing {
        mask_path = MaskSmoother::new(params).smooth(&mask_path, context.tools, scratch)?;
    }

    let reconciled = ResolutionReconciler::new(context.request.kernel).reconcile(
        &mask_path,
        raster,
        context.tools,
        scratch,
    )?;

    MaskApplicator::new(format, context.request.compression, context.request.overwrite)
        .apply(raster, &reconciled, output)
}
