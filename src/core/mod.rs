//! Core masking modules

pub mod metadata;
pub mod policy;
pub mod mask_builder;
pub mod smoother;
pub mod reconcile;
pub mod apply;
pub mod executor;
pub mod batch;

// Re-export main types
pub use metadata::{ClassificationCandidate, ExtentKind, MetadataMatcher, ProductMetadata};
pub use policy::{ClassValueSet, MaskLayer, MaskPolicy, SCL};
pub use mask_builder::MaskBuilder;
pub use smoother::{smooth_mask, MaskSmoother, SmoothingParams, SmoothingPlan, SmoothingStage};
pub use reconcile::ResolutionReconciler;
pub use apply::{nodata_sentinel, Compression, MaskApplicator};
pub use executor::{worker_count, Executor, PoolExecutor, SequentialExecutor, MAX_WORKERS};
pub use batch::{mask_rasters, BatchMasker, BatchReport, MaskRequest, SkippedInput, SubdirMode};
