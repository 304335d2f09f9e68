pub mod change;
pub mod config;
pub mod core;
pub mod export;
pub mod extract;
pub mod fusion;
pub mod pipeline;
pub mod telemetry;

pub use change::{detect_changes, enhance_with_spectral, ChangeDetector, ChangeSummary};
pub use config::EngineConfig;
pub use self::core::error::{ConfigError, FusionError, FusionResult};
pub use self::core::geometry::{BBox, GridShape};
pub use self::core::model::{
    CandidateRegion, ChangeRecord, ChangeType, Detection, FusedDetection, Provenance,
    VisualDetection,
};
pub use extract::{CandidateExtractor, ScoreMap};
pub use fusion::{fuse, DefectFusionEngine, FusionEngine};
