//! Kiln build infrastructure
//!
//! Turns a dependency graph into platform-specific artifacts:
//! - Cache keys and build units
//! - Checkout content signatures
//! - Persistent artifact cache with single-flight builds and LRU eviction
//! - Build-tool collaborator and command implementation
//! - Parallel build orchestration
//! - Host project integration

pub mod builder;
pub mod cache;
pub mod error;
pub mod integration;
pub mod signature;
pub mod targets;
pub mod tool;

pub use builder::{BuildReport, BuildStats, Orchestrator, UnitOutcome, UnitReport};
pub use cache::{ArtifactCache, CacheEntry, CacheStats, FlightGuard, Lookup};
pub use error::{BuildError, BuildResult};
pub use integration::{integrate, DependenciesDirIntegrator, ProjectIntegrator};
pub use signature::source_signature;
pub use targets::{BuildUnit, CacheKey};
pub use tool::{detect_toolchain, ensure_toolchain, BuildRequest, BuildTool, CommandBuildTool};
