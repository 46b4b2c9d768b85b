// === Public Modules (The Canonical Paths) ===
pub mod engine;
pub mod error;
pub mod ops;
pub mod program;
pub mod random;
pub mod recalc;
pub mod report;
pub mod runner;
pub mod scope;
pub mod streams;
pub mod units;

// === Convenience ===
pub use crate::engine::{DisplaceMode, Engine, YearMatcher};
pub use crate::error::{EngineError, EngineResult};
pub use crate::ops::Operation;
pub use crate::program::{Program, ProgramBuilder};
pub use crate::runner::{ResultRow, SimulationRunner};
pub use crate::streams::{RecoveryStage, StreamName, UseKey};
pub use crate::units::{EngineValue, Unit};
