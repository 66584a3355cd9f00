//! 核心编排层：错误与恢复、临界区、崩溃清理、生命周期状态机、主控编排器

pub mod critical_section;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod shutdown;
pub mod state;

pub use critical_section::{CriticalSection, InterruptController};
pub use error::{OrchestratorError, RecoveryAction};
pub use orchestrator::{Orchestrator, ProblemContext, ProblemOutcome};
pub use recovery::RecoveryEngine;
pub use shutdown::{run_with_crash_recovery, CleanupRegistry, HookId, ShutdownCleanup};
pub use state::{PhaseTracker, ProblemPhase, SubmissionStatus};
