//! 动作层：动作注册表与参数绑定、shell 门禁、动作实现与带审计的执行器

pub mod actions;
pub mod executor;
pub mod registry;
pub mod shell;
pub mod telemetry;

pub use actions::ActionContext;
pub use executor::ActionExecutor;
pub use registry::{ActionArgs, ActionKind, ActionRegistry};
pub use shell::{split_segments, ShellGuard, Verdict};
pub use telemetry::{read_csv, TelemetrySource, TELEMETRY_NOT_CONFIGURED};
