pub mod log_entry;
pub mod run_state;
pub mod unit;

pub use log_entry::{
    BlockedHeader, CancelStage, LogEntry, LogEvent, RequestMeta, RequestRecord, ResponseRecord,
    SkipReason, VisitOutcome, VisitStatus,
};
pub use run_state::{
    CancelResponse, ProgressEvent, RunSnapshot, RunState, RunStatus, StartResponse,
};
pub use unit::{
    sanitize_timecodes, sanitize_unit_ids, CourseContext, StartCommand, TimeCode, TimeCodeInput,
    UnitId,
};
