pub mod conflict;
pub mod document;

pub use conflict::{admit, next_stamp, resolve, Admission};
pub use document::{
    BoardId, ControlMode, PoleId, PoleTiming, Priority, SignalColor, StateDocument, StatePatch,
    TimeOfDay, TimeZone, SYSTEM_WRITER,
};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
