pub mod outcome;
pub mod prefs;
pub mod process;
pub mod stats;

pub use outcome::{BulkReport, BulkScope, KillOutcome, KillStep, KillTarget};
pub use prefs::{EnabledTypes, Preferences, PreferencesPatch, RefreshInterval, ScanConfig};
pub use process::{Backend, ContainerRecord, Listener, ProcessRecord, ProcessType, Record};
pub use stats::ProcessStats;
