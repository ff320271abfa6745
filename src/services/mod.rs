pub mod classifier;
pub mod command;
pub mod container_scanner;
pub mod coordinator;
pub mod discovery;
pub mod grouping;
pub mod listener_scanner;
pub mod project_resolver;
pub mod scheduler;
pub mod stats_collector;
pub mod terminator;

pub use coordinator::ScanCoordinator;
pub use discovery::Discovery;
pub use grouping::{group_records, find_group, ProcessGroup};
pub use stats_collector::StatsCollector;
pub use terminator::Terminator;
