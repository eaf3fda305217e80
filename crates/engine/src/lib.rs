pub mod aggregate;
pub mod binning;
pub mod metadata;
pub mod recorder;

pub use aggregate::{Aggregate, AggregateOptions, Window, aggregate};
pub use binning::{BinId, Bins, Granularity};
pub use metadata::{Metadata, collect_metadata};
pub use recorder::{EventKind, NewEvent, Receipt, RecorderConfig, record_event};
