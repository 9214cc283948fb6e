//! The filter pipeline: checker chain, worker pool, dispatch, and stats
//! accumulation that drive `rwfilter`.

pub mod checker;
pub mod pipeline;
pub mod stats;

pub use checker::{CheckResult, Checker, CheckerChain, ClosureChecker, NTupleChecker, PrimaryChecker};
pub use pipeline::{merge_headers, Destination, Destinations, Pipeline, RECORDS_PER_BUFFER};
pub use stats::{Stats, StatsSnapshot};
