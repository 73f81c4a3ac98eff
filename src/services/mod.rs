//! Source pipeline services
//!
//! - [`SourceAggregator`]: concurrent provider fan-out under a deadline
//! - [`SourceResolver`]: embed and token resolution with a depth bound
//! - [`AvailabilityRanker`]: reachability probes and stable ordering
//! - [`SourceService`]: the three above plus URL protection, per media path

pub mod aggregator;
pub mod ranker;
pub mod resolver;
pub mod source_service;

pub use aggregator::{Aggregate, SourceAggregator};
pub use ranker::AvailabilityRanker;
pub use resolver::SourceResolver;
pub use source_service::SourceService;
