//! Paginated query module
//!
//! Extracts targets through `queryAll`, following `nextRecordsUrl` cursors.
//!
//! # Overview
//!
//! - `QueryTransport` - Page source; `RestApi` over HTTP, fakes in tests
//! - `WindowPlanner` - Bisects the replication window on `QUERY_TIMEOUT`
//! - `PaginatedQuery` - Produces the record stream of one target

mod api;
mod planner;
mod query;
mod types;

pub use api::RestApi;
pub use planner::WindowPlanner;
pub use query::{PaginatedQuery, RecordStream};
pub use types::{PageRequest, QueryPage, QueryTransport, RestConfig, Window};

#[cfg(test)]
mod tests;
