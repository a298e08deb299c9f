pub mod compiler;
pub mod error;
pub mod request;
pub mod service;

pub use compiler::{compile, CompiledAggregation};
pub use error::QueryError;
pub use request::{
    AggregationRequest, AggregationResponse, AggregationShape, Metric, SearchRequest,
    SearchResponse, TimeRange,
};
pub use service::AnalyticsService;
