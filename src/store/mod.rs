pub mod document;
pub mod elastic;
pub mod memory;
pub mod query;
pub mod traits;

pub use elastic::ElasticStore;
pub use memory::MemoryStore;
pub use query::{
    AggregateResult, Aggregation, AggregationQuery, AggregationResults, Bound, Bucket, Hit,
    SearchQuery, SearchResults, SortOrder, TermsOrder, TimeWindow,
};
pub use traits::{DocumentStore, StoreError};
