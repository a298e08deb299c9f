pub mod normalize;
pub mod resolver;
pub mod table;

pub use normalize::normalize;
pub use resolver::{FieldReport, FieldResolver, Resolution, ResolveError, UnresolvedField};
pub use table::FieldTable;
