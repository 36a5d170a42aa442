//! Result propagation: the write-once store and the dispatch-time resolver.

pub mod resolver;
pub mod store;

pub use self::resolver::{ParameterResolver, RunContext};
pub use self::store::ResultStore;
