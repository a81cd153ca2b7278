//! Built-in agent tools.

pub mod external_api;
pub mod search;
pub mod summary;
pub mod vector_search;

pub use external_api::ExternalApiTool;
pub use search::SearchTool;
pub use summary::SummaryTool;
pub use vector_search::{SearchHit, SearchIndex, VectorSearchTool};
