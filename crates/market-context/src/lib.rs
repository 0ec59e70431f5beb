pub mod adapters;
pub mod cache;
pub mod context;
pub mod news;

pub use cache::CacheDb;
pub use context::{ContextBuilder, ContextConfig};
pub use news::{NewsCalendar, NewsEvent, NewsRestriction};
