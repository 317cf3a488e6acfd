//! Persistence layer: cache tier (C4), durable tier (C5), and the composite
//! façade (C6) the manager talks to.

mod cache;
mod composite;
mod durable;

pub use cache::CacheRepository;
pub use composite::CompositeRepository;
pub use durable::{DurableRepository, GameHistorySnapshot};
