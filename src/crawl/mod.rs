//! Per-domain crawl engine
//!
//! One worker task per registrable domain, admitted through a bounded gate.
//! Inside a task everything is strictly sequential and exclusively owned:
//! the pacer, the fetcher (with its trust store), and the extractor. The
//! only cross-task resources are the content cache and the frontier store,
//! both safe by key partitioning.

pub mod fetcher;
pub mod pacer;
pub mod supervisor;
pub mod worker;

pub use fetcher::{Fetcher, HttpResponse};
pub use pacer::RateGate;
pub use supervisor::Supervisor;
pub use worker::DomainWorker;
