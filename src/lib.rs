//! Polite, script-driven web crawler
//!
//! Seed URLs are partitioned by registrable domain; each domain gets one
//! strictly sequential, rate-limited worker task under a bounded admission
//! gate. Fetched bodies and headers land in a content-addressed on-disk
//! cache, extraction turns bodies into JSON records, and extracted
//! same-domain links feed back into per-domain frontier files.
//!
//! Key components:
//! - `url`: canonicalization, reference resolution, public-suffix logic
//! - `cache` / `frontier`: the on-disk state shared across workers
//! - `trust`: AIA discovery and per-host CA bundle augmentation
//! - `crawl`: the pacer, fetch engine, domain worker, and supervisor
//! - `extract`: the extraction capability and the built-in HTML extractor

pub mod agent;
pub mod cache;
pub mod config;
pub mod crawl;
pub mod extract;
pub mod frontier;
pub mod logging;
pub mod trust;
pub mod url;

pub use config::Config;
pub use crawl::Supervisor;
pub use url::Url;
