pub mod crawler;
pub mod engine;
pub mod fetcher;
pub mod frontier;
pub mod http;
pub mod issues;
pub mod robots;
pub mod runner;

pub use crawler::{CrawlOptions, Crawler, NoopSink, PageSink};
pub use engine::{AuditEngine, AuditProgress, NoopProgress};
pub use fetcher::{FetchedPage, HttpFetcher, PageFetcher};
pub use runner::{AuditOptions, AuditRunner};
