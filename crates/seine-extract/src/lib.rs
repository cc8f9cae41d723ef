//! Link discovery and filtering for the Seine crawl engine, plus the default
//! HTML content pipeline (metadata harvesting and markdown conversion).

pub mod filter;
pub mod links;
pub mod pipeline;

pub use filter::{FilterOutcome, LinkFilter};
pub use links::{extract_json_links, extract_links};
pub use pipeline::HtmlPipeline;
