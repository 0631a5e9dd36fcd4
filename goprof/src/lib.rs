//! Heuristic analysis of Go runtime profiles.
//!
//! Each detector is a pure function over a parsed [`goprof_parse::Profile`]
//! that returns a serializable report with a `warnings` list. Detectors never
//! call each other; composing them is up to the caller.
//!
//! # Detectors
//!
//! - [`overhead`] - Share of CPU spent in tracing, logging, RPC and similar
//!   infrastructure
//! - [`offheap`] - Confidence-graded suspicions of memory outside the Go heap
//! - [`contention`] - Lock sites, waiters and contention patterns from mutex
//!   and block profiles
//! - [`goroutine`] - Wait states, leak candidates and regex categories
//! - [`alloc_paths`] - Allocation hotspots in application code
//! - [`correlate`] - Functions hot across CPU, heap and mutex profiles
//!
//! # Supporting Modules
//!
//! - [`input`] - Load NDJSON or postcard profiles, gzip or zstd compressed
//! - [`config`] - `goprof.toml` thresholds and extra pattern tables
//! - [`report`] - Pretty JSON and NDJSON report output
//! - [`cache`] - TTL cache for discovered service metadata
//!
//! # Example
//!
//! ```no_run
//! use goprof::goroutine::{GoroutineOptions, analyze_goroutines};
//! use goprof::input::load_profile;
//! use std::path::Path;
//!
//! let profile = load_profile(Path::new("goroutine.ndjson")).unwrap();
//! let report = analyze_goroutines(&profile, &GoroutineOptions::default()).unwrap();
//!
//! for leak in &report.leaks {
//!     println!("{} x{} ({})", leak.signature, leak.count, leak.severity);
//! }
//! ```

pub mod alloc_paths;
pub mod cache;
pub mod config;
pub mod contention;
pub mod correlate;
pub mod error;
pub mod findings;
pub mod goroutine;
pub mod input;
pub mod offheap;
pub mod overhead;
pub mod patterns;
pub mod primitives;
pub mod report;

pub use error::{AnalysisError, Result};

// Re-export goprof_parse for convenience
pub use goprof_parse;
