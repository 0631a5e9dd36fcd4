//! `goprof.toml` config loading.

use crate::alloc_paths::{self, AllocOptions};
use crate::contention::{self, ContentionOptions};
use crate::correlate;
use crate::error::Result;
use crate::goroutine::{self, CategorySpec, GoroutineOptions, LeakOptions};
use crate::overhead::{self, OverheadOptions};
use crate::offheap;
use crate::patterns::{PatternCategory, PatternTable};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AnalysisConfig {
    /// Smallest category share the overhead detector reports.
    #[serde(default = "default_overhead_min_percentage")]
    pub overhead_min_percentage: f64,

    /// Smallest allocation path share reported.
    #[serde(default = "default_min_alloc_percentage")]
    pub min_alloc_percentage: f64,

    #[serde(default = "default_max_paths")]
    pub max_paths: usize,

    /// Prefixes or path fragments that mark application code.
    #[serde(default)]
    pub app_prefixes: Vec<String>,

    /// Goroutine group size at which a stack is a `high` leak candidate.
    #[serde(default = "default_leak_threshold")]
    pub leak_threshold: i64,

    #[serde(default = "default_leak_limit")]
    pub leak_limit: usize,

    /// Functions taken from each profile when correlating.
    #[serde(default = "default_node_count")]
    pub node_count: usize,

    #[serde(default = "default_top_waiters")]
    pub top_waiters: usize,

    #[serde(default = "default_max_sites")]
    pub max_sites: usize,

    /// Goroutine category presets applied after `categories`.
    #[serde(default)]
    pub goroutine_presets: Vec<String>,

    /// Goroutine regex categories.
    #[serde(default)]
    pub categories: Vec<CategorySpec>,

    /// Extra overhead categories, checked after the built-in ones.
    #[serde(default)]
    pub overhead_categories: Vec<PatternCategory>,

    /// Extra off-heap library signatures, checked after the built-in ones.
    #[serde(default)]
    pub offheap_signatures: Vec<PatternCategory>,
}

fn default_overhead_min_percentage() -> f64 {
    overhead::DEFAULT_MIN_PERCENTAGE
}

fn default_min_alloc_percentage() -> f64 {
    alloc_paths::DEFAULT_MIN_PERCENTAGE
}

fn default_max_paths() -> usize {
    alloc_paths::DEFAULT_MAX_PATHS
}

fn default_leak_threshold() -> i64 {
    goroutine::DEFAULT_LEAK_THRESHOLD
}

fn default_leak_limit() -> usize {
    goroutine::DEFAULT_LEAK_LIMIT
}

fn default_node_count() -> usize {
    correlate::DEFAULT_NODE_COUNT
}

fn default_top_waiters() -> usize {
    contention::DEFAULT_TOP_WAITERS
}

fn default_max_sites() -> usize {
    contention::DEFAULT_MAX_SITES
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            overhead_min_percentage: default_overhead_min_percentage(),
            min_alloc_percentage: default_min_alloc_percentage(),
            max_paths: default_max_paths(),
            app_prefixes: Vec::new(),
            leak_threshold: default_leak_threshold(),
            leak_limit: default_leak_limit(),
            node_count: default_node_count(),
            top_waiters: default_top_waiters(),
            max_sites: default_max_sites(),
            goroutine_presets: Vec::new(),
            categories: Vec::new(),
            overhead_categories: Vec::new(),
            offheap_signatures: Vec::new(),
        }
    }
}

impl AnalysisConfig {
    pub fn from_toml(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Read `path`, falling back to defaults when it is missing or broken.
    pub fn load_optional(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(s) => match Self::from_toml(&s) {
                Ok(cfg) => cfg,
                Err(err) => {
                    tracing::warn!("failed to parse config {}: {err}", path.display());
                    Self::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                tracing::warn!("failed to read config {}: {err}", path.display());
                Self::default()
            }
        }
    }

    pub fn overhead_options(&self) -> OverheadOptions {
        OverheadOptions {
            min_percentage: self.overhead_min_percentage,
            ..OverheadOptions::default()
        }
    }

    pub fn overhead_table(&self) -> PatternTable {
        let mut table = overhead::default_categories();
        table.extend(self.overhead_categories.iter().cloned());
        table
    }

    pub fn offheap_table(&self) -> PatternTable {
        let mut table = offheap::default_signatures();
        table.extend(self.offheap_signatures.iter().cloned());
        table
    }

    pub fn contention_options(&self) -> ContentionOptions {
        ContentionOptions {
            top_waiters: self.top_waiters,
            max_sites: self.max_sites,
        }
    }

    pub fn alloc_options(&self) -> AllocOptions {
        AllocOptions {
            app_prefixes: self.app_prefixes.clone(),
            group_by_source: false,
            min_percentage: self.min_alloc_percentage,
            max_paths: self.max_paths,
        }
    }

    /// Goroutine options with presets expanded. An unknown preset is an
    /// error.
    pub fn goroutine_options(&self) -> Result<GoroutineOptions> {
        Ok(GoroutineOptions {
            leaks: LeakOptions {
                threshold: self.leak_threshold,
                limit: self.leak_limit,
            },
            categories: goroutine::resolve_categories(&self.categories, &self.goroutine_presets)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg = AnalysisConfig::from_toml("").unwrap();
        assert_eq!(cfg, AnalysisConfig::default());
        assert_eq!(cfg.min_alloc_percentage, 1.0);
        assert_eq!(cfg.max_paths, 20);
        assert_eq!(cfg.leak_threshold, 1000);
        assert_eq!(cfg.node_count, 20);
        assert_eq!(cfg.top_waiters, 5);
        assert!(cfg.app_prefixes.is_empty());
    }

    #[test]
    fn parses_tables_and_overrides() {
        let cfg = AnalysisConfig::from_toml(
            r#"
max_paths = 5
app_prefixes = ["example.com/app"]
goroutine_presets = ["http"]

[[categories]]
name = "workers"
pattern = '^example\.com/app/worker\.'

[[overhead_categories]]
name = "feature_flags"
description = "Feature flag evaluation"
patterns = ["example.com/flags"]
"#,
        )
        .unwrap();

        assert_eq!(cfg.alloc_options().max_paths, 5);
        assert_eq!(cfg.alloc_options().app_prefixes, vec!["example.com/app"]);

        let table = cfg.overhead_table();
        assert_eq!(
            table.get(table.len() - 1).map(|c| c.name.as_str()),
            Some("feature_flags")
        );

        let goroutines = cfg.goroutine_options().unwrap();
        assert_eq!(goroutines.categories[0].name, "workers");
        assert_eq!(goroutines.categories[1].name, "http_server");
    }

    #[test]
    fn unknown_preset_is_an_error() {
        let cfg = AnalysisConfig {
            goroutine_presets: vec!["nope".to_string()],
            ..AnalysisConfig::default()
        };
        assert!(cfg.goroutine_options().is_err());
    }

    #[test]
    fn load_optional_falls_back() {
        let dir = std::env::temp_dir().join(format!("goprof-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let missing = dir.join("missing.toml");
        assert_eq!(AnalysisConfig::load_optional(&missing), AnalysisConfig::default());

        let broken = dir.join("broken.toml");
        let mut file = std::fs::File::create(&broken).unwrap();
        writeln!(file, "max_paths = \"many\"").unwrap();
        assert_eq!(AnalysisConfig::load_optional(&broken), AnalysisConfig::default());

        let good = dir.join("good.toml");
        std::fs::write(&good, "leak_threshold = 50\n").unwrap();
        assert_eq!(AnalysisConfig::load_optional(&good).leak_threshold, 50);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
