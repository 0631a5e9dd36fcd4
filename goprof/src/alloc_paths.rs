//! Heap allocation hotspots grouped by call site.

use crate::findings::{ProfileKind, percentage};
use crate::primitives::{
    Frame, kind_mismatch_warning, runtime_version, sample_type_index, sample_unit, sample_value,
    stack_locations,
};
use goprof_parse::Profile;
use serde::Serialize;
use std::collections::HashMap;

pub const DEFAULT_MIN_PERCENTAGE: f64 = 1.0;
pub const DEFAULT_MAX_PATHS: usize = 20;
pub const MAX_CHAIN_FRAMES: usize = 8;

/// Allocator entry points stripped from the head of a stack so the
/// allocation site is the code that asked for memory.
pub const ALLOCATOR_FRAMES: &[&str] = &[
    "runtime.mallocgc",
    "runtime.newobject",
    "runtime.newarray",
    "runtime.makeslice",
    "runtime.makeslicecopy",
    "runtime.growslice",
    "runtime.makemap",
    "runtime.makemap_small",
    "runtime.makechan",
    "runtime.mapassign",
    "runtime.mapassign_faststr",
    "runtime.mapassign_fast64",
    "runtime.rawstring",
    "runtime.rawstringtmp",
    "runtime.rawbyteslice",
    "runtime.rawruneslice",
    "runtime.slicebytetostring",
    "runtime.stringtoslicebyte",
    "runtime.concatstrings",
    "runtime.convT",
    "runtime.convTstring",
    "runtime.convTslice",
    "runtime.convT64",
];

#[derive(Debug, Clone)]
pub struct AllocOptions {
    /// Function-name prefixes or path fragments that mark application code.
    /// Empty means every frame counts as application code.
    pub app_prefixes: Vec<String>,
    /// Key paths by first application frame instead of allocation site.
    pub group_by_source: bool,
    pub min_percentage: f64,
    pub max_paths: usize,
}

impl Default for AllocOptions {
    fn default() -> Self {
        Self {
            app_prefixes: Vec::new(),
            group_by_source: false,
            min_percentage: DEFAULT_MIN_PERCENTAGE,
            max_paths: DEFAULT_MAX_PATHS,
        }
    }
}

impl AllocOptions {
    fn is_app_frame(&self, frame: &Frame<'_>) -> bool {
        self.app_prefixes.is_empty()
            || self.app_prefixes.iter().any(|prefix| {
                !prefix.is_empty()
                    && (frame.function.starts_with(prefix.as_str())
                        || frame.filename.contains(prefix.as_str()))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllocationPath {
    pub alloc_site: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_app_frame: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_location: Option<String>,
    pub caller_chain: Vec<String>,
    pub bytes: i64,
    pub objects: i64,
    pub percentage: f64,
    /// Bytes per minute over the profile's duration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllocationReport {
    pub sample_type: String,
    pub unit: String,
    pub total_bytes: i64,
    pub application_bytes: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    pub grouped_by: &'static str,
    pub paths: Vec<AllocationPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_version: Option<String>,
    pub warnings: Vec<String>,
}

struct PathTotals {
    alloc_site: String,
    first_app_frame: Option<String>,
    source_location: Option<String>,
    bytes: i64,
    objects: i64,
    heaviest: i64,
    chain: Vec<String>,
}

/// Drop the leaf frame when it is an allocator entry point. Deeper runtime
/// frames are kept, so `runtime.growslice` under `runtime.mallocgc` becomes
/// the allocation site.
pub fn strip_allocator_frames<'a, 'p>(frames: &'a [Frame<'p>]) -> &'a [Frame<'p>] {
    match frames.split_first() {
        Some((leaf, rest)) if ALLOCATOR_FRAMES.contains(&leaf.function) => rest,
        _ => frames,
    }
}

/// Aggregate allocation volume by call site for application code.
pub fn analyze_alloc_paths(profile: &Profile, options: &AllocOptions) -> AllocationReport {
    let mut warnings = Vec::new();
    if let Some(w) = kind_mismatch_warning(profile, ProfileKind::Heap) {
        warnings.push(w);
    }

    let bytes_idx = match sample_type_index(profile, "alloc_space") {
        Some(idx) => idx,
        None => {
            warnings.push("no 'alloc_space' sample type; using column 0".to_string());
            0
        }
    };
    let objects_idx = sample_type_index(profile, "alloc_objects");
    let duration = profile.duration();
    let minutes = duration.map(|d| d.as_secs_f64() / 60.0);

    let mut groups: HashMap<String, PathTotals> = HashMap::new();
    let mut total_bytes: i64 = 0;
    let mut application_bytes: i64 = 0;

    for sample in &profile.samples {
        let bytes = sample_value(sample, bytes_idx, 0);
        if bytes <= 0 {
            continue;
        }
        total_bytes += bytes;

        let frames = stack_locations(profile, sample);
        let chain = strip_allocator_frames(&frames);
        let Some(site) = chain.first() else {
            continue;
        };
        // Library-only allocations stay in the total but are not reported.
        let Some(app_frame) = chain.iter().find(|f| options.is_app_frame(f)) else {
            continue;
        };
        application_bytes += bytes;

        let objects = objects_idx.map_or(0, |idx| sample_value(sample, idx, 0));
        let key = if options.group_by_source {
            app_frame.function
        } else {
            site.function
        };
        let chain_names: Vec<String> = chain
            .iter()
            .take(MAX_CHAIN_FRAMES)
            .map(|f| f.function.to_string())
            .collect();

        let entry = groups.entry(key.to_string()).or_insert_with(|| PathTotals {
            alloc_site: site.function.to_string(),
            first_app_frame: Some(app_frame.function.to_string()),
            source_location: app_frame.source_location(),
            bytes: 0,
            objects: 0,
            heaviest: 0,
            chain: Vec::new(),
        });
        entry.bytes += bytes;
        entry.objects += objects;
        // The reported chain is the heaviest one in the group.
        if bytes > entry.heaviest || (bytes == entry.heaviest && chain_names < entry.chain) {
            entry.heaviest = bytes;
            entry.alloc_site = site.function.to_string();
            entry.first_app_frame = Some(app_frame.function.to_string());
            entry.source_location = app_frame.source_location();
            entry.chain = chain_names;
        }
    }

    if total_bytes == 0 {
        warnings.push("profile has no allocation samples".to_string());
    } else if application_bytes == 0 && !options.app_prefixes.is_empty() {
        warnings.push(format!(
            "no allocations matched application prefixes [{}]",
            options.app_prefixes.join(", ")
        ));
    }

    let mut paths: Vec<AllocationPath> = groups
        .into_values()
        .map(|totals| AllocationPath {
            alloc_site: totals.alloc_site,
            first_app_frame: totals.first_app_frame,
            source_location: totals.source_location,
            caller_chain: totals.chain,
            bytes: totals.bytes,
            objects: totals.objects,
            percentage: percentage(totals.bytes, total_bytes),
            rate: minutes
                .filter(|m| *m > 0.0)
                .map(|m| totals.bytes as f64 / m),
        })
        .filter(|path| path.percentage >= options.min_percentage)
        .collect();

    paths.sort_by(|a, b| {
        b.bytes
            .cmp(&a.bytes)
            .then_with(|| a.alloc_site.cmp(&b.alloc_site))
            .then_with(|| a.first_app_frame.cmp(&b.first_app_frame))
    });
    paths.truncate(options.max_paths);

    tracing::debug!(
        total_bytes,
        application_bytes,
        paths = paths.len(),
        "allocation path analysis complete"
    );

    AllocationReport {
        sample_type: profile
            .header
            .sample_types
            .get(bytes_idx)
            .map(|st| st.kind.clone())
            .unwrap_or_default(),
        unit: sample_unit(profile, bytes_idx).to_string(),
        total_bytes,
        application_bytes,
        duration_seconds: duration.map(|d| d.as_secs_f64()),
        grouped_by: if options.group_by_source {
            "first_app_frame"
        } else {
            "alloc_site"
        },
        paths,
        runtime_version: runtime_version(profile),
        warnings,
    }
}
