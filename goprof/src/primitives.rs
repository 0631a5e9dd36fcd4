//! Shared helpers over a parsed profile.
//!
//! Every detector goes through these to pick a value column, read sample
//! values and walk stacks, so malformed input degrades the same way
//! everywhere: a missing column falls back to the default sample type, a
//! short value vector falls back to its first value, and a location with no
//! function is skipped.

use crate::findings::ProfileKind;
use goprof_parse::{Profile, Sample};
use regex::Regex;
use std::sync::LazyLock;

/// Separator between frames in a stack signature.
pub const SIGNATURE_SEPARATOR: &str = " | ";

static GO_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"go\d+\.\d+(?:\.\d+)?(?:(?:rc|beta)\d+)?").expect("valid regex"));

/// One resolved stack frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub function: &'a str,
    pub filename: &'a str,
    pub line: i64,
}

impl Frame<'_> {
    /// `file:line`, or `None` when the collector recorded no file.
    pub fn source_location(&self) -> Option<String> {
        if self.filename.is_empty() {
            return None;
        }
        if self.line > 0 {
            Some(format!("{}:{}", self.filename, self.line))
        } else {
            Some(self.filename.to_string())
        }
    }
}

/// Index of the first candidate sample type present in the profile.
///
/// Candidates are tried in the order given, so callers list their preferred
/// column first. Falls back to the declared default sample type, then to 0.
pub fn find_sample_index(profile: &Profile, candidates: &[&str]) -> usize {
    candidates
        .iter()
        .find_map(|candidate| sample_type_index(profile, candidate))
        .or_else(|| {
            profile
                .header
                .default_sample_type
                .as_deref()
                .and_then(|name| sample_type_index(profile, name))
        })
        .unwrap_or(0)
}

/// Exact lookup of a sample type by name, without any fallback.
pub fn sample_type_index(profile: &Profile, name: &str) -> Option<usize> {
    profile
        .header
        .sample_types
        .iter()
        .position(|st| st.kind == name)
}

/// Unit of the sample type at `index`, or an empty string.
pub fn sample_unit(profile: &Profile, index: usize) -> &str {
    profile
        .header
        .sample_types
        .get(index)
        .map(|st| st.unit.as_str())
        .unwrap_or("")
}

/// `values[index]`, else `values[0]`, else `default`.
pub fn sample_value(sample: &Sample, index: usize, default: i64) -> i64 {
    sample
        .values
        .get(index)
        .or_else(|| sample.values.first())
        .copied()
        .unwrap_or(default)
}

/// Sum of the column at `index` over every sample.
pub fn total_value(profile: &Profile, index: usize) -> i64 {
    profile
        .samples
        .iter()
        .map(|s| sample_value(s, index, 0))
        .sum()
}

/// Resolved frames of a sample, leaf to root. Locations without a
/// resolvable function are skipped; inlined lines are expanded innermost
/// first.
pub fn stack_locations<'a>(profile: &'a Profile, sample: &Sample) -> Vec<Frame<'a>> {
    let mut frames = Vec::with_capacity(sample.location_ids.len());
    for location_id in &sample.location_ids {
        let Some(location) = profile.resolve_location(*location_id) else {
            continue;
        };
        for line in &location.lines {
            if let Some(function) = profile.resolve_function(line.function_id) {
                if function.name.is_empty() {
                    continue;
                }
                frames.push(Frame {
                    function: &function.name,
                    filename: &function.filename,
                    line: line.line,
                });
            }
        }
    }
    frames
}

/// Function names of a sample, leaf to root.
pub fn stack_frames<'a>(profile: &'a Profile, sample: &Sample) -> Vec<&'a str> {
    stack_locations(profile, sample)
        .into_iter()
        .map(|f| f.function)
        .collect()
}

/// The first `max_frames` names joined with [`SIGNATURE_SEPARATOR`].
///
/// An empty stack yields an empty signature, which callers treat as
/// unattributable.
pub fn stack_signature<S: AsRef<str>>(frames: &[S], max_frames: usize) -> String {
    frames
        .iter()
        .take(max_frames)
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(SIGNATURE_SEPARATOR)
}

/// Classify a profile by its sample type names.
pub fn detect_profile_kind(profile: &Profile) -> ProfileKind {
    let names = profile.sample_type_names();
    let has = |wanted: &[&str]| names.iter().any(|n| wanted.contains(n));

    if has(&["alloc_space", "alloc_objects", "inuse_space", "inuse_objects"]) {
        ProfileKind::Heap
    } else if has(&["samples", "cpu"]) {
        ProfileKind::Cpu
    } else if has(&["goroutine", "goroutines"]) {
        ProfileKind::Goroutine
    } else if has(&["delay", "contentions"]) {
        ProfileKind::Mutex
    } else {
        ProfileKind::Unknown
    }
}

/// Warning text when a profile does not look like the kind a detector
/// expects, or `None` when it does.
pub fn kind_mismatch_warning(profile: &Profile, expected: ProfileKind) -> Option<String> {
    let detected = detect_profile_kind(profile);
    if detected == expected {
        return None;
    }
    Some(format!(
        "expected a {} profile but sample types [{}] look like {}; continuing",
        expected,
        profile.sample_type_names().join(", "),
        detected
    ))
}

/// Go runtime version recorded in the profile comments, e.g. `go1.22.4`.
pub fn runtime_version(profile: &Profile) -> Option<String> {
    profile
        .header
        .comments
        .iter()
        .find_map(|c| GO_VERSION.find(c).map(|m| m.as_str().to_string()))
}
