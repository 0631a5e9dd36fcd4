//! Cross-profile hotspot correlation.
//!
//! Each profile is ranked on its own by flat (leaf) share. Functions that
//! rank in two or more profiles are merged into one entry with a combined
//! rank score; functions that rank in only one go to that profile's
//! `*_only` list.

use crate::error::{AnalysisError, Result};
use crate::findings::{ProfileKind, percentage};
use crate::primitives::{find_sample_index, kind_mismatch_warning, sample_value, stack_frames};
use goprof_parse::Profile;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

pub const DEFAULT_NODE_COUNT: usize = 20;
pub const MAX_ONLY_ENTRIES: usize = 5;

/// Profiles to correlate. At least one must be present.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrelationInput<'a> {
    pub cpu: Option<&'a Profile>,
    pub heap: Option<&'a Profile>,
    pub mutex: Option<&'a Profile>,
}

impl<'a> CorrelationInput<'a> {
    fn present(&self) -> Vec<(ProfileKind, &'a Profile)> {
        [
            (ProfileKind::Cpu, self.cpu),
            (ProfileKind::Heap, self.heap),
            (ProfileKind::Mutex, self.mutex),
        ]
        .into_iter()
        .filter_map(|(kind, profile)| profile.map(|p| (kind, p)))
        .collect()
    }
}

/// Preferred value columns per profile kind.
fn value_candidates(kind: ProfileKind) -> &'static [&'static str] {
    match kind {
        ProfileKind::Cpu => &["cpu", "samples"],
        ProfileKind::Heap => &["alloc_space", "inuse_space"],
        ProfileKind::Mutex => &["delay", "contentions"],
        ProfileKind::Goroutine | ProfileKind::Unknown => &[],
    }
}

/// One function's standing in one profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedFunction {
    pub function: String,
    pub rank: usize,
    pub percentage: f64,
}

/// Rank 1 scores 1.0; last place scores `1 / max_rank`.
pub fn rank_score(rank: usize, max_rank: usize) -> f64 {
    if max_rank == 0 || rank == 0 || rank > max_rank {
        return 0.0;
    }
    (max_rank - rank + 1) as f64 / max_rank as f64
}

/// Top `node_count` functions by flat share, rank 1 first. Rows with no
/// share are dropped.
pub fn top_functions(profile: &Profile, kind: ProfileKind, node_count: usize) -> Vec<RankedFunction> {
    let index = find_sample_index(profile, value_candidates(kind));
    let mut flat: HashMap<&str, i64> = HashMap::new();
    let mut total: i64 = 0;
    for sample in &profile.samples {
        let value = sample_value(sample, index, 0);
        if value <= 0 {
            continue;
        }
        total += value;
        if let Some(&leaf) = stack_frames(profile, sample).first() {
            *flat.entry(leaf).or_default() += value;
        }
    }

    let mut rows: Vec<(&str, i64)> = flat.into_iter().filter(|(_, v)| *v > 0).collect();
    rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    rows.truncate(node_count);
    rows.into_iter()
        .enumerate()
        .map(|(i, (function, value))| RankedFunction {
            function: function.to_string(),
            rank: i + 1,
            percentage: percentage(value, total),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileRank {
    pub rank: usize,
    pub percentage: f64,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationEntry {
    pub function: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<ProfileRank>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heap: Option<ProfileRank>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mutex: Option<ProfileRank>,
    pub combined_score: f64,
    pub insight: String,
}

impl CorrelationEntry {
    fn ranks(&self) -> impl Iterator<Item = &ProfileRank> {
        [&self.cpu, &self.heap, &self.mutex]
            .into_iter()
            .filter_map(Option::as_ref)
    }
}

/// Templated insight for the profile combination an entry appears in.
pub fn insight_for(function: &str, cpu: bool, heap: bool, mutex: bool) -> String {
    match (cpu, heap, mutex) {
        (true, true, true) => format!(
            "{} is hot in CPU, allocations and lock contention; it is the top optimization target",
            function
        ),
        (true, true, false) => format!(
            "{} is CPU-hot and allocation-heavy; cutting allocations here also reduces GC CPU",
            function
        ),
        (true, false, true) => format!(
            "{} is CPU-hot and contended; move work out of the critical section",
            function
        ),
        (false, true, true) => format!(
            "{} allocates while holding contended locks; hoist allocations out of the lock",
            function
        ),
        _ => format!("{} is hot in more than one profile", function),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationReport {
    pub profiles: Vec<ProfileKind>,
    pub correlations: Vec<CorrelationEntry>,
    pub cpu_only: Vec<RankedFunction>,
    pub heap_only: Vec<RankedFunction>,
    pub mutex_only: Vec<RankedFunction>,
    pub warnings: Vec<String>,
}

/// Merge per-profile rankings into combined hotspots.
pub fn correlate(input: &CorrelationInput<'_>, node_count: usize) -> Result<CorrelationReport> {
    let present = input.present();
    if present.is_empty() {
        return Err(AnalysisError::InvalidInput(
            "at least one of the cpu, heap or mutex profiles is required".to_string(),
        ));
    }

    let mut warnings = Vec::new();
    for (kind, profile) in [
        (ProfileKind::Cpu, input.cpu),
        (ProfileKind::Heap, input.heap),
        (ProfileKind::Mutex, input.mutex),
    ] {
        match profile {
            Some(p) => warnings.extend(kind_mismatch_warning(p, kind)),
            None => warnings.push(format!("no {} profile supplied", kind)),
        }
    }
    if present.len() < 2 {
        warnings.push("correlation needs at least two profiles; nothing to merge".to_string());
    }

    let rankings: Vec<(ProfileKind, Vec<RankedFunction>)> = present
        .iter()
        .map(|(kind, profile)| (*kind, top_functions(profile, *kind, node_count)))
        .collect();

    // BTreeMap keeps function order stable before the score sort.
    let mut by_function: BTreeMap<&str, [Option<ProfileRank>; 3]> = BTreeMap::new();
    for (kind, ranked) in &rankings {
        let slot = match kind {
            ProfileKind::Cpu => 0,
            ProfileKind::Heap => 1,
            _ => 2,
        };
        let max_rank = ranked.len();
        for row in ranked {
            by_function.entry(row.function.as_str()).or_default()[slot] = Some(ProfileRank {
                rank: row.rank,
                percentage: row.percentage,
                score: rank_score(row.rank, max_rank),
            });
        }
    }

    let mut correlations: Vec<CorrelationEntry> = by_function
        .into_iter()
        .filter_map(|(function, [cpu, heap, mutex])| {
            let entry = CorrelationEntry {
                function: function.to_string(),
                insight: insight_for(function, cpu.is_some(), heap.is_some(), mutex.is_some()),
                cpu,
                heap,
                mutex,
                combined_score: 0.0,
            };
            let scores: Vec<f64> = entry.ranks().map(|r| r.score).collect();
            if scores.len() < 2 {
                return None;
            }
            let combined_score = scores.iter().sum::<f64>() / scores.len() as f64;
            Some(CorrelationEntry {
                combined_score,
                ..entry
            })
        })
        .collect();
    correlations.sort_by(|a, b| {
        b.combined_score
            .total_cmp(&a.combined_score)
            .then_with(|| a.function.cmp(&b.function))
    });

    let only = |wanted: ProfileKind| -> Vec<RankedFunction> {
        rankings
            .iter()
            .find(|(kind, _)| *kind == wanted)
            .map(|(_, ranked)| {
                ranked
                    .iter()
                    .filter(|row| !correlations.iter().any(|c| c.function == row.function))
                    .take(MAX_ONLY_ENTRIES)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    };
    let cpu_only = only(ProfileKind::Cpu);
    let heap_only = only(ProfileKind::Heap);
    let mutex_only = only(ProfileKind::Mutex);

    tracing::debug!(
        profiles = present.len(),
        correlations = correlations.len(),
        "correlation complete"
    );

    Ok(CorrelationReport {
        profiles: present.iter().map(|(kind, _)| *kind).collect(),
        correlations,
        cpu_only,
        heap_only,
        mutex_only,
        warnings,
    })
}
