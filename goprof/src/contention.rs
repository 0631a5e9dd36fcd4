//! Mutex and block profile contention analysis.
//!
//! Each sample is attributed to a lock site (the first lock primitive frame
//! walking from the leaf) and a waiter (the first caller frame above it that
//! is not runtime or sync internals). Sites are keyed by primitive plus the
//! waiter's source location so two call sites that block on the same
//! library function stay separate.

use crate::findings::{ProfileKind, percentage};
use crate::patterns::{PatternCategory, PatternTable};
use crate::primitives::{
    Frame, find_sample_index, kind_mismatch_warning, sample_type_index, sample_unit,
    sample_value, stack_locations,
};
use goprof_parse::Profile;
use serde::Serialize;
use std::collections::HashMap;

/// Top site share of total delay that makes it a hot lock.
pub const HOT_LOCK_SHARE: f64 = 35.0;

/// Joint share of the top three sites that makes a convoy.
pub const CONVOY_SHARE: f64 = 70.0;

/// Total contention events that count as high contention.
pub const HIGH_CONTENTION_COUNT: i64 = 50_000;

pub const DEFAULT_TOP_WAITERS: usize = 5;
pub const DEFAULT_MAX_SITES: usize = 20;

/// Site name used when a sample has no resolvable frames at all.
pub const UNKNOWN_SITE: &str = "<unknown>";

const RWMUTEX_METHOD_PREFIX: &str = "sync.(*RWMutex).";

/// Lock and semaphore acquisition signatures.
pub fn lock_primitives() -> PatternTable {
    PatternTable::new(vec![
        PatternCategory::new(
            "mutex",
            "sync.Mutex",
            &[
                "sync.(*Mutex).Lock",
                "sync.(*Mutex).TryLock",
                "sync.(*Mutex).Unlock",
            ],
        ),
        PatternCategory::new(
            "rwmutex",
            "sync.RWMutex",
            &[
                "sync.(*RWMutex).Lock",
                "sync.(*RWMutex).RLock",
                "sync.(*RWMutex).Unlock",
                "sync.(*RWMutex).RUnlock",
            ],
        ),
        PatternCategory::new(
            "semaphore",
            "Semaphore acquire",
            &[
                "golang.org/x/sync/semaphore.(*Weighted).Acquire",
                "runtime.semacquire",
            ],
        ),
        PatternCategory::new(
            "cond",
            "Condition and wait group waits",
            &["sync.(*Cond).Wait", "sync.(*WaitGroup).Wait"],
        ),
    ])
}

fn is_internal(function: &str) -> bool {
    function.starts_with("runtime.")
        || function.starts_with("sync.")
        || function.starts_with("internal/")
        || function.starts_with("golang.org/x/sync/")
}

#[derive(Debug, Clone)]
pub struct ContentionOptions {
    pub top_waiters: usize,
    pub max_sites: usize,
}

impl Default for ContentionOptions {
    fn default() -> Self {
        Self {
            top_waiters: DEFAULT_TOP_WAITERS,
            max_sites: DEFAULT_MAX_SITES,
        }
    }
}

/// A caller blocked at a lock site.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Waiter {
    pub function: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_location: Option<String>,
    pub contentions: i64,
    pub delay: i64,
}

/// Aggregated contention at one acquisition site.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LockSite {
    pub key: String,
    pub site_function: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_location: Option<String>,
    pub contention_count: i64,
    pub total_delay: i64,
    pub avg_delay: f64,
    pub delay_percentage: f64,
    pub top_waiters: Vec<Waiter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    HotLock,
    LockConvoy,
    HighContention,
}

/// A systemic contention pattern over the whole site set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentionPattern {
    pub kind: PatternKind,
    pub sites: Vec<String>,
    pub share: f64,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentionReport {
    pub total_contentions: i64,
    pub total_delay: i64,
    pub delay_unit: String,
    pub site_count: usize,
    pub sites: Vec<LockSite>,
    pub patterns: Vec<ContentionPattern>,
    pub warnings: Vec<String>,
}

/// Where a sample's contention is attributed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution {
    pub site_function: String,
    pub waiter: Option<(String, Option<String>)>,
}

impl Attribution {
    /// `site@file:line` when the waiter has a source location, else the
    /// site function alone.
    pub fn key(&self) -> String {
        match &self.waiter {
            Some((_, Some(location))) => format!("{}@{}", self.site_function, location),
            _ => self.site_function.clone(),
        }
    }

    fn source_location(&self) -> Option<String> {
        self.waiter.as_ref().and_then(|(_, loc)| loc.clone())
    }
}

/// Find the lock site and waiter in a leaf-to-root stack.
pub fn attribute(frames: &[Frame<'_>], primitives: &PatternTable) -> Attribution {
    let names: Vec<&str> = frames.iter().map(|f| f.function).collect();
    match primitives.first_frame_match(&names) {
        Some(hit) => {
            // RWMutex write locks go through the embedded Mutex.
            let site = match frames.get(hit.frame + 1) {
                Some(f) if f.function.starts_with(RWMUTEX_METHOD_PREFIX) => hit.frame + 1,
                _ => hit.frame,
            };
            let waiter = frames[site + 1..]
                .iter()
                .find(|f| !is_internal(f.function))
                .map(|f| (f.function.to_string(), f.source_location()));
            Attribution {
                site_function: frames[site].function.to_string(),
                waiter,
            }
        }
        // No primitive: the outermost frame stands in as the site.
        None => Attribution {
            site_function: frames
                .last()
                .map(|f| f.function.to_string())
                .unwrap_or_else(|| UNKNOWN_SITE.to_string()),
            waiter: None,
        },
    }
}

#[derive(Default)]
struct SiteTotals {
    site_function: String,
    source_location: Option<String>,
    contentions: i64,
    delay: i64,
    waiters: HashMap<(String, Option<String>), (i64, i64)>,
}

/// Aggregate contention per lock site and detect systemic patterns.
pub fn analyze_contention(
    profile: &Profile,
    primitives: &PatternTable,
    options: &ContentionOptions,
) -> ContentionReport {
    let mut warnings = Vec::new();
    if let Some(w) = kind_mismatch_warning(profile, ProfileKind::Mutex) {
        warnings.push(w);
    }

    let count_idx = sample_type_index(profile, "contentions")
        .or_else(|| sample_type_index(profile, "count"));
    let delay_idx = sample_type_index(profile, "delay");
    if count_idx.is_none() {
        warnings.push("no 'contentions' sample type; counting each sample once".to_string());
    }
    let delay_idx = match delay_idx {
        Some(idx) => Some(idx),
        None if count_idx.is_none() => {
            let idx = find_sample_index(profile, &[]);
            warnings.push(format!(
                "no 'delay' sample type; treating column {} as delay",
                idx
            ));
            Some(idx)
        }
        None => {
            warnings.push("no 'delay' sample type; delay shares unavailable".to_string());
            None
        }
    };
    let delay_unit = delay_idx
        .map(|idx| sample_unit(profile, idx).to_string())
        .unwrap_or_default();

    let mut sites: HashMap<String, SiteTotals> = HashMap::new();
    let mut total_contentions: i64 = 0;
    let mut total_delay: i64 = 0;

    for sample in &profile.samples {
        let contentions = count_idx.map_or(1, |idx| sample_value(sample, idx, 0));
        let delay = delay_idx.map_or(0, |idx| sample_value(sample, idx, 0));
        if contentions == 0 && delay == 0 {
            continue;
        }

        let frames = stack_locations(profile, sample);
        let attribution = attribute(&frames, primitives);
        let key = attribution.key();

        let entry = sites.entry(key).or_insert_with(|| SiteTotals {
            site_function: attribution.site_function.clone(),
            source_location: attribution.source_location(),
            ..SiteTotals::default()
        });
        entry.contentions += contentions;
        entry.delay += delay;
        if let Some(waiter) = attribution.waiter {
            let w = entry.waiters.entry(waiter).or_insert((0, 0));
            w.0 += contentions;
            w.1 += delay;
        }

        total_contentions += contentions;
        total_delay += delay;
    }

    let mut ranked: Vec<LockSite> = sites
        .into_iter()
        .map(|(key, totals)| {
            let mut waiters: Vec<Waiter> = totals
                .waiters
                .into_iter()
                .map(|((function, source_location), (contentions, delay))| Waiter {
                    function,
                    source_location,
                    contentions,
                    delay,
                })
                .collect();
            waiters.sort_by(|a, b| {
                b.delay
                    .cmp(&a.delay)
                    .then_with(|| b.contentions.cmp(&a.contentions))
                    .then_with(|| a.function.cmp(&b.function))
                    .then_with(|| a.source_location.cmp(&b.source_location))
            });
            waiters.truncate(options.top_waiters);

            let avg_delay = if totals.contentions > 0 {
                totals.delay as f64 / totals.contentions as f64
            } else {
                0.0
            };
            LockSite {
                key,
                site_function: totals.site_function,
                source_location: totals.source_location,
                contention_count: totals.contentions,
                total_delay: totals.delay,
                avg_delay,
                delay_percentage: percentage(totals.delay, total_delay),
                top_waiters: waiters,
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.total_delay
            .cmp(&a.total_delay)
            .then_with(|| b.contention_count.cmp(&a.contention_count))
            .then_with(|| a.key.cmp(&b.key))
    });

    if ranked.is_empty() {
        warnings.push("profile has no contention samples".to_string());
    }

    let patterns = detect_patterns(&ranked, total_contentions, total_delay, &mut warnings);

    tracing::debug!(
        sites = ranked.len(),
        total_contentions,
        total_delay,
        patterns = patterns.len(),
        "contention analysis complete"
    );

    let site_count = ranked.len();
    ranked.truncate(options.max_sites);

    ContentionReport {
        total_contentions,
        total_delay,
        delay_unit,
        site_count,
        sites: ranked,
        patterns,
        warnings,
    }
}

/// Evaluate hot lock, convoy and high contention over sites sorted by delay.
fn detect_patterns(
    ranked: &[LockSite],
    total_contentions: i64,
    total_delay: i64,
    warnings: &mut Vec<String>,
) -> Vec<ContentionPattern> {
    let mut patterns = Vec::new();

    if total_delay > 0 {
        if let Some(top) = ranked.first() {
            let share = percentage(top.total_delay, total_delay);
            if share >= HOT_LOCK_SHARE {
                patterns.push(ContentionPattern {
                    kind: PatternKind::HotLock,
                    sites: vec![top.key.clone()],
                    share,
                    recommendation: format!(
                        "{} accounts for {:.1}% of lock delay: shorten its critical section, \
                         shard the protected state, or move reads to atomics",
                        top.key, share
                    ),
                });
            }
        }

        if ranked.len() >= 3 {
            let top_three = &ranked[..3];
            let joint: i64 = top_three.iter().map(|s| s.total_delay).sum();
            let share = percentage(joint, total_delay);
            if share >= CONVOY_SHARE {
                let keys: Vec<String> = top_three.iter().map(|s| s.key.clone()).collect();
                patterns.push(ContentionPattern {
                    kind: PatternKind::LockConvoy,
                    recommendation: format!(
                        "{} together account for {:.1}% of lock delay: look for a path that \
                         takes them in sequence and reduce hold times or lock ordering depth",
                        keys.join(", "),
                        share
                    ),
                    sites: keys,
                    share,
                });
            }
        }
    } else if !ranked.is_empty() {
        warnings.push("total delay is zero; hot lock and convoy checks skipped".to_string());
    }

    if total_contentions >= HIGH_CONTENTION_COUNT {
        patterns.push(ContentionPattern {
            kind: PatternKind::HighContention,
            sites: ranked.iter().take(3).map(|s| s.key.clone()).collect(),
            share: 100.0,
            recommendation: format!(
                "{} contention events recorded: reduce goroutine fan-in on shared state \
                 or batch updates under a single acquisition",
                total_contentions
            ),
        });
    }

    patterns
}
