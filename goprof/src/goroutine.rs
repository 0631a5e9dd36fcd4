//! Goroutine profile analysis: wait state, leak candidates and regex
//! categories.
//!
//! Each capability is a tally fed one goroutine stack at a time. The
//! standalone entry points run a single tally; [`analyze_goroutines`] feeds
//! all of them from one pass over the samples.

use crate::error::{AnalysisError, Result};
use crate::findings::{ProfileKind, Severity, percentage};
use crate::patterns::{PatternCategory, PatternTable};
use crate::primitives::{
    find_sample_index, kind_mismatch_warning, runtime_version, sample_value, stack_frames,
    stack_signature,
};
use goprof_parse::Profile;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const STATE_SIGNATURE_FRAMES: usize = 6;
pub const LEAK_SIGNATURE_FRAMES: usize = 8;
pub const UNCATEGORIZED_SIGNATURE_FRAMES: usize = 4;
pub const TOP_WAIT_REASONS: usize = 5;
pub const TOP_UNCATEGORIZED: usize = 10;
pub const DEFAULT_LEAK_THRESHOLD: i64 = 1000;
pub const DEFAULT_LEAK_LIMIT: usize = 20;

/// Reason name for stacks in a system call; the only reason not in the
/// `waiting` state.
pub const SYSCALL_REASON: &str = "syscall";

/// Blocking primitives in priority order. Every frame of a stack is checked
/// against one entry before moving to the next.
pub fn wait_reasons() -> PatternTable {
    PatternTable::new(vec![
        PatternCategory::new("chan receive", "", &["runtime.chanrecv"]),
        PatternCategory::new("chan send", "", &["runtime.chansend"]),
        PatternCategory::new("select", "", &["runtime.selectgo", "runtime.block"]),
        // Ahead of Mutex: RWMutex.Lock waits inside the embedded Mutex.
        PatternCategory::new(
            "sync.RWMutex",
            "",
            &[
                "sync.(*RWMutex).Lock",
                "sync.(*RWMutex).RLock",
                "sync.runtime_SemacquireRWMutex",
            ],
        ),
        PatternCategory::new(
            "sync.Mutex.Lock",
            "",
            &["sync.(*Mutex).Lock", "sync.runtime_SemacquireMutex"],
        ),
        PatternCategory::new(
            "sync.Cond.Wait",
            "",
            &["sync.(*Cond).Wait", "sync.runtime_notifyListWait"],
        ),
        PatternCategory::new("sync.WaitGroup.Wait", "", &["sync.(*WaitGroup).Wait"]),
        PatternCategory::new("sleep", "", &["time.Sleep", "runtime.timeSleep"]),
        PatternCategory::new("timer", "", &["time.(*Timer)", "time.(*Ticker)", "time.After"]),
        PatternCategory::new(
            "IO wait",
            "",
            &["internal/poll.runtime_pollWait", "internal/poll.(*FD)"],
        ),
        PatternCategory::new("netpoll", "", &["runtime.netpoll"]),
        PatternCategory::new(
            SYSCALL_REASON,
            "",
            &[
                "syscall.Syscall",
                "syscall.RawSyscall",
                "syscall.syscall",
                "golang.org/x/sys/unix.Syscall",
                "runtime.cgocall",
            ],
        ),
        PatternCategory::new("park", "", &["runtime.gopark", "runtime.goparkunlock"]),
    ])
}

/// `syscall` for system calls, `waiting` for any other blocking reason,
/// `unknown` when no reason was found.
pub fn state_for_reason(reason: Option<&str>) -> &'static str {
    match reason {
        Some(SYSCALL_REASON) => "syscall",
        Some(_) => "waiting",
        None => "unknown",
    }
}

/// A named regex matched against every frame of a goroutine stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySpec {
    pub name: String,
    pub pattern: String,
}

impl CategorySpec {
    pub fn new(name: &str, pattern: &str) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.to_string(),
        }
    }
}

const PRESETS: &[(&str, &str, &[(&str, &str)])] = &[
    (
        "grpc",
        "gRPC servers, clients and transports",
        &[
            ("grpc_server", r"^google\.golang\.org/grpc\.\(\*Server\)"),
            (
                "grpc_client",
                r"^google\.golang\.org/grpc\.(\(\*ClientConn\)|invoke|newClientStream)",
            ),
            ("grpc_transport", r"^google\.golang\.org/grpc/internal/transport"),
        ],
    ),
    (
        "http",
        "net/http servers and clients",
        &[
            ("http_server", r"^net/http\.(\(\*conn\)\.serve|\(\*Server\))"),
            (
                "http_client",
                r"^net/http\.(\(\*Client\)|\(\*Transport\)|\(\*persistConn\))",
            ),
        ],
    ),
    (
        "database",
        "SQL drivers, connection pools and key-value clients",
        &[
            ("sql_pool", r"^database/sql\."),
            ("postgres", r"^github\.com/(lib/pq|jackc/pgx)"),
            ("mysql", r"^github\.com/go-sql-driver/mysql"),
            ("redis", r"^github\.com/(go-redis|redis)/"),
        ],
    ),
    (
        "messaging",
        "Message broker clients",
        &[
            (
                "kafka",
                r"^github\.com/((IBM|Shopify)/sarama|segmentio/kafka-go|confluentinc/confluent-kafka-go)",
            ),
            ("nats", r"^github\.com/nats-io/"),
            ("amqp", r"^github\.com/(streadway|rabbitmq)/amqp"),
        ],
    ),
    (
        "runtime",
        "Runtime background workers",
        &[
            ("gc_worker", r"^runtime\.(gcBgMarkWorker|bgsweep|bgscavenge|forcegchelper)"),
            ("finalizer", r"^runtime\.runfinq"),
            ("signal", r"^os/signal\."),
        ],
    ),
];

/// A named bundle of categories.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresetInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub categories: Vec<&'static str>,
}

pub fn list_presets() -> Vec<PresetInfo> {
    PRESETS
        .iter()
        .map(|&(name, description, categories)| PresetInfo {
            name,
            description,
            categories: categories.iter().map(|(c, _)| *c).collect(),
        })
        .collect()
}

pub fn preset(name: &str) -> Option<Vec<CategorySpec>> {
    PRESETS.iter().find(|(n, _, _)| *n == name).map(|(_, _, cats)| {
        cats.iter()
            .map(|(name, pattern)| CategorySpec::new(name, pattern))
            .collect()
    })
}

/// Explicit categories followed by the categories of each named preset.
pub fn resolve_categories(
    explicit: &[CategorySpec],
    presets: &[String],
) -> Result<Vec<CategorySpec>> {
    let mut categories = explicit.to_vec();
    for name in presets {
        let found = preset(name).ok_or_else(|| {
            let known: Vec<&str> = PRESETS.iter().map(|(n, _, _)| *n).collect();
            AnalysisError::InvalidInput(format!(
                "unknown preset '{}' (known: {})",
                name,
                known.join(", ")
            ))
        })?;
        categories.extend(found);
    }
    Ok(categories)
}

/// Compile categories in order. No categories, an empty pattern or an
/// invalid pattern are all hard errors.
pub fn compile_categories(specs: &[CategorySpec]) -> Result<Vec<(String, Regex)>> {
    if specs.is_empty() {
        return Err(AnalysisError::InvalidInput(
            "at least one goroutine category is required".to_string(),
        ));
    }
    specs
        .iter()
        .map(|spec| {
            if spec.pattern.trim().is_empty() {
                return Err(AnalysisError::EmptyPattern(spec.name.clone()));
            }
            let regex = Regex::new(&spec.pattern).map_err(|source| AnalysisError::InvalidPattern {
                name: spec.name.clone(),
                source,
            })?;
            Ok((spec.name.clone(), regex))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateCount {
    pub state: String,
    pub count: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaitReasonCount {
    pub reason: String,
    pub state: String,
    pub count: i64,
    pub percentage: f64,
    pub example_signature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSummary {
    pub total: i64,
    pub states: Vec<StateCount>,
    pub top_wait_reasons: Vec<WaitReasonCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeakCandidate {
    pub signature: String,
    pub count: i64,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_reason: Option<String>,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryCount {
    pub name: String,
    pub pattern: String,
    pub count: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignatureCount {
    pub signature: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorySummary {
    pub total: i64,
    pub categories: Vec<CategoryCount>,
    pub uncategorized: i64,
    pub top_uncategorized: Vec<SignatureCount>,
}

#[derive(Debug, Clone)]
pub struct LeakOptions {
    /// Group size at which a stack is a `high` leak candidate. Half of it is
    /// the `medium` floor.
    pub threshold: i64,
    pub limit: usize,
}

impl Default for LeakOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_LEAK_THRESHOLD,
            limit: DEFAULT_LEAK_LIMIT,
        }
    }
}

/// Priority index of the wait reason for a stack.
fn classify(reasons: &PatternTable, frames: &[&str]) -> Option<usize> {
    reasons.first_category_match(frames)
}

fn reason_name(reasons: &PatternTable, index: Option<usize>) -> Option<String> {
    index.and_then(|i| reasons.get(i)).map(|c| c.name.clone())
}

/// Heaviest example wins; ties keep the lexicographically smaller one so the
/// result does not depend on sample order.
fn keep_example(current: &mut Option<(i64, String)>, count: i64, signature: String) {
    let replace = match current {
        None => true,
        Some((best, sig)) => count > *best || (count == *best && signature < *sig),
    };
    if replace {
        *current = Some((count, signature));
    }
}

struct StateTally<'t> {
    reasons: &'t PatternTable,
    total: i64,
    by_reason: HashMap<Option<usize>, (i64, Option<(i64, String)>)>,
}

impl<'t> StateTally<'t> {
    fn new(reasons: &'t PatternTable) -> Self {
        Self {
            reasons,
            total: 0,
            by_reason: HashMap::new(),
        }
    }

    fn observe(&mut self, frames: &[&str], reason: Option<usize>, count: i64) {
        self.total += count;
        let entry = self.by_reason.entry(reason).or_default();
        entry.0 += count;
        keep_example(
            &mut entry.1,
            count,
            stack_signature(frames, STATE_SIGNATURE_FRAMES),
        );
    }

    fn finish(self) -> StateSummary {
        let mut states: HashMap<&'static str, i64> = HashMap::new();
        for (reason, (count, _)) in &self.by_reason {
            let name = reason_name(self.reasons, *reason);
            *states.entry(state_for_reason(name.as_deref())).or_default() += count;
        }
        let mut states: Vec<StateCount> = states
            .into_iter()
            .map(|(state, count)| StateCount {
                state: state.to_string(),
                count,
                percentage: percentage(count, self.total),
            })
            .collect();
        states.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.state.cmp(&b.state)));

        let mut reasons: Vec<(usize, i64, String)> = self
            .by_reason
            .into_iter()
            .filter_map(|(reason, (count, example))| {
                let reason = reason?;
                Some((reason, count, example.map(|(_, s)| s).unwrap_or_default()))
            })
            .collect();
        reasons.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        reasons.truncate(TOP_WAIT_REASONS);

        let top_wait_reasons = reasons
            .into_iter()
            .filter_map(|(index, count, example_signature)| {
                let reason = self.reasons.get(index)?.name.clone();
                Some(WaitReasonCount {
                    state: state_for_reason(Some(&reason)).to_string(),
                    reason,
                    count,
                    percentage: percentage(count, self.total),
                    example_signature,
                })
            })
            .collect();

        StateSummary {
            total: self.total,
            states,
            top_wait_reasons,
        }
    }
}

struct LeakTally<'t> {
    reasons: &'t PatternTable,
    options: LeakOptions,
    groups: HashMap<String, (i64, Option<usize>)>,
}

impl<'t> LeakTally<'t> {
    fn new(reasons: &'t PatternTable, options: LeakOptions) -> Self {
        Self {
            reasons,
            options,
            groups: HashMap::new(),
        }
    }

    fn observe(&mut self, frames: &[&str], reason: Option<usize>, count: i64) {
        let signature = stack_signature(frames, LEAK_SIGNATURE_FRAMES);
        if signature.is_empty() {
            return;
        }
        let group = self.groups.entry(signature).or_insert((0, reason));
        group.0 += count;
        // Keep the highest-priority reason seen for the group.
        group.1 = match (group.1, reason) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }

    fn finish(self) -> Vec<LeakCandidate> {
        let high = self.options.threshold;
        let medium = high / 2;
        let mut leaks: Vec<LeakCandidate> = self
            .groups
            .into_iter()
            .filter_map(|(signature, (count, reason))| {
                let severity = if count >= high {
                    Severity::High
                } else if count >= medium {
                    Severity::Medium
                } else {
                    return None;
                };
                let wait_reason = reason_name(self.reasons, reason);
                Some(LeakCandidate {
                    state: state_for_reason(wait_reason.as_deref()).to_string(),
                    signature,
                    count,
                    severity,
                    wait_reason,
                })
            })
            .collect();
        leaks.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.signature.cmp(&b.signature))
        });
        leaks.truncate(self.options.limit);
        leaks
    }
}

struct CategoryTally {
    compiled: Vec<(String, Regex)>,
    counts: Vec<i64>,
    total: i64,
    uncategorized_total: i64,
    uncategorized: HashMap<String, i64>,
}

impl CategoryTally {
    fn new(compiled: Vec<(String, Regex)>) -> Self {
        let counts = vec![0; compiled.len()];
        Self {
            compiled,
            counts,
            total: 0,
            uncategorized_total: 0,
            uncategorized: HashMap::new(),
        }
    }

    fn observe(&mut self, frames: &[&str], count: i64) {
        self.total += count;
        let hit = self
            .compiled
            .iter()
            .position(|(_, regex)| frames.iter().any(|f| regex.is_match(f)));
        match hit {
            Some(index) => self.counts[index] += count,
            None => {
                self.uncategorized_total += count;
                let signature = stack_signature(frames, UNCATEGORIZED_SIGNATURE_FRAMES);
                if !signature.is_empty() {
                    *self.uncategorized.entry(signature).or_default() += count;
                }
            }
        }
    }

    fn finish(self) -> CategorySummary {
        let total = self.total;
        let mut categories: Vec<CategoryCount> = self
            .compiled
            .into_iter()
            .zip(self.counts)
            .map(|((name, regex), count)| CategoryCount {
                name,
                pattern: regex.as_str().to_string(),
                count,
                percentage: percentage(count, total),
            })
            .collect();
        // Stable: equal counts keep declaration order.
        categories.sort_by(|a, b| b.count.cmp(&a.count));

        let uncategorized = self.uncategorized_total;
        let mut top_uncategorized: Vec<SignatureCount> = self
            .uncategorized
            .into_iter()
            .map(|(signature, count)| SignatureCount { signature, count })
            .collect();
        top_uncategorized.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.signature.cmp(&b.signature))
        });
        top_uncategorized.truncate(TOP_UNCATEGORIZED);

        CategorySummary {
            total,
            categories,
            uncategorized,
            top_uncategorized,
        }
    }
}

/// Goroutine stacks of a profile with their weights. Samples whose count is
/// not positive are skipped.
fn weighted_stacks(profile: &Profile) -> impl Iterator<Item = (Vec<&str>, i64)> {
    let index = find_sample_index(profile, &["goroutine", "goroutines"]);
    profile.samples.iter().filter_map(move |sample| {
        let count = sample_value(sample, index, 1);
        (count > 0).then(|| (stack_frames(profile, sample), count))
    })
}

/// Wait reason and state breakdown.
pub fn classify_states(profile: &Profile) -> StateSummary {
    let reasons = wait_reasons();
    let mut tally = StateTally::new(&reasons);
    for (frames, count) in weighted_stacks(profile) {
        let reason = classify(&reasons, &frames);
        tally.observe(&frames, reason, count);
    }
    tally.finish()
}

/// Stack groups large enough to suggest a leak.
pub fn find_leaks(profile: &Profile, options: &LeakOptions) -> Vec<LeakCandidate> {
    let reasons = wait_reasons();
    let mut tally = LeakTally::new(&reasons, options.clone());
    for (frames, count) in weighted_stacks(profile) {
        let reason = classify(&reasons, &frames);
        tally.observe(&frames, reason, count);
    }
    tally.finish()
}

/// Assign each goroutine to the first matching category.
pub fn categorize_goroutines(
    profile: &Profile,
    categories: &[CategorySpec],
) -> Result<CategorySummary> {
    let mut tally = CategoryTally::new(compile_categories(categories)?);
    for (frames, count) in weighted_stacks(profile) {
        tally.observe(&frames, count);
    }
    Ok(tally.finish())
}

#[derive(Debug, Clone, Default)]
pub struct GoroutineOptions {
    pub leaks: LeakOptions,
    /// Categorization runs only when this is non-empty.
    pub categories: Vec<CategorySpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoroutineReport {
    pub total_goroutines: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_version: Option<String>,
    pub states: StateSummary,
    pub leaks: Vec<LeakCandidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categories: Option<CategorySummary>,
    pub warnings: Vec<String>,
}

/// State, leak and category analysis in one pass over the samples.
pub fn analyze_goroutines(profile: &Profile, options: &GoroutineOptions) -> Result<GoroutineReport> {
    let mut warnings = Vec::new();
    if let Some(w) = kind_mismatch_warning(profile, ProfileKind::Goroutine) {
        warnings.push(w);
    }

    let mut categories = if options.categories.is_empty() {
        None
    } else {
        Some(CategoryTally::new(compile_categories(&options.categories)?))
    };

    let reasons = wait_reasons();
    let mut states = StateTally::new(&reasons);
    let mut leaks = LeakTally::new(&reasons, options.leaks.clone());

    for (frames, count) in weighted_stacks(profile) {
        let reason = classify(&reasons, &frames);
        states.observe(&frames, reason, count);
        leaks.observe(&frames, reason, count);
        if let Some(tally) = categories.as_mut() {
            tally.observe(&frames, count);
        }
    }

    let states = states.finish();
    if states.total == 0 {
        warnings.push("profile has no goroutines".to_string());
    }
    let leaks = leaks.finish();

    tracing::debug!(
        total = states.total,
        reasons = states.top_wait_reasons.len(),
        leaks = leaks.len(),
        "goroutine analysis complete"
    );

    Ok(GoroutineReport {
        total_goroutines: states.total,
        runtime_version: runtime_version(profile),
        states,
        leaks,
        categories: categories.map(CategoryTally::finish),
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use goprof_parse::ProfileBuilder;

    fn goroutines() -> ProfileBuilder {
        ProfileBuilder::new().sample_types(&[("goroutine", "count")])
    }

    const CHAN_RECV: &[&str] = &[
        "runtime.gopark",
        "runtime.chanrecv",
        "runtime.chanrecv1",
        "main.(*Worker).loop",
        "main.(*Worker).Start.func1",
        "runtime.goexit",
    ];

    const SERVE: &[&str] = &[
        "runtime.gopark",
        "runtime.netpollblock",
        "internal/poll.runtime_pollWait",
        "internal/poll.(*pollDesc).wait",
        "internal/poll.(*FD).Read",
        "net.(*conn).Read",
        "net/http.(*connReader).Read",
        "net/http.(*conn).serve",
    ];

    const SYSCALL: &[&str] = &["syscall.Syscall6", "os.(*Process).wait", "main.reap"];

    #[test]
    fn wait_reason_priority() {
        let reasons = wait_reasons();
        let name = |frames: &[&str]| reason_name(&reasons, classify(&reasons, frames));

        assert_eq!(name(CHAN_RECV).as_deref(), Some("chan receive"));
        assert_eq!(name(SERVE).as_deref(), Some("IO wait"));
        assert_eq!(name(SYSCALL).as_deref(), Some("syscall"));
        assert_eq!(name(&["runtime.gopark", "main.f"]).as_deref(), Some("park"));
        assert_eq!(name(&["main.busy"]), None);
    }

    #[test]
    fn rwmutex_wait_is_not_reported_as_mutex() {
        let reasons = wait_reasons();
        let name = |frames: &[&str]| reason_name(&reasons, classify(&reasons, frames));

        let writer = [
            "sync.runtime_SemacquireMutex",
            "sync.(*Mutex).lockSlow",
            "sync.(*Mutex).Lock",
            "sync.(*RWMutex).Lock",
            "main.write",
        ];
        assert_eq!(name(&writer).as_deref(), Some("sync.RWMutex"));
        assert_eq!(
            name(&["sync.runtime_SemacquireMutex", "sync.(*Mutex).Lock", "main.f"]).as_deref(),
            Some("sync.Mutex.Lock")
        );
    }

    #[test]
    fn states_follow_reasons() {
        assert_eq!(state_for_reason(Some("syscall")), "syscall");
        assert_eq!(state_for_reason(Some("select")), "waiting");
        assert_eq!(state_for_reason(None), "unknown");
    }

    #[test]
    fn state_counts_are_weighted() {
        let profile = goroutines()
            .sample(CHAN_RECV, &[40])
            .sample(SYSCALL, &[10])
            .sample(&["main.busy"], &[])
            .build();
        let summary = classify_states(&profile);

        assert_eq!(summary.total, 51);
        assert_eq!(summary.states[0].state, "waiting");
        assert_eq!(summary.states[0].count, 40);
        assert_eq!(summary.top_wait_reasons[0].reason, "chan receive");
        assert_eq!(
            summary.top_wait_reasons[0].example_signature,
            stack_signature(CHAN_RECV, STATE_SIGNATURE_FRAMES)
        );
        // Stacks with no reason count toward states but not reasons.
        assert_eq!(summary.top_wait_reasons.len(), 2);
    }

    #[test]
    fn leak_floor_excludes_small_groups() {
        let profile = goroutines()
            .sample(CHAN_RECV, &[1200])
            .sample(SERVE, &[600])
            .sample(SYSCALL, &[499])
            .build();
        let leaks = find_leaks(&profile, &LeakOptions::default());

        assert_eq!(leaks.len(), 2);
        assert_eq!(leaks[0].severity, Severity::High);
        assert_eq!(leaks[0].wait_reason.as_deref(), Some("chan receive"));
        assert_eq!(leaks[1].severity, Severity::Medium);
        assert_eq!(leaks[1].state, "waiting");
    }

    #[test]
    fn leak_limit_never_admits_below_floor() {
        let profile = goroutines().sample(SYSCALL, &[10]).build();
        let options = LeakOptions {
            threshold: 100,
            limit: 1000,
        };
        assert!(find_leaks(&profile, &options).is_empty());
    }

    #[test]
    fn categorization_is_first_match() {
        let profile = goroutines()
            .sample(SERVE, &[5])
            .sample(CHAN_RECV, &[3])
            .build();
        let categories = vec![
            CategorySpec::new("http", r"^net/http\."),
            CategorySpec::new("net", r"^net\."),
            CategorySpec::new("workers", r"^main\.\(\*Worker\)"),
        ];
        let summary = categorize_goroutines(&profile, &categories).unwrap();

        let counts: Vec<_> = summary
            .categories
            .iter()
            .map(|c| (c.name.as_str(), c.count))
            .collect();
        assert_eq!(counts, vec![("http", 5), ("workers", 3), ("net", 0)]);
        assert_eq!(summary.uncategorized, 0);
    }

    #[test]
    fn uncategorized_grouped_by_short_signature() {
        let mut builder = goroutines();
        for i in 0..12 {
            let leaf = format!("main.job{}", i);
            builder = builder.sample(&[leaf.as_str(), "main.main"], &[1]);
        }
        let profile = builder.build();
        let summary =
            categorize_goroutines(&profile, &[CategorySpec::new("none", "^nothing$")]).unwrap();

        assert_eq!(summary.uncategorized, 12);
        assert_eq!(summary.top_uncategorized.len(), TOP_UNCATEGORIZED);
    }

    #[test]
    fn unresolvable_stacks_are_counted_but_not_grouped() {
        let profile = goroutines()
            .sample(&[], &[7])
            .sample(&["main.job", "main.main"], &[2])
            .build();
        let summary =
            categorize_goroutines(&profile, &[CategorySpec::new("none", "^nothing$")]).unwrap();

        assert_eq!(summary.uncategorized, 9);
        assert_eq!(summary.top_uncategorized.len(), 1);
        assert_eq!(summary.top_uncategorized[0].signature, "main.job | main.main");
    }

    #[test]
    fn bad_categories_are_errors() {
        let profile = goroutines().sample(CHAN_RECV, &[1]).build();
        assert!(matches!(
            categorize_goroutines(&profile, &[]),
            Err(AnalysisError::InvalidInput(_))
        ));
        assert!(matches!(
            categorize_goroutines(&profile, &[CategorySpec::new("blank", "  ")]),
            Err(AnalysisError::EmptyPattern(name)) if name == "blank"
        ));
        assert!(matches!(
            categorize_goroutines(&profile, &[CategorySpec::new("broken", "(")]),
            Err(AnalysisError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn presets_resolve_and_compile() {
        for info in list_presets() {
            let specs = preset(info.name).unwrap();
            assert_eq!(specs.len(), info.categories.len());
            assert!(compile_categories(&specs).is_ok(), "preset {}", info.name);
        }

        let resolved =
            resolve_categories(&[CategorySpec::new("mine", "^main\\.")], &["http".to_string()])
                .unwrap();
        assert_eq!(resolved[0].name, "mine");
        assert_eq!(resolved[1].name, "http_server");

        assert!(resolve_categories(&[], &["cobol".to_string()]).is_err());
    }

    #[test]
    fn combined_pass_matches_standalone() {
        let profile = goroutines()
            .sample(CHAN_RECV, &[1500])
            .sample(SERVE, &[20])
            .build();
        let options = GoroutineOptions {
            categories: preset("http").unwrap(),
            ..GoroutineOptions::default()
        };
        let report = analyze_goroutines(&profile, &options).unwrap();

        assert_eq!(report.total_goroutines, 1520);
        assert_eq!(report.states, classify_states(&profile));
        assert_eq!(report.leaks, find_leaks(&profile, &LeakOptions::default()));
        assert_eq!(
            report.categories,
            Some(categorize_goroutines(&profile, &options.categories).unwrap())
        );
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn combined_pass_without_categories() {
        let profile = goroutines().build();
        let report = analyze_goroutines(&profile, &GoroutineOptions::default()).unwrap();
        assert!(report.categories.is_none());
        assert_eq!(report.warnings, vec!["profile has no goroutines".to_string()]);
    }
}
