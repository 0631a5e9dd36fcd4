//! Off-heap memory suspicion analysis.
//!
//! Go heap profiles only see memory the Go allocator hands out. Native
//! allocators behind cgo, embedded databases, native compression codecs and
//! memory-mapped files all live outside that accounting. This module cross
//! references heap totals, goroutine counts and library evidence found in
//! heap and CPU stacks to grade how likely such memory is.
//!
//! The thresholds below are tunable heuristics, not invariants.

use crate::findings::{Confidence, ProfileKind, Severity};
use crate::patterns::{PatternCategory, PatternTable};
use crate::primitives::{
    kind_mismatch_warning, sample_type_index, sample_value, stack_frames, total_value,
};
use goprof_parse::Profile;
use serde::Serialize;
use std::collections::BTreeSet;

pub const MIB: i64 = 1024 * 1024;

/// Allocated total above which allocation churn is considered high.
pub const HIGH_CHURN_ALLOC_BYTES: i64 = 1024 * MIB;

/// In-use total below which allocation churn is considered high.
pub const HIGH_CHURN_INUSE_BYTES: i64 = 500 * MIB;

/// Smallest possible goroutine stack. Used as a floor, never as a measurement.
pub const GOROUTINE_STACK_FLOOR_BYTES: u64 = 2 * 1024;

/// Goroutine counts above these are flagged `medium` / `high`.
pub const GOROUTINE_MEDIUM_COUNT: u64 = 1_000;
pub const GOROUTINE_HIGH_COUNT: u64 = 10_000;

/// RSS exceeding heap in-use by more than this is flagged.
pub const RSS_GAP_BYTES: i64 = 500 * MIB;

/// RSS gaps above this are `high` rather than `medium`.
pub const RSS_GAP_HIGH_BYTES: i64 = 1024 * MIB;

/// Library signatures that allocate outside the Go heap.
pub fn default_signatures() -> PatternTable {
    PatternTable::new(vec![
        PatternCategory::new(
            "cgo_allocator",
            "Native allocations made through cgo",
            &[
                "_Cfunc_malloc",
                "_Cfunc_calloc",
                "_Cfunc_realloc",
                "C.malloc",
                "C.calloc",
                "jemalloc",
                "je_malloc",
                "tcmalloc",
            ],
        ),
        PatternCategory::new(
            "embedded_database",
            "Embedded database engine with native caches",
            &[
                "github.com/tecbot/gorocksdb",
                "github.com/linxGnu/grocksdb",
                "github.com/mattn/go-sqlite3",
                "github.com/cockroachdb/pebble/internal/manual",
                "github.com/dgraph-io/ristretto/z",
                "github.com/dgraph-io/badger",
                "rocksdb_",
            ],
        ),
        PatternCategory::new(
            "compression",
            "Native compression codec",
            &[
                "github.com/DataDog/zstd",
                "github.com/valyala/gozstd",
                "github.com/google/brotli/go/cbrotli",
                "github.com/cloudflare/golz4",
                "ZSTD_",
                "LZ4_",
            ],
        ),
        PatternCategory::new(
            "mmap",
            "Memory-mapped files and regions",
            &[
                "syscall.Mmap",
                "golang.org/x/sys/unix.Mmap",
                "golang.org/x/exp/mmap",
                "github.com/edsrzf/mmap-go",
            ],
        ),
    ])
}

fn recommendations_for(category: &str) -> Vec<String> {
    let items: &[&str] = match category {
        "cgo_allocator" => &[
            "Audit C.malloc / C.free pairing on every cgo path, including error returns",
            "Export native allocator statistics next to Go heap metrics",
        ],
        "embedded_database" => &[
            "Cap the engine's block cache and memtable sizes explicitly",
            "Close iterators, snapshots and batches promptly; they pin native memory",
        ],
        "compression" => &[
            "Reuse encoder/decoder contexts instead of creating one per message",
            "Make sure native codec contexts are closed when done",
        ],
        "mmap" => &[
            "Unmap regions that are no longer needed",
            "Budget mapped file sizes into container memory limits",
        ],
        _ => &["Inspect native code paths for allocations that bypass the Go heap"],
    };
    items.iter().map(|s| (*s).to_string()).collect()
}

/// Inputs to [`analyze_offheap`]. Everything except the heap totals is
/// optional; absent inputs turn into warnings.
#[derive(Debug, Clone, Default)]
pub struct OffHeapInput {
    pub heap_inuse_bytes: i64,
    pub heap_alloc_bytes: i64,
    pub goroutine_count: Option<u64>,
    /// Text to screen from the heap and allocation views, e.g. function names.
    pub heap_evidence: String,
    /// Text to screen from a CPU profile, when one is available.
    pub cpu_evidence: Option<String>,
    /// Resident set size measured outside the process, e.g. by the container runtime.
    pub rss_bytes: Option<i64>,
    /// Import paths or symbols found by a source scan.
    pub code_hits: Vec<String>,
}

/// Unique function names of a profile, sorted, one per line.
pub fn evidence_corpus(profile: &Profile) -> String {
    let mut names: BTreeSet<&str> = BTreeSet::new();
    for sample in &profile.samples {
        if sample.values.iter().all(|v| *v == 0) {
            continue;
        }
        names.extend(stack_frames(profile, sample));
    }
    names.into_iter().collect::<Vec<_>>().join("\n")
}

impl OffHeapInput {
    /// Derive totals and evidence from parsed profiles.
    pub fn from_profiles(
        heap: &Profile,
        cpu: Option<&Profile>,
        goroutine: Option<&Profile>,
    ) -> (Self, Vec<String>) {
        let mut warnings = Vec::new();
        if let Some(w) = kind_mismatch_warning(heap, ProfileKind::Heap) {
            warnings.push(w);
        }

        let mut column_total = |name: &str| match sample_type_index(heap, name) {
            Some(idx) => total_value(heap, idx),
            None => {
                warnings.push(format!("heap profile has no '{}' sample type; using 0", name));
                0
            }
        };
        let heap_inuse_bytes = column_total("inuse_space");
        let heap_alloc_bytes = column_total("alloc_space");

        let goroutine_count = goroutine.map(|g| {
            g.samples
                .iter()
                .map(|s| sample_value(s, 0, 1).max(0) as u64)
                .sum()
        });

        let input = Self {
            heap_inuse_bytes,
            heap_alloc_bytes,
            goroutine_count,
            heap_evidence: evidence_corpus(heap),
            cpu_evidence: cpu.map(evidence_corpus),
            rss_bytes: None,
            code_hits: Vec::new(),
        };
        (input, warnings)
    }
}

/// High churn: lots allocated, little retained.
pub fn is_high_churn(alloc_bytes: i64, inuse_bytes: i64) -> bool {
    alloc_bytes > HIGH_CHURN_ALLOC_BYTES && inuse_bytes < HIGH_CHURN_INUSE_BYTES
}

/// Graded outcome of one evidence combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assessment {
    pub confidence: Confidence,
    pub severity: Severity,
    /// The finding would firm up with a CPU profile.
    pub wants_cpu_profile: bool,
}

/// The evidence-combination table, first satisfied row wins.
///
/// `cpu_hit` is `None` when no CPU corpus was supplied and `Some(false)`
/// when one was supplied without a match.
pub fn assess(heap_hit: bool, cpu_hit: Option<bool>, high_churn: bool) -> Option<Assessment> {
    let graded = |confidence, severity, wants_cpu_profile| {
        Some(Assessment {
            confidence,
            severity,
            wants_cpu_profile,
        })
    };
    match (heap_hit, cpu_hit, high_churn) {
        (true, Some(true), true) => graded(Confidence::Confirmed, Severity::High, false),
        (_, Some(true), _) => graded(Confidence::Likely, Severity::High, false),
        (true, None, true) => graded(Confidence::Likely, Severity::High, true),
        (true, Some(false), true) => graded(Confidence::Suspected, Severity::Medium, false),
        (true, None, false) => graded(Confidence::Possible, Severity::Low, true),
        (true, Some(false), false) => graded(Confidence::Possible, Severity::Low, false),
        (false, _, _) => None,
    }
}

/// An inferred off-heap memory problem.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suspicion {
    pub category: String,
    pub description: String,
    pub severity: Severity,
    pub confidence: Confidence,
    pub evidence: Vec<String>,
    pub recommendations: Vec<String>,
}

impl Suspicion {
    /// Raise confidence on corroborating evidence. Never lowers it.
    pub fn corroborate(&mut self, confidence: Confidence, evidence: String) {
        self.confidence.upgrade_to(confidence);
        self.evidence.push(evidence);
    }
}

/// Off-heap analysis result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OffHeapReport {
    pub heap_inuse_bytes: i64,
    pub heap_alloc_bytes: i64,
    pub high_churn: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goroutine_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rss_bytes: Option<i64>,
    pub suspicions: Vec<Suspicion>,
    pub warnings: Vec<String>,
}

fn first_hit<'a>(category: &PatternCategory, corpus: &'a str) -> Option<&'a str> {
    corpus.lines().find(|line| category.matches(line))
}

fn mib(bytes: i64) -> f64 {
    bytes as f64 / MIB as f64
}

/// Grade off-heap suspicions from `input` against `signatures`.
pub fn analyze_offheap(input: &OffHeapInput, signatures: &PatternTable) -> OffHeapReport {
    let mut warnings = Vec::new();
    let mut suspicions = Vec::new();
    let high_churn = is_high_churn(input.heap_alloc_bytes, input.heap_inuse_bytes);

    if input.heap_alloc_bytes == 0 && input.heap_inuse_bytes == 0 {
        warnings.push("heap totals are zero; churn cannot be assessed".to_string());
    }
    if input.cpu_evidence.is_none() {
        warnings.push(
            "no CPU profile supplied; native library evidence cannot be corroborated".to_string(),
        );
    }

    for category in signatures.categories() {
        let heap_hit = first_hit(category, &input.heap_evidence);
        let cpu_hit = input
            .cpu_evidence
            .as_deref()
            .map(|corpus| first_hit(category, corpus));
        let code_hit = input.code_hits.iter().find(|hit| category.matches(hit));

        let assessment = assess(
            heap_hit.is_some(),
            cpu_hit.map(|hit| hit.is_some()),
            high_churn,
        );

        let mut suspicion = match assessment {
            Some(assessment) => {
                let mut evidence = Vec::new();
                if let Some(frame) = heap_hit {
                    evidence.push(format!("heap profile references {}", frame));
                }
                if let Some(Some(frame)) = cpu_hit {
                    evidence.push(format!("CPU profile references {}", frame));
                }
                if high_churn {
                    evidence.push(format!(
                        "high churn: {:.0} MiB allocated vs {:.0} MiB in use",
                        mib(input.heap_alloc_bytes),
                        mib(input.heap_inuse_bytes)
                    ));
                }
                let mut recommendations = recommendations_for(&category.name);
                if assessment.wants_cpu_profile {
                    recommendations
                        .push("Capture a CPU profile to confirm native library activity".into());
                }
                Suspicion {
                    category: category.name.clone(),
                    description: format!(
                        "{} may hold memory outside the Go heap",
                        category.description
                    ),
                    severity: assessment.severity,
                    confidence: assessment.confidence,
                    evidence,
                    recommendations,
                }
            }
            None => match code_hit {
                Some(_) => Suspicion {
                    category: category.name.clone(),
                    description: format!(
                        "{} is used by the code but absent from the profiles",
                        category.description
                    ),
                    severity: Severity::Low,
                    confidence: Confidence::Possible,
                    evidence: Vec::new(),
                    recommendations: recommendations_for(&category.name),
                },
                None => continue,
            },
        };

        if let Some(hit) = code_hit {
            let target = suspicion.confidence.next().min(Confidence::Likely);
            suspicion.corroborate(target, format!("source scan found {}", hit));
        }

        suspicions.push(suspicion);
    }

    match input.goroutine_count {
        Some(count) if count > GOROUTINE_MEDIUM_COUNT => {
            let floor = count * GOROUTINE_STACK_FLOOR_BYTES;
            let severity = if count > GOROUTINE_HIGH_COUNT {
                Severity::High
            } else {
                Severity::Medium
            };
            suspicions.push(Suspicion {
                category: "goroutine_stacks".to_string(),
                description: format!(
                    "{} goroutines hold at least {:.1} MiB of stack memory \
                     (lower bound at 2 KiB each, not a measurement)",
                    count,
                    floor as f64 / MIB as f64
                ),
                severity,
                confidence: Confidence::Likely,
                evidence: vec![format!("goroutine count {}", count)],
                recommendations: vec![
                    "Check for goroutine leaks with a goroutine profile".to_string(),
                    "Bound worker pools instead of spawning a goroutine per item".to_string(),
                ],
            });
        }
        Some(_) => {}
        None => warnings
            .push("goroutine count not supplied; goroutine stack check skipped".to_string()),
    }

    match input.rss_bytes {
        Some(rss) => {
            let gap = rss - input.heap_inuse_bytes;
            if gap > RSS_GAP_BYTES {
                let severity = if gap > RSS_GAP_HIGH_BYTES {
                    Severity::High
                } else {
                    Severity::Medium
                };
                suspicions.push(Suspicion {
                    category: "rss_heap_mismatch".to_string(),
                    description: format!(
                        "RSS exceeds Go heap in-use by {:.0} MiB",
                        mib(gap)
                    ),
                    severity,
                    confidence: Confidence::Confirmed,
                    evidence: vec![format!(
                        "RSS {:.0} MiB vs heap in-use {:.0} MiB",
                        mib(rss),
                        mib(input.heap_inuse_bytes)
                    )],
                    recommendations: vec![
                        "Compare runtime/metrics totals with RSS to split Go runtime overhead from native memory".to_string(),
                        "Set GOMEMLIMIT below the container limit to leave room for native memory".to_string(),
                    ],
                });
            }
        }
        None => warnings
            .push("container RSS not supplied; RSS-vs-heap comparison skipped".to_string()),
    }

    suspicions.sort_by(|a, b| {
        b.confidence
            .cmp(&a.confidence)
            .then_with(|| b.severity.cmp(&a.severity))
            .then_with(|| a.category.cmp(&b.category))
    });

    tracing::debug!(
        suspicions = suspicions.len(),
        high_churn,
        "off-heap analysis complete"
    );

    OffHeapReport {
        heap_inuse_bytes: input.heap_inuse_bytes,
        heap_alloc_bytes: input.heap_alloc_bytes,
        high_churn,
        goroutine_count: input.goroutine_count,
        rss_bytes: input.rss_bytes,
        suspicions,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use goprof_parse::ProfileBuilder;

    fn input(alloc_mib: i64, inuse_mib: i64) -> OffHeapInput {
        OffHeapInput {
            heap_alloc_bytes: alloc_mib * MIB,
            heap_inuse_bytes: inuse_mib * MIB,
            ..OffHeapInput::default()
        }
    }

    #[test]
    fn assessment_table() {
        let a = |h, c, ch| assess(h, c, ch).map(|a| (a.confidence, a.severity));

        assert_eq!(
            a(true, Some(true), true),
            Some((Confidence::Confirmed, Severity::High))
        );
        assert_eq!(
            a(false, Some(true), false),
            Some((Confidence::Likely, Severity::High))
        );
        assert_eq!(
            a(true, Some(true), false),
            Some((Confidence::Likely, Severity::High))
        );
        assert_eq!(a(true, None, true), Some((Confidence::Likely, Severity::High)));
        assert_eq!(
            a(true, Some(false), true),
            Some((Confidence::Suspected, Severity::Medium))
        );
        assert_eq!(a(true, None, false), Some((Confidence::Possible, Severity::Low)));
        assert_eq!(a(false, None, true), None);
        assert_eq!(a(false, Some(false), true), None);
    }

    #[test]
    fn churn_thresholds_are_strict() {
        assert!(is_high_churn(1025 * MIB, 499 * MIB));
        assert!(!is_high_churn(1024 * MIB, 100 * MIB));
        assert!(!is_high_churn(2048 * MIB, 500 * MIB));
    }

    #[test]
    fn heap_only_evidence_without_churn_is_possible() {
        let mut input = input(100, 50);
        input.heap_evidence = "github.com/DataDog/zstd.Compress\nmain.main".into();
        let report = analyze_offheap(&input, &default_signatures());

        assert_eq!(report.suspicions.len(), 1);
        let s = &report.suspicions[0];
        assert_eq!(s.category, "compression");
        assert_eq!(s.confidence, Confidence::Possible);
        assert_eq!(s.severity, Severity::Low);
        assert!(s.recommendations.iter().any(|r| r.contains("CPU profile")));
    }

    #[test]
    fn churn_without_cpu_profile_is_likely_with_note() {
        let mut input = input(4096, 64);
        input.heap_evidence = "github.com/linxGnu/grocksdb.(*DB).Get".into();
        let report = analyze_offheap(&input, &default_signatures());

        let s = &report.suspicions[0];
        assert_eq!(s.category, "embedded_database");
        assert_eq!(s.confidence, Confidence::Likely);
        assert!(s.recommendations.iter().any(|r| r.contains("CPU profile")));
        assert!(report.warnings.iter().any(|w| w.contains("no CPU profile")));
    }

    #[test]
    fn code_hit_upgrades_one_tier_capped_at_likely() {
        let mut low = input(100, 50);
        low.heap_evidence = "github.com/mattn/go-sqlite3._Cfunc_sqlite3_step".into();
        low.code_hits = vec!["github.com/mattn/go-sqlite3".into()];
        let report = analyze_offheap(&low, &default_signatures());
        let s = report
            .suspicions
            .iter()
            .find(|s| s.category == "embedded_database")
            .unwrap();
        assert_eq!(s.confidence, Confidence::Suspected);

        let mut likely = input(4096, 64);
        likely.heap_evidence = "github.com/mattn/go-sqlite3._Cfunc_sqlite3_step".into();
        likely.code_hits = vec!["github.com/mattn/go-sqlite3".into()];
        let report = analyze_offheap(&likely, &default_signatures());
        let s = report
            .suspicions
            .iter()
            .find(|s| s.category == "embedded_database")
            .unwrap();
        assert_eq!(s.confidence, Confidence::Likely);
    }

    #[test]
    fn plain_cgo_calls_are_not_allocator_evidence() {
        let mut input = input(100, 50);
        input.cpu_evidence = Some(
            "runtime.cgocall\nnet._C2func_getaddrinfo\nruntime/cgo.crosscall2\nos/user.lookupUser"
                .into(),
        );
        let report = analyze_offheap(&input, &default_signatures());
        assert!(report.suspicions.iter().all(|s| s.category != "cgo_allocator"));

        input.cpu_evidence = Some("main._Cfunc_malloc\nruntime.cgocall".into());
        let report = analyze_offheap(&input, &default_signatures());
        assert!(report.suspicions.iter().any(|s| s.category == "cgo_allocator"));
    }

    #[test]
    fn goroutine_stack_floor() {
        let mut medium = input(10, 10);
        medium.goroutine_count = Some(5_000);
        let report = analyze_offheap(&medium, &default_signatures());
        let s = &report.suspicions[0];
        assert_eq!(s.category, "goroutine_stacks");
        assert_eq!(s.severity, Severity::Medium);
        assert!(s.description.contains("lower bound"));

        let mut high = input(10, 10);
        high.goroutine_count = Some(20_000);
        let report = analyze_offheap(&high, &default_signatures());
        assert_eq!(report.suspicions[0].severity, Severity::High);

        let mut quiet = input(10, 10);
        quiet.goroutine_count = Some(1_000);
        assert!(analyze_offheap(&quiet, &default_signatures()).suspicions.is_empty());
    }

    #[test]
    fn rss_gap_is_confirmed() {
        let mut input = input(10, 200);
        input.rss_bytes = Some(1000 * MIB);
        let report = analyze_offheap(&input, &default_signatures());
        let s = &report.suspicions[0];
        assert_eq!(s.category, "rss_heap_mismatch");
        assert_eq!(s.confidence, Confidence::Confirmed);
        assert_eq!(s.severity, Severity::Medium);
    }

    #[test]
    fn missing_optional_inputs_only_warn() {
        let report = analyze_offheap(&input(10, 10), &default_signatures());
        assert!(report.suspicions.is_empty());
        assert!(report.warnings.iter().any(|w| w.contains("RSS")));
        assert!(report.warnings.iter().any(|w| w.contains("goroutine count")));
    }

    #[test]
    fn from_profiles_collects_totals_and_corpora() {
        let heap = ProfileBuilder::new()
            .sample_types(&[
                ("alloc_objects", "count"),
                ("alloc_space", "bytes"),
                ("inuse_objects", "count"),
                ("inuse_space", "bytes"),
            ])
            .sample(&["runtime.mallocgc", "main.load"], &[1, 300, 1, 100])
            .sample(&["runtime.cgocall", "main.native"], &[1, 200, 0, 0])
            .build();
        let goroutines = ProfileBuilder::new()
            .sample_types(&[("goroutine", "count")])
            .sample(&["runtime.gopark", "main.worker"], &[40])
            .sample(&["runtime.gopark", "main.main"], &[2])
            .build();

        let (input, warnings) = OffHeapInput::from_profiles(&heap, None, Some(&goroutines));
        assert!(warnings.is_empty());
        assert_eq!(input.heap_alloc_bytes, 500);
        assert_eq!(input.heap_inuse_bytes, 100);
        assert_eq!(input.goroutine_count, Some(42));
        assert!(input.heap_evidence.contains("runtime.cgocall"));
        assert!(input.cpu_evidence.is_none());
    }
}
