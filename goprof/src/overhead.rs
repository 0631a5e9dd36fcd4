//! Infrastructure overhead detection.
//!
//! Attributes profile mass to named infrastructure categories (tracing,
//! logging, metrics, RPC, serialization, HTTP, context propagation, GC) by
//! walking each stack leaf to root and crediting the whole sample to the
//! first category whose pattern matches. A sample is credited to at most one
//! category, so category shares never add up to more than 100%.

use crate::findings::{ProfileKind, Severity, percentage};
use crate::patterns::{PatternCategory, PatternTable};
use crate::primitives::{
    find_sample_index, kind_mismatch_warning, runtime_version, sample_unit, sample_value,
    stack_frames,
};
use goprof_parse::Profile;
use serde::Serialize;
use std::collections::HashMap;

/// Categories below this share of the profile are not reported.
pub const DEFAULT_MIN_PERCENTAGE: f64 = 1.0;

/// A category needs at least this share before a suggestion is attached.
/// Independent of the `high` severity threshold.
pub const SUGGESTION_MIN_PERCENTAGE: f64 = 10.0;

/// Contributing functions listed per category.
pub const DEFAULT_TOP_FUNCTIONS: usize = 3;

/// Built-in category table, in match priority order.
pub fn default_categories() -> PatternTable {
    PatternTable::new(vec![
        PatternCategory::new(
            "tracing",
            "Distributed tracing instrumentation",
            &[
                "go.opentelemetry.io/otel",
                "github.com/opentracing/",
                "github.com/uber/jaeger-client-go",
                "gopkg.in/DataDog/dd-trace-go",
                "github.com/DataDog/dd-trace-go",
                "github.com/openzipkin/zipkin-go",
            ],
        ),
        PatternCategory::new(
            "logging",
            "Log formatting and output",
            &[
                "go.uber.org/zap",
                "github.com/sirupsen/logrus",
                "github.com/rs/zerolog",
                "log/slog.",
                "log.(*Logger)",
                "github.com/go-kit/log",
            ],
        ),
        PatternCategory::new(
            "metrics",
            "Metrics collection and export",
            &[
                "github.com/prometheus/client_golang",
                "github.com/rcrowley/go-metrics",
                "github.com/DataDog/datadog-go",
                "go.opencensus.io/stats",
                "go.opentelemetry.io/otel/metric",
            ],
        ),
        PatternCategory::new(
            "rpc_framework",
            "RPC framework machinery",
            &[
                "google.golang.org/grpc",
                "github.com/twitchtv/twirp",
                "github.com/apache/thrift",
                "connectrpc.com/connect",
            ],
        ),
        PatternCategory::new(
            "serialization",
            "Encoding and decoding of messages",
            &[
                "encoding/json.",
                "encoding/xml.",
                "encoding/gob.",
                "google.golang.org/protobuf",
                "github.com/golang/protobuf",
                "github.com/gogo/protobuf",
                "github.com/json-iterator/go",
                "github.com/vmihailenco/msgpack",
            ],
        ),
        PatternCategory::new(
            "http",
            "HTTP server and client stack",
            &[
                "net/http.",
                "github.com/valyala/fasthttp",
                "github.com/gin-gonic/gin",
                "github.com/labstack/echo",
                "golang.org/x/net/http2",
            ],
        ),
        PatternCategory::new(
            "context",
            "Context propagation",
            &[
                "context.(*cancelCtx)",
                "context.(*valueCtx)",
                "context.(*timerCtx)",
                "context.WithValue",
                "context.WithCancel",
                "context.WithTimeout",
                "context.WithDeadline",
            ],
        ),
        PatternCategory::new(
            "gc",
            "Garbage collector work",
            &[
                "runtime.gcBgMarkWorker",
                "runtime.gcDrain",
                "runtime.scanobject",
                "runtime.markroot",
                "runtime.gcAssistAlloc",
                "runtime.bgsweep",
                "runtime.bgscavenge",
                "runtime.gcMarkTermination",
            ],
        ),
    ])
}

/// Remediation hint for a category, or `None` below the suggestion floor.
pub fn suggestion_for(category: &str, percentage: f64) -> Option<String> {
    if percentage < SUGGESTION_MIN_PERCENTAGE {
        return None;
    }
    let hint = match category {
        "tracing" => "sample traces at the SDK, keep spans out of tight loops, and batch exports",
        "logging" => {
            "lower log levels on hot paths and avoid formatting arguments for disabled levels"
        }
        "metrics" => "cache metric handles instead of resolving labels per call and drop high-cardinality labels",
        "rpc_framework" => "reuse connections and streams and check interceptor chains for per-call work",
        "serialization" => "use generated or streaming codecs on hot paths and reuse encode buffers",
        "http" => "enable keep-alives and connection pooling and reuse request buffers",
        "context" => "look context values up once per request instead of walking deep WithValue chains",
        "gc" => "reduce allocation rate on hot paths or tune GOGC / GOMEMLIMIT",
        _ => "review calls into this category on hot paths",
    };
    let priority = match Severity::from_percentage(percentage) {
        Severity::High => "high priority",
        Severity::Medium => "worth a look",
        Severity::Low => "minor",
    };
    Some(format!(
        "{} uses {:.1}% ({}): {}",
        category, percentage, priority, hint
    ))
}

/// Tuning knobs for [`detect_overhead`].
#[derive(Debug, Clone)]
pub struct OverheadOptions {
    pub min_percentage: f64,
    pub top_functions: usize,
}

impl Default for OverheadOptions {
    fn default() -> Self {
        Self {
            min_percentage: DEFAULT_MIN_PERCENTAGE,
            top_functions: DEFAULT_TOP_FUNCTIONS,
        }
    }
}

/// A function's contribution to a category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionShare {
    pub function: String,
    pub value: i64,
    pub percentage: f64,
}

/// One detected category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryMatch {
    pub category: String,
    pub description: String,
    pub matched_value: i64,
    pub percentage: f64,
    pub severity: Severity,
    pub top_functions: Vec<FunctionShare>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl CategoryMatch {
    /// Severity and suggestion are derived here from the percentage and
    /// nowhere else.
    fn new(
        category: &PatternCategory,
        matched_value: i64,
        percentage: f64,
        top_functions: Vec<FunctionShare>,
    ) -> Self {
        Self {
            category: category.name.clone(),
            description: category.description.clone(),
            matched_value,
            percentage,
            severity: Severity::from_percentage(percentage),
            top_functions,
            suggestion: suggestion_for(&category.name, percentage),
        }
    }
}

/// Overhead detection result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverheadReport {
    pub sample_type: String,
    pub unit: String,
    pub total_value: i64,
    pub attributed_value: i64,
    pub attributed_percentage: f64,
    pub detections: Vec<CategoryMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_version: Option<String>,
    pub warnings: Vec<String>,
}

#[derive(Default)]
struct CategoryTotals {
    value: i64,
    by_function: HashMap<String, i64>,
}

/// The value column a CPU overhead scan should use.
pub fn default_sample_index(profile: &Profile) -> usize {
    find_sample_index(profile, &["cpu", "samples"])
}

/// Attribute sample mass at `index` to the categories of `table`.
pub fn detect_overhead(
    profile: &Profile,
    index: usize,
    table: &PatternTable,
    options: &OverheadOptions,
) -> OverheadReport {
    let mut warnings = Vec::new();
    if let Some(w) = kind_mismatch_warning(profile, ProfileKind::Cpu) {
        warnings.push(w);
    }
    if index >= profile.header.sample_types.len() && !profile.header.sample_types.is_empty() {
        warnings.push(format!(
            "sample index {} out of range ({} sample types); reading the first value",
            index,
            profile.header.sample_types.len()
        ));
    }

    let mut total: i64 = 0;
    let mut totals: Vec<CategoryTotals> = (0..table.len())
        .map(|_| CategoryTotals::default())
        .collect();

    for sample in &profile.samples {
        let value = sample_value(sample, index, 0);
        if value <= 0 {
            continue;
        }
        total += value;

        let frames = stack_frames(profile, sample);
        if let Some(hit) = table.first_frame_match(&frames) {
            let entry = &mut totals[hit.category];
            entry.value += value;
            *entry
                .by_function
                .entry(frames[hit.frame].to_string())
                .or_insert(0) += value;
        }
    }

    let sample_type = profile
        .header
        .sample_types
        .get(index)
        .map(|st| st.kind.clone())
        .unwrap_or_default();
    let unit = sample_unit(profile, index).to_string();

    if total == 0 {
        warnings.push("profile has no sample value to attribute; returning an empty report".into());
        return OverheadReport {
            sample_type,
            unit,
            total_value: 0,
            attributed_value: 0,
            attributed_percentage: 0.0,
            detections: Vec::new(),
            runtime_version: runtime_version(profile),
            warnings,
        };
    }

    let mut detections = Vec::new();
    let mut attributed = 0;
    for (idx, entry) in totals.into_iter().enumerate() {
        attributed += entry.value;
        let pct = percentage(entry.value, total);
        if entry.value == 0 || pct < options.min_percentage {
            continue;
        }
        let Some(category) = table.get(idx) else {
            continue;
        };

        let mut functions: Vec<(String, i64)> = entry.by_function.into_iter().collect();
        functions.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let top_functions = functions
            .into_iter()
            .take(options.top_functions)
            .map(|(function, value)| FunctionShare {
                function,
                value,
                percentage: percentage(value, total),
            })
            .collect();

        detections.push(CategoryMatch::new(category, entry.value, pct, top_functions));
    }

    detections.sort_by(|a, b| {
        b.matched_value
            .cmp(&a.matched_value)
            .then_with(|| a.category.cmp(&b.category))
    });

    tracing::debug!(
        total,
        attributed,
        categories = detections.len(),
        "overhead attribution complete"
    );

    OverheadReport {
        sample_type,
        unit,
        total_value: total,
        attributed_value: attributed,
        attributed_percentage: percentage(attributed, total),
        detections,
        runtime_version: runtime_version(profile),
        warnings,
    }
}
