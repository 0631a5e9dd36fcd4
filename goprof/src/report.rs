//! Report emission as pretty JSON or NDJSON records.
//!
//! The NDJSON form is a header record, then one record per finding, then one
//! record per warning. Every record carries a `"type"` tag.

use crate::alloc_paths::AllocationReport;
use crate::contention::ContentionReport;
use crate::correlate::CorrelationReport;
use crate::error::Result;
use crate::findings::ProfileKind;
use crate::goroutine::GoroutineReport;
use crate::offheap::OffHeapReport;
use crate::overhead::OverheadReport;
use crate::primitives::{detect_profile_kind, runtime_version};
use goprof_parse::Profile;
use serde::Serialize;
use serde_json::{Value, json};
use std::io::Write;

pub const REPORT_FORMAT: &str = "goprof-report";
pub const REPORT_VERSION: &str = "1.0";

/// A detector result that can be written as records.
pub trait Report: Serialize {
    /// Value of the header's `report` field.
    const NAME: &'static str;

    /// Summary fields copied into the header record.
    fn summary(&self) -> Value;

    /// `(record type, payload)` for each finding, in report order.
    fn findings(&self) -> serde_json::Result<Vec<(&'static str, Value)>>;

    fn warnings(&self) -> &[String];
}

fn tagged(kind: &str, mut value: Value) -> Value {
    if let Value::Object(map) = &mut value {
        map.insert("type".to_string(), Value::String(kind.to_string()));
    }
    value
}

fn records<T: Serialize>(kind: &'static str, items: &[T]) -> serde_json::Result<Vec<(&'static str, Value)>> {
    items
        .iter()
        .map(|item| Ok((kind, serde_json::to_value(item)?)))
        .collect()
}

/// Write the whole report as one pretty-printed JSON document.
pub fn write_json<R: Report, W: Write>(report: &R, mut writer: W) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, report)?;
    writeln!(writer)?;
    Ok(())
}

pub fn write_ndjson<R: Report, W: Write>(report: &R, mut writer: W) -> Result<()> {
    let mut header = json!({
        "type": "header",
        "format": REPORT_FORMAT,
        "version": REPORT_VERSION,
        "report": R::NAME,
    });
    if let (Value::Object(header), Value::Object(summary)) = (&mut header, report.summary()) {
        for (key, value) in summary {
            header.entry(key).or_insert(value);
        }
    }
    writeln!(writer, "{}", serde_json::to_string(&header)?)?;

    for (kind, value) in report.findings()? {
        writeln!(writer, "{}", serde_json::to_string(&tagged(kind, value))?)?;
    }

    for message in report.warnings() {
        let record = json!({
            "type": "warning",
            "message": message
        });
        writeln!(writer, "{}", serde_json::to_string(&record)?)?;
    }

    Ok(())
}

impl Report for OverheadReport {
    const NAME: &'static str = "overhead";

    fn summary(&self) -> Value {
        json!({
            "sample_type": self.sample_type,
            "unit": self.unit,
            "total_value": self.total_value,
            "attributed_percentage": self.attributed_percentage,
            "runtime_version": self.runtime_version,
        })
    }

    fn findings(&self) -> serde_json::Result<Vec<(&'static str, Value)>> {
        records("detection", &self.detections)
    }

    fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

impl Report for OffHeapReport {
    const NAME: &'static str = "offheap";

    fn summary(&self) -> Value {
        json!({
            "heap_inuse_bytes": self.heap_inuse_bytes,
            "heap_alloc_bytes": self.heap_alloc_bytes,
            "high_churn": self.high_churn,
            "goroutine_count": self.goroutine_count,
            "rss_bytes": self.rss_bytes,
        })
    }

    fn findings(&self) -> serde_json::Result<Vec<(&'static str, Value)>> {
        records("suspicion", &self.suspicions)
    }

    fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

impl Report for ContentionReport {
    const NAME: &'static str = "contention";

    fn summary(&self) -> Value {
        json!({
            "total_contentions": self.total_contentions,
            "total_delay": self.total_delay,
            "delay_unit": self.delay_unit,
            "site_count": self.site_count,
        })
    }

    fn findings(&self) -> serde_json::Result<Vec<(&'static str, Value)>> {
        let mut out = records("lock_site", &self.sites)?;
        out.extend(records("pattern", &self.patterns)?);
        Ok(out)
    }

    fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

impl Report for GoroutineReport {
    const NAME: &'static str = "goroutines";

    fn summary(&self) -> Value {
        json!({
            "total_goroutines": self.total_goroutines,
            "runtime_version": self.runtime_version,
            "states": self.states.states,
        })
    }

    fn findings(&self) -> serde_json::Result<Vec<(&'static str, Value)>> {
        let mut out = records("wait_reason", &self.states.top_wait_reasons)?;
        out.extend(records("leak", &self.leaks)?);
        if let Some(categories) = &self.categories {
            out.extend(records("category", &categories.categories)?);
            out.extend(records("uncategorized", &categories.top_uncategorized)?);
        }
        Ok(out)
    }

    fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

impl Report for AllocationReport {
    const NAME: &'static str = "alloc_paths";

    fn summary(&self) -> Value {
        json!({
            "sample_type": self.sample_type,
            "unit": self.unit,
            "total_bytes": self.total_bytes,
            "application_bytes": self.application_bytes,
            "duration_seconds": self.duration_seconds,
            "grouped_by": self.grouped_by,
        })
    }

    fn findings(&self) -> serde_json::Result<Vec<(&'static str, Value)>> {
        records("path", &self.paths)
    }

    fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

impl Report for CorrelationReport {
    const NAME: &'static str = "correlation";

    fn summary(&self) -> Value {
        json!({ "profiles": self.profiles })
    }

    fn findings(&self) -> serde_json::Result<Vec<(&'static str, Value)>> {
        let mut out = records("correlation", &self.correlations)?;
        out.extend(records("cpu_only", &self.cpu_only)?);
        out.extend(records("heap_only", &self.heap_only)?);
        out.extend(records("mutex_only", &self.mutex_only)?);
        Ok(out)
    }

    fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

/// What a profile looks like before running any detector on it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KindReport {
    pub kind: ProfileKind,
    pub sample_types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_sample_type: Option<String>,
    pub samples: usize,
    pub functions: usize,
    pub locations: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_version: Option<String>,
    pub warnings: Vec<String>,
}

impl KindReport {
    pub fn from_profile(profile: &Profile) -> Self {
        let kind = detect_profile_kind(profile);
        let mut warnings = Vec::new();
        if kind == ProfileKind::Unknown {
            warnings.push(format!(
                "sample types [{}] do not match any known profile kind",
                profile.sample_type_names().join(", ")
            ));
        }
        Self {
            kind,
            sample_types: profile
                .header
                .sample_types
                .iter()
                .map(|st| format!("{}/{}", st.kind, st.unit))
                .collect(),
            default_sample_type: profile.header.default_sample_type.clone(),
            samples: profile.samples.len(),
            functions: profile.functions.len(),
            locations: profile.locations.len(),
            duration_seconds: profile.duration().map(|d| d.as_secs_f64()),
            runtime_version: runtime_version(profile),
            warnings,
        }
    }
}

impl Report for KindReport {
    const NAME: &'static str = "kind";

    fn summary(&self) -> Value {
        json!({
            "kind": self.kind,
            "sample_types": self.sample_types,
            "samples": self.samples,
            "runtime_version": self.runtime_version,
        })
    }

    fn findings(&self) -> serde_json::Result<Vec<(&'static str, Value)>> {
        Ok(Vec::new())
    }

    fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overhead::{OverheadOptions, default_categories, default_sample_index, detect_overhead};
    use goprof_parse::ProfileBuilder;

    fn cpu() -> Profile {
        ProfileBuilder::new()
            .sample_types(&[("samples", "count"), ("cpu", "nanoseconds")])
            .sample(&["go.uber.org/zap.(*Logger).Info", "main.handle"], &[1, 600])
            .sample(&["main.compute", "main.handle"], &[1, 400])
            .build()
    }

    fn lines(bytes: &[u8]) -> Vec<Value> {
        std::str::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn ndjson_header_findings_then_warnings() {
        let profile = cpu();
        let mut report = detect_overhead(
            &profile,
            default_sample_index(&profile),
            &default_categories(),
            &OverheadOptions::default(),
        );
        report.warnings.push("example warning".to_string());

        let mut out = Vec::new();
        write_ndjson(&report, &mut out).unwrap();
        let records = lines(&out);

        assert_eq!(records.len(), 3);
        assert_eq!(records[0]["type"], "header");
        assert_eq!(records[0]["report"], "overhead");
        assert_eq!(records[0]["total_value"], 1000);
        assert_eq!(records[1]["type"], "detection");
        assert_eq!(records[1]["category"], "logging");
        assert_eq!(records[2]["type"], "warning");
        assert_eq!(records[2]["message"], "example warning");
    }

    #[test]
    fn header_fields_are_not_overwritten_by_summary() {
        let profile = cpu();
        let report = KindReport::from_profile(&profile);
        let mut out = Vec::new();
        write_ndjson(&report, &mut out).unwrap();
        let records = lines(&out);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["type"], "header");
        assert_eq!(records[0]["kind"], "cpu");
        assert_eq!(records[0]["format"], REPORT_FORMAT);
    }

    #[test]
    fn pretty_json_is_one_document() {
        let report = KindReport::from_profile(&ProfileBuilder::new().build());
        let mut out = Vec::new();
        write_json(&report, &mut out).unwrap();

        let value: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["kind"], "unknown");
        assert_eq!(value["warnings"].as_array().map(Vec::len), Some(1));
    }
}
