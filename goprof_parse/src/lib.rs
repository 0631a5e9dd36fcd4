//! Parsed Go runtime profile model.
//!
//! This library reads profiles that have already been decoded from the
//! pprof wire format into newline-delimited JSON records, validates their
//! cross references, and provides structured access to sample types,
//! samples, locations and functions.
//!
//! # Example
//!
//! ```no_run
//! use std::fs::File;
//! use goprof_parse::Profile;
//!
//! let file = File::open("cpu.goprof").unwrap();
//! let profile = Profile::parse(file).unwrap();
//!
//! println!("Sample types: {:?}", profile.sample_type_names());
//! println!("Samples: {}", profile.samples.len());
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::time::Duration;
use thiserror::Error;

mod builder;

pub use builder::ProfileBuilder;

/// Format tag written into every header record.
pub const FORMAT: &str = "goprof";

/// Current record format version.
pub const VERSION: &str = "1.0";

/// Errors that can occur while reading a profile.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error at line {line}: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("missing header record")]
    MissingHeader,

    #[error("header must be first record, found at line {0}")]
    HeaderNotFirst(usize),

    #[error("duplicate header at line {0}")]
    DuplicateHeader(usize),

    #[error("location {location_id} references non-existent function {function_id}")]
    InvalidFunctionReference { location_id: u64, function_id: u64 },

    #[error("sample references non-existent location {0}")]
    InvalidLocationReference(u64),

    #[error("unknown record type '{0}' at line {1}")]
    UnknownRecordType(String, usize),
}

/// Result type for profile parsing operations.
pub type Result<T> = std::result::Result<T, ParseError>;

/// Errors that can occur while writing a profile.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for profile writing operations.
pub type WriteResult<T> = std::result::Result<T, WriteError>;

// ============================================================================
// Header types
// ============================================================================

/// A named, unit-tagged sample value column, e.g. `alloc_space`/`bytes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueType {
    #[serde(rename = "type")]
    pub kind: String,
    pub unit: String,
}

impl ValueType {
    pub fn new(kind: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            unit: unit.into(),
        }
    }
}

/// Profile header record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub format: String,
    pub version: String,
    pub sample_types: Vec<ValueType>,
    /// Name of the sample type viewers should show by default.
    #[serde(default)]
    pub default_sample_type: Option<String>,
    #[serde(default)]
    pub period_type: Option<ValueType>,
    #[serde(default)]
    pub period: i64,
    /// Wall-clock time the profile was collected, in nanoseconds since the epoch.
    #[serde(default)]
    pub time_nanos: i64,
    #[serde(default)]
    pub duration_nanos: i64,
    /// Free-text comments; the Go runtime version is usually recorded here.
    #[serde(default)]
    pub comments: Vec<String>,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            format: FORMAT.to_string(),
            version: VERSION.to_string(),
            sample_types: Vec::new(),
            default_sample_type: None,
            period_type: None,
            period: 0,
            time_nanos: 0,
            duration_nanos: 0,
            comments: Vec::new(),
        }
    }
}

// ============================================================================
// Dictionary types
// ============================================================================

/// Function record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub id: u64,
    /// Fully qualified name, e.g. `github.com/acme/api.(*Server).Handle`.
    pub name: String,
    #[serde(default)]
    pub system_name: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub start_line: i64,
}

/// One function attribution within a location. Inlined calls produce
/// several lines per location, innermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    pub function_id: u64,
    #[serde(default)]
    pub line: i64,
}

/// Location record: a program counter and the functions it maps to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: u64,
    #[serde(default)]
    pub address: u64,
    #[serde(default)]
    pub lines: Vec<Line>,
}

// ============================================================================
// Sample types
// ============================================================================

/// Sample record. `location_ids` are ordered leaf to root.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Sample {
    pub location_ids: Vec<u64>,
    /// One value per header sample type.
    pub values: Vec<i64>,
    #[serde(default)]
    pub labels: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub num_labels: HashMap<String, Vec<i64>>,
}

// ============================================================================
// Internal parsing types
// ============================================================================

/// Raw record used during parsing to determine type.
#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(rename = "type")]
    record_type: String,
}

#[derive(Debug, Deserialize)]
struct HeaderRecord {
    #[serde(flatten)]
    header: Header,
}

#[derive(Debug, Deserialize)]
struct FunctionRecord {
    #[serde(flatten)]
    function: Function,
}

#[derive(Debug, Deserialize)]
struct LocationRecord {
    #[serde(flatten)]
    location: Location,
}

#[derive(Debug, Deserialize)]
struct SampleRecord {
    #[serde(flatten)]
    sample: Sample,
}

fn parse_line<'a, T: Deserialize<'a>>(line: &'a str, line_num: usize) -> Result<T> {
    serde_json::from_str(line).map_err(|e| ParseError::Json {
        line: line_num,
        source: e,
    })
}

// ============================================================================
// Main Profile type
// ============================================================================

/// A parsed profile: sample type columns over a set of stack samples.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Profile {
    pub header: Header,
    /// Function dictionary, keyed by function ID.
    pub functions: HashMap<u64, Function>,
    /// Location dictionary, keyed by location ID.
    pub locations: HashMap<u64, Location>,
    pub samples: Vec<Sample>,
}

impl Profile {
    /// Parse a profile from any `Read`-able source of NDJSON records.
    pub fn parse<R: Read>(reader: R) -> Result<Self> {
        let buf_reader = BufReader::new(reader);
        let mut header: Option<Header> = None;
        let mut functions: HashMap<u64, Function> = HashMap::new();
        let mut locations: HashMap<u64, Location> = HashMap::new();
        let mut samples: Vec<Sample> = Vec::new();
        let mut seen_record = false;

        for (line_num, line_result) in buf_reader.lines().enumerate() {
            let line_num = line_num + 1;
            let line = line_result?;

            if line.trim().is_empty() {
                continue;
            }

            let raw: RawRecord = parse_line(&line, line_num)?;

            match raw.record_type.as_str() {
                "header" => {
                    if header.is_some() {
                        return Err(ParseError::DuplicateHeader(line_num));
                    }
                    if seen_record {
                        return Err(ParseError::HeaderNotFirst(line_num));
                    }
                    let record: HeaderRecord = parse_line(&line, line_num)?;
                    header = Some(record.header);
                }
                _ if header.is_none() => {
                    return Err(ParseError::HeaderNotFirst(line_num));
                }
                "function" => {
                    let record: FunctionRecord = parse_line(&line, line_num)?;
                    functions.insert(record.function.id, record.function);
                }
                "location" => {
                    let record: LocationRecord = parse_line(&line, line_num)?;
                    locations.insert(record.location.id, record.location);
                }
                "sample" => {
                    let record: SampleRecord = parse_line(&line, line_num)?;
                    samples.push(record.sample);
                }
                other => {
                    return Err(ParseError::UnknownRecordType(other.to_string(), line_num));
                }
            }
            seen_record = true;
        }

        let header = header.ok_or(ParseError::MissingHeader)?;

        let profile = Profile {
            header,
            functions,
            locations,
            samples,
        };

        profile.validate()?;

        Ok(profile)
    }

    /// Check that every location line and every sample points at a known
    /// dictionary entry. Locations without lines are allowed.
    pub fn validate(&self) -> Result<()> {
        for location in self.locations.values() {
            for line in &location.lines {
                if !self.functions.contains_key(&line.function_id) {
                    return Err(ParseError::InvalidFunctionReference {
                        location_id: location.id,
                        function_id: line.function_id,
                    });
                }
            }
        }

        for sample in &self.samples {
            for location_id in &sample.location_ids {
                if !self.locations.contains_key(location_id) {
                    return Err(ParseError::InvalidLocationReference(*location_id));
                }
            }
        }

        Ok(())
    }

    /// Sample type names in column order.
    pub fn sample_type_names(&self) -> Vec<&str> {
        self.header
            .sample_types
            .iter()
            .map(|st| st.kind.as_str())
            .collect()
    }

    pub fn resolve_location(&self, location_id: u64) -> Option<&Location> {
        self.locations.get(&location_id)
    }

    pub fn resolve_function(&self, function_id: u64) -> Option<&Function> {
        self.functions.get(&function_id)
    }

    /// Profile duration, if the collector recorded one.
    pub fn duration(&self) -> Option<Duration> {
        u64::try_from(self.header.duration_nanos)
            .ok()
            .filter(|nanos| *nanos > 0)
            .map(Duration::from_nanos)
    }

    /// Write this profile as NDJSON records.
    ///
    /// Records are written header first, then functions and locations in ID
    /// order, then samples in their original order.
    pub fn write<W: Write>(&self, writer: W) -> WriteResult<()> {
        let mut profile_writer = ProfileWriter::new(writer);
        profile_writer.write_header(&self.header)?;

        let mut functions: Vec<_> = self.functions.values().collect();
        functions.sort_by_key(|f| f.id);
        for function in functions {
            profile_writer.write_function(function)?;
        }

        let mut locations: Vec<_> = self.locations.values().collect();
        locations.sort_by_key(|l| l.id);
        for location in locations {
            profile_writer.write_location(location)?;
        }

        for sample in &self.samples {
            profile_writer.write_sample(sample)?;
        }

        Ok(())
    }
}

// ============================================================================
// Writer types
// ============================================================================

#[derive(Serialize)]
struct TypedRecord<'a, T: Serialize> {
    #[serde(rename = "type")]
    record_type: &'a str,
    #[serde(flatten)]
    data: &'a T,
}

/// Writer for emitting profile records incrementally.
pub struct ProfileWriter<W: Write> {
    writer: W,
}

impl<W: Write> ProfileWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write a header record. This must be called first.
    pub fn write_header(&mut self, header: &Header) -> WriteResult<()> {
        self.write_record("header", header)
    }

    pub fn write_function(&mut self, function: &Function) -> WriteResult<()> {
        self.write_record("function", function)
    }

    pub fn write_location(&mut self, location: &Location) -> WriteResult<()> {
        self.write_record("location", location)
    }

    pub fn write_sample(&mut self, sample: &Sample) -> WriteResult<()> {
        self.write_record("sample", sample)
    }

    fn write_record<T: Serialize>(&mut self, record_type: &str, data: &T) -> WriteResult<()> {
        let typed = TypedRecord { record_type, data };
        let json = serde_json::to_string(&typed)?;
        writeln!(self.writer, "{}", json)?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn heap_header() -> String {
        r#"{"type":"header","format":"goprof","version":"1.0","sample_types":[{"type":"alloc_objects","unit":"count"},{"type":"alloc_space","unit":"bytes"},{"type":"inuse_objects","unit":"count"},{"type":"inuse_space","unit":"bytes"}],"default_sample_type":"inuse_space","comments":["go1.22.4"]}"#.to_string()
    }

    #[test]
    fn parse_minimal_header() {
        let profile = Profile::parse(Cursor::new(heap_header())).unwrap();

        assert_eq!(profile.header.format, "goprof");
        assert_eq!(
            profile.sample_type_names(),
            vec!["alloc_objects", "alloc_space", "inuse_objects", "inuse_space"]
        );
        assert_eq!(
            profile.header.default_sample_type.as_deref(),
            Some("inuse_space")
        );
        assert_eq!(profile.header.comments, vec!["go1.22.4"]);
        assert!(profile.samples.is_empty());
    }

    #[test]
    fn parse_function_location_and_sample() {
        let data = format!(
            "{}\n{}\n{}\n{}",
            heap_header(),
            r#"{"type":"function","id":1,"name":"main.alloc","filename":"/src/main.go"}"#,
            r#"{"type":"location","id":10,"address":4096,"lines":[{"function_id":1,"line":42}]}"#,
            r#"{"type":"sample","location_ids":[10],"values":[1,512,1,512],"labels":{"bytes":["512"]}}"#
        );
        let profile = Profile::parse(Cursor::new(data)).unwrap();

        assert_eq!(profile.functions[&1].name, "main.alloc");
        assert_eq!(profile.locations[&10].lines[0].line, 42);
        assert_eq!(profile.samples.len(), 1);
        assert_eq!(profile.samples[0].values, vec![1, 512, 1, 512]);
        assert_eq!(profile.samples[0].labels["bytes"], vec!["512"]);
    }

    #[test]
    fn missing_header_fails() {
        let result = Profile::parse(Cursor::new(""));
        assert!(matches!(result, Err(ParseError::MissingHeader)));
    }

    #[test]
    fn non_header_first_fails() {
        let data = r#"{"type":"function","id":1,"name":"main.main"}"#;
        let result = Profile::parse(Cursor::new(data));
        assert!(matches!(result, Err(ParseError::HeaderNotFirst(1))));
    }

    #[test]
    fn header_after_blank_lines_is_accepted() {
        let data = format!("\n\n{}\n", heap_header());
        assert!(Profile::parse(Cursor::new(data)).is_ok());
    }

    #[test]
    fn duplicate_header_fails() {
        let data = format!("{}\n{}", heap_header(), heap_header());
        let result = Profile::parse(Cursor::new(data));
        assert!(matches!(result, Err(ParseError::DuplicateHeader(2))));
    }

    #[test]
    fn invalid_function_reference_fails() {
        let data = format!(
            "{}\n{}",
            heap_header(),
            r#"{"type":"location","id":10,"lines":[{"function_id":99}]}"#
        );
        let result = Profile::parse(Cursor::new(data));
        assert!(matches!(
            result,
            Err(ParseError::InvalidFunctionReference {
                location_id: 10,
                function_id: 99
            })
        ));
    }

    #[test]
    fn invalid_location_reference_fails() {
        let data = format!(
            "{}\n{}",
            heap_header(),
            r#"{"type":"sample","location_ids":[7],"values":[1,1,1,1]}"#
        );
        let result = Profile::parse(Cursor::new(data));
        assert!(matches!(
            result,
            Err(ParseError::InvalidLocationReference(7))
        ));
    }

    #[test]
    fn location_without_lines_is_legal() {
        let data = format!(
            "{}\n{}\n{}",
            heap_header(),
            r#"{"type":"location","id":10,"address":4096}"#,
            r#"{"type":"sample","location_ids":[10],"values":[1]}"#
        );
        let profile = Profile::parse(Cursor::new(data)).unwrap();
        assert!(profile.locations[&10].lines.is_empty());
        // Value count mismatches are left for the analyzers to degrade on.
        assert_eq!(profile.samples[0].values, vec![1]);
    }

    #[test]
    fn unknown_record_type_fails() {
        let data = format!("{}\n{}", heap_header(), r#"{"type":"mapping","id":1}"#);
        let result = Profile::parse(Cursor::new(data));
        assert!(matches!(
            result,
            Err(ParseError::UnknownRecordType(t, 2)) if t == "mapping"
        ));
    }

    #[test]
    fn duration_ignores_non_positive_values() {
        let mut profile = Profile::default();
        assert_eq!(profile.duration(), None);
        profile.header.duration_nanos = -5;
        assert_eq!(profile.duration(), None);
        profile.header.duration_nanos = 30_000_000_000;
        assert_eq!(profile.duration(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn written_profile_parses_back() {
        let profile = ProfileBuilder::new()
            .sample_types(&[("samples", "count"), ("cpu", "nanoseconds")])
            .sample(&["runtime.memmove", "main.copyAll", "main.main"], &[3, 30])
            .sample(&["main.main"], &[1, 10])
            .build();

        let mut output = Vec::new();
        profile.write(&mut output).unwrap();

        let text = String::from_utf8(output.clone()).unwrap();
        assert!(text.lines().next().unwrap().contains("\"type\":\"header\""));

        let reread = Profile::parse(Cursor::new(output)).unwrap();
        assert_eq!(reread, profile);
    }
}
