//! In-memory profile construction.

use crate::{Function, Header, Line, Location, Profile, Sample, ValueType};
use std::collections::HashMap;
use std::time::Duration;

/// Builds a [`Profile`] from frame names, interning functions and locations
/// so identical frames share dictionary entries.
///
/// Frames are given leaf first, the same order samples store them in.
///
/// ```
/// use goprof_parse::ProfileBuilder;
///
/// let profile = ProfileBuilder::new()
///     .sample_types(&[("samples", "count"), ("cpu", "nanoseconds")])
///     .sample(&["runtime.mallocgc", "main.handle", "main.main"], &[1, 10_000_000])
///     .build();
///
/// assert_eq!(profile.samples.len(), 1);
/// assert_eq!(profile.functions.len(), 3);
/// ```
#[derive(Debug, Default)]
pub struct ProfileBuilder {
    header: Header,
    function_ids: HashMap<(String, String), u64>,
    location_ids: HashMap<(u64, i64), u64>,
    functions: HashMap<u64, Function>,
    locations: HashMap<u64, Location>,
    samples: Vec<Sample>,
}

impl ProfileBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_types(mut self, types: &[(&str, &str)]) -> Self {
        self.header.sample_types = types
            .iter()
            .map(|(kind, unit)| ValueType::new(*kind, *unit))
            .collect();
        self
    }

    pub fn default_sample_type(mut self, name: &str) -> Self {
        self.header.default_sample_type = Some(name.to_string());
        self
    }

    pub fn period(mut self, period_type: (&str, &str), period: i64) -> Self {
        self.header.period_type = Some(ValueType::new(period_type.0, period_type.1));
        self.header.period = period;
        self
    }

    pub fn duration(mut self, duration: Duration) -> Self {
        self.header.duration_nanos = i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX);
        self
    }

    pub fn comment(mut self, comment: &str) -> Self {
        self.header.comments.push(comment.to_string());
        self
    }

    /// Add a sample whose frames carry only function names.
    pub fn sample(self, frames: &[&str], values: &[i64]) -> Self {
        self.sample_with_labels(frames, values, &[])
    }

    /// Add a sample with string labels attached.
    pub fn sample_with_labels(
        mut self,
        frames: &[&str],
        values: &[i64],
        labels: &[(&str, &str)],
    ) -> Self {
        let location_ids = frames
            .iter()
            .map(|name| self.intern_location(name, "", 0))
            .collect();
        self.push_sample(location_ids, values, labels);
        self
    }

    /// Add a sample whose frames carry `(function, file, line)`.
    pub fn sample_with_lines(mut self, frames: &[(&str, &str, i64)], values: &[i64]) -> Self {
        let location_ids = frames
            .iter()
            .map(|(name, file, line)| self.intern_location(name, file, *line))
            .collect();
        self.push_sample(location_ids, values, &[]);
        self
    }

    /// Add a sample that references a location with no function attached,
    /// as produced by a stripped binary.
    pub fn unresolved_sample(mut self, frames: &[&str], values: &[i64]) -> Self {
        let mut location_ids: Vec<u64> = Vec::with_capacity(frames.len() + 1);
        let id = self.locations.len() as u64 + 1;
        self.locations.insert(
            id,
            Location {
                id,
                address: 0xdead_0000 + id,
                lines: Vec::new(),
            },
        );
        location_ids.push(id);
        for name in frames {
            location_ids.push(self.intern_location(name, "", 0));
        }
        self.push_sample(location_ids, values, &[]);
        self
    }

    pub fn build(self) -> Profile {
        Profile {
            header: self.header,
            functions: self.functions,
            locations: self.locations,
            samples: self.samples,
        }
    }

    fn push_sample(&mut self, location_ids: Vec<u64>, values: &[i64], labels: &[(&str, &str)]) {
        let mut sample = Sample {
            location_ids,
            values: values.to_vec(),
            ..Sample::default()
        };
        for (key, value) in labels {
            sample
                .labels
                .entry((*key).to_string())
                .or_default()
                .push((*value).to_string());
        }
        self.samples.push(sample);
    }

    fn intern_function(&mut self, name: &str, file: &str) -> u64 {
        let key = (name.to_string(), file.to_string());
        if let Some(id) = self.function_ids.get(&key) {
            return *id;
        }
        let id = self.functions.len() as u64 + 1;
        self.functions.insert(
            id,
            Function {
                id,
                name: name.to_string(),
                system_name: name.to_string(),
                filename: file.to_string(),
                start_line: 0,
            },
        );
        self.function_ids.insert(key, id);
        id
    }

    fn intern_location(&mut self, name: &str, file: &str, line: i64) -> u64 {
        let function_id = self.intern_function(name, file);
        if let Some(id) = self.location_ids.get(&(function_id, line)) {
            return *id;
        }
        let id = self.locations.len() as u64 + 1;
        self.locations.insert(
            id,
            Location {
                id,
                address: 0x1000 * id,
                lines: vec![Line { function_id, line }],
            },
        );
        self.location_ids.insert((function_id, line), id);
        id
    }
}
