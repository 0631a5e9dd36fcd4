//! Run goprof detectors over profiles and print structured reports.
//!
//! Reports go to stdout (or `-o`) as pretty JSON, or NDJSON with `--ndjson`.
//! Logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! goprof_analyze overhead cpu.ndjson
//! goprof_analyze offheap --heap heap.ndjson --cpu cpu.ndjson --rss 3221225472
//! goprof_analyze goroutines goroutine.ndjson --preset http --preset database
//! goprof_analyze --ndjson alloc-paths heap.ndjson --app-prefix github.com/acme/
//! goprof_analyze correlate --cpu cpu.ndjson --heap heap.ndjson --mutex mutex.ndjson
//! ```

use clap::{Parser, Subcommand};
use goprof::alloc_paths::analyze_alloc_paths;
use goprof::config::AnalysisConfig;
use goprof::contention::{analyze_contention, lock_primitives};
use goprof::correlate::{CorrelationInput, correlate};
use goprof::goroutine::{CategorySpec, analyze_goroutines, list_presets, resolve_categories};
use goprof::input::load_profile;
use goprof::offheap::{OffHeapInput, analyze_offheap};
use goprof::overhead::{default_sample_index, detect_overhead};
use goprof::primitives::find_sample_index;
use goprof::report::{KindReport, Report, write_json, write_ndjson};
use goprof_parse::Profile;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "goprof_analyze")]
#[command(about = "Analyze Go runtime profiles for performance findings")]
#[command(version)]
struct Args {
    /// Config file with thresholds and extra patterns
    #[arg(long, default_value = "goprof.toml", global = true)]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Output file (defaults to stdout)
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Write NDJSON records instead of one JSON document
    #[arg(long, global = true)]
    ndjson: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Infrastructure overhead in a CPU profile
    Overhead {
        profile: PathBuf,

        /// Sample type to attribute (defaults to cpu, then samples)
        #[arg(long)]
        sample_type: Option<String>,

        /// Smallest category share to report
        #[arg(long)]
        min_percentage: Option<f64>,
    },

    /// Memory living outside the Go heap
    Offheap {
        #[arg(long)]
        heap: PathBuf,

        #[arg(long)]
        cpu: Option<PathBuf>,

        #[arg(long)]
        goroutine: Option<PathBuf>,

        /// Resident set size measured outside the process, in bytes
        #[arg(long)]
        rss: Option<i64>,

        /// Import path found by a source scan (repeatable)
        #[arg(long = "code-hit")]
        code_hits: Vec<String>,
    },

    /// Lock contention in a mutex or block profile
    Contention {
        profile: PathBuf,

        #[arg(long)]
        top_waiters: Option<usize>,
    },

    /// Goroutine states, leaks and categories
    Goroutines {
        profile: PathBuf,

        /// Group size at which a stack is a high-severity leak candidate
        #[arg(long)]
        leak_threshold: Option<i64>,

        /// Category preset (repeatable)
        #[arg(long = "preset")]
        presets: Vec<String>,

        /// Category as NAME=REGEX (repeatable)
        #[arg(long = "category", value_parser = parse_category)]
        categories: Vec<CategorySpec>,
    },

    /// Allocation hotspots in application code
    AllocPaths {
        profile: PathBuf,

        /// Function prefix or path fragment of application code (repeatable)
        #[arg(long = "app-prefix")]
        app_prefixes: Vec<String>,

        /// Group by first application frame instead of allocation site
        #[arg(long)]
        group_by_source: bool,

        #[arg(long)]
        min_percentage: Option<f64>,

        #[arg(long)]
        max_paths: Option<usize>,
    },

    /// Functions hot across CPU, heap and mutex profiles
    Correlate {
        #[arg(long)]
        cpu: Option<PathBuf>,

        #[arg(long)]
        heap: Option<PathBuf>,

        #[arg(long)]
        mutex: Option<PathBuf>,

        /// Functions taken from each profile
        #[arg(short = 'n', long)]
        node_count: Option<usize>,
    },

    /// Detect a profile's kind and summarize it
    Kind { profile: PathBuf },

    /// List goroutine category presets
    Presets,
}

fn parse_category(s: &str) -> Result<CategorySpec, String> {
    match s.split_once('=') {
        Some((name, pattern)) if !name.is_empty() => Ok(CategorySpec::new(name, pattern)),
        _ => Err(format!("expected NAME=REGEX, got '{}'", s)),
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "warn,goprof=debug",
        _ => "warn,goprof=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

struct Output {
    path: Option<PathBuf>,
    ndjson: bool,
}

impl Output {
    fn writer(&self) -> Result<Box<dyn Write>, Box<dyn std::error::Error>> {
        Ok(match &self.path {
            Some(path) => Box::new(BufWriter::new(File::create(path)?)),
            None => Box::new(std::io::stdout().lock()),
        })
    }

    fn emit<R: Report>(&self, report: &R) -> Result<(), Box<dyn std::error::Error>> {
        let mut writer = self.writer()?;
        if self.ndjson {
            write_ndjson(report, &mut writer)?;
        } else {
            write_json(report, &mut writer)?;
        }
        writer.flush()?;
        for warning in report.warnings() {
            tracing::warn!("{}", warning);
        }
        if let Some(path) = &self.path {
            eprintln!("Wrote {} report to {}", R::NAME, path.display());
        }
        Ok(())
    }
}

fn load(path: &Path) -> Result<Profile, Box<dyn std::error::Error>> {
    load_profile(path).map_err(|e| format!("{}: {}", path.display(), e).into())
}

fn load_optional(path: Option<&Path>) -> Result<Option<Profile>, Box<dyn std::error::Error>> {
    path.map(load).transpose()
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = AnalysisConfig::load_optional(&args.config);
    let out = Output {
        path: args.output,
        ndjson: args.ndjson,
    };

    match args.command {
        Command::Overhead {
            profile,
            sample_type,
            min_percentage,
        } => {
            let profile = load(&profile)?;
            let index = match &sample_type {
                Some(name) => find_sample_index(&profile, &[name.as_str()]),
                None => default_sample_index(&profile),
            };
            let mut options = config.overhead_options();
            if let Some(pct) = min_percentage {
                options.min_percentage = pct;
            }
            out.emit(&detect_overhead(
                &profile,
                index,
                &config.overhead_table(),
                &options,
            ))
        }

        Command::Offheap {
            heap,
            cpu,
            goroutine,
            rss,
            code_hits,
        } => {
            let heap = load(&heap)?;
            let cpu = load_optional(cpu.as_deref())?;
            let goroutine = load_optional(goroutine.as_deref())?;
            let (mut input, warnings) =
                OffHeapInput::from_profiles(&heap, cpu.as_ref(), goroutine.as_ref());
            input.rss_bytes = rss;
            input.code_hits = code_hits;

            let mut report = analyze_offheap(&input, &config.offheap_table());
            let mut all = warnings;
            all.append(&mut report.warnings);
            report.warnings = all;
            out.emit(&report)
        }

        Command::Contention {
            profile,
            top_waiters,
        } => {
            let profile = load(&profile)?;
            let mut options = config.contention_options();
            if let Some(n) = top_waiters {
                options.top_waiters = n;
            }
            out.emit(&analyze_contention(&profile, &lock_primitives(), &options))
        }

        Command::Goroutines {
            profile,
            leak_threshold,
            presets,
            categories,
        } => {
            let profile = load(&profile)?;
            let mut options = config.goroutine_options()?;
            if let Some(threshold) = leak_threshold {
                options.leaks.threshold = threshold;
            }
            options
                .categories
                .extend(resolve_categories(&categories, &presets)?);
            out.emit(&analyze_goroutines(&profile, &options)?)
        }

        Command::AllocPaths {
            profile,
            app_prefixes,
            group_by_source,
            min_percentage,
            max_paths,
        } => {
            let profile = load(&profile)?;
            let mut options = config.alloc_options();
            if !app_prefixes.is_empty() {
                options.app_prefixes = app_prefixes;
            }
            options.group_by_source = group_by_source;
            if let Some(pct) = min_percentage {
                options.min_percentage = pct;
            }
            if let Some(n) = max_paths {
                options.max_paths = n;
            }
            out.emit(&analyze_alloc_paths(&profile, &options))
        }

        Command::Correlate {
            cpu,
            heap,
            mutex,
            node_count,
        } => {
            let cpu = load_optional(cpu.as_deref())?;
            let heap = load_optional(heap.as_deref())?;
            let mutex = load_optional(mutex.as_deref())?;
            let input = CorrelationInput {
                cpu: cpu.as_ref(),
                heap: heap.as_ref(),
                mutex: mutex.as_ref(),
            };
            let report = correlate(&input, node_count.unwrap_or(config.node_count))?;
            out.emit(&report)
        }

        Command::Kind { profile } => {
            let profile = load(&profile)?;
            out.emit(&KindReport::from_profile(&profile))
        }

        Command::Presets => {
            let mut writer = out.writer()?;
            let presets = list_presets();
            if out.ndjson {
                for preset in &presets {
                    let record = serde_json::json!({
                        "type": "preset",
                        "name": preset.name,
                        "description": preset.description,
                        "categories": preset.categories
                    });
                    writeln!(writer, "{}", serde_json::to_string(&record)?)?;
                }
            } else {
                serde_json::to_writer_pretty(&mut writer, &presets)?;
                writeln!(writer)?;
            }
            writer.flush()?;
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
