use goprof_parse::Profile;
use std::env;
use std::fs::File;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    if args.len() != 2 {
        eprintln!("Usage: {} <profile.goprof>", args[0]);
        return ExitCode::from(2);
    }

    let path = &args[1];

    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening '{}': {}", path, e);
            return ExitCode::FAILURE;
        }
    };

    match Profile::parse(file) {
        Ok(profile) => {
            println!("Valid profile: {}", path);
            println!("  Format version: {}", profile.header.version);
            println!("  Sample types: {}", profile.sample_type_names().join(", "));
            if let Some(default) = &profile.header.default_sample_type {
                println!("  Default sample type: {}", default);
            }
            println!("  Functions: {}", profile.functions.len());
            println!("  Locations: {}", profile.locations.len());
            println!("  Samples: {}", profile.samples.len());
            if let Some(duration) = profile.duration() {
                println!("  Duration: {:.1}s", duration.as_secs_f64());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Invalid profile '{}': {}", path, e);
            ExitCode::FAILURE
        }
    }
}
