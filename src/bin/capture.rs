// Capture-phase entry point.

use clap::Parser;
use std::process::exit;

use jitterscope::cli::CaptureArgs;
use jitterscope::config::CaptureConfig;
use jitterscope::telemetry;

fn main() {
    let args = CaptureArgs::parse();
    telemetry::init_tracing(args.verbose);

    let cfg = match CaptureConfig::from_args(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("[capture:startup] {e}");
            exit(1);
        }
    };

    match jitterscope::run_capture(&cfg) {
        Ok(code) => exit(code),
        Err(e) => {
            eprintln!("[capture:fatal] {e}");
            exit(1);
        }
    }
}
