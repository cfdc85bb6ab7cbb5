// Report-phase entry point.

use clap::Parser;
use std::process::exit;

use jitterscope::analyze::{run_report, ReportOptions};
use jitterscope::cli::ReportArgs;
use jitterscope::config::ReportConfig;
use jitterscope::report::latest_capture_dir;
use jitterscope::telemetry;

fn main() {
    let args = ReportArgs::parse();
    telemetry::init_tracing(args.verbose);
    let cfg = ReportConfig::from(&args);

    let dir = match (&cfg.dir, &cfg.latest_root) {
        (Some(dir), _) => dir.clone(),
        (None, Some(root)) => match latest_capture_dir(root) {
            Ok(dir) => dir,
            Err(e) => {
                eprintln!("[report:startup] {e}");
                exit(1);
            }
        },
        (None, None) => {
            eprintln!("[report:startup] pass --dir <DIR> or --latest");
            exit(1);
        }
    };

    let opts = ReportOptions {
        dir,
        mode: cfg.mode,
        noise_policy: cfg.noise_policy,
        buffers: cfg.buffers,
        no_valid_policy: cfg.no_valid_policy,
    };

    match run_report(&opts) {
        Ok(outcome) => {
            let top = outcome
                .top_cause
                .map(|(cause, score)| format!("{cause} ({score:.2})"))
                .unwrap_or_else(|| "none".to_string());
            eprintln!(
                "analyzed {}: {} window(s), valid session: {}{}; top cause: {}; report: {}",
                outcome.dir.display(),
                outcome.window_count,
                outcome.has_valid_session,
                if outcome.degraded { " (degraded)" } else { "" },
                top,
                outcome.paths.report_md.display()
            );
            exit(0);
        }
        Err(e) => {
            eprintln!("[report:fatal] {e}");
            exit(1);
        }
    }
}
