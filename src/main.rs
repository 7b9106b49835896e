use clap::Parser;
use std::path::PathBuf;
use tracing::{debug, error, trace};

use modwrap::scaffold::{self, Collaborators, ScaffoldRequest};

/// Bootstrap wrapper configurations for remote infrastructure modules
#[derive(Parser)]
#[command(name = "modwrap")]
#[command(about = "Scaffold a wrapper configuration for a remote module", long_about = None)]
struct Cli {
    /// Source URL of the module to wrap
    source_url: String,

    /// Template URL to render instead of the module's own template
    #[arg(short, long)]
    template: Option<String>,

    /// Directory to render the wrapper into (default: current directory)
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Set a template variable as Name=value (repeatable)
    #[arg(long = "var")]
    vars: Vec<String>,

    /// Read template variables from a YAML file (repeatable)
    #[arg(long = "var-file")]
    var_files: Vec<PathBuf>,

    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(cli.verbose >= 2)
        .init();

    debug!("Modwrap started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    let request = ScaffoldRequest {
        source_url: cli.source_url,
        template_url: cli.template,
        target_dir: cli.output,
        var_flags: cli.vars,
        var_files: cli.var_files,
    };

    if let Err(e) = scaffold::run(&request, &Collaborators::production()).await {
        error!("Fatal error: {}", e);
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
