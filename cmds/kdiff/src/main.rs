use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use kdiff::{
	commands::{
		self,
		util::{BrokenPipeGuard, UsageError},
	},
	telemetry,
};
use tracing::Level;

#[cfg(all(
	target_os = "linux",
	feature = "mimalloc",
	not(feature = "system-alloc")
))]
#[global_allocator]
static GLOBAL: mimallocator::Mimalloc = mimallocator::Mimalloc;

#[derive(Parser)]
#[command(name = "kdiff")]
#[command(about = "Compare Kubernetes objects with a live cluster", long_about = None)]
#[command(version = env!("KDIFF_VERSION"))]
struct Cli {
	/// Log level (error, warn, info, debug, trace), overrides RUST_LOG
	#[arg(long, global = true)]
	log_level: Option<Level>,

	/// List unchanged objects and raise the log level, may be repeated
	#[arg(short, long, global = true, action = ArgAction::Count)]
	verbose: u8,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Differences between the configuration and the cluster
	Diff(commands::diff::DiffArgs),
}

fn main() -> ExitCode {
	let cli = Cli::parse();

	let _telemetry = match telemetry::init(cli.log_level, cli.verbose) {
		Ok(guard) => guard,
		Err(e) => {
			eprintln!("Error: initializing telemetry: {e:#}");
			return ExitCode::FAILURE;
		}
	};

	let stdout = BrokenPipeGuard::new(std::io::stdout());

	let result = match cli.command {
		Commands::Diff(args) => commands::diff::run(args, cli.verbose, stdout),
	};

	match result {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			eprintln!("Error: {e:#}");
			if e.downcast_ref::<UsageError>().is_some() {
				ExitCode::from(2)
			} else {
				ExitCode::FAILURE
			}
		}
	}
}
