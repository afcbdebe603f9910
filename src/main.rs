use catmin::pipeline::{self, BuildContext};
use catmin::toolchain::CommandToolchain;
use catmin::{config, output};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, fmt};

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once; main calls this a single time
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "catmin")]
#[command(about = "Declarative asset build pipeline")]
#[command(long_about = "\
Declarative asset build pipeline

Compiles interface and stylesheet sources through external tools,
concatenates and minifies them, and rewrites the build blocks in your HTML
to point at the results. The version in package.json is written into every
configured target first.

Project structure:

  project/
  ├── catmin.toml                  # Build config (optional, overrides stock defaults)
  ├── package.json                 # name + version
  └── src/
      ├── index.html               # Pages with build blocks
      ├── js/*.ts                  # typescript → tmp/compiled/interface.js
      ├── css/*.less               # less → tmp/compiled/*.css
      └── assets/                  # Copied to dist/assets

Build blocks:

  <!-- build:js app -->
  <script src=\"js/core.ts\"></script>
  <script src=\"js/ui.ts\"></script>
  <!-- endbuild -->

  becomes <script src=\"app.min.js\"></script> in dist/index.html, and one
  <script> per compiled file in tmp/dev/index.html.

Run 'catmin gen-config' to generate a documented catmin.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Project root
    #[arg(long, default_value = ".", global = true)]
    root: PathBuf,

    /// Config file (default: <root>/catmin.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override a config value, e.g. --set lint.blocking=false
    #[arg(long = "set", value_name = "KEY=VALUE", global = true)]
    set: Vec<String>,

    /// More output on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the `compile` task: every transform, in parallel
    Compile,
    /// Run the `assemble` task: concat, minify, rewrite documents
    Assemble,
    /// Run the `full` task: version → clean → lint → compile → copy → assemble
    Full,
    /// Run the `default` task
    Default,
    /// Run the `dev` task: compile and rewrite documents for development
    Dev,
    /// Run any task or single stage by name
    Run {
        /// Task or stage name
        task: String,
    },
    /// Validate config, tasks, and documents without building
    Check,
    /// Print a stock catmin.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let task = match &cli.command {
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
            return Ok(());
        }
        Command::Check => {
            println!("==> Checking {}", cli.root.display());
            let ctx = BuildContext::load(&cli.root, cli.config.as_deref(), &cli.set)?;
            let report = pipeline::check(&ctx)?;
            output::print_check(&report);
            println!("==> Project is valid");
            return Ok(());
        }
        Command::Compile => "compile",
        Command::Assemble => "assemble",
        Command::Full => "full",
        Command::Default => "default",
        Command::Dev => "dev",
        Command::Run { task } => task.as_str(),
    };

    let ctx = BuildContext::load(&cli.root, cli.config.as_deref(), &cli.set)?;
    run_task(&ctx, &cli.root, task)
}

/// Run `task`, printing events from a separate thread as they arrive.
fn run_task(ctx: &BuildContext, root: &Path, task: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (tx, rx) = std::sync::mpsc::channel();
    let root = root.to_path_buf();
    let printer = std::thread::spawn(move || {
        for event in rx {
            output::print_event(&event, &root);
        }
    });

    let result = ctx.run(task, &CommandToolchain::new(), Some(tx));
    printer.join().map_err(|_| "output thread panicked")?;
    let report = result?;
    output::print_run_report(&report);
    Ok(())
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbosity > 1)
        .without_time();

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(filter))
        .init();
}
