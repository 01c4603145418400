use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use protofilter_core::{Config, Report, RuleForest, SchemaSet, Severity, CONFIG_FILE_NAME};
use protofilter_descriptor::{DescriptorSet, ProtoPrinter};
use protofilter_engine::{InclusionResolver, RuleAudit, SchemaFilter};

/// protofilter - Trim protobuf schemas down to what your rules ask for
#[derive(Parser)]
#[command(name = "protofilter")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: protofilter.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Filter a descriptor set and write the kept .proto files
    Filter {
        /// Binary FileDescriptorSet to filter
        #[arg(short, long)]
        descriptor_set: Option<PathBuf>,

        /// YAML include/exclude rules
        #[arg(short, long)]
        rules: Option<PathBuf>,

        /// Output directory for the filtered .proto files
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Save a JSON report of the run
        #[arg(long)]
        report: Option<PathBuf>,

        /// Resolve and rebuild without writing any .proto file
        #[arg(long)]
        dry_run: bool,
    },

    /// Show which element paths the rules keep
    Inclusions {
        /// Binary FileDescriptorSet to inspect
        #[arg(short, long)]
        descriptor_set: Option<PathBuf>,

        /// YAML include/exclude rules
        #[arg(short, long)]
        rules: Option<PathBuf>,

        /// List every element of the schema, not only visited ones
        #[arg(short, long)]
        all: bool,
    },

    /// Print a descriptor set as .proto source, unfiltered
    Print {
        /// Binary FileDescriptorSet to print
        #[arg(short, long)]
        descriptor_set: Option<PathBuf>,

        /// Write the files here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    // Load config if specified
    let config = if let Some(config_path) = &cli.config {
        Config::from_file(config_path)?
    } else if Path::new(CONFIG_FILE_NAME).exists() {
        Config::from_file(Path::new(CONFIG_FILE_NAME))?
    } else {
        if cli.verbose {
            eprintln!("{}", "No config file found, using defaults".yellow());
        }
        Config::default()
    };

    match cli.command {
        Commands::Filter {
            descriptor_set,
            rules,
            output,
            report,
            dry_run,
        } => {
            let options = FilterOptions {
                descriptor_set: required(descriptor_set, &config, config.descriptor_set.as_deref(), "descriptor-set")?,
                rules: required(rules, &config, config.rules.as_deref(), "rules")?,
                output: output.unwrap_or_else(|| config.resolve_path(&config.output_dir)),
                report: report.or_else(|| config.report.as_deref().map(|p| config.resolve_path(p))),
                dry_run,
            };
            filter_command(&config, &options, cli.verbose)?;
        }
        Commands::Inclusions {
            descriptor_set,
            rules,
            all,
        } => {
            let descriptor_set = required(descriptor_set, &config, config.descriptor_set.as_deref(), "descriptor-set")?;
            let rules = required(rules, &config, config.rules.as_deref(), "rules")?;
            inclusions_command(&config, &descriptor_set, &rules, all, cli.verbose)?;
        }
        Commands::Print {
            descriptor_set,
            output,
        } => {
            let descriptor_set = required(descriptor_set, &config, config.descriptor_set.as_deref(), "descriptor-set")?;
            print_command(&descriptor_set, output.as_deref(), cli.verbose)?;
        }
    }

    Ok(())
}

/// Flag value, else the config value resolved against the project root
fn required(flag: Option<PathBuf>, config: &Config, configured: Option<&Path>, name: &str) -> Result<PathBuf> {
    flag.or_else(|| configured.map(|p| config.resolve_path(p)))
        .ok_or_else(|| anyhow::anyhow!("--{} is required (or set it in {})", name, CONFIG_FILE_NAME))
}

struct FilterOptions {
    descriptor_set: PathBuf,
    rules: PathBuf,
    output: PathBuf,
    report: Option<PathBuf>,
    dry_run: bool,
}

fn load_schema(path: &Path, verbose: bool) -> Result<SchemaSet> {
    if verbose {
        eprintln!("{} {}", "Loading descriptor set from:".cyan(), path.display());
    }

    let set = DescriptorSet::from_file(path)
        .map_err(|e| anyhow::anyhow!("Failed to load descriptor set: {}", e))?;
    let schema = set
        .into_schema()
        .map_err(|e| anyhow::anyhow!("Invalid descriptor set {}: {}", path.display(), e))?;

    if verbose {
        eprintln!("  {} files, {} elements", schema.files().len(), schema.len());
    }

    Ok(schema)
}

fn load_rules(config: &Config, path: &Path, verbose: bool) -> Result<RuleForest> {
    if verbose {
        eprintln!("{} {}", "Loading rules from:".cyan(), path.display());
    }

    let rules = RuleForest::from_file(path)
        .map_err(|e| anyhow::anyhow!("Failed to load rules: {}", e))?
        .with_precedence(config.precedence);

    Ok(rules)
}

/// Filter command - resolve, rebuild and write the kept files
fn filter_command(config: &Config, options: &FilterOptions, verbose: bool) -> Result<()> {
    let schema = load_schema(&options.descriptor_set, verbose)?;
    let rules = load_rules(config, &options.rules, verbose)?;

    if verbose {
        eprintln!("{}", "Resolving inclusions...".cyan());
    }

    let filter = SchemaFilter::new()
        .with_audit(RuleAudit::new().with_unmatched_warnings(config.warn_unmatched_rules));

    let metadata = serde_json::json!({
        "descriptor_set": options.descriptor_set.display().to_string(),
        "rules": options.rules.display().to_string(),
        "precedence": rules.precedence.to_string(),
        "dry_run": options.dry_run,
    });

    let (report, written) = match filter.apply(&schema, &rules) {
        Ok(result) => {
            let written = if options.dry_run {
                if verbose {
                    eprintln!("{}", "Dry run, nothing written".yellow());
                }
                Vec::new()
            } else {
                ProtoPrinter::new(&result.schema)
                    .write_to_dir(&options.output)
                    .map_err(|e| anyhow::anyhow!("Failed to write output: {}", e))?
            };
            (result.to_report().with_metadata(metadata), written)
        }
        Err(err) => {
            tracing::error!(path = %err.path(), "Filtering failed: {}", err);
            (Report::from_diagnostics(vec![err.to_diagnostic()]).with_metadata(metadata), Vec::new())
        }
    };

    if let Some(report_path) = &options.report {
        report.save_to_file(report_path)?;
        if verbose {
            eprintln!("{} {}", "Report saved to:".green(), report_path.display());
        }
    }

    print_filter_summary(&report, &written, options);

    if report.has_errors() {
        std::process::exit(1);
    }

    Ok(())
}

/// Inclusions command - list kept and dropped paths
fn inclusions_command(config: &Config, descriptor_set: &Path, rules: &Path, all: bool, verbose: bool) -> Result<()> {
    let schema = load_schema(descriptor_set, verbose)?;
    let rules = load_rules(config, rules, verbose)?;

    let inclusion = InclusionResolver::resolve(&schema, &rules).map_err(|e| anyhow::anyhow!("{}", e))?;

    let visibility: BTreeMap<String, bool> = if all {
        inclusion.complete_visibility(&schema)
    } else {
        inclusion.visibility()
    };

    for (path, included) in &visibility {
        if *included {
            println!("{}", format!("+ {}", path).green());
        } else {
            println!("{}", format!("- {}", path).red());
        }
    }

    if verbose {
        let kept = visibility.values().filter(|v| **v).count();
        eprintln!();
        eprintln!("{} of {} paths kept", kept, visibility.len());
    }

    Ok(())
}

/// Print command - render the unfiltered set as .proto source
fn print_command(descriptor_set: &Path, output: Option<&Path>, verbose: bool) -> Result<()> {
    let schema = load_schema(descriptor_set, verbose)?;
    let printer = ProtoPrinter::new(&schema);

    if let Some(dir) = output {
        let written = printer
            .write_to_dir(dir)
            .map_err(|e| anyhow::anyhow!("Failed to write output: {}", e))?;
        for path in &written {
            eprintln!("{} {}", "Wrote".green(), path.display());
        }
        return Ok(());
    }

    let files = printer.print_all();
    let many = files.len() > 1;
    for (name, text) in files {
        if many {
            println!("// ---- {} ----", name);
        }
        print!("{}", text);
        if many {
            println!();
        }
    }

    Ok(())
}

fn print_filter_summary(report: &Report, written: &[PathBuf], options: &FilterOptions) {
    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", "Schema Filter Report".bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    println!("Version: {}", report.version);
    println!("Timestamp: {}", report.timestamp);
    println!();

    println!("{}", "Summary:".bold());
    println!("  Elements visited:  {}", report.summary.elements_visited);
    println!("  Elements included: {}", report.summary.elements_included);
    println!("  Files kept:        {}", report.summary.files_kept);

    if report.summary.errors > 0 {
        println!("  Errors:   {}", format!("{}", report.summary.errors).red().bold());
    } else {
        println!("  Errors:   {}", format!("{}", report.summary.errors).green());
    }

    if report.summary.warnings > 0 {
        println!("  Warnings: {}", format!("{}", report.summary.warnings).yellow());
    } else {
        println!("  Warnings: {}", format!("{}", report.summary.warnings).green());
    }
    println!();

    if report.diagnostics.is_empty() {
        println!("{}", "✓ No issues found!".green().bold());
    } else {
        println!("{}", "Diagnostics:".bold());
        for diag in &report.diagnostics {
            let severity_str = match diag.severity {
                Severity::Error => "ERROR".red().bold(),
                Severity::Warn => "WARN".yellow().bold(),
                Severity::Info => "INFO".cyan(),
            };

            println!("  [{}] {}: {}", severity_str, diag.code, diag.message);

            if let Some(path) = &diag.path {
                println!("    at {}", path);
            }
            if let Some(exp) = &diag.expected {
                println!("    Expected: {}", exp);
            }
            if let Some(act) = &diag.actual {
                println!("    Actual:   {}", act);
            }
        }
    }

    if !written.is_empty() {
        println!();
        println!("{} {}", "Wrote to".bold(), options.output.display());
        for path in written {
            println!("  {}", path.display());
        }
    } else if options.dry_run && !report.has_errors() {
        println!();
        println!("{}", "Dry run: no files written".yellow());
    }

    println!();
}
