use std::error::Error;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use javagen::config::GenConfig;
use javagen::error::ConfigError;
use javagen::llm::backend::{create_chain, ProviderKind};
use javagen::llm::health::{probe_all, HealthRegistry};
use javagen::llm::orchestrator::{Orchestrator, Selection};
use javagen::logger;
use javagen::project::scan_project_excluding;

#[derive(Parser)]
#[command(
    name = "javagen",
    version,
    about = "Generate JUnit / MockK / Kotest unit tests for Java and Kotlin sources with an LLM."
)]
struct Cli {
    #[arg(long, global = true, help = "Config file (default: <config dir>/javagen/config.toml)")]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Primary provider: azure | google | ollama")]
    provider: Option<String>,

    #[arg(long, global = true, help = "Fallback provider: azure | google | ollama")]
    fallback: Option<String>,

    #[arg(short, long, global = true, default_value_t = false, help = "Debug logging")]
    verbose: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Generate tests for a project directory
    Generate(GenerateArgs),
    /// Probe every configured provider once
    Health,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    #[arg(help = "Project root to scan for .java / .kt sources")]
    project_dir: PathBuf,

    #[arg(short, long, help = "Output root for generated tests (default: <project>/generated-tests)")]
    output: Option<PathBuf>,

    #[arg(long, help = "Only this source file", conflicts_with_all = ["package", "include"])]
    file: Option<PathBuf>,

    #[arg(long, help = "Only this package and its subpackages", conflicts_with = "include")]
    package: Option<String>,

    #[arg(long, help = "Only sources matching these glob patterns")]
    include: Vec<String>,

    #[arg(long, help = "Worker threads")]
    workers: Option<usize>,

    #[arg(long, help = "Keep existing tests; cover only untested methods in the next numbered test class")]
    incremental: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    logger::init(cli.verbose);

    let config = load_config(&cli)?;

    match cli.command {
        CliCommand::Generate(args) => generate(config, args),
        CliCommand::Health => health(&config),
    }
}

fn generate(mut config: GenConfig, args: GenerateArgs) -> Result<(), Box<dyn Error>> {
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if args.incremental {
        config.incremental = true;
    }
    config.validate()?;

    let selection = if let Some(file) = args.file {
        Selection::File(file)
    } else if let Some(pkg) = args.package {
        Selection::Package(pkg)
    } else if !args.include.is_empty() {
        Selection::patterns(&args.include)?
    } else {
        Selection::All
    };

    let output = args
        .output
        .unwrap_or_else(|| args.project_dir.join("generated-tests"));

    let files = scan_project_excluding(&args.project_dir, Some(output.as_path()));
    let orchestrator = Orchestrator::from_config(config, &output)?;
    let report = orchestrator.run(&files, &selection)?;

    println!(
        "accepted: {}  rejected: {}  report: {}",
        report.accepted.len(),
        report.rejected.len(),
        output.join(javagen::testgen::REPORT_FILE).display()
    );
    for a in &report.accepted {
        println!("  + {} -> {}", a.file.display(), a.output.display());
    }
    for r in &report.rejected {
        println!("  - {} [{:?}] {}", r.file.display(), r.stage, r.reason);
    }
    Ok(())
}

fn health(config: &GenConfig) -> Result<(), Box<dyn Error>> {
    let chain = create_chain(config)?;
    let registry = HealthRegistry::new(chain.iter().map(|b| b.id()));

    for h in probe_all(&chain, &registry) {
        println!("{:<8} {:?}", h.provider_id, h.status);
    }
    Ok(())
}

/* ============================================================
   Configuration
   ============================================================ */

fn load_config(cli: &Cli) -> Result<GenConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => GenConfig::load(path)?,
        None => GenConfig::load_default()?,
    };

    overlay_env(&mut config)?;

    if let Some(p) = &cli.provider {
        config.provider = parse_provider(p)?;
    }
    if let Some(p) = &cli.fallback {
        config.fallback_provider = Some(parse_provider(p)?);
    }
    Ok(config)
}

/// Credentials and endpoints come from the environment when set.
fn overlay_env(config: &mut GenConfig) -> Result<(), ConfigError> {
    if let Some(p) = env("LLM_PROVIDER") {
        config.provider = parse_provider(&p)?;
    }

    let azure = &mut config.azure;
    set(&mut azure.endpoint, "AZURE_OPENAI_ENDPOINT");
    set(&mut azure.deployment, "AZURE_OPENAI_DEPLOYMENT");
    set(&mut azure.api_key, "AZURE_OPENAI_API_KEY");
    set(&mut azure.api_key, "OPENAI_API_KEY_DEV");
    if let Some(v) = env("AZURE_OPENAI_API_VERSION") {
        azure.api_version = v;
    }

    set(&mut config.google.api_key, "GOOGLE_API_KEY");
    if let Some(v) = env("GOOGLE_MODEL") {
        config.google.model = v;
    }

    if let Some(v) = env("OLLAMA_HOST") {
        config.ollama.host = v;
    }
    if let Some(v) = env("OLLAMA_MODEL") {
        config.ollama.model = v;
    }

    if let Some(v) = env("INCREMENTAL_TEST_GENERATION") {
        config.incremental = matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "on" | "enabled"
        );
    }
    Ok(())
}

fn parse_provider(raw: &str) -> Result<ProviderKind, ConfigError> {
    ProviderKind::parse(raw)
        .ok_or_else(|| ConfigError::Invalid(format!("unknown provider '{raw}'")))
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn set(slot: &mut Option<String>, key: &str) {
    if let Some(v) = env(key) {
        *slot = Some(v);
    }
}
