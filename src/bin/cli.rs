use clap::{Parser, Subcommand, ValueEnum};
use octofhir_ruleguard::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ruleguard")]
#[command(about = "Validate FHIR documents against declarative rules")]
#[command(version)]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a document with a rule set
    Validate {
        /// Path to the document (a Bundle or a single resource)
        #[arg(short, long)]
        document: PathBuf,
        /// Path to a JSON array of rule definitions
        #[arg(short, long)]
        rules: PathBuf,
        /// Value set contents used by code checks
        #[arg(short, long)]
        terminology: Option<PathBuf>,
        /// Engine configuration
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Structure model enabling the authoritative lane
        #[arg(short, long)]
        model: Option<PathBuf>,
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Review a rule set without validating anything
    Review {
        /// Path to a JSON array of rule definitions
        #[arg(short, long)]
        rules: PathBuf,
        /// Engine configuration
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let failed = match cli.command {
        Commands::Validate {
            document,
            rules,
            terminology,
            config,
            model,
            format,
        } => {
            validate_document(
                &document,
                &rules,
                terminology.as_deref(),
                config.as_deref(),
                model.as_deref(),
                format,
            )
            .await?
        }
        Commands::Review {
            rules,
            config,
            format,
        } => review_rules(&rules, config.as_deref(), format)?,
    };

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_file(path),
        None => Ok(EngineConfig::default()),
    }
}

async fn validate_document(
    document_path: &Path,
    rules_path: &Path,
    terminology_path: Option<&Path>,
    config_path: Option<&Path>,
    model_path: Option<&Path>,
    format: OutputFormat,
) -> std::result::Result<bool, Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    let rules = RuleSet::from_file(rules_path, &config)?;
    let document: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(document_path)?)?;

    let mut context = ValidationContext::new(config);
    if let Some(path) = terminology_path {
        context = context.with_terminology(TerminologySet::from_file(path)?);
    }
    if let Some(path) = model_path {
        let model = StructureModel::from_file(path)?;
        tracing::info!(types = model.type_count(), "loaded structure model");
        context = context.with_authoritative_evaluator(Arc::new(SchemaEvaluator::new(model)));
    }

    for rule_id in rules.report().blocked_rule_ids() {
        tracing::warn!(rule_id, "rule blocked by governance, skipped");
    }

    let validator = Validator::new(context);
    let diagnostics = validator
        .validate_concurrent(Arc::new(document), Arc::new(rules))
        .await?;
    let failed = diagnostics.iter().any(Diagnostic::is_error);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&diagnostics)?),
        OutputFormat::Text => {
            if diagnostics.is_empty() {
                println!("✅ No violations found");
            } else {
                println!("❌ {} diagnostic(s):\n", diagnostics.len());
                for diagnostic in &diagnostics {
                    println!(
                        "  {} [{}] entry {}: {}",
                        match diagnostic.severity {
                            Severity::Error => "ERROR",
                            Severity::Warning => "WARN",
                            Severity::Information => "INFO",
                        },
                        diagnostic.error_code,
                        diagnostic.collection_entry_index,
                        diagnostic.message
                    );
                    println!("    at: {}", diagnostic.pointer);
                    if let Some(rule_id) = &diagnostic.rule_id {
                        println!("    rule: {rule_id}");
                    }
                }
            }
        }
    }

    Ok(failed)
}

fn review_rules(
    rules_path: &Path,
    config_path: Option<&Path>,
    format: OutputFormat,
) -> std::result::Result<bool, Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    let definitions: Vec<RuleDefinition> =
        serde_json::from_str(&std::fs::read_to_string(rules_path)?)?;
    let report = review_rule_set(&definitions, &config);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            println!("Governance status: {}", report.status);
            for finding in &report.findings {
                println!("  {} [{}] {}", finding.severity, finding.code, finding.rule_id);
            }
        }
    }

    Ok(report.status == GovernanceSeverity::Blocked)
}
