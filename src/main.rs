//! structura CLI: inspect capability catalogs and run resolutions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use structura::catalog::Catalog;
use structura::config::RegistryConfig;
use structura::error::StructuraError;
use structura::registry::Registry;
use structura::samples;
use structura::subject::SubjectType;
use structura::value::Value;

#[derive(Parser)]
#[command(name = "structura", version, about = "Capability registry for algebraic hierarchies")]
struct Cli {
    /// Catalog to load instead of the bundled standard hierarchy.
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Registry configuration (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List declared capabilities.
    Capabilities,

    /// Show the full requirement and links of a capability.
    Show {
        /// Capability name.
        capability: String,
    },

    /// Parse a catalog file and apply it to an empty registry.
    Check {
        /// Path to the catalog TOML.
        file: PathBuf,
    },

    /// Resolve a capability on Z/n and optionally call one of its operations.
    Resolve {
        /// Capability name.
        capability: String,

        #[command(flatten)]
        subject: SubjectArgs,

        /// Operation to apply after resolving.
        #[arg(long)]
        apply: Option<String>,

        /// Arguments for `--apply`, e.g. `2 3` or `(1, 2)`.
        #[arg(long, num_args = 0.., allow_hyphen_values = true, requires = "apply")]
        args: Vec<Value>,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Show how a capability on Z/n was derived.
    Explain {
        /// Capability name.
        capability: String,

        #[command(flatten)]
        subject: SubjectArgs,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct SubjectArgs {
    /// Modulus of the sample cyclic group Z/n.
    #[arg(long, default_value = "5")]
    modulus: i64,

    /// Resolve on the order dual of Z/n.
    #[arg(long)]
    dual: bool,

    /// Resolve on Z/n written additively.
    #[arg(long)]
    additive: bool,
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Capabilities => {
            let registry = build_registry(&cli)?;
            let ids = registry.capabilities();
            println!("Capabilities ({}):", ids.len());
            for id in &ids {
                if let Some(info) = registry.describe(id) {
                    let twin = info
                        .twin
                        .map(|t| format!(" twin={t}"))
                        .unwrap_or_default();
                    let dual = if info.dual == info.name {
                        String::new()
                    } else {
                        format!(" dual={}", info.dual)
                    };
                    println!("  {} [{}]{twin}{dual}", info.name, info.notation);
                }
            }
        }

        Commands::Show { capability } => {
            let registry = build_registry(&cli)?;
            let Some(info) = registry.describe(capability.as_str()) else {
                miette::bail!("unknown capability: {capability}");
            };
            println!("Capability: {}", info.name);
            println!("  notation:  {}", info.notation);
            println!("  extends:   {}", join(&info.extends));
            println!("  ancestors: {}", join(&info.ancestors));
            println!("  extended by: {}", join(&info.descendants));
            if let Some(twin) = &info.twin {
                println!("  twin:      {twin}");
            }
            println!("  dual:      {}", info.dual);
            println!("  operations ({}):", info.requirement.len());
            for signature in &info.requirement {
                println!("    {signature}");
            }
            println!("  axioms ({}):", info.axioms.len());
            for axiom in &info.axioms {
                println!("    {axiom}");
            }
        }

        Commands::Check { file } => {
            let catalog = Catalog::load(file)?;
            let registry = Registry::with_config(load_config(&cli)?);
            let report = catalog.apply(&registry)?;
            println!(
                "Catalog \"{}\" OK: {} capabilities, {} rules, {} projections",
                report.id, report.capabilities, report.rules, report.projections
            );
        }

        Commands::Resolve {
            capability,
            subject,
            apply,
            args,
            json,
        } => {
            let registry = build_registry(&cli)?;
            let subject = register_subject(&registry, subject)?;
            let handle = registry.resolve(capability.as_str(), &subject)?;
            let result = match apply {
                Some(op) => Some(handle.call(op, args)?),
                None => None,
            };

            if *json {
                let out = serde_json::json!({
                    "capability": handle.capability(),
                    "subject": handle.subject().to_string(),
                    "derivation": handle.derivation(),
                    "depth": handle.depth(),
                    "operations": handle.operation_names().collect::<Vec<_>>(),
                    "result": result.as_ref().map(ToString::to_string),
                });
                let text = serde_json::to_string_pretty(&out).into_diagnostic()?;
                println!("{text}");
            } else {
                println!("{} on {}", handle.capability(), handle.subject());
                println!("  derivation: {} (depth {})", handle.derivation(), handle.depth());
                println!(
                    "  operations: {}",
                    handle.operation_names().collect::<Vec<_>>().join(", ")
                );
                if let (Some(op), Some(value)) = (apply, &result) {
                    let rendered: Vec<String> = args.iter().map(ToString::to_string).collect();
                    println!("  {op}({}) = {value}", rendered.join(", "));
                }
            }
        }

        Commands::Explain {
            capability,
            subject,
            json,
        } => {
            let registry = build_registry(&cli)?;
            let subject = register_subject(&registry, subject)?;
            let steps = registry.explain(capability.as_str(), &subject)?;

            if *json {
                let text = serde_json::to_string_pretty(&steps).into_diagnostic()?;
                println!("{text}");
            } else {
                for step in &steps {
                    println!(
                        "{}{} ({})",
                        "  ".repeat(step.depth),
                        step.key,
                        step.derivation
                    );
                }
            }
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> std::result::Result<RegistryConfig, StructuraError> {
    match &cli.config {
        Some(path) => Ok(RegistryConfig::load(path)?),
        None => Ok(RegistryConfig::default()),
    }
}

fn build_registry(cli: &Cli) -> std::result::Result<Registry, StructuraError> {
    let registry = Registry::with_config(load_config(cli)?);
    let catalog = match &cli.catalog {
        Some(path) => Catalog::load(path)?,
        None => Catalog::standard()?,
    };
    catalog.apply(&registry)?;
    Ok(registry)
}

fn register_subject(registry: &Registry, args: &SubjectArgs) -> Result<SubjectType> {
    if args.modulus <= 0 {
        miette::bail!("modulus must be positive, got {}", args.modulus);
    }
    let mut subject = samples::register_cyclic(registry, args.modulus)?;
    if args.dual {
        subject = subject.order_dual();
    }
    if args.additive {
        subject = subject.additive();
    }
    Ok(subject)
}

fn join<T: ToString>(items: &[T]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}
