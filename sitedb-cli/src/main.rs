use clap::{Parser, Subcommand, ValueEnum};
use sitedb::{Project, ReferencePolicy};
use std::process;

/// SiteDB CLI - build a site project's content store and inspect it
#[derive(Parser)]
#[command(name = "sitedb", version, about)]
struct Cli {
    /// Path to the project directory (default: current directory)
    #[arg(long, default_value = ".")]
    project: String,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    /// Override the reference policy from config.yml
    #[arg(long)]
    references: Option<ReferenceMode>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Clone, ValueEnum)]
enum ReferenceMode {
    Strict,
    Lenient,
}

impl From<ReferenceMode> for ReferencePolicy {
    fn from(mode: ReferenceMode) -> Self {
        match mode {
            ReferenceMode::Strict => ReferencePolicy::Strict,
            ReferenceMode::Lenient => ReferencePolicy::Lenient,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Load every model and record, then show load order and row counts
    Build,

    /// Show the resolved models and the compiled tables
    Schema,

    /// Run a query against the loaded content
    Query {
        /// Query expression, e.g. "Post.filter(draft == false).count()"
        expression: String,
    },

    /// Show the project context (static values plus dynamic queries)
    Context,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut project = Project::open(&cli.project)?;
    if let Some(mode) = cli.references {
        let mut config = project.config().clone();
        config.references = mode.into();
        project = project.with_config(config);
    }

    match cli.command {
        Command::Build => {
            let store = project.build()?;
            print_output(&store.status()?, &cli.format)?;
        }

        Command::Schema => {
            let models = project.load_models()?;
            let schema = sitedb::Schema::compile(&models)?;
            let ddl = schema.create_statements();
            print_output(
                &serde_json::json!({
                    "models": models,
                    "schema": schema,
                    "sql": ddl,
                }),
                &cli.format,
            )?;
        }

        Command::Query { expression } => {
            let store = project.build()?;
            let result = store.query(&expression)?;
            print_output(&serde_json::to_value(&result)?, &cli.format)?;
        }

        Command::Context => {
            let store = project.build()?;
            let context = project.context(&store)?;
            print_output(&serde_json::Value::Object(context), &cli.format)?;
        }
    }

    Ok(())
}

fn print_output(
    value: &serde_json::Value,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}
