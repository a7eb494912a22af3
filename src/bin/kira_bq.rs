use std::io::{self, BufRead};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_biom_query::app::App;
use kira_biom_query::category::{AllRecords, ColumnFilter, RecordFilter};
use kira_biom_query::config::ConfigLoader;
use kira_biom_query::error::QueryError;
use kira_biom_query::metadata::MetadataQuery;
use kira_biom_query::output::{JsonOutput, OutputFormat, TsvOutput};
use kira_biom_query::store::WebdisStore;
use kira_biom_query::table::Assembly;

#[derive(Parser)]
#[command(name = "kira-bq")]
#[command(about = "Query sample tables and sample metadata from a Redis-compatible store")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true, value_enum, default_value = "tsv")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "List contexts and their descriptions")]
    Contexts,
    #[command(about = "List the tags known in a context")]
    Tags(ContextArgs),
    #[command(about = "Assemble sample by observation tables")]
    Fetch(FetchArgs),
    #[command(about = "Retrieve sample metadata")]
    Metadata(MetadataArgs),
    #[command(about = "Summaries over metadata categories")]
    Summarize(SummarizeArgs),
}

#[derive(Args)]
struct ContextArgs {
    #[arg(long)]
    context: String,
}

#[derive(Args)]
struct FetchArgs {
    #[command(subcommand)]
    command: FetchCommand,
}

#[derive(Subcommand)]
enum FetchCommand {
    #[command(about = "Table for samples (read from stdin when none are given)")]
    Samples {
        #[arg(long)]
        context: String,
        #[arg(long)]
        require_present: bool,
        samples: Vec<String>,
    },
    #[command(about = "Table for samples containing observations")]
    Observations {
        #[arg(long)]
        context: String,
        #[arg(long)]
        exact: bool,
        observations: Vec<String>,
    },
}

#[derive(Args)]
struct MetadataArgs {
    #[command(subcommand)]
    command: MetadataCommand,
}

#[derive(Subcommand)]
enum MetadataCommand {
    #[command(about = "Metadata for samples (read from stdin when none are given)")]
    Samples {
        #[arg(long)]
        context: Option<String>,
        #[arg(long)]
        all_columns: bool,
        #[arg(long = "restrict-to")]
        restrict_to: Vec<String>,
        samples: Vec<String>,
    },
    #[command(about = "Find samples by metadata")]
    Search {
        #[arg(long = "restrict-to", required = true)]
        restrict_to: Vec<String>,
        #[arg(long)]
        tag: Option<String>,
        #[arg(long = "where")]
        filter: Option<String>,
    },
}

#[derive(Args)]
struct SummarizeArgs {
    #[command(subcommand)]
    command: SummarizeCommand,
}

#[derive(Subcommand)]
enum SummarizeCommand {
    #[command(about = "Number of samples with a value per category")]
    CategoryCounts,
    #[command(about = "Values of one category")]
    CategoryValues {
        category: String,
        samples: Vec<String>,
    },
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<QueryError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &QueryError) -> u8 {
    match error {
        QueryError::UnknownContext(_)
        | QueryError::MissingColumns(_)
        | QueryError::MissingRestriction
        | QueryError::EmptyIntersection { .. }
        | QueryError::InvalidSampleId(_)
        | QueryError::InvalidBatchSize(_)
        | QueryError::InvalidFilter(_) => 2,
        QueryError::StoreHttp(_)
        | QueryError::StoreStatus { .. }
        | QueryError::StoreResponse { .. } => 3,
        QueryError::MissingObservationIndex(_)
        | QueryError::ObservationIndex { .. }
        | QueryError::UnknownObservation { .. }
        | QueryError::MalformedPayload { .. }
        | QueryError::MalformedCategorySet { .. }
        | QueryError::MalformedTagList { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let app = App::from_config(&config)?;
    let format = cli.format;

    match cli.command {
        Commands::Contexts => {
            let contexts = app.contexts()?;
            match format {
                OutputFormat::Json => JsonOutput::print(&contexts).into_diagnostic(),
                OutputFormat::Tsv => TsvOutput::write_pairs(&mut io::stdout().lock(), &contexts)
                    .into_diagnostic(),
            }
        }
        Commands::Tags(args) => {
            let tags = app.known_tags(&args.context)?;
            match format {
                OutputFormat::Json => JsonOutput::print(&tags).into_diagnostic(),
                OutputFormat::Tsv => {
                    TsvOutput::write_lines(&mut io::stdout().lock(), &tags).into_diagnostic()
                }
            }
        }
        Commands::Fetch(args) => run_fetch(args.command, &app, format),
        Commands::Metadata(args) => run_metadata(args.command, &app, format),
        Commands::Summarize(args) => run_summarize(args.command, &app, format),
    }
}

fn run_fetch(
    command: FetchCommand,
    app: &App<WebdisStore>,
    format: OutputFormat,
) -> miette::Result<()> {
    let assembly = match command {
        FetchCommand::Samples {
            context,
            require_present,
            samples,
        } => {
            let samples = ids_or_stdin(samples)?;
            app.data_from_samples(&context, &samples, require_present)?
        }
        FetchCommand::Observations {
            context,
            exact,
            observations,
        } => {
            let observations = ids_or_stdin(observations)?;
            app.data_from_observations(&context, &observations, exact)?
        }
    };
    report_assembly(&assembly);
    match format {
        OutputFormat::Json => JsonOutput::print(&assembly).into_diagnostic(),
        OutputFormat::Tsv => {
            TsvOutput::write_table(&mut io::stdout().lock(), &assembly.table).into_diagnostic()
        }
    }
}

fn run_metadata(
    command: MetadataCommand,
    app: &App<WebdisStore>,
    format: OutputFormat,
) -> miette::Result<()> {
    match command {
        MetadataCommand::Samples {
            context,
            all_columns,
            restrict_to,
            samples,
        } => {
            let samples = ids_or_stdin(samples)?;
            let query = MetadataQuery {
                common: !all_columns,
                context,
                restrict_to: (!restrict_to.is_empty()).then_some(restrict_to),
            };
            let result = app.sample_metadata(&samples, &query)?;
            if !result.unobserved.is_empty() {
                eprintln!("unobserved samples: {}", result.unobserved.join(", "));
            }
            match format {
                OutputFormat::Json => JsonOutput::print(&result).into_diagnostic(),
                OutputFormat::Tsv => {
                    TsvOutput::write_metadata(&mut io::stdout().lock(), &result.table)
                        .into_diagnostic()
                }
            }
        }
        MetadataCommand::Search {
            restrict_to,
            tag,
            filter,
        } => {
            let column_filter = filter
                .as_deref()
                .map(str::parse::<ColumnFilter>)
                .transpose()?;
            let filter: &dyn RecordFilter = match &column_filter {
                Some(filter) => filter,
                None => &AllRecords,
            };
            let found = app.metadata_search(filter, tag.as_deref(), Some(&restrict_to))?;
            match format {
                OutputFormat::Json => JsonOutput::print(&found).into_diagnostic(),
                OutputFormat::Tsv => {
                    TsvOutput::write_lines(&mut io::stdout().lock(), &found).into_diagnostic()
                }
            }
        }
    }
}

fn run_summarize(
    command: SummarizeCommand,
    app: &App<WebdisStore>,
    format: OutputFormat,
) -> miette::Result<()> {
    match command {
        SummarizeCommand::CategoryCounts => {
            let counts = app.sample_counts_per_category()?;
            match format {
                OutputFormat::Json => JsonOutput::print(&counts).into_diagnostic(),
                OutputFormat::Tsv => {
                    TsvOutput::write_pairs(&mut io::stdout().lock(), &counts).into_diagnostic()
                }
            }
        }
        SummarizeCommand::CategoryValues { category, samples } => {
            let filter = (!samples.is_empty()).then_some(samples);
            let values = app.category_sample_values(&category, filter.as_deref())?;
            match format {
                OutputFormat::Json => JsonOutput::print(&values).into_diagnostic(),
                OutputFormat::Tsv => TsvOutput::write_pairs(
                    &mut io::stdout().lock(),
                    values
                        .iter()
                        .map(|(sample, value)| (sample, value.as_deref().unwrap_or_default())),
                )
                .into_diagnostic(),
            }
        }
    }
}

fn report_assembly(assembly: &Assembly) {
    if !assembly.unobserved.is_empty() {
        eprintln!("unobserved samples: {}", assembly.unobserved.join(", "));
    }
    if !assembly.absent.is_empty() {
        eprintln!("samples without data: {}", assembly.absent.join(", "));
    }
    for (logical, physical) in &assembly.ambiguities {
        if physical.len() > 1 {
            eprintln!("ambiguous sample {logical}: {}", physical.join(", "));
        }
    }
}

fn ids_or_stdin(ids: Vec<String>) -> miette::Result<Vec<String>> {
    if !ids.is_empty() {
        return Ok(ids);
    }
    let stdin = io::stdin();
    let mut collected = Vec::new();
    for line in stdin.lock().lines() {
        let line = line.map_err(|err| QueryError::Io(err.to_string()))?;
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            collected.push(trimmed.to_string());
        }
    }
    Ok(collected)
}
