use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_geo_ingest::app::{App, IngestSummary, NoopConverter};
use kira_geo_ingest::config::{ConfigLoader, IngestOptions, ResolvedConfig};
use kira_geo_ingest::domain::{AccessionKind, GeoAccession};
use kira_geo_ingest::error::KiraError;
use kira_geo_ingest::geo::GeoHttpClient;
use kira_geo_ingest::ncbi::NcbiHttpClient;
use kira_geo_ingest::output::{
    CacheListing, ClearResult, CorrespondenceMember, CorrespondenceReport, JsonOutput,
    LogProgress, ParseSummary,
};
use kira_geo_ingest::parser::SoftParser;
use kira_geo_ingest::quantitation::{ExampleValue, QuantitationGuesser};
use kira_geo_ingest::store::Store;

#[derive(Parser)]
#[command(name = "kira-geo")]
#[command(about = "Ingest GEO SOFT records: parse, line up samples across datasets, type data columns")]
#[command(version, author)]
struct Cli {
    /// Path to kira-geo.json (defaults to ./kira-geo.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Parse local SOFT files (plain or .gz) and print a summary")]
    Parse(ParseArgs),
    #[command(about = "Parse local SOFT files and print the sample correspondence of each series")]
    Correspond(CorrespondArgs),
    #[command(about = "Guess the quantitation type of a column")]
    Guess(GuessArgs),
    #[command(about = "Download and ingest a GSE or GDS, or the platform of a GPL")]
    Fetch(FetchArgs),
    #[command(about = "List cached SOFT files")]
    List,
    #[command(about = "Delete the local SOFT cache")]
    Clear,
}

#[derive(Args)]
struct ParseArgs {
    #[arg(required = true)]
    files: Vec<Utf8PathBuf>,
    #[arg(long)]
    platforms_only: bool,
}

#[derive(Args)]
struct CorrespondArgs {
    #[arg(required = true)]
    files: Vec<Utf8PathBuf>,
    #[arg(long)]
    no_matching: bool,
}

#[derive(Args)]
struct GuessArgs {
    name: String,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    example: Option<String>,
}

#[derive(Args)]
struct FetchArgs {
    /// GSE, GDS or GPL accession; without one, every series listed in the config is fetched
    accession: Option<String>,
    #[arg(long)]
    force: bool,
    #[arg(long)]
    no_matching: bool,
    #[arg(long)]
    split_by_platform: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::InvalidAccession(_)
        | KiraError::EmptyInput
        | KiraError::Io(_)
        | KiraError::Parse { .. }
        | KiraError::ConfigRead(_)
        | KiraError::ConfigParse(_)
        | KiraError::InvalidPattern { .. }
        | KiraError::NotASeries(_)
        | KiraError::EntrezLookup(_) => 2,
        KiraError::GeoHttp(_)
        | KiraError::GeoStatus { .. }
        | KiraError::NcbiHttp(_)
        | KiraError::NcbiStatus { .. } => 3,
        KiraError::Cancelled => 4,
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

    match cli.command {
        Commands::Parse(args) => run_parse(args),
        Commands::Correspond(args) => run_correspond(args, config),
        Commands::Guess(args) => run_guess(args, &config),
        Commands::Fetch(args) => run_fetch(args, config),
        Commands::List => run_list(),
        Commands::Clear => run_clear(),
    }
}

fn run_parse(args: ParseArgs) -> miette::Result<()> {
    let mut parser = SoftParser::new().with_platforms_only(args.platforms_only);
    for file in &args.files {
        parser.parse_path(file.as_std_path())?;
    }
    let mut result = parser.into_result();
    result.link_datasets();
    JsonOutput::print_parse(&ParseSummary::from_result(&result)).into_diagnostic()?;
    Ok(())
}

fn run_correspond(args: CorrespondArgs, config: ResolvedConfig) -> miette::Result<()> {
    let app = build_app(&config)?;
    let options = IngestOptions {
        do_sample_matching: config.ingest.do_sample_matching && !args.no_matching,
        ..config.ingest
    };
    let result = app.parse_files(&args.files, false, &LogProgress)?;
    let series: Vec<String> = result.series.keys().cloned().collect();

    let mut reports = Vec::with_capacity(series.len());
    for accession in series {
        let ingested = app.assemble(result.clone(), &accession, options, &LogProgress)?;
        let groups = ingested
            .correspondence()
            .map(|correspondence| {
                correspondence
                    .iter()
                    .map(|group| {
                        group
                            .iter()
                            .map(|member| CorrespondenceMember {
                                accession: member.clone(),
                                title: correspondence.title(member).map(str::to_string),
                            })
                            .collect()
                    })
                    .collect()
            })
            .unwrap_or_default();
        reports.push(CorrespondenceReport {
            series: accession,
            groups,
        });
    }
    JsonOutput::print_correspondence(&reports).into_diagnostic()?;
    Ok(())
}

fn run_guess(args: GuessArgs, config: &ResolvedConfig) -> miette::Result<()> {
    let example = args.example.as_deref().map(ExampleValue::from_raw);
    let descriptor = QuantitationGuesser::new(&config.rules).guess(
        &args.name,
        args.description.as_deref(),
        example.as_ref(),
    );
    JsonOutput::print_guess(&descriptor).into_diagnostic()?;
    Ok(())
}

fn run_fetch(args: FetchArgs, config: ResolvedConfig) -> miette::Result<()> {
    let apply = |base: IngestOptions| IngestOptions {
        do_sample_matching: base.do_sample_matching && !args.no_matching,
        split_by_platform: base.split_by_platform || args.split_by_platform,
        force_download: base.force_download || args.force,
        ..base
    };
    let requests: Vec<(GeoAccession, IngestOptions)> = match args.accession.as_deref() {
        Some(value) => vec![(value.parse()?, apply(config.ingest))],
        None => config
            .series
            .iter()
            .map(|request| (request.accession.clone(), apply(request.options)))
            .collect(),
    };
    if requests.is_empty() {
        return Err(miette::miette!(
            "no accession given and no series listed in the config"
        ));
    }
    let app = build_app(&config)?;

    let mut summaries: Vec<IngestSummary> = Vec::new();
    for (accession, options) in requests {
        if accession.kind() == AccessionKind::Gpl {
            let result = app.fetch_platform(&accession, options, &LogProgress)?;
            JsonOutput::print_parse(&ParseSummary::from_result(&result)).into_diagnostic()?;
            continue;
        }
        let converted =
            app.ingest_and_convert(&accession, options, &mut NoopConverter, &LogProgress)?;
        summaries.extend(converted.iter().map(|(series, _)| series.summary()));
    }
    if !summaries.is_empty() {
        JsonOutput::print_ingest(&summaries).into_diagnostic()?;
    }
    Ok(())
}

fn run_list() -> miette::Result<()> {
    let store = Store::new()?;
    let listing = CacheListing {
        cache_root: store.cache_root().to_string(),
        entries: store.list_metadata()?,
    };
    JsonOutput::print_list(&listing).into_diagnostic()?;
    Ok(())
}

fn run_clear() -> miette::Result<()> {
    let store = Store::new()?;
    let cleared = store.clear()?;
    JsonOutput::print_clear(&ClearResult { cleared }).into_diagnostic()?;
    Ok(())
}

fn build_app(config: &ResolvedConfig) -> Result<App<GeoHttpClient, NcbiHttpClient>, KiraError> {
    let store = Store::new()?;
    let geo = GeoHttpClient::new(store)?;
    let entrez = NcbiHttpClient::new()?;
    Ok(App::new(geo, entrez).with_rules(config.rules.clone()))
}
