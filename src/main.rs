use anyhow::Context;
use anyhow::Result;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use invoice_sheet::detect::parse_workbook;
use invoice_sheet::render::render_workbook;
use invoice_sheet::FieldCatalog;
use invoice_sheet::FieldConfig;
use invoice_sheet::RawData;
use invoice_sheet::RenderConfig;
use invoice_sheet::Workbook;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::error;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "invoice-sheet",
    version,
    about = "Extract shipping tables from spreadsheets and render them into invoice templates"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Detect header rows and extract tables as JSON
    Parse(ParseArgs),
    /// Write extracted tables into a copy of an xlsx template
    Render(RenderArgs),
}

#[derive(Args, Debug, Clone)]
struct ParseArgs {
    file: PathBuf,

    /// Field catalog; the built-in catalog when absent
    #[arg(long)]
    config: Option<PathBuf>,

    /// Glob pattern of sheet names to parse, repeatable
    #[arg(long = "sheet")]
    sheets: Vec<String>,

    /// Writes the JSON here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
struct RenderArgs {
    template: PathBuf,

    /// Tables keyed by target sheet name, then by table index
    #[arg(long)]
    data: PathBuf,

    #[arg(long)]
    config: PathBuf,

    #[arg(long)]
    output: PathBuf,
}

fn main() {
    init_tracing();

    if let Err(err) = run() {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Parse(args) => parse(args),
        Commands::Render(args) => render(args),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn parse(args: ParseArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => FieldConfig::load(path)?,
        None => FieldConfig::builtin()?,
    };
    if !args.sheets.is_empty() {
        config.sheets = args.sheets;
    }
    let catalog = FieldCatalog::new(config)?;

    let workbook = Workbook::open(&args.file)?;
    let sheets = parse_workbook(&workbook, &catalog)?;
    info!(sheets = sheets.len(), "parsed {}", args.file.display());

    let json = serde_json::to_string_pretty(&sheets)?;
    match args.output {
        Some(path) => std::fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}

fn render(args: RenderArgs) -> Result<()> {
    let config = RenderConfig::load(&args.config)?;
    let data = std::fs::read_to_string(&args.data).with_context(|| format!("failed to read {}", args.data.display()))?;
    let data: BTreeMap<String, RawData> =
        serde_json::from_str(&data).with_context(|| format!("failed to parse {}", args.data.display()))?;

    std::fs::copy(&args.template, &args.output).with_context(|| {
        format!("failed to copy {} to {}", args.template.display(), args.output.display())
    })?;
    let mut workbook = Workbook::open(&args.output)?;
    let summaries = render_workbook(&mut workbook, &config, &data)?;
    workbook.save(&args.output)?;
    info!(sheets = summaries.len(), "rendered {}", args.output.display());
    Ok(())
}
