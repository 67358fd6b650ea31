//! Command-line tools for extracting DICOM specification tables.
//!
//! ### How to use
//!
//! Run the application with one of the following subcommands:
//!
//! - **`mod-attributes`**: one module attributes table of PS3.3
//! - **`iod-attributes`**: an IOD of PS3.3, expanded with its modules
//! - **`data-elements`**: the data element dictionary of PS3.6
//!
//! Documents and models are cached under the configured cache directory;
//! `--force-download` and `--force-parse` bypass the tiers selectively.
//! Results print as a flat table, a tree, or not at all (`--print-mode`).
//!
//! Please use the `--help` flag for the full usage information.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use snafu::{Report, ResultExt, Whatever};
use tracing::Level;

use dcmspec_builder::{IodRequest, IodSpecBuilder, MergeRequest, ModelRequest, SpecFactory, SpecMerger};
use dcmspec_core::config::Config;
use dcmspec_core::model::SpecModel;

mod printer;
use printer::SpecPrinter;

const PART3_URL: &str = "https://dicom.nema.org/medical/dicom/current/output/html/part03.html";
const PART6_URL: &str =
    "https://dicom.nema.org/medical/dicom/current/output/chtml/part06/chapter_6.html";
const PART6_TABLE: &str = "table_6-1";

/// DICOM specification extraction tools
#[derive(Debug, Parser)]
#[command(name = "dcmspec", version)]
struct App {
    #[clap(subcommand)]
    command: AppCommand,

    /// Path to the configuration file
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging to the console (overrides --verbose)
    #[clap(short, long, global = true)]
    debug: bool,

    /// Enable verbose (info-level) logging to the console
    #[clap(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum AppCommand {
    /// Extract one module attributes table from PS3.3
    #[clap(name = "mod-attributes")]
    ModAttributes(ModAttributesApp),
    /// Build an expanded IOD model from PS3.3
    #[clap(name = "iod-attributes")]
    IodAttributes(IodAttributesApp),
    /// Extract the data element dictionary from PS3.6
    #[clap(name = "data-elements")]
    DataElements(DataElementsApp),
}

#[derive(Debug, Parser)]
struct ModAttributesApp {
    /// Id of the module attributes table, e.g. table_C.7-1
    table: String,

    /// Depth to which included tables are parsed (default: unlimited)
    #[clap(long)]
    include_depth: Option<u32>,

    /// Re-parse the document even if a cached model exists
    #[clap(long)]
    force_parse: bool,

    /// Re-download the document and regenerate the model
    #[clap(long)]
    force_download: bool,

    /// Re-merge Part 6 specifications even if cached
    #[clap(long)]
    force_update: bool,

    /// Specifications to merge from Part 6
    #[clap(long, value_enum, num_args = 1..)]
    add_part6: Vec<Part6Column>,

    /// How to print the result
    #[clap(long, value_enum, default_value_t = PrintMode::Table)]
    print_mode: PrintMode,
}

#[derive(Debug, Parser)]
struct IodAttributesApp {
    /// Id of the IOD modules table, e.g. table_A.3-1
    table: String,

    /// Re-download the document and rebuild the expanded model
    #[clap(long)]
    force_download: bool,

    /// How to print the result
    #[clap(long, value_enum, default_value_t = PrintMode::Tree)]
    print_mode: PrintMode,
}

#[derive(Debug, Parser)]
struct DataElementsApp {
    /// Re-parse the document even if a cached model exists
    #[clap(long)]
    force_parse: bool,

    /// Re-download the document and regenerate the model
    #[clap(long)]
    force_download: bool,

    /// How to print the result
    #[clap(long, value_enum, default_value_t = PrintMode::Table)]
    print_mode: PrintMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PrintMode {
    Table,
    Tree,
    None,
}

/// Part 6 columns that can be merged into a module attributes model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Part6Column {
    #[clap(name = "VR")]
    Vr,
    #[clap(name = "VM")]
    Vm,
    #[clap(name = "Keyword")]
    Keyword,
    #[clap(name = "Status")]
    Status,
}

impl Part6Column {
    fn attr(&self) -> &'static str {
        match self {
            Part6Column::Vr => "elem_vr",
            Part6Column::Vm => "elem_vm",
            Part6Column::Keyword => "elem_keyword",
            Part6Column::Status => "elem_status",
        }
    }
}

fn main() {
    let app = App::parse();

    let max_level = if app.debug {
        Level::DEBUG
    } else if app.verbose {
        Level::INFO
    } else {
        Level::WARN
    };
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(max_level)
            .finish(),
    )
    .whatever_context("Could not set up global logging subscriber")
    .unwrap_or_else(|e: Whatever| {
        eprintln!("[ERROR] {}", Report::from_error(e));
    });

    run(app).unwrap_or_else(|e| {
        tracing::error!("{}", Report::from_error(e));
        std::process::exit(-2);
    });
}

fn run(app: App) -> Result<(), Whatever> {
    let config = match &app.config {
        Some(path) => Config::from_file(path.as_path()),
        None => Config::new(),
    };

    match app.command {
        AppCommand::ModAttributes(cmd) => mod_attributes(config, cmd),
        AppCommand::IodAttributes(cmd) => iod_attributes(config, cmd),
        AppCommand::DataElements(cmd) => data_elements(config, cmd),
    }
}

fn mod_attributes(config: Config, cmd: ModAttributesApp) -> Result<(), Whatever> {
    let factory = SpecFactory::new(config.clone());
    let mut request = ModelRequest::new(PART3_URL, "Part3.xhtml", cmd.table.as_str());
    request.json_file_name = Some(format!("Part3_{}.json", cmd.table));
    request.include_depth = cmd.include_depth;
    request.force_download = cmd.force_download;
    request.force_parse = cmd.force_parse;

    let mut model = factory
        .create_model(&request, None)
        .whatever_context("Could not build module attributes model")?;

    if !cmd.add_part6.is_empty() {
        let part6 = part6_model(&config, cmd.force_download, cmd.force_parse)?;
        let merge_attrs: Vec<String> =
            cmd.add_part6.iter().map(|c| c.attr().to_string()).collect();
        let merger = SpecMerger::new(config);
        model = merger
            .merge_many(
                &[&model, &part6],
                &MergeRequest {
                    method: "matching_node",
                    match_by: "attribute",
                    attribute_names: vec![Some("elem_tag")],
                    merge_attrs: vec![Some(merge_attrs)],
                    json_file_name: Some(&format!("Part3_{}_part6.json", cmd.table)),
                    force_update: cmd.force_update,
                    ..Default::default()
                },
            )
            .whatever_context("Could not merge Part 6 specifications")?;
    }

    print_model(&model, cmd.print_mode)
}

fn iod_attributes(config: Config, cmd: IodAttributesApp) -> Result<(), Whatever> {
    let iod_column_to_attr: BTreeMap<usize, String> =
        [(0, "ie"), (1, "module"), (2, "ref"), (3, "usage")]
            .into_iter()
            .map(|(k, v)| (k, v.to_string()))
            .collect();
    let iod_factory = SpecFactory::new(config.clone())
        .with_column_to_attr(iod_column_to_attr)
        .with_name_attr("module");
    let module_factory = SpecFactory::new(config);
    let builder = IodSpecBuilder::new(iod_factory, module_factory);

    let mut request = IodRequest::new(PART3_URL, "Part3.xhtml", cmd.table.as_str());
    request.json_file_name = Some(format!("Part3_{}_expanded.json", cmd.table));
    request.force_download = cmd.force_download;

    let model = builder
        .build_from_url(&request, None)
        .whatever_context("Could not build expanded IOD model")?;
    print_model(&model, cmd.print_mode)
}

fn data_elements(config: Config, cmd: DataElementsApp) -> Result<(), Whatever> {
    let part6 = part6_model(&config, cmd.force_download, cmd.force_parse)?;
    print_model(&part6, cmd.print_mode)
}

/// Builds the PS3.6 chapter 6 data element dictionary model.
fn part6_model(
    config: &Config,
    force_download: bool,
    force_parse: bool,
) -> Result<SpecModel, Whatever> {
    let column_to_attr: BTreeMap<usize, String> = [
        (0, "elem_tag"),
        (1, "elem_name"),
        (2, "elem_keyword"),
        (3, "elem_vr"),
        (4, "elem_vm"),
        (5, "elem_status"),
    ]
    .into_iter()
    .map(|(k, v)| (k, v.to_string()))
    .collect();

    let factory = SpecFactory::new(config.clone())
        .with_column_to_attr(column_to_attr)
        .with_name_attr("elem_name");
    let mut request = ModelRequest::new(PART6_URL, "DataElements.xhtml", PART6_TABLE);
    request.json_file_name = Some("DataElements.json".to_string());
    request.force_download = force_download;
    request.force_parse = force_parse;

    factory
        .create_model(&request, None)
        .whatever_context("Could not build data elements model")
}

fn print_model(model: &SpecModel, mode: PrintMode) -> Result<(), Whatever> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let printer = SpecPrinter::new(model);
    match mode {
        PrintMode::Table => printer
            .print_table(&mut out)
            .whatever_context("Could not print table")?,
        PrintMode::Tree => printer
            .print_tree(&mut out)
            .whatever_context("Could not print tree")?,
        PrintMode::None => {}
    }
    out.flush().whatever_context("Could not flush output")
}
