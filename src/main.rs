#![allow(dead_code)]

use std::fs::File;
use std::io;
use std::path::Path;
use std::process::exit;

use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use cache::CachedPathFinder;
use primitives::{Distance, LineId, StationId};
use serialization::sqlite_store::SqliteStore;
use service::{LineService, MapService, PathFinder};
use test::random_samples;

mod cache;
mod col;
mod import;
mod line;
mod network;
mod path;
mod primitives;
mod serialization;
mod service;
mod shortest_path;
mod store;
mod test;

#[derive(Parser, Debug)]
#[command(
    version,
    author,
    about = "Maintains subway line topologies and computes shortest paths across lines"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
enum Commands {
    #[command(about = "Import stations, lines and sections from CSV files into a new database")]
    Import(ImportArgs),

    #[command(about = "Find the shortest path between two stations")]
    Path(PathArgs),

    #[command(about = "Answer a batch of path queries read from a CSV file")]
    Paths(PathsArgs),

    #[command(about = "List all lines with their stations")]
    Lines(DatabaseArgs),

    #[command(about = "Rename or recolor a line")]
    UpdateLine(UpdateLineArgs),

    #[command(about = "Delete a line and all of its sections")]
    DeleteLine(DeleteLineArgs),

    #[command(about = "Insert a section into a line")]
    AddSection(AddSectionArgs),

    #[command(about = "Remove a station from a line")]
    RemoveSection(RemoveSectionArgs),

    #[command(about = "Run random insert/remove sequences against the chain invariant")]
    RunRandom,
}

#[derive(Args, Clone, Debug)]
struct ImportArgs {
    #[arg(short, long, default_value = "Stations.csv")]
    stations_path: String,

    #[arg(short, long, default_value = "Lines.csv")]
    lines_path: String,

    #[arg(short = 'c', long, default_value = "Sections.csv")]
    sections_path: String,

    #[arg(
        short = 'o',
        long,
        help = "The database file to write the network to.",
        default_value = "subway.sqlite3"
    )]
    out_filename: String,
}

fn main_import(args: &ImportArgs) {
    if Path::new(&args.out_filename).exists() {
        error!("Output file already exists: {}", args.out_filename);
        exit(1);
    }

    let open = |filename: &str| {
        File::open(filename).unwrap_or_else(|it| {
            error!("Could not open {}: {}", filename, it);
            exit(1);
        })
    };
    let stations = open(&args.stations_path);
    let lines = open(&args.lines_path);
    let sections = match File::open(&args.sections_path) {
        io::Result::Ok(file) => Box::new(file) as Box<dyn io::Read>,
        io::Result::Err(err) => {
            info!("No sections file found: {}", err);
            Box::new(io::empty())
        }
    };

    let store = open_store(&args.out_filename);
    let stats = import::import_network(stations, lines, sections, &store).unwrap_or_else(|it| {
        error!("Could not import network: {}", it);
        exit(1);
    });
    info!(
        "Wrote {} stations, {} lines and {} sections to {}",
        stats.num_stations, stats.num_lines, stats.num_sections, args.out_filename
    );
}

#[derive(Args, Clone, Debug)]
struct DatabaseArgs {
    #[arg(
        short = 'd',
        long = "database",
        default_value = "subway.sqlite3",
        help = "The network database."
    )]
    filename: String,
}

fn open_store(filename: &str) -> SqliteStore {
    SqliteStore::open(filename).unwrap_or_else(|it| {
        error!("Could not open database {}: {}", filename, it);
        exit(1);
    })
}

fn open_existing_store(args: &DatabaseArgs) -> SqliteStore {
    if !Path::new(&args.filename).exists() {
        error!("Database does not exist: {}", args.filename);
        exit(1);
    }
    open_store(&args.filename)
}

#[derive(Args, Clone, Debug)]
struct PathArgs {
    #[clap(flatten)]
    database: DatabaseArgs,

    #[arg(short, long)]
    source: u32,

    #[arg(short, long)]
    target: u32,
}

fn main_path(args: &PathArgs) {
    let store = open_existing_store(&args.database);
    let map = MapService::new(&store, &store);
    let result = map
        .find_path(StationId(args.source), StationId(args.target))
        .unwrap_or_else(|it| {
            error!("Could not find path: {}", it);
            exit(1);
        });
    info!("Total distance: {}", result.total_distance);
    if let Err(err) = path::write_csv(&result, io::stdout().lock()) {
        error!("Could not write path: {}", err);
        exit(1);
    }
}

#[derive(Args, Clone, Debug)]
struct PathsArgs {
    #[clap(flatten)]
    database: DatabaseArgs,

    #[arg(
        short = 'i',
        long,
        default_value = "OD.csv",
        help = "A CSV file with columns [source, target]."
    )]
    od_path: String,
}

fn main_paths(args: &PathsArgs) {
    let store = open_existing_store(&args.database);
    let od_pairs = File::open(&args.od_path)
        .map_err(csv::Error::from)
        .and_then(|file| import::parse_od_pairs(file))
        .unwrap_or_else(|it| {
            error!("Could not read OD pairs from {}: {}", args.od_path, it);
            exit(1);
        });

    let finder = CachedPathFinder::new(MapService::new(&store, &store));
    let results = od_pairs
        .par_iter()
        .map(|od| (od, finder.find_path(od.source, od.target)))
        .collect::<Vec<_>>();

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_writer(io::stdout().lock());
    let mut failed = 0;
    for (od, result) in results {
        match result {
            Ok(path) => {
                let stations = path
                    .stations
                    .iter()
                    .map(|it| it.id.0.to_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                let record = [
                    od.source.0.to_string(),
                    od.target.0.to_string(),
                    path.total_distance.to_string(),
                    stations,
                ];
                if let Err(err) = writer.write_record(&record) {
                    error!("Could not write result: {}", err);
                    exit(1);
                }
            }
            Err(err) => {
                warn!("{:?} -> {:?}: {}", od.source, od.target, err);
                failed += 1;
            }
        }
    }
    if let Err(err) = writer.flush() {
        error!("Could not write results: {}", err);
        exit(1);
    }
    info!(
        "Answered {} of {} queries ({} distinct)",
        od_pairs.len() - failed,
        od_pairs.len(),
        finder.len()
    );
}

fn main_lines(args: &DatabaseArgs) {
    let store = open_existing_store(args);
    let lines = LineService::new(&store, &store)
        .find_lines()
        .unwrap_or_else(|it| {
            error!("Could not load lines: {}", it);
            exit(1);
        });
    for line in lines {
        info!(
            "{:?} '{}' ({}): {:?}, {} in total",
            line.id,
            line.name,
            line.color,
            line.topology.stations(),
            line.topology.total_distance()
        );
    }
}

#[derive(Args, Clone, Debug)]
struct UpdateLineArgs {
    #[clap(flatten)]
    database: DatabaseArgs,

    #[arg(short, long)]
    line: u32,

    #[arg(short, long)]
    name: String,

    #[arg(short, long)]
    color: String,
}

fn main_update_line(args: &UpdateLineArgs) {
    let store = open_existing_store(&args.database);
    LineService::new(&store, &store)
        .update_line(LineId(args.line), &args.name, &args.color)
        .unwrap_or_else(|it| {
            error!("Could not update line: {}", it);
            exit(1);
        });
}

#[derive(Args, Clone, Debug)]
struct DeleteLineArgs {
    #[clap(flatten)]
    database: DatabaseArgs,

    #[arg(short, long)]
    line: u32,
}

fn main_delete_line(args: &DeleteLineArgs) {
    let store = open_existing_store(&args.database);
    LineService::new(&store, &store)
        .delete_line(LineId(args.line))
        .unwrap_or_else(|it| {
            error!("Could not delete line: {}", it);
            exit(1);
        });
}

#[derive(Args, Clone, Debug)]
struct AddSectionArgs {
    #[clap(flatten)]
    database: DatabaseArgs,

    #[arg(short, long)]
    line: u32,

    #[arg(short, long)]
    up_station: u32,

    #[arg(short = 'w', long)]
    down_station: u32,

    #[arg(short = 'x', long, help = "The distance between the two stations.")]
    distance: Distance,
}

fn main_add_section(args: &AddSectionArgs) {
    let store = open_existing_store(&args.database);
    let lines = LineService::new(&store, &store);
    let line = lines
        .insert_section(
            LineId(args.line),
            StationId(args.up_station),
            StationId(args.down_station),
            args.distance,
        )
        .unwrap_or_else(|it| {
            error!("Could not add section: {}", it);
            exit(1);
        });
    info!(
        "Line '{}' now runs {:?} ({} in total)",
        line.name,
        line.topology.stations(),
        line.topology.total_distance()
    );
}

#[derive(Args, Clone, Debug)]
struct RemoveSectionArgs {
    #[clap(flatten)]
    database: DatabaseArgs,

    #[arg(short, long)]
    line: u32,

    #[arg(short, long)]
    station: u32,
}

fn main_remove_section(args: &RemoveSectionArgs) {
    let store = open_existing_store(&args.database);
    let lines = LineService::new(&store, &store);
    let line = lines
        .remove_section(LineId(args.line), StationId(args.station))
        .unwrap_or_else(|it| {
            error!("Could not remove station: {}", it);
            exit(1);
        });
    info!(
        "Line '{}' now runs {:?} ({} in total)",
        line.name,
        line.topology.stations(),
        line.topology.total_distance()
    );
}

fn main() {
    env_logger::builder().parse_env("LOG").init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Import(args) => main_import(&args),
        Commands::Path(args) => main_path(&args),
        Commands::Paths(args) => main_paths(&args),
        Commands::Lines(args) => main_lines(&args),
        Commands::UpdateLine(args) => main_update_line(&args),
        Commands::DeleteLine(args) => main_delete_line(&args),
        Commands::AddSection(args) => main_add_section(&args),
        Commands::RemoveSection(args) => main_remove_section(&args),
        Commands::RunRandom => random_samples::run_samples(),
    }
}
