//! Compile routine text files and print the linearized listings.
//!
//! Usage: `dyncg-dump [options] [file.rg]`, reading stdin without a file.

use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process;

use clap::Parser;
use dyncg::config::CodegenOptions;
use dyncg::core::HelperRegistry;
use dyncg::driver::compile_all;
use dyncg::text::{parse_routines, FileTest};
use log::{error, info};

#[derive(Parser, Debug)]
#[command(name = "dyncg-dump")]
#[command(about = "Linearize routine graphs and print the instruction listings")]
struct Args {
    /// Routine text file; stdin when omitted
    input: Option<PathBuf>,

    /// Lower every switch as a compare chain
    #[arg(long)]
    no_jump_tables: bool,

    /// Smallest case count considered for a jump table
    #[arg(long)]
    jump_table_min_cases: Option<usize>,

    /// Worker threads, 0 for the global pool
    #[arg(long)]
    workers: Option<usize>,

    /// Print generation statistics after the listings
    #[arg(long)]
    stats: bool,

    /// Validate the file's CHECK directives instead of printing listings
    #[arg(long)]
    check: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let args = Args::parse();

    let level = match args.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env().filter_level(level).init();

    if let Err(message) = run(&args) {
        error!("{}", message);
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let text = match &args.input {
        Some(path) => fs::read_to_string(path)?,
        None => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };

    let registry = HelperRegistry::new();
    if args.check {
        let test = FileTest::parse(&text)?;
        test.run(&registry)?;
        info!("{} directive(s) matched", test.directives.len());
        return Ok(());
    }

    let mut options = CodegenOptions::from_env()?;
    if args.no_jump_tables {
        options.emit_jump_tables = false;
    }
    if let Some(min) = args.jump_table_min_cases {
        options.jump_table_min_cases = min;
    }
    if let Some(workers) = args.workers {
        options.num_workers = workers;
    }
    options.validate()?;

    let graphs = parse_routines(&text)?;
    let output = compile_all(&graphs, &registry, &options, None);
    for (graph, result) in graphs.iter().zip(&output.results) {
        match result {
            Ok(listing) => print!("{}", listing.render(graph)),
            Err(err) => println!("error: {}", err),
        }
        println!();
    }

    if args.stats {
        println!("{}", output.stats);
        println!("helpers resolved: {}", registry.len());
    }
    if !output.is_success() {
        return Err(format!("{} routine(s) failed", output.failures().count()).into());
    }
    Ok(())
}
