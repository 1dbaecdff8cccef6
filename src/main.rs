use clap::Parser;

mod config;
mod controller;
mod datatypes;
mod deck;
mod error;
mod formats;
mod mesh;
mod results;
mod shift;

use controller::{CalculixRunner, Controller, Outcome};

/// Shape optimization driver for a CalculiX-style finite-element solver
#[derive(Parser)]
#[command(name = "shapeshift", version)]
struct Cli {
    /// Run-configuration JSON file
    input_json: String,

    /// Override the working directory from the configuration
    #[arg(long)]
    working_dir: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    let mut config = match config::load_config(&cli.input_json) {
        Ok(c) => c,
        Err(err) => {
            println!("{}", err);
            std::process::exit(1)
        }
    };
    if let Some(dir) = cli.working_dir {
        config.working_dir = dir.into();
    }

    let solver = CalculixRunner {
        executable: config.solver_path.clone(),
        cpu_threads: config.cpu_threads,
    };

    let mut controller = match Controller::new(&config, solver) {
        Ok(c) => c,
        Err(err) => {
            println!("{}", err);
            std::process::exit(1)
        }
    };

    match controller.run() {
        Ok(Outcome::Converged) => println!("info: optimization converged"),
        Ok(Outcome::IterationCapReached) => println!("info: optimization reached iteration cap"),
        Err(err) => {
            println!("{}", err);
            std::process::exit(1)
        }
    }
}
