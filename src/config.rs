use std::collections::BTreeSet;
use std::path::PathBuf;

use json::JsonValue;

use crate::{
    datatypes::{Goal, MoveLimit, NodeId, SensitivityKind},
    error::ShapeshiftError,
};

/// Immutable run configuration handed to the controller at construction
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Directory holding the decks and all solver artifacts
    pub working_dir: PathBuf,
    /// Initial model deck file name, must end in .inp
    pub deck: String,
    /// Path to the external solver executable
    pub solver_path: String,
    /// Thread count passed through to the solver via OMP_NUM_THREADS
    pub cpu_threads: usize,
    /// Global per-iteration node-shift magnitude cap
    pub max_shift: f64,
    /// Optimization direction, mapped to the sensitivity sign
    pub goal: Goal,
    /// Sensitivity field driving the shape update
    pub sensitivity: SensitivityKind,
    /// Design-iteration cap
    pub max_iterations: u32,
    /// Optional per-objective convergence tolerance
    pub tolerance: Option<f64>,
    /// Cumulative move budgets over disjoint node sets
    pub move_limits: Vec<MoveLimit>,
}

impl RunConfig {
    /// Deck file name without its .inp extension
    pub fn deck_base(&self) -> &str {
        self.deck.trim_end_matches(".inp")
    }
}

/// Parses the input json into a JsonValue object
fn load_input_file(input_file: &str) -> Result<JsonValue, ShapeshiftError> {
    let file_string = match std::fs::read_to_string(input_file) {
        Ok(f) => f,
        Err(_err) => {
            return Err(ShapeshiftError::Input(format!(
                "Unable to open input file {}",
                input_file
            )))
        }
    };

    match json::parse(&file_string) {
        Ok(f) => Ok(f),
        Err(err) => Err(ShapeshiftError::Input(format!(
            "Error in input file json: {err}"
        ))),
    }
}

/// Parses the move-limit list, validating bounds and node-set disjointness
fn parse_move_limits(limits_json: &JsonValue) -> Result<Vec<MoveLimit>, ShapeshiftError> {
    let mut limits: Vec<MoveLimit> = Vec::new();
    let mut seen: BTreeSet<NodeId> = BTreeSet::new();

    for (i, limit_json) in limits_json.members().enumerate() {
        let lower = match limit_json["lower"].as_f64() {
            Some(v) if v <= 0.0 => v,
            _ => {
                return Err(ShapeshiftError::Input(format!(
                    "Move limit {} needs a lower bound <= 0",
                    i
                )))
            }
        };
        let upper = match limit_json["upper"].as_f64() {
            Some(v) if v >= 0.0 => v,
            _ => {
                return Err(ShapeshiftError::Input(format!(
                    "Move limit {} needs an upper bound >= 0",
                    i
                )))
            }
        };

        let mut nodes: BTreeSet<NodeId> = BTreeSet::new();
        for node_json in limit_json["nodes"].members() {
            let node = match node_json.as_u64() {
                Some(n) if n > 0 => n,
                _ => {
                    return Err(ShapeshiftError::Input(format!(
                        "Move limit {} has a non-positive node id",
                        i
                    )))
                }
            };
            if !seen.insert(node) {
                return Err(ShapeshiftError::Input(format!(
                    "Node {} appears in more than one move limit",
                    node
                )));
            }
            nodes.insert(node);
        }
        if nodes.is_empty() {
            return Err(ShapeshiftError::Input(format!(
                "Move limit {} names no nodes",
                i
            )));
        }

        limits.push(MoveLimit { lower, upper, nodes });
    }

    Ok(limits)
}

/// Loads and validates the run configuration
///
/// # Arguments
/// * `input_file` - Path to the run-configuration json
///
/// # Returns
/// A RunConfig instance
pub fn load_config(input_file: &str) -> Result<RunConfig, ShapeshiftError> {
    let input_json = load_input_file(input_file)?;

    for key in ["deck", "solver", "max_shift", "goal", "sensitivity", "max_iterations"] {
        if !input_json.has_key(key) {
            return Err(ShapeshiftError::Input(format!(
                "Input json missing {} field",
                key
            )));
        }
    }

    let deck = match input_json["deck"].as_str() {
        Some(d) if d.ends_with(".inp") => d.to_string(),
        _ => {
            return Err(ShapeshiftError::Input(
                "deck must be a file name ending in .inp".to_string(),
            ))
        }
    };

    let solver_path = match input_json["solver"].as_str() {
        Some(s) => s.to_string(),
        None => return Err(ShapeshiftError::Input("Bad value for solver".to_string())),
    };

    let working_dir = match input_json["working_dir"].as_str() {
        Some(d) => PathBuf::from(d),
        None => PathBuf::from("."),
    };

    let cpu_threads = if input_json.has_key("cpu_threads") {
        let threads_json = &input_json["cpu_threads"];
        if threads_json.as_str() == Some("all") {
            available_threads()
        } else {
            match threads_json.as_usize() {
                Some(n) if n > 0 => n,
                _ => {
                    return Err(ShapeshiftError::Input(
                        "cpu_threads must be \"all\" or a positive integer".to_string(),
                    ))
                }
            }
        }
    } else {
        available_threads()
    };

    let max_shift = match input_json["max_shift"].as_f64() {
        Some(v) if v > 0.0 => v,
        _ => {
            return Err(ShapeshiftError::Input(
                "max_shift must be a positive number".to_string(),
            ))
        }
    };

    let goal = match input_json["goal"].as_str() {
        Some("minimize") => Goal::Minimize,
        Some("maximize") => Goal::Maximize,
        _ => {
            return Err(ShapeshiftError::Input(
                "goal must be \"minimize\" or \"maximize\"".to_string(),
            ))
        }
    };

    let sensitivity = match input_json["sensitivity"].as_str() {
        Some(token) => SensitivityKind::from_token(token)?,
        None => {
            return Err(ShapeshiftError::Input(
                "Bad value for sensitivity".to_string(),
            ))
        }
    };

    let max_iterations = match input_json["max_iterations"].as_u32() {
        Some(n) => n,
        None => {
            return Err(ShapeshiftError::Input(
                "max_iterations must be a non-negative integer".to_string(),
            ))
        }
    };

    let tolerance = if input_json.has_key("tolerance") {
        match input_json["tolerance"].as_f64() {
            Some(v) if v > 0.0 => Some(v),
            _ => {
                return Err(ShapeshiftError::Input(
                    "tolerance must be a positive number".to_string(),
                ))
            }
        }
    } else {
        None
    };

    let move_limits = if input_json.has_key("move_limits") {
        parse_move_limits(&input_json["move_limits"])?
    } else {
        Vec::new()
    };

    let config = RunConfig {
        working_dir,
        deck,
        solver_path,
        cpu_threads,
        max_shift,
        goal,
        sensitivity,
        max_iterations,
        tolerance,
        move_limits,
    };

    println!(
        "info: loaded configuration for deck {} ({} move limits)",
        config.deck,
        config.move_limits.len()
    );

    Ok(config)
}

fn available_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
