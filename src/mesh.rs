use std::collections::BTreeMap;
use std::path::Path;

use nalgebra::Vector3;

use crate::{
    datatypes::NodeId,
    error::ShapeshiftError,
    formats::{
        deck_keyword_is, DECK_COMMENT_PREFIX, DECK_INCLUDE_KEYWORD, DECK_KEYWORD_CHAR,
        DECK_NODE_KEYWORD, DECK_STEP_KEYWORD,
    },
};

/// Line-by-line parser state for the deck's model-definition region
struct DeckParseState {
    model_definition: bool,
    read_node: bool,
}

/// Parses one deck line, collecting node rows into the position map
fn consume_deck_line(
    line: &str,
    state: &mut DeckParseState,
    nodes: &mut BTreeMap<NodeId, Vector3<f64>>,
) -> Result<(), ShapeshiftError> {
    if line.trim().is_empty() {
        return Ok(());
    }

    if line.starts_with(DECK_KEYWORD_CHAR) {
        if line.starts_with(DECK_COMMENT_PREFIX) {
            return Ok(());
        }
        state.read_node = false;
    }

    if deck_keyword_is(line, DECK_NODE_KEYWORD) && state.model_definition {
        state.read_node = true;
    } else if state.read_node {
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() < 4 {
            return Err(ShapeshiftError::Format(format!(
                "Node row with fewer than 4 fields: '{}'",
                line.trim_end()
            )));
        }
        let id: NodeId = fields[0].trim().parse().map_err(|_| {
            ShapeshiftError::Format(format!("Bad node id in row '{}'", line.trim_end()))
        })?;
        let mut coords = [0.0_f64; 3];
        for (slot, field) in coords.iter_mut().zip(&fields[1..4]) {
            *slot = field.trim().parse().map_err(|_| {
                ShapeshiftError::Format(format!(
                    "Non-numeric coordinate in node row '{}'",
                    line.trim_end()
                ))
            })?;
        }
        nodes.insert(id, Vector3::new(coords[0], coords[1], coords[2]));
    } else if deck_keyword_is(line, DECK_STEP_KEYWORD) {
        state.model_definition = false;
    }

    Ok(())
}

/// Extracts the filename argument of an *INCLUDE, INPUT=<file> directive
fn include_target(line: &str) -> Result<&str, ShapeshiftError> {
    match line.find('=') {
        Some(pos) => Ok(line[pos + 1..].trim().trim_matches('"')),
        None => Err(ShapeshiftError::Format(format!(
            "INCLUDE directive without INPUT= argument: '{}'",
            line.trim_end()
        ))),
    }
}

/// Loads node positions from the model-definition region of a deck
///
/// Node blocks after the first analysis-step keyword are ignored. A single
/// level of *INCLUDE splicing is supported, with included files resolved
/// relative to the deck's directory.
///
/// # Arguments
/// * `deck_path` - Path to the model deck
///
/// # Returns
/// A map from node id to 3D position
pub fn load_deck(deck_path: &Path) -> Result<BTreeMap<NodeId, Vector3<f64>>, ShapeshiftError> {
    let contents = match std::fs::read_to_string(deck_path) {
        Ok(c) => c,
        Err(err) => {
            return Err(ShapeshiftError::Load(format!(
                "Initial deck {} not found: {}",
                deck_path.display(),
                err
            )))
        }
    };
    let base_dir = deck_path.parent().unwrap_or_else(|| Path::new("."));

    let mut nodes: BTreeMap<NodeId, Vector3<f64>> = BTreeMap::new();
    let mut state = DeckParseState {
        model_definition: true,
        read_node: false,
    };

    for line in contents.lines() {
        if deck_keyword_is(line, DECK_INCLUDE_KEYWORD) {
            let target = include_target(line)?;
            let included = match std::fs::read_to_string(base_dir.join(target)) {
                Ok(c) => c,
                Err(err) => {
                    return Err(ShapeshiftError::Format(format!(
                        "Cannot open included file {}: {}",
                        target, err
                    )))
                }
            };
            for inc_line in included.lines() {
                if deck_keyword_is(inc_line, DECK_INCLUDE_KEYWORD) {
                    return Err(ShapeshiftError::Format(format!(
                        "Nested INCLUDE in {} is not supported",
                        target
                    )));
                }
                consume_deck_line(inc_line, &mut state, &mut nodes)?;
            }
            continue;
        }
        consume_deck_line(line, &mut state, &mut nodes)?;
    }

    Ok(nodes)
}

/// Re-renders a deck with updated node coordinates
///
/// Node rows in the model-definition region are rewritten from `nodes` in
/// high-precision scientific notation; every other line passes through
/// unchanged, so repeated load/render cycles do not drift.
///
/// # Arguments
/// * `deck_text` - The original deck contents
/// * `nodes` - Updated node positions; must cover every node row in the deck
///
/// # Returns
/// The re-rendered deck text
pub fn render_deck(
    deck_text: &str,
    nodes: &BTreeMap<NodeId, Vector3<f64>>,
) -> Result<String, ShapeshiftError> {
    let mut out = String::with_capacity(deck_text.len());
    let mut model_definition = true;
    let mut rewrite_node = false;

    for line in deck_text.lines() {
        if line.starts_with(DECK_KEYWORD_CHAR) && !line.starts_with(DECK_COMMENT_PREFIX) {
            rewrite_node = false;
        }

        if deck_keyword_is(line, DECK_NODE_KEYWORD) && model_definition {
            rewrite_node = true;
        } else if line.trim().is_empty() {
            // blank lines pass through
        } else if rewrite_node {
            let id_field = line.split(',').next().unwrap_or("");
            let id: NodeId = id_field.trim().parse().map_err(|_| {
                ShapeshiftError::Format(format!("Bad node id in row '{}'", line.trim_end()))
            })?;
            let pos = match nodes.get(&id) {
                Some(p) => p,
                None => {
                    return Err(ShapeshiftError::Format(format!(
                        "Deck node {} has no updated position",
                        id
                    )))
                }
            };
            out.push_str(&format!(
                "{}, {:.15e}, {:.15e}, {:.15e}\n",
                id, pos.x, pos.y, pos.z
            ));
            continue;
        } else if deck_keyword_is(line, DECK_STEP_KEYWORD) {
            model_definition = false;
        }

        out.push_str(line);
        out.push('\n');
    }

    Ok(out)
}
