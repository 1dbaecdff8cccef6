use std::collections::BTreeMap;
use std::path::Path;

use nalgebra::Vector3;

use crate::{
    datatypes::NodeId,
    error::ShapeshiftError,
    formats::{deck_keyword_is, DECK_STEP_KEYWORD},
    mesh,
};

/// Builds the helper deck that converts a boundary shift into displacements
///
/// The primary deck is copied verbatim up to (not including) its first
/// analysis step. The original steps are replaced by an include of the
/// solver-generated equation file, a *BOUNDARY block prescribing the shift
/// per node and axis, and a single static step requesting displacement
/// output. The helper run is a throwaway probe, never a full analysis.
///
/// # Arguments
/// * `primary_text` - Contents of the current iteration's primary deck
/// * `primary_base` - Base name of the primary deck, used for the .equ include
/// * `boundary_shift` - Node id → prescribed-displacement vector
///
/// # Returns
/// The helper deck text
pub fn write_helper_deck(
    primary_text: &str,
    primary_base: &str,
    boundary_shift: &BTreeMap<NodeId, Vector3<f64>>,
) -> Result<String, ShapeshiftError> {
    let mut out = String::with_capacity(primary_text.len());
    let mut found_step = false;

    for line in primary_text.lines() {
        if deck_keyword_is(line, DECK_STEP_KEYWORD) {
            found_step = true;
            break;
        }
        out.push_str(line);
        out.push('\n');
    }

    if !found_step {
        return Err(ShapeshiftError::Format(format!(
            "Primary deck {} has no analysis step to replace",
            primary_base
        )));
    }

    out.push('\n');
    out.push_str(&format!("*INCLUDE,INPUT={}.equ\n", primary_base));
    out.push_str("*BOUNDARY\n");
    for (node, shift) in boundary_shift {
        out.push_str(&format!("{} ,1,1, {}\n", node, shift.x));
        out.push_str(&format!("{} ,2,2, {}\n", node, shift.y));
        out.push_str(&format!("{} ,3,3, {}\n", node, shift.z));
    }
    out.push_str("*STEP\n*STATIC\n*NODE FILE\nU\n*END STEP\n");

    Ok(out)
}

/// Re-emits the original deck with updated node coordinates
///
/// Each iteration restarts from the original analysis recipe; only the
/// geometry changes.
pub fn write_next_deck(
    original_text: &str,
    nodes: &BTreeMap<NodeId, Vector3<f64>>,
) -> Result<String, ShapeshiftError> {
    mesh::render_deck(original_text, nodes)
}

/// Writes a deck to disk
pub fn save_deck(path: &Path, deck_text: &str) -> Result<(), ShapeshiftError> {
    std::fs::write(path, deck_text).map_err(|err| {
        ShapeshiftError::Solver(format!("Failed to write deck {}: {}", path.display(), err))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRIMARY: &str = "\
*NODE, NSET=Nall
1, 0.0, 0.0, 0.0
2, 1.0, 0.0, 0.0
*ELEMENT, TYPE=C3D4, ELSET=Eall
1, 1, 2, 2, 2
*STEP
*STATIC
*CLOAD
1, 2, -100.0
*END STEP
*STEP
*FREQUENCY
*END STEP
";

    #[test]
    fn helper_deck_replaces_all_steps() {
        let shift = BTreeMap::from([
            (1, Vector3::new(0.0, -0.2, 0.0)),
            (2, Vector3::new(0.1, 0.0, 0.05)),
        ]);

        let helper = write_helper_deck(PRIMARY, "file003", &shift).unwrap();

        let expected = "\
*NODE, NSET=Nall
1, 0.0, 0.0, 0.0
2, 1.0, 0.0, 0.0
*ELEMENT, TYPE=C3D4, ELSET=Eall
1, 1, 2, 2, 2

*INCLUDE,INPUT=file003.equ
*BOUNDARY
1 ,1,1, 0
1 ,2,2, -0.2
1 ,3,3, 0
2 ,1,1, 0.1
2 ,2,2, 0
2 ,3,3, 0.05
*STEP
*STATIC
*NODE FILE
U
*END STEP
";
        assert_eq!(helper, expected);

        // nothing from the original steps survives
        assert!(!helper.contains("*CLOAD"));
        assert!(!helper.contains("*FREQUENCY"));
    }

    #[test]
    fn stepless_deck_is_format_error() {
        let err = write_helper_deck("*NODE\n1, 0, 0, 0\n", "opt1", &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, ShapeshiftError::Format(_)));
    }

    #[test]
    fn next_deck_keeps_original_steps() {
        let nodes = BTreeMap::from([
            (1, Vector3::new(0.0, -0.2, 0.0)),
            (2, Vector3::new(1.1, 0.0, 0.05)),
        ]);

        let next = write_next_deck(PRIMARY, &nodes).unwrap();

        assert!(next.contains("*CLOAD"));
        assert!(next.contains("*FREQUENCY"));
        assert!(next.contains(&format!("1, {:.15e}, {:.15e}, {:.15e}", 0.0, -0.2, 0.0)));
    }
}
