use std::collections::BTreeMap;

use nalgebra::Vector3;

use crate::{
    datatypes::{NodeId, ObjectiveSet, SensitivityKind},
    error::ShapeshiftError,
    formats::{
        float_column, node_id_column, DAT_EIGENFREQUENCY_TYPE, DAT_OBJECTIVE_MARKER,
        FRD_BLOCK_END, FRD_BLOCK_START, FRD_DATA_ROW, FRD_DISP_BLOCK, FRD_FIELD_1_COLS,
        FRD_FIELD_2_COLS, FRD_FIELD_3_COLS, FRD_NODE_ID_COLS, FRD_NORM_BLOCK, FRD_PRJGRAD_BLOCK,
        FRD_SENDISA_BLOCK, FRD_SENENER_BLOCK, FRD_SENFREQ_BLOCK, FRD_SENMASS_BLOCK,
        FRD_SENSTRE_BLOCK,
    },
};

/// Reads objective/constraint scalars from a diagnostic report
///
/// Each ` OBJECTIVE:` marker opens a block; the blank line after the marker
/// arms value reading and the next blank line ends it. Eigenfrequency values
/// are keyed with a 1-based occurrence counter that runs across the whole
/// report. An empty result is not an error: callers must treat it as a
/// diverged analysis and stop.
///
/// # Arguments
/// * `report_text` - Contents of the solver's .dat file
///
/// # Returns
/// The objective name → value map, possibly empty
pub fn read_objectives(report_text: &str) -> Result<ObjectiveSet, ShapeshiftError> {
    let mut objectives = ObjectiveSet::new();
    let mut countdown: i32 = 0;
    let mut objective_type = String::new();
    let mut frequency_number: u32 = 1;

    for line in report_text.lines() {
        if line.trim().is_empty() {
            countdown -= 1;
        } else if countdown == 1 {
            let value: f64 = line.trim().parse().map_err(|_| {
                ShapeshiftError::Format(format!(
                    "Non-numeric objective value '{}'",
                    line.trim_end()
                ))
            })?;
            if objective_type == DAT_EIGENFREQUENCY_TYPE {
                objectives.insert(format!("{}{}", objective_type, frequency_number), value);
                frequency_number += 1;
            } else {
                objectives.insert(objective_type.clone(), value);
            }
        } else if line.starts_with(DAT_OBJECTIVE_MARKER) {
            objective_type = match line.split_whitespace().nth(1) {
                Some(t) => t.to_string(),
                None => {
                    return Err(ShapeshiftError::Format(format!(
                        "OBJECTIVE marker without a type token: '{}'",
                        line.trim_end()
                    )))
                }
            };
            countdown = 2;
        }
    }

    Ok(objectives)
}

/// Result block currently being consumed
#[derive(Clone, Copy)]
enum FrdBlock {
    None,
    Normals,
    Sensitivity(SensitivityKind),
}

/// Maps a block marker line to a sensitivity kind, counting SENFREQ blocks
fn sensitivity_block(line: &str, eigen_counter: &mut u32) -> Option<SensitivityKind> {
    if line.starts_with(FRD_SENMASS_BLOCK) {
        Some(SensitivityKind::Mass)
    } else if line.starts_with(FRD_SENSTRE_BLOCK) {
        Some(SensitivityKind::Stress)
    } else if line.starts_with(FRD_SENFREQ_BLOCK) {
        *eigen_counter += 1;
        Some(SensitivityKind::Eigenfrequency(*eigen_counter))
    } else if line.starts_with(FRD_SENENER_BLOCK) {
        Some(SensitivityKind::ShapeEnergy)
    } else if line.starts_with(FRD_SENDISA_BLOCK) {
        Some(SensitivityKind::Displacement)
    } else if line.starts_with(FRD_PRJGRAD_BLOCK) {
        Some(SensitivityKind::ProjectedGradient)
    } else {
        None
    }
}

pub type Normals = BTreeMap<NodeId, Vector3<f64>>;
pub type SensitivityFields = BTreeMap<SensitivityKind, BTreeMap<NodeId, f64>>;

/// Reads surface normals and sensitivity fields from a result file
///
/// A block runs from its ` -4` marker to the next ` -3` end marker or the
/// next block marker. Normal rows carry three 12-character fields;
/// sensitivity rows carry their filtered value in the second field only.
///
/// # Arguments
/// * `result_text` - Contents of the solver's .frd file
///
/// # Returns
/// The per-node normals and the per-kind sensitivity maps; missing
/// sensitivities entirely is a MissingData error
pub fn read_surface_data(
    result_text: &str,
) -> Result<(Normals, SensitivityFields), ShapeshiftError> {
    let mut normals = Normals::new();
    let mut sensitivities = SensitivityFields::new();
    let mut block = FrdBlock::None;
    let mut eigen_counter: u32 = 0;

    for line in result_text.lines() {
        if line.starts_with(FRD_BLOCK_END) {
            block = FrdBlock::None;
        } else if line.starts_with(FRD_NORM_BLOCK) {
            block = FrdBlock::Normals;
        } else if let Some(kind) = sensitivity_block(line, &mut eigen_counter) {
            sensitivities.insert(kind, BTreeMap::new());
            block = FrdBlock::Sensitivity(kind);
        } else if line.starts_with(FRD_BLOCK_START) {
            // some other block (e.g. DISP) opens and ends the current one
            block = FrdBlock::None;
        } else if line.starts_with(FRD_DATA_ROW) {
            match block {
                FrdBlock::Normals => {
                    let id = node_id_column(line, &FRD_NODE_ID_COLS)?;
                    let nx = float_column(line, &FRD_FIELD_1_COLS)?;
                    let ny = float_column(line, &FRD_FIELD_2_COLS)?;
                    let nz = float_column(line, &FRD_FIELD_3_COLS)?;
                    normals.insert(id, Vector3::new(nx, ny, nz));
                }
                FrdBlock::Sensitivity(kind) => {
                    let id = node_id_column(line, &FRD_NODE_ID_COLS)?;
                    let value = float_column(line, &FRD_FIELD_2_COLS)?;
                    if let Some(field) = sensitivities.get_mut(&kind) {
                        field.insert(id, value);
                    }
                }
                _ => {}
            }
        }
    }

    if sensitivities.is_empty() {
        return Err(ShapeshiftError::MissingData(
            "Sensitivities not found in the frd file".to_string(),
        ));
    }

    Ok((normals, sensitivities))
}

/// Reads the nodal-displacement block from a helper-analysis result file
///
/// # Arguments
/// * `result_text` - Contents of the helper run's .frd file
///
/// # Returns
/// A map from node id to incremental 3D displacement
pub fn read_displacements(
    result_text: &str,
) -> Result<BTreeMap<NodeId, Vector3<f64>>, ShapeshiftError> {
    let mut displacements = BTreeMap::new();
    let mut in_block = false;

    for line in result_text.lines() {
        if line.starts_with(FRD_BLOCK_END) {
            in_block = false;
        } else if line.starts_with(FRD_DISP_BLOCK) {
            in_block = true;
        } else if line.starts_with(FRD_BLOCK_START) {
            in_block = false;
        } else if in_block && line.starts_with(FRD_DATA_ROW) {
            let id = node_id_column(line, &FRD_NODE_ID_COLS)?;
            let dx = float_column(line, &FRD_FIELD_1_COLS)?;
            let dy = float_column(line, &FRD_FIELD_2_COLS)?;
            let dz = float_column(line, &FRD_FIELD_3_COLS)?;
            displacements.insert(id, Vector3::new(dx, dy, dz));
        }
    }

    Ok(displacements)
}
