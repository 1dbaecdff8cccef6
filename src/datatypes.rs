use std::collections::{BTreeMap, BTreeSet};

use crate::error::ShapeshiftError;

/// Solver-assigned node number, shared across the deck, the diagnostic
/// report, and the result file.
pub type NodeId = u64;

/// Objective/constraint scalars from one diagnostic report, keyed by the
/// objective name. Eigenfrequency objectives carry a 1-based occurrence
/// suffix because the report gives them no other stable identifier.
pub type ObjectiveSet = BTreeMap<String, f64>;

/// Sensitivity field selector matching the solver's result-file block tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SensitivityKind {
    /// Mass sensitivity (SENMASS)
    Mass,
    /// Stress sensitivity (SENSTRE)
    Stress,
    /// Displacement-magnitude sensitivity (SENDISA)
    Displacement,
    /// Shape-energy sensitivity (SENENER)
    ShapeEnergy,
    /// Projected gradient combining objectives and constraints (PRJGRAD)
    ProjectedGradient,
    /// N-th reported eigenfrequency sensitivity (SENFREQ, by block order)
    Eigenfrequency(u32),
}

impl SensitivityKind {
    /// Parses a configuration token like `senstre` or `senfreq2`
    ///
    /// # Arguments
    /// * `token` - The sensitivity selector from the run configuration
    ///
    /// # Returns
    /// The matching kind, or an Input error for unknown tokens
    pub fn from_token(token: &str) -> Result<SensitivityKind, ShapeshiftError> {
        match token {
            "senmass" => Ok(SensitivityKind::Mass),
            "senstre" => Ok(SensitivityKind::Stress),
            "sendisa" => Ok(SensitivityKind::Displacement),
            "senener" => Ok(SensitivityKind::ShapeEnergy),
            "prjgrad" => Ok(SensitivityKind::ProjectedGradient),
            other => {
                if let Some(n_str) = other.strip_prefix("senfreq") {
                    match n_str.parse::<u32>() {
                        Ok(n) if n >= 1 => return Ok(SensitivityKind::Eigenfrequency(n)),
                        _ => {}
                    }
                }
                Err(ShapeshiftError::Input(format!(
                    "Unknown sensitivity selector '{}'",
                    other
                )))
            }
        }
    }
}

impl std::fmt::Display for SensitivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensitivityKind::Mass => write!(f, "senmass"),
            SensitivityKind::Stress => write!(f, "senstre"),
            SensitivityKind::Displacement => write!(f, "sendisa"),
            SensitivityKind::ShapeEnergy => write!(f, "senener"),
            SensitivityKind::ProjectedGradient => write!(f, "prjgrad"),
            SensitivityKind::Eigenfrequency(n) => write!(f, "senfreq{}", n),
        }
    }
}

/// Cumulative move budget for a set of design nodes: the running signed
/// shift of each node along its normal must stay within [lower, upper]
/// over the whole optimization run.
#[derive(Debug, Clone)]
pub struct MoveLimit {
    pub lower: f64,
    pub upper: f64,
    pub nodes: BTreeSet<NodeId>,
}

/// Direction of optimization, mapped to the sign applied to sensitivities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Goal {
    Minimize,
    Maximize,
}

impl Goal {
    pub fn sign(&self) -> f64 {
        match self {
            Goal::Minimize => -1.0,
            Goal::Maximize => 1.0,
        }
    }
}
