use std::collections::BTreeMap;

use nalgebra::Vector3;

use crate::{
    datatypes::{MoveLimit, NodeId},
    error::ShapeshiftError,
};

/// Computes the per-node boundary shift from a sensitivity field
///
/// Every node with a nonzero sensitivity `s` gets a displacement along its
/// surface normal with signed magnitude `sign * s * cap`. For nodes under a
/// move limit the magnitude is clamped into the remaining cumulative budget
/// `[lower - cumulative, upper - cumulative]`, so the running total can
/// never leave `[lower, upper]`; the clamped increment is added to the
/// caller-owned cumulative tracker, which must persist across iterations.
/// A node pinned at its bound gets a zero shift and stays in the output.
/// Zero-sensitivity nodes are excluded entirely.
///
/// # Arguments
/// * `sensitivities` - Node id → sensitivity value for the selected kind
/// * `normals` - Node id → outward surface normal from the same result file
/// * `sign` - -1.0 for minimization, 1.0 for maximization
/// * `cap` - Global per-iteration shift magnitude cap
/// * `limits` - Move-limit constraints with disjoint node sets
/// * `cumulative` - Running signed shift per constrained node, mutated in place
///
/// # Returns
/// Node id → 3D boundary-shift vector
pub fn compute_boundary_shift(
    sensitivities: &BTreeMap<NodeId, f64>,
    normals: &BTreeMap<NodeId, Vector3<f64>>,
    sign: f64,
    cap: f64,
    limits: &[MoveLimit],
    cumulative: &mut BTreeMap<NodeId, f64>,
) -> Result<BTreeMap<NodeId, Vector3<f64>>, ShapeshiftError> {
    let mut shift: BTreeMap<NodeId, Vector3<f64>> = BTreeMap::new();

    for (&node, &s) in sensitivities {
        if s == 0.0 {
            continue;
        }

        let normal = match normals.get(&node) {
            Some(n) => n,
            None => {
                return Err(ShapeshiftError::Format(format!(
                    "Node {} has a sensitivity but no surface normal",
                    node
                )))
            }
        };

        let desired = sign * s * cap;

        match limits.iter().find(|l| l.nodes.contains(&node)) {
            Some(limit) => {
                let total = cumulative.entry(node).or_insert(0.0);
                let applied = desired.clamp(limit.lower - *total, limit.upper - *total);
                *total += applied;
                shift.insert(node, normal * applied);
            }
            None => {
                shift.insert(node, normal * desired);
            }
        }
    }

    Ok(shift)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn limit(lower: f64, upper: f64, nodes: &[NodeId]) -> MoveLimit {
        MoveLimit {
            lower,
            upper,
            nodes: nodes.iter().copied().collect::<BTreeSet<_>>(),
        }
    }

    #[test]
    fn unconstrained_shift_scales_with_sensitivity() {
        // minimization, senstre on node 1, zero sensitivity on node 2
        let sensitivities = BTreeMap::from([(1, 2.0), (2, 0.0)]);
        let normals = BTreeMap::from([(1, Vector3::new(0.0, 1.0, 0.0))]);
        let mut cumulative = BTreeMap::new();

        let shift =
            compute_boundary_shift(&sensitivities, &normals, -1.0, 0.1, &[], &mut cumulative)
                .unwrap();

        assert_eq!(shift.len(), 1);
        assert_eq!(shift[&1], Vector3::new(0.0, -0.2, 0.0));
        assert!(!shift.contains_key(&2));
        assert!(cumulative.is_empty());
    }

    #[test]
    fn move_limit_clamps_to_remaining_budget() {
        // growing toward the upper bound with only 0.1 of budget left
        let sensitivities = BTreeMap::from([(1, -3.0)]);
        let normals = BTreeMap::from([(1, Vector3::new(1.0, 0.0, 0.0))]);
        let limits = [limit(-1.0, 1.0, &[1])];
        let mut cumulative = BTreeMap::from([(1, 0.9)]);

        let shift =
            compute_boundary_shift(&sensitivities, &normals, -1.0, 0.5, &limits, &mut cumulative)
                .unwrap();

        assert!((shift[&1].x - 0.1).abs() < 1e-12);
        assert!((cumulative[&1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn node_at_bound_is_pinned_with_zero_shift() {
        let sensitivities = BTreeMap::from([(1, -3.0)]);
        let normals = BTreeMap::from([(1, Vector3::new(1.0, 0.0, 0.0))]);
        let limits = [limit(-1.0, 1.0, &[1])];
        let mut cumulative = BTreeMap::from([(1, 1.0)]);

        let shift =
            compute_boundary_shift(&sensitivities, &normals, -1.0, 0.5, &limits, &mut cumulative)
                .unwrap();

        assert_eq!(shift[&1], Vector3::new(0.0, 0.0, 0.0));
        assert_eq!(cumulative[&1], 1.0);
    }

    #[test]
    fn cumulative_stays_within_bounds_for_arbitrary_sequences() {
        let normals = BTreeMap::from([(1, Vector3::new(0.0, 0.0, 1.0))]);
        let limits = [limit(-0.3, 0.5, &[1])];
        let mut cumulative = BTreeMap::from([(1, 0.0)]);

        // alternating grow/shrink with magnitudes large enough to overshoot
        let sequence = [4.0, -7.5, 2.2, -0.3, 9.0, -1.1, 0.7, -6.0, 3.3, 5.0];
        for s in sequence {
            let sensitivities = BTreeMap::from([(1, s)]);
            compute_boundary_shift(&sensitivities, &normals, 1.0, 0.2, &limits, &mut cumulative)
                .unwrap();
            let total = cumulative[&1];
            assert!(
                total >= -0.3 - 1e-12 && total <= 0.5 + 1e-12,
                "cumulative {} left [-0.3, 0.5]",
                total
            );
        }
    }

    #[test]
    fn shrinking_respects_lower_bound() {
        let sensitivities = BTreeMap::from([(1, 2.0)]);
        let normals = BTreeMap::from([(1, Vector3::new(0.0, 1.0, 0.0))]);
        let limits = [limit(-0.25, 1.0, &[1])];
        let mut cumulative = BTreeMap::from([(1, -0.2)]);

        // desired = -1 * 2.0 * 0.5 = -1.0, but only -0.05 of budget remains
        let shift =
            compute_boundary_shift(&sensitivities, &normals, -1.0, 0.5, &limits, &mut cumulative)
                .unwrap();

        assert!((shift[&1].y - (-0.05)).abs() < 1e-12);
        assert!((cumulative[&1] - (-0.25)).abs() < 1e-12);
    }

    #[test]
    fn sensitivity_without_normal_is_format_error() {
        let sensitivities = BTreeMap::from([(1, 2.0)]);
        let normals = BTreeMap::new();
        let mut cumulative = BTreeMap::new();

        let err = compute_boundary_shift(&sensitivities, &normals, -1.0, 0.1, &[], &mut cumulative)
            .unwrap_err();
        assert!(matches!(err, ShapeshiftError::Format(_)));
    }
}
