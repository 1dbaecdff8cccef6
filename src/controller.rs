use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use indicatif::ProgressBar;
use nalgebra::Vector3;

use crate::{
    config::RunConfig,
    datatypes::{NodeId, ObjectiveSet},
    deck,
    error::ShapeshiftError,
    mesh, results, shift,
};

/// External structural-analysis solver invoked once per deck
///
/// The call is side-effect only: the solver is expected to leave
/// `<base>.dat`, `<base>.frd` and (for primary runs) `<base>.equ` in the
/// working directory. Exit status is not inspected; missing output files
/// are the failure signal.
pub trait Solver {
    fn run(&self, working_dir: &Path, deck_base: &str) -> Result<(), ShapeshiftError>;
}

impl<T: Solver> Solver for &T {
    fn run(&self, working_dir: &Path, deck_base: &str) -> Result<(), ShapeshiftError> {
        (*self).run(working_dir, deck_base)
    }
}

/// Production solver runner spawning the configured CalculiX executable
pub struct CalculixRunner {
    pub executable: String,
    pub cpu_threads: usize,
}

impl Solver for CalculixRunner {
    fn run(&self, working_dir: &Path, deck_base: &str) -> Result<(), ShapeshiftError> {
        println!("info: running {} {}", self.executable, deck_base);
        match std::process::Command::new(&self.executable)
            .arg(deck_base)
            .current_dir(working_dir)
            .env("OMP_NUM_THREADS", self.cpu_threads.to_string())
            .status()
        {
            // a nonzero exit is tolerated; missing outputs surface later
            Ok(_status) => Ok(()),
            Err(err) => Err(ShapeshiftError::Solver(format!(
                "Failed to spawn {}: {}",
                self.executable, err
            ))),
        }
    }
}

/// How a completed optimization run ended
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Consecutive objective sets agreed within the configured tolerance
    Converged,
    /// The configured iteration cap was reached
    IterationCapReached,
}

/// Appending run log persisted next to the initial deck
struct RunLog {
    path: PathBuf,
}

impl RunLog {
    fn new(working_dir: &Path, deck_base: &str) -> RunLog {
        RunLog {
            path: working_dir.join(format!("{}.log", deck_base)),
        }
    }

    fn append(&self, msg: &str) {
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| f.write_all(msg.as_bytes()));
        if let Err(err) = result {
            println!("warning: could not write run log {}: {}", self.path.display(), err);
        }
    }
}

/// True when every previous objective value matches the current one within
/// the tolerance. A key that disappeared from the current set counts as not
/// converged.
pub fn objectives_converged(
    previous: &ObjectiveSet,
    current: &ObjectiveSet,
    tolerance: f64,
) -> bool {
    previous.iter().all(|(name, prev_value)| match current.get(name) {
        Some(value) => (value - prev_value).abs() <= tolerance,
        None => false,
    })
}

/// Owns the optimization loop: solver invocations, convergence decisions,
/// cumulative move budgets and geometry updates.
pub struct Controller<'a, S: Solver> {
    config: &'a RunConfig,
    solver: S,
    nodes: BTreeMap<NodeId, Vector3<f64>>,
    cumulative: BTreeMap<NodeId, f64>,
    iteration: u32,
    previous_objectives: Option<ObjectiveSet>,
    original_deck_text: String,
    log: RunLog,
}

impl<'a, S: Solver> Controller<'a, S> {
    /// Loads the initial mesh and seeds the cumulative move tracker
    ///
    /// A missing or unreadable initial deck aborts the run before any
    /// iteration and is recorded in the run log.
    pub fn new(config: &'a RunConfig, solver: S) -> Result<Controller<'a, S>, ShapeshiftError> {
        let log = RunLog::new(&config.working_dir, config.deck_base());
        log.append(&format!(
            "\n---------------------------------------------------\ndeck = {}\nStart at    {}\n\n",
            config.deck,
            chrono::Local::now().format("%c")
        ));

        let deck_path = config.working_dir.join(&config.deck);
        let nodes = match mesh::load_deck(&deck_path) {
            Ok(n) => n,
            Err(err) => {
                log.append(&format!("\nERROR: {}\n", err));
                return Err(err);
            }
        };
        println!("info: loaded {} nodes from {}", nodes.len(), config.deck);

        let original_deck_text = match std::fs::read_to_string(&deck_path) {
            Ok(t) => t,
            Err(err) => {
                return Err(ShapeshiftError::Load(format!(
                    "Cannot re-read initial deck {}: {}",
                    deck_path.display(),
                    err
                )))
            }
        };

        let mut cumulative = BTreeMap::new();
        for limit in &config.move_limits {
            for &node in &limit.nodes {
                cumulative.insert(node, 0.0);
            }
        }

        Ok(Controller {
            config,
            solver,
            nodes,
            cumulative,
            iteration: 0,
            previous_objectives: None,
            original_deck_text,
            log,
        })
    }

    /// Current node positions
    pub fn nodes(&self) -> &BTreeMap<NodeId, Vector3<f64>> {
        &self.nodes
    }

    /// Runs the optimization loop to completion
    pub fn run(&mut self) -> Result<Outcome, ShapeshiftError> {
        let start = Instant::now();
        let bar = ProgressBar::new(self.config.max_iterations as u64 + 1);

        let outcome = self.run_loop(&bar);
        bar.finish_and_clear();

        match &outcome {
            Ok(Outcome::Converged) => {
                println!("info: converged after {} iterations", self.iteration)
            }
            Ok(Outcome::IterationCapReached) => {
                println!("info: iteration cap of {} reached", self.config.max_iterations)
            }
            Err(err) => self.log.append(&format!("\nERROR: {}\n", err)),
        }
        self.log_total_time(start);

        outcome
    }

    fn run_loop(&mut self, bar: &ProgressBar) -> Result<Outcome, ShapeshiftError> {
        let mut deck_base = self.config.deck_base().to_string();
        let mut wrote_table_header = false;

        loop {
            // primary analysis producing objectives, normals and sensitivities
            self.solver.run(&self.config.working_dir, &deck_base)?;

            let report = self.read_solver_output(&format!("{}.dat", deck_base))?;
            let objectives = results::read_objectives(&report)?;
            if objectives.is_empty() {
                return Err(ShapeshiftError::MissingData(
                    "objectives not found / mesh too distorted".to_string(),
                ));
            }
            self.log_objectives(&objectives, &mut wrote_table_header);

            if self.iteration > self.config.max_iterations {
                return Ok(Outcome::IterationCapReached);
            }
            if let (Some(tolerance), Some(previous)) =
                (self.config.tolerance, &self.previous_objectives)
            {
                if objectives_converged(previous, &objectives, tolerance) {
                    return Ok(Outcome::Converged);
                }
            }
            self.previous_objectives = Some(objectives);

            self.design_update(&deck_base)?;

            self.iteration += 1;
            deck_base = format!("file{:03}", self.iteration);
            let next_deck = deck::write_next_deck(&self.original_deck_text, &self.nodes)?;
            deck::save_deck(
                &self.config.working_dir.join(format!("{}.inp", deck_base)),
                &next_deck,
            )?;
            bar.inc(1);
        }
    }

    /// One shape update: read surface data, compute the boundary shift,
    /// probe it through the helper analysis and apply the resulting
    /// displacements to the mesh.
    fn design_update(&mut self, deck_base: &str) -> Result<(), ShapeshiftError> {
        let result_text = self.read_solver_output(&format!("{}.frd", deck_base))?;
        let (normals, sensitivities) = results::read_surface_data(&result_text)?;

        let field = match sensitivities.get(&self.config.sensitivity) {
            Some(f) => f,
            None => {
                return Err(ShapeshiftError::MissingData(format!(
                    "Sensitivity {} absent from {}.frd",
                    self.config.sensitivity, deck_base
                )))
            }
        };

        let boundary_shift = shift::compute_boundary_shift(
            field,
            &normals,
            self.config.goal.sign(),
            self.config.max_shift,
            &self.config.move_limits,
            &mut self.cumulative,
        )?;
        println!(
            "info: shifting {} of {} nodes",
            boundary_shift.len(),
            self.nodes.len()
        );

        // helper probe: same model, one static step loaded with the shift
        let primary_text = self.read_solver_output(&format!("{}.inp", deck_base))?;
        let helper_base = format!("{}_h", deck_base);
        let helper_text = deck::write_helper_deck(&primary_text, deck_base, &boundary_shift)?;
        deck::save_deck(
            &self.config.working_dir.join(format!("{}.inp", helper_base)),
            &helper_text,
        )?;
        self.solver.run(&self.config.working_dir, &helper_base)?;

        let helper_result = self.read_solver_output(&format!("{}.frd", helper_base))?;
        let displacements = results::read_displacements(&helper_result)?;
        for (node, displacement) in displacements {
            match self.nodes.get_mut(&node) {
                Some(position) => *position += displacement,
                None => {
                    return Err(ShapeshiftError::Format(format!(
                        "Helper result reports displacement for unknown node {}",
                        node
                    )))
                }
            }
        }

        Ok(())
    }

    fn read_solver_output(&self, file: &str) -> Result<String, ShapeshiftError> {
        let path = self.config.working_dir.join(file);
        std::fs::read_to_string(&path).map_err(|_| {
            ShapeshiftError::MissingData(format!(
                "Expected solver output {} is missing",
                path.display()
            ))
        })
    }

    /// Appends one row of the per-iteration objective table to the run log
    fn log_objectives(&self, objectives: &ObjectiveSet, wrote_header: &mut bool) {
        let mut msg = String::new();
        if !*wrote_header {
            msg.push_str("Objectives\n  i");
            for name in objectives.keys() {
                msg.push_str(&format!(" {:>13}", name));
            }
            msg.push('\n');
            *wrote_header = true;
        }
        msg.push_str(&format!("{:>3}", self.iteration));
        for value in objectives.values() {
            msg.push_str(&format!(" {:.7e}", value));
        }
        msg.push('\n');
        self.log.append(&msg);
    }

    fn log_total_time(&self, start: Instant) {
        let total = start.elapsed().as_secs();
        let msg = format!(
            "\nFinished at  {}\nTotal time   {} h {} min {} s\n",
            chrono::Local::now().format("%c"),
            total / 3600,
            (total % 3600) / 60,
            total % 60
        );
        self.log.append(&msg);
        println!("info: total time {} h {} min {} s", total / 3600, (total % 3600) / 60, total % 60);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::{Goal, SensitivityKind};
    use std::cell::RefCell;

    const DECK: &str = "\
*NODE, NSET=Nall
1, 0.0, 0.0, 0.0
2, 1.0, 0.0, 0.0
*STEP
*STATIC
*END STEP
";

    const DAT_WITH_STRESS: &str = "

 OBJECTIVE: STRESS

  1.0000000E+02

";

    const FRD_WITH_SENSTRE: &str = "
 -4  NORM        4    1
 -1         1 0.00000E+00 1.00000E+00 0.00000E+00
 -1         2 1.00000E+00 0.00000E+00 0.00000E+00
 -3
 -4  SENSTRE     1    1
 -1         1 0.00000E+00 2.00000E+00
 -1         2 0.00000E+00 0.00000E+00
 -3
";

    const FRD_HELPER: &str = "
 -4  DISP        4    1
 -1         1 0.00000E+00-2.00000E-01 0.00000E+00
 -3
";

    /// Test double that plays the external solver by dropping canned
    /// artifacts into the working directory.
    struct MockSolver {
        calls: RefCell<Vec<String>>,
        dat: &'static str,
        frd: &'static str,
    }

    impl MockSolver {
        fn new(dat: &'static str, frd: &'static str) -> MockSolver {
            MockSolver {
                calls: RefCell::new(Vec::new()),
                dat,
                frd,
            }
        }
    }

    impl Solver for MockSolver {
        fn run(&self, working_dir: &Path, deck_base: &str) -> Result<(), ShapeshiftError> {
            self.calls.borrow_mut().push(deck_base.to_string());
            if deck_base.ends_with("_h") {
                std::fs::write(working_dir.join(format!("{}.frd", deck_base)), FRD_HELPER)
                    .unwrap();
            } else {
                std::fs::write(working_dir.join(format!("{}.dat", deck_base)), self.dat).unwrap();
                std::fs::write(working_dir.join(format!("{}.frd", deck_base)), self.frd).unwrap();
            }
            Ok(())
        }
    }

    fn setup(dir_name: &str) -> RunConfig {
        let working_dir = std::env::temp_dir().join(dir_name);
        std::fs::create_dir_all(&working_dir).unwrap();
        std::fs::write(working_dir.join("opt1.inp"), DECK).unwrap();

        RunConfig {
            working_dir,
            deck: "opt1.inp".to_string(),
            solver_path: "unused".to_string(),
            cpu_threads: 1,
            max_shift: 0.1,
            goal: Goal::Minimize,
            sensitivity: SensitivityKind::Stress,
            max_iterations: 3,
            tolerance: None,
            move_limits: Vec::new(),
        }
    }

    #[test]
    fn empty_objectives_fail_the_run() {
        let config = setup("shapeshift_ctrl_empty_obj");
        let solver = MockSolver::new(" solver chatter, no markers\n", FRD_WITH_SENSTRE);

        let mut controller = Controller::new(&config, &solver).unwrap();
        let err = controller.run().unwrap_err();

        assert!(matches!(err, ShapeshiftError::MissingData(_)));
        assert_eq!(solver.calls.borrow().len(), 1);
    }

    #[test]
    fn absent_sensitivity_kind_fails_the_run() {
        let mut config = setup("shapeshift_ctrl_absent_kind");
        config.sensitivity = SensitivityKind::ShapeEnergy;
        let solver = MockSolver::new(DAT_WITH_STRESS, FRD_WITH_SENSTRE);

        let mut controller = Controller::new(&config, &solver).unwrap();
        let err = controller.run().unwrap_err();

        match err {
            ShapeshiftError::MissingData(msg) => assert!(msg.contains("senener")),
            other => panic!("expected MissingData, got {}", other),
        }
        // the helper analysis never runs
        assert_eq!(*solver.calls.borrow(), vec!["opt1".to_string()]);
    }

    #[test]
    fn stable_objectives_converge_without_extra_invocation() {
        let mut config = setup("shapeshift_ctrl_converge");
        config.tolerance = Some(1e-3);
        let solver = MockSolver::new(DAT_WITH_STRESS, FRD_WITH_SENSTRE);

        let mut controller = Controller::new(&config, &solver).unwrap();
        let outcome = controller.run().unwrap();

        assert_eq!(outcome, Outcome::Converged);
        // one full iteration, then the second primary read settles it
        assert_eq!(
            *solver.calls.borrow(),
            vec!["opt1".to_string(), "opt1_h".to_string(), "file001".to_string()]
        );
    }

    #[test]
    fn iteration_cap_stops_the_run_and_geometry_accumulates() {
        let mut config = setup("shapeshift_ctrl_cap");
        config.max_iterations = 0;
        let solver = MockSolver::new(DAT_WITH_STRESS, FRD_WITH_SENSTRE);

        let mut controller = Controller::new(&config, &solver).unwrap();
        let outcome = controller.run().unwrap();

        assert_eq!(outcome, Outcome::IterationCapReached);
        // iteration 0 runs in full before the cap check trips on iteration 1
        assert_eq!(
            *solver.calls.borrow(),
            vec!["opt1".to_string(), "opt1_h".to_string(), "file001".to_string()]
        );
        // helper displacement (0, -0.2, 0) applied onto node 1
        assert_eq!(controller.nodes()[&1], Vector3::new(0.0, -0.2, 0.0));
        assert_eq!(controller.nodes()[&2], Vector3::new(1.0, 0.0, 0.0));

        // the next-iteration deck was written from the original template
        let next = std::fs::read_to_string(config.working_dir.join("file001.inp")).unwrap();
        assert!(next.contains("*STATIC"));
    }

    #[test]
    fn run_log_records_timestamps_and_objective_table() {
        let mut config = setup("shapeshift_ctrl_log");
        config.max_iterations = 0;
        let solver = MockSolver::new(DAT_WITH_STRESS, FRD_WITH_SENSTRE);

        let mut controller = Controller::new(&config, &solver).unwrap();
        controller.run().unwrap();

        let log = std::fs::read_to_string(config.working_dir.join("opt1.log")).unwrap();
        assert!(log.contains("Start at"));
        assert!(log.contains("Finished at"));
        assert!(log.contains("Total time"));
        assert!(log.contains("Objectives"));
        assert!(log.contains("STRESS"));
    }

    #[test]
    fn convergence_comparison_covers_all_keys() {
        let previous = ObjectiveSet::from([
            ("STRESS".to_string(), 100.0),
            ("EIGENFREQUENCY1".to_string(), 40.0),
        ]);
        let mut current = previous.clone();
        assert!(objectives_converged(&previous, &current, 1e-6));

        current.insert("STRESS".to_string(), 100.1);
        assert!(!objectives_converged(&previous, &current, 1e-3));
        assert!(objectives_converged(&previous, &current, 0.2));

        current.remove("EIGENFREQUENCY1");
        assert!(!objectives_converged(&previous, &current, 0.2));
    }
}
