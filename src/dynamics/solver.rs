use std::collections::HashMap;
use std::str::FromStr;

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{CooMatrix, CscMatrix};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::block::{Block, FlatBlock};
use super::integrate::{Program, Workspace};
use super::schedule::{Event, EventQueue, time_grid};
use crate::error::{GridError, GridResult};
use crate::symbolic::{Bindings, Expr, Slot, Symbols, Tape, Var};

/// Time integration scheme used by [`BlockSolver::simulate`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationMethod {
    /// Backward Euler with a Newton corrector on the full DAE.
    #[default]
    ImplicitEuler,
    /// Forward Euler on the states, Newton on the algebraic part.
    Euler,
    /// Classic fourth-order Runge-Kutta, algebraic part re-solved per stage.
    Rk4,
}

impl FromStr for IntegrationMethod {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "implicit_euler" | "backward_euler" => Ok(Self::ImplicitEuler),
            "euler" => Ok(Self::Euler),
            "rk4" => Ok(Self::Rk4),
            _ => Err(GridError::UnknownIntegrationMethod(s.to_owned())),
        }
    }
}

/// Newton settings of the time-domain solver.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationOptions {
    /// Infinity-norm bound on the step residual.
    pub tolerance: f64,
    /// Newton iterations allowed per step (per stage for explicit methods).
    pub max_iter: usize,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-8,
            max_iter: 1000,
        }
    }
}

/// Sparse block of symbolic partial derivatives.
///
/// Entries hold structural non-zeros only, ordered by column then row.
#[derive(Clone, Debug)]
pub struct SymbolicBlock {
    pub nrows: usize,
    pub ncols: usize,
    pub entries: Vec<(usize, usize, Expr)>,
}

impl SymbolicBlock {
    fn build(eqs: &[Expr], wrt: &[Var]) -> Self {
        let column: HashMap<Var, usize> = wrt.iter().enumerate().map(|(i, v)| (*v, i)).collect();
        let mut entries = Vec::new();
        for (row, eq) in eqs.iter().enumerate() {
            for v in eq.variables() {
                let Some(&col) = column.get(&v) else {
                    continue;
                };
                let d = eq.differentiate(v);
                if !d.is_zero() {
                    entries.push((row, col, d));
                }
            }
        }
        entries.sort_by_key(|e| (e.1, e.0));
        Self {
            nrows: eqs.len(),
            ncols: wrt.len(),
            entries,
        }
    }

    pub fn nnz(&self) -> usize {
        self.entries.len()
    }
}

/// The six Jacobian blocks of `x' = f(x, y, p, t)`, `0 = g(x, y, p, t)`.
#[derive(Clone, Debug)]
pub struct SymbolicJacobians {
    pub f_x: SymbolicBlock,
    pub f_y: SymbolicBlock,
    pub g_x: SymbolicBlock,
    pub g_y: SymbolicBlock,
    pub f_p: SymbolicBlock,
    pub g_p: SymbolicBlock,
}

/// Numeric values of [`SymbolicJacobians`] at one point.
#[derive(Clone, Debug)]
pub struct Jacobians {
    pub f_x: CscMatrix<f64>,
    pub f_y: CscMatrix<f64>,
    pub g_x: CscMatrix<f64>,
    pub g_y: CscMatrix<f64>,
    pub f_p: CscMatrix<f64>,
    pub g_p: CscMatrix<f64>,
}

/// Compiled DAE of a block tree.
///
/// Construction flattens the tree and differentiates every equation once.
/// Simulation only compiles and evaluates the stored derivative trees.
pub struct BlockSolver {
    pub(crate) flat: FlatBlock,
    names: Vec<String>,
    param_names: Vec<String>,
    var_idx: HashMap<Var, usize>,
    param_idx: HashMap<Var, usize>,
    pub(crate) jacobians: SymbolicJacobians,
    switch_times: Vec<f64>,
    symbols: Symbols,
    pub options: SimulationOptions,
}

impl BlockSolver {
    /// Flattens `block` and builds the symbolic Jacobians.
    ///
    /// # Arguments
    ///
    /// * `block` - Root of the block tree.
    /// * `symbols` - Arena the block variables were created in (used for names).
    pub fn new(block: &Block, symbols: &Symbols) -> GridResult<Self> {
        let flat = block.flatten()?;
        let vars: Vec<Var> = flat
            .state_vars
            .iter()
            .chain(flat.algebraic_vars.iter())
            .copied()
            .collect();
        let names = vars.iter().map(|v| symbols.display_name(*v)).collect();
        let param_names = flat
            .parameters
            .iter()
            .map(|v| symbols.display_name(*v))
            .collect();
        let var_idx = vars.iter().enumerate().map(|(i, v)| (*v, i)).collect();
        let param_idx = flat
            .parameters
            .iter()
            .enumerate()
            .map(|(i, v)| (*v, i))
            .collect();

        let jacobians = SymbolicJacobians {
            f_x: SymbolicBlock::build(&flat.state_eqs, &flat.state_vars),
            f_y: SymbolicBlock::build(&flat.state_eqs, &flat.algebraic_vars),
            g_x: SymbolicBlock::build(&flat.algebraic_eqs, &flat.state_vars),
            g_y: SymbolicBlock::build(&flat.algebraic_eqs, &flat.algebraic_vars),
            f_p: SymbolicBlock::build(&flat.state_eqs, &flat.parameters),
            g_p: SymbolicBlock::build(&flat.algebraic_eqs, &flat.parameters),
        };

        let mut switch_times: Vec<f64> = flat
            .state_eqs
            .iter()
            .chain(flat.algebraic_eqs.iter())
            .chain(flat.parameters_eqs.iter().flatten())
            .flat_map(|e| e.switch_times())
            .collect();
        switch_times.sort_by(f64::total_cmp);
        switch_times.dedup();

        debug!(
            states = flat.state_vars.len(),
            algebraic = flat.algebraic_vars.len(),
            parameters = flat.parameters.len(),
            nnz_gy = jacobians.g_y.nnz(),
            "block solver compiled"
        );

        Ok(Self {
            flat,
            names,
            param_names,
            var_idx,
            param_idx,
            jacobians,
            switch_times,
            symbols: symbols.clone(),
            options: SimulationOptions::default(),
        })
    }

    pub fn with_options(mut self, options: SimulationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn n_state(&self) -> usize {
        self.flat.state_vars.len()
    }

    pub fn n_algebraic(&self) -> usize {
        self.flat.algebraic_vars.len()
    }

    pub fn n_vars(&self) -> usize {
        self.names.len()
    }

    pub fn n_params(&self) -> usize {
        self.flat.parameters.len()
    }

    /// Names of the state then algebraic variables, in vector order.
    pub fn var_names(&self) -> &[String] {
        &self.names
    }

    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    pub fn symbolic_jacobians(&self) -> &SymbolicJacobians {
        &self.jacobians
    }

    /// Position of `var` in the state/algebraic vector.
    pub fn get_var_idx(&self, var: Var) -> Option<usize> {
        self.var_idx.get(&var).copied()
    }

    pub fn get_param_idx(&self, var: Var) -> Option<usize> {
        self.param_idx.get(&var).copied()
    }

    fn gather<B: Bindings + ?Sized>(
        &self,
        mapping: &B,
        vars: impl Iterator<Item = (Var, String)>,
    ) -> GridResult<Vec<f64>> {
        vars.map(|(v, name)| mapping.value(v).ok_or(GridError::MissingVariable(name)))
            .collect()
    }

    /// Orders a value mapping as states, algebraic variables, then parameters.
    pub fn sort_vars<B: Bindings + ?Sized>(&self, mapping: &B) -> GridResult<DVector<f64>> {
        let mut values: Vec<f64> = self.build_init_vars_vector(mapping)?.iter().copied().collect();
        values.extend(self.build_init_params_vector(mapping)?.iter());
        Ok(DVector::from_vec(values))
    }

    pub fn build_init_vars_vector<B: Bindings + ?Sized>(
        &self,
        mapping: &B,
    ) -> GridResult<DVector<f64>> {
        let vars = self
            .flat
            .state_vars
            .iter()
            .chain(self.flat.algebraic_vars.iter())
            .copied()
            .zip(self.names.iter().cloned());
        Ok(DVector::from_vec(self.gather(mapping, vars)?))
    }

    pub fn build_init_params_vector<B: Bindings + ?Sized>(
        &self,
        mapping: &B,
    ) -> GridResult<DVector<f64>> {
        let vars = self
            .flat
            .parameters
            .iter()
            .copied()
            .zip(self.param_names.iter().cloned());
        Ok(DVector::from_vec(self.gather(mapping, vars)?))
    }

    /// Slot resolver for tapes: registered variables, then parameters, then time.
    pub(crate) fn resolver(&self, time_var: Var) -> impl Fn(Var) -> GridResult<Slot> + '_ {
        move |v: Var| {
            if let Some(i) = self.var_idx.get(&v) {
                Ok(Slot::Var(*i))
            } else if let Some(i) = self.param_idx.get(&v) {
                Ok(Slot::Param(*i))
            } else if v == time_var {
                Ok(Slot::Time)
            } else {
                Err(GridError::UnboundVariable(self.symbols.display_name(v)))
            }
        }
    }

    /// Evaluates all six Jacobian blocks at `(x, p, t)`.
    pub fn evaluate_jacobians(
        &self,
        x: &DVector<f64>,
        p: &DVector<f64>,
        t: f64,
        time_var: Var,
    ) -> GridResult<Jacobians> {
        self.check_dims(x, p)?;
        let resolve = self.resolver(time_var);
        let mut stack = Vec::new();
        let mut eval = |b: &SymbolicBlock| -> GridResult<CscMatrix<f64>> {
            let mut coo = CooMatrix::new(b.nrows, b.ncols);
            for (r, c, e) in &b.entries {
                let tape = Tape::compile(e, &resolve)?;
                coo.push(*r, *c, tape.eval(x.as_slice(), p.as_slice(), t, &mut stack));
            }
            Ok(CscMatrix::from(&coo))
        };
        let j = &self.jacobians;
        Ok(Jacobians {
            f_x: eval(&j.f_x)?,
            f_y: eval(&j.f_y)?,
            g_x: eval(&j.g_x)?,
            g_y: eval(&j.g_y)?,
            f_p: eval(&j.f_p)?,
            g_p: eval(&j.g_p)?,
        })
    }

    fn check_dims(&self, x: &DVector<f64>, p: &DVector<f64>) -> GridResult<()> {
        if x.len() != self.n_vars() {
            return Err(GridError::Dimension {
                what: "initial variables",
                expected: self.n_vars(),
                got: x.len(),
            });
        }
        if p.len() != self.n_params() {
            return Err(GridError::Dimension {
                what: "initial parameters",
                expected: self.n_params(),
                got: p.len(),
            });
        }
        Ok(())
    }

    /// Integrates the DAE from `t0` to `t_end`.
    ///
    /// Every step first refreshes the parameters (their equations at the new
    /// time, then any scheduled event), then advances with `method`. A step
    /// whose Newton corrector does not converge aborts the whole run with
    /// [`GridError::StepDiverged`].
    ///
    /// # Arguments
    ///
    /// * `t0`, `t_end` - Integration window (s).
    /// * `h` - Nominal step (s). Switch instants and event times are added as
    ///   extra step boundaries.
    /// * `x0` - Initial state and algebraic values, in [`Self::var_names`] order.
    /// * `params0` - Initial parameter values.
    /// * `time_var` - Variable standing for time inside the equations.
    /// * `method` - Integration scheme.
    /// * `events` - Scheduled parameter jumps.
    ///
    /// # Returns
    ///
    /// The step boundaries and the trajectory, one row per boundary.
    #[allow(clippy::too_many_arguments)]
    pub fn simulate(
        &self,
        t0: f64,
        t_end: f64,
        h: f64,
        x0: &DVector<f64>,
        params0: &DVector<f64>,
        time_var: Var,
        method: IntegrationMethod,
        events: &[Event],
    ) -> GridResult<(DVector<f64>, DMatrix<f64>)> {
        self.check_dims(x0, params0)?;
        let mut queue = EventQueue::new(events, |v| {
            self.get_param_idx(v)
                .ok_or_else(|| GridError::MissingVariable(self.symbols.display_name(v)))
        })?;
        let mut breakpoints = self.switch_times.clone();
        breakpoints.extend(queue.times());
        let times = time_grid(t0, t_end, h, &breakpoints)?;

        let program = Program::compile(self, time_var)?;
        let mut ws = Workspace::new(&program);
        let n = self.n_vars();

        let mut rows: Vec<f64> = Vec::with_capacity(times.len() * n);
        rows.extend_from_slice(x0.as_slice());
        let mut z = x0.as_slice().to_vec();
        let mut p = params0.as_slice().to_vec();
        let mut overrides = vec![None; p.len()];
        let mut newton_total = 0usize;

        for w in times.windows(2) {
            let (t_prev, t_next) = (w[0], w[1]);
            program.refresh_params(&z, &mut p, t_next, &mut ws.stack);
            queue.advance(t_next, &mut overrides);
            for (pi, o) in p.iter_mut().zip(&overrides) {
                if let Some(v) = o {
                    *pi = *v;
                }
            }
            let iterations = match method {
                IntegrationMethod::ImplicitEuler => {
                    program.implicit_euler_step(&mut ws, &mut z, &p, t_prev, t_next, &self.options)?
                }
                IntegrationMethod::Euler => {
                    program.euler_step(&mut ws, &mut z, &p, t_prev, t_next, &self.options)?
                }
                IntegrationMethod::Rk4 => {
                    program.rk4_step(&mut ws, &mut z, &p, t_prev, t_next, &self.options)?
                }
            };
            newton_total += iterations;
            rows.extend_from_slice(&z);
        }

        info!(
            steps = times.len() - 1,
            newton_iterations = newton_total,
            ?method,
            "simulation finished"
        );
        Ok((
            DVector::from_vec(times.clone()),
            DMatrix::from_row_slice(times.len(), n, &rows),
        ))
    }
}
