use tracing::trace;

use super::solver::{BlockSolver, SimulationOptions, SymbolicBlock};
use crate::basic::solver::{DefaultSolver, Solve};
use crate::error::{GridError, GridResult};
use crate::symbolic::{Expr, Tape, Var};

#[derive(Clone, Copy, Debug)]
enum Coef {
    One,
    NegH,
}

enum Contribution {
    Entry(Tape, Coef),
    Identity,
}

/// Fixed CSC pattern of a Newton matrix plus the tapes filling it.
struct NewtonPattern {
    n: usize,
    col_offsets: Vec<usize>,
    row_indices: Vec<usize>,
    entries: Vec<(usize, Tape, Coef)>,
    identity: Vec<usize>,
}

impl NewtonPattern {
    fn build(n: usize, mut contribs: Vec<(usize, usize, Contribution)>) -> Self {
        contribs.sort_by_key(|c| (c.1, c.0));
        let mut col_offsets = vec![0usize; n + 1];
        let mut row_indices = Vec::with_capacity(contribs.len());
        let mut entries = Vec::new();
        let mut identity = Vec::new();
        let mut last = None;
        for (row, col, contrib) in contribs {
            if last != Some((row, col)) {
                row_indices.push(row);
                col_offsets[col + 1] += 1;
                last = Some((row, col));
            }
            let slot = row_indices.len() - 1;
            match contrib {
                Contribution::Entry(tape, coef) => entries.push((slot, tape, coef)),
                Contribution::Identity => identity.push(slot),
            }
        }
        for c in 0..n {
            col_offsets[c + 1] += col_offsets[c];
        }
        Self {
            n,
            col_offsets,
            row_indices,
            entries,
            identity,
        }
    }

    fn nnz(&self) -> usize {
        self.row_indices.len()
    }

    fn assemble(&self, values: &mut [f64], z: &[f64], p: &[f64], t: f64, h: f64, stack: &mut Vec<f64>) {
        values.iter_mut().for_each(|v| *v = 0.0);
        for (slot, tape, coef) in &self.entries {
            let d = tape.eval(z, p, t, stack);
            values[*slot] += match coef {
                Coef::One => d,
                Coef::NegH => -h * d,
            };
        }
        for slot in &self.identity {
            values[*slot] += 1.0;
        }
    }
}

/// Scratch buffers reused by every step of a simulation.
pub(crate) struct Workspace {
    pub(crate) stack: Vec<f64>,
    full: LinearSystem,
    alg: LinearSystem,
    xn: Vec<f64>,
    k: [Vec<f64>; 4],
}

struct LinearSystem {
    ap: Vec<usize>,
    ai: Vec<usize>,
    values: Vec<f64>,
    rhs: Vec<f64>,
    solver: DefaultSolver,
}

impl LinearSystem {
    fn new(pattern: &NewtonPattern) -> Self {
        Self {
            ap: pattern.col_offsets.clone(),
            ai: pattern.row_indices.clone(),
            values: vec![0.0; pattern.nnz()],
            rhs: vec![0.0; pattern.n],
            solver: DefaultSolver::default(),
        }
    }

    fn solve(&mut self) -> Result<(), &'static str> {
        let n = self.rhs.len();
        self.solver
            .solve(&mut self.ap, &mut self.ai, &mut self.values, &mut self.rhs, n)?;
        if self.rhs.iter().all(|v| v.is_finite()) {
            Ok(())
        } else {
            Err("singular matrix")
        }
    }
}

impl Workspace {
    pub(crate) fn new(program: &Program) -> Self {
        let n_x = program.n_x;
        Self {
            stack: Vec::with_capacity(64),
            full: LinearSystem::new(&program.full),
            alg: LinearSystem::new(&program.alg),
            xn: vec![0.0; n_x],
            k: std::array::from_fn(|_| vec![0.0; n_x]),
        }
    }
}

/// Tapes of the flattened DAE and of its Newton matrices.
pub(crate) struct Program {
    n_x: usize,
    n_y: usize,
    f: Vec<Tape>,
    g: Vec<Tape>,
    param_eqs: Vec<Option<Tape>>,
    full: NewtonPattern,
    alg: NewtonPattern,
}

fn diverged(time: f64, iterations: usize, residual: f64) -> GridError {
    GridError::StepDiverged {
        time,
        iterations,
        residual,
    }
}

fn inf_norm(v: &[f64]) -> f64 {
    v.iter().fold(0.0f64, |m, x| if x.is_nan() { f64::NAN } else { m.max(x.abs()) })
}

impl Program {
    pub(crate) fn compile(solver: &BlockSolver, time_var: Var) -> GridResult<Self> {
        let resolve = solver.resolver(time_var);
        let tapes = |eqs: &[Expr]| -> GridResult<Vec<Tape>> {
            eqs.iter().map(|e| Tape::compile(e, &resolve)).collect()
        };
        let flat = &solver.flat;
        let f = tapes(&flat.state_eqs)?;
        let g = tapes(&flat.algebraic_eqs)?;
        let param_eqs = flat
            .parameters_eqs
            .iter()
            .map(|e| e.as_ref().map(|e| Tape::compile(e, &resolve)).transpose())
            .collect::<GridResult<Vec<_>>>()?;

        let n_x = flat.state_vars.len();
        let n_y = flat.algebraic_vars.len();
        let j = &solver.jacobians;
        let entries = |b: &SymbolicBlock,
                       dr: usize,
                       dc: usize,
                       coef: Coef|
         -> GridResult<Vec<(usize, usize, Contribution)>> {
            b.entries
                .iter()
                .map(|(r, c, e)| {
                    Ok((
                        r + dr,
                        c + dc,
                        Contribution::Entry(Tape::compile(e, &resolve)?, coef),
                    ))
                })
                .collect()
        };

        let mut contribs = Vec::new();
        contribs.extend((0..n_x).map(|i| (i, i, Contribution::Identity)));
        contribs.extend(entries(&j.f_x, 0, 0, Coef::NegH)?);
        contribs.extend(entries(&j.f_y, 0, n_x, Coef::NegH)?);
        contribs.extend(entries(&j.g_x, n_x, 0, Coef::One)?);
        contribs.extend(entries(&j.g_y, n_x, n_x, Coef::One)?);
        let full = NewtonPattern::build(n_x + n_y, contribs);
        let alg = NewtonPattern::build(n_y, entries(&j.g_y, 0, 0, Coef::One)?);

        Ok(Self {
            n_x,
            n_y,
            f,
            g,
            param_eqs,
            full,
            alg,
        })
    }

    /// Overwrites equation-driven parameters with their value at `t`.
    pub(crate) fn refresh_params(&self, z: &[f64], p: &mut [f64], t: f64, stack: &mut Vec<f64>) {
        for (i, tape) in self.param_eqs.iter().enumerate() {
            if let Some(tape) = tape {
                let v = tape.eval(z, p, t, stack);
                p[i] = v;
            }
        }
    }

    fn eval_f(&self, z: &[f64], p: &[f64], t: f64, out: &mut [f64], stack: &mut Vec<f64>) {
        for (o, tape) in out.iter_mut().zip(&self.f) {
            *o = tape.eval(z, p, t, stack);
        }
    }

    /// Backward Euler step with a Newton corrector on the full system.
    pub(crate) fn implicit_euler_step(
        &self,
        ws: &mut Workspace,
        z: &mut [f64],
        p: &[f64],
        t_prev: f64,
        t_next: f64,
        opts: &SimulationOptions,
    ) -> GridResult<usize> {
        let h = t_next - t_prev;
        let n_x = self.n_x;
        ws.xn.copy_from_slice(&z[..n_x]);
        let mut norm = f64::INFINITY;
        for it in 0..=opts.max_iter {
            let rhs = &mut ws.full.rhs;
            for i in 0..n_x {
                rhs[i] = z[i] - ws.xn[i] - h * self.f[i].eval(z, p, t_next, &mut ws.stack);
            }
            for (j, tape) in self.g.iter().enumerate() {
                rhs[n_x + j] = tape.eval(z, p, t_next, &mut ws.stack);
            }
            norm = inf_norm(rhs);
            trace!(t = t_next, it, residual = norm, "implicit euler iteration");
            if !norm.is_finite() {
                return Err(diverged(t_next, it, norm));
            }
            if norm < opts.tolerance {
                return Ok(it);
            }
            if it == opts.max_iter {
                break;
            }
            self.full
                .assemble(&mut ws.full.values, z, p, t_next, h, &mut ws.stack);
            ws.full.solve().map_err(|_| diverged(t_next, it, norm))?;
            for (zi, dz) in z.iter_mut().zip(&ws.full.rhs) {
                *zi -= dz;
            }
        }
        Err(diverged(t_next, opts.max_iter, norm))
    }

    /// Newton on `g(x, y) = 0` for `y` with the states held fixed.
    fn solve_algebraic(
        &self,
        ws: &mut Workspace,
        z: &mut [f64],
        p: &[f64],
        t: f64,
        opts: &SimulationOptions,
    ) -> GridResult<usize> {
        if self.n_y == 0 {
            return Ok(0);
        }
        let n_x = self.n_x;
        let mut norm = f64::INFINITY;
        for it in 0..=opts.max_iter {
            for (r, tape) in ws.alg.rhs.iter_mut().zip(&self.g) {
                *r = tape.eval(z, p, t, &mut ws.stack);
            }
            norm = inf_norm(&ws.alg.rhs);
            if !norm.is_finite() {
                return Err(diverged(t, it, norm));
            }
            if norm < opts.tolerance {
                return Ok(it);
            }
            if it == opts.max_iter {
                break;
            }
            self.alg
                .assemble(&mut ws.alg.values, z, p, t, 1.0, &mut ws.stack);
            ws.alg.solve().map_err(|_| diverged(t, it, norm))?;
            for (yi, dy) in z[n_x..].iter_mut().zip(&ws.alg.rhs) {
                *yi -= dy;
            }
        }
        Err(diverged(t, opts.max_iter, norm))
    }

    /// Forward Euler on the states, then the algebraic part at the new time.
    pub(crate) fn euler_step(
        &self,
        ws: &mut Workspace,
        z: &mut [f64],
        p: &[f64],
        t_prev: f64,
        t_next: f64,
        opts: &SimulationOptions,
    ) -> GridResult<usize> {
        let h = t_next - t_prev;
        let mut k1 = std::mem::take(&mut ws.k[0]);
        self.eval_f(z, p, t_prev, &mut k1, &mut ws.stack);
        for (x, d) in z.iter_mut().zip(&k1) {
            *x += h * d;
        }
        ws.k[0] = k1;
        self.solve_algebraic(ws, z, p, t_next, opts)
    }

    /// Classic RK4; every stage sees consistent algebraic variables.
    pub(crate) fn rk4_step(
        &self,
        ws: &mut Workspace,
        z: &mut [f64],
        p: &[f64],
        t_prev: f64,
        t_next: f64,
        opts: &SimulationOptions,
    ) -> GridResult<usize> {
        let h = t_next - t_prev;
        let n_x = self.n_x;
        let mut k = std::mem::take(&mut ws.k);
        ws.xn.copy_from_slice(&z[..n_x]);
        let mut iterations = 0;

        self.eval_f(z, p, t_prev, &mut k[0], &mut ws.stack);
        let stages = [(0.5 * h, t_prev + 0.5 * h), (0.5 * h, t_prev + 0.5 * h), (h, t_next)];
        for (s, (dt, ts)) in stages.into_iter().enumerate() {
            for i in 0..n_x {
                z[i] = ws.xn[i] + dt * k[s][i];
            }
            iterations += self.solve_algebraic(ws, z, p, ts, opts)?;
            self.eval_f(z, p, ts, &mut k[s + 1], &mut ws.stack);
        }
        for i in 0..n_x {
            z[i] = ws.xn[i] + h / 6.0 * (k[0][i] + 2.0 * k[1][i] + 2.0 * k[2][i] + k[3][i]);
        }
        ws.k = k;
        iterations += self.solve_algebraic(ws, z, p, t_next, opts)?;
        Ok(iterations)
    }
}

