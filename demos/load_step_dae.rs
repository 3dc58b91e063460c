//! Exciter-driven internal voltage feeding a resistive load that steps up at
//! t = 1 s. Writes the trajectory to `load_step.csv` in the temp directory.

use std::collections::HashMap;

use gridcal_core::prelude::*;
use tracing_subscriber::EnvFilter;

fn main() -> GridResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut s = Symbols::new();
    let [e, v, ef, g, t] = s.vars(["e", "v", "ef", "g", "t"]);

    // internal voltage with a 0.5 s lag, load behind a 0.2 p.u. reactance
    let block = Block::builder()
        .state(2.0 * (ef - e), e)
        .algebraic(v * (1.0 + 0.2 * g) - e, v)
        .parameter(ef, None)
        .parameter(g, None)
        .build()?;
    let solver = BlockSolver::new(&block, &s)?;

    let init: HashMap<Var, f64> = [(e, 1.2), (v, 1.0), (ef, 1.2), (g, 1.0)].into_iter().collect();
    let x0 = solver.build_init_vars_vector(&init)?;
    let p0 = solver.build_init_params_vector(&init)?;

    let events = [Event::new(1.0, g, 1.5)];
    let (times, traj) = solver.simulate(0.0, 3.0, 0.01, &x0, &p0, t, IntegrationMethod::ImplicitEuler, &events)?;

    let last = traj.nrows() - 1;
    println!("{} steps, final v = {:.4} p.u.", times.len(), traj[(last, 1)]);

    let path = std::env::temp_dir().join("load_step.csv");
    solver.save_simulation_to_csv(&path, &times, &traj)?;
    println!("trajectory written to {}", path.display());
    Ok(())
}
