//! A generator with tight reactive limits and a regulating transformer,
//! solved with both controls in the loop. Set `RUST_LOG=debug` to follow the
//! outer-loop passes.

use gridcal_core::prelude::*;
use num_complex::Complex64;
use tracing_subscriber::EnvFilter;

fn grid() -> NumericalCircuit {
    let mut c = NumericalCircuit::new(100.0);
    c.add_bus(Bus::new("grid", BusType::Slack));
    let mut unit = Bus::new("unit", BusType::PV)
        .with_power(Complex64::new(0.3, 0.0))
        .with_voltage(Complex64::new(1.04, 0.0))
        .with_q_limits(-0.1, 0.1);
    unit.has_generator = true;
    unit.installed_power = 50.0;
    c.add_bus(unit);
    c.add_bus(Bus::new("mv", BusType::PQ).with_power(Complex64::new(-0.6, -0.25)));
    c.add_bus(Bus::new("lv", BusType::PQ).with_power(Complex64::new(-0.4, -0.15)));

    c.add_branch(Branch::new("grid-unit", 0, 1, 0.01, 0.05, 0.02).with_rate(150.0));
    c.add_branch(Branch::new("grid-mv", 0, 2, 0.02, 0.08, 0.02).with_rate(150.0));
    c.add_branch(Branch::new("unit-mv", 1, 2, 0.02, 0.06, 0.01).with_rate(100.0));
    c.add_branch(Branch::new("trafo", 2, 3, 0.0, 0.08, 0.0).with_rate(60.0).with_regulator(TapRegulator {
        position: 0,
        min_tap: -8,
        max_tap: 8,
        inc_reg_up: 0.0125,
        inc_reg_down: 0.0125,
        vset: 1.0,
    }));
    c
}

fn main() -> GridResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let circuit = grid();
    for issue in circuit.validate() {
        println!("warning: {issue}");
    }

    let options = PowerFlowOptions::from_json_str(
        r#"{"solver_type": "newton_raphson", "control_q": "direct", "control_taps": "iterative"}"#,
    )?;
    let results = multi_island_pf(&circuit, &options)?;

    println!("{results}");
    for report in &results.convergence_reports {
        println!("\n{report}");
    }
    Ok(())
}
