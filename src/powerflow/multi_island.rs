use tracing::{info, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use super::kernels::KernelSet;
use super::options::PowerFlowOptions;
use super::outer_loop::outer_loop_power_flow;
use super::results::PowerFlowResults;
use crate::basic::system::{Island, NumericalCircuit, compile_types};
use crate::error::GridResult;

/// Islands that have a slack bus, or a PV bus that can be promoted to one.
fn solvable(islands: Vec<Island>) -> Vec<Island> {
    islands
        .into_iter()
        .enumerate()
        .filter_map(|(k, island)| {
            let mut types = island.circuit.bus_types();
            let pbus: Vec<f64> = island.circuit.sbus().iter().map(|s| s.re).collect();
            if compile_types(&pbus, &mut types).vd.is_empty() {
                warn!(
                    "island {k} ({} buses) has no slack bus, skipped",
                    island.circuit.nbus()
                );
                None
            } else {
                Some(island)
            }
        })
        .collect()
}

/// Power flow of every island of `circuit` with the standard kernels.
pub fn multi_island_pf(circuit: &NumericalCircuit, options: &PowerFlowOptions) -> GridResult<PowerFlowResults> {
    multi_island_pf_with(circuit, options, &KernelSet::standard())
}

/// Power flow of every island of `circuit`.
///
/// Islands are solved independently (concurrently with the `parallel`
/// feature) and their results scattered into full-size arrays by original bus
/// and branch index. Buses of skipped islands keep zero voltage.
pub fn multi_island_pf_with(
    circuit: &NumericalCircuit,
    options: &PowerFlowOptions,
    kernels: &KernelSet,
) -> GridResult<PowerFlowResults> {
    let islands = solvable(circuit.split_into_islands(options.ignore_single_node_islands));
    info!("solving {} islands", islands.len());

    #[cfg(feature = "parallel")]
    let solved: Vec<GridResult<PowerFlowResults>> = islands
        .par_iter()
        .map(|island| outer_loop_power_flow(&island.circuit, options, kernels))
        .collect();
    #[cfg(not(feature = "parallel"))]
    let solved: Vec<GridResult<PowerFlowResults>> = islands
        .iter()
        .map(|island| outer_loop_power_flow(&island.circuit, options, kernels))
        .collect();

    let mut results = PowerFlowResults::new(circuit);
    for (island, res) in islands.iter().zip(solved) {
        results.scatter(&res?, &island.original_bus_idx, &island.original_branch_idx);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::system::{Branch, Bus, BusType, TapRegulator};
    use crate::powerflow::TapControl;
    use num_complex::Complex64;

    /// Two slack-to-load pairs side by side, the second one through a
    /// regulating transformer, plus a dead-end pair without any source.
    fn split_grid() -> NumericalCircuit {
        let mut c = NumericalCircuit::new(100.0);
        c.add_bus(Bus::new("load a", BusType::PQ).with_power(Complex64::new(-1.0, -0.2)));
        c.add_bus(Bus::new("floating 1", BusType::PQ));
        c.add_bus(Bus::new("slack a", BusType::Slack));
        c.add_bus(Bus::new("slack b", BusType::Slack));
        c.add_bus(Bus::new("floating 2", BusType::PQ));
        c.add_bus(Bus::new("load b", BusType::PQ).with_power(Complex64::new(-0.5, -0.2)));
        let z = Complex64::new(1.0, 0.0) / Complex64::new(10.0, -30.0);
        c.add_branch(Branch::new("floating", 1, 4, 0.01, 0.1, 0.0));
        c.add_branch(Branch::new("line a", 2, 0, z.re, z.im, 0.0).with_rate(200.0));
        c.add_branch(Branch::new("trafo b", 3, 5, 0.0, 0.1, 0.0).with_rate(100.0).with_regulator(TapRegulator {
            position: 0,
            min_tap: -10,
            max_tap: 10,
            inc_reg_up: 0.01,
            inc_reg_down: 0.01,
            vset: 1.0,
        }));
        c
    }

    #[test]
    fn test_islands_scattered_by_original_index() {
        let circuit = split_grid();
        let opts = PowerFlowOptions {
            control_taps: TapControl::Iterative,
            ..Default::default()
        };
        let res = multi_island_pf(&circuit, &opts).unwrap();

        assert!(res.converged);
        assert_eq!(res.islands.len(), 2);
        assert_eq!(res.islands[0].buses, vec![0, 2]);
        assert_eq!(res.islands[1].buses, vec![3, 5]);
        assert_eq!(res.convergence_reports.len(), 2);
        assert!(res.tap_position[2] < 0);

        // islands without a slack come back zeroed from the outer loop too, so
        // every island can be checked the same way
        let islands = circuit.split_into_islands(opts.ignore_single_node_islands);
        assert_eq!(islands.len(), 3);
        for island in &islands {
            let own = outer_loop_power_flow(&island.circuit, &opts, &KernelSet::standard()).unwrap();
            for (local, &global) in island.original_bus_idx.iter().enumerate() {
                assert_eq!(res.voltage[global], own.voltage[local]);
                assert_eq!(res.sbus[global], own.sbus[local]);
                assert_eq!(res.bus_types[global], own.bus_types[local]);
            }
            for (local, &global) in island.original_branch_idx.iter().enumerate() {
                assert_eq!(res.sf[global], own.sf[local]);
                assert_eq!(res.st[global], own.st[local]);
                assert_eq!(res.if_[global], own.if_[local]);
                assert_eq!(res.it[global], own.it[local]);
                assert_eq!(res.loading[global], own.loading[local]);
                assert_eq!(res.losses[global], own.losses[local]);
                assert_eq!(res.tap_module[global], own.tap_module[local]);
                assert_eq!(res.tap_position[global], own.tap_position[local]);
            }
        }
        assert_eq!(res.voltage[1], Complex64::new(0.0, 0.0));
        assert_eq!(res.voltage[4], Complex64::new(0.0, 0.0));
        assert_eq!(res.sf[0], Complex64::new(0.0, 0.0));
    }
}
