use std::fmt;

use nalgebra::DVector;
use num_complex::Complex64;
use serde::Serialize;
use tabled::{Table, Tabled, settings::Style};

use super::report::ConvergenceReport;
use crate::basic::system::{BusType, NumericalCircuit};
use crate::error::{GridError, GridResult};

/// A float printed with a fixed number of decimals.
#[derive(Clone, Copy, PartialEq, PartialOrd)]
pub(crate) struct FloatWrapper {
    value: f64,
    precision: usize,
}

impl FloatWrapper {
    pub(crate) fn new(value: f64, precision: usize) -> Self {
        FloatWrapper { value, precision }
    }
}

impl fmt::Display for FloatWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1$}", self.value, self.precision)
    }
}

impl fmt::Debug for FloatWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Debug, Tabled)]
struct BusRow {
    bus: usize,
    name: String,
    #[tabled(rename = "type")]
    bus_type: String,
    vm_pu: FloatWrapper,
    va_degree: FloatWrapper,
    p_mw: FloatWrapper,
    q_mvar: FloatWrapper,
}

#[derive(Debug, Tabled)]
struct BranchRow {
    branch: usize,
    name: String,
    from: usize,
    to: usize,
    p_from_mw: FloatWrapper,
    q_from_mvar: FloatWrapper,
    p_to_mw: FloatWrapper,
    q_to_mvar: FloatWrapper,
    pl_mw: FloatWrapper,
    ql_mvar: FloatWrapper,
    loading_percent: FloatWrapper,
}

/// Outcome of one island of a multi-island run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IslandSummary {
    /// Buses of the island, as indices of the full circuit.
    pub buses: Vec<usize>,
    pub converged: bool,
}

/// Full-size power-flow results.
///
/// Powers are in MVA, voltages and currents in p.u. `loading` is the complex
/// from-side power over the branch rating.
#[derive(Clone, Debug, Serialize)]
pub struct PowerFlowResults {
    pub sbase: f64,
    pub bus_names: Vec<String>,
    pub branch_names: Vec<String>,
    pub f: Vec<usize>,
    pub t: Vec<usize>,
    pub voltage: DVector<Complex64>,
    pub sbus: DVector<Complex64>,
    pub sf: DVector<Complex64>,
    pub st: DVector<Complex64>,
    pub if_: DVector<Complex64>,
    pub it: DVector<Complex64>,
    /// Flow at the from end, which is also what `loading` is based on.
    pub sbranch: DVector<Complex64>,
    pub ibranch: DVector<Complex64>,
    pub loading: DVector<Complex64>,
    pub losses: DVector<Complex64>,
    /// Load not served per bus (MW). The power flow never sheds load, so this
    /// stays zero; it is kept for parity with other simulations.
    pub load_shedding: DVector<f64>,
    pub tap_module: DVector<f64>,
    pub tap_position: Vec<i32>,
    pub bus_types: Vec<BusType>,
    pub converged: bool,
    pub convergence_reports: Vec<ConvergenceReport>,
    pub islands: Vec<IslandSummary>,
}

impl PowerFlowResults {
    /// Zeroed results shaped after `circuit`.
    pub fn new(circuit: &NumericalCircuit) -> Self {
        let nbus = circuit.nbus();
        let nbr = circuit.nbranch();
        Self {
            sbase: circuit.sbase,
            bus_names: circuit.buses.iter().map(|b| b.name.clone()).collect(),
            branch_names: circuit.branches.iter().map(|b| b.name.clone()).collect(),
            f: circuit.branches.iter().map(|b| b.from).collect(),
            t: circuit.branches.iter().map(|b| b.to).collect(),
            voltage: DVector::zeros(nbus),
            sbus: DVector::zeros(nbus),
            sf: DVector::zeros(nbr),
            st: DVector::zeros(nbr),
            if_: DVector::zeros(nbr),
            it: DVector::zeros(nbr),
            sbranch: DVector::zeros(nbr),
            ibranch: DVector::zeros(nbr),
            loading: DVector::zeros(nbr),
            losses: DVector::zeros(nbr),
            load_shedding: DVector::zeros(nbus),
            tap_module: circuit.tap_modules(),
            tap_position: circuit.tap_positions(),
            bus_types: circuit.bus_types(),
            converged: true,
            convergence_reports: Vec::new(),
            islands: Vec::new(),
        }
    }

    pub fn nbus(&self) -> usize {
        self.voltage.len()
    }

    pub fn nbranch(&self) -> usize {
        self.sf.len()
    }

    /// Turns a non-converged run into [`GridError::NoConvergence`], for callers
    /// that treat exhausting every method as fatal.
    pub fn into_converged(self) -> GridResult<Self> {
        if self.converged {
            Ok(self)
        } else {
            Err(GridError::NoConvergence)
        }
    }

    /// Copies an island's results into the full arrays.
    pub(crate) fn scatter(&mut self, island: &PowerFlowResults, bus_idx: &[usize], branch_idx: &[usize]) {
        for (local, &global) in bus_idx.iter().enumerate() {
            self.voltage[global] = island.voltage[local];
            self.sbus[global] = island.sbus[local];
            self.load_shedding[global] = island.load_shedding[local];
            self.bus_types[global] = island.bus_types[local];
        }
        for (local, &global) in branch_idx.iter().enumerate() {
            self.sf[global] = island.sf[local];
            self.st[global] = island.st[local];
            self.if_[global] = island.if_[local];
            self.it[global] = island.it[local];
            self.sbranch[global] = island.sbranch[local];
            self.ibranch[global] = island.ibranch[local];
            self.loading[global] = island.loading[local];
            self.losses[global] = island.losses[local];
            self.tap_module[global] = island.tap_module[local];
            self.tap_position[global] = island.tap_position[local];
        }
        self.convergence_reports.extend(island.convergence_reports.iter().cloned());
        self.converged &= island.converged;
        self.islands.push(IslandSummary {
            buses: bus_idx.to_vec(),
            converged: island.converged,
        });
    }

    pub fn bus_table(&self) -> String {
        let rows = (0..self.nbus()).map(|i| BusRow {
            bus: i,
            name: self.bus_names[i].clone(),
            bus_type: format!("{:?}", self.bus_types[i]),
            vm_pu: FloatWrapper::new(self.voltage[i].norm(), 4),
            va_degree: FloatWrapper::new(self.voltage[i].arg().to_degrees(), 4),
            p_mw: FloatWrapper::new(self.sbus[i].re, 3),
            q_mvar: FloatWrapper::new(self.sbus[i].im, 3),
        });
        Table::new(rows).with(Style::markdown()).to_string()
    }

    pub fn branch_table(&self) -> String {
        let rows = (0..self.nbranch()).map(|k| BranchRow {
            branch: k,
            name: self.branch_names[k].clone(),
            from: self.f[k],
            to: self.t[k],
            p_from_mw: FloatWrapper::new(self.sf[k].re, 3),
            q_from_mvar: FloatWrapper::new(self.sf[k].im, 3),
            p_to_mw: FloatWrapper::new(self.st[k].re, 3),
            q_to_mvar: FloatWrapper::new(self.st[k].im, 3),
            pl_mw: FloatWrapper::new(self.losses[k].re, 3),
            ql_mvar: FloatWrapper::new(self.losses[k].im, 3),
            loading_percent: FloatWrapper::new(self.loading[k].norm() * 100.0, 2),
        });
        Table::new(rows).with(Style::markdown()).to_string()
    }
}

impl fmt::Display for PowerFlowResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "converged: {}", self.converged)?;
        writeln!(f)?;
        writeln!(f, "{}", self.bus_table())?;
        writeln!(f)?;
        write!(f, "{}", self.branch_table())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::powerflow::kernels::test_grids::two_bus;

    #[test]
    fn test_float_wrapper() {
        assert_eq!(FloatWrapper::new(1.23456, 2).to_string(), "1.23");
        assert_eq!(format!("{:?}", FloatWrapper::new(-0.5, 3)), "-0.500");
    }

    #[test]
    fn test_into_converged() {
        let mut res = PowerFlowResults::new(&two_bus());
        res = res.into_converged().unwrap();
        res.converged = false;
        assert!(matches!(res.into_converged(), Err(GridError::NoConvergence)));
    }

    #[test]
    fn test_tables_have_one_row_per_element() {
        let res = PowerFlowResults::new(&two_bus());
        assert_eq!(res.bus_table().lines().count(), 2 + 2);
        assert_eq!(res.branch_table().lines().count(), 2 + 1);
        let text = res.to_string();
        assert!(text.starts_with("converged: true"));
        assert!(text.contains("loading_percent"));
        assert!(text.contains("slack"));
    }
}
