use derive_more::derive::Display;
use nalgebra::DVector;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Bus classification used by the power-flow kernels.
///
/// The integer codes match the usual GridCal numbering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusType {
    /// Load bus: P and Q are specified.
    #[default]
    PQ = 1,
    /// Voltage-controlled bus: P and |V| are specified.
    PV = 2,
    /// Reference bus: |V| and angle are specified.
    Slack = 3,
    /// Bus without a defined role; it takes no part in the solve.
    None = 4,
    /// Storage dispatch bus; it takes no part in the solve.
    Storage = 5,
}

/// One node of a [`NumericalCircuit`], values in per-unit.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Bus {
    pub name: String,
    pub bus_type: BusType,
    /// Net complex power injection (generation minus load).
    pub s: Complex64,
    /// Net current injection.
    pub i: Complex64,
    /// Initial voltage; its magnitude is the set-point of PV and slack buses.
    pub v0: Complex64,
    /// Shunt admittance to ground.
    pub y_shunt: Complex64,
    /// Upper bound on the net reactive injection.
    pub q_max: f64,
    /// Lower bound on the net reactive injection.
    pub q_min: f64,
    /// Installed generation capacity, used to share the distributed slack.
    pub installed_power: f64,
    pub has_generator: bool,
    pub active: bool,
}

impl Default for Bus {
    fn default() -> Self {
        Self {
            name: String::new(),
            bus_type: BusType::PQ,
            s: Complex64::new(0.0, 0.0),
            i: Complex64::new(0.0, 0.0),
            v0: Complex64::new(1.0, 0.0),
            y_shunt: Complex64::new(0.0, 0.0),
            q_max: f64::INFINITY,
            q_min: f64::NEG_INFINITY,
            installed_power: 0.0,
            has_generator: false,
            active: true,
        }
    }
}

impl Bus {
    pub fn new(name: impl Into<String>, bus_type: BusType) -> Self {
        Self {
            name: name.into(),
            bus_type,
            has_generator: matches!(bus_type, BusType::PV | BusType::Slack),
            ..Default::default()
        }
    }

    pub fn with_power(mut self, s: Complex64) -> Self {
        self.s = s;
        self
    }

    pub fn with_voltage(mut self, v0: Complex64) -> Self {
        self.v0 = v0;
        self
    }

    pub fn with_q_limits(mut self, q_min: f64, q_max: f64) -> Self {
        self.q_min = q_min;
        self.q_max = q_max;
        self
    }
}

/// Discrete tap changer of a transformer branch.
///
/// The changer regulates the voltage magnitude of the branch `to` bus. The tap
/// module at position `k` is `1 + k * inc_reg_up` for `k >= 0` and
/// `1 + k * inc_reg_down` for `k < 0`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TapRegulator {
    pub position: i32,
    pub min_tap: i32,
    pub max_tap: i32,
    pub inc_reg_up: f64,
    pub inc_reg_down: f64,
    /// Voltage set-point of the regulated bus (p.u.).
    pub vset: f64,
}

impl TapRegulator {
    /// Tap step used by a position, per the sign convention above.
    pub fn increment(&self, position: i32) -> f64 {
        if position >= 0 {
            self.inc_reg_up
        } else {
            self.inc_reg_down
        }
    }

    pub fn module_at(&self, position: i32) -> f64 {
        1.0 + position as f64 * self.increment(position)
    }
}

/// Pi-model branch (line or transformer) with the tap on the `from` side.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Branch {
    pub name: String,
    pub from: usize,
    pub to: usize,
    pub r: f64,
    pub x: f64,
    /// Total line charging susceptance.
    pub b: f64,
    pub tap_module: f64,
    /// Phase shift (rad).
    pub tap_angle: f64,
    /// Rating (MVA).
    pub rate: f64,
    pub active: bool,
    pub regulator: Option<TapRegulator>,
}

impl Default for Branch {
    fn default() -> Self {
        Self {
            name: String::new(),
            from: 0,
            to: 0,
            r: 0.0,
            x: 0.0,
            b: 0.0,
            tap_module: 1.0,
            tap_angle: 0.0,
            rate: 0.0,
            active: true,
            regulator: None,
        }
    }
}

impl Branch {
    pub fn new(name: impl Into<String>, from: usize, to: usize, r: f64, x: f64, b: f64) -> Self {
        Self {
            name: name.into(),
            from,
            to,
            r,
            x,
            b,
            ..Default::default()
        }
    }

    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    pub fn with_regulator(mut self, regulator: TapRegulator) -> Self {
        self.tap_module = regulator.module_at(regulator.position);
        self.regulator = Some(regulator);
        self
    }
}

/// Slack / PV / PQ partition of the buses.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BusIndices {
    pub vd: Vec<usize>,
    pub pq: Vec<usize>,
    pub pv: Vec<usize>,
    /// `pq` and `pv` merged, sorted.
    pub pqpv: Vec<usize>,
}

/// Partitions the buses by type.
///
/// When no slack exists, the PV bus injecting the most active power (or the
/// first PV bus if none injects a positive amount) is promoted to slack in
/// `types`. A grid without slack and without PV buses keeps an empty `vd`.
pub fn compile_types(pbus: &[f64], types: &mut [BusType]) -> BusIndices {
    let of = |t: BusType, types: &[BusType]| -> Vec<usize> {
        types
            .iter()
            .enumerate()
            .filter(|(_, b)| **b == t)
            .map(|(i, _)| i)
            .collect()
    };
    let pq = of(BusType::PQ, types);
    let mut pv = of(BusType::PV, types);
    let mut vd = of(BusType::Slack, types);

    if vd.is_empty() && !pv.is_empty() {
        let best = pv
            .iter()
            .copied()
            .filter(|i| pbus[*i] > 0.0)
            .max_by(|a, b| pbus[*a].total_cmp(&pbus[*b]))
            .unwrap_or(pv[0]);
        pv.retain(|i| *i != best);
        types[best] = BusType::Slack;
        vd.push(best);
    }

    let mut pqpv: Vec<usize> = pq.iter().chain(pv.iter()).copied().collect();
    pqpv.sort_unstable();
    BusIndices { vd, pq, pv, pqpv }
}

/// Problem found by [`NumericalCircuit::validate`].
#[derive(Clone, Debug, PartialEq, Eq, Display)]
pub enum ValidationIssue {
    #[display("slack bus {_0} has no generator")]
    SlackWithoutGenerator(usize),
    #[display("branch {_0} has a zero rating")]
    ZeroBranchRating(usize),
    #[display("branch {_0} connects a bus outside the circuit")]
    BranchBusOutOfRange(usize),
    #[display("branch {_0} has a non-positive tap increment")]
    NonPositiveTapIncrement(usize),
}

/// Bus/branch arrays of one network (or one island of it).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NumericalCircuit {
    /// System base power (MVA).
    pub sbase: f64,
    pub buses: Vec<Bus>,
    pub branches: Vec<Branch>,
}

impl NumericalCircuit {
    pub fn new(sbase: f64) -> Self {
        Self {
            sbase,
            ..Default::default()
        }
    }

    pub fn add_bus(&mut self, bus: Bus) -> usize {
        self.buses.push(bus);
        self.buses.len() - 1
    }

    pub fn add_branch(&mut self, branch: Branch) -> usize {
        self.branches.push(branch);
        self.branches.len() - 1
    }

    pub fn nbus(&self) -> usize {
        self.buses.len()
    }

    pub fn nbranch(&self) -> usize {
        self.branches.len()
    }

    /// Complex power injections; inactive buses inject nothing.
    pub fn sbus(&self) -> DVector<Complex64> {
        DVector::from_iterator(
            self.nbus(),
            self.buses
                .iter()
                .map(|b| if b.active { b.s } else { Complex64::new(0.0, 0.0) }),
        )
    }

    pub fn ibus(&self) -> DVector<Complex64> {
        DVector::from_iterator(
            self.nbus(),
            self.buses
                .iter()
                .map(|b| if b.active { b.i } else { Complex64::new(0.0, 0.0) }),
        )
    }

    pub fn v0(&self) -> DVector<Complex64> {
        DVector::from_iterator(self.nbus(), self.buses.iter().map(|b| b.v0))
    }

    /// Bus types as declared; inactive buses are reported as [`BusType::None`].
    pub fn bus_types(&self) -> Vec<BusType> {
        self.buses
            .iter()
            .map(|b| if b.active { b.bus_type } else { BusType::None })
            .collect()
    }

    pub fn q_max(&self) -> DVector<f64> {
        DVector::from_iterator(self.nbus(), self.buses.iter().map(|b| b.q_max))
    }

    pub fn q_min(&self) -> DVector<f64> {
        DVector::from_iterator(self.nbus(), self.buses.iter().map(|b| b.q_min))
    }

    pub fn installed_power(&self) -> DVector<f64> {
        DVector::from_iterator(self.nbus(), self.buses.iter().map(|b| b.installed_power))
    }

    pub fn tap_modules(&self) -> DVector<f64> {
        DVector::from_iterator(self.nbranch(), self.branches.iter().map(|b| b.tap_module))
    }

    pub fn tap_positions(&self) -> Vec<i32> {
        self.branches
            .iter()
            .map(|b| b.regulator.as_ref().map_or(0, |r| r.position))
            .collect()
    }

    pub fn rates(&self) -> DVector<f64> {
        DVector::from_iterator(self.nbranch(), self.branches.iter().map(|b| b.rate))
    }

    /// Pre-flight checks. The caller decides whether an issue is fatal.
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        for (i, bus) in self.buses.iter().enumerate() {
            if bus.active && bus.bus_type == BusType::Slack && !bus.has_generator {
                issues.push(ValidationIssue::SlackWithoutGenerator(i));
            }
        }
        for (k, br) in self.branches.iter().enumerate() {
            if br.from >= self.nbus() || br.to >= self.nbus() {
                issues.push(ValidationIssue::BranchBusOutOfRange(k));
            }
            if br.active && br.rate <= 0.0 {
                issues.push(ValidationIssue::ZeroBranchRating(k));
            }
            if let Some(reg) = &br.regulator {
                if reg.inc_reg_up <= 0.0 || reg.inc_reg_down <= 0.0 {
                    issues.push(ValidationIssue::NonPositiveTapIncrement(k));
                }
            }
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_types_promotes_largest_pv() {
        let mut types = vec![BusType::PQ, BusType::PV, BusType::PV, BusType::PQ];
        let idx = compile_types(&[0.0, 0.5, 1.5, -1.0], &mut types);
        assert_eq!(idx.vd, vec![2]);
        assert_eq!(idx.pv, vec![1]);
        assert_eq!(idx.pq, vec![0, 3]);
        assert_eq!(idx.pqpv, vec![0, 1, 3]);
        assert_eq!(types[2], BusType::Slack);
    }

    #[test]
    fn test_compile_types_without_generation() {
        let mut types = vec![BusType::PQ; 3];
        let idx = compile_types(&[-1.0, -1.0, -1.0], &mut types);
        assert!(idx.vd.is_empty());
        assert_eq!(idx.pqpv, vec![0, 1, 2]);

        let mut types = vec![BusType::PV, BusType::PV];
        let idx = compile_types(&[-0.2, -0.1], &mut types);
        assert_eq!(idx.vd, vec![0]);
    }

    #[test]
    fn test_validate() {
        let mut c = NumericalCircuit::new(100.0);
        let mut slack = Bus::new("slack", BusType::Slack);
        slack.has_generator = false;
        c.add_bus(slack);
        c.add_bus(Bus::new("load", BusType::PQ));
        c.add_branch(Branch::new("l1", 0, 1, 0.01, 0.1, 0.0));
        c.add_branch(Branch::new("l2", 0, 5, 0.01, 0.1, 0.0).with_rate(10.0));
        let issues = c.validate();
        assert_eq!(
            issues,
            vec![
                ValidationIssue::SlackWithoutGenerator(0),
                ValidationIssue::ZeroBranchRating(0),
                ValidationIssue::BranchBusOutOfRange(1),
            ]
        );
        assert_eq!(issues[0].to_string(), "slack bus 0 has no generator");
    }

    #[test]
    fn test_tap_module_sign_convention() {
        let reg = TapRegulator {
            position: -2,
            min_tap: -5,
            max_tap: 5,
            inc_reg_up: 0.01,
            inc_reg_down: 0.02,
            vset: 1.0,
        };
        assert!((reg.module_at(-2) - 0.96).abs() < 1e-12);
        assert!((reg.module_at(3) - 1.03).abs() < 1e-12);
    }
}
