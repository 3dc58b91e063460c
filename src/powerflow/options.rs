use std::{path::Path, str::FromStr};

use derive_more::derive::Display;
use serde::{Deserialize, Serialize};

use super::kernels::KernelSettings;
use crate::error::{GridError, GridResult};

/// Numerical method of a power-flow run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum SolverType {
    #[default]
    #[display("Newton-Raphson")]
    NewtonRaphson,
    #[display("Newton-Raphson (current)")]
    NewtonRaphsonCurrent,
    #[display("Newton-Raphson (decoupled)")]
    NewtonRaphsonDecoupled,
    #[display("Iwamoto")]
    Iwamoto,
    #[display("Levenberg-Marquardt")]
    LevenbergMarquardt,
    #[display("HELM")]
    Helm,
    #[display("DC")]
    Dc,
    #[display("Fast decoupled")]
    FastDecoupled,
    #[display("LACPF")]
    Lacpf,
}

impl FromStr for SolverType {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "newton_raphson" | "nr" => Self::NewtonRaphson,
            "newton_raphson_current" | "nr_current" => Self::NewtonRaphsonCurrent,
            "newton_raphson_decoupled" | "nrd" => Self::NewtonRaphsonDecoupled,
            "iwamoto" => Self::Iwamoto,
            "levenberg_marquardt" | "lm" => Self::LevenbergMarquardt,
            "helm" => Self::Helm,
            "dc" => Self::Dc,
            "fast_decoupled" | "fdpf" => Self::FastDecoupled,
            "lacpf" => Self::Lacpf,
            _ => return Err(GridError::UnsupportedSolver(s.to_string())),
        })
    }
}

/// Reactive power limit enforcement on PV buses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QControl {
    #[default]
    Off,
    /// Switch PV and PQ roles as soon as a limit is hit or released.
    Direct,
    /// Move Q towards the violated limit with a logistic gain.
    Iterative,
}

/// Transformer tap regulation in the outer loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TapControl {
    #[default]
    Off,
    /// Jump to the position that matches the set-point at once.
    Direct,
    /// One tap step per outer-loop pass.
    Iterative,
}

/// Power-flow configuration.
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// use gridcal_core::powerflow::{PowerFlowOptions, SolverType};
///
/// let opts = PowerFlowOptions::from_json_str(r#"{"solver_type": "iwamoto"}"#).unwrap();
/// assert_eq!(opts.solver_type, SolverType::Iwamoto);
/// assert_eq!(opts.max_iter, 25);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerFlowOptions {
    pub solver_type: SolverType,
    /// Try the fallback methods when the requested one fails.
    pub retry_with_other_methods: bool,
    pub tolerance: f64,
    pub max_iter: usize,
    pub max_outer_loop_iter: usize,
    pub control_q: QControl,
    pub control_taps: TapControl,
    /// Steepness `k` of the logistic gain used by [`QControl::Iterative`].
    pub q_steepness_factor: f64,
    /// Share the slack imbalance among generators by installed power.
    pub distributed_slack: bool,
    pub ignore_single_node_islands: bool,
}

impl Default for PowerFlowOptions {
    fn default() -> Self {
        Self {
            solver_type: SolverType::NewtonRaphson,
            retry_with_other_methods: true,
            tolerance: 1e-6,
            max_iter: 25,
            max_outer_loop_iter: 100,
            control_q: QControl::Off,
            control_taps: TapControl::Off,
            q_steepness_factor: 30.0,
            distributed_slack: false,
            ignore_single_node_islands: false,
        }
    }
}

impl PowerFlowOptions {
    pub fn from_json_str(json: &str) -> GridResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> GridResult<Self> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }

    pub fn with_solver(mut self, solver_type: SolverType) -> Self {
        self.solver_type = solver_type;
        self
    }

    pub fn kernel_settings(&self) -> KernelSettings {
        KernelSettings {
            tolerance: self.tolerance,
            max_iter: self.max_iter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solver_names() {
        assert_eq!("helm".parse::<SolverType>().unwrap(), SolverType::Helm);
        assert_eq!("LM".parse::<SolverType>().unwrap(), SolverType::LevenbergMarquardt);
        assert!(matches!(
            "gauss_seidel".parse::<SolverType>(),
            Err(GridError::UnsupportedSolver(s)) if s == "gauss_seidel"
        ));
        assert_eq!(
            serde_json::to_string(&SolverType::NewtonRaphsonDecoupled).unwrap(),
            "\"newton_raphson_decoupled\""
        );
        assert_eq!(SolverType::Lacpf.to_string(), "LACPF");
    }

    #[test]
    fn test_partial_json() {
        let opts = PowerFlowOptions::from_json_str(
            r#"{"control_q": "direct", "control_taps": "iterative", "tolerance": 1e-9}"#,
        )
        .unwrap();
        assert_eq!(opts.control_q, QControl::Direct);
        assert_eq!(opts.control_taps, TapControl::Iterative);
        assert_eq!(opts.tolerance, 1e-9);
        assert!(opts.retry_with_other_methods);
        assert!(matches!(
            PowerFlowOptions::from_json_str(r#"{"solver_type": "magic"}"#),
            Err(GridError::Json(_))
        ));
    }
}
