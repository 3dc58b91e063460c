use nalgebra::DVector;
use num_complex::Complex64;
use tracing::{info, warn};

use super::kernels::{Injections, KernelResult, KernelSet};
use super::options::{PowerFlowOptions, SolverType};
use super::report::{Attempt, ConvergenceReport};
use crate::basic::system::Admittances;
use crate::error::{GridError, GridResult};

/// Methods tried after the requested one, in order.
pub const FALLBACK_ORDER: [SolverType; 4] = [
    SolverType::Iwamoto,
    SolverType::LevenbergMarquardt,
    SolverType::Helm,
    SolverType::Lacpf,
];

/// Result of the last method tried, plus the record of every attempt.
#[derive(Clone, Debug)]
pub struct DispatchOutcome {
    pub method: SolverType,
    pub result: KernelResult,
    pub report: ConvergenceReport,
}

impl DispatchOutcome {
    pub fn converged(&self) -> bool {
        self.result.converged
    }
}

/// Candidate methods for a run, without duplicates.
pub fn candidate_methods(options: &PowerFlowOptions) -> Vec<SolverType> {
    let mut methods = vec![options.solver_type];
    if options.retry_with_other_methods {
        for m in FALLBACK_ORDER {
            if !methods.contains(&m) {
                methods.push(m);
            }
        }
    }
    methods
}

/// Runs the requested method and, when allowed, the fallbacks until one
/// converges.
///
/// Every candidate must have a kernel in `kernels`; otherwise the call fails
/// with [`GridError::UnsupportedSolver`] before anything is solved. When no
/// method converges, the last attempt is returned as is.
pub fn solve(
    options: &PowerFlowOptions,
    kernels: &KernelSet,
    adm: &Admittances,
    inj: &Injections,
    v0: &DVector<Complex64>,
) -> GridResult<DispatchOutcome> {
    let methods = candidate_methods(options);
    let resolved = methods
        .iter()
        .map(|m| {
            kernels
                .get(*m)
                .ok_or_else(|| GridError::UnsupportedSolver(m.to_string()))
        })
        .collect::<GridResult<Vec<_>>>()?;

    let settings = options.kernel_settings();
    let mut report = ConvergenceReport::default();
    let mut last = None;
    for kernel in resolved {
        let method = kernel.method();
        let result = kernel.solve(adm, inj, v0, &settings);
        report.push(Attempt {
            method,
            converged: result.converged,
            norm_f: result.norm_f,
            iterations: result.iterations,
            elapsed: result.elapsed,
        });
        let converged = result.converged;
        last = Some((method, result));
        if converged {
            info!("{method} converged (|F| = {:e})", report.last().map_or(0.0, |a| a.norm_f));
            break;
        }
        warn!("{method} did not converge");
    }

    let (method, result) = last.ok_or(GridError::UnsupportedSolver(options.solver_type.to_string()))?;
    Ok(DispatchOutcome {
        method,
        result,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::powerflow::kernels::test_grids::*;
    use crate::powerflow::kernels::{KernelSettings, PowerFlowKernel};
    use std::time::{Duration, Instant};

    /// Reports the configured outcome without solving anything.
    struct Scripted {
        method: SolverType,
        converges: bool,
    }

    impl PowerFlowKernel for Scripted {
        fn method(&self) -> SolverType {
            self.method
        }

        fn solve(
            &self,
            adm: &Admittances,
            inj: &Injections,
            v0: &DVector<Complex64>,
            _settings: &KernelSettings,
        ) -> KernelResult {
            let mut res = KernelResult::finish(adm, inj, v0.clone(), self.converges, 1, Instant::now());
            res.elapsed = Duration::ZERO;
            res
        }
    }

    fn scripted(converging: &[SolverType]) -> KernelSet {
        let mut set = KernelSet::empty();
        for method in [
            SolverType::NewtonRaphson,
            SolverType::Iwamoto,
            SolverType::LevenbergMarquardt,
            SolverType::Helm,
            SolverType::Lacpf,
        ] {
            set.register(Box::new(Scripted {
                method,
                converges: converging.contains(&method),
            }));
        }
        set
    }

    #[test]
    fn test_fallback_order() {
        let (adm, inj, v0) = prepare(&two_bus());
        let opts = PowerFlowOptions::default();
        let out = solve(&opts, &scripted(&[SolverType::Helm]), &adm, &inj, &v0).unwrap();
        assert_eq!(
            out.report.methods(),
            vec![
                SolverType::NewtonRaphson,
                SolverType::Iwamoto,
                SolverType::LevenbergMarquardt,
                SolverType::Helm
            ]
        );
        assert_eq!(out.method, SolverType::Helm);
        assert!(out.converged());
    }

    #[test]
    fn test_no_method_converges() {
        let (adm, inj, v0) = prepare(&two_bus());
        let out = solve(&PowerFlowOptions::default(), &scripted(&[]), &adm, &inj, &v0).unwrap();
        assert_eq!(out.report.len(), 5);
        assert_eq!(out.method, SolverType::Lacpf);
        assert!(!out.converged());
        assert!(!out.report.converged());
    }

    #[test]
    fn test_requested_fallback_is_not_repeated() {
        let opts = PowerFlowOptions::default().with_solver(SolverType::LevenbergMarquardt);
        assert_eq!(
            candidate_methods(&opts),
            vec![
                SolverType::LevenbergMarquardt,
                SolverType::Iwamoto,
                SolverType::Helm,
                SolverType::Lacpf
            ]
        );
        let opts = PowerFlowOptions {
            retry_with_other_methods: false,
            ..opts
        };
        assert_eq!(candidate_methods(&opts), vec![SolverType::LevenbergMarquardt]);
    }

    #[test]
    fn test_missing_kernel_fails_up_front() {
        let (adm, inj, v0) = prepare(&two_bus());
        let opts = PowerFlowOptions::default().with_solver(SolverType::Dc);
        let res = solve(&opts, &scripted(&[SolverType::Iwamoto]), &adm, &inj, &v0);
        assert!(matches!(res, Err(GridError::UnsupportedSolver(_))));
    }
}
