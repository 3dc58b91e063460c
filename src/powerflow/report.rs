use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tabled::{Table, Tabled, settings::Style};

use super::options::SolverType;
use super::results::FloatWrapper;

/// One method attempt made by the dispatcher.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Attempt {
    pub method: SolverType,
    pub converged: bool,
    pub norm_f: f64,
    pub iterations: usize,
    pub elapsed: Duration,
}

/// Ordered record of every method tried in a run.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ConvergenceReport {
    pub attempts: Vec<Attempt>,
}

#[derive(Tabled)]
struct AttemptRow {
    method: String,
    converged: bool,
    error: String,
    iterations: usize,
    elapsed_ms: FloatWrapper,
}

impl ConvergenceReport {
    pub fn push(&mut self, attempt: Attempt) {
        self.attempts.push(attempt);
    }

    pub fn extend(&mut self, other: ConvergenceReport) {
        self.attempts.extend(other.attempts);
    }

    pub fn converged(&self) -> bool {
        self.attempts.last().is_some_and(|a| a.converged)
    }

    pub fn methods(&self) -> Vec<SolverType> {
        self.attempts.iter().map(|a| a.method).collect()
    }

    pub fn last(&self) -> Option<&Attempt> {
        self.attempts.last()
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn total_iterations(&self) -> usize {
        self.attempts.iter().map(|a| a.iterations).sum()
    }
}

impl fmt::Display for ConvergenceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows = self.attempts.iter().map(|a| AttemptRow {
            method: a.method.to_string(),
            converged: a.converged,
            error: format!("{:.3e}", a.norm_f),
            iterations: a.iterations,
            elapsed_ms: FloatWrapper::new(a.elapsed.as_secs_f64() * 1e3, 3),
        });
        write!(f, "{}", Table::new(rows).with(Style::markdown()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_table() {
        let mut report = ConvergenceReport::default();
        report.push(Attempt {
            method: SolverType::NewtonRaphson,
            converged: false,
            norm_f: 12.5,
            iterations: 25,
            elapsed: Duration::from_millis(2),
        });
        report.push(Attempt {
            method: SolverType::Iwamoto,
            converged: true,
            norm_f: 1e-9,
            iterations: 4,
            elapsed: Duration::from_millis(1),
        });
        assert!(report.converged());
        assert_eq!(report.total_iterations(), 29);
        let text = report.to_string();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("method") && lines[0].contains("converged"));
        assert!(lines[2].contains("Newton-Raphson") && lines[2].contains("false"));
        assert!(lines[3].contains("Iwamoto") && lines[3].contains("1.000e-9"));
    }
}
