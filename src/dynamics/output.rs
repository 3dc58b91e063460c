use std::io::Write;
use std::path::Path;

use csv::WriterBuilder;
use nalgebra::{DMatrix, DVector};

use super::solver::BlockSolver;
use crate::error::{GridError, GridResult};

impl BlockSolver {
    /// Writes a trajectory as CSV with a `time, <var names...>` header.
    pub fn write_simulation_csv<W: Write>(
        &self,
        writer: W,
        times: &DVector<f64>,
        trajectory: &DMatrix<f64>,
    ) -> GridResult<()> {
        if trajectory.nrows() != times.len() {
            return Err(GridError::Dimension {
                what: "trajectory rows",
                expected: times.len(),
                got: trajectory.nrows(),
            });
        }
        if trajectory.ncols() != self.n_vars() {
            return Err(GridError::Dimension {
                what: "trajectory columns",
                expected: self.n_vars(),
                got: trajectory.ncols(),
            });
        }
        let mut wtr = WriterBuilder::new().from_writer(writer);
        wtr.write_record(std::iter::once("time").chain(self.var_names().iter().map(String::as_str)))?;
        for (r, t) in times.iter().enumerate() {
            let traj_row = trajectory.row(r);
            let row = std::iter::once(*t).chain(traj_row.iter().copied());
            wtr.write_record(row.map(|v| v.to_string()))?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Saves a trajectory returned by [`BlockSolver::simulate`] to `path`.
    pub fn save_simulation_to_csv(
        &self,
        path: impl AsRef<Path>,
        times: &DVector<f64>,
        trajectory: &DMatrix<f64>,
    ) -> GridResult<()> {
        let file = std::fs::File::create(path)?;
        self.write_simulation_csv(file, times, trajectory)
    }
}
