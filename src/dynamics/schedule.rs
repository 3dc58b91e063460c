use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::error::{GridError, GridResult};
use crate::symbolic::Var;

/// Scheduled jump of a parameter value.
///
/// The new value applies to every step ending strictly after `time`, which
/// matches the left-continuous convention of `piecewise`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub time: f64,
    pub param: Var,
    pub value: f64,
}

impl Event {
    pub fn new(time: f64, param: Var, value: f64) -> Self {
        Self { time, param, value }
    }
}

// Merge priority: endpoints beat breakpoints, which beat plain grid points.
const GRID: u8 = 0;
const BREAKPOINT: u8 = 1;
const ENDPOINT: u8 = 2;

/// Builds the step boundaries of a simulation.
///
/// Regular points are `t0 + k h` (multiplied, not accumulated, so no drift).
/// Every breakpoint inside `(t0, t_end)` becomes a boundary of its own, grid
/// points closer than `1e-9 h` to a breakpoint are dropped, and the final
/// boundary is exactly `t_end`.
///
/// # Arguments
///
/// * `t0` - Start time.
/// * `t_end` - End time, `t_end >= t0`.
/// * `h` - Nominal step, strictly positive.
/// * `breakpoints` - Instants the integrator must land on.
///
/// # Returns
///
/// The ordered boundaries, starting with `t0`.
pub fn time_grid(t0: f64, t_end: f64, h: f64, breakpoints: &[f64]) -> GridResult<Vec<f64>> {
    if !(h.is_finite() && h > 0.0) {
        return Err(GridError::InvalidTimeGrid(format!("step {h} must be positive")));
    }
    if !(t0.is_finite() && t_end.is_finite()) || t_end < t0 {
        return Err(GridError::InvalidTimeGrid(format!(
            "cannot integrate from {t0} to {t_end}"
        )));
    }
    let eps = 1e-9 * h;
    let mut points: Vec<(OrderedFloat<f64>, u8)> = vec![(OrderedFloat(t0), ENDPOINT)];
    if t_end - t0 <= eps {
        return Ok(vec![t0]);
    }
    let mut k = 1usize;
    loop {
        let t = t0 + k as f64 * h;
        if t >= t_end - eps {
            break;
        }
        points.push((OrderedFloat(t), GRID));
        k += 1;
    }
    points.push((OrderedFloat(t_end), ENDPOINT));
    points.extend(
        breakpoints
            .iter()
            .filter(|b| b.is_finite() && **b > t0 + eps && **b < t_end - eps)
            .map(|b| (OrderedFloat(*b), BREAKPOINT)),
    );
    points.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

    let mut merged: Vec<(OrderedFloat<f64>, u8)> = Vec::with_capacity(points.len());
    for p in points {
        match merged.last_mut() {
            Some(last) if p.0.0 - last.0.0 < eps => {
                if p.1 > last.1 {
                    *last = p;
                }
            }
            _ => merged.push(p),
        }
    }
    Ok(merged.into_iter().map(|(t, _)| t.0).collect())
}

/// Events sorted by time with a cursor over the ones already applied.
#[derive(Debug, Default)]
pub(crate) struct EventQueue {
    events: Vec<(f64, usize, f64)>,
    cursor: usize,
}

impl EventQueue {
    /// `resolve` maps an event's parameter to its index in the parameter vector.
    pub(crate) fn new(
        events: &[Event],
        resolve: impl Fn(Var) -> GridResult<usize>,
    ) -> GridResult<Self> {
        let mut queue = events
            .iter()
            .map(|e| Ok((e.time, resolve(e.param)?, e.value)))
            .collect::<GridResult<Vec<_>>>()?;
        queue.sort_by(|a, b| OrderedFloat(a.0).cmp(&OrderedFloat(b.0)));
        Ok(Self {
            events: queue,
            cursor: 0,
        })
    }

    pub(crate) fn times(&self) -> impl Iterator<Item = f64> + '_ {
        self.events.iter().map(|e| e.0)
    }

    /// Applies every pending event strictly before `t` to `overrides`.
    pub(crate) fn advance(&mut self, t: f64, overrides: &mut [Option<f64>]) -> bool {
        let mut fired = false;
        while let Some(&(time, idx, value)) = self.events.get(self.cursor) {
            if time >= t {
                break;
            }
            overrides[idx] = Some(value);
            self.cursor += 1;
            fired = true;
        }
        fired
    }
}
