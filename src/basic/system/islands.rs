use std::collections::VecDeque;

use super::circuit::NumericalCircuit;

/// Electrically connected part of a circuit with the index maps back to it.
#[derive(Clone, Debug)]
pub struct Island {
    pub circuit: NumericalCircuit,
    /// `original_bus_idx[i]` is the full-circuit index of island bus `i`.
    pub original_bus_idx: Vec<usize>,
    /// `original_branch_idx[k]` is the full-circuit index of island branch `k`.
    pub original_branch_idx: Vec<usize>,
}

impl NumericalCircuit {
    /// Splits the circuit into its connected components.
    ///
    /// Only active buses joined by active branches are connected. Islands are
    /// ordered by their lowest bus index and keep the original relative order
    /// of buses and branches.
    pub fn split_into_islands(&self, ignore_single_node_islands: bool) -> Vec<Island> {
        let nbus = self.nbus();
        let usable = |k: usize| {
            let br = &self.branches[k];
            br.active
                && br.from < nbus
                && br.to < nbus
                && self.buses[br.from].active
                && self.buses[br.to].active
        };
        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); nbus];
        for k in (0..self.nbranch()).filter(|k| usable(*k)) {
            let br = &self.branches[k];
            adjacency[br.from].push(br.to);
            adjacency[br.to].push(br.from);
        }

        let mut label = vec![usize::MAX; nbus];
        let mut n_islands = 0;
        for start in 0..nbus {
            if label[start] != usize::MAX || !self.buses[start].active {
                continue;
            }
            let mut queue = VecDeque::from([start]);
            label[start] = n_islands;
            while let Some(i) = queue.pop_front() {
                for &j in &adjacency[i] {
                    if label[j] == usize::MAX {
                        label[j] = n_islands;
                        queue.push_back(j);
                    }
                }
            }
            n_islands += 1;
        }

        let mut islands: Vec<Island> = (0..n_islands)
            .map(|_| Island {
                circuit: NumericalCircuit::new(self.sbase),
                original_bus_idx: Vec::new(),
                original_branch_idx: Vec::new(),
            })
            .collect();
        let mut local = vec![usize::MAX; nbus];
        for (i, bus) in self.buses.iter().enumerate() {
            if label[i] == usize::MAX {
                continue;
            }
            let island = &mut islands[label[i]];
            local[i] = island.circuit.add_bus(bus.clone());
            island.original_bus_idx.push(i);
        }
        for (k, br) in self.branches.iter().enumerate() {
            if !usable(k) {
                continue;
            }
            let island = &mut islands[label[br.from]];
            let mut br = br.clone();
            br.from = local[br.from];
            br.to = local[br.to];
            island.circuit.add_branch(br);
            island.original_branch_idx.push(k);
        }
        if ignore_single_node_islands {
            islands.retain(|isl| isl.original_bus_idx.len() > 1);
        }
        islands
    }
}

#[cfg(test)]
mod tests {
    use crate::basic::system::{Branch, Bus, BusType, NumericalCircuit};

    #[test]
    fn test_split_two_islands_and_orphan() {
        let mut c = NumericalCircuit::new(100.0);
        for i in 0..6 {
            c.add_bus(Bus::new(format!("b{i}"), BusType::PQ));
        }
        c.add_branch(Branch::new("a", 0, 2, 0.0, 0.1, 0.0));
        c.add_branch(Branch::new("b", 1, 3, 0.0, 0.1, 0.0));
        c.add_branch(Branch::new("c", 2, 4, 0.0, 0.1, 0.0));
        let mut open = Branch::new("d", 4, 1, 0.0, 0.1, 0.0);
        open.active = false;
        c.add_branch(open);

        let islands = c.split_into_islands(false);
        assert_eq!(islands.len(), 3);
        assert_eq!(islands[0].original_bus_idx, vec![0, 2, 4]);
        assert_eq!(islands[0].original_branch_idx, vec![0, 2]);
        assert_eq!(islands[1].original_bus_idx, vec![1, 3]);
        assert_eq!(islands[2].original_bus_idx, vec![5]);
        let br = &islands[0].circuit.branches[1];
        assert_eq!((br.from, br.to), (1, 2));

        let islands = c.split_into_islands(true);
        assert_eq!(islands.len(), 2);
    }
}
