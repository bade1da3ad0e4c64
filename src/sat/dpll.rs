// SPDX-License-Identifier: MPL-2.0

use super::{Lit, Model, SatBackend};
use crate::ResolveError;

/// A plain DPLL solver with unit propagation.
///
/// Slow on anything but small formulas. It exists as an independent
/// reference for the CDCL backend.
#[derive(Debug, Default)]
pub struct DpllBackend {
    num_vars: u32,
    clauses: Vec<Vec<Lit>>,
    scopes: Vec<usize>,
}

impl DpllBackend {
    /// An empty formula.
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Value {
    Unset,
    True,
    False,
}

struct Search<'c> {
    clauses: &'c [Vec<Lit>],
    values: Vec<Value>,
    trail: Vec<u32>,
}

impl Search<'_> {
    fn value(&self, lit: Lit) -> Value {
        match (self.values[lit.var() as usize], lit.is_positive()) {
            (Value::Unset, _) => Value::Unset,
            (Value::True, true) | (Value::False, false) => Value::True,
            _ => Value::False,
        }
    }

    fn assign(&mut self, lit: Lit) {
        self.values[lit.var() as usize] = if lit.is_positive() {
            Value::True
        } else {
            Value::False
        };
        self.trail.push(lit.var());
    }

    fn undo(&mut self, len: usize) {
        for var in self.trail.drain(len..) {
            self.values[var as usize] = Value::Unset;
        }
    }

    /// Assigns every unit literal; false on conflict.
    fn propagate(&mut self) -> bool {
        loop {
            let mut changed = false;
            for clause in self.clauses {
                let mut unassigned = None;
                let mut open = 0;
                let mut satisfied = false;
                for &lit in clause {
                    match self.value(lit) {
                        Value::True => {
                            satisfied = true;
                            break;
                        }
                        Value::Unset => {
                            open += 1;
                            unassigned = Some(lit);
                        }
                        Value::False => {}
                    }
                }
                if satisfied {
                    continue;
                }
                match (open, unassigned) {
                    (0, _) => return false,
                    (1, Some(lit)) => {
                        self.assign(lit);
                        changed = true;
                    }
                    _ => {}
                }
            }
            if !changed {
                return true;
            }
        }
    }

    /// Depth-first search over the unassigned variables, trying false
    /// before true. Decisions live on an explicit stack.
    fn search(&mut self) -> bool {
        let mut decisions: Vec<Decision> = Vec::new();
        loop {
            if self.propagate() {
                // Variables below the latest decision are all assigned.
                let from = decisions.last().map_or(1, |d| d.var.var() as usize + 1);
                let Some(var) = (from..self.values.len()).find(|&v| self.values[v] == Value::Unset)
                else {
                    return true;
                };
                let var = Lit::positive(var as u32);
                decisions.push(Decision {
                    mark: self.trail.len(),
                    var,
                    flipped: false,
                });
                self.assign(!var);
                continue;
            }
            loop {
                let Some(decision) = decisions.last_mut() else {
                    return false;
                };
                self.undo(decision.mark);
                if decision.flipped {
                    decisions.pop();
                    continue;
                }
                decision.flipped = true;
                let var = decision.var;
                self.assign(var);
                break;
            }
        }
    }
}

struct Decision {
    /// Trail length before the decision.
    mark: usize,
    var: Lit,
    flipped: bool,
}

impl SatBackend for DpllBackend {
    fn new_var(&mut self) -> Lit {
        self.num_vars += 1;
        Lit::positive(self.num_vars)
    }

    fn num_vars(&self) -> u32 {
        self.num_vars
    }

    fn add_clause(&mut self, clause: &[Lit]) {
        self.clauses.push(clause.to_vec());
    }

    fn solve(&mut self, assumptions: &[Lit]) -> Result<Option<Model>, ResolveError> {
        let mut search = Search {
            clauses: &self.clauses,
            values: vec![Value::Unset; self.num_vars as usize + 1],
            trail: Vec::new(),
        };
        for &lit in assumptions {
            match search.value(lit) {
                Value::False => return Ok(None),
                Value::Unset => search.assign(lit),
                Value::True => {}
            }
        }
        if !search.search() {
            return Ok(None);
        }
        let mut model = Model::new(self.num_vars);
        for var in 1..=self.num_vars {
            let lit = Lit::positive(var);
            model.set(if search.value(lit) == Value::True { lit } else { !lit });
        }
        Ok(Some(model))
    }

    fn push_checkpoint(&mut self) {
        self.scopes.push(self.clauses.len());
    }

    fn pop_checkpoint(&mut self) {
        if let Some(len) = self.scopes.pop() {
            self.clauses.truncate(len);
        }
    }

    fn clause_count(&self) -> usize {
        self.clauses.len()
    }
}

// TESTS #######################################################################

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backtracks_over_wrong_decisions() {
        let mut dpll = DpllBackend::new();
        let x = dpll.new_var();
        let y = dpll.new_var();
        let z = dpll.new_var();
        dpll.add_clause(&[x, y]);
        dpll.add_clause(&[x, !y]);
        dpll.add_clause(&[!x, z]);
        let model = dpll.solve(&[]).unwrap().unwrap();
        assert!(model.value(x) && model.value(z));

        dpll.push_checkpoint();
        dpll.add_clause(&[!z]);
        assert!(dpll.solve(&[]).unwrap().is_none());
        dpll.pop_checkpoint();
        assert!(dpll.solve(&[!y]).unwrap().is_some());
    }

    #[test]
    fn deep_searches_do_not_recurse() {
        let mut dpll = DpllBackend::new();
        let vars: Vec<Lit> = (0..100_000).map(|_| dpll.new_var()).collect();
        let last = vars[vars.len() - 1];
        dpll.add_clause(&[vars[0], last]);
        let model = dpll.solve(&[]).unwrap().unwrap();
        assert!(!model.value(vars[0]));
        assert!(model.value(last));
        assert!(vars[1..vars.len() - 1].iter().all(|&v| !model.value(v)));
    }
}
