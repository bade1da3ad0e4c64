// SPDX-License-Identifier: MPL-2.0

use log::trace;
use varisat::{ExtendFormula, Solver};

use super::{Lit, Model, SatBackend};
use crate::ResolveError;

/// [SatBackend] over the `varisat` CDCL solver.
///
/// Checkpoints are activation literals: every clause added inside a scope
/// gets the negated activation literal of each open scope appended, the
/// activations are assumed true while solving, and popping a scope asserts
/// its activation false for good.
pub struct VarisatBackend {
    solver: Solver<'static>,
    num_vars: u32,
    scopes: Vec<(Lit, usize)>,
    clause_count: usize,
    buffer: Vec<varisat::Lit>,
}

impl VarisatBackend {
    /// An empty formula.
    pub fn new() -> Self {
        Self {
            solver: Solver::new(),
            num_vars: 0,
            scopes: Vec::new(),
            clause_count: 0,
            buffer: Vec::new(),
        }
    }
}

impl Default for VarisatBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn to_varisat(lit: Lit) -> varisat::Lit {
    varisat::Lit::from_dimacs(lit.to_dimacs())
}

impl SatBackend for VarisatBackend {
    fn new_var(&mut self) -> Lit {
        self.num_vars += 1;
        Lit::positive(self.num_vars)
    }

    fn num_vars(&self) -> u32 {
        self.num_vars
    }

    fn add_clause(&mut self, clause: &[Lit]) {
        self.buffer.clear();
        self.buffer.extend(clause.iter().copied().map(to_varisat));
        self.buffer
            .extend(self.scopes.iter().map(|&(act, _)| to_varisat(!act)));
        self.solver.add_clause(&self.buffer);
        self.clause_count += 1;
    }

    fn solve(&mut self, assumptions: &[Lit]) -> Result<Option<Model>, ResolveError> {
        let assumed: Vec<varisat::Lit> = assumptions
            .iter()
            .chain(self.scopes.iter().map(|(act, _)| act))
            .copied()
            .map(to_varisat)
            .collect();
        self.solver.assume(&assumed);
        let satisfiable = self
            .solver
            .solve()
            .map_err(|err| ResolveError::Backend(err.to_string()))?;
        if !satisfiable {
            trace!("varisat: unsatisfiable with {} clauses", self.clause_count);
            return Ok(None);
        }
        let mut model = Model::new(self.num_vars);
        for lit in self.solver.model().unwrap_or_default() {
            let dimacs = lit.to_dimacs();
            if dimacs.unsigned_abs() <= self.num_vars as usize {
                model.set(if dimacs > 0 {
                    Lit::positive(dimacs as u32)
                } else {
                    !Lit::positive(dimacs.unsigned_abs() as u32)
                });
            }
        }
        Ok(Some(model))
    }

    fn push_checkpoint(&mut self) {
        let act = self.new_var();
        self.scopes.push((act, self.clause_count));
    }

    fn pop_checkpoint(&mut self) {
        if let Some((act, clause_count)) = self.scopes.pop() {
            self.solver.add_clause(&[to_varisat(!act)]);
            self.clause_count = clause_count;
        }
    }

    fn clause_count(&self) -> usize {
        self.clause_count
    }
}
