// SPDX-License-Identifier: MPL-2.0

//! Pluggable SAT backends.
//!
//! The clause compiler and the optimizer only talk to a [SatBackend]. Two
//! adapters are provided: [VarisatBackend], wrapping the `varisat` CDCL
//! solver, and [DpllBackend], a small reference solver. Both accept the same
//! clauses and agree on satisfiability; they may return different models.

use std::fmt::{self, Display, Formatter};
use std::ops::Not;

use crate::{ResolveError, SatSolverChoice};

mod dpll;
mod varisat;

pub use dpll::DpllBackend;
pub use varisat::VarisatBackend;

/// A signed boolean variable, in DIMACS numbering.
///
/// Variable 1 is reserved for the constant true, so [Lit::TRUE] and
/// [Lit::FALSE] can appear in clauses like any other literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Lit(i32);

impl Lit {
    /// The constant true.
    pub const TRUE: Lit = Lit(1);
    /// The constant false.
    pub const FALSE: Lit = Lit(-1);

    /// The positive literal of variable `var`, counted from 1.
    pub fn positive(var: u32) -> Self {
        debug_assert!(var > 0);
        Lit(var as i32)
    }

    /// The variable, counted from 1.
    pub fn var(self) -> u32 {
        self.0.unsigned_abs()
    }

    /// Whether the literal is not negated.
    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Whether the literal is [Lit::TRUE] or [Lit::FALSE].
    pub fn is_const(self) -> bool {
        self.var() == 1
    }

    /// The DIMACS integer of this literal.
    pub fn to_dimacs(self) -> isize {
        self.0 as isize
    }
}

impl Not for Lit {
    type Output = Lit;

    fn not(self) -> Lit {
        Lit(-self.0)
    }
}

impl Display for Lit {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A satisfying assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    /// `values[v]` is the value of variable `v`; index 0 is unused.
    values: Vec<bool>,
}

impl Model {
    /// A model over `num_vars` variables, all false except the constant.
    pub(crate) fn new(num_vars: u32) -> Self {
        let mut values = vec![false; num_vars as usize + 1];
        if num_vars >= 1 {
            values[1] = true;
        }
        Self { values }
    }

    pub(crate) fn set(&mut self, lit: Lit) {
        if let Some(value) = self.values.get_mut(lit.var() as usize) {
            *value = lit.is_positive();
        }
    }

    /// The value of `lit`. Variables unknown to the model are false.
    pub fn value(&self, lit: Lit) -> bool {
        let value = self.values.get(lit.var() as usize).copied().unwrap_or(false);
        value == lit.is_positive()
    }

    /// The number of variables the model assigns.
    pub fn num_vars(&self) -> u32 {
        (self.values.len() - 1) as u32
    }
}

/// An incremental CNF solver.
///
/// Clauses added between calls to [SatBackend::solve] are kept. Clauses added
/// after [SatBackend::push_checkpoint] are discarded by the matching
/// [SatBackend::pop_checkpoint], which lets the optimizer probe a bound and
/// take it back if it fails.
pub trait SatBackend {
    /// Allocates a fresh variable.
    fn new_var(&mut self) -> Lit;

    /// The number of variables allocated so far.
    fn num_vars(&self) -> u32;

    /// Adds a clause. The empty clause makes the problem unsatisfiable.
    fn add_clause(&mut self, clause: &[Lit]);

    /// Solves under `assumptions`; `None` means unsatisfiable.
    fn solve(&mut self, assumptions: &[Lit]) -> Result<Option<Model>, ResolveError>;

    /// Opens a scope for clauses added from now on.
    fn push_checkpoint(&mut self);

    /// Discards the clauses added since the matching [SatBackend::push_checkpoint].
    fn pop_checkpoint(&mut self);

    /// The number of clauses currently in force.
    fn clause_count(&self) -> usize;
}

/// A backend of the configured kind, with the constant variable allocated.
pub fn new_backend(choice: SatSolverChoice) -> Box<dyn SatBackend> {
    let mut backend: Box<dyn SatBackend> = match choice {
        SatSolverChoice::Varisat => Box::new(VarisatBackend::new()),
        SatSolverChoice::Dpll => Box::new(DpllBackend::new()),
    };
    let constant = backend.new_var();
    debug_assert_eq!(constant, Lit::TRUE);
    backend.add_clause(&[Lit::TRUE]);
    backend
}

// TESTS #######################################################################

#[cfg(test)]
mod tests {
    use super::*;

    fn backends() -> [Box<dyn SatBackend>; 2] {
        [
            new_backend(SatSolverChoice::Varisat),
            new_backend(SatSolverChoice::Dpll),
        ]
    }

    #[test]
    fn constant_and_assumptions() {
        for mut backend in backends() {
            let a = backend.new_var();
            let b = backend.new_var();
            backend.add_clause(&[a, b]);
            let model = backend.solve(&[!a]).unwrap().unwrap();
            assert!(model.value(Lit::TRUE));
            assert!(!model.value(Lit::FALSE));
            assert!(model.value(b));
            assert!(backend.solve(&[!a, !b]).unwrap().is_none());
            assert!(backend.solve(&[]).unwrap().is_some());
        }
    }

    #[test]
    fn checkpoints_scope_clauses() {
        for mut backend in backends() {
            let a = backend.new_var();
            backend.push_checkpoint();
            backend.add_clause(&[a]);
            backend.push_checkpoint();
            backend.add_clause(&[!a]);
            assert!(backend.solve(&[]).unwrap().is_none());
            backend.pop_checkpoint();
            let model = backend.solve(&[]).unwrap().unwrap();
            assert!(model.value(a));
            backend.pop_checkpoint();
            assert!(backend.solve(&[!a]).unwrap().is_some());
        }
    }

    #[test]
    fn empty_clause_is_unsatisfiable() {
        for mut backend in backends() {
            backend.push_checkpoint();
            backend.add_clause(&[]);
            assert!(backend.solve(&[]).unwrap().is_none());
            backend.pop_checkpoint();
            assert!(backend.solve(&[]).unwrap().is_some());
        }
    }
}
