// SPDX-License-Identifier: MPL-2.0

//! Boolean gates, cardinality constraints and objective minimization on
//! top of a [SatBackend].
//!
//! Every gate folds constants: combining a literal with [Lit::TRUE] or
//! [Lit::FALSE], or with itself or its negation, returns an existing literal
//! instead of allocating a variable.

use log::{debug, trace};

use crate::sat::{Lit, Model, SatBackend};
use crate::{Map, ResolveError};

/// Which implications a gate variable must honor.
///
/// A gate `x = f(a, b)` only used positively (required true) needs
/// `x -> f(a, b)`; only used negatively, `f(a, b) -> x`. Both directions make
/// `x` equivalent to `f(a, b)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Polarity {
    Positive,
    Negative,
    Both,
}

impl Polarity {
    fn positive(self) -> bool {
        self != Polarity::Negative
    }

    fn negative(self) -> bool {
        self != Polarity::Positive
    }
}

/// A weighted sum of literals: `Σ coefficient · lit`.
pub(crate) type Objective = Vec<(u64, Lit)>;

/// A clause database with gate constructors.
pub(crate) struct Clauses {
    backend: Box<dyn SatBackend>,
}

impl Clauses {
    pub(crate) fn new(backend: Box<dyn SatBackend>) -> Self {
        Self { backend }
    }

    pub(crate) fn new_var(&mut self) -> Lit {
        self.backend.new_var()
    }

    pub(crate) fn num_vars(&self) -> u32 {
        self.backend.num_vars()
    }

    pub(crate) fn clause_count(&self) -> usize {
        self.backend.clause_count()
    }

    pub(crate) fn push_checkpoint(&mut self) {
        self.backend.push_checkpoint();
    }

    pub(crate) fn pop_checkpoint(&mut self) {
        self.backend.pop_checkpoint();
    }

    /// Adds `clause`, dropping false literals and skipping satisfied clauses.
    pub(crate) fn add_clause(&mut self, clause: &[Lit]) {
        if clause.contains(&Lit::TRUE) {
            return;
        }
        let lits: Vec<Lit> = clause.iter().copied().filter(|&l| l != Lit::FALSE).collect();
        self.backend.add_clause(&lits);
    }

    /// Requires `lit` to be true.
    pub(crate) fn require(&mut self, lit: Lit) {
        self.add_clause(&[lit]);
    }

    /// Requires at least one of `lits`.
    pub(crate) fn require_any(&mut self, lits: &[Lit]) {
        self.add_clause(lits);
    }

    /// Requires every one of `lits` to be false.
    pub(crate) fn prevent_all(&mut self, lits: impl IntoIterator<Item = Lit>) {
        for lit in lits {
            self.add_clause(&[!lit]);
        }
    }

    /// Solves the clauses in force.
    pub(crate) fn sat(&mut self) -> Result<Option<Model>, ResolveError> {
        trace!("invoking SAT with {} clauses", self.clause_count());
        self.backend.solve(&[])
    }

    /// Solves with `extra` clauses added, keeping them only if `keep` is set
    /// and the result is satisfiable.
    pub(crate) fn sat_with(
        &mut self,
        extra: &[Vec<Lit>],
        keep: bool,
    ) -> Result<Option<Model>, ResolveError> {
        self.push_checkpoint();
        for clause in extra {
            self.add_clause(clause);
        }
        let model = self.sat();
        self.pop_checkpoint();
        let model = model?;
        if keep && model.is_some() {
            for clause in extra {
                self.add_clause(clause);
            }
        }
        Ok(model)
    }

    fn gate(&mut self, pval: &[&[Lit]], nval: &[&[Lit]], polarity: Polarity) -> Lit {
        let x = self.new_var();
        if polarity.positive() {
            for clause in pval {
                let mut c = Vec::with_capacity(clause.len() + 1);
                c.push(!x);
                c.extend_from_slice(clause);
                self.add_clause(&c);
            }
        }
        if polarity.negative() {
            for clause in nval {
                let mut c = Vec::with_capacity(clause.len() + 1);
                c.push(x);
                c.extend_from_slice(clause);
                self.add_clause(&c);
            }
        }
        x
    }

    pub(crate) fn and(&mut self, f: Lit, g: Lit, polarity: Polarity) -> Lit {
        if f == Lit::FALSE || g == Lit::FALSE || f == !g {
            return Lit::FALSE;
        }
        if f == Lit::TRUE || f == g {
            return g;
        }
        if g == Lit::TRUE {
            return f;
        }
        let (f, g) = if g < f { (g, f) } else { (f, g) };
        self.gate(&[&[f], &[g]], &[&[!f, !g]], polarity)
    }

    pub(crate) fn or(&mut self, f: Lit, g: Lit, polarity: Polarity) -> Lit {
        if f == Lit::TRUE || g == Lit::TRUE || f == !g {
            return Lit::TRUE;
        }
        if f == Lit::FALSE || f == g {
            return g;
        }
        if g == Lit::FALSE {
            return f;
        }
        let (f, g) = if g < f { (g, f) } else { (f, g) };
        self.gate(&[&[f, g]], &[&[!f], &[!g]], polarity)
    }

    pub(crate) fn xor(&mut self, f: Lit, g: Lit, polarity: Polarity) -> Lit {
        if f == Lit::FALSE {
            return g;
        }
        if f == Lit::TRUE {
            return !g;
        }
        if g == Lit::FALSE {
            return f;
        }
        if g == Lit::TRUE {
            return !f;
        }
        if f == g {
            return Lit::FALSE;
        }
        if f == !g {
            return Lit::TRUE;
        }
        let (f, g) = if g < f { (g, f) } else { (f, g) };
        self.gate(&[&[f, g], &[!f, !g]], &[&[!f, g], &[f, !g]], polarity)
    }

    /// `if c then t else f`.
    pub(crate) fn ite(&mut self, c: Lit, t: Lit, f: Lit, polarity: Polarity) -> Lit {
        match (c, t, f) {
            (Lit::TRUE, _, _) => t,
            (Lit::FALSE, _, _) => f,
            (_, Lit::TRUE, _) => self.or(c, f, polarity),
            (_, Lit::FALSE, _) => self.and(!c, f, polarity),
            (_, _, Lit::FALSE) => self.and(c, t, polarity),
            (_, _, Lit::TRUE) => self.or(t, !c, polarity),
            _ if t == c => self.or(c, f, polarity),
            _ if t == !c => self.and(!c, f, polarity),
            _ if f == c => self.and(c, t, polarity),
            _ if f == !c => self.or(t, !c, polarity),
            _ if t == f => t,
            _ if t == !f => self.xor(c, f, polarity),
            _ => {
                let (c, t, f) = if t < f { (!c, f, t) } else { (c, t, f) };
                self.gate(
                    &[&[!c, t], &[c, f], &[t, f]],
                    &[&[!c, !t], &[c, !f], &[!t, !f]],
                    polarity,
                )
            }
        }
    }

    /// True iff every literal is.
    pub(crate) fn all(&mut self, lits: impl IntoIterator<Item = Lit>, polarity: Polarity) -> Lit {
        let mut vals: Vec<Lit> = Vec::new();
        for lit in lits {
            if lit == Lit::TRUE || vals.contains(&lit) {
                continue;
            }
            if lit == Lit::FALSE || vals.contains(&!lit) {
                return Lit::FALSE;
            }
            vals.push(lit);
        }
        match vals.as_slice() {
            [] => Lit::TRUE,
            [single] => *single,
            _ => {
                let units: Vec<[Lit; 1]> = vals.iter().map(|&v| [v]).collect();
                let pval: Vec<&[Lit]> = units.iter().map(|u| u.as_slice()).collect();
                let negated: Vec<Lit> = vals.iter().map(|&v| !v).collect();
                self.gate(&pval, &[&negated], polarity)
            }
        }
    }

    /// True iff some literal is.
    pub(crate) fn any(&mut self, lits: impl IntoIterator<Item = Lit>, polarity: Polarity) -> Lit {
        let mut vals: Vec<Lit> = Vec::new();
        for lit in lits {
            if lit == Lit::FALSE || vals.contains(&lit) {
                continue;
            }
            if lit == Lit::TRUE || vals.contains(&!lit) {
                return Lit::TRUE;
            }
            vals.push(lit);
        }
        match vals.as_slice() {
            [] => Lit::FALSE,
            [single] => *single,
            _ => {
                let units: Vec<[Lit; 1]> = vals.iter().map(|&v| [!v]).collect();
                let nval: Vec<&[Lit]> = units.iter().map(|u| u.as_slice()).collect();
                self.gate(&[&vals], &nval, polarity)
            }
        }
    }

    /// Requires at most one of `lits` to be true.
    pub(crate) fn require_at_most_one(&mut self, lits: &[Lit]) {
        if lits.len() < 5 {
            for (i, &a) in lits.iter().enumerate() {
                for &b in &lits[i + 1..] {
                    self.add_clause(&[!a, !b]);
                }
            }
        } else {
            let unit: Objective = lits.iter().map(|&l| (1, l)).collect();
            let bound = self.linear_bound(&unit, 0, 1, Polarity::Positive);
            self.require(bound);
        }
    }

    /// Requires exactly one of `lits` to be true.
    pub(crate) fn require_exactly_one(&mut self, lits: &[Lit]) {
        match lits {
            [] => self.add_clause(&[]),
            [single] => self.require(*single),
            _ => {
                let unit: Objective = lits.iter().map(|&l| (1, l)).collect();
                let bound = self.linear_bound(&unit, 1, 1, Polarity::Positive);
                self.require(bound);
            }
        }
    }

    /// A literal true iff `lo <= Σ c·x <= hi`, built as a binary decision
    /// diagram over the terms in increasing coefficient order.
    pub(crate) fn linear_bound(
        &mut self,
        objective: &[(u64, Lit)],
        lo: i64,
        hi: i64,
        polarity: Polarity,
    ) -> Lit {
        let (mut terms, offset) = preprocess(objective);
        let (mut lo, mut hi) = (lo - offset, hi - offset);
        let nprune = terms.iter().filter(|&&(c, _)| c > hi).count();
        let pruned: Vec<Lit> = terms[terms.len() - nprune..].iter().map(|&(_, l)| l).collect();
        terms.truncate(terms.len() - nprune);
        if nprune > 0 {
            trace!("eliminating {nprune} terms for bound violation");
        }
        let total: i64 = terms.iter().map(|&(c, _)| c).sum();
        lo = lo.max(0);
        hi = hi.min(total);
        if lo > hi {
            return Lit::FALSE;
        }
        let res = if terms.is_empty() {
            if lo == 0 {
                Lit::TRUE
            } else {
                Lit::FALSE
            }
        } else {
            self.bdd(&terms, lo, hi, polarity)
        };
        if pruned.is_empty() {
            return res;
        }
        let none_pruned = self.all(pruned.into_iter().map(|l| !l), polarity);
        self.and(res, none_pruned, polarity)
    }

    fn bdd(&mut self, terms: &[(i64, Lit)], lo: i64, hi: i64, polarity: Polarity) -> Lit {
        // The node (ndx, csum) bounds the sum of terms[..ndx] to
        // [lo - csum, hi - csum].
        let total_of = {
            let mut prefix = vec![0i64; terms.len() + 1];
            for (i, &(c, _)) in terms.iter().enumerate() {
                prefix[i + 1] = prefix[i] + c;
            }
            prefix
        };
        let target = (terms.len(), 0i64);
        let mut memo: Map<(usize, i64), Lit> = Map::default();
        let mut stack = vec![target];
        while let Some(&(ndx, csum)) = stack.last() {
            let total = total_of[ndx];
            let lower = lo - csum;
            let upper = hi - csum;
            if lower <= 0 && upper >= total {
                memo.insert((ndx, csum), Lit::TRUE);
                stack.pop();
                continue;
            }
            if lower > total || upper < 0 {
                memo.insert((ndx, csum), Lit::FALSE);
                stack.pop();
                continue;
            }
            let (c, lit) = terms[ndx - 1];
            let cond = Lit::positive(lit.var());
            let (if_true, if_false) = if lit.is_positive() {
                (csum + c, csum)
            } else {
                (csum, csum + c)
            };
            let Some(&t) = memo.get(&(ndx - 1, if_true)) else {
                stack.push((ndx - 1, if_true));
                continue;
            };
            let Some(&f) = memo.get(&(ndx - 1, if_false)) else {
                stack.push((ndx - 1, if_false));
                continue;
            };
            let node = self.ite(cond, t, f, polarity);
            memo.insert((ndx, csum), node);
            stack.pop();
        }
        memo[&target]
    }

    /// Minimizes `objective` over the models of the clauses in force and
    /// fixes the optimum as a hard constraint.
    ///
    /// The peak (largest active coefficient) is minimized first, then the
    /// sum, each by bisection. `trymax` starts the sum search just below
    /// the current value, which pays off when the optimum is expected to be
    /// close to it. Returns `None` if the clauses are unsatisfiable.
    pub(crate) fn minimize(
        &mut self,
        objective: &[(u64, Lit)],
        best: Option<Model>,
        trymax: bool,
    ) -> Result<Option<(Model, u64)>, ResolveError> {
        let best = match best {
            Some(model) if model.num_vars() >= self.num_vars() => Some(model),
            _ => {
                debug!("clauses added, recomputing solution");
                self.sat()?
            }
        };
        let Some(mut best) = best else {
            debug!("constraints are unsatisfiable");
            return Ok(None);
        };
        let (mut terms, _) = preprocess(objective);
        if terms.is_empty() {
            trace!("empty objective, trivial solution");
            return Ok(Some((best, 0)));
        }
        let maxval = terms.iter().map(|&(c, _)| c).max().unwrap_or(0);
        let phases: &[bool] = if maxval > 1 { &[true, false] } else { &[false] };

        let mut lo = 0i64;
        let mut try0 = Some(0i64);
        let mut bestval = 0i64;
        for &peak in phases {
            let eval = |model: &Model, terms: &[(i64, Lit)]| -> i64 {
                let active = terms.iter().filter(|(_, l)| model.value(*l)).map(|&(c, _)| c);
                if peak {
                    active.max().unwrap_or(0)
                } else {
                    active.sum()
                }
            };
            bestval = eval(&best, &terms);
            let mut hi = bestval;
            if trymax && !peak {
                try0 = Some(hi - 1);
            }
            trace!("initial {} range ({lo},{hi})", if peak { "peak" } else { "sum" });
            loop {
                let mid = try0.take().unwrap_or((lo + hi) / 2);
                self.push_checkpoint();
                if peak {
                    self.prevent_all(terms.iter().filter(|&&(c, _)| c > mid).map(|&(_, l)| l));
                    let within: Vec<Lit> = terms
                        .iter()
                        .filter(|&&(c, _)| lo <= c && c <= mid)
                        .map(|&(_, l)| l)
                        .collect();
                    if !within.is_empty() {
                        self.require_any(&within);
                    }
                } else {
                    let unsigned: Objective = terms.iter().map(|&(c, l)| (c as u64, l)).collect();
                    let bound = self.linear_bound(&unsigned, lo, mid, Polarity::Positive);
                    self.require(bound);
                }
                let probe = self.sat();
                self.pop_checkpoint();
                match probe? {
                    None => {
                        lo = mid + 1;
                        trace!("bisection failure, new range=({lo},{hi})");
                        if lo > hi {
                            break;
                        }
                    }
                    Some(model) => {
                        let done = lo == mid;
                        bestval = eval(&model, &terms);
                        best = model;
                        hi = bestval;
                        trace!("bisection success, new range=({lo},{hi})");
                        if done {
                            break;
                        }
                    }
                }
            }
            debug!(
                "final {} objective: {bestval}",
                if peak { "peak" } else { "sum" }
            );
            if peak {
                self.prevent_all(terms.iter().filter(|&&(c, _)| c > bestval).map(|&(_, l)| l));
                if bestval == 0 {
                    break;
                }
                terms.retain(|&(c, _)| c <= bestval);
                let sum: i64 = terms.iter().filter(|(_, l)| best.value(*l)).map(|&(c, _)| c).sum();
                try0 = Some(sum);
                lo = bestval;
            } else {
                let unsigned: Objective = terms.iter().map(|&(c, l)| (c as u64, l)).collect();
                let bound = self.linear_bound(&unsigned, 0, bestval, Polarity::Positive);
                self.require(bound);
            }
        }
        // Gates of the hard constraint may postdate `best`.
        if best.num_vars() < self.num_vars() {
            if let Some(model) = self.sat()? {
                best = model;
            }
        }
        Ok(Some((best, bestval.max(0) as u64)))
    }
}

/// Drops constant and zero terms, returning the remaining terms sorted by
/// coefficient and the constant part of the sum.
fn preprocess(objective: &[(u64, Lit)]) -> (Vec<(i64, Lit)>, i64) {
    let mut offset = 0i64;
    let mut terms = Vec::with_capacity(objective.len());
    for &(c, lit) in objective {
        match lit {
            _ if c == 0 || lit == Lit::FALSE => {}
            Lit::TRUE => offset += c as i64,
            _ => terms.push((c as i64, lit)),
        }
    }
    terms.sort();
    (terms, offset)
}

/// The value of `objective` under `model`.
#[cfg(test)]
fn evaluate(objective: &[(u64, Lit)], model: &Model) -> u64 {
    objective
        .iter()
        .filter(|(_, l)| model.value(*l))
        .map(|&(c, _)| c)
        .sum()
}

// TESTS #######################################################################
