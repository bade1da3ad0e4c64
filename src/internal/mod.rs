// SPDX-License-Identifier: MPL-2.0

//! Non exposed modules.

mod clauses;

pub(crate) use clauses::{Clauses, Objective, Polarity};
