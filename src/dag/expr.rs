// src/dag/expr.rs

//! Boolean dependency expressions.
//!
//! An expression is a small tree over leaf predicates, each reading one
//! "has predecessor X finished" flag from the owning node's
//! [`DependencyFlags`]. Evaluation is a pure read and never blocks.
//!
//! Every expression also carries a derived *pure-conjunction* flag: leaves and
//! `always()` are pure, `AND` of two pure operands is pure, and everything
//! else (`OR`, `XOR`, `NOT`, `never()`) is not. Pool-bounded runs require
//! every task's expression to be pure.

use std::collections::HashMap;
use std::fmt;
use std::ops::{BitAnd, BitOr, BitXor, Not};

use crate::types::TaskId;

/// Per-node map of predecessor id → satisfied flag.
///
/// Owned and mutated by exactly one node activity during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyFlags {
    flags: HashMap<TaskId, bool>,
}

impl DependencyFlags {
    /// All flags start unset.
    pub fn new(predecessors: impl IntoIterator<Item = TaskId>) -> Self {
        Self {
            flags: predecessors.into_iter().map(|id| (id, false)).collect(),
        }
    }

    /// Unknown predecessors read as `false`.
    pub fn get(&self, predecessor: TaskId) -> bool {
        self.flags.get(&predecessor).copied().unwrap_or(false)
    }

    /// Returns `false` if `predecessor` is not tracked by this map.
    pub fn mark(&mut self, predecessor: TaskId, satisfied: bool) -> bool {
        match self.flags.get_mut(&predecessor) {
            Some(flag) => {
                *flag = satisfied;
                true
            }
            None => false,
        }
    }

    pub fn reset(&mut self) {
        for flag in self.flags.values_mut() {
            *flag = false;
        }
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Term {
    Const(bool),
    Leaf { owner: TaskId, predecessor: TaskId },
    Not(Box<Term>),
    And(Box<Term>, Box<Term>),
    Or(Box<Term>, Box<Term>),
    Xor(Box<Term>, Box<Term>),
}

impl Term {
    fn eval(&self, flags: &DependencyFlags) -> bool {
        match self {
            Term::Const(value) => *value,
            Term::Leaf { predecessor, .. } => flags.get(*predecessor),
            Term::Not(inner) => !inner.eval(flags),
            Term::And(lhs, rhs) => lhs.eval(flags) && rhs.eval(flags),
            Term::Or(lhs, rhs) => lhs.eval(flags) || rhs.eval(flags),
            Term::Xor(lhs, rhs) => lhs.eval(flags) != rhs.eval(flags),
        }
    }

    fn visit_leaves(&self, f: &mut impl FnMut(TaskId, TaskId)) {
        match self {
            Term::Const(_) => {}
            Term::Leaf { owner, predecessor } => f(*owner, *predecessor),
            Term::Not(inner) => inner.visit_leaves(f),
            Term::And(lhs, rhs) | Term::Or(lhs, rhs) | Term::Xor(lhs, rhs) => {
                lhs.visit_leaves(f);
                rhs.visit_leaves(f);
            }
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Const(true) => write!(f, "true"),
            Term::Const(false) => write!(f, "false"),
            Term::Leaf { predecessor, .. } => write!(f, "{predecessor}"),
            Term::Not(inner) => write!(f, "!{inner}"),
            Term::And(lhs, rhs) => write!(f, "({lhs} & {rhs})"),
            Term::Or(lhs, rhs) => write!(f, "({lhs} | {rhs})"),
            Term::Xor(lhs, rhs) => write!(f, "({lhs} ^ {rhs})"),
        }
    }
}

/// A gating condition for a task or for the termination.
///
/// Leaves are obtained from [`crate::Controller::dependency_leaf`] and
/// [`crate::Controller::termination_leaf`], which also register the edge.
/// Combine them with [`and`](Self::and), [`or`](Self::or),
/// [`xor`](Self::xor), [`not`](Self::not) or the `&`, `|`, `^`, `!` operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyExpr {
    term: Term,
    conjunctive: bool,
}

impl DependencyExpr {
    /// Always satisfied. The default gate of a task with no prerequisites.
    pub const fn always() -> Self {
        Self {
            term: Term::Const(true),
            conjunctive: true,
        }
    }

    /// Never satisfied.
    pub const fn never() -> Self {
        Self {
            term: Term::Const(false),
            conjunctive: false,
        }
    }

    pub(crate) fn leaf(owner: TaskId, predecessor: TaskId) -> Self {
        Self {
            term: Term::Leaf { owner, predecessor },
            conjunctive: true,
        }
    }

    pub fn and(lhs: DependencyExpr, rhs: DependencyExpr) -> Self {
        Self {
            conjunctive: lhs.conjunctive && rhs.conjunctive,
            term: Term::And(Box::new(lhs.term), Box::new(rhs.term)),
        }
    }

    pub fn or(lhs: DependencyExpr, rhs: DependencyExpr) -> Self {
        Self {
            term: Term::Or(Box::new(lhs.term), Box::new(rhs.term)),
            conjunctive: false,
        }
    }

    pub fn xor(lhs: DependencyExpr, rhs: DependencyExpr) -> Self {
        Self {
            term: Term::Xor(Box::new(lhs.term), Box::new(rhs.term)),
            conjunctive: false,
        }
    }

    pub fn not(expr: DependencyExpr) -> Self {
        Self {
            term: Term::Not(Box::new(expr.term)),
            conjunctive: false,
        }
    }

    /// Evaluate against the current flags.
    pub fn evaluate(&self, flags: &DependencyFlags) -> bool {
        self.term.eval(flags)
    }

    /// Whether the expression is built only from leaves joined by `AND`.
    pub fn is_conjunctive(&self) -> bool {
        self.conjunctive
    }

    /// First leaf owner in this expression that differs from `owner`.
    pub(crate) fn foreign_owner(&self, owner: TaskId) -> Option<TaskId> {
        let mut foreign = None;
        self.term.visit_leaves(&mut |leaf_owner, _| {
            if leaf_owner != owner && foreign.is_none() {
                foreign = Some(leaf_owner);
            }
        });
        foreign
    }

    /// Distinct predecessors read by this expression.
    pub fn predecessors(&self) -> Vec<TaskId> {
        let mut out = Vec::new();
        self.term.visit_leaves(&mut |_, predecessor| {
            if !out.contains(&predecessor) {
                out.push(predecessor);
            }
        });
        out
    }
}

impl Default for DependencyExpr {
    fn default() -> Self {
        Self::always()
    }
}

impl fmt::Display for DependencyExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.term.fmt(f)
    }
}

impl BitAnd for DependencyExpr {
    type Output = DependencyExpr;

    fn bitand(self, rhs: DependencyExpr) -> DependencyExpr {
        DependencyExpr::and(self, rhs)
    }
}

impl BitOr for DependencyExpr {
    type Output = DependencyExpr;

    fn bitor(self, rhs: DependencyExpr) -> DependencyExpr {
        DependencyExpr::or(self, rhs)
    }
}

impl BitXor for DependencyExpr {
    type Output = DependencyExpr;

    fn bitxor(self, rhs: DependencyExpr) -> DependencyExpr {
        DependencyExpr::xor(self, rhs)
    }
}

impl Not for DependencyExpr {
    type Output = DependencyExpr;

    fn not(self) -> DependencyExpr {
        DependencyExpr::not(self)
    }
}
