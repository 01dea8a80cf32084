// tests/expr_truth_table.rs

use tcc::dag::DependencyFlags;
use tcc::{DependencyExpr, TaskHandle};
use tcc_test_utils::builders::{SumController, sum_task};

/// Evaluate `expr` with the given satisfied flags.
fn eval(expr: &DependencyExpr, satisfied: &[(TaskHandle, bool)]) -> bool {
    let mut flags = DependencyFlags::new(satisfied.iter().map(|(h, _)| h.id()));
    for (handle, value) in satisfied {
        flags.mark(handle.id(), *value);
    }
    expr.evaluate(&flags)
}

#[test]
fn combinators_match_boolean_truth_tables() {
    let mut ctl = SumController::new();
    let a = ctl.add_task("A", sum_task, 0);
    let b = ctl.add_task("B", sum_task, 0);
    let c = ctl.add_task("C", sum_task, 0);
    let d = ctl.add_task("D", sum_task, 0);
    let e = ctl.add_task("E", sum_task, 0);
    let f = ctl.add_task("F", sum_task, 0);

    // C <- A & B
    let c_expr = ctl.dependency_leaf(c, a).unwrap() & ctl.dependency_leaf(c, b).unwrap();
    // D <- A | B
    let d_expr = ctl.dependency_leaf(d, a).unwrap() | ctl.dependency_leaf(d, b).unwrap();
    // E <- !D
    let e_expr = !ctl.dependency_leaf(e, d).unwrap();
    // F <- B ^ D
    let f_expr = ctl.dependency_leaf(f, b).unwrap() ^ ctl.dependency_leaf(f, d).unwrap();

    ctl.set_dependency(c, c_expr.clone()).unwrap();
    ctl.set_dependency(d, d_expr.clone()).unwrap();
    ctl.set_dependency(e, e_expr.clone()).unwrap();
    ctl.set_dependency(f, f_expr.clone()).unwrap();

    // A B   C D E F
    let table = [
        ((false, false), (false, false, true, false)),
        ((true, false), (false, true, false, true)),
        ((false, true), (false, true, false, false)),
        ((true, true), (true, true, false, false)),
    ];

    for ((va, vb), expected) in table {
        let vc = eval(&c_expr, &[(a, va), (b, vb)]);
        let vd = eval(&d_expr, &[(a, va), (b, vb)]);
        let ve = eval(&e_expr, &[(d, vd)]);
        let vf = eval(&f_expr, &[(b, vb), (d, vd)]);
        assert_eq!((vc, vd, ve, vf), expected, "A={va} B={vb}");
    }
}

#[test]
fn conjunctive_flag_propagates() {
    let mut ctl = SumController::new();
    let a = ctl.add_task("A", sum_task, 0);
    let b = ctl.add_task("B", sum_task, 0);
    let c = ctl.add_task("C", sum_task, 0);

    let la = ctl.dependency_leaf(c, a).unwrap();
    let lb = ctl.dependency_leaf(c, b).unwrap();

    assert!(la.is_conjunctive());
    assert!((la.clone() & lb.clone()).is_conjunctive());
    assert!(!(la.clone() | lb.clone()).is_conjunctive());
    assert!(!(la.clone() ^ lb.clone()).is_conjunctive());
    assert!(!(!la.clone()).is_conjunctive());
    // A non-pure operand poisons the whole conjunction.
    assert!(!(la.clone() & (la.clone() | lb.clone())).is_conjunctive());

    assert!(DependencyExpr::always().is_conjunctive());
    assert!(!DependencyExpr::never().is_conjunctive());
}

#[test]
fn constants_ignore_flags() {
    let flags = DependencyFlags::default();
    assert!(DependencyExpr::always().evaluate(&flags));
    assert!(!DependencyExpr::never().evaluate(&flags));
    assert!(DependencyExpr::default().evaluate(&flags));
}

#[test]
fn leaf_registration_is_idempotent() {
    let mut ctl = SumController::new();
    let a = ctl.add_task("A", sum_task, 0);
    let b = ctl.add_task("B", sum_task, 0);

    let first = ctl.dependency_leaf(b, a).unwrap();
    let second = ctl.dependency_leaf(b, a).unwrap();
    assert_eq!(first, second);

    let topo = ctl.topology();
    let entry = topo.tasks.iter().find(|t| t.id == b.id()).unwrap();
    assert_eq!(entry.dependencies.len(), 1);
    assert_eq!(entry.inbox_capacity, 1);
}

#[test]
fn predecessors_lists_each_leaf_once() {
    let mut ctl = SumController::new();
    let a = ctl.add_task("A", sum_task, 0);
    let b = ctl.add_task("B", sum_task, 0);
    let c = ctl.add_task("C", sum_task, 0);

    let la = ctl.dependency_leaf(c, a).unwrap();
    let lb = ctl.dependency_leaf(c, b).unwrap();
    let expr = (la.clone() & lb) | !la;

    assert_eq!(expr.predecessors(), vec![a.id(), b.id()]);
}
