// tests/test_attributes.rs
//! Attributed variables: the attribute table, the unification-frame hook,
//! and snapshot/restore across backtracking.

use warren::machine::attributes::UnificationFrame;
use warren::machine::core::Machine as CoreMachine;
use warren::machine::error_handling::MachineError;
use warren::machine::term::Cell;
use warren::{compile, parse_program, parse_query, solve, Substitution};

fn db_for(program: &str) -> warren::Database {
    let program = parse_program(program).expect("program parses");
    compile(&program.clauses).expect("program compiles")
}

/// Accepts a binding only when the bound value is the atom `b`.
fn only_b(machine: &mut CoreMachine<'_>, frame: &UnificationFrame) -> Result<bool, MachineError> {
    Ok(matches!(
        machine.heap.walk(&frame.binding_value),
        Cell::Atom(ref name) if name == "b"
    ))
}

fn accept_all(
    machine: &mut CoreMachine<'_>,
    frame: &UnificationFrame,
) -> Result<bool, MachineError> {
    let _ = (machine, frame);
    Ok(true)
}

fn always_err(
    machine: &mut CoreMachine<'_>,
    frame: &UnificationFrame,
) -> Result<bool, MachineError> {
    let _ = (machine, frame);
    Err(MachineError::NoActiveStruct)
}

fn run_with_package(
    db: &warren::Database,
    query: &str,
    pkg: &str,
    hook: warren::machine::attributes::AttrHook,
) -> Result<Vec<Substitution>, MachineError> {
    let goals = parse_query(query).expect("query parses");
    let mut solutions = solve(db, &goals).expect("query compiles");
    solutions.machine_mut().register_attribute_package(pkg, hook);
    solutions.collect()
}

#[test]
fn hook_vetoes_or_admits_bindings() {
    let db = db_for("");
    let ok = run_with_package(&db, "put_attr(X, dom, marker), X = b", "dom", only_b)
        .expect("no machine errors");
    assert_eq!(ok.len(), 1);
    let vetoed = run_with_package(&db, "put_attr(X, dom, marker), X = a", "dom", only_b)
        .expect("no machine errors");
    assert!(vetoed.is_empty());
}

/// The hook runs between instruction boundaries during the search, so a
/// vetoed binding backtracks into the next alternative; the attribute
/// table is restored from the choice point snapshot along the way.
#[test]
fn veto_backtracks_into_next_alternative() {
    let db = db_for("pick(a).\npick(b).\npick(c).\n");
    let results = run_with_package(&db, "put_attr(X, dom, marker), pick(X)", "dom", only_b)
        .expect("no machine errors");
    let values: Vec<String> = results.iter().map(|s| s["X"].to_string()).collect();
    assert_eq!(values, vec!["b".to_string()]);
}

#[test]
fn get_attr_reads_back_the_attribute() {
    let db = db_for("");
    let results = run_with_package(
        &db,
        "put_attr(X, dom, range(a, b)), get_attr(X, dom, V)",
        "dom",
        accept_all,
    )
    .expect("no machine errors");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["V"].to_string(), "range(a, b)");
}

#[test]
fn get_attr_fails_without_an_attribute() {
    let db = db_for("");
    let results =
        run_with_package(&db, "get_attr(X, dom, V)", "dom", accept_all).expect("no machine errors");
    assert!(results.is_empty());
}

#[test]
fn del_attr_disarms_the_hook() {
    let db = db_for("");
    let results = run_with_package(
        &db,
        "put_attr(X, dom, marker), del_attr(X, dom), X = a",
        "dom",
        only_b,
    )
    .expect("no machine errors");
    assert_eq!(results.len(), 1);
}

#[test]
fn import_checks_registration() {
    let db = db_for("");
    let ok = run_with_package(&db, "import(dom)", "dom", accept_all).expect("no machine errors");
    assert_eq!(ok.len(), 1);

    let goals = parse_query("import(nowhere)").expect("query parses");
    let mut solutions = solve(&db, &goals).expect("query compiles");
    match solutions.next() {
        Some(Err(MachineError::UnknownAttributePackage(pkg))) => assert_eq!(pkg, "nowhere"),
        other => panic!("expected an unknown package error, got {:?}", other),
    }
}

#[test]
fn put_attr_requires_a_registered_package() {
    let db = db_for("");
    let goals = parse_query("put_attr(X, ghost, v)").expect("query parses");
    let mut solutions = solve(&db, &goals).expect("query compiles");
    match solutions.next() {
        Some(Err(MachineError::UnknownAttributePackage(_))) => {}
        other => panic!("expected an unknown package error, got {:?}", other),
    }
}

#[test]
fn put_attr_on_a_bound_term_errors() {
    let db = db_for("");
    let goals = parse_query("X = a, put_attr(X, dom, v)").expect("query parses");
    let mut solutions = solve(&db, &goals).expect("query compiles");
    solutions.machine_mut().register_attribute_package("dom", accept_all);
    match solutions.next() {
        Some(Err(MachineError::AttributeOnBoundTerm(_))) => {}
        other => panic!("expected a bound-term error, got {:?}", other),
    }
}

/// Handler errors backtrack by default and surface when configured to.
#[test]
fn handler_errors_default_to_failure() {
    let db = db_for("");
    let results = run_with_package(&db, "put_attr(X, dom, m), X = a", "dom", always_err)
        .expect("no machine errors");
    assert!(results.is_empty());

    let goals = parse_query("put_attr(X, dom, m), X = a").expect("query parses");
    let config = warren::MachineConfig {
        surface_attr_errors: true,
        ..warren::MachineConfig::default()
    };
    let mut solutions = warren::solve_with(&db, &goals, config).expect("query compiles");
    solutions.machine_mut().register_attribute_package("dom", always_err);
    match solutions.next() {
        Some(Err(MachineError::AttributeHandler(pkg, _))) => assert_eq!(pkg, "dom"),
        other => panic!("expected a surfaced handler error, got {:?}", other),
    }
}
