// tests/test_snapshot.rs
//! The JSONL debug snapshot stream.

use warren::{compile, parse_program, parse_query, solve_with, MachineConfig};

fn run_traced(program: &str, query: &str) -> Vec<warren::machine::snapshot::MachineSnapshot> {
    let program = parse_program(program).expect("program parses");
    let db = compile(&program.clauses).expect("program compiles");
    let goals = parse_query(query).expect("query parses");
    let config = MachineConfig { trace: true, ..MachineConfig::default() };
    let mut solutions = solve_with(&db, &goals, config).expect("query compiles");
    for solution in &mut solutions {
        solution.expect("no machine errors");
    }
    solutions.machine().trace_log.clone()
}

#[test]
fn one_record_per_step_with_clause_table_first() {
    let log = run_traced("bit(0).\nbit(1).\n", "bit(X)");
    assert!(!log.is_empty());
    assert!(log[0].clauses.is_some());
    assert!(log[1..].iter().all(|record| record.clauses.is_none()));
    let table = log[0].clauses.as_ref().unwrap();
    // Two bit clauses plus the compiled query.
    assert_eq!(table.len(), 3);
    assert!(table.iter().any(|listing| listing.functor == "bit/1"));
    assert!(table.iter().any(|listing| listing.functor == "?-/0"));
}

#[test]
fn records_serialize_with_the_documented_field_names() {
    let log = run_traced("bit(0).\n", "bit(X)");
    let line = serde_json::to_string(&log[0]).expect("snapshot serializes");
    for field in [
        "\"Mode\"",
        "\"Continuation\"",
        "\"ComplexArg\"",
        "\"CodePtr\"",
        "\"Reg\"",
        "\"Clauses\"",
        "\"Envs\"",
        "\"EnvPos\"",
        "\"ChoicePoints\"",
        "\"ChoicePos\"",
        "\"UnifFrames\"",
        "\"Attributes\"",
        "\"Backtrack\"",
    ] {
        assert!(line.contains(field), "missing {} in {}", field, line);
    }
}

#[test]
fn instruction_addresses_render_with_clause_position() {
    let log = run_traced("bit(0).\nbit(1).\n", "bit(X)");
    let addr = &log[0].code_ptr.addr;
    assert!(addr.starts_with("?-/0#0["), "unexpected address {}", addr);
}

/// The record that triggered backtracking is flagged; failure bindings
/// show up in the environment snapshots before it.
#[test]
fn failing_unification_is_flagged_and_bindings_visible() {
    let log = run_traced("", "P1 = p(X, a, f(b)), P2 = p(f(Y), Y, X), P1 = P2");
    let failing: Vec<_> = log.iter().filter(|record| record.backtrack).collect();
    assert_eq!(failing.len(), 1);
    // The failing record is the final inline unification; by then X has
    // been bound to f(Y) and Y to a, visible through the query environment.
    let last = failing[0];
    let env = &last.envs[0];
    let x_slot = env.permanent_vars[1].as_ref().expect("X is initialized");
    assert_eq!(x_slot, "f(a)");
    let y_slot = env.permanent_vars[3].as_ref().expect("Y is initialized");
    assert_eq!(y_slot, "a");
}

#[test]
fn choice_points_snapshot_their_alternatives_and_trail() {
    let log = run_traced("pick(a).\npick(b).\n", "pick(X), fail");
    // While the first alternative runs, the choice point shows the second
    // and the trailed binding of X.
    let with_cp = log
        .iter()
        .find(|record| !record.choice_points.is_empty() && !record.choice_points[0].trail.is_empty())
        .expect("some record has a trailed choice point");
    let cp = &with_cp.choice_points[0];
    assert_eq!(cp.next_alternative.as_deref(), Some("pick/1#1[0]"));
    assert_eq!(cp.trail[0].term, "a");
}
