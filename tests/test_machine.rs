// tests/test_machine.rs
//! Machine-level behavior: last-call optimization, budgets, limits, and
//! strict mode.

use warren::{
    compile, parse_program, parse_query, solve_with, MachineConfig, MachineError, Machine,
};

fn db_for(program: &str) -> warren::Database {
    let program = parse_program(program).expect("program parses");
    compile(&program.clauses).expect("program compiles")
}

/// A tail-recursive predicate runs in constant environment depth; forcing
/// a trailing goal after the recursive call makes the depth grow with the
/// input instead. Same answers either way.
#[test]
fn last_call_optimization_flattens_env_depth() {
    let tail_db = db_for("count([]).\ncount([_|T]) :- count(T).\n");
    let plodding_db = db_for("count([]).\ncount([_|T]) :- count(T), true.\n");
    let goals = parse_query("count([a, b, c, d, e, f])").expect("query parses");

    let mut tail = Machine::new(&tail_db, &goals).expect("query compiles");
    assert!(tail.next_solution().expect("no machine errors").is_some());

    let mut plodding = Machine::new(&plodding_db, &goals).expect("query compiles");
    assert!(plodding.next_solution().expect("no machine errors").is_some());

    // Both find exactly one answer.
    assert_eq!(tail.next_solution().expect("no machine errors"), None);
    assert_eq!(plodding.next_solution().expect("no machine errors"), None);

    assert!(
        tail.stats.max_env_depth < plodding.stats.max_env_depth,
        "tail {} vs plodding {}",
        tail.stats.max_env_depth,
        plodding.stats.max_env_depth
    );
}

/// The step budget is checked at every instruction boundary; exceeding it
/// surfaces an operational error and exhausts the iterator.
#[test]
fn step_budget_exceeded_is_an_error() {
    let db = db_for("spin :- spin.\n");
    let goals = parse_query("spin").expect("query parses");
    let config = MachineConfig { step_limit: Some(500), ..MachineConfig::default() };
    let mut solutions = solve_with(&db, &goals, config).expect("query compiles");
    match solutions.next() {
        Some(Err(MachineError::StepBudgetExceeded(500))) => {}
        other => panic!("expected a step budget error, got {:?}", other),
    }
    assert!(solutions.next().is_none());
}

/// Unbounded non-tail recursion trips the depth limit instead of eating
/// memory forever.
#[test]
fn depth_limit_exceeded_is_an_error() {
    let db = db_for("sink :- sink, fail.\n");
    let goals = parse_query("sink").expect("query parses");
    let config = MachineConfig { depth_limit: Some(64), ..MachineConfig::default() };
    let mut solutions = solve_with(&db, &goals, config).expect("query compiles");
    match solutions.next() {
        Some(Err(MachineError::DepthLimitExceeded(64))) => {}
        other => panic!("expected a depth limit error, got {:?}", other),
    }
}

/// Unknown predicates fail quietly by default and error under strict mode.
#[test]
fn strict_mode_surfaces_unknown_predicates() {
    let db = db_for("known(a).\n");
    let goals = parse_query("missing(X)").expect("query parses");

    let lax: Vec<_> = solve_with(&db, &goals, MachineConfig::default())
        .expect("query compiles")
        .collect();
    assert!(lax.is_empty());

    let config = MachineConfig { strict: true, ..MachineConfig::default() };
    let mut strict = solve_with(&db, &goals, config).expect("query compiles");
    match strict.next() {
        Some(Err(MachineError::UnknownPredicate(functor))) => {
            assert_eq!(functor.to_string(), "missing/1");
        }
        other => panic!("expected an unknown predicate error, got {:?}", other),
    }
}

/// Answer order depends only on clause source order and query structure.
#[test]
fn answers_are_deterministic_across_runs() {
    let db = db_for("r(x).\nr(y).\ns(y).\ns(z).\n");
    let goals = parse_query("r(A), s(B)").expect("query parses");
    let first: Vec<_> = solve_with(&db, &goals, MachineConfig::default())
        .expect("query compiles")
        .collect::<Result<Vec<_>, _>>()
        .expect("no machine errors");
    let second: Vec<_> = solve_with(&db, &goals, MachineConfig::default())
        .expect("query compiles")
        .collect::<Result<Vec<_>, _>>()
        .expect("no machine errors");
    assert_eq!(first, second);
    assert_eq!(first.len(), 4);
}

/// Resuming the iterator past exhaustion stays exhausted.
#[test]
fn exhausted_iterator_stays_exhausted() {
    let db = db_for("one(a).\n");
    let goals = parse_query("one(X)").expect("query parses");
    let mut machine = Machine::new(&db, &goals).expect("query compiles");
    assert!(machine.next_solution().expect("no machine errors").is_some());
    assert_eq!(machine.next_solution().expect("no machine errors"), None);
    assert_eq!(machine.next_solution().expect("no machine errors"), None);
}
