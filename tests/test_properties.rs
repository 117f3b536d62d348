// tests/test_properties.rs
//! Property tests over randomly shaped ground terms.

use quickcheck::quickcheck;
use warren::{compile, solve, Term};

/// Builds a small ground term from a byte recipe. The recipe drives both
/// the shape and the atom names, so distinct recipes usually give
/// distinct terms.
fn ground_term(recipe: &[u8], depth: usize) -> Term {
    let Some((&first, rest)) = recipe.split_first() else {
        return Term::atom("leaf");
    };
    if depth == 0 || first % 3 == 0 {
        return Term::atom(format!("a{}", first % 7));
    }
    let arity = (first as usize % 2) + 1;
    let chunk = rest.len() / arity.max(1);
    let args = (0..arity)
        .map(|i| {
            let lo = i * chunk;
            let hi = ((i + 1) * chunk).min(rest.len());
            ground_term(&rest[lo..hi], depth - 1)
        })
        .collect();
    Term::compound(format!("f{}", first % 5), args)
}

fn unifies(left: &Term, right: &Term) -> bool {
    let db = compile(&[]).expect("empty program compiles");
    let goals = vec![Term::compound("=", vec![left.clone(), right.clone()])];
    let results: Vec<_> = solve(&db, &goals)
        .expect("query compiles")
        .collect::<Result<Vec<_>, _>>()
        .expect("no machine errors");
    results.len() == 1
}

quickcheck! {
    /// unify(a, b) succeeds iff unify(b, a) succeeds.
    fn prop_unification_symmetric(a: Vec<u8>, b: Vec<u8>) -> bool {
        let left = ground_term(&a, 3);
        let right = ground_term(&b, 3);
        unifies(&left, &right) == unifies(&right, &left)
    }

    /// Ground terms unify exactly when they are structurally equal.
    fn prop_ground_unification_is_equality(a: Vec<u8>, b: Vec<u8>) -> bool {
        let left = ground_term(&a, 3);
        let right = ground_term(&b, 3);
        unifies(&left, &right) == (left == right)
    }

    /// A term always unifies with itself.
    fn prop_unification_reflexive(a: Vec<u8>) -> bool {
        let term = ground_term(&a, 3);
        unifies(&term, &term)
    }

    /// The answer sequence is a pure function of the program and query.
    fn prop_answers_deterministic(a: Vec<u8>) -> bool {
        let fact = warren::Clause::fact(Term::compound("holds", vec![ground_term(&a, 2)]));
        let db = compile(&[fact]).expect("program compiles");
        let goals = vec![Term::compound("holds", vec![Term::var("X")])];
        let run = || -> Vec<_> {
            solve(&db, &goals)
                .expect("query compiles")
                .collect::<Result<Vec<_>, _>>()
                .expect("no machine errors")
        };
        run() == run()
    }
}
