// src/prolog/parser.rs
//! Pest-based parser for the Prolog surface syntax.
//!
//! Supports facts, rules, `?-` queries, lists (with `|` tails), quoted and
//! symbolic atoms, digit atoms, the dotted pair functor `.(H, T)`, and the
//! goal-level infix operators `=`, `\==`, and `@<`. `%` starts a comment.
//! Queries inside a program file are collected alongside the clauses.

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use thiserror::Error;

use crate::prolog::ast::{Clause, Program, Term};

#[derive(Parser)]
#[grammar = "prolog/prolog.pest"]
struct PrologParser;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("syntax error: {0}")]
    Syntax(#[from] Box<pest::error::Error<Rule>>),
}

/// Parses a source file into clauses and queries.
pub fn parse_program(input: &str) -> Result<Program, ParseError> {
    let mut program = Program::default();
    let pairs = PrologParser::parse(Rule::program, input).map_err(Box::new)?;
    for pair in pairs.flatten() {
        match pair.as_rule() {
            Rule::clause => program.clauses.push(build_clause(pair)),
            Rule::query => {
                let goals = pair.into_inner().next().map(build_goals).unwrap_or_default();
                program.queries.push(goals);
            }
            _ => {}
        }
    }
    Ok(program)
}

/// Parses a standalone query, with or without the `?-` prefix and final dot.
pub fn parse_query(input: &str) -> Result<Vec<Term>, ParseError> {
    let pairs = PrologParser::parse(Rule::query_input, input).map_err(Box::new)?;
    for pair in pairs.flatten() {
        if pair.as_rule() == Rule::goals {
            return Ok(build_goals(pair));
        }
    }
    Ok(Vec::new())
}

fn build_clause(pair: Pair<'_, Rule>) -> Clause {
    let mut inner = pair.into_inner();
    let head = build_term(inner.next().expect("clause has a head"));
    let body = inner.next().map(build_goals).unwrap_or_default();
    Clause { head, body }
}

fn build_goals(pair: Pair<'_, Rule>) -> Vec<Term> {
    pair.into_inner().map(build_goal).collect()
}

fn build_goal(pair: Pair<'_, Rule>) -> Term {
    let inner = pair.into_inner().next().expect("goal has content");
    match inner.as_rule() {
        Rule::infix_goal => {
            let mut parts = inner.into_inner();
            let left = build_term(parts.next().expect("infix left operand"));
            let op = parts.next().expect("infix operator").as_str().to_string();
            let right = build_term(parts.next().expect("infix right operand"));
            Term::Struct(op, vec![left, right])
        }
        Rule::term => build_term(inner),
        rule => unreachable!("unexpected goal rule {:?}", rule),
    }
}

fn build_term(pair: Pair<'_, Rule>) -> Term {
    let inner = pair.into_inner().next().expect("term has content");
    match inner.as_rule() {
        Rule::struct_term => {
            let mut parts = inner.into_inner();
            let name = atom_text(parts.next().expect("struct functor"));
            let args = parts
                .next()
                .expect("struct arguments")
                .into_inner()
                .map(build_term)
                .collect();
            Term::Struct(name, args)
        }
        Rule::list => build_list(inner),
        Rule::var => Term::Var(inner.as_str().to_string()),
        Rule::atom => Term::Atom(atom_text(inner)),
        // Parenthesized term.
        Rule::term => build_term(inner),
        rule => unreachable!("unexpected term rule {:?}", rule),
    }
}

fn build_list(pair: Pair<'_, Rule>) -> Term {
    let Some(items) = pair.into_inner().next() else {
        return Term::nil();
    };
    let mut elements = Vec::new();
    let mut tail = None;
    for item in items.into_inner() {
        match item.as_rule() {
            Rule::term => elements.push(build_term(item)),
            Rule::list_tail => {
                tail = item.into_inner().next().map(build_term);
            }
            rule => unreachable!("unexpected list rule {:?}", rule),
        }
    }
    Term::list(elements, tail)
}

fn atom_text(pair: Pair<'_, Rule>) -> String {
    let text = pair.as_str();
    if text.len() >= 2 && text.starts_with('\'') && text.ends_with('\'') {
        text[1..text.len() - 1].to_string()
    } else {
        text.to_string()
    }
}
