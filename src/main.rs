// src/main.rs
use std::env;
use std::error::Error;
use std::fs;
use std::io::Write;
use std::path::Path;

use warren::{compile, parse_program, solve_with, MachineConfig, Substitution};

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: warrenc <file.pl> [--trace] [--strict] [--steps N]");
        std::process::exit(1);
    }
    let filename = &args[1];
    let mut config = MachineConfig::default();
    let mut iter = args.iter().skip(2);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--trace" => config.trace = true,
            "--strict" => config.strict = true,
            "--steps" => {
                let value = iter
                    .next()
                    .ok_or("--steps expects a number")?
                    .parse::<u64>()?;
                config.step_limit = Some(value);
            }
            other => return Err(format!("unknown flag: {}", other).into()),
        }
    }

    let source = fs::read_to_string(filename)
        .map_err(|e| format!("failed to read '{}': {}", filename, e))?;
    let program = parse_program(&source)?;
    let db = compile(&program.clauses)?;

    if program.queries.is_empty() {
        println!("Compiled {} clause(s); no queries.", program.clauses.len());
        return Ok(());
    }

    let mut trace_out = if config.trace {
        let path = Path::new(filename).with_extension("trace.jsonl");
        Some((fs::File::create(&path)?, path))
    } else {
        None
    };

    for query in &program.queries {
        let rendered: Vec<String> = query.iter().map(|g| g.to_string()).collect();
        println!("?- {}.", rendered.join(", "));
        let mut solutions = solve_with(&db, query, config.clone())?;
        let mut any = false;
        for solution in &mut solutions {
            match solution {
                Ok(subst) => {
                    any = true;
                    println!("{} ;", render_substitution(&subst));
                }
                Err(e) => {
                    eprintln!("error: {}", e);
                    break;
                }
            }
        }
        if !any {
            println!("false.");
        }
        if let Some((file, _)) = trace_out.as_mut() {
            for snapshot in &solutions.machine().trace_log {
                writeln!(file, "{}", serde_json::to_string(snapshot)?)?;
            }
        }
    }
    if let Some((_, path)) = trace_out {
        println!("Trace written to {:?}", path);
    }
    Ok(())
}

fn render_substitution(subst: &Substitution) -> String {
    if subst.is_empty() {
        return "true".to_string();
    }
    subst
        .iter()
        .map(|(name, term)| format!("{} = {}", name, term))
        .collect::<Vec<_>>()
        .join(", ")
}
