// rill - An embeddable scripting language with a bytecode virtual machine
// Copyright (c) 2025 Tom Waddington. MIT licensed.

use std::env;
use std::process;

use rill_embed::{Engine, Value, to_value};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();

    if args.iter().any(|a| a == "--version" || a == "-v") {
        println!("Rill v0.1.0");
        return;
    }

    let mut disasm = false;
    let mut rest: Vec<String> = Vec::new();
    for arg in args {
        if arg == "--disasm" {
            disasm = true;
        } else {
            rest.push(arg);
        }
    }

    let Some(file) = rest.first() else {
        eprintln!("usage: rill [--disasm] <file.rill> [function] [args...]");
        process::exit(2);
    };
    if !file.ends_with(".rill") {
        eprintln!("Error: expected a .rill file, got '{file}'");
        process::exit(2);
    }

    let mut engine = Engine::new();
    if let Err(e) = engine.load_file(file) {
        eprintln!("{e}");
        process::exit(1);
    }

    if disasm {
        print!("{}", engine.disassembly());
        return;
    }

    let entry = rest.get(1).map(String::as_str).unwrap_or("main");
    if !engine.has_function(entry) {
        eprintln!("Error: no function '{entry}' in {file}");
        process::exit(1);
    }

    // Numeric-looking arguments become numbers, everything else a string.
    let call_args: Vec<Value> = rest
        .get(2..)
        .unwrap_or(&[])
        .iter()
        .map(|a| match a.parse::<f64>() {
            Ok(n) => to_value(n),
            Err(_) => to_value(a.as_str()),
        })
        .collect();

    match engine.call(entry, &call_args) {
        Ok(value) => println!("{value}"),
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    }
}
