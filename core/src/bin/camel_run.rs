/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of camel-sandbox.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 *
 * 1. OPEN SOURCE: You may use this file under the terms of the GNU Affero
 * General Public License v3.0. If you link to this code, your ENTIRE
 * application must be open-sourced under AGPLv3.
 *
 * 2. COMMERCIAL: For proprietary use, you must obtain a Commercial License
 * from Sovereign Systems.
 *
 * PATENT NOTICE: No patent rights in camel-sandbox are granted by this license.
 * NO IMPLIED LICENSE to rights of Mohamad Al-Zawahreh or Sovereign Systems.
 */

use camel_sandbox::eval::{extract_code_block, parse_and_interpret_code, EvalArgs};
use camel_sandbox::function_call::extract_print_output;
use camel_sandbox::prelude;
use camel_sandbox::InterpreterConfig;
use std::env;
use std::fs;
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: camel_run <model-output.md> [config.json]");
        process::exit(1);
    }

    let markdown = match fs::read_to_string(&args[1]) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("Failed to read {}: {}", args[1], e);
            process::exit(1);
        }
    };
    let config = match args.get(2) {
        Some(path) => InterpreterConfig::from_file(path),
        None => InterpreterConfig::default()
            .with_eval_mode_override(env::var(camel_sandbox::config::EVAL_MODE_ENV).ok()),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Config Error: {}", e);
            process::exit(1);
        }
    };
    let engine = match config.build_engine() {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Config Error: {}", e);
            process::exit(1);
        }
    };

    let outcome = match parse_and_interpret_code(
        &markdown,
        prelude::namespace(),
        Vec::new(),
        Vec::new(),
        EvalArgs::new(&engine, config.eval_mode),
    ) {
        Ok(outcome) => outcome,
        Err(denied) => {
            eprintln!("{}", denied);
            process::exit(2);
        }
    };

    match serde_json::to_string_pretty(&outcome.tool_calls_chain) {
        Ok(json) => println!("Tool calls:\n{}", json),
        Err(e) => eprintln!("Failed to serialize tool calls: {}", e),
    }
    let printed = extract_print_output(&outcome.tool_calls_chain);
    if !printed.is_empty() {
        println!("Output:\n{}", printed);
    }
    match &outcome.result {
        Ok(value) => println!("Result: {}", value.to_raw().py_repr()),
        Err(e) => {
            let code = extract_code_block(&markdown).unwrap_or(markdown);
            eprintln!("{}", e.format_for_model(&code));
            process::exit(1);
        }
    }
}
