use std::cell::RefCell;
use std::rc::Rc;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use surveyxp::{ExpressionEngine, SimpleQuestions, SimpleVars, Value};

fn main() {
    println!("surveyxp expression shell");
    println!("Type an expression, a template with {{...}} segments, or :help.");
    println!();

    let vars = Rc::new(RefCell::new(SimpleVars::new()));
    let mut engine = ExpressionEngine::new(
        Box::new(Rc::clone(&vars)),
        Box::new(SimpleQuestions::new()),
    );

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("cannot start line editor: {}", e);
            return;
        }
    };

    loop {
        match rl.readline("expr> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                match line {
                    ":help" => {
                        print_help();
                        continue;
                    }
                    ":vars" => {
                        let store = vars.borrow();
                        for name in store.names() {
                            println!("  {} = {}", name, store.get(name).unwrap_or(&Value::Null));
                        }
                        continue;
                    }
                    ":quit" | ":exit" => {
                        println!("Goodbye!");
                        break;
                    }
                    _ => {}
                }

                if let Some(rest) = line.strip_prefix(":set ") {
                    match rest.split_once(' ') {
                        Some((name, raw)) => {
                            let value = match raw.trim().parse::<f64>() {
                                Ok(n) => Value::Num(n),
                                Err(_) => Value::Str(raw.trim().to_string()),
                            };
                            vars.borrow_mut().define(name.trim(), value);
                            println!("ok");
                        }
                        None => println!("usage: :set <name> <value>"),
                    }
                    continue;
                }

                if let Some(rest) = line.strip_prefix(":js ") {
                    let emitted = engine.to_client_expression(rest);
                    if emitted.is_empty() {
                        for err in engine.errors_sorted() {
                            println!("Error: {}", err);
                        }
                        println!("(no client-surface equivalent)");
                    } else {
                        println!("{}", emitted);
                    }
                    continue;
                }

                if line.contains('{') {
                    println!("{}", engine.process(line));
                } else if engine.evaluate(line, false) {
                    println!("{}", engine.result_string());
                } else {
                    for err in engine.errors_sorted() {
                        println!("Error: {}", err);
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("Interrupted. Use Ctrl+D or :quit to exit.");
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        }
    }
}

fn print_help() {
    println!("surveyxp expression shell commands:");
    println!("  :help            - Show this help message");
    println!("  :set NAME VALUE  - Define a writable variable");
    println!("  :vars            - List defined variables");
    println!("  :js EXPR         - Show the client-surface emission of EXPR");
    println!("  :quit / :exit    - Leave the shell");
    println!();
    println!("Anything else is evaluated:");
    println!("  1 + 2 * 3");
    println!("  if(1 lt 2, 'yes', 'no')");
    println!("  count('', 'a', 'b')");
    println!("  Hello {{name}}, you scored {{score + bonus}}!");
    println!();
    println!("Input containing {{...}} runs through template substitution;");
    println!("plain input is evaluated as a single expression.");
}
