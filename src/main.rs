use std::path::PathBuf;

use clap::Parser;
use rusqlite::Connection;
use rustyline::error::ReadlineError;
use rustyline::Editor;
use tracing::info;

use rulelog::{data_from_json, ConfidenceRunner, Data, Diagnostic, EngineError, LogicEngine, RunnerConfig};

#[derive(Parser)]
#[command(name = "rulelog", version, about = "Forward rule evaluation over Prolog-like clauses")]
struct Cli {
    /// Rule file to load on startup
    #[arg(value_name = "FILE")]
    rules: Option<PathBuf>,
    /// JSON object merged into the data context on the first run
    #[arg(long, value_name = "JSON")]
    data: Option<String>,
    /// SQLite file the run history is appended to on exit
    #[arg(long = "history-db", value_name = "PATH")]
    history_db: Option<PathBuf>,
    /// Unregistered functions evaluate to false instead of true
    #[arg(long)]
    strict: bool,
    /// Log every rule evaluation
    #[arg(short, long)]
    verbose: bool,
    /// Run once, print results and exit instead of starting the REPL
    #[arg(long)]
    once: bool,
}

const HELP: &str = "\
clauses      load and merge rules, e.g. `happy(jack) :- rich(jack).`
:run [JSON]  apply every rule, optionally merging a JSON data object first
:rules       list loaded rules
:results     results from the latest runs
:data        current data context
:history     every recorded (run, rule, result)
:help        this text
:quit        leave";

fn main() {
    let cli = Cli::parse();
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(cli) {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), EngineError> {
    let mut engine = LogicEngine::new(RunnerConfig {
        unregistered_result: !cli.strict,
    });
    if let Some(path) = &cli.rules {
        report(&engine.prime(path)?);
    }
    let data = match &cli.data {
        Some(json) => data_from_json(json)?,
        None => Data::new(),
    };

    if cli.once {
        print_results(engine.run(data));
    } else {
        repl(&mut engine, data);
    }

    if let Some(path) = &cli.history_db {
        let conn = Connection::open(path)?;
        let saved = engine.history().export(&conn)?;
        info!(entries = saved, path = %path.display(), "history saved");
    }
    Ok(())
}

fn repl(engine: &mut LogicEngine, mut pending: Data) {
    let mut rl = Editor::<()>::new();
    loop {
        let readline = rl.readline(">> ");
        match readline {
            Ok(line) => {
                rl.add_history_entry(line.as_str());
                let line = line.trim();
                if line == ":quit" {
                    break;
                }
                if let Err(err) = eval(engine, line, &mut pending) {
                    println!("Error: {}", err);
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        }
    }
}

fn eval(engine: &mut LogicEngine, line: &str, pending: &mut Data) -> Result<(), EngineError> {
    let (command, rest) = match line.find(char::is_whitespace) {
        Some(i) => (&line[..i], line[i..].trim()),
        None => (line, ""),
    };
    match command {
        "" => {}
        ":help" => println!("{}", HELP),
        ":run" => {
            let data = run_data(pending, rest)?;
            print_results(engine.run(data));
        }
        ":rules" => {
            for (name, rule) in engine.rules().iter() {
                match &rule.body {
                    Some(body) => println!("{} ({}) :- {}", name, rule.confidence, body.root_operation),
                    None => println!("{} ({})", name, rule.confidence),
                }
            }
        }
        ":results" => print_results(engine.runner()),
        ":data" => {
            for (key, value) in engine.runner().data() {
                println!("{} = {}", key, value);
            }
        }
        ":history" => {
            for entry in engine.history().entries() {
                println!("#{} {} {}", entry.run_id, entry.rule_name, entry.result);
            }
        }
        _ if command.starts_with(':') => println!("unknown command `{}`, try :help", command),
        _ => {
            let diagnostics = engine.load_str(line)?;
            report(&diagnostics);
            println!("{} rules loaded", engine.rules().len());
        }
    }
    Ok(())
}

// `pending` is only taken once `given` parses
fn run_data(pending: &mut Data, given: &str) -> Result<Data, EngineError> {
    let given = if given.is_empty() {
        Data::new()
    } else {
        data_from_json(given)?
    };
    let mut data = std::mem::replace(pending, Data::new());
    data.extend(given);
    Ok(data)
}

fn report(diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        println!("skipped `{}`: {}", diagnostic.clause, diagnostic.error);
    }
}

fn print_results(runner: &ConfidenceRunner) {
    println!("run {}", runner.run_id());
    for (name, result) in runner.results() {
        println!("  {:<32} {}", name, result);
    }
}

#[test]
fn test_run_data_keeps_pending_on_bad_json() {
    let mut pending = data_from_json(r#"{"X": "sue"}"#).unwrap();
    assert!(run_data(&mut pending, "{\"Y\": ").is_err());
    assert_eq!(1, pending.len());

    let data = run_data(&mut pending, r#"{"Y": "bob", "X": "ann"}"#).unwrap();
    assert!(pending.is_empty());
    assert_eq!(Some(&serde_json::Value::from("ann")), data.get("X"));
    assert_eq!(2, data.len());
}
