/*
 * applies parsed rules against a data context, one pass per run
 */
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::ast::{Operation, Rule};
use crate::error::EngineError;
use crate::history::HistoryRefiner;
use crate::parser::{Diagnostic, RuleParser, RuleSet};

pub type Data = HashMap<String, Value>;
pub type Arguments = HashMap<String, Value>;
pub type Function = Box<dyn Fn(&Arguments) -> bool>;

/// What an operation tree is evaluated against.
pub trait ExecutionContext {
    fn invoke(&self, operation: &Operation) -> bool;
}

#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// Result of invoking a function nobody registered.
    pub unregistered_result: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            unregistered_result: true,
        }
    }
}

pub struct RuleExecuted<'a> {
    pub result: bool,
    pub rule: &'a Rule,
    pub run_id: u64,
}

/// Told about every rule as soon as it has been applied, before the next
/// one starts.
pub trait RuleObserver {
    fn on_rule_executed(&mut self, event: &RuleExecuted);
}

struct Unobserved;

impl RuleObserver for Unobserved {
    fn on_rule_executed(&mut self, _event: &RuleExecuted) {}
}

pub fn data_from_json(text: &str) -> Result<Data, EngineError> {
    Ok(serde_json::from_str(text)?)
}

pub struct ConfidenceRunner {
    run_id: u64,
    data: Data,
    rules: RuleSet,
    functions: HashMap<String, Function>,
    results: BTreeMap<String, bool>,
    config: RunnerConfig,
    // names of the rules currently being applied, innermost last
    resolving: RefCell<Vec<String>>,
}

impl Default for ConfidenceRunner {
    fn default() -> Self {
        ConfidenceRunner::new(RunnerConfig::default())
    }
}

impl ConfidenceRunner {
    pub fn new(config: RunnerConfig) -> ConfidenceRunner {
        ConfidenceRunner {
            run_id: 0,
            data: Data::new(),
            rules: RuleSet::new(),
            functions: HashMap::new(),
            results: BTreeMap::new(),
            config,
            resolving: RefCell::new(vec![]),
        }
    }

    pub fn run(&mut self, rules: RuleSet, data: Data) -> &Self {
        self.run_with(rules, data, &mut Unobserved)
    }

    /// Applies every rule once. `data` is merged into the context kept from
    /// earlier runs and `rules` replaces the active rule set.
    pub fn run_with(
        &mut self,
        rules: RuleSet,
        data: Data,
        observer: &mut dyn RuleObserver,
    ) -> &Self {
        self.run_id += 1;
        self.data.extend(data);
        self.rules = rules;
        info!(run_id = self.run_id, rules = self.rules.len(), "starting run");

        let mut outcomes = Vec::with_capacity(self.rules.len());
        for (name, rule) in self.rules.iter() {
            let result = self.apply_rule(name, rule);
            debug!(run_id = self.run_id, rule = name, result, "rule applied");
            observer.on_rule_executed(&RuleExecuted {
                result,
                rule,
                run_id: self.run_id,
            });
            outcomes.push((name.to_owned(), result));
        }
        self.results.extend(outcomes);
        self
    }

    pub fn register_function<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&Arguments) -> bool + 'static,
    {
        self.functions.insert(name.to_owned(), Box::new(func));
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn data(&self) -> &Data {
        &self.data
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn results(&self) -> &BTreeMap<String, bool> {
        &self.results
    }

    pub fn result(&self, rule_name: &str) -> Option<bool> {
        self.results.get(rule_name).cloned()
    }

    fn apply_rule(&self, name: &str, rule: &Rule) -> bool {
        if self.resolving.borrow().iter().any(|n| n == name) {
            warn!(rule = name, "rule refers back to itself, treating as false");
            return false;
        }
        self.resolving.borrow_mut().push(name.to_owned());
        let result = rule.apply(self);
        self.resolving.borrow_mut().pop();
        result
    }

    // every operand is applied, even once the outcome is settled
    fn and_op(&self, operands: &[Operation]) -> bool {
        let mut result = true;
        for operation in operands {
            let value = operation.apply(self);
            result = result && value;
        }
        result
    }

    fn or_op(&self, operands: &[Operation]) -> bool {
        let mut result = false;
        for operation in operands {
            let value = operation.apply(self);
            result = result || value;
        }
        result
    }

    fn invoke_function_op(&self, func_name: &str, args: &[String]) -> bool {
        // `likes(X, bob)` may name the rule `X likes bob`
        if args.len() == 2 {
            let rule_name = format!("{} {} {}", args[0], func_name, args[1]);
            if let Some(rule) = self.rules.get(&rule_name) {
                return self.apply_rule(&rule_name, rule);
            }
        }

        let real_operands = self.lookup_in_data(args);
        match self.functions.get(func_name) {
            Some(func) => func(&real_operands),
            None => self.config.unregistered_result,
        }
    }

    // missing or falsy values fall back to the argument's own name
    fn lookup_in_data(&self, var_names: &[String]) -> Arguments {
        var_names
            .iter()
            .map(|name| {
                let value = match self.data.get(name) {
                    Some(value) if is_truthy(value) => value.clone(),
                    _ => Value::String(name.clone()),
                };
                (name.clone(), value)
            })
            .collect()
    }
}

impl ExecutionContext for ConfidenceRunner {
    fn invoke(&self, operation: &Operation) -> bool {
        match operation {
            Operation::And(operands) => self.and_op(operands),
            Operation::Or(operands) => self.or_op(operands),
            Operation::Not(operand) => !operand.apply(self),
            Operation::Invoke { name, args } => self.invoke_function_op(name, args),
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Parser, runner and history refiner wired together around one rule set.
pub struct LogicEngine {
    parser: RuleParser,
    runner: ConfidenceRunner,
    refiner: HistoryRefiner,
    rules: RuleSet,
}

impl Default for LogicEngine {
    fn default() -> Self {
        LogicEngine::new(RunnerConfig::default())
    }
}

impl LogicEngine {
    pub fn new(config: RunnerConfig) -> LogicEngine {
        LogicEngine {
            parser: RuleParser::new(),
            runner: ConfidenceRunner::new(config),
            refiner: HistoryRefiner::new(),
            rules: RuleSet::new(),
        }
    }

    /// Replaces the current rules with those read from `path`.
    pub fn prime<P: AsRef<Path>>(&mut self, path: P) -> Result<Vec<Diagnostic>, EngineError> {
        let text = fs::read_to_string(path)?;
        self.rules = RuleSet::new();
        self.load_str(&text)
    }

    /// Parses `text` and merges its rules into the current ones.
    pub fn load_str(&mut self, text: &str) -> Result<Vec<Diagnostic>, EngineError> {
        let parsed = self.parser.parse(text)?;
        self.rules.extend(parsed.rules);
        Ok(parsed.diagnostics)
    }

    pub fn run(&mut self, data: Data) -> &ConfidenceRunner {
        self.runner
            .run_with(self.rules.clone(), data, &mut self.refiner)
    }

    pub fn register_function<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&Arguments) -> bool + 'static,
    {
        self.runner.register_function(name, func);
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn runner(&self) -> &ConfidenceRunner {
        &self.runner
    }

    pub fn history(&self) -> &HistoryRefiner {
        &self.refiner
    }
}

#[cfg(test)]
fn parse(text: &str) -> RuleSet {
    RuleParser::new().parse(text).unwrap().rules
}

#[test]
fn fact_is_true_whatever_the_data() {
    let mut runner = ConfidenceRunner::new(RunnerConfig {
        unregistered_result: false,
    });
    let mut data = Data::new();
    data.insert("jack".to_owned(), Value::Bool(false));
    runner.run(parse("father jack mary."), data);
    assert_eq!(Some(true), runner.result("father mary"));
}

#[test]
fn example_document() {
    let mut runner = ConfidenceRunner::default();
    runner.run(
        parse("father jack mary. happy(jack) :- father jack mary."),
        Data::new(),
    );
    assert_eq!(Some(true), runner.result("father mary"));
    assert_eq!(Some(true), runner.result("happy jack"));
    assert_eq!(1, runner.run_id());
}

#[test]
fn conjunction_and_disjunction_apply_every_operand() {
    use std::cell::Cell;
    use std::rc::Rc;

    let calls = Rc::new(Cell::new(0));
    let mut runner = ConfidenceRunner::default();
    let (t, f) = (calls.clone(), calls.clone());
    runner.register_function("yes", move |_| {
        t.set(t.get() + 1);
        true
    });
    runner.register_function("no", move |_| {
        f.set(f.get() + 1);
        false
    });
    let yes = || Operation::invoke("yes");
    let no = || Operation::invoke("no");

    assert!(!Operation::And(vec![yes(), yes(), no()]).apply(&runner));
    assert_eq!(3, calls.get());

    calls.set(0);
    assert!(!Operation::And(vec![no(), yes(), yes()]).apply(&runner));
    assert_eq!(3, calls.get());

    calls.set(0);
    assert!(Operation::Or(vec![no(), no(), yes()]).apply(&runner));
    assert_eq!(3, calls.get());

    calls.set(0);
    assert!(Operation::Or(vec![yes(), no(), no()]).apply(&runner));
    assert_eq!(3, calls.get());

    assert!(Operation::Not(Box::new(no())).apply(&runner));
    assert!(Operation::And(vec![]).apply(&runner));
    assert!(!Operation::Or(vec![]).apply(&runner));
}

#[test]
fn three_operand_call_delegates_to_rule() {
    use std::cell::Cell;
    use std::rc::Rc;

    let likes_calls = Rc::new(Cell::new(0));
    let mut runner = ConfidenceRunner::default();
    let counter = likes_calls.clone();
    runner.register_function("likes", move |_| {
        counter.set(counter.get() + 1);
        true
    });
    runner.register_function("rich", |_| false);

    runner.run(
        parse("X likes bob :- rich(bob). check(jack) :- likes(X, bob)."),
        Data::new(),
    );
    assert_eq!(Some(false), runner.result("X likes bob"));
    assert_eq!(Some(false), runner.result("check jack"));
    assert_eq!(0, likes_calls.get());

    // no rule named `X likes sue`, so the function runs
    runner.run(parse("check(jack) :- likes(X, sue)."), Data::new());
    assert_eq!(Some(true), runner.result("check jack"));
    assert_eq!(1, likes_calls.get());

    // three arguments never look for a rule, even when `X likes bob` exists
    runner.run(
        parse("X likes bob :- rich(bob). check(jack) :- likes(X, bob, sue)."),
        Data::new(),
    );
    assert_eq!(Some(true), runner.result("check jack"));
    assert_eq!(2, likes_calls.get());
}

#[test]
fn goal_without_arguments_calls_its_function() {
    let mut runner = ConfidenceRunner::default();
    runner.register_function("sunny", |_| false);
    runner.run(
        parse("happy(jack) :- sunny, rich(jack). calm(jack) :- rich(jack), mild."),
        Data::new(),
    );
    assert_eq!(Some(false), runner.result("happy jack"));
    assert_eq!(Some(true), runner.result("calm jack"));
}

#[test]
fn self_reference_is_false() {
    let mut runner = ConfidenceRunner::default();
    runner.run(parse("X likes bob :- likes(X, bob)."), Data::new());
    assert_eq!(Some(false), runner.result("X likes bob"));
}

#[test]
fn arguments_fall_back_to_their_names() {
    use std::rc::Rc;

    let seen = Rc::new(RefCell::new(Arguments::new()));
    let mut runner = ConfidenceRunner::default();
    let sink = seen.clone();
    runner.register_function("greet", move |args| {
        *sink.borrow_mut() = args.clone();
        true
    });

    let data = data_from_json(r#"{"X": "sue", "Z": "", "W": 0}"#).unwrap();
    runner.run(parse("hello(world) :- greet(X, Y, Z, W)."), data);
    let seen = seen.borrow();
    assert_eq!(Some(&Value::String("sue".to_owned())), seen.get("X"));
    assert_eq!(Some(&Value::String("Y".to_owned())), seen.get("Y"));
    assert_eq!(Some(&Value::String("Z".to_owned())), seen.get("Z"));
    assert_eq!(Some(&Value::String("W".to_owned())), seen.get("W"));
}

#[test]
fn data_persists_across_runs() {
    let mut runner = ConfidenceRunner::default();
    runner.register_function("adult", |args| args.get("Age") != Some(&Value::from("Age")));
    let rules = parse("ok(entry) :- adult(Age).");

    runner.run(rules.clone(), data_from_json(r#"{"Age": 30}"#).unwrap());
    assert_eq!(Some(true), runner.result("ok entry"));

    runner.run(rules.clone(), Data::new());
    assert_eq!(Some(true), runner.result("ok entry"));
    assert_eq!(Some(&Value::from(30)), runner.data().get("Age"));

    runner.run(rules, data_from_json(r#"{"Age": null}"#).unwrap());
    assert_eq!(Some(false), runner.result("ok entry"));
    assert_eq!(3, runner.run_id());
}

#[test]
fn strict_config_rejects_unknown_functions() {
    let mut runner = ConfidenceRunner::new(RunnerConfig {
        unregistered_result: false,
    });
    runner.run(parse("happy(jack) :- rich(jack)."), Data::new());
    assert_eq!(Some(false), runner.result("happy jack"));
}

#[test]
fn merged_rules_evaluate_as_or() {
    let mut runner = ConfidenceRunner::default();
    runner.register_function("rich", |_| false);
    runner.register_function("loved", |_| true);
    runner.run(
        parse("happy(jack) :- rich(jack). happy(jack) :- loved(jack). sad(jack) :- rich(jack)."),
        Data::new(),
    );
    assert_eq!(Some(true), runner.result("happy jack"));
    assert_eq!(Some(false), runner.result("sad jack"));

    runner.run(parse("tall jack x. tall sue x."), Data::new());
    assert_eq!(Some(true), runner.result("tall x"));
}

#[test]
fn engine_records_history_per_run() {
    let mut engine = LogicEngine::default();
    let diagnostics = engine.load_str("happy(jack) :- rich(jack).").unwrap();
    assert!(diagnostics.is_empty());
    for _ in 0..3 {
        engine.run(Data::new());
    }
    let history = engine.history().entries();
    assert_eq!(3, history.len());
    assert_eq!(
        vec![1, 2, 3],
        history.iter().map(|h| h.run_id).collect::<Vec<_>>()
    );
    assert!(history.iter().all(|h| h.rule_name == "happy jack" && h.result));
}

#[test]
fn engine_prime_reads_file() {
    let path = std::env::temp_dir().join(format!("rulelog-prime-{}.pl", std::process::id()));
    fs::write(&path, "% family\nfather jack mary.\nhappy(jack) :- father jack mary.\nbad.\n").unwrap();

    let mut engine = LogicEngine::default();
    engine.load_str("stale(rule) :- gone(x).").unwrap();
    let diagnostics = engine.prime(&path).unwrap();
    fs::remove_file(&path).unwrap();

    assert_eq!(1, diagnostics.len());
    assert_eq!(2, engine.rules().len());
    assert!(!engine.rules().contains("stale rule"));

    let runner = engine.run(Data::new());
    assert_eq!(Some(true), runner.result("happy jack"));
}
