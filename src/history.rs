use rusqlite::{params, Connection, Result as SQLResult};

use crate::ast::Rule;
use crate::engine::{RuleExecuted, RuleObserver};

#[derive(Clone, Debug, PartialEq)]
pub struct History {
    pub run_id: u64,
    pub rule_name: String,
    pub result: bool,
}

/// Append-only log of every rule result across runs.
#[derive(Clone, Debug, Default)]
pub struct HistoryRefiner {
    run_results: Vec<History>,
}

impl HistoryRefiner {
    pub fn new() -> HistoryRefiner {
        HistoryRefiner::default()
    }

    pub fn capture(&mut self, result: bool, rule: &Rule, run_id: u64) {
        self.run_results.push(History {
            run_id,
            rule_name: rule.rule_name(),
            result,
        });
    }

    pub fn entries(&self) -> &[History] {
        &self.run_results
    }

    pub fn for_rule<'a>(&'a self, rule_name: &'a str) -> impl Iterator<Item = &'a History> + 'a {
        self.run_results
            .iter()
            .filter(move |h| h.rule_name == rule_name)
    }

    /// Appends every entry to the `history` table, creating it if needed.
    pub fn export(&self, conn: &Connection) -> SQLResult<usize> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS history (
                  id              INTEGER PRIMARY KEY,
                  run_id          INTEGER NOT NULL,
                  rule_name       TEXT NOT NULL,
                  result          INTEGER NOT NULL,
                  recorded_at     INTEGER NOT NULL
                  )",
            params![],
        )?;
        let recorded_at = time::get_time().sec;
        let mut stmt = conn.prepare(
            "INSERT INTO history (run_id, rule_name, result, recorded_at)
                  VALUES (?1, ?2, ?3, ?4)",
        )?;
        for entry in &self.run_results {
            let run_id = entry.run_id as i64;
            stmt.execute(params![run_id, entry.rule_name, entry.result, recorded_at])?;
        }
        Ok(self.run_results.len())
    }

    pub fn load(conn: &Connection) -> SQLResult<HistoryRefiner> {
        let mut stmt = conn.prepare("SELECT run_id, rule_name, result FROM history ORDER BY id")?;
        let rows = stmt.query_map(params![], |row| {
            Ok(History {
                run_id: row.get::<_, i64>(0)? as u64,
                rule_name: row.get(1)?,
                result: row.get(2)?,
            })
        })?;
        let mut refiner = HistoryRefiner::new();
        for entry in rows {
            refiner.run_results.push(entry?);
        }
        Ok(refiner)
    }
}

impl RuleObserver for HistoryRefiner {
    fn on_rule_executed(&mut self, event: &RuleExecuted) {
        self.capture(event.result, event.rule, event.run_id);
    }
}

#[test]
fn capture_keeps_order() {
    use crate::parser::RuleParser;
    let rules = RuleParser::new()
        .parse("happy(jack) :- rich(jack). sad(jack) :- poor(jack).")
        .unwrap()
        .rules;
    let mut refiner = HistoryRefiner::new();
    for run_id in 1..=2 {
        for (_, rule) in rules.iter() {
            refiner.capture(run_id == 1, rule, run_id);
        }
    }
    let names: Vec<&str> = refiner.entries().iter().map(|h| h.rule_name.as_str()).collect();
    assert_eq!(vec!["happy jack", "sad jack", "happy jack", "sad jack"], names);
    let happy: Vec<(u64, bool)> = refiner
        .for_rule("happy jack")
        .map(|h| (h.run_id, h.result))
        .collect();
    assert_eq!(vec![(1, true), (2, false)], happy);
}

#[test]
fn runner_notifies_refiner() {
    use crate::engine::{ConfidenceRunner, Data};
    use crate::parser::RuleParser;

    let rules = RuleParser::new().parse("tall jack x.").unwrap().rules;
    let mut runner = ConfidenceRunner::default();
    let mut refiner = HistoryRefiner::new();
    for _ in 0..4 {
        runner.run_with(rules.clone(), Data::new(), &mut refiner);
    }
    assert_eq!(
        vec![1, 2, 3, 4],
        refiner.entries().iter().map(|h| h.run_id).collect::<Vec<_>>()
    );
    assert!(refiner.entries().iter().all(|h| h.rule_name == "tall x"));
}

#[test]
fn one_event_per_rule_per_run_in_order() {
    use crate::engine::{ConfidenceRunner, Data};
    use crate::parser::RuleParser;

    let rules = RuleParser::new()
        .parse("tall jack x. happy(jack) :- rich(jack). sad(jack) :- poor(jack).")
        .unwrap()
        .rules;
    let mut runner = ConfidenceRunner::default();
    runner.register_function("poor", |_| false);
    let mut refiner = HistoryRefiner::new();
    runner.run_with(rules.clone(), Data::new(), &mut refiner);
    runner.run_with(rules, Data::new(), &mut refiner);

    let seen: Vec<(u64, &str, bool)> = refiner
        .entries()
        .iter()
        .map(|h| (h.run_id, h.rule_name.as_str(), h.result))
        .collect();
    assert_eq!(
        vec![
            (1, "tall x", true),
            (1, "happy jack", true),
            (1, "sad jack", false),
            (2, "tall x", true),
            (2, "happy jack", true),
            (2, "sad jack", false),
        ],
        seen
    );
}

#[test]
fn export_then_load() -> SQLResult<()> {
    let conn = Connection::open_in_memory()?;
    let mut refiner = HistoryRefiner::new();
    refiner.run_results.push(History {
        run_id: 1,
        rule_name: "happy jack".to_owned(),
        result: true,
    });
    refiner.run_results.push(History {
        run_id: 2,
        rule_name: "happy jack".to_owned(),
        result: false,
    });

    assert_eq!(2, refiner.export(&conn)?);
    assert_eq!(refiner.entries(), HistoryRefiner::load(&conn)?.entries());

    // a second export appends
    refiner.export(&conn)?;
    assert_eq!(4, HistoryRefiner::load(&conn)?.entries().len());
    Ok(())
}
