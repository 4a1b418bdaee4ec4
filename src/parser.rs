use std::collections::HashMap;

use tracing::{debug, warn};

use crate::ast::{render, Rule, Token, TokenKind, END};
use crate::error::{LexError, RuleError};
use crate::lexer;

/// Rules keyed by name, kept in the order they were first defined.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RuleSet {
    rules: Vec<(String, Rule)>,
    index: HashMap<String, usize>,
}

impl RuleSet {
    pub fn new() -> RuleSet {
        RuleSet::default()
    }

    pub fn get(&self, name: &str) -> Option<&Rule> {
        self.index.get(name).map(|&i| &self.rules[i].1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Rule)> {
        self.rules.iter().map(|(name, rule)| (name.as_str(), rule))
    }

    /// Adds `rule`, or ORs it into the rule already holding its name. The
    /// first definition is the one that survives.
    pub fn insert_or_merge(&mut self, rule: Rule) {
        let name = rule.rule_name();
        match self.index.get(&name) {
            Some(&i) => {
                debug!(rule = %name, "merging duplicate definition");
                self.rules[i].1.merge(rule);
            }
            None => {
                self.index.insert(name.clone(), self.rules.len());
                self.rules.push((name, rule));
            }
        }
    }

    pub fn extend(&mut self, other: RuleSet) {
        for (_, rule) in other.rules {
            self.insert_or_merge(rule);
        }
    }
}

/// A clause the parser had to skip.
#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
    pub clause: String,
    pub error: RuleError,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Parsed {
    pub rules: RuleSet,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Clone, Debug, Default)]
pub struct RuleParser;

impl RuleParser {
    pub fn new() -> RuleParser {
        RuleParser
    }

    pub fn parse(&self, text: &str) -> Result<Parsed, LexError> {
        let tokens = lexer::tokenize(text)?;
        Ok(self.parse_tokens(&tokens))
    }

    pub fn parse_tokens(&self, tokens: &[Token]) -> Parsed {
        let mut parsed = Parsed::default();
        let (groups, trailing) = group_clauses(tokens);

        for group in groups {
            match Rule::from_tokens(&group) {
                Ok(rule) => parsed.rules.insert_or_merge(rule),
                Err(error) => parsed.reject(&group, error),
            }
        }
        if !trailing.is_empty() {
            parsed.reject(&trailing, RuleError::Unterminated);
        }

        debug!(
            rules = parsed.rules.len(),
            skipped = parsed.diagnostics.len(),
            "parsed rule text"
        );
        parsed
    }
}

impl Parsed {
    fn reject(&mut self, group: &[Token], error: RuleError) {
        let clause = render(group);
        warn!(clause = %clause, %error, "skipping clause");
        self.diagnostics.push(Diagnostic { clause, error });
    }
}

// Cuts the significant tokens into clauses, each closed by (and including) a
// `.`. Whatever follows the last `.` comes back separately.
fn group_clauses(tokens: &[Token]) -> (Vec<Vec<Token>>, Vec<Token>) {
    let mut groups = vec![];
    let mut current = vec![];
    for token in tokens.iter().filter(|t| t.kind != TokenKind::Text) {
        current.push(token.clone());
        if token.is_punct(END) {
            groups.push(std::mem::replace(&mut current, vec![]));
        }
    }
    (groups, current)
}

#[test]
fn test_one_rule_per_clause() {
    use crate::ast::tok;
    let (groups, trailing) =
        group_clauses(&tok("f:a a:b a:c p:. t:_ f:d v:X a:e p:. f:x a:y"));
    assert_eq!(2, groups.len());
    assert_eq!(4, groups[0].len());
    assert_eq!("d X e .", render(&groups[1]));
    assert_eq!("x y", render(&trailing));
}

#[test]
fn test_parse_document() {
    let parsed = RuleParser::new()
        .parse("father jack mary. happy(jack) :- father jack mary.")
        .unwrap();
    assert!(parsed.diagnostics.is_empty());
    let names: Vec<&str> = parsed.rules.names().collect();
    assert_eq!(vec!["father mary", "happy jack"], names);
    assert!(parsed.rules.get("father mary").unwrap().is_fact());
    assert!(!parsed.rules.get("happy jack").unwrap().is_fact());
}

#[test]
fn test_bad_clause_does_not_stop_parse() {
    let parsed = RuleParser::new()
        .parse("a b. happy(jack) :- 'jack'. rich jack bob. likes bob")
        .unwrap();
    let names: Vec<&str> = parsed.rules.names().collect();
    assert_eq!(vec!["rich bob"], names);
    assert_eq!(
        vec![
            RuleError::TooShort { len: 3 },
            RuleError::OperandBeforeFunction {
                operand: "'jack'".to_owned()
            },
            RuleError::Unterminated,
        ],
        parsed
            .diagnostics
            .iter()
            .map(|d| d.error.clone())
            .collect::<Vec<_>>()
    );
    assert_eq!("a b .", parsed.diagnostics[0].clause);
}

#[test]
fn test_goals_without_arguments() {
    use crate::ast::Operation;
    let parsed = RuleParser::new()
        .parse("happy(jack) :- sunny, rich(jack). happy :- rich(jack). likes(X, Y) :- friend(X, Y).")
        .unwrap();
    assert!(parsed.diagnostics.is_empty());
    let names: Vec<&str> = parsed.rules.names().collect();
    // a head with no constant has an empty relation part in its name
    assert_eq!(vec!["happy jack", "", "Y "], names);
    assert_eq!(
        Operation::And(vec![
            Operation::invoke("sunny"),
            Operation::Invoke {
                name: "rich".to_owned(),
                args: vec!["jack".to_owned()],
            },
        ]),
        parsed.rules.get("happy jack").unwrap().body.as_ref().unwrap().root_operation
    );
    assert_eq!(
        Some("happy".to_owned()),
        parsed.rules.get("").unwrap().head.func_name
    );
}

#[test]
fn test_duplicates_merge_into_first() {
    use crate::ast::Operation;
    let parsed = RuleParser::new()
        .parse("happy(jack) :- rich(jack). happy(jack) :- loved(jack). sad jack x.")
        .unwrap();
    assert_eq!(2, parsed.rules.len());
    let happy = parsed.rules.get("happy jack").unwrap();
    match &happy.body.as_ref().unwrap().root_operation {
        Operation::Or(ops) => assert_eq!(2, ops.len()),
        other => panic!("expected or, got {}", other),
    }
}

#[test]
fn test_duplicate_facts() {
    let parsed = RuleParser::new().parse("likes jack mary. likes sue mary.").unwrap();
    assert_eq!(1, parsed.rules.len());
    assert!(parsed.rules.get("likes mary").unwrap().is_fact());
}

#[test]
fn test_extend_merges() {
    let parser = RuleParser::new();
    let mut rules = parser.parse("happy(jack) :- rich(jack).").unwrap().rules;
    rules.extend(parser.parse("happy(jack) :- loved(jack). sad(jack) :- poor(jack).").unwrap().rules);
    assert_eq!(2, rules.len());
    assert!(rules.contains("sad jack"));
}
