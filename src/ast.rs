use std::fmt;

use crate::engine::ExecutionContext;
use crate::error::RuleError;

pub const NECK: &str = ":-";
pub const END: &str = ".";
pub const COMMA: &str = ",";
pub const OPEN: &str = "(";
pub const CLOSE: &str = ")";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Punctuation,
    Function,
    Variable,
    Atom,
    // whitespace, comments, operators; never part of a clause
    Text,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

impl Token {
    pub fn new(kind: TokenKind, text: &str) -> Token {
        Token {
            kind,
            text: text.to_owned(),
        }
    }

    pub fn is_punct(&self, text: &str) -> bool {
        self.kind == TokenKind::Punctuation && self.text == text
    }
}

/// Renders a token group back into something close to its source text.
pub fn render(tokens: &[Token]) -> String {
    tokens
        .iter()
        .map(|t| t.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
    And,
    Or,
    InvokeFunction,
    // never produced by the parser
    Not,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    And(Vec<Operation>),
    Or(Vec<Operation>),
    Not(Box<Operation>),
    Invoke { name: String, args: Vec<String> },
}

impl Operation {
    pub fn invoke(name: &str) -> Operation {
        Operation::Invoke {
            name: name.to_owned(),
            args: vec![],
        }
    }

    pub fn operator(&self) -> Operator {
        match self {
            Operation::And(_) => Operator::And,
            Operation::Or(_) => Operator::Or,
            Operation::Not(_) => Operator::Not,
            Operation::Invoke { .. } => Operator::InvokeFunction,
        }
    }

    pub fn apply(&self, ctx: &dyn ExecutionContext) -> bool {
        ctx.invoke(self)
    }

    fn add_operand(&mut self, operand: &str) {
        if let Operation::Invoke { args, .. } = self {
            args.push(operand.to_owned());
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operation::And(ops) => write_list(f, "and", ops),
            Operation::Or(ops) => write_list(f, "or", ops),
            Operation::Not(op) => write!(f, "not[{}]", op),
            Operation::Invoke { name, args } => write!(f, "{}({})", name, args.join(", ")),
        }
    }
}

fn write_list(f: &mut fmt::Formatter, tag: &str, ops: &[Operation]) -> fmt::Result {
    let parts: Vec<String> = ops.iter().map(|o| o.to_string()).collect();
    write!(f, "{}[{}]", tag, parts.join(", "))
}

/// Identity of a rule. When a category shows up more than once in the head
/// the last occurrence wins.
#[derive(Clone, Debug, PartialEq)]
pub struct Head {
    pub variable: Option<String>,
    pub func_name: Option<String>,
    pub constant: Option<String>,
}

impl Head {
    fn from_tokens(tokens: &[Token]) -> Head {
        let mut head = Head {
            variable: None,
            func_name: None,
            constant: None,
        };
        for token in tokens {
            match token.kind {
                TokenKind::Function => head.func_name = Some(token.text.clone()),
                TokenKind::Variable => head.variable = Some(token.text.clone()),
                TokenKind::Atom => head.constant = Some(token.text.clone()),
                _ => {}
            }
        }
        head
    }

    pub fn name(&self) -> String {
        let mut name = String::new();
        if let Some(var) = &self.variable {
            name.push_str(var);
            name.push(' ');
        }
        if let (Some(func), Some(constant)) = (&self.func_name, &self.constant) {
            name.push_str(func);
            name.push(' ');
            name.push_str(constant);
        }
        name
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Body {
    pub root_operation: Operation,
}

impl Body {
    fn from_tokens(tokens: &[Token]) -> Result<Body, RuleError> {
        let mut goals = vec![];
        let mut current: Option<Operation> = None;
        // tracked but never changes association: body goals are flat
        let mut nesting_level = 0i32;

        for token in tokens {
            match token.kind {
                TokenKind::Function => current = Some(Operation::invoke(&token.text)),
                TokenKind::Variable | TokenKind::Atom => match current.as_mut() {
                    Some(op) => op.add_operand(&token.text),
                    None => {
                        return Err(RuleError::OperandBeforeFunction {
                            operand: token.text.clone(),
                        })
                    }
                },
                TokenKind::Punctuation if token.text == OPEN => nesting_level += 1,
                TokenKind::Punctuation if token.text == CLOSE => nesting_level -= 1,
                TokenKind::Punctuation
                    if (token.text == COMMA && nesting_level == 0) || token.text == END =>
                {
                    match current.take() {
                        Some(op) => goals.push(op),
                        None => {
                            return Err(RuleError::EmptyGoal {
                                punct: token.text.clone(),
                            })
                        }
                    }
                }
                _ => {}
            }
        }
        if let Some(op) = current {
            goals.push(op);
        }

        Ok(Body {
            root_operation: Operation::And(goals),
        })
    }

    pub fn add_sibling(&mut self, operation: Operation) -> &mut Body {
        let old = std::mem::replace(&mut self.root_operation, Operation::And(vec![]));
        self.root_operation = Operation::Or(vec![old, operation]);
        self
    }

    pub fn apply(&self, ctx: &dyn ExecutionContext) -> bool {
        self.root_operation.apply(ctx)
    }
}

pub const FACT_CONFIDENCE: f64 = 1.0;
pub const INFERRED_CONFIDENCE: f64 = 0.5;

#[derive(Clone, Debug, PartialEq)]
pub struct Rule {
    pub head: Head,
    pub body: Option<Body>,
    /// Static marker, 1.0 for facts and 0.5 for rules with a body. Nothing
    /// reads it during evaluation.
    pub confidence: f64,
}

impl Rule {
    /// Builds a rule from one clause's significant tokens, terminating `.`
    /// included.
    pub fn from_tokens(tokens: &[Token]) -> Result<Rule, RuleError> {
        if tokens.len() <= 3 {
            return Err(RuleError::TooShort { len: tokens.len() });
        }

        // rightmost separator; one at index 0 counts as absent
        let split = tokens
            .iter()
            .rposition(|t| t.is_punct(NECK))
            .filter(|&j| j != 0);

        let (head_tokens, body_tokens) = match split {
            Some(j) => (&tokens[..j], Some(&tokens[j..])),
            None => (tokens, None),
        };

        let head = Head::from_tokens(head_tokens);
        if head.func_name.is_none() {
            return Err(RuleError::MissingRelation);
        }

        match body_tokens {
            Some(body_tokens) => Ok(Rule {
                head,
                body: Some(Body::from_tokens(body_tokens)?),
                confidence: INFERRED_CONFIDENCE,
            }),
            None => Ok(Rule {
                head,
                body: None,
                confidence: FACT_CONFIDENCE,
            }),
        }
    }

    pub fn is_fact(&self) -> bool {
        self.body.is_none()
    }

    pub fn rule_name(&self) -> String {
        self.head.name()
    }

    /// Folds a duplicate definition into this one as a disjunction. A fact
    /// takes part as an empty conjunction, which is always true.
    pub fn merge(&mut self, other: Rule) {
        match other.body {
            None => {
                if let Some(body) = self.body.as_mut() {
                    body.add_sibling(Operation::And(vec![]));
                }
            }
            Some(theirs) => {
                let body = self.body.get_or_insert_with(|| Body {
                    root_operation: Operation::And(vec![]),
                });
                body.add_sibling(theirs.root_operation);
            }
        }
    }

    pub fn apply(&self, ctx: &dyn ExecutionContext) -> bool {
        match &self.body {
            None => true,
            Some(body) => body.apply(ctx),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.rule_name())
    }
}

#[cfg(test)]
pub(crate) fn tok(shorthand: &str) -> Vec<Token> {
    // "f:likes v:X a:bob p:." shorthand for hand-built token groups
    shorthand.split_whitespace()
        .map(|part| {
            let (kind, text) = part.split_at(2);
            let kind = match kind {
                "f:" => TokenKind::Function,
                "v:" => TokenKind::Variable,
                "a:" => TokenKind::Atom,
                "p:" => TokenKind::Punctuation,
                _ => TokenKind::Text,
            };
            Token::new(kind, text)
        })
        .collect()
}

#[test]
fn short_groups_are_rejected() {
    assert_eq!(
        Err(RuleError::TooShort { len: 3 }),
        Rule::from_tokens(&tok("f:happy a:jack p:."))
    );
    assert_eq!(Err(RuleError::TooShort { len: 0 }), Rule::from_tokens(&[]));
}

#[test]
fn fact_head_takes_last_of_each_kind() {
    let rule = Rule::from_tokens(&tok("f:father a:jack a:mary p:.")).unwrap();
    assert!(rule.is_fact());
    assert_eq!(FACT_CONFIDENCE, rule.confidence);
    assert_eq!(Some("mary".to_owned()), rule.head.constant);
    assert_eq!("father mary", rule.rule_name());

    let rule = Rule::from_tokens(&tok("v:X f:likes v:Y a:bob p:.")).unwrap();
    assert_eq!("Y likes bob", rule.rule_name());
}

#[test]
fn head_names() {
    let head = |v: Option<&str>, f: Option<&str>, c: Option<&str>| Head {
        variable: v.map(str::to_owned),
        func_name: f.map(str::to_owned),
        constant: c.map(str::to_owned),
    };
    assert_eq!("X likes bob", head(Some("X"), Some("likes"), Some("bob")).name());
    assert_eq!("X ", head(Some("X"), Some("likes"), None).name());
    assert_eq!("likes bob", head(None, Some("likes"), Some("bob")).name());
    assert_eq!("", head(None, None, Some("bob")).name());
}

#[test]
fn head_without_relation_is_rejected() {
    assert_eq!(
        Err(RuleError::MissingRelation),
        Rule::from_tokens(&tok("a:jack a:mary a:sue p:."))
    );
}

#[test]
fn body_is_flat_conjunction() {
    let rule = Rule::from_tokens(&tok(
        "f:happy p:( a:jack p:) p::- f:father p:( a:jack p:, v:Y p:) p:, f:rich p:( v:Y p:) p:.",
    ))
    .unwrap();
    assert_eq!(INFERRED_CONFIDENCE, rule.confidence);
    assert_eq!("happy jack", rule.rule_name());
    let body = rule.body.unwrap();
    assert_eq!(
        Operation::And(vec![
            Operation::Invoke {
                name: "father".to_owned(),
                args: vec!["jack".to_owned(), "Y".to_owned()],
            },
            Operation::Invoke {
                name: "rich".to_owned(),
                args: vec!["Y".to_owned()],
            },
        ]),
        body.root_operation
    );
}

#[test]
fn rightmost_separator_splits() {
    let rule = Rule::from_tokens(&tok("f:a a:b p::- f:c a:d p::- f:e a:f p:.")).unwrap();
    // everything before the last separator is head
    assert_eq!("c d", rule.rule_name());
    assert_eq!(
        Operation::And(vec![Operation::Invoke {
            name: "e".to_owned(),
            args: vec!["f".to_owned()],
        }]),
        rule.body.unwrap().root_operation
    );
}

#[test]
fn leading_separator_means_fact() {
    let rule = Rule::from_tokens(&tok("p::- f:likes a:jack a:mary p:.")).unwrap();
    assert!(rule.is_fact());
    assert_eq!("likes mary", rule.rule_name());
}

#[test]
fn operand_before_function_fails() {
    assert_eq!(
        Err(RuleError::OperandBeforeFunction {
            operand: "jack".to_owned()
        }),
        Rule::from_tokens(&tok("f:happy a:jack p::- a:jack f:father a:mary p:."))
    );
    assert_eq!(
        Err(RuleError::EmptyGoal {
            punct: ",".to_owned()
        }),
        Rule::from_tokens(&tok("f:happy a:jack p::- p:, f:father a:mary p:."))
    );
}

#[test]
fn nested_call_replaces_outer_goal() {
    let rule = Rule::from_tokens(&tok(
        "f:p a:x p::- f:a p:( f:b p:( v:X p:) p:, v:Y p:) p:.",
    ))
    .unwrap();
    assert_eq!(
        Operation::And(vec![Operation::Invoke {
            name: "b".to_owned(),
            args: vec!["X".to_owned(), "Y".to_owned()],
        }]),
        rule.body.unwrap().root_operation
    );
}

#[test]
fn merge_wraps_in_or() {
    let mut first = Rule::from_tokens(&tok("f:happy a:jack p::- f:rich a:jack p:.")).unwrap();
    let second = Rule::from_tokens(&tok("f:happy a:jack p::- f:loved a:jack p:.")).unwrap();
    first.merge(second);
    assert_eq!(
        Operation::Or(vec![
            Operation::And(vec![Operation::Invoke {
                name: "rich".to_owned(),
                args: vec!["jack".to_owned()],
            }]),
            Operation::And(vec![Operation::Invoke {
                name: "loved".to_owned(),
                args: vec!["jack".to_owned()],
            }]),
        ]),
        first.body.unwrap().root_operation
    );
}

#[test]
fn merge_with_facts() {
    let fact = Rule::from_tokens(&tok("f:happy a:x a:jack p:.")).unwrap();

    let mut both = fact.clone();
    both.merge(fact.clone());
    assert!(both.is_fact());

    let mut rule = Rule::from_tokens(&tok("f:happy a:jack p::- f:rich a:jack p:.")).unwrap();
    rule.merge(fact.clone());
    match rule.body.unwrap().root_operation {
        Operation::Or(ops) => assert_eq!(Operation::And(vec![]), ops[1]),
        other => panic!("expected or, got {}", other),
    }

    let mut first_fact = fact;
    first_fact.merge(Rule::from_tokens(&tok("f:happy a:jack p::- f:rich a:jack p:.")).unwrap());
    assert!(!first_fact.is_fact());
    assert_eq!(FACT_CONFIDENCE, first_fact.confidence);
}

#[test]
fn operation_display() {
    let op = Operation::Or(vec![
        Operation::And(vec![Operation::Invoke {
            name: "likes".to_owned(),
            args: vec!["X".to_owned(), "bob".to_owned()],
        }]),
        Operation::Not(Box::new(Operation::invoke("sad"))),
    ]);
    assert_eq!("or[and[likes(X, bob)], not[sad()]]", op.to_string());
    assert_eq!(Operator::Or, op.operator());
}
