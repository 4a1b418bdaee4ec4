/*
 * turns rule text into classified tokens
 */
use nom::branch::alt;
use nom::error::ErrorKind;
use nom::multi::many0;
use nom::{Err, IResult};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::ast::{Token, TokenKind};
use crate::error::LexError;

static LAYOUT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:\s+|%[^\n]*|/\*(?s:.*?)\*/)").unwrap());
static NECK: Lazy<Regex> = Lazy::new(|| Regex::new(r"^:-").unwrap());
static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+(?:\.\d+)?").unwrap());
static PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[()\[\]{}|.,;!]").unwrap());
static QUOTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^(?:'(?:''|[^'])*'|"(?:\\.|[^"\\])*")"#).unwrap());
static VARIABLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z_]\w*").unwrap());
static NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z]\w*").unwrap());
static OTHER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\S").unwrap());

#[derive(Clone, Copy, Debug, PartialEq)]
enum Lexeme {
    Layout,
    Neck,
    Number,
    Punct,
    Quoted,
    Variable,
    Name,
    Other,
}

type Raw<'a> = (Lexeme, &'a str);

fn take_re<'a>(re: &Regex, i: &'a str) -> IResult<&'a str, &'a str> {
    match re.find(i) {
        Some(m) => Ok((&i[m.end()..], &i[..m.end()])),
        None => Err(Err::Error((i, ErrorKind::RegexpFind))),
    }
}

fn lexeme_of<'a>(kind: Lexeme, re: &Regex, i: &'a str) -> IResult<&'a str, Raw<'a>> {
    let (rest, text) = take_re(re, i)?;
    Ok((rest, (kind, text)))
}

fn layout(i: &str) -> IResult<&str, Raw<'_>> {
    lexeme_of(Lexeme::Layout, &LAYOUT, i)
}

fn neck(i: &str) -> IResult<&str, Raw<'_>> {
    lexeme_of(Lexeme::Neck, &NECK, i)
}

fn number(i: &str) -> IResult<&str, Raw<'_>> {
    lexeme_of(Lexeme::Number, &NUMBER, i)
}

fn punct(i: &str) -> IResult<&str, Raw<'_>> {
    lexeme_of(Lexeme::Punct, &PUNCT, i)
}

fn quoted(i: &str) -> IResult<&str, Raw<'_>> {
    lexeme_of(Lexeme::Quoted, &QUOTED, i)
}

fn variable(i: &str) -> IResult<&str, Raw<'_>> {
    lexeme_of(Lexeme::Variable, &VARIABLE, i)
}

fn name(i: &str) -> IResult<&str, Raw<'_>> {
    lexeme_of(Lexeme::Name, &NAME, i)
}

fn other(i: &str) -> IResult<&str, Raw<'_>> {
    lexeme_of(Lexeme::Other, &OTHER, i)
}

fn lexeme(i: &str) -> IResult<&str, Raw<'_>> {
    // number before punct so `1.5` stays whole
    alt((layout, neck, number, punct, quoted, variable, name, other))(i)
}

/// Splits `text` into tokens, layout included.
pub fn tokenize(text: &str) -> Result<Vec<Token>, LexError> {
    let stuck = |rest: &str| LexError {
        offset: text.len() - rest.len(),
        snippet: rest.chars().take(16).collect(),
    };
    let (rest, raw) = many0(lexeme)(text).map_err(|_| stuck(text))?;
    if !rest.is_empty() {
        return Err(stuck(rest));
    }
    Ok(classify(&raw))
}

// A lowercase name is a function when a `(` follows it, when it is the first
// name of its goal that is followed by another term (`father jack mary`), or
// when it makes up its goal on its own (`sunny,` or `happy :-`).
fn classify(raw: &[Raw<'_>]) -> Vec<Token> {
    let mut tokens = Vec::with_capacity(raw.len());
    let mut depth = 0i32;
    let mut goal_has_function = false;
    let mut goal_start = true;

    for (idx, &(lexeme, text)) in raw.iter().enumerate() {
        let kind = match lexeme {
            Lexeme::Layout | Lexeme::Other => TokenKind::Text,
            Lexeme::Neck => {
                goal_has_function = false;
                goal_start = true;
                TokenKind::Punctuation
            }
            Lexeme::Punct => {
                goal_start = false;
                match text {
                    "(" => depth += 1,
                    ")" => depth -= 1,
                    "." => {
                        depth = 0;
                        goal_has_function = false;
                        goal_start = true;
                    }
                    "," if depth == 0 => {
                        goal_has_function = false;
                        goal_start = true;
                    }
                    _ => {}
                }
                TokenKind::Punctuation
            }
            Lexeme::Number | Lexeme::Quoted => {
                goal_start = false;
                TokenKind::Atom
            }
            Lexeme::Variable => {
                goal_start = false;
                TokenKind::Variable
            }
            Lexeme::Name => {
                let next = raw[idx + 1..].iter().find(|r| r.0 != Lexeme::Layout);
                let is_function = match next {
                    Some(&(Lexeme::Punct, "(")) => true,
                    Some(&(Lexeme::Name, _))
                    | Some(&(Lexeme::Variable, _))
                    | Some(&(Lexeme::Number, _))
                    | Some(&(Lexeme::Quoted, _)) => !goal_has_function,
                    Some(&(Lexeme::Punct, ","))
                    | Some(&(Lexeme::Punct, "."))
                    | Some(&(Lexeme::Neck, _)) => goal_start,
                    _ => false,
                };
                goal_start = false;
                if is_function {
                    goal_has_function = true;
                    TokenKind::Function
                } else {
                    TokenKind::Atom
                }
            }
        };
        tokens.push(Token::new(kind, text));
    }
    tokens
}

#[cfg(test)]
fn significant(text: &str) -> Vec<(TokenKind, String)> {
    tokenize(text)
        .unwrap()
        .into_iter()
        .filter(|t| t.kind != TokenKind::Text)
        .map(|t| (t.kind, t.text))
        .collect()
}

#[test]
fn test_take_re() {
    assert_eq!(Ok((" goat", "Za")), take_re(&VARIABLE, "Za goat"));
    assert_eq!(
        Err(Err::Error(("yus goat", ErrorKind::RegexpFind))),
        take_re(&VARIABLE, "yus goat")
    );
    assert_eq!(Ok(("", "1.5")), take_re(&NUMBER, "1.5"));
    assert_eq!(Ok((".", "1")), take_re(&NUMBER, "1."));
}

#[test]
fn test_lexeme() {
    assert_eq!(Ok((" x", (Lexeme::Neck, ":-"))), lexeme(":- x"));
    assert_eq!(Ok(("", (Lexeme::Quoted, "'it''s'"))), lexeme("'it''s'"));
    assert_eq!(Ok(("", (Lexeme::Layout, "% note"))), lexeme("% note"));
    assert_eq!(Ok(("b", (Lexeme::Other, "="))), lexeme("=b"));
}

#[test]
fn test_juxtaposed_goal() {
    use TokenKind::{Atom, Function, Punctuation};
    assert_eq!(
        vec![
            (Function, "father".to_owned()),
            (Atom, "jack".to_owned()),
            (Atom, "mary".to_owned()),
            (Punctuation, ".".to_owned()),
        ],
        significant("father jack mary.")
    );
}

#[test]
fn test_call_syntax() {
    use TokenKind::{Atom, Function, Punctuation, Variable};
    assert_eq!(
        vec![
            (Function, "happy".to_owned()),
            (Punctuation, "(".to_owned()),
            (Atom, "jack".to_owned()),
            (Punctuation, ")".to_owned()),
            (Punctuation, ":-".to_owned()),
            (Function, "likes".to_owned()),
            (Punctuation, "(".to_owned()),
            (Atom, "jack".to_owned()),
            (Punctuation, ",".to_owned()),
            (Variable, "Who".to_owned()),
            (Punctuation, ")".to_owned()),
            (Punctuation, ",".to_owned()),
            (Function, "rich".to_owned()),
            (Atom, "'Who'".to_owned()),
            (Punctuation, ".".to_owned()),
        ],
        significant("happy(jack) :- likes(jack, Who), rich 'Who'.")
    );
}

#[test]
fn test_infix_relation() {
    use TokenKind::{Atom, Function, Punctuation, Variable};
    assert_eq!(
        vec![
            (Variable, "X".to_owned()),
            (Function, "likes".to_owned()),
            (Atom, "bob".to_owned()),
            (Punctuation, ".".to_owned()),
        ],
        significant("X likes bob.")
    );
}

#[test]
fn test_goal_without_arguments() {
    use TokenKind::{Atom, Function, Punctuation};
    assert_eq!(
        vec![
            (Function, "happy".to_owned()),
            (Punctuation, ":-".to_owned()),
            (Function, "sunny".to_owned()),
            (Punctuation, ",".to_owned()),
            (Function, "rich".to_owned()),
            (Punctuation, "(".to_owned()),
            (Atom, "jack".to_owned()),
            (Punctuation, ",".to_owned()),
            (Atom, "bob".to_owned()),
            (Punctuation, ")".to_owned()),
            (Punctuation, ",".to_owned()),
            (Function, "calm".to_owned()),
            (Punctuation, ".".to_owned()),
        ],
        significant("happy :- sunny, rich(jack, bob), calm.")
    );
    // trailing names of a goal stay atoms
    assert_eq!(
        vec![
            (Function, "likes".to_owned()),
            (Atom, "jack".to_owned()),
            (Atom, "mary".to_owned()),
            (Punctuation, ",".to_owned()),
        ],
        significant("likes jack mary,")
    );
}

#[test]
fn test_layout_is_kept_as_text() {
    let tokens = tokenize("a. /* gone */ b.").unwrap();
    assert_eq!(TokenKind::Text, tokens[2].kind);
    assert_eq!(" ", tokens[2].text);
    assert!(tokens.iter().any(|t| t.text == "/* gone */" && t.kind == TokenKind::Text));
}
