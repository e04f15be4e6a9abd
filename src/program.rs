//! Tokens, programs and the tokenizer.
//!
//! A [`Program`] is a flat sequence of [`Token`]s. There is no tree: a
//! combination's structure is recovered on demand with [`Program::split`],
//! which is the only decomposition primitive the evaluator uses. Keeping the
//! representation flat is what makes macro expansion a plain token
//! substitution ([`Program::substitute`]).

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, not_line_ending},
    combinator::recognize,
    multi::many0_count,
    sequence::pair,
};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use crate::{Error, ParseError, ParseErrorKind};

/// Spelling of the opening parenthesis token
pub const LEFT: &str = "(";
/// Spelling of the closing parenthesis token
pub const RIGHT: &str = ")";

/// Tokenizer options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParseConfig {
    /// Drop `;` line comments instead of treating `;` as an ordinary character
    pub handle_comments: bool,
}

/// An indivisible lexeme: `(`, `)` or an identifier/literal substring.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token(Rc<str>);

impl Token {
    pub fn new(text: &str) -> Self {
        Token(Rc::from(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_left(&self) -> bool {
        &*self.0 == LEFT
    }

    pub fn is_right(&self) -> bool {
        &*self.0 == RIGHT
    }

    pub fn is_paren(&self) -> bool {
        self.is_left() || self.is_right()
    }
}

impl AsRef<str> for Token {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An ordered sequence of tokens forming one syntactic unit.
///
/// A program is *atomic* (one non-parenthesis token), a *combination*
/// (`(` ... matching `)`), or a *sequence* of top-level forms.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Program {
    tokens: Vec<Token>,
}

impl Program {
    pub fn new(tokens: Vec<Token>) -> Self {
        Program { tokens }
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Number of currently unmatched `(`, or `None` if some `)` has no
    /// matching `(` before it.
    pub fn missing_right(&self) -> Option<usize> {
        let mut depth = 0usize;
        for token in &self.tokens {
            if token.is_left() {
                depth += 1;
            } else if token.is_right() {
                depth = depth.checked_sub(1)?;
            }
        }
        Some(depth)
    }

    /// Parenthesis depth never goes negative and returns to zero.
    pub fn is_valid(&self) -> bool {
        self.missing_right() == Some(0)
    }

    /// A single token that is not a parenthesis.
    pub fn is_atomic(&self) -> bool {
        matches!(self.tokens.as_slice(), [token] if !token.is_paren())
    }

    /// Starts with `(` whose matching `)` is the last token.
    ///
    /// `(a) (b)` is a sequence of two combinations, not a combination.
    pub fn is_combination(&self) -> bool {
        if self.tokens.len() < 2 || !self.tokens[0].is_left() {
            return false;
        }
        let mut depth = 0usize;
        for (i, token) in self.tokens.iter().enumerate() {
            if token.is_left() {
                depth += 1;
            } else if token.is_right() {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return i == self.tokens.len() - 1;
                }
            }
        }
        false
    }

    /// Decompose into direct top-level sub-programs.
    ///
    /// For a combination the interior is split; otherwise the program itself
    /// is treated as a sequence. The program must be valid: a stray `)` is
    /// skipped rather than reported.
    pub fn split(&self) -> Vec<Program> {
        let target = if self.is_combination() {
            &self.tokens[1..self.tokens.len() - 1]
        } else {
            &self.tokens[..]
        };

        let mut result = Vec::new();
        let mut depth = 0usize;
        let mut start = 0usize;

        for (i, token) in target.iter().enumerate() {
            if token.is_left() {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            } else if token.is_right() {
                if depth == 0 {
                    continue;
                }
                depth -= 1;
                if depth == 0 {
                    result.push(Program::new(target[start..=i].to_vec()));
                }
            } else if depth == 0 {
                result.push(Program::new(vec![token.clone()]));
            }
        }

        result
    }

    /// Replace every token named in `bindings` by the bound program's tokens.
    ///
    /// Produces a fresh program; `self` is left untouched so one macro body
    /// can be expanded any number of times.
    pub fn substitute(&self, bindings: &HashMap<&str, &Program>) -> Program {
        let mut tokens = Vec::with_capacity(self.tokens.len());
        for token in &self.tokens {
            match bindings.get(token.as_str()) {
                Some(replacement) => tokens.extend(replacement.tokens.iter().cloned()),
                None => tokens.push(token.clone()),
            }
        }
        Program::new(tokens)
    }
}

impl From<Vec<Token>> for Program {
    fn from(tokens: Vec<Token>) -> Self {
        Program::new(tokens)
    }
}

impl FromStr for Program {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self, Error> {
        parse(text)
    }
}

impl fmt::Display for Program {
    /// Canonical spacing: `(+ 1 (f x))`. Tokenizing the output yields the
    /// same token sequence.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut previous: Option<&Token> = None;
        for token in &self.tokens {
            if let Some(prev) = previous
                && !prev.is_left()
                && !token.is_right()
            {
                f.write_str(" ")?;
            }
            write!(f, "{token}")?;
            previous = Some(token);
        }
        Ok(())
    }
}

fn is_word_char(c: char) -> bool {
    !c.is_whitespace() && c != '(' && c != ')'
}

fn whitespace(input: &str) -> IResult<&str, &str> {
    take_while(char::is_whitespace).parse(input)
}

fn whitespace1(input: &str) -> IResult<&str, &str> {
    take_while1(char::is_whitespace).parse(input)
}

fn line_comment(input: &str) -> IResult<&str, &str> {
    recognize(pair(char(';'), not_line_ending)).parse(input)
}

fn trivia(input: &str) -> IResult<&str, usize> {
    many0_count(alt((whitespace1, line_comment))).parse(input)
}

fn lexeme(input: &str) -> IResult<&str, &str> {
    alt((tag(LEFT), tag(RIGHT), take_while1(is_word_char))).parse(input)
}

fn commented_lexeme(input: &str) -> IResult<&str, &str> {
    alt((
        tag(LEFT),
        tag(RIGHT),
        take_while1(|c: char| is_word_char(c) && c != ';'),
    ))
    .parse(input)
}

fn skip_trivia(input: &str, config: ParseConfig) -> &str {
    let skipped = if config.handle_comments {
        trivia(input).map(|(rest, _)| rest)
    } else {
        whitespace(input).map(|(rest, _)| rest)
    };
    skipped.unwrap_or(input)
}

/// Split text into tokens without validating parenthesis balance.
pub fn tokenize(text: &str) -> Program {
    tokenize_with_config(text, ParseConfig::default())
}

/// Split text into tokens with the given options, without validation.
pub fn tokenize_with_config(text: &str, config: ParseConfig) -> Program {
    let next: fn(&str) -> IResult<&str, &str> = if config.handle_comments {
        commented_lexeme
    } else {
        lexeme
    };

    let mut tokens = Vec::new();
    let mut rest = skip_trivia(text, config);

    while let Ok((remaining, word)) = next(rest) {
        tokens.push(Token::new(word));
        rest = skip_trivia(remaining, config);
    }

    Program::new(tokens)
}

/// Tokenize and require balanced parentheses.
pub fn parse(text: &str) -> Result<Program, Error> {
    parse_with_config(text, ParseConfig::default())
}

/// Tokenize with the given options and require balanced parentheses.
pub fn parse_with_config(text: &str, config: ParseConfig) -> Result<Program, Error> {
    let program = tokenize_with_config(text, config);
    validate(&program)?;
    Ok(program)
}

/// Require balanced parentheses, reporting the first offending token.
pub fn validate(program: &Program) -> Result<(), Error> {
    let tokens = program.tokens();
    let mut depth = 0usize;

    for (i, token) in tokens.iter().enumerate() {
        if token.is_left() {
            depth += 1;
        } else if token.is_right() {
            if depth == 0 {
                return Err(Error::MalformedProgram(ParseError::with_context(
                    ParseErrorKind::UnexpectedClose,
                    format!("unexpected ')' at token {}", i + 1),
                    tokens,
                    i,
                )));
            }
            depth -= 1;
        }
    }

    if depth > 0 {
        return Err(Error::MalformedProgram(ParseError::with_context(
            ParseErrorKind::Incomplete,
            format!("missing {depth} closing parenthes{}", if depth == 1 { "is" } else { "es" }),
            tokens,
            tokens.len().saturating_sub(1),
        )));
    }

    Ok(())
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;

    fn words(program: &Program) -> Vec<&str> {
        program.tokens().iter().map(Token::as_str).collect()
    }

    #[test]
    fn test_tokenize_data_driven() {
        let test_cases: Vec<(&str, Vec<&str>)> = vec![
            ("", vec![]),
            ("   \n\t ", vec![]),
            ("42", vec!["42"]),
            ("(+ 1 2)", vec!["(", "+", "1", "2", ")"]),
            ("(f(g x))", vec!["(", "f", "(", "g", "x", ")", ")"]),
            ("  (a\n  b)\t", vec!["(", "a", "b", ")"]),
            ("(()", vec!["(", "(", ")"]),
            (")(", vec![")", "("]),
            ("a;b c", vec!["a;b", "c"]),
            ("x\u{a0}y", vec!["x", "y"]),
            ("1+2j -3.5e2", vec!["1+2j", "-3.5e2"]),
        ];

        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let program = tokenize(input);
            assert_eq!(&words(&program), expected, "case #{} ({input:?})", i + 1);
        }
    }

    #[test]
    fn test_tokenize_with_comments() {
        let config = ParseConfig {
            handle_comments: true,
        };
        let program = tokenize_with_config("; header\n(+ 1 ; one\n 2) ; trailing", config);
        assert_eq!(words(&program), vec!["(", "+", "1", "2", ")"]);

        let program = tokenize_with_config("(f x);done", config);
        assert_eq!(words(&program), vec!["(", "f", "x", ")"]);

        let program = tokenize_with_config(";; only a comment", config);
        assert!(program.is_empty());
    }

    #[test]
    fn test_missing_right() {
        assert_eq!(tokenize("((").missing_right(), Some(2));
        assert_eq!(tokenize("(+ 1 2").missing_right(), Some(1));
        assert_eq!(tokenize("(+ 1 2)").missing_right(), Some(0));
        assert_eq!(tokenize("x").missing_right(), Some(0));
        assert_eq!(tokenize(")").missing_right(), None);
        assert_eq!(tokenize("(a))(").missing_right(), None);
    }

    #[test]
    fn test_parse_errors() {
        match parse("(+ 1 2") {
            Err(Error::MalformedProgram(e)) => {
                assert_eq!(e.kind, ParseErrorKind::Incomplete);
                assert!(e.message.contains("missing 1"));
            }
            other => panic!("expected MalformedProgram, got {other:?}"),
        }

        match parse("(a b))") {
            Err(Error::MalformedProgram(e)) => {
                assert_eq!(e.kind, ParseErrorKind::UnexpectedClose);
                assert_eq!(e.context.as_deref(), Some("( a b ) )"));
            }
            other => panic!("expected MalformedProgram, got {other:?}"),
        }

        assert!(parse("").unwrap().is_empty());
        assert!("(f x)".parse::<Program>().is_ok());
    }

    #[test]
    fn test_shape_predicates() {
        let cases = vec![
            // (text, atomic, combination)
            ("x", true, false),
            ("(f x)", false, true),
            ("()", false, true),
            ("(a) (b)", false, false),
            ("(f (g x))", false, true),
            ("a b c", false, false),
            ("(", false, false),
        ];

        for (text, atomic, combination) in cases {
            let program = tokenize(text);
            assert_eq!(program.is_atomic(), atomic, "atomic {text:?}");
            assert_eq!(program.is_combination(), combination, "combination {text:?}");
        }
    }

    #[test]
    fn test_split() {
        let split = |text: &str| -> Vec<String> {
            tokenize(text)
                .split()
                .iter()
                .map(ToString::to_string)
                .collect()
        };

        assert_eq!(split("(+ 1 2)"), vec!["+", "1", "2"]);
        assert_eq!(split("(f (g x) y)"), vec!["f", "(g x)", "y"]);
        assert_eq!(
            split("(define x 5) (f (g) 10) z"),
            vec!["(define x 5)", "(f (g) 10)", "z"]
        );
        assert_eq!(split("((a b) (c))"), vec!["(a b)", "(c)"]);
        assert!(split("()").is_empty());
    }

    #[test]
    fn test_substitute_is_independent_copy() {
        let body = tokenize("(+ a (* a b))");
        let x = tokenize("x");
        let call = tokenize("(f 1)");

        let mut bindings = HashMap::new();
        bindings.insert("a", &call);
        bindings.insert("b", &x);

        let expanded = body.substitute(&bindings);
        assert_eq!(expanded.to_string(), "(+ (f 1) (* (f 1) x))");
        assert_eq!(body.to_string(), "(+ a (* a b))");
    }

    #[test]
    fn test_display_round_trip() {
        for text in ["(+ 1 2)", "(f (g x) (h))", "a b (c)", "()", "((lambda (x) x) 3)"] {
            let program = parse(text).unwrap();
            let shown = program.to_string();
            assert_eq!(shown, text);
            assert_eq!(tokenize(&shown), program);
        }
    }
}
