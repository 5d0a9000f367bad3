//! Gemspec parsing without evaluating Ruby.
//!
//! A gemspec is Ruby source, but the overwhelming majority of them are a
//! single `Gem::Specification.new` block made of literal assignments and
//! dependency calls. [`parse_gemspec`] accepts exactly that subset:
//!
//! ```ruby
//! Gem::Specification.new do |s|
//!   s.name     = "example"
//!   s.version  = "1.2.0"
//!   s.licenses = ["MIT"]
//!   s.files    = %w[lib/example.rb]
//!   s.metadata["source_code_uri"] = "https://example.com/src"
//!   s.add_dependency "rack", ">= 2.0", "< 4"
//!   s.add_development_dependency("rspec", "~> 3.12")
//! end
//! ```
//!
//! Anything outside that grammar (constants, method calls, backticks,
//! interpolation) is a syntax error. [`fallback_gemspec`] then recovers the
//! runtime dependency calls line by line and re-parses them as a synthetic
//! specification.

use crate::dependency::DependencyKind;
use crate::manifest::{GemDependency, ManifestError, ManifestRecord};
use logos::Logos;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use thiserror::Error;

fn spec_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"Gem::Specification\.new\s*(?:\(\s*\))?\s*(do|\{)\s*\|\s*([a-z_][A-Za-z0-9_]*)\s*\|",
        )
        .expect("valid regex")
    })
}

fn runtime_call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*[A-Za-z_][A-Za-z0-9_]*\.(add_runtime_dependency|add_dependency)\b(.*)$")
            .expect("valid regex")
    })
}

/// Parse a gemspec with the strict grammar.
pub fn parse_gemspec(source: &str) -> Result<ManifestRecord, ManifestError> {
    let blocks: Vec<_> = spec_block_re().captures_iter(source).collect();
    let caps = match blocks.as_slice() {
        [] => return Err(ManifestError::NoSpecification),
        [only] => only,
        many => return Err(ManifestError::MultipleSpecifications(many.len())),
    };

    let whole = caps.get(0).map_or(0, |m| m.end());
    let closer = if &caps[1] == "do" {
        Closer::End
    } else {
        Closer::Brace
    };
    let line = source[..whole].matches('\n').count() + 1;

    let mut parser = Parser {
        lexer: Lexer::new(&source[whole..], line),
        peeked: None,
        var: caps[2].to_string(),
    };
    let mut builder = SpecBuilder::default();
    parser.block(closer, &mut builder)?;
    builder.finish()
}

/// Recover the runtime dependencies of a gemspec the strict grammar rejected.
///
/// The synthetic specification is named `name` (the manifest's path) and
/// carries only the `add_dependency`/`add_runtime_dependency` lines found in
/// `source`. It goes through [`parse_gemspec`], so a dependency line whose
/// arguments are not literals still fails.
pub fn fallback_gemspec(source: &str, name: &str) -> Result<ManifestRecord, ManifestError> {
    let escaped = name.replace('\\', "\\\\").replace('\'', "\\'");
    let mut synthetic = format!("Gem::Specification.new do |spec|\n  spec.name = '{escaped}'\n");

    for line in source.lines() {
        if let Some(caps) = runtime_call_re().captures(line) {
            synthetic.push_str(&format!("  spec.{}{}\n", &caps[1], &caps[2]));
        }
    }
    synthetic.push_str("end\n");

    parse_gemspec(&synthetic)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Closer {
    End,
    Brace,
}

/// Lexing failures, reported as [`ManifestError::Syntax`].
#[derive(Error, Debug, Clone, Default, PartialEq)]
enum LexError {
    #[default]
    #[error("unexpected character")]
    UnexpectedChar,
    #[error("string interpolation is not supported")]
    Interpolation,
    #[error("malformed percent literal")]
    MalformedPercent,
    #[error("unterminated percent literal")]
    UnterminatedPercent,
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(error = LexError)]
#[logos(skip r"[ \t\r]+")]
#[logos(skip r"#[^\n]*")]
#[logos(skip r"\\\r?\n")]
enum Token {
    #[regex(r"[a-z_][A-Za-z0-9_]*[?!]?", |lex| lex.slice().to_string())]
    Ident(String),

    #[regex(r"[A-Z][A-Za-z0-9_]*(::[A-Z][A-Za-z0-9_]*)*", |lex| lex.slice().to_string())]
    Const(String),

    /// `key:` inside a hash literal
    #[regex(r"[a-z_][A-Za-z0-9_]*[?!]?:", |lex| lex.slice().trim_end_matches(':').to_string())]
    Label(String),

    #[regex(r":[A-Za-z_][A-Za-z0-9_]*[?!]?", |lex| lex.slice()[1..].to_string())]
    #[regex(r#":"([^"\\]|\\(.|\n))*""#, |lex| double_quoted(&lex.slice()[1..]))]
    Symbol(String),

    #[regex(r#""([^"\\]|\\(.|\n))*""#, |lex| double_quoted(lex.slice()))]
    #[regex(r"'([^'\\]|\\(.|\n))*'", |lex| single_quoted(lex.slice()))]
    #[token("%q", percent_string)]
    #[token("%Q", percent_string)]
    Str(String),

    #[regex(r"-?[0-9][0-9_]*(\.[0-9][0-9_]*)*", |lex| lex.slice().replace('_', ""))]
    Num(String),

    #[token("%w", percent_words)]
    #[token("%W", percent_words)]
    Words(Vec<String>),

    #[token(".")]
    Dot,
    #[token("=")]
    Assign,
    #[token("<<")]
    Append,
    #[token("+=")]
    PlusAssign,
    #[token("=>")]
    Arrow,
    #[token(",")]
    Comma,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("|")]
    Pipe,

    #[token("\n")]
    #[token(";")]
    Newline,

    /// End of input (added by the lexer, not matched by logos)
    Eof,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ident(s) | Self::Const(s) | Self::Num(s) => write!(f, "`{s}`"),
            Self::Label(s) => write!(f, "`{s}:`"),
            Self::Symbol(s) => write!(f, "`:{s}`"),
            Self::Str(_) => write!(f, "string literal"),
            Self::Words(_) => write!(f, "word array"),
            Self::Dot => write!(f, "`.`"),
            Self::Assign => write!(f, "`=`"),
            Self::Append => write!(f, "`<<`"),
            Self::PlusAssign => write!(f, "`+=`"),
            Self::Arrow => write!(f, "`=>`"),
            Self::Comma => write!(f, "`,`"),
            Self::LParen => write!(f, "`(`"),
            Self::RParen => write!(f, "`)`"),
            Self::LBracket => write!(f, "`[`"),
            Self::RBracket => write!(f, "`]`"),
            Self::LBrace => write!(f, "`{{`"),
            Self::RBrace => write!(f, "`}}`"),
            Self::Pipe => write!(f, "`|`"),
            Self::Newline => write!(f, "end of line"),
            Self::Eof => write!(f, "end of file"),
        }
    }
}

/// Unescape a `"..."` literal, rejecting `#{}` interpolation.
fn double_quoted(slice: &str) -> Result<String, LexError> {
    let body = &slice[1..slice.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('\n') | None => {}
                Some(other) => out.push(other),
            },
            '#' if chars.peek() == Some(&'{') => return Err(LexError::Interpolation),
            other => out.push(other),
        }
    }
    Ok(out)
}

/// Unescape a `'...'` literal; only `\'` and `\\` are escapes.
fn single_quoted(slice: &str) -> String {
    let body = &slice[1..slice.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();

    while let Some(c) = chars.next() {
        match (c, chars.clone().next()) {
            ('\\', Some(e @ ('\'' | '\\'))) => {
                chars.next();
                out.push(e);
            }
            (other, _) => out.push(other),
        }
    }
    out
}

/// Consume the delimited body that follows a `%w`/`%q` prefix.
fn percent_body(lex: &mut logos::Lexer<'_, Token>) -> Result<String, LexError> {
    let rest = lex.remainder();
    let mut chars = rest.char_indices();
    let (_, open) = chars.next().ok_or(LexError::MalformedPercent)?;
    let close = match open {
        '[' => ']',
        '(' => ')',
        '{' => '}',
        '<' => '>',
        c if c.is_ascii_punctuation() => c,
        _ => return Err(LexError::MalformedPercent),
    };

    let mut depth = 0usize;
    let mut end = None;
    for (i, c) in chars {
        if c == close && depth == 0 {
            end = Some(i);
            break;
        }
        if open != close {
            if c == open {
                depth += 1;
            } else if c == close {
                depth -= 1;
            }
        }
    }

    let end = end.ok_or(LexError::UnterminatedPercent)?;
    let body = rest[open.len_utf8()..end].to_string();
    lex.bump(end + close.len_utf8());
    Ok(body)
}

fn percent_string(lex: &mut logos::Lexer<'_, Token>) -> Result<String, LexError> {
    let interpolating = lex.slice() == "%Q";
    let body = percent_body(lex)?;
    if interpolating && body.contains("#{") {
        return Err(LexError::Interpolation);
    }
    Ok(body)
}

fn percent_words(lex: &mut logos::Lexer<'_, Token>) -> Result<Vec<String>, LexError> {
    let interpolating = lex.slice() == "%W";
    let body = percent_body(lex)?;
    if interpolating && body.contains("#{") {
        return Err(LexError::Interpolation);
    }
    Ok(body.split_whitespace().map(str::to_string).collect())
}

/// Token stream with line tracking over a logos lexer.
struct Lexer<'a> {
    inner: logos::Lexer<'a, Token>,
    line: usize,
    counted: usize,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str, line: usize) -> Self {
        Self {
            inner: Token::lexer(source),
            line,
            counted: 0,
        }
    }

    /// Line of the byte at `offset`; offsets must not decrease.
    fn line_at(&mut self, offset: usize) -> usize {
        let source = self.inner.source();
        self.line += source[self.counted..offset].matches('\n').count();
        self.counted = offset;
        self.line
    }

    fn next_token(&mut self) -> Result<(Token, usize), ManifestError> {
        match self.inner.next() {
            None => {
                let end = self.inner.source().len();
                Ok((Token::Eof, self.line_at(end)))
            }
            Some(Ok(token)) => {
                let line = self.line_at(self.inner.span().start);
                Ok((token, line))
            }
            Some(Err(e)) => {
                let line = self.line_at(self.inner.span().start);
                let message = match e {
                    LexError::UnexpectedChar => {
                        let found = self.inner.slice().chars().next().unwrap_or(' ');
                        format!("unexpected character `{found}`")
                    }
                    other => other.to_string(),
                };
                Err(ManifestError::Syntax { line, message })
            }
        }
    }
}

/// A literal value on the right-hand side of an assignment.
#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Str(String),
    Num(String),
    Bool(bool),
    Nil,
    Array(Vec<Literal>),
    Hash(Vec<(String, Literal)>),
}

impl Literal {
    fn into_json(self) -> Value {
        match self {
            Self::Str(s) => Value::String(s),
            Self::Num(n) => serde_json::from_str(&n).unwrap_or(Value::String(n)),
            Self::Bool(b) => Value::Bool(b),
            Self::Nil => Value::Null,
            Self::Array(items) => Value::Array(items.into_iter().map(Self::into_json).collect()),
            Self::Hash(entries) => Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, v.into_json()))
                    .collect(),
            ),
        }
    }

    fn into_strings(self, field: &str) -> Result<Vec<String>, ManifestError> {
        match self {
            Self::Str(s) => Ok(vec![s]),
            Self::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Self::Str(s) => Ok(s),
                    _ => Err(invalid(field, "expected a list of strings")),
                })
                .collect(),
            _ => Err(invalid(field, "expected a string or a list of strings")),
        }
    }
}

fn invalid(field: &str, reason: &str) -> ManifestError {
    ManifestError::InvalidField {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    peeked: Option<(Token, usize)>,
    var: String,
}

impl Parser<'_> {
    fn next(&mut self) -> Result<(Token, usize), ManifestError> {
        match self.peeked.take() {
            Some(t) => Ok(t),
            None => self.lexer.next_token(),
        }
    }

    fn peek(&mut self) -> Result<&Token, ManifestError> {
        let token = match self.peeked.take() {
            Some(t) => t,
            None => self.lexer.next_token()?,
        };
        Ok(&self.peeked.insert(token).0)
    }

    fn skip_newlines(&mut self) -> Result<(), ManifestError> {
        while *self.peek()? == Token::Newline {
            self.next()?;
        }
        Ok(())
    }

    fn unexpected(token: &Token, line: usize, expected: &str) -> ManifestError {
        ManifestError::Syntax {
            line,
            message: format!("expected {expected}, found {token}"),
        }
    }

    fn expect(&mut self, want: &Token, expected: &str) -> Result<(), ManifestError> {
        let (token, line) = self.next()?;
        if token == *want {
            Ok(())
        } else {
            Err(Self::unexpected(&token, line, expected))
        }
    }

    fn block(&mut self, closer: Closer, builder: &mut SpecBuilder) -> Result<(), ManifestError> {
        loop {
            let (token, line) = self.next()?;
            match token {
                Token::Newline => {}
                Token::Ident(ref w) if w == "end" && closer == Closer::End => return Ok(()),
                Token::RBrace if closer == Closer::Brace => return Ok(()),
                Token::Eof => {
                    return Err(ManifestError::Syntax {
                        line,
                        message: String::from("specification block is never closed"),
                    })
                }
                Token::Ident(ref w) if *w == self.var => {
                    self.statement(builder)?;
                    let finished = match self.peek()? {
                        Token::Newline | Token::Eof | Token::RBrace => true,
                        Token::Ident(w) => w == "end",
                        _ => false,
                    };
                    if !finished {
                        let (token, line) = self.next()?;
                        return Err(Self::unexpected(&token, line, "end of statement"));
                    }
                }
                other => {
                    return Err(Self::unexpected(
                        &other,
                        line,
                        &format!("a statement on `{}`", self.var),
                    ))
                }
            }
        }
    }

    fn statement(&mut self, builder: &mut SpecBuilder) -> Result<(), ManifestError> {
        self.expect(&Token::Dot, "`.`")?;
        let (token, line) = self.next()?;
        let Token::Ident(method) = token else {
            return Err(Self::unexpected(&token, line, "an attribute name"));
        };

        if let Some(kind) = dependency_kind(&method) {
            let (name, requirements) = self.call_args(line)?;
            builder.dependencies.push(GemDependency {
                name,
                requirements,
                kind,
            });
            return Ok(());
        }

        let (token, line) = self.next()?;
        match token {
            Token::Assign => {
                self.skip_newlines()?;
                let value = self.value()?;
                builder.assign(&method, value)
            }
            Token::Append => {
                let value = self.value()?;
                builder.append(&method, vec![value])
            }
            Token::PlusAssign => {
                self.skip_newlines()?;
                match self.value()? {
                    Literal::Array(items) => builder.append(&method, items),
                    _ => Err(invalid(&method, "`+=` needs an array literal")),
                }
            }
            Token::LBracket if method == "metadata" => {
                let (key, line) = self.next()?;
                let Token::Str(key) = key else {
                    return Err(Self::unexpected(&key, line, "a metadata key string"));
                };
                self.expect(&Token::RBracket, "`]`")?;
                self.expect(&Token::Assign, "`=`")?;
                let value = self.value()?;
                builder.metadata_entry(key, value);
                Ok(())
            }
            other => Err(Self::unexpected(&other, line, "`=`, `<<` or `+=`")),
        }
    }

    /// Arguments of a dependency call: a name followed by requirement strings.
    fn call_args(&mut self, line: usize) -> Result<(String, Vec<String>), ManifestError> {
        let parenthesized = *self.peek()? == Token::LParen;
        if parenthesized {
            self.next()?;
            self.skip_newlines()?;
        }

        let mut args = Vec::new();
        loop {
            if parenthesized && *self.peek()? == Token::RParen {
                self.next()?;
                break;
            }
            if !parenthesized && matches!(self.peek()?, Token::Newline | Token::Eof) {
                break;
            }

            args.extend(self.value()?.into_strings("dependency")?);

            if parenthesized {
                self.skip_newlines()?;
            }
            if *self.peek()? == Token::Comma {
                self.next()?;
                self.skip_newlines()?;
            } else if parenthesized {
                self.expect(&Token::RParen, "`)`")?;
                break;
            } else {
                break;
            }
        }

        let mut args = args.into_iter();
        match args.next() {
            Some(name) if !name.is_empty() => Ok((name, args.collect())),
            _ => Err(ManifestError::Syntax {
                line,
                message: String::from("dependency call without a gem name"),
            }),
        }
    }

    fn value(&mut self) -> Result<Literal, ManifestError> {
        let (token, line) = self.next()?;
        match token {
            Token::Str(s) | Token::Symbol(s) => Ok(Literal::Str(s)),
            Token::Num(n) => Ok(Literal::Num(n)),
            Token::Words(words) => Ok(Literal::Array(
                words.into_iter().map(Literal::Str).collect(),
            )),
            Token::Ident(w) if w == "true" => Ok(Literal::Bool(true)),
            Token::Ident(w) if w == "false" => Ok(Literal::Bool(false)),
            Token::Ident(w) if w == "nil" => Ok(Literal::Nil),
            Token::LBracket => self.array(),
            Token::LBrace => self.hash(),
            Token::Const(c) if c == "Gem::Version" || c == "Gem::Requirement" => {
                self.expect(&Token::Dot, "`.`")?;
                self.expect(&Token::Ident(String::from("new")), "`new`")?;
                let parenthesized = *self.peek()? == Token::LParen;
                if parenthesized {
                    self.next()?;
                }
                let mut parts = Vec::new();
                loop {
                    parts.extend(self.value()?.into_strings(&c)?);
                    if *self.peek()? == Token::Comma {
                        self.next()?;
                    } else {
                        break;
                    }
                }
                if parenthesized {
                    self.expect(&Token::RParen, "`)`")?;
                }
                Ok(Literal::Str(parts.join(", ")))
            }
            other => Err(Self::unexpected(&other, line, "a literal value")),
        }
    }

    fn array(&mut self) -> Result<Literal, ManifestError> {
        let mut items = Vec::new();
        loop {
            self.skip_newlines()?;
            if *self.peek()? == Token::RBracket {
                self.next()?;
                return Ok(Literal::Array(items));
            }
            items.push(self.value()?);
            self.skip_newlines()?;
            let (token, line) = self.next()?;
            match token {
                Token::Comma => {}
                Token::RBracket => return Ok(Literal::Array(items)),
                other => return Err(Self::unexpected(&other, line, "`,` or `]`")),
            }
        }
    }

    fn hash(&mut self) -> Result<Literal, ManifestError> {
        let mut entries = Vec::new();
        loop {
            self.skip_newlines()?;
            let (token, line) = self.next()?;
            let key = match token {
                Token::RBrace => return Ok(Literal::Hash(entries)),
                Token::Label(k) => k,
                Token::Str(k) | Token::Symbol(k) => {
                    self.expect(&Token::Arrow, "`=>`")?;
                    k
                }
                other => return Err(Self::unexpected(&other, line, "a hash key")),
            };
            self.skip_newlines()?;
            entries.push((key, self.value()?));
            self.skip_newlines()?;
            let (token, line) = self.next()?;
            match token {
                Token::Comma => {}
                Token::RBrace => return Ok(Literal::Hash(entries)),
                other => return Err(Self::unexpected(&other, line, "`,` or `}`")),
            }
        }
    }
}

fn dependency_kind(method: &str) -> Option<DependencyKind> {
    match method {
        "add_dependency" | "add_runtime_dependency" => Some(DependencyKind::Runtime),
        "add_development_dependency" => Some(DependencyKind::Development),
        _ => None,
    }
}

/// Accumulates attribute assignments into a [`ManifestRecord`].
#[derive(Debug, Default)]
struct SpecBuilder {
    name: Option<String>,
    version: Option<String>,
    licenses: Vec<String>,
    files: Vec<String>,
    dependencies: Vec<GemDependency>,
    fields: serde_json::Map<String, Value>,
}

impl SpecBuilder {
    fn assign(&mut self, attr: &str, value: Literal) -> Result<(), ManifestError> {
        match (attr, value) {
            ("name", Literal::Str(s)) => self.name = Some(s),
            ("name", _) => return Err(invalid("name", "expected a string")),
            ("version", Literal::Str(s) | Literal::Num(s)) => self.version = Some(s),
            ("version", Literal::Nil) => self.version = None,
            ("version", _) => return Err(invalid("version", "expected a string")),
            ("license" | "licenses", Literal::Nil) => self.licenses.clear(),
            ("license" | "licenses", value) => self.licenses = value.into_strings(attr)?,
            ("files", Literal::Nil) => self.files.clear(),
            ("files", value) => self.files = value.into_strings(attr)?,
            (_, Literal::Nil) => {
                self.fields.remove(attr);
            }
            (_, value) => {
                self.fields.insert(attr.to_string(), value.into_json());
            }
        }
        Ok(())
    }

    fn append(&mut self, attr: &str, values: Vec<Literal>) -> Result<(), ManifestError> {
        match attr {
            "files" | "licenses" | "license" => {
                let mut strings = Vec::new();
                for v in values {
                    strings.extend(v.into_strings(attr)?);
                }
                if attr == "files" {
                    self.files.extend(strings);
                } else {
                    self.licenses.extend(strings);
                }
            }
            _ => {
                let entry = self
                    .fields
                    .entry(attr.to_string())
                    .or_insert_with(|| Value::Array(Vec::new()));
                let Value::Array(items) = entry else {
                    return Err(invalid(attr, "cannot append to a non-list value"));
                };
                items.extend(values.into_iter().map(Literal::into_json));
            }
        }
        Ok(())
    }

    fn metadata_entry(&mut self, key: String, value: Literal) {
        let entry = self
            .fields
            .entry(String::from("metadata"))
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(serde_json::Map::new());
        }
        if let Value::Object(map) = entry {
            map.insert(key, value.into_json());
        }
    }

    fn finish(self) -> Result<ManifestRecord, ManifestError> {
        let name = self
            .name
            .filter(|n| !n.is_empty())
            .ok_or(ManifestError::MissingField("name"))?;

        let mut record = ManifestRecord {
            name,
            version: self.version,
            licenses: self.licenses,
            dependencies: self.dependencies,
            files: self.files,
            metadata: self.fields.into_iter().collect(),
        };
        record.normalize();
        Ok(record)
    }
}
