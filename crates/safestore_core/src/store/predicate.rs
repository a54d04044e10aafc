//! Filter predicates and sort descriptors compiled to parameterised SQL.
//!
//! # Responsibility
//! - Parse the predicate format language (`attributeTwo == %d`, `name BEGINSWITH[c] %@`).
//! - Produce a `WHERE` fragment plus bound values for one entity's table.
//!
//! # Invariants
//! - Values never reach SQL text; they are always bound parameters.
//! - Keys are checked against the entity's attributes and relationships
//!   before they are quoted into SQL.
//! - `[c]` and `[d]` compare through [`FOLD_FUNCTION`], which every store
//!   connection registers.

use super::sql::quote_ident;
use super::{StoreError, StoreResult};
use crate::model::{Model, Value};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::Connection;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// SQL function `safestore_fold(value, flags)` applying a [`Fold`].
pub(crate) const FOLD_FUNCTION: &str = "safestore_fold";

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(?:(?P<ws>\s+)|(?P<ph>%(?:K|@|lld|ld|d|i|f))|(?P<num>-?\d+(?:\.\d+)?(?:[eE][+-]?\d+)?)|(?P<dq>"(?:[^"\\]|\\.)*")|(?P<sq>'(?:[^'\\]|\\.)*')|(?P<op>==|=<|=>|<=|>=|!=|<>|&&|\|\||=|<|>|!|\(|\)|\{|\}|,)|(?P<modifier>\[[cdCD]+\])|(?P<ident>[A-Za-z_][A-Za-z0-9_]*))"#,
    )
    .expect("valid predicate token regex")
});

/// Filter expression over an entity's attributes.
///
/// The format is parsed when the owning operation runs; errors surface as
/// that operation's failure kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    format: String,
    args: Vec<Value>,
}

impl Predicate {
    pub fn new(format: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            format: format.into(),
            args,
        }
    }

    /// Predicate without placeholder arguments.
    pub fn format(format: impl Into<String>) -> Self {
        Self::new(format, Vec::new())
    }

    pub fn format_string(&self) -> &str {
        &self.format
    }

    pub fn arguments(&self) -> &[Value] {
        &self.args
    }

    pub(crate) fn compile(&self, model: &Model, entity: &str) -> StoreResult<CompiledFilter> {
        let tokens = tokenize(&self.format)?;
        let mut compiler = Compiler {
            tokens,
            pos: 0,
            args: self.args.iter(),
            model,
            entity,
            params: Vec::new(),
        };
        let sql = compiler.expression()?;
        if let Some(token) = compiler.peek() {
            return Err(predicate_error(format!("unexpected token {token:?}")));
        }
        if compiler.args.next().is_some() {
            return Err(predicate_error("more arguments than placeholders"));
        }
        Ok(CompiledFilter {
            sql,
            params: compiler.params,
        })
    }
}

/// Builds a [`Predicate`] from a format string and placeholder arguments.
///
/// ```
/// use safestore_core::predicate;
///
/// let filter = predicate!("attributeTwo != %d AND attributeOne BEGINSWITH %@", 3, "x");
/// assert_eq!(filter.arguments().len(), 2);
/// ```
#[macro_export]
macro_rules! predicate {
    ($format:expr $(,)?) => {
        $crate::Predicate::format($format)
    };
    ($format:expr, $($arg:expr),+ $(,)?) => {
        $crate::Predicate::new($format, vec![$($crate::Value::from($arg)),+])
    };
}

/// Orders fetch results by one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortDescriptor {
    pub key: String,
    pub ascending: bool,
}

impl SortDescriptor {
    pub fn ascending(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ascending: true,
        }
    }

    pub fn descending(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ascending: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CompiledFilter {
    pub sql: String,
    pub params: Vec<Value>,
}

/// `ORDER BY` clause for `sort`, or an empty string.
pub(crate) fn order_by(model: &Model, entity: &str, sort: &[SortDescriptor]) -> StoreResult<String> {
    if sort.is_empty() {
        return Ok(String::new());
    }
    let mut terms = Vec::with_capacity(sort.len());
    for descriptor in sort {
        if !is_key(model, entity, &descriptor.key) {
            return Err(StoreError::Sort(format!(
                "`{}` is not a key of `{entity}`",
                descriptor.key
            )));
        }
        terms.push(format!(
            "{} {}",
            quote_ident(&descriptor.key),
            if descriptor.ascending { "ASC" } else { "DESC" }
        ));
    }
    Ok(format!(" ORDER BY {}", terms.join(", ")))
}

fn is_key(model: &Model, entity: &str, key: &str) -> bool {
    model.attribute(entity, key).is_some() || model.relationship(entity, key).is_some()
}

fn predicate_error(message: impl Into<String>) -> StoreError {
    StoreError::Predicate(message.into())
}

/// Comparison options from a `[c]`, `[d]` or `[cd]` modifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Fold {
    case: bool,
    diacritics: bool,
}

impl Fold {
    fn parse(modifier: &str) -> Self {
        let modifier = modifier.to_ascii_lowercase();
        Self {
            case: modifier.contains('c'),
            diacritics: modifier.contains('d'),
        }
    }

    fn bits(self) -> i64 {
        i64::from(self.case) | (i64::from(self.diacritics) << 1)
    }

    fn from_bits(bits: i64) -> Self {
        Self {
            case: bits & 1 != 0,
            diacritics: bits & 2 != 0,
        }
    }

    fn is_plain(self) -> bool {
        !self.case && !self.diacritics
    }

    /// Unicode-aware fold; the result is NFC so composed and decomposed
    /// input compare equal.
    fn apply(self, text: &str) -> String {
        let decomposed: String = if self.diacritics {
            text.nfd().filter(|c| !is_combining_mark(*c)).collect()
        } else {
            text.nfd().collect()
        };
        let cased = if self.case {
            decomposed.to_lowercase()
        } else {
            decomposed
        };
        cased.nfc().collect()
    }

    /// Wraps a SQL operand in the fold function.
    fn wrap(self, operand: &str) -> String {
        format!("{FOLD_FUNCTION}({operand}, {})", self.bits())
    }
}

/// Registers [`FOLD_FUNCTION`] on `conn`.
pub(crate) fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        FOLD_FUNCTION,
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        fold_sql,
    )
}

fn fold_sql(ctx: &Context<'_>) -> rusqlite::Result<SqlValue> {
    let fold = Fold::from_bits(ctx.get::<i64>(1)?);
    match ctx.get_raw(0) {
        ValueRef::Text(bytes) => {
            let text = std::str::from_utf8(bytes)
                .map_err(|err| rusqlite::Error::UserFunctionError(Box::new(err)))?;
            Ok(SqlValue::Text(fold.apply(text)))
        }
        other => Ok(other.into()),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Literal(Value),
    KeyPlaceholder,
    ValuePlaceholder,
    Symbol(&'static str),
    Modifier(Fold),
}

const SYMBOLS: [&str; 17] = [
    "==", "=<", "=>", "<=", ">=", "!=", "<>", "&&", "||", "=", "<", ">", "!", "(", ")", "{", "}",
];

fn tokenize(input: &str) -> StoreResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut rest = input;
    while !rest.is_empty() {
        let caps = TOKEN_RE
            .captures(rest)
            .ok_or_else(|| predicate_error(format!("cannot parse near `{rest}`")))?;
        let whole = caps.get(0).map_or("", |m| m.as_str());

        if caps.name("ws").is_some() {
            // skip
        } else if let Some(m) = caps.name("ph") {
            tokens.push(if m.as_str() == "%K" {
                Token::KeyPlaceholder
            } else {
                Token::ValuePlaceholder
            });
        } else if let Some(m) = caps.name("num") {
            tokens.push(Token::Literal(parse_number(m.as_str())?));
        } else if let Some(m) = caps.name("dq").or_else(|| caps.name("sq")) {
            let quoted = m.as_str();
            tokens.push(Token::Literal(Value::Text(unescape(
                &quoted[1..quoted.len() - 1],
            ))));
        } else if let Some(m) = caps.name("op") {
            let symbol = match m.as_str() {
                "," => ",",
                other => SYMBOLS
                    .iter()
                    .copied()
                    .find(|symbol| *symbol == other)
                    .ok_or_else(|| predicate_error(format!("unknown operator `{other}`")))?,
            };
            tokens.push(Token::Symbol(symbol));
        } else if let Some(m) = caps.name("modifier") {
            tokens.push(Token::Modifier(Fold::parse(m.as_str())));
        } else if let Some(m) = caps.name("ident") {
            tokens.push(Token::Ident(m.as_str().to_string()));
        }

        rest = &rest[whole.len()..];
    }
    Ok(tokens)
}

fn parse_number(raw: &str) -> StoreResult<Value> {
    if raw.contains(['.', 'e', 'E']) {
        raw.parse::<f64>()
            .map(Value::Double)
            .map_err(|err| predicate_error(format!("invalid number `{raw}`: {err}")))
    } else {
        raw.parse::<i64>()
            .map(Value::Integer)
            .map_err(|err| predicate_error(format!("invalid number `{raw}`: {err}")))
    }
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[derive(Debug, Clone, Copy)]
enum StringOp {
    BeginsWith,
    EndsWith,
    Contains,
    Like,
}

impl StringOp {
    fn from_keyword(word: &str) -> Option<Self> {
        match word.to_ascii_uppercase().as_str() {
            "BEGINSWITH" => Some(Self::BeginsWith),
            "ENDSWITH" => Some(Self::EndsWith),
            "CONTAINS" => Some(Self::Contains),
            "LIKE" => Some(Self::Like),
            _ => None,
        }
    }

    /// GLOB pattern; GLOB itself compares exactly.
    fn glob_pattern(self, needle: &str) -> String {
        match self {
            Self::BeginsWith => format!("{}*", glob_escape(needle)),
            Self::EndsWith => format!("*{}", glob_escape(needle)),
            Self::Contains => format!("*{}*", glob_escape(needle)),
            Self::Like => needle.replace('[', "[[]"),
        }
    }
}

fn glob_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '[' => out.push_str("[[]"),
            '*' => out.push_str("[*]"),
            '?' => out.push_str("[?]"),
            other => out.push(other),
        }
    }
    out
}

enum Operand {
    Key(String),
    Value(Value),
}

struct Compiler<'a> {
    tokens: Vec<Token>,
    pos: usize,
    args: std::slice::Iter<'a, Value>,
    model: &'a Model,
    entity: &'a str,
    params: Vec<Value>,
}

impl Compiler<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(word)) if word.eq_ignore_ascii_case(keyword))
    }

    fn peek_symbol(&self, symbol: &str) -> bool {
        matches!(self.peek(), Some(Token::Symbol(s)) if *s == symbol)
    }

    fn modifier(&mut self) -> Fold {
        match self.peek() {
            Some(Token::Modifier(fold)) => {
                let fold = *fold;
                self.pos += 1;
                fold
            }
            _ => Fold::default(),
        }
    }

    fn expect_symbol(&mut self, symbol: &str) -> StoreResult<()> {
        if self.peek_symbol(symbol) {
            self.pos += 1;
            Ok(())
        } else {
            Err(predicate_error(format!(
                "expected `{symbol}`, found {:?}",
                self.peek()
            )))
        }
    }

    fn expression(&mut self) -> StoreResult<String> {
        let mut sql = self.conjunction()?;
        while self.peek_keyword("OR") || self.peek_symbol("||") {
            self.pos += 1;
            let rhs = self.conjunction()?;
            sql = format!("({sql} OR {rhs})");
        }
        Ok(sql)
    }

    fn conjunction(&mut self) -> StoreResult<String> {
        let mut sql = self.negation()?;
        while self.peek_keyword("AND") || self.peek_symbol("&&") {
            self.pos += 1;
            let rhs = self.negation()?;
            sql = format!("({sql} AND {rhs})");
        }
        Ok(sql)
    }

    fn negation(&mut self) -> StoreResult<String> {
        if self.peek_keyword("NOT") || self.peek_symbol("!") {
            self.pos += 1;
            let inner = self.negation()?;
            return Ok(format!("(NOT {inner})"));
        }
        self.primary()
    }

    fn primary(&mut self) -> StoreResult<String> {
        if self.peek_symbol("(") {
            self.pos += 1;
            let inner = self.expression()?;
            self.expect_symbol(")")?;
            return Ok(inner);
        }
        if self.peek_keyword("TRUEPREDICATE") {
            self.pos += 1;
            return Ok("1".to_string());
        }
        if self.peek_keyword("FALSEPREDICATE") {
            self.pos += 1;
            return Ok("0".to_string());
        }
        self.comparison()
    }

    fn comparison(&mut self) -> StoreResult<String> {
        let lhs = self.operand()?;
        let lhs = self.operand_sql(lhs);

        match self.next() {
            Some(Token::Symbol(symbol)) => {
                let op = match symbol {
                    "==" | "=" => "IS",
                    "!=" | "<>" => "IS NOT",
                    "<" => "<",
                    "<=" | "=<" => "<=",
                    ">" => ">",
                    ">=" | "=>" => ">=",
                    other => {
                        return Err(predicate_error(format!(
                            "`{other}` is not a comparison operator"
                        )))
                    }
                };
                let fold = self.modifier();
                let rhs = self.operand()?;
                let rhs = self.operand_sql(rhs);
                if fold.is_plain() {
                    Ok(format!("{lhs} {op} {rhs}"))
                } else {
                    Ok(format!("{} {op} {}", fold.wrap(&lhs), fold.wrap(&rhs)))
                }
            }
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("IN") => {
                let values = self.value_list()?;
                if values.is_empty() {
                    return Ok("0".to_string());
                }
                let slots = values
                    .into_iter()
                    .map(|value| self.bind(value))
                    .collect::<Vec<_>>()
                    .join(", ");
                Ok(format!("{lhs} IN ({slots})"))
            }
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("BETWEEN") => {
                let mut values = self.value_list()?;
                if values.len() != 2 {
                    return Err(predicate_error("BETWEEN expects exactly two bounds"));
                }
                let high = values.pop().unwrap_or_default();
                let low = values.pop().unwrap_or_default();
                let low = self.bind(low);
                let high = self.bind(high);
                Ok(format!("{lhs} BETWEEN {low} AND {high}"))
            }
            Some(Token::Ident(word)) => {
                let op = StringOp::from_keyword(&word)
                    .ok_or_else(|| predicate_error(format!("unknown operator `{word}`")))?;
                let fold = self.modifier();
                let needle = match self.operand()? {
                    Operand::Value(Value::Text(text)) => text,
                    Operand::Value(other) => {
                        return Err(predicate_error(format!(
                            "`{word}` expects a text value, got {}",
                            other.type_name()
                        )))
                    }
                    Operand::Key(key) => {
                        return Err(predicate_error(format!(
                            "`{word}` expects a value, got key `{key}`"
                        )))
                    }
                };
                if fold.is_plain() {
                    let slot = self.bind(Value::Text(op.glob_pattern(&needle)));
                    Ok(format!("{lhs} GLOB {slot}"))
                } else {
                    let slot = self.bind(Value::Text(op.glob_pattern(&fold.apply(&needle))));
                    Ok(format!("{} GLOB {slot}", fold.wrap(&lhs)))
                }
            }
            other => Err(predicate_error(format!(
                "expected an operator, found {other:?}"
            ))),
        }
    }

    fn value_list(&mut self) -> StoreResult<Vec<Value>> {
        self.expect_symbol("{")?;
        let mut values = Vec::new();
        if self.peek_symbol("}") {
            self.pos += 1;
            return Ok(values);
        }
        loop {
            match self.operand()? {
                Operand::Value(value) => values.push(value),
                Operand::Key(key) => {
                    return Err(predicate_error(format!(
                        "collection literal cannot contain key `{key}`"
                    )))
                }
            }
            if self.peek_symbol(",") {
                self.pos += 1;
                continue;
            }
            self.expect_symbol("}")?;
            return Ok(values);
        }
    }

    fn operand(&mut self) -> StoreResult<Operand> {
        match self.next() {
            Some(Token::Literal(value)) => Ok(Operand::Value(value)),
            Some(Token::ValuePlaceholder) => {
                let value = self
                    .args
                    .next()
                    .cloned()
                    .ok_or_else(|| predicate_error("not enough arguments for placeholders"))?;
                Ok(Operand::Value(value))
            }
            Some(Token::KeyPlaceholder) => {
                let key = match self.args.next() {
                    Some(Value::Text(key)) => key.clone(),
                    Some(other) => {
                        return Err(predicate_error(format!(
                            "%K expects a text argument, got {}",
                            other.type_name()
                        )))
                    }
                    None => return Err(predicate_error("not enough arguments for placeholders")),
                };
                self.key(key)
            }
            Some(Token::Ident(word)) => match word.to_ascii_uppercase().as_str() {
                "TRUE" | "YES" => Ok(Operand::Value(Value::Boolean(true))),
                "FALSE" | "NO" => Ok(Operand::Value(Value::Boolean(false))),
                "NIL" | "NULL" => Ok(Operand::Value(Value::Null)),
                _ => self.key(word),
            },
            other => Err(predicate_error(format!(
                "expected a key or value, found {other:?}"
            ))),
        }
    }

    fn key(&self, key: String) -> StoreResult<Operand> {
        if is_key(self.model, self.entity, &key) {
            Ok(Operand::Key(key))
        } else {
            Err(predicate_error(format!(
                "`{key}` is not a key of `{}`",
                self.entity
            )))
        }
    }

    fn operand_sql(&mut self, operand: Operand) -> String {
        match operand {
            Operand::Key(key) => quote_ident(&key),
            Operand::Value(value) => self.bind(value),
        }
    }

    fn bind(&mut self, value: Value) -> String {
        self.params.push(value);
        "?".to_string()
    }
}
