//! # Formula Engine
//!
//! Formulas are small expressions over other fields of the same entity:
//!
//! ```text
//! {Hours} * {Rate}
//! IF({Status} = "Done", 0, {Estimate} - {Spent})
//! CONCAT({First}, " ", {Last})
//! ```
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! or         := and (("or" | "||") and)*
//! and        := not (("and" | "&&") not)*
//! not        := ("not" | "!") not | comparison
//! comparison := concat (("=" | "==" | "!=" | "<>" | "<" | "<=" | ">" | ">=") concat)?
//! concat     := additive ("&" additive)*
//! additive   := term (("+" | "-") term)*
//! term       := unary (("*" | "/" | "%") unary)*
//! unary      := "-" unary | primary
//! primary    := number | string | true | false | null | {reference} | NAME "(" args ")" | "(" or ")"
//! ```
//!
//! Evaluation is pure, so results are cached by entity, field and a hash of the inputs.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, PoisonError};

use log::debug;

use crate::catalog::FormulaConfig;
use crate::errors::FormulaError;
use crate::id::FieldId;
use crate::types::{FieldValue, ResolvedValue, ResolvedValues, format_number, round_to};

/// Parsed formula expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    Bool(bool),
    Null,
    /// `{name or id}` as written in the formula.
    Reference(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        function: Function,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    If,
    Round,
    Abs,
    Min,
    Max,
    Concat,
    Coalesce,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "IF" => Some(Function::If),
            "ROUND" => Some(Function::Round),
            "ABS" => Some(Function::Abs),
            "MIN" => Some(Function::Min),
            "MAX" => Some(Function::Max),
            "CONCAT" => Some(Function::Concat),
            "COALESCE" => Some(Function::Coalesce),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Function::If => "IF",
            Function::Round => "ROUND",
            Function::Abs => "ABS",
            Function::Min => "MIN",
            Function::Max => "MAX",
            Function::Concat => "CONCAT",
            Function::Coalesce => "COALESCE",
        }
    }

    /// Minimum and maximum argument counts plus a human description.
    const fn arity(self) -> (usize, Option<usize>, &'static str) {
        match self {
            Function::If => (2, Some(3), "2 or 3"),
            Function::Round => (1, Some(2), "1 or 2"),
            Function::Abs => (1, Some(1), "1"),
            Function::Min | Function::Max | Function::Concat | Function::Coalesce => (1, None, "at least 1"),
        }
    }
}

impl Expr {
    /// Reference tokens in the order they first appear.
    pub fn references(&self) -> Vec<&str> {
        let mut found = Vec::new();
        self.collect_references(&mut found);
        found
    }

    fn collect_references<'a>(&'a self, found: &mut Vec<&'a str>) {
        match self {
            Expr::Reference(name) => {
                if !found.contains(&name.as_str()) {
                    found.push(name);
                }
            }
            Expr::Unary { operand, .. } => operand.collect_references(found),
            Expr::Binary { left, right, .. } => {
                left.collect_references(found);
                right.collect_references(found);
            }
            Expr::Call { args, .. } => args.iter().for_each(|arg| arg.collect_references(found)),
            Expr::Number(_) | Expr::Text(_) | Expr::Bool(_) | Expr::Null => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Text(String),
    Reference(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

const TWO_CHAR_OPS: [&str; 7] = ["==", "!=", "<=", ">=", "<>", "&&", "||"];
const ONE_CHAR_OPS: [&str; 10] = ["+", "-", "*", "/", "%", "&", "=", "<", ">", "!"];

fn syntax(position: usize, message: impl Into<String>) -> FormulaError {
    FormulaError::Parse {
        position,
        message: message.into(),
    }
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, FormulaError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|(_, next)| next.is_ascii_digit())) {
            let start = i;
            while i < chars.len() && (chars[i].1.is_ascii_digit() || chars[i].1 == '.') {
                i += 1;
            }
            let end = chars.get(i).map_or(source.len(), |(p, _)| *p);
            let literal = &source[chars[start].0..end];
            let number = literal
                .parse::<f64>()
                .map_err(|_| syntax(pos, format!("invalid number '{literal}'")))?;
            tokens.push((pos, Token::Number(number)));
            continue;
        }

        if c == '"' || c == '\'' {
            let mut text = String::new();
            i += 1;
            let mut closed = false;
            while i < chars.len() {
                let ch = chars[i].1;
                if ch == '\\' && i + 1 < chars.len() {
                    text.push(chars[i + 1].1);
                    i += 2;
                    continue;
                }
                i += 1;
                if ch == c {
                    closed = true;
                    break;
                }
                text.push(ch);
            }
            if !closed {
                return Err(syntax(pos, "unterminated string"));
            }
            tokens.push((pos, Token::Text(text)));
            continue;
        }

        if c == '{' {
            let mut name = String::new();
            i += 1;
            let mut closed = false;
            while i < chars.len() {
                let ch = chars[i].1;
                i += 1;
                if ch == '}' {
                    closed = true;
                    break;
                }
                name.push(ch);
            }
            if !closed {
                return Err(syntax(pos, "unterminated field reference"));
            }
            let name = name.trim();
            if name.is_empty() {
                return Err(syntax(pos, "empty field reference"));
            }
            tokens.push((pos, Token::Reference(name.to_string())));
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while i < chars.len() && (chars[i].1.is_alphanumeric() || chars[i].1 == '_') {
                ident.push(chars[i].1);
                i += 1;
            }
            tokens.push((pos, Token::Ident(ident)));
            continue;
        }

        match c {
            '(' => tokens.push((pos, Token::LParen)),
            ')' => tokens.push((pos, Token::RParen)),
            ',' => tokens.push((pos, Token::Comma)),
            _ => {
                let pair: String = chars[i..].iter().take(2).map(|(_, ch)| *ch).collect();
                if let Some(op) = TWO_CHAR_OPS.iter().find(|op| **op == pair) {
                    tokens.push((pos, Token::Op(*op)));
                    i += 2;
                    continue;
                }
                let single = c.to_string();
                match ONE_CHAR_OPS.iter().find(|op| **op == single) {
                    Some(op) => tokens.push((pos, Token::Op(*op))),
                    None => return Err(syntax(pos, format!("unexpected character '{c}'"))),
                }
            }
        }
        i += 1;
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, token)| token)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |(pos, _)| *pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, token)| token.clone());
        self.pos += 1;
        token
    }

    fn eat_op(&mut self, ops: &[&str]) -> Option<&'static str> {
        match self.peek() {
            Some(Token::Op(op)) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        match self.peek() {
            Some(Token::Ident(ident)) if ident.eq_ignore_ascii_case(keyword) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn expect(&mut self, expected: Token, description: &str) -> Result<(), FormulaError> {
        let position = self.position();
        match self.advance() {
            Some(token) if token == expected => Ok(()),
            _ => Err(syntax(position, format!("expected {description}"))),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, FormulaError> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("or") || self.eat_op(&["||"]).is_some() {
            let right = self.parse_and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, FormulaError> {
        let mut left = self.parse_not()?;
        while self.eat_keyword("and") || self.eat_op(&["&&"]).is_some() {
            let right = self.parse_not()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, FormulaError> {
        if self.eat_keyword("not") || self.eat_op(&["!"]).is_some() {
            let operand = self.parse_not()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, FormulaError> {
        let left = self.parse_concat()?;
        let op = match self.eat_op(&["=", "==", "!=", "<>", "<", "<=", ">", ">="]) {
            Some("=" | "==") => BinaryOp::Eq,
            Some("!=" | "<>") => BinaryOp::Ne,
            Some("<") => BinaryOp::Lt,
            Some("<=") => BinaryOp::Le,
            Some(">") => BinaryOp::Gt,
            Some(">=") => BinaryOp::Ge,
            _ => return Ok(left),
        };
        let right = self.parse_concat()?;
        Ok(binary(op, left, right))
    }

    fn parse_concat(&mut self) -> Result<Expr, FormulaError> {
        let mut left = self.parse_additive()?;
        while self.eat_op(&["&"]).is_some() {
            let right = self.parse_additive()?;
            left = binary(BinaryOp::Concat, left, right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, FormulaError> {
        let mut left = self.parse_term()?;
        while let Some(op) = self.eat_op(&["+", "-"]) {
            let right = self.parse_term()?;
            let op = if op == "+" { BinaryOp::Add } else { BinaryOp::Sub };
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, FormulaError> {
        let mut left = self.parse_unary()?;
        while let Some(op) = self.eat_op(&["*", "/", "%"]) {
            let right = self.parse_unary()?;
            let op = match op {
                "*" => BinaryOp::Mul,
                "/" => BinaryOp::Div,
                _ => BinaryOp::Rem,
            };
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, FormulaError> {
        if self.eat_op(&["-"]).is_some() {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, FormulaError> {
        let position = self.position();
        match self.advance() {
            Some(Token::Number(number)) => Ok(Expr::Number(number)),
            Some(Token::Text(text)) => Ok(Expr::Text(text)),
            Some(Token::Reference(name)) => Ok(Expr::Reference(name)),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::Ident(ident)) => {
                if self.peek() == Some(&Token::LParen) {
                    return self.parse_call(&ident, position);
                }
                match ident.to_ascii_lowercase().as_str() {
                    "true" => Ok(Expr::Bool(true)),
                    "false" => Ok(Expr::Bool(false)),
                    "null" => Ok(Expr::Null),
                    _ => Err(syntax(
                        position,
                        format!("unexpected name '{ident}' (field references are written {{{ident}}})"),
                    )),
                }
            }
            Some(_) => Err(syntax(position, "unexpected token")),
            None => Err(syntax(position, "unexpected end of formula")),
        }
    }

    fn parse_call(&mut self, name: &str, position: usize) -> Result<Expr, FormulaError> {
        let function = Function::from_name(name).ok_or_else(|| FormulaError::UnknownFunction {
            name: name.to_ascii_uppercase(),
        })?;
        self.expect(Token::LParen, "'('")?;
        let mut args = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            loop {
                args.push(self.parse_or()?);
                if self.peek() == Some(&Token::Comma) {
                    self.pos += 1;
                    continue;
                }
                break;
            }
        }
        self.expect(Token::RParen, "')' after arguments")?;

        let (min, max, expected) = function.arity();
        if args.len() < min || max.is_some_and(|max| args.len() > max) {
            debug!("{}() called with {} argument(s) at {position}", function.name(), args.len());
            return Err(FormulaError::Arity {
                name: function.name().to_string(),
                expected,
            });
        }
        Ok(Expr::Call { function, args })
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

/// Parse a formula expression.
pub fn parse(source: &str) -> Result<Expr, FormulaError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: source.len(),
    };
    let expr = parser.parse_or()?;
    if parser.pos < parser.tokens.len() {
        return Err(syntax(parser.position(), "unexpected trailing input"));
    }
    Ok(expr)
}

/// Runtime value inside formula evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Number(f64),
    Text(String),
    Bool(bool),
    Null,
}

impl Scalar {
    fn from_field_value(value: &FieldValue) -> Self {
        match value {
            FieldValue::Number(number) => Scalar::Number(*number),
            FieldValue::Bool(flag) => Scalar::Bool(*flag),
            FieldValue::Text(text) => Scalar::Text(text.clone()),
            other => Scalar::Text(other.display()),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Scalar::Number(_) => "number",
            Scalar::Text(_) => "text",
            Scalar::Bool(_) => "boolean",
            Scalar::Null => "null",
        }
    }

    fn truthy(&self) -> bool {
        match self {
            Scalar::Number(number) => *number != 0.0,
            Scalar::Text(text) => !text.is_empty(),
            Scalar::Bool(flag) => *flag,
            Scalar::Null => false,
        }
    }

    /// Numbers and numeric strings coerce; anything else is a type mismatch.
    fn as_number(&self) -> Result<Option<f64>, FormulaError> {
        match self {
            Scalar::Number(number) => Ok(Some(*number)),
            Scalar::Null => Ok(None),
            Scalar::Text(text) => text.trim().parse::<f64>().map(Some).map_err(|_| FormulaError::TypeMismatch {
                message: format!("'{text}' is not a number"),
            }),
            Scalar::Bool(_) => Err(FormulaError::TypeMismatch {
                message: "expected a number, found boolean".to_string(),
            }),
        }
    }

    fn render(&self) -> String {
        match self {
            Scalar::Number(number) => format_number(*number),
            Scalar::Text(text) => text.clone(),
            Scalar::Bool(flag) => flag.to_string(),
            Scalar::Null => String::new(),
        }
    }
}

fn evaluate<F>(expr: &Expr, lookup: &F) -> Result<Scalar, FormulaError>
where
    F: Fn(&str) -> Result<Scalar, FormulaError>,
{
    match expr {
        Expr::Number(number) => Ok(Scalar::Number(*number)),
        Expr::Text(text) => Ok(Scalar::Text(text.clone())),
        Expr::Bool(flag) => Ok(Scalar::Bool(*flag)),
        Expr::Null => Ok(Scalar::Null),
        Expr::Reference(name) => lookup(name),
        Expr::Unary { op, operand } => {
            let value = evaluate(operand, lookup)?;
            match op {
                UnaryOp::Not => Ok(Scalar::Bool(!value.truthy())),
                UnaryOp::Neg => Ok(value.as_number()?.map_or(Scalar::Null, |n| Scalar::Number(-n))),
            }
        }
        Expr::Binary { op, left, right } => match op {
            BinaryOp::And => {
                let left = evaluate(left, lookup)?;
                if !left.truthy() {
                    return Ok(Scalar::Bool(false));
                }
                Ok(Scalar::Bool(evaluate(right, lookup)?.truthy()))
            }
            BinaryOp::Or => {
                let left = evaluate(left, lookup)?;
                if left.truthy() {
                    return Ok(Scalar::Bool(true));
                }
                Ok(Scalar::Bool(evaluate(right, lookup)?.truthy()))
            }
            _ => {
                let left = evaluate(left, lookup)?;
                let right = evaluate(right, lookup)?;
                apply_binary(*op, left, right)
            }
        },
        Expr::Call { function, args } => call(*function, args, lookup),
    }
}

fn apply_binary(op: BinaryOp, left: Scalar, right: Scalar) -> Result<Scalar, FormulaError> {
    match op {
        BinaryOp::Concat => Ok(Scalar::Text(format!("{}{}", left.render(), right.render()))),
        BinaryOp::Eq => Ok(Scalar::Bool(scalars_equal(&left, &right))),
        BinaryOp::Ne => Ok(Scalar::Bool(!scalars_equal(&left, &right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let Some(ordering) = compare_scalars(&left, &right)? else {
                return Ok(Scalar::Null);
            };
            let result = match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            Ok(Scalar::Bool(result))
        }
        _ => {
            let (Some(a), Some(b)) = (left.as_number()?, right.as_number()?) else {
                return Ok(Scalar::Null);
            };
            let result = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div | BinaryOp::Rem if b == 0.0 => return Err(FormulaError::DivisionByZero),
                BinaryOp::Div => a / b,
                _ => a % b,
            };
            Ok(Scalar::Number(result))
        }
    }
}

fn scalars_equal(left: &Scalar, right: &Scalar) -> bool {
    match (left, right) {
        (Scalar::Number(a), Scalar::Text(_)) | (Scalar::Text(_), Scalar::Number(a)) => {
            let other = if matches!(left, Scalar::Number(_)) { right } else { left };
            other.as_number().ok().flatten() == Some(*a)
        }
        _ => left == right,
    }
}

fn compare_scalars(left: &Scalar, right: &Scalar) -> Result<Option<std::cmp::Ordering>, FormulaError> {
    match (left, right) {
        (Scalar::Null, _) | (_, Scalar::Null) => Ok(None),
        (Scalar::Text(a), Scalar::Text(b)) => Ok(Some(a.cmp(b))),
        (Scalar::Bool(a), Scalar::Bool(b)) => Ok(Some(a.cmp(b))),
        _ => {
            let (Some(a), Some(b)) = (left.as_number()?, right.as_number()?) else {
                return Ok(None);
            };
            Ok(a.partial_cmp(&b))
        }
    }
}

fn call<F>(function: Function, args: &[Expr], lookup: &F) -> Result<Scalar, FormulaError>
where
    F: Fn(&str) -> Result<Scalar, FormulaError>,
{
    match function {
        Function::If => {
            let condition = evaluate(&args[0], lookup)?;
            if condition.truthy() {
                evaluate(&args[1], lookup)
            } else {
                args.get(2).map_or(Ok(Scalar::Null), |branch| evaluate(branch, lookup))
            }
        }
        Function::Round => {
            let value = evaluate(&args[0], lookup)?.as_number()?;
            let places = match args.get(1) {
                Some(arg) => evaluate(arg, lookup)?.as_number()?.unwrap_or(0.0),
                None => 0.0,
            };
            if !(0.0..=10.0).contains(&places) {
                return Err(FormulaError::TypeMismatch {
                    message: "ROUND() places must be between 0 and 10".to_string(),
                });
            }
            Ok(value.map_or(Scalar::Null, |n| Scalar::Number(round_to(n, places as u32))))
        }
        Function::Abs => Ok(evaluate(&args[0], lookup)?
            .as_number()?
            .map_or(Scalar::Null, |n| Scalar::Number(n.abs()))),
        Function::Min | Function::Max => {
            let mut best: Option<f64> = None;
            for arg in args {
                if let Some(n) = evaluate(arg, lookup)?.as_number()? {
                    best = Some(match best {
                        Some(current) if function == Function::Min => current.min(n),
                        Some(current) => current.max(n),
                        None => n,
                    });
                }
            }
            Ok(best.map_or(Scalar::Null, Scalar::Number))
        }
        Function::Concat => {
            let mut out = String::new();
            for arg in args {
                out.push_str(&evaluate(arg, lookup)?.render());
            }
            Ok(Scalar::Text(out))
        }
        Function::Coalesce => {
            for arg in args {
                let value = evaluate(arg, lookup)?;
                if value != Scalar::Null {
                    return Ok(value);
                }
            }
            Ok(Scalar::Null)
        }
    }
}

type CacheKey = (String, FieldId, u64);
type CachedResult = Result<Option<FieldValue>, FormulaError>;

#[derive(Default)]
struct FormulaCache {
    entries: HashMap<CacheKey, CachedResult>,
    order: VecDeque<CacheKey>,
}

/// Computes formula fields and caches results keyed by `(entity_id, field_id, inputs hash)`.
pub struct FormulaEngine {
    capacity: usize,
    cache: Mutex<FormulaCache>,
}

impl FormulaEngine {
    /// `capacity == 0` disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            cache: Mutex::new(FormulaCache::default()),
        }
    }

    /// Evaluate `field_id`'s formula against the already-resolved values of the same entity.
    ///
    /// `Ok(None)` is a genuine null result (e.g. arithmetic over an empty input).
    pub fn compute(
        &self,
        entity_id: &str,
        field_id: &FieldId,
        config: &FormulaConfig,
        resolved: &ResolvedValues,
    ) -> Result<Option<FieldValue>, FormulaError> {
        let key = (entity_id.to_string(), field_id.clone(), inputs_hash(config, resolved));
        if self.capacity > 0 {
            let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(hit) = cache.entries.get(&key) {
                debug!("formula cache hit for {entity_id}/{field_id}");
                return hit.clone();
            }
        }

        let result = evaluate_config(config, resolved);

        if self.capacity > 0 {
            let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            if cache.entries.insert(key.clone(), result.clone()).is_none() {
                cache.order.push_back(key);
            }
            while cache.order.len() > self.capacity {
                if let Some(evicted) = cache.order.pop_front() {
                    cache.entries.remove(&evicted);
                }
            }
        }
        result
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).entries.len()
    }

    pub fn clear_cache(&self) {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.entries.clear();
        cache.order.clear();
    }
}

impl Default for FormulaEngine {
    fn default() -> Self {
        Self::new(crate::config::FormulaSettings::default().cache_capacity)
    }
}

fn inputs_hash(config: &FormulaConfig, resolved: &ResolvedValues) -> u64 {
    let mut hasher = DefaultHasher::new();
    config.formula.hash(&mut hasher);
    config.decimal_places.hash(&mut hasher);
    for (token, field_id) in &config.references {
        token.hash(&mut hasher);
        match resolved.get(field_id) {
            Some(ResolvedValue::Value(value)) => value.to_json().to_string().hash(&mut hasher),
            Some(ResolvedValue::Null) => "null".hash(&mut hasher),
            Some(ResolvedValue::Unavailable(error)) => format!("unavailable:{error}").hash(&mut hasher),
            None => "missing".hash(&mut hasher),
        }
    }
    hasher.finish()
}

fn evaluate_config(config: &FormulaConfig, resolved: &ResolvedValues) -> Result<Option<FieldValue>, FormulaError> {
    let expr = parse(&config.formula)?;
    let lookup = |token: &str| -> Result<Scalar, FormulaError> {
        let field_id = config.references.get(token).ok_or_else(|| FormulaError::UnknownReference {
            reference: token.to_string(),
        })?;
        match resolved.get(field_id) {
            Some(ResolvedValue::Value(value)) => Ok(Scalar::from_field_value(value)),
            Some(ResolvedValue::Null) => Ok(Scalar::Null),
            Some(ResolvedValue::Unavailable(_)) => Err(FormulaError::UpstreamUnavailable {
                field_id: field_id.to_string(),
            }),
            None => Err(FormulaError::MissingDependency {
                field_id: field_id.to_string(),
            }),
        }
    };

    match evaluate(&expr, &lookup)? {
        Scalar::Null => Ok(None),
        Scalar::Number(number) if !number.is_finite() => Err(FormulaError::TypeMismatch {
            message: format!("result {number} is not a finite number"),
        }),
        Scalar::Number(number) => Ok(Some(FieldValue::Number(match config.decimal_places {
            Some(places) => round_to(number, places),
            None => number,
        }))),
        Scalar::Text(text) => Ok(Some(FieldValue::Text(text))),
        Scalar::Bool(flag) => Ok(Some(FieldValue::Bool(flag))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn config(formula: &str, refs: &[(&str, &str)]) -> FormulaConfig {
        FormulaConfig {
            formula: formula.to_string(),
            decimal_places: None,
            references: refs
                .iter()
                .map(|(token, id)| (token.to_string(), FieldId::new(*id)))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn values(entries: &[(&str, ResolvedValue)]) -> ResolvedValues {
        entries.iter().map(|(id, value)| (FieldId::new(*id), value.clone())).collect()
    }

    fn number(n: f64) -> ResolvedValue {
        ResolvedValue::Value(FieldValue::Number(n))
    }

    #[test]
    fn parses_precedence_and_references() {
        let expr = parse("{Hours} * {Rate} + 1").unwrap();
        assert_eq!(expr.references(), vec!["Hours", "Rate"]);
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::Add, .. }));
    }

    #[test]
    fn reports_syntax_errors_with_position() {
        assert!(matches!(parse("1 +"), Err(FormulaError::Parse { position: 3, .. })));
        assert!(matches!(parse("{Hours"), Err(FormulaError::Parse { position: 0, .. })));
        assert!(matches!(parse("1 2"), Err(FormulaError::Parse { .. })));
        assert!(matches!(parse("SUM(1)"), Err(FormulaError::UnknownFunction { .. })));
        assert!(matches!(parse("ABS(1, 2)"), Err(FormulaError::Arity { .. })));
        assert!(matches!(parse("Hours * 2"), Err(FormulaError::Parse { .. })));
    }

    #[test]
    fn computes_total_cost() {
        let engine = FormulaEngine::new(16);
        let cfg = config("{Hours} * {Rate}", &[("Hours", "h"), ("Rate", "r")]);
        let resolved = values(&[("h", number(5.0)), ("r", number(20.0))]);
        let result = engine.compute("task-1", &FieldId::new("cost"), &cfg, &resolved).unwrap();
        assert_eq!(result, Some(FieldValue::Number(100.0)));
    }

    #[test]
    fn non_numeric_input_is_a_formula_error() {
        let engine = FormulaEngine::new(16);
        let cfg = config("{Hours} * {Rate}", &[("Hours", "h"), ("Rate", "r")]);
        let resolved = values(&[("h", ResolvedValue::Value(FieldValue::Text("abc".into()))), ("r", number(20.0))]);
        let err = engine.compute("task-1", &FieldId::new("cost"), &cfg, &resolved).unwrap_err();
        assert!(matches!(err, FormulaError::TypeMismatch { .. }));
    }

    #[test]
    fn missing_and_unavailable_dependencies() {
        let engine = FormulaEngine::new(0);
        let cfg = config("{A} + 1", &[("A", "a")]);
        let err = engine.compute("e", &FieldId::new("f"), &cfg, &ResolvedValues::new()).unwrap_err();
        assert!(matches!(err, FormulaError::MissingDependency { .. }));

        let upstream = ResolvedValue::Unavailable(crate::errors::EvaluationError::Formula(FormulaError::DivisionByZero));
        let err = engine
            .compute("e", &FieldId::new("f"), &cfg, &values(&[("a", upstream)]))
            .unwrap_err();
        assert!(matches!(err, FormulaError::UpstreamUnavailable { .. }));

        let result = engine
            .compute("e", &FieldId::new("f"), &cfg, &values(&[("a", ResolvedValue::Null)]))
            .unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn functions_and_conditionals() {
        let engine = FormulaEngine::new(0);
        let cfg = config(
            r#"IF({Spent} > {Budget}, "over", CONCAT("left: ", ROUND({Budget} - {Spent}, 1)))"#,
            &[("Spent", "s"), ("Budget", "b")],
        );
        let resolved = values(&[("s", number(40.25)), ("b", number(100.0))]);
        let result = engine.compute("p", &FieldId::new("f"), &cfg, &resolved).unwrap();
        assert_eq!(result, Some(FieldValue::Text("left: 59.8".into())));

        let cfg = config("MAX(1, {A}, 3) & \"-\" & COALESCE(null, 7)", &[("A", "a")]);
        let resolved = values(&[("a", number(9.0))]);
        let result = engine.compute("p", &FieldId::new("f"), &cfg, &resolved).unwrap();
        assert_eq!(result, Some(FieldValue::Text("9-7".into())));

        let cfg = config("not (1 > 2) and true", &[]);
        assert_eq!(
            engine.compute("p", &FieldId::new("f"), &cfg, &ResolvedValues::new()).unwrap(),
            Some(FieldValue::Bool(true))
        );
    }

    #[test]
    fn division_by_zero_is_reported() {
        let engine = FormulaEngine::new(0);
        let cfg = config("10 / 0", &[]);
        assert_eq!(
            engine.compute("p", &FieldId::new("f"), &cfg, &ResolvedValues::new()),
            Err(FormulaError::DivisionByZero)
        );
    }

    #[test]
    fn results_round_to_configured_places() {
        let engine = FormulaEngine::new(0);
        let mut cfg = config("10 / 3", &[]);
        cfg.decimal_places = Some(2);
        assert_eq!(
            engine.compute("p", &FieldId::new("f"), &cfg, &ResolvedValues::new()).unwrap(),
            Some(FieldValue::Number(3.33))
        );
    }

    #[test]
    fn cache_is_keyed_by_inputs_and_bounded() {
        let engine = FormulaEngine::new(2);
        let cfg = config("{A} * 2", &[("A", "a")]);
        for n in 0..3 {
            let resolved = values(&[("a", number(n as f64))]);
            let result = engine.compute("e", &FieldId::new("f"), &cfg, &resolved).unwrap();
            assert_eq!(result, Some(FieldValue::Number(n as f64 * 2.0)));
        }
        assert_eq!(engine.cached_entries(), 2);

        let resolved = values(&[("a", number(2.0))]);
        assert_eq!(
            engine.compute("e", &FieldId::new("f"), &cfg, &resolved).unwrap(),
            Some(FieldValue::Number(4.0))
        );
        engine.clear_cache();
        assert_eq!(engine.cached_entries(), 0);
    }
}
