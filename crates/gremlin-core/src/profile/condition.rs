// Gremlin Condition Expressions
// Boolean expressions over input states, the node's own activation, mode and variables
//
// Grammar:
//   expr      := or
//   or        := and ("or" and)*
//   and       := not ("and" not)*
//   not       := "not" not | primary
//   primary   := "(" or ")" | "true" | "false" | predicate
//   predicate := operand [("==" | "!=" | ">" | ">=" | "<" | "<=") value]
//   operand   := "active" | "mode" | "var.<name>" | "<device>.<kind>:<index>"

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::device::{EventValue, InputAddr};

/// Errors produced while parsing a condition expression
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConditionError {
    #[error("Syntax error in condition '{expression}': {reason}")]
    Syntax { expression: String, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
enum ConditionToken {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Cmp(CompareOp),
    Word(String),
    StringLit(String),
    Bool(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

/// Left-hand side of a predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// The evaluating node's own activation state
    Active,
    /// Name of the current mode
    Mode,
    /// A registered script variable
    Variable(String),
    /// Latest value of a device input
    Input(InputAddr),
}

/// Runtime value a predicate compares
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Number(f64),
    Text(String),
    Bool(bool),
}

impl Scalar {
    fn truthy(&self) -> bool {
        match self {
            Scalar::Bool(b) => *b,
            Scalar::Number(n) => *n != 0.0,
            Scalar::Text(t) => !t.is_empty() && t != "center",
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Scalar::Number(n) => Some(*n),
            Scalar::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Scalar::Text(_) => None,
        }
    }
}

impl From<EventValue> for Scalar {
    fn from(value: EventValue) -> Self {
        match value {
            EventValue::Axis(v) => Scalar::Number(v),
            EventValue::Button(b) => Scalar::Bool(b),
            EventValue::Hat(d) => Scalar::Text(d.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ConditionExpr {
    Const(bool),
    And(Box<ConditionExpr>, Box<ConditionExpr>),
    Or(Box<ConditionExpr>, Box<ConditionExpr>),
    Not(Box<ConditionExpr>),
    Predicate {
        operand: Operand,
        cmp: Option<(CompareOp, Scalar)>,
    },
}

/// State a condition is evaluated against
pub trait ConditionScope {
    fn input(&self, addr: &InputAddr) -> EventValue;
    fn is_active(&self) -> bool;
    fn mode(&self) -> &str;
    fn variable(&self, name: &str) -> Option<Scalar>;
}

/// A parsed condition that keeps its source text for persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Expression {
    source: String,
    root: ConditionExpr,
}

impl PartialEq for Expression {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
    }
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ConditionError> {
        let syntax = |reason: &str| ConditionError::Syntax {
            expression: source.to_string(),
            reason: reason.to_string(),
        };
        let tokens = tokenize_condition(source).map_err(|r| syntax(&r))?;
        if tokens.is_empty() {
            return Err(syntax("empty expression"));
        }
        let root = ConditionParser::new(tokens).parse().map_err(|r| syntax(&r))?;
        Ok(Self {
            source: source.trim().to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, scope: &dyn ConditionScope) -> bool {
        eval_expr(&self.root, scope)
    }

    /// Inputs the expression monitors
    pub fn inputs(&self) -> Vec<&InputAddr> {
        let mut out = Vec::new();
        collect_operands(&self.root, &mut |op| {
            if let Operand::Input(addr) = op {
                out.push(addr);
            }
        });
        out
    }

    /// Variables the expression reads
    pub fn variables(&self) -> Vec<&str> {
        let mut out = Vec::new();
        collect_operands(&self.root, &mut |op| {
            if let Operand::Variable(name) = op {
                out.push(name.as_str());
            }
        });
        out
    }
}

impl FromStr for Expression {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Expression {
    type Error = ConditionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Expression> for String {
    fn from(value: Expression) -> Self {
        value.source
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn collect_operands<'a>(expr: &'a ConditionExpr, f: &mut dyn FnMut(&'a Operand)) {
    match expr {
        ConditionExpr::Const(_) => {}
        ConditionExpr::And(l, r) | ConditionExpr::Or(l, r) => {
            collect_operands(l, f);
            collect_operands(r, f);
        }
        ConditionExpr::Not(inner) => collect_operands(inner, f),
        ConditionExpr::Predicate { operand, .. } => f(operand),
    }
}

fn eval_expr(expr: &ConditionExpr, scope: &dyn ConditionScope) -> bool {
    match expr {
        ConditionExpr::Const(b) => *b,
        ConditionExpr::And(left, right) => eval_expr(left, scope) && eval_expr(right, scope),
        ConditionExpr::Or(left, right) => eval_expr(left, scope) || eval_expr(right, scope),
        ConditionExpr::Not(inner) => !eval_expr(inner, scope),
        ConditionExpr::Predicate { operand, cmp } => {
            let value = match operand {
                Operand::Active => Scalar::Bool(scope.is_active()),
                Operand::Mode => Scalar::Text(scope.mode().to_string()),
                Operand::Input(addr) => Scalar::from(scope.input(addr)),
                Operand::Variable(name) => match scope.variable(name) {
                    Some(v) => v,
                    None => {
                        log::debug!("Condition references unset variable '{}'", name);
                        return false;
                    }
                },
            };
            match cmp {
                None => value.truthy(),
                Some((op, literal)) => compare(&value, *op, literal),
            }
        }
    }
}

fn compare(value: &Scalar, op: CompareOp, literal: &Scalar) -> bool {
    if let (Scalar::Text(a), Scalar::Text(b)) = (value, literal) {
        return match op {
            CompareOp::Eq => a == b,
            CompareOp::Ne => a != b,
            _ => false,
        };
    }
    let (a, b) = match (value.as_number(), literal.as_number()) {
        (Some(a), Some(b)) => (a, b),
        _ => return op == CompareOp::Ne,
    };
    match op {
        CompareOp::Eq => (a - b).abs() < 1e-9,
        CompareOp::Ne => (a - b).abs() >= 1e-9,
        CompareOp::Gt => a > b,
        CompareOp::Ge => a >= b,
        CompareOp::Lt => a < b,
        CompareOp::Le => a <= b,
    }
}

struct ConditionParser {
    tokens: Vec<ConditionToken>,
    pos: usize,
}

impl ConditionParser {
    fn new(tokens: Vec<ConditionToken>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn parse(mut self) -> Result<ConditionExpr, String> {
        let expr = self.parse_or()?;
        if let Some(token) = self.peek() {
            return Err(format!("unexpected trailing token {:?}", token));
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<ConditionExpr, String> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(ConditionToken::Or)) {
            self.next();
            let right = self.parse_and()?;
            left = ConditionExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<ConditionExpr, String> {
        let mut left = self.parse_not()?;
        while matches!(self.peek(), Some(ConditionToken::And)) {
            self.next();
            let right = self.parse_not()?;
            left = ConditionExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<ConditionExpr, String> {
        if matches!(self.peek(), Some(ConditionToken::Not)) {
            self.next();
            let inner = self.parse_not()?;
            return Ok(ConditionExpr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<ConditionExpr, String> {
        match self.next() {
            Some(ConditionToken::LParen) => {
                let expr = self.parse_or()?;
                if !matches!(self.next(), Some(ConditionToken::RParen)) {
                    return Err("missing ')'".to_string());
                }
                Ok(expr)
            }
            Some(ConditionToken::Bool(b)) => Ok(ConditionExpr::Const(b)),
            Some(ConditionToken::Word(word)) => self.parse_predicate(word),
            Some(token) => Err(format!("unexpected token {:?}", token)),
            None => Err("unexpected end of expression".to_string()),
        }
    }

    fn parse_predicate(&mut self, word: String) -> Result<ConditionExpr, String> {
        let operand = parse_operand(&word)?;
        let cmp = match self.peek() {
            Some(ConditionToken::Cmp(op)) => {
                let op = *op;
                self.next();
                Some((op, self.parse_value()?))
            }
            _ => None,
        };
        Ok(ConditionExpr::Predicate { operand, cmp })
    }

    fn parse_value(&mut self) -> Result<Scalar, String> {
        match self.next() {
            Some(ConditionToken::StringLit(s)) => Ok(Scalar::Text(s)),
            Some(ConditionToken::Bool(b)) => Ok(Scalar::Bool(b)),
            Some(ConditionToken::Word(w)) => Ok(match w.parse::<f64>() {
                Ok(n) => Scalar::Number(n),
                Err(_) => Scalar::Text(w),
            }),
            Some(token) => Err(format!("expected a value, found {:?}", token)),
            None => Err("expected a value".to_string()),
        }
    }

    fn peek(&self) -> Option<&ConditionToken> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<ConditionToken> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }
}

fn parse_operand(word: &str) -> Result<Operand, String> {
    match word.to_lowercase().as_str() {
        "active" => return Ok(Operand::Active),
        "mode" => return Ok(Operand::Mode),
        _ => {}
    }
    if let Some(name) = word.strip_prefix("var.") {
        if name.is_empty() {
            return Err("empty variable name".to_string());
        }
        return Ok(Operand::Variable(name.to_string()));
    }
    word.parse::<InputAddr>()
        .map(Operand::Input)
        .map_err(|_| format!("unknown operand '{}'", word))
}

fn tokenize_condition(condition: &str) -> Result<Vec<ConditionToken>, String> {
    let chars: Vec<char> = condition.chars().collect();
    let mut i = 0usize;
    let mut out = Vec::new();

    while i < chars.len() {
        let ch = chars[i];
        if ch.is_whitespace() {
            i += 1;
            continue;
        }

        let next_is_eq = chars.get(i + 1) == Some(&'=');
        match ch {
            '(' => {
                out.push(ConditionToken::LParen);
                i += 1;
            }
            ')' => {
                out.push(ConditionToken::RParen);
                i += 1;
            }
            '=' | '!' => {
                if !next_is_eq {
                    return Err(format!("stray '{}'", ch));
                }
                out.push(ConditionToken::Cmp(if ch == '=' { CompareOp::Eq } else { CompareOp::Ne }));
                i += 2;
            }
            '>' | '<' => {
                let op = match (ch, next_is_eq) {
                    ('>', true) => CompareOp::Ge,
                    ('>', false) => CompareOp::Gt,
                    ('<', true) => CompareOp::Le,
                    _ => CompareOp::Lt,
                };
                out.push(ConditionToken::Cmp(op));
                i += if next_is_eq { 2 } else { 1 };
            }
            '\'' | '"' => {
                let quote = ch;
                i += 1;
                let start = i;
                while i < chars.len() && chars[i] != quote {
                    i += 1;
                }
                if i >= chars.len() {
                    return Err("unterminated string".to_string());
                }
                out.push(ConditionToken::StringLit(chars[start..i].iter().collect()));
                i += 1;
            }
            _ => {
                let start = i;
                while i < chars.len() {
                    let c = chars[i];
                    if c.is_whitespace() || matches!(c, '(' | ')' | '=' | '!' | '<' | '>' | '\'' | '"') {
                        break;
                    }
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.to_lowercase().as_str() {
                    "and" => out.push(ConditionToken::And),
                    "or" => out.push(ConditionToken::Or),
                    "not" => out.push(ConditionToken::Not),
                    "true" => out.push(ConditionToken::Bool(true)),
                    "false" => out.push(ConditionToken::Bool(false)),
                    _ => out.push(ConditionToken::Word(word)),
                }
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{HatDirection, InputRef};
    use std::collections::HashMap;

    #[derive(Default)]
    struct Scope {
        inputs: HashMap<InputAddr, EventValue>,
        active: bool,
        mode: String,
        vars: HashMap<String, Scalar>,
    }

    impl ConditionScope for Scope {
        fn input(&self, addr: &InputAddr) -> EventValue {
            self.inputs
                .get(addr)
                .copied()
                .unwrap_or(EventValue::rest(addr.input.kind))
        }
        fn is_active(&self) -> bool {
            self.active
        }
        fn mode(&self) -> &str {
            &self.mode
        }
        fn variable(&self, name: &str) -> Option<Scalar> {
            self.vars.get(name).cloned()
        }
    }

    fn eval(expr: &str, scope: &Scope) -> bool {
        Expression::parse(expr).unwrap().evaluate(scope)
    }

    #[test]
    fn test_button_and_active() {
        let mut scope = Scope::default();
        scope.inputs.insert(
            InputAddr::new("stick", InputRef::button(2)),
            EventValue::Button(true),
        );
        assert!(eval("stick.button:2", &scope));
        assert!(!eval("stick.button:3", &scope));
        assert!(!eval("active", &scope));
        scope.active = true;
        assert!(eval("active and stick.button:2", &scope));
        assert!(eval("not stick.button:3 and (active or false)", &scope));
    }

    #[test]
    fn test_axis_comparisons() {
        let mut scope = Scope::default();
        scope.inputs.insert(InputAddr::new("stick", InputRef::axis(1)), EventValue::Axis(0.6));
        assert!(eval("stick.axis:1 > 0.5", &scope));
        assert!(eval("stick.axis:1 >= 0.6", &scope));
        assert!(!eval("stick.axis:1 < -0.5", &scope));
        assert!(eval("stick.axis:1 <= 1", &scope));
        assert!(eval("stick.axis:1 != 0", &scope));
    }

    #[test]
    fn test_hat_mode_and_variables() {
        let mut scope = Scope::default();
        scope.inputs.insert(
            InputAddr::new("stick", InputRef::hat(1)),
            EventValue::Hat(HatDirection::NorthEast),
        );
        scope.mode = "Landing".to_string();
        scope.vars.insert("gear_down".to_string(), Scalar::Bool(true));
        scope.vars.insert("sensitivity".to_string(), Scalar::Number(3.0));

        assert!(eval("stick.hat:1 == north-east", &scope));
        assert!(eval("stick.hat:1", &scope));
        assert!(eval("mode == 'Landing'", &scope));
        assert!(!eval("mode == \"Default\"", &scope));
        assert!(eval("var.gear_down", &scope));
        assert!(eval("var.sensitivity > 2", &scope));
        assert!(!eval("var.missing", &scope));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(Expression::parse("").is_err());
        assert!(Expression::parse("active and").is_err());
        assert!(Expression::parse("(active").is_err());
        assert!(Expression::parse("active = true").is_err());
        assert!(Expression::parse("bogus").is_err());
        assert!(Expression::parse("mode == 'open").is_err());
        assert!(Expression::parse("active active").is_err());
    }

    #[test]
    fn test_inputs_and_variables_listed() {
        let expr = Expression::parse("stick.button:1 or (pedals.axis:2 > 0 and var.x)").unwrap();
        let inputs: Vec<String> = expr.inputs().iter().map(|a| a.to_string()).collect();
        assert_eq!(inputs, vec!["stick.button:1", "pedals.axis:2"]);
        assert_eq!(expr.variables(), vec!["x"]);
    }

    #[test]
    fn test_source_survives_round_trip() {
        let expr = Expression::parse("  active or stick.button:1 ").unwrap();
        let text: String = expr.clone().into();
        assert_eq!(text, "active or stick.button:1");
        assert_eq!(Expression::try_from(text).unwrap(), expr);
    }
}
