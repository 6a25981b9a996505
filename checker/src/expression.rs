//! Restricted threshold expressions.
//!
//! User expressions are a narrow, side-effect free subset: the conditional
//! `A if C else B` form, boolean operators, comparisons, arithmetic, and a
//! whitelist of names. Anything resembling a call or a lambda is rejected
//! at parse time, so nothing user-supplied ever executes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;
use lib::types::State;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ExpressionError {
    #[error("'{0}' is not an expression")]
    NotAnExpression(String),
    #[error("call method is forbidden")]
    CallForbidden,
    #[error("lambda is strongly forbidden")]
    LambdaForbidden,
    #[error("unknown name '{0}'")]
    UnknownName(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("expression must resolve to a state")]
    NotAState,
    #[error("missing value for '{0}'")]
    MissingValue(&'static str),
    #[error("unsupported operand types for '{0}'")]
    BadOperands(&'static str),
}

/// Values flowing through an expression: plain numbers and alert states.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ExprValue {
    Number(f64),
    State(State),
}

impl ExprValue {
    fn truthy(self) -> bool {
        match self {
            | ExprValue::Number(v) => v != 0.0,
            | ExprValue::State(_) => true,
        }
    }
}

/// Inputs injected into an evaluation.
#[derive(Debug, Default)]
pub struct Env {
    /// t1..tN values by name.
    pub targets: HashMap<String, f64>,
    pub warn_value: Option<f64>,
    pub error_value: Option<f64>,
    pub prev_state: State,
}

impl Env {
    fn lookup(&self, name: &str) -> Result<ExprValue, ExpressionError> {
        if let Some(state) = State::from_name(name) {
            return Ok(ExprValue::State(state));
        }
        if let Some(value) = self.targets.get(name) {
            return Ok(ExprValue::Number(*value));
        }
        match name {
            | "warn_value" => self
                .warn_value
                .map(ExprValue::Number)
                .ok_or(ExpressionError::MissingValue("warn_value")),
            | "error_value" => self
                .error_value
                .map(ExprValue::Number)
                .ok_or(ExpressionError::MissingValue("error_value")),
            | "PREV_STATE" => Ok(ExprValue::State(self.prev_state)),
            | _ => Err(ExpressionError::UnknownName(name.to_string())),
        }
    }
}

/// Evaluates the trigger's threshold logic: the user expression when
/// present, otherwise the default warn/error comparator. The comparator
/// direction is `>=` when `warn_value <= error_value` (including equal
/// thresholds), `<=` otherwise.
pub fn get_expression(
    trigger_expression: Option<&str>,
    env: &Env,
) -> Result<State, ExpressionError> {
    match trigger_expression {
        | None | Some("") => default_expression(env),
        | Some(source) => {
            let ast = compile_expression(source)?;
            match eval(&ast, env)? {
                | ExprValue::State(state) => Ok(state),
                | ExprValue::Number(_) => Err(ExpressionError::NotAState),
            }
        }
    }
}

fn default_expression(env: &Env) -> Result<State, ExpressionError> {
    let t1 = env
        .targets
        .get("t1")
        .copied()
        .ok_or(ExpressionError::MissingValue("t1"))?;
    let warn = env
        .warn_value
        .ok_or(ExpressionError::MissingValue("warn_value"))?;
    let error = env
        .error_value
        .ok_or(ExpressionError::MissingValue("error_value"))?;
    let ascending = warn <= error;
    let crossed =
        |threshold: f64| if ascending { t1 >= threshold } else { t1 <= threshold };
    if crossed(error) {
        Ok(State::Error)
    } else if crossed(warn) {
        Ok(State::Warn)
    } else {
        Ok(State::Ok)
    }
}

lazy_static! {
    static ref COMPILE_CACHE: Mutex<HashMap<String, Arc<Node>>> =
        Mutex::new(HashMap::new());
}

/// Parses (or retrieves the cached parse of) one expression source.
pub fn compile_expression(
    source: &str,
) -> Result<Arc<Node>, ExpressionError> {
    if let Some(cached) = COMPILE_CACHE.lock().unwrap().get(source) {
        return Ok(cached.clone());
    }
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let node = parser.ternary()?;
    if parser.pos != parser.tokens.len() {
        return Err(ExpressionError::NotAnExpression(source.to_string()));
    }
    let node = Arc::new(node);
    COMPILE_CACHE
        .lock()
        .unwrap()
        .insert(source.to_string(), node.clone());
    Ok(node)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, PartialEq)]
pub enum Node {
    Number(f64),
    Name(String),
    Neg(Box<Node>),
    Not(Box<Node>),
    Arith(ArithOp, Box<Node>, Box<Node>),
    Compare(CmpOp, Box<Node>, Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    /// `body if cond else orelse`
    Ternary {
        body: Box<Node>,
        cond: Box<Node>,
        orelse: Box<Node>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Name(String),
    If,
    Else,
    And,
    Or,
    Not,
    Cmp(CmpOp),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
}

fn tokenize(source: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            | c if c.is_whitespace() => i += 1,
            | c if c.is_ascii_digit() || c == '.' => {
                let mut number = String::new();
                while i < chars.len()
                    && (chars[i].is_ascii_digit() || chars[i] == '.')
                {
                    number.push(chars[i]);
                    i += 1;
                }
                let value = number.parse().map_err(|_| {
                    ExpressionError::NotAnExpression(source.to_string())
                })?;
                tokens.push(Token::Number(value));
            }
            | c if c.is_ascii_alphabetic() || c == '_' => {
                let mut name = String::new();
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_')
                {
                    name.push(chars[i]);
                    i += 1;
                }
                tokens.push(match name.as_str() {
                    | "if" => Token::If,
                    | "else" => Token::Else,
                    | "and" => Token::And,
                    | "or" => Token::Or,
                    | "not" => Token::Not,
                    | "lambda" => {
                        return Err(ExpressionError::LambdaForbidden)
                    }
                    | _ => Token::Name(name),
                });
            }
            | '<' | '>' | '=' | '!' => {
                let two = if i + 1 < chars.len() && chars[i + 1] == '=' {
                    i += 2;
                    true
                } else {
                    i += 1;
                    false
                };
                tokens.push(Token::Cmp(match (c, two) {
                    | ('<', false) => CmpOp::Lt,
                    | ('<', true) => CmpOp::Le,
                    | ('>', false) => CmpOp::Gt,
                    | ('>', true) => CmpOp::Ge,
                    | ('=', true) => CmpOp::Eq,
                    | ('!', true) => CmpOp::Ne,
                    | _ => {
                        return Err(ExpressionError::NotAnExpression(
                            source.to_string(),
                        ))
                    }
                }));
            }
            | '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            | '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            | '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            | '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            | '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            | '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            | ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            | _ => {
                return Err(ExpressionError::NotAnExpression(
                    source.to_string(),
                ))
            }
        }
    }
    if tokens.is_empty() {
        return Err(ExpressionError::NotAnExpression(source.to_string()));
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, token: Token) -> Result<(), ExpressionError> {
        if self.advance() == Some(token) {
            Ok(())
        } else {
            Err(ExpressionError::NotAnExpression(format!(
                "syntax error near token {}",
                self.pos
            )))
        }
    }

    fn ternary(&mut self) -> Result<Node, ExpressionError> {
        let body = self.or_expr()?;
        if self.peek() == Some(&Token::If) {
            self.advance();
            let cond = self.or_expr()?;
            self.expect(Token::Else)?;
            let orelse = self.ternary()?;
            return Ok(Node::Ternary {
                body: Box::new(body),
                cond: Box::new(cond),
                orelse: Box::new(orelse),
            });
        }
        Ok(body)
    }

    fn or_expr(&mut self) -> Result<Node, ExpressionError> {
        let mut node = self.and_expr()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let rhs = self.and_expr()?;
            node = Node::Or(Box::new(node), Box::new(rhs));
        }
        Ok(node)
    }

    fn and_expr(&mut self) -> Result<Node, ExpressionError> {
        let mut node = self.not_expr()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let rhs = self.not_expr()?;
            node = Node::And(Box::new(node), Box::new(rhs));
        }
        Ok(node)
    }

    fn not_expr(&mut self) -> Result<Node, ExpressionError> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            return Ok(Node::Not(Box::new(self.not_expr()?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Node, ExpressionError> {
        let lhs = self.arith()?;
        if let Some(Token::Cmp(op)) = self.peek().cloned() {
            self.advance();
            let rhs = self.arith()?;
            return Ok(Node::Compare(op, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn arith(&mut self) -> Result<Node, ExpressionError> {
        let mut node = self.term()?;
        loop {
            let op = match self.peek() {
                | Some(Token::Plus) => ArithOp::Add,
                | Some(Token::Minus) => ArithOp::Sub,
                | _ => break,
            };
            self.advance();
            let rhs = self.term()?;
            node = Node::Arith(op, Box::new(node), Box::new(rhs));
        }
        Ok(node)
    }

    fn term(&mut self) -> Result<Node, ExpressionError> {
        let mut node = self.factor()?;
        loop {
            let op = match self.peek() {
                | Some(Token::Star) => ArithOp::Mul,
                | Some(Token::Slash) => ArithOp::Div,
                | Some(Token::Percent) => ArithOp::Mod,
                | _ => break,
            };
            self.advance();
            let rhs = self.factor()?;
            node = Node::Arith(op, Box::new(node), Box::new(rhs));
        }
        Ok(node)
    }

    fn factor(&mut self) -> Result<Node, ExpressionError> {
        match self.advance() {
            | Some(Token::Minus) => {
                Ok(Node::Neg(Box::new(self.factor()?)))
            }
            | Some(Token::Plus) => self.factor(),
            | Some(Token::Number(value)) => Ok(Node::Number(value)),
            | Some(Token::Name(name)) => {
                // A parenthesis after a name is a call site.
                if self.peek() == Some(&Token::LParen) {
                    return Err(ExpressionError::CallForbidden);
                }
                Ok(Node::Name(name))
            }
            | Some(Token::LParen) => {
                let node = self.ternary()?;
                self.expect(Token::RParen)?;
                Ok(node)
            }
            | _ => Err(ExpressionError::NotAnExpression(
                "unexpected end of expression".to_string(),
            )),
        }
    }
}

fn eval(node: &Node, env: &Env) -> Result<ExprValue, ExpressionError> {
    match node {
        | Node::Number(value) => Ok(ExprValue::Number(*value)),
        | Node::Name(name) => env.lookup(name),
        | Node::Neg(inner) => match eval(inner, env)? {
            | ExprValue::Number(v) => Ok(ExprValue::Number(-v)),
            | ExprValue::State(_) => {
                Err(ExpressionError::BadOperands("unary -"))
            }
        },
        | Node::Not(inner) => {
            let value = eval(inner, env)?;
            Ok(ExprValue::Number(if value.truthy() { 0.0 } else { 1.0 }))
        }
        | Node::Arith(op, lhs, rhs) => {
            let (a, b) = (eval(lhs, env)?, eval(rhs, env)?);
            let (ExprValue::Number(a), ExprValue::Number(b)) = (a, b) else {
                return Err(ExpressionError::BadOperands("arithmetic"));
            };
            let result = match op {
                | ArithOp::Add => a + b,
                | ArithOp::Sub => a - b,
                | ArithOp::Mul => a * b,
                | ArithOp::Div => {
                    if b == 0.0 {
                        return Err(ExpressionError::DivisionByZero);
                    }
                    a / b
                }
                | ArithOp::Mod => {
                    if b == 0.0 {
                        return Err(ExpressionError::DivisionByZero);
                    }
                    a.rem_euclid(b)
                }
            };
            Ok(ExprValue::Number(result))
        }
        | Node::Compare(op, lhs, rhs) => {
            let (a, b) = (eval(lhs, env)?, eval(rhs, env)?);
            let outcome = match (a, b) {
                | (ExprValue::Number(a), ExprValue::Number(b)) => match op {
                    | CmpOp::Lt => a < b,
                    | CmpOp::Le => a <= b,
                    | CmpOp::Gt => a > b,
                    | CmpOp::Ge => a >= b,
                    | CmpOp::Eq => a == b,
                    | CmpOp::Ne => a != b,
                },
                | (ExprValue::State(a), ExprValue::State(b)) => match op {
                    | CmpOp::Eq => a == b,
                    | CmpOp::Ne => a != b,
                    | _ => {
                        return Err(ExpressionError::BadOperands(
                            "state ordering",
                        ))
                    }
                },
                | _ => match op {
                    | CmpOp::Eq => false,
                    | CmpOp::Ne => true,
                    | _ => {
                        return Err(ExpressionError::BadOperands(
                            "mixed comparison",
                        ))
                    }
                },
            };
            Ok(ExprValue::Number(if outcome { 1.0 } else { 0.0 }))
        }
        | Node::And(lhs, rhs) => {
            let left = eval(lhs, env)?;
            if !left.truthy() {
                return Ok(left);
            }
            eval(rhs, env)
        }
        | Node::Or(lhs, rhs) => {
            let left = eval(lhs, env)?;
            if left.truthy() {
                return Ok(left);
            }
            eval(rhs, env)
        }
        | Node::Ternary { body, cond, orelse } => {
            if eval(cond, env)?.truthy() {
                eval(body, env)
            } else {
                eval(orelse, env)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(
        targets: &[(&str, f64)],
        warn: Option<f64>,
        error: Option<f64>,
    ) -> Env {
        Env {
            targets: targets
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            warn_value: warn,
            error_value: error,
            prev_state: State::Nodata,
        }
    }

    #[test]
    fn default_ascending_thresholds() {
        let states: Vec<State> = [10.0, 60.0, 90.0]
            .iter()
            .map(|t1| {
                get_expression(
                    None,
                    &env(&[("t1", *t1)], Some(60.0), Some(90.0)),
                )
                .unwrap()
            })
            .collect();
        assert_eq!(states, vec![State::Ok, State::Warn, State::Error]);
    }

    #[test]
    fn default_descending_thresholds() {
        let states: Vec<State> = [40.0, 20.0, 10.0]
            .iter()
            .map(|t1| {
                get_expression(
                    None,
                    &env(&[("t1", *t1)], Some(30.0), Some(10.0)),
                )
                .unwrap()
            })
            .collect();
        assert_eq!(states, vec![State::Ok, State::Warn, State::Error]);
    }

    #[test]
    fn custom_expression() {
        let result = get_expression(
            Some("ERROR if t1 > 10 and t2 > 3 else OK"),
            &env(&[("t1", 11.0), ("t2", 4.0)], None, None),
        );
        assert_eq!(result.unwrap(), State::Error);
    }

    #[test]
    fn prev_state_is_reachable() {
        let mut environment =
            env(&[("t1", 9.0), ("t2", 1.0)], None, None);
        environment.prev_state = State::Error;
        let result = get_expression(
            Some("ERROR if t1 > 10 else PREV_STATE if t2 > 0 else OK"),
            &environment,
        );
        assert_eq!(result.unwrap(), State::Error);
    }

    #[test]
    fn calls_are_forbidden() {
        let result = get_expression(
            Some("ERROR if f(t1,t2) else OK"),
            &env(&[("t1", 11.0), ("t2", 4.0)], None, None),
        );
        assert_eq!(result.unwrap_err(), ExpressionError::CallForbidden);
    }

    #[test]
    fn lambdas_are_forbidden() {
        let result = get_expression(
            Some("(lambda f: ())"),
            &env(&[("t1", 11.0)], None, None),
        );
        assert_eq!(result.unwrap_err(), ExpressionError::LambdaForbidden);
    }

    #[test]
    fn division_by_zero_surfaces() {
        let result = get_expression(
            Some("ERROR if t1/t2 else OK"),
            &env(&[("t1", 0.0), ("t2", 0.0)], None, None),
        );
        assert_eq!(result.unwrap_err(), ExpressionError::DivisionByZero);
    }

    #[test]
    fn numeric_results_are_rejected() {
        let result = get_expression(
            Some("t1 + 1"),
            &env(&[("t1", 1.0)], None, None),
        );
        assert_eq!(result.unwrap_err(), ExpressionError::NotAState);
    }

    #[test]
    fn warning_aliases_warn() {
        let result = get_expression(
            Some("WARNING if t1 > 0 else OK"),
            &env(&[("t1", 1.0)], None, None),
        );
        assert_eq!(result.unwrap(), State::Warn);
    }

    #[test]
    fn equal_thresholds_compare_ascending() {
        let result = get_expression(
            None,
            &env(&[("t1", 50.0)], Some(50.0), Some(50.0)),
        );
        assert_eq!(result.unwrap(), State::Error);
    }
}
