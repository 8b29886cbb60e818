use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("division by zero")]
    DivisionByZero,

    #[error("arithmetic overflow in {0}")]
    Overflow(String),

    #[error("malformed operand {0:?}")]
    MalformedOperand(String),

    #[error("not a single binary operation: {0:?}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
}

impl Operator {
    fn from_char(c: char) -> Option<Self> {
        match c {
            '+' => Some(Self::Add),
            '-' => Some(Self::Sub),
            '*' => Some(Self::Mul),
            '/' => Some(Self::Div),
            _ => None,
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            Self::Add => '+',
            Self::Sub => '-',
            Self::Mul => '*',
            Self::Div => '/',
        }
    }
}

/// Result of a successful evaluation
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    /// Non-integral quotient, rounded to two decimal places
    Decimal(f64),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "{}", n),
            Value::Decimal(x) => write!(f, "{}", x),
        }
    }
}

/// A single binary operation over two unsigned integers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expression {
    pub lhs: u64,
    pub op: Operator,
    pub rhs: u64,
}

impl FromStr for Expression {
    type Err = EvalError;

    /// Accepts exactly `<digits><op><digits>` and nothing else
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (index, op) = s
            .char_indices()
            .find_map(|(i, c)| Operator::from_char(c).map(|op| (i, op)))
            .ok_or_else(|| EvalError::Malformed(s.to_string()))?;

        let lhs = parse_operand(&s[..index], s)?;
        let rhs = parse_operand(&s[index + 1..], s)?;

        Ok(Self { lhs, op, rhs })
    }
}

fn parse_operand(digits: &str, whole: &str) -> Result<u64, EvalError> {
    if digits.is_empty() {
        return Err(EvalError::Malformed(whole.to_string()));
    }
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        // a second operator or a stray character
        return Err(EvalError::Malformed(whole.to_string()));
    }
    digits
        .parse::<u64>()
        .map_err(|_| EvalError::MalformedOperand(digits.to_string()))
}

impl Expression {
    pub fn evaluate(&self) -> Result<Value, EvalError> {
        let overflow = || EvalError::Overflow(self.to_string());
        let lhs = i64::try_from(self.lhs).map_err(|_| overflow())?;
        let rhs = i64::try_from(self.rhs).map_err(|_| overflow())?;

        let value = match self.op {
            Operator::Add => Value::Integer(lhs.checked_add(rhs).ok_or_else(overflow)?),
            Operator::Sub => Value::Integer(lhs.checked_sub(rhs).ok_or_else(overflow)?),
            Operator::Mul => Value::Integer(lhs.checked_mul(rhs).ok_or_else(overflow)?),
            Operator::Div => {
                if rhs == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                if lhs % rhs == 0 {
                    Value::Integer(lhs / rhs)
                } else {
                    Value::Decimal(round2(lhs as f64 / rhs as f64))
                }
            }
        };

        Ok(value)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.lhs, self.op.as_char(), self.rhs)
    }
}

/// Parse and evaluate a single binary operation
pub fn evaluate(text: &str) -> Result<Value, EvalError> {
    text.parse::<Expression>()?.evaluate()
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
