//! Formula definitions attached to rules and ERP transformations.
//!
//! Formulas are data, not code: a small expression tree evaluated against a
//! field resolver with checked decimal arithmetic.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    Literal {
        value: Decimal,
    },
    FieldRef {
        field: String,
    },
    BinaryOp {
        op: BinaryOperator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    FunctionCall {
        function: Function,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Function {
    Min,
    Max,
    Abs,
    Round,
    Floor,
    Ceil,
    /// First argument whose fields all resolve.
    Coalesce,
}

impl Expr {
    pub fn literal(value: Decimal) -> Self {
        Expr::Literal { value }
    }

    pub fn field(name: impl Into<String>) -> Self {
        Expr::FieldRef { field: name.into() }
    }

    pub fn binary(op: BinaryOperator, left: Expr, right: Expr) -> Self {
        Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn call(function: Function, args: Vec<Expr>) -> Self {
        Expr::FunctionCall { function, args }
    }

    /// Field names referenced anywhere in the tree.
    pub fn referenced_fields(&self) -> Vec<&str> {
        let mut fields = Vec::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields<'a>(&'a self, fields: &mut Vec<&'a str>) {
        match self {
            Expr::Literal { .. } => {}
            Expr::FieldRef { field } => fields.push(field.as_str()),
            Expr::BinaryOp { left, right, .. } => {
                left.collect_fields(fields);
                right.collect_fields(fields);
            }
            Expr::FunctionCall { args, .. } => {
                for arg in args {
                    arg.collect_fields(fields);
                }
            }
        }
    }
}

/// Source of numeric field values during evaluation.
pub trait FieldResolver {
    fn resolve(&self, field: &str) -> Option<Decimal>;
}

impl<F> FieldResolver for F
where
    F: Fn(&str) -> Option<Decimal>,
{
    fn resolve(&self, field: &str) -> Option<Decimal> {
        self(field)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormulaError {
    #[error("field '{0}' is missing or not numeric")]
    UnknownField(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),
    #[error("{function:?} expects {expected} argument(s), got {actual}")]
    Arity {
        function: Function,
        expected: &'static str,
        actual: usize,
    },
    #[error("round precision must be a whole number between 0 and 28")]
    InvalidPrecision,
}

pub fn evaluate(expr: &Expr, resolver: &dyn FieldResolver) -> Result<Decimal, FormulaError> {
    match expr {
        Expr::Literal { value } => Ok(*value),
        Expr::FieldRef { field } => resolver
            .resolve(field)
            .ok_or_else(|| FormulaError::UnknownField(field.clone())),
        Expr::BinaryOp { op, left, right } => {
            let left = evaluate(left, resolver)?;
            let right = evaluate(right, resolver)?;
            match op {
                BinaryOperator::Add => left
                    .checked_add(right)
                    .ok_or(FormulaError::Overflow("addition")),
                BinaryOperator::Subtract => left
                    .checked_sub(right)
                    .ok_or(FormulaError::Overflow("subtraction")),
                BinaryOperator::Multiply => left
                    .checked_mul(right)
                    .ok_or(FormulaError::Overflow("multiplication")),
                BinaryOperator::Divide => {
                    if right.is_zero() {
                        return Err(FormulaError::DivisionByZero);
                    }
                    left.checked_div(right)
                        .ok_or(FormulaError::Overflow("division"))
                }
            }
        }
        Expr::FunctionCall { function, args } => call(*function, args, resolver),
    }
}

fn call(
    function: Function,
    args: &[Expr],
    resolver: &dyn FieldResolver,
) -> Result<Decimal, FormulaError> {
    match function {
        Function::Min | Function::Max => {
            if args.is_empty() {
                return Err(FormulaError::Arity {
                    function,
                    expected: "at least 1",
                    actual: 0,
                });
            }
            let mut values = args
                .iter()
                .map(|arg| evaluate(arg, resolver))
                .collect::<Result<Vec<_>, _>>()?
                .into_iter();
            let first = values.next().unwrap_or_default();
            Ok(values.fold(first, |acc, value| {
                if function == Function::Min {
                    acc.min(value)
                } else {
                    acc.max(value)
                }
            }))
        }
        Function::Abs | Function::Floor | Function::Ceil => {
            let [arg] = args else {
                return Err(FormulaError::Arity {
                    function,
                    expected: "1",
                    actual: args.len(),
                });
            };
            let value = evaluate(arg, resolver)?;
            Ok(match function {
                Function::Abs => value.abs(),
                Function::Floor => value.floor(),
                _ => value.ceil(),
            })
        }
        Function::Round => {
            let (value, places) = match args {
                [value] => (evaluate(value, resolver)?, 0),
                [value, places] => {
                    let places = evaluate(places, resolver)?;
                    if !places.fract().is_zero() {
                        return Err(FormulaError::InvalidPrecision);
                    }
                    let places = places
                        .to_u32()
                        .filter(|places| *places <= 28)
                        .ok_or(FormulaError::InvalidPrecision)?;
                    (evaluate(value, resolver)?, places)
                }
                _ => {
                    return Err(FormulaError::Arity {
                        function,
                        expected: "1 or 2",
                        actual: args.len(),
                    })
                }
            };
            Ok(value.round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero))
        }
        Function::Coalesce => {
            for arg in args {
                match evaluate(arg, resolver) {
                    Ok(value) => return Ok(value),
                    Err(FormulaError::UnknownField(_)) => continue,
                    Err(other) => return Err(other),
                }
            }
            Err(FormulaError::Arity {
                function,
                expected: "at least 1 resolvable",
                actual: args.len(),
            })
        }
    }
}
