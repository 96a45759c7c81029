//! Formula evaluation against a row's values.

use super::parser::{BinaryOp, Expr, Function};
use crate::{format_number, CellValue, FormulaError, RowValues};

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Num(f64),
    Text(String),
}

impl Value {
    /// Blank text counts as zero; anything else must parse.
    fn to_number(&self) -> Result<f64, FormulaError> {
        match self {
            Value::Num(n) => Ok(*n),
            Value::Text(s) if s.trim().is_empty() => Ok(0.0),
            Value::Text(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .ok_or_else(|| FormulaError::NotANumber { value: s.clone() }),
        }
    }

    fn to_text(&self) -> String {
        match self {
            Value::Num(n) => format_number(*n),
            Value::Text(s) => s.clone(),
        }
    }

    fn is_blank(&self) -> bool {
        matches!(self, Value::Text(s) if s.trim().is_empty())
    }
}

/// Evaluate a parsed expression.
pub fn evaluate(expr: &Expr, row: &RowValues) -> Result<CellValue, FormulaError> {
    match eval(expr, row)? {
        Value::Num(n) if !n.is_finite() => Err(FormulaError::NotANumber {
            value: n.to_string(),
        }),
        Value::Num(n) => Ok(CellValue::Number(n)),
        Value::Text(s) => Ok(CellValue::Text(s)),
    }
}

fn eval(expr: &Expr, row: &RowValues) -> Result<Value, FormulaError> {
    match expr {
        Expr::Number(n) => Ok(Value::Num(*n)),
        Expr::Text(s) => Ok(Value::Text(s.clone())),
        Expr::Ref(key) => Ok(Value::Text(row.get(key).unwrap_or_default().to_string())),
        Expr::Neg(inner) => Ok(Value::Num(-eval(inner, row)?.to_number()?)),
        Expr::Binary { op, lhs, rhs } => {
            let l = eval(lhs, row)?;
            let r = eval(rhs, row)?;
            binary(*op, l, r)
        }
        Expr::Call { function, args } => {
            let values = args
                .iter()
                .map(|a| eval(a, row))
                .collect::<Result<Vec<_>, _>>()?;
            call(*function, values)
        }
    }
}

fn binary(op: BinaryOp, l: Value, r: Value) -> Result<Value, FormulaError> {
    let n = match op {
        BinaryOp::Concat => return Ok(Value::Text(l.to_text() + &r.to_text())),
        BinaryOp::Add => l.to_number()? + r.to_number()?,
        BinaryOp::Sub => l.to_number()? - r.to_number()?,
        BinaryOp::Mul => l.to_number()? * r.to_number()?,
        BinaryOp::Div => {
            let divisor = r.to_number()?;
            if divisor == 0.0 {
                return Err(FormulaError::DivisionByZero);
            }
            l.to_number()? / divisor
        }
    };
    Ok(Value::Num(n))
}

fn call(function: Function, args: Vec<Value>) -> Result<Value, FormulaError> {
    match function {
        Function::Round => {
            let x = first(&args)?.to_number()?;
            let digits = match args.get(1) {
                Some(d) => d.to_number()?.trunc() as i32,
                None => 0,
            };
            let factor = 10f64.powi(digits);
            Ok(Value::Num((x * factor).round() / factor))
        }
        Function::Abs => Ok(Value::Num(first(&args)?.to_number()?.abs())),
        Function::Min | Function::Max => {
            let mut numbers = args
                .iter()
                .map(Value::to_number)
                .collect::<Result<Vec<_>, _>>()?
                .into_iter();
            let init = numbers.next().ok_or(FormulaError::UnexpectedEnd)?;
            let folded = if function == Function::Min {
                numbers.fold(init, f64::min)
            } else {
                numbers.fold(init, f64::max)
            };
            Ok(Value::Num(folded))
        }
        Function::Len => Ok(Value::Num(first(&args)?.to_text().chars().count() as f64)),
        Function::Upper => Ok(Value::Text(first(&args)?.to_text().to_uppercase())),
        Function::Lower => Ok(Value::Text(first(&args)?.to_text().to_lowercase())),
        Function::Trim => Ok(Value::Text(first(&args)?.to_text().trim().to_string())),
        Function::Concat => Ok(Value::Text(args.iter().map(Value::to_text).collect())),
        Function::Coalesce => Ok(args
            .into_iter()
            .find(|v| !v.is_blank())
            .unwrap_or_else(|| Value::Text(String::new()))),
    }
}

fn first(args: &[Value]) -> Result<&Value, FormulaError> {
    args.first().ok_or(FormulaError::UnexpectedEnd)
}
