//! Calculator procedures.

use mcp_sse_core::{ParamKind, ParamSchema, Procedure, ProcedureRegistry, ToolError};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct IntArgs {
    pub a: i64,
    pub b: i64,
}

#[derive(Debug, Deserialize)]
pub struct FloatArgs {
    pub a: f64,
    pub b: f64,
}

fn int_schema() -> ParamSchema {
    ParamSchema::new()
        .required("a", ParamKind::Integer)
        .required("b", ParamKind::Integer)
}

fn float_schema() -> ParamSchema {
    ParamSchema::new()
        .required("a", ParamKind::Number)
        .required("b", ParamKind::Number)
}

fn overflow(name: &str, args: &IntArgs) -> ToolError {
    ToolError::new(format!(
        "Integer overflow in {} (a={}, b={})",
        name, args.a, args.b
    ))
}

pub fn add_numbers(args: IntArgs) -> Result<i64, ToolError> {
    info!("Tool called: add_numbers | a={}, b={}", args.a, args.b);
    let result = args
        .a
        .checked_add(args.b)
        .ok_or_else(|| overflow("add_numbers", &args))?;
    info!("Tool completed: add_numbers | result={}", result);
    Ok(result)
}

pub fn subtract_numbers(args: IntArgs) -> Result<i64, ToolError> {
    info!("Tool called: subtract_numbers | a={}, b={}", args.a, args.b);
    let result = args
        .a
        .checked_sub(args.b)
        .ok_or_else(|| overflow("subtract_numbers", &args))?;
    info!("Tool completed: subtract_numbers | result={}", result);
    Ok(result)
}

pub fn multiply_numbers(args: IntArgs) -> Result<i64, ToolError> {
    info!("Tool called: multiply_numbers | a={}, b={}", args.a, args.b);
    let result = args
        .a
        .checked_mul(args.b)
        .ok_or_else(|| overflow("multiply_numbers", &args))?;
    info!("Tool completed: multiply_numbers | result={}", result);
    Ok(result)
}

pub fn divide_numbers(args: FloatArgs) -> Result<f64, ToolError> {
    if args.b == 0.0 {
        return Err(ToolError::new("Cannot divide by zero"));
    }
    info!("Tool called: divide_numbers | a={}, b={}", args.a, args.b);
    let result = args.a / args.b;
    if !result.is_finite() {
        return Err(ToolError::new(format!(
            "Result of {} / {} is not a finite number",
            args.a, args.b
        )));
    }
    info!("Tool completed: divide_numbers | result={}", result);
    Ok(result)
}

/// Registry holding the four calculator tools.
pub fn calculator_registry() -> mcp_sse_core::Result<ProcedureRegistry> {
    ProcedureRegistry::builder()
        .procedure(Procedure::from_fn(
            "add_numbers",
            "Add two numbers together. Returns the sum of a and b.",
            int_schema(),
            add_numbers,
        ))
        .procedure(Procedure::from_fn(
            "subtract_numbers",
            "Subtract second number from first number. Returns the difference a - b.",
            int_schema(),
            subtract_numbers,
        ))
        .procedure(Procedure::from_fn(
            "multiply_numbers",
            "Multiply two numbers together. Returns the product of a and b.",
            int_schema(),
            multiply_numbers,
        ))
        .procedure(Procedure::from_fn(
            "divide_numbers",
            "Divide first number by second number. Returns the quotient a / b; fails if b is zero.",
            float_schema(),
            divide_numbers,
        ))
        .build()
}
