//! Built-in operation catalog
//!
//! Operations are written in flow files as `name[:arg[:arg]]`, for example
//! `add:1`, `clamp:0:10` or `sqrt`. Elementwise operations map one value to one
//! value; aggregate operations reduce a whole column to a single value.

use crate::error::{FlowError, Result};
use anyhow::bail;
use std::sync::Arc;

/// Scalar operation applied to every value of a column.
pub type ElementFn = Arc<dyn Fn(f64) -> anyhow::Result<f64> + Send + Sync>;

/// Reduction applied to a whole column.
pub type AggregateFn = Arc<dyn Fn(&[f64]) -> anyhow::Result<f64> + Send + Sync>;

/// Catalog entry used for `pipe_flow ops` output.
#[derive(Debug, Clone, Copy)]
pub struct OpDoc {
    pub usage: &'static str,
    pub help: &'static str,
}

pub const ELEMENT_OPS: &[OpDoc] = &[
    OpDoc { usage: "add:N", help: "x + N" },
    OpDoc { usage: "sub:N", help: "x - N" },
    OpDoc { usage: "mul:N", help: "x * N" },
    OpDoc { usage: "div:N", help: "x / N (N must be non-zero)" },
    OpDoc { usage: "pow:N", help: "x raised to N" },
    OpDoc { usage: "abs", help: "absolute value" },
    OpDoc { usage: "neg", help: "-x" },
    OpDoc { usage: "sqrt", help: "square root, fails on negative values" },
    OpDoc { usage: "ln", help: "natural log, fails on non-positive values" },
    OpDoc { usage: "recip", help: "1 / x, fails on zero" },
    OpDoc { usage: "clamp:LO:HI", help: "limit x to [LO, HI]" },
];

pub const AGGREGATE_OPS: &[OpDoc] = &[
    OpDoc { usage: "sum", help: "sum of the column" },
    OpDoc { usage: "product", help: "product of the column" },
    OpDoc { usage: "mean", help: "arithmetic mean, fails on empty columns" },
    OpDoc { usage: "min", help: "smallest value, fails on empty columns" },
    OpDoc { usage: "max", help: "largest value, fails on empty columns" },
    OpDoc { usage: "count", help: "number of values" },
    OpDoc { usage: "stddev", help: "population standard deviation, fails on empty columns" },
];

fn element(f: impl Fn(f64) -> anyhow::Result<f64> + Send + Sync + 'static) -> ElementFn {
    Arc::new(f)
}

fn aggregate(f: impl Fn(&[f64]) -> anyhow::Result<f64> + Send + Sync + 'static) -> AggregateFn {
    Arc::new(f)
}

fn split_spec(spec: &str) -> Result<(&str, Vec<f64>)> {
    let mut parts = spec.trim().split(':');
    let name = parts.next().unwrap_or_default().trim();
    let args = parts
        .map(|p| {
            p.trim()
                .parse::<f64>()
                .map_err(|_| FlowError::Config(format!("invalid argument '{}' in operation '{}'", p, spec)))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok((name, args))
}

fn expect_args(spec: &str, args: &[f64], n: usize) -> Result<()> {
    if args.len() != n {
        return Err(FlowError::Config(format!(
            "operation '{}' takes {} argument(s), got {}",
            spec,
            n,
            args.len()
        )));
    }
    Ok(())
}

/// Parses an elementwise operation spec into a callable.
pub fn element_op(spec: &str) -> Result<ElementFn> {
    let (name, args) = split_spec(spec)?;
    let op: ElementFn = match name {
        "add" | "sub" | "mul" | "div" | "pow" => {
            expect_args(spec, &args, 1)?;
            let n = args[0];
            match name {
                "add" => element(move |x| Ok(x + n)),
                "sub" => element(move |x| Ok(x - n)),
                "mul" => element(move |x| Ok(x * n)),
                "div" => {
                    if n == 0.0 {
                        return Err(FlowError::Config(format!("division by zero in '{}'", spec)));
                    }
                    element(move |x| Ok(x / n))
                }
                _ => element(move |x| Ok(x.powf(n))),
            }
        }
        "abs" | "neg" | "sqrt" | "ln" | "recip" => {
            expect_args(spec, &args, 0)?;
            match name {
                "abs" => element(|x| Ok(x.abs())),
                "neg" => element(|x| Ok(-x)),
                "sqrt" => element(|x| {
                    if x < 0.0 {
                        bail!("cannot take the square root of a negative value");
                    }
                    Ok(x.sqrt())
                }),
                "ln" => element(|x| {
                    if x <= 0.0 {
                        bail!("logarithm is undefined for non-positive values");
                    }
                    Ok(x.ln())
                }),
                _ => element(|x| {
                    if x == 0.0 {
                        bail!("cannot take the reciprocal of zero");
                    }
                    Ok(1.0 / x)
                }),
            }
        }
        "clamp" => {
            expect_args(spec, &args, 2)?;
            let (lo, hi) = (args[0], args[1]);
            if lo.is_nan() || hi.is_nan() {
                return Err(FlowError::Config(format!("clamp bounds must be numbers in '{}'", spec)));
            }
            if lo > hi {
                return Err(FlowError::Config(format!("clamp bounds are inverted in '{}'", spec)));
            }
            element(move |x| Ok(x.clamp(lo, hi)))
        }
        _ => return Err(FlowError::UnknownOperation(spec.to_string())),
    };
    Ok(op)
}

fn non_empty(values: &[f64]) -> anyhow::Result<()> {
    if values.is_empty() {
        bail!("column is empty");
    }
    Ok(())
}

/// Parses an aggregate operation spec into a callable.
pub fn aggregate_op(spec: &str) -> Result<AggregateFn> {
    let (name, args) = split_spec(spec)?;
    expect_args(spec, &args, 0).or_else(|e| {
        if AGGREGATE_OPS.iter().any(|d| d.usage == name) {
            Err(e)
        } else {
            Err(FlowError::UnknownOperation(spec.to_string()))
        }
    })?;
    let op: AggregateFn = match name {
        "sum" => aggregate(|v| Ok(v.iter().sum())),
        "product" => aggregate(|v| Ok(v.iter().product())),
        "count" => aggregate(|v| Ok(v.len() as f64)),
        "mean" => aggregate(|v| {
            non_empty(v)?;
            Ok(mean(v))
        }),
        "min" => aggregate(|v| {
            non_empty(v)?;
            Ok(v.iter().copied().fold(f64::INFINITY, f64::min))
        }),
        "max" => aggregate(|v| {
            non_empty(v)?;
            Ok(v.iter().copied().fold(f64::NEG_INFINITY, f64::max))
        }),
        "stddev" => aggregate(|v| {
            non_empty(v)?;
            let m = mean(v);
            let var = v.iter().map(|x| (x - m).powi(2)).sum::<f64>() / v.len() as f64;
            Ok(var.sqrt())
        }),
        _ => return Err(FlowError::UnknownOperation(spec.to_string())),
    };
    Ok(op)
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}
