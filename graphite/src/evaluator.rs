use std::collections::HashMap;

use async_recursion::async_recursion;
use lib::store::StoreError;
use thiserror::Error;

use crate::attime::TimeParseError;
use crate::context::RequestContext;
use crate::fetch::fetch_data;
use crate::functions;
use crate::parse::{parse_target, Expr, ParseError};
use crate::series::{Series, SeriesError};

#[derive(Error, Debug)]
pub enum EvalError {
    #[error("cannot parse target: {0}")]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Series(#[from] SeriesError),
    #[error(transparent)]
    Time(#[from] TimeParseError),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("{function}: {message}")]
    BadArgument { function: String, message: String },
    #[error("{0}")]
    Evaluation(String),
}

/// Argument and result union of the function library.
#[derive(Debug, Clone)]
pub enum Value {
    SeriesList(Vec<Series>),
    /// Produced by mapSeries, consumed by reduceSeries.
    SeriesLists(Vec<Vec<Series>>),
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl Value {
    /// How the value reads when substituted into a path expression.
    pub fn render(&self) -> String {
        match self {
            | Value::Int(v) => v.to_string(),
            | Value::Float(v) => v.to_string(),
            | Value::Str(v) => v.clone(),
            | Value::Bool(v) => v.to_string(),
            | Value::SeriesList(_) | Value::SeriesLists(_) => String::new(),
        }
    }
}

/// Evaluates one target string into labeled series.
pub async fn evaluate_target(
    ctx: &mut RequestContext,
    target: &str,
) -> Result<Vec<Series>, EvalError> {
    let expr = parse_target(target)?;
    match evaluate(ctx, &expr, None).await? {
        | Value::SeriesList(list) => Ok(list),
        | Value::SeriesLists(lists) => {
            Ok(lists.into_iter().flatten().collect())
        }
        | _ => Err(EvalError::Evaluation(format!(
            "target '{target}' did not evaluate to series"
        ))),
    }
}

#[async_recursion]
pub async fn evaluate(
    ctx: &mut RequestContext,
    expr: &Expr,
    replacements: Option<&HashMap<String, Value>>,
) -> Result<Value, EvalError> {
    match expr {
        | Expr::Path(path) => {
            let mut path = path.clone();
            if let Some(replacements) = replacements {
                for (name, value) in replacements {
                    let var = format!("${name}");
                    if path == var {
                        // A bare variable keeps the replacement's type.
                        return Ok(resolve_bare(value));
                    }
                    path = path.replace(&var, &value.render());
                }
            }
            Ok(Value::SeriesList(fetch_data(ctx, &path).await?))
        }
        | Expr::Call { name, args, kwargs } => {
            let mut arg_values = Vec::with_capacity(args.len());
            for arg in args {
                arg_values.push(evaluate(ctx, arg, replacements).await?);
            }
            let mut kwarg_values = Vec::with_capacity(kwargs.len());
            for (key, value) in kwargs {
                kwarg_values.push((
                    key.clone(),
                    evaluate(ctx, value, replacements).await?,
                ));
            }
            match functions::call_function(ctx, name, arg_values, kwarg_values)
                .await
            {
                | Err(EvalError::Series(
                    SeriesError::NormalizeEmptyResult,
                )) => Ok(Value::SeriesList(vec![])),
                | other => other,
            }
        }
        | Expr::Template {
            inner,
            args,
            kwargs,
        } => {
            let mut substitutions = HashMap::new();
            for (position, arg) in args.iter().enumerate() {
                substitutions.insert(
                    (position + 1).to_string(),
                    evaluate(ctx, arg, replacements).await?,
                );
            }
            for (key, value) in kwargs {
                substitutions.insert(
                    key.clone(),
                    evaluate(ctx, value, replacements).await?,
                );
            }
            evaluate(ctx, inner, Some(&substitutions)).await
        }
        | Expr::Integer(v) => Ok(Value::Int(*v)),
        | Expr::Float(v) => Ok(Value::Float(*v)),
        | Expr::Str(v) => Ok(Value::Str(v.clone())),
        | Expr::Bool(v) => Ok(Value::Bool(*v)),
    }
}

/// `$name` standing alone resolves to the replacement itself; numeric
/// strings collapse to numbers the way the original evaluator did.
fn resolve_bare(value: &Value) -> Value {
    if let Value::Str(text) = value {
        if let Ok(parsed) = text.parse::<f64>() {
            return Value::Float(parsed);
        }
    }
    value.clone()
}
