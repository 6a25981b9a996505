use lib::store::StoreError;
use thiserror::Error;

use crate::expression::ExpressionError;

#[derive(Error, Debug)]
pub enum CheckError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Eval(#[from] graphite::EvalError),
    #[error(transparent)]
    Expression(#[from] ExpressionError),
    #[error("target #{number} has {count} timeseries, expected exactly one")]
    TargetArity { number: usize, count: usize },
}
