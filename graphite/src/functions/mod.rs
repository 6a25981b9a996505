//! The function library reachable from target strings. A closed set: every
//! name is enumerated in [`call_function`] and dispatched at compile time.

mod combine;
mod filter;
mod grouping;
mod naming;
mod timefn;
mod transform;
mod window;

use std::collections::{HashMap, VecDeque};

use async_recursion::async_recursion;

use crate::context::RequestContext;
use crate::evaluator::{EvalError, Value};
use crate::series::Series;

#[async_recursion]
pub async fn call_function(
    ctx: &mut RequestContext,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Value, EvalError> {
    let mut args = Args::new(name, args, kwargs);
    match name {
        // Combine
        | "sumSeries" | "sum" => combine::sum_series(&mut args),
        | "averageSeries" | "avg" => combine::average_series(&mut args),
        | "stddevSeries" => combine::stddev_series(&mut args),
        | "minSeries" => combine::min_series(&mut args),
        | "maxSeries" => combine::max_series(&mut args),
        | "rangeOfSeries" => combine::range_of_series(&mut args),
        | "diffSeries" => combine::diff_series(&mut args),
        | "multiplySeries" => combine::multiply_series(&mut args),
        | "divideSeries" => combine::divide_series(&mut args),
        | "countSeries" => combine::count_series(&mut args),
        | "percentileOfSeries" => combine::percentile_of_series(&mut args),
        | "asPercent" | "pct" => combine::as_percent(&mut args),

        // Transform
        | "scale" => transform::scale(&mut args),
        | "scaleToSeconds" => transform::scale_to_seconds(&mut args),
        | "offset" => transform::offset(&mut args),
        | "offsetToZero" => transform::offset_to_zero(&mut args),
        | "pow" => transform::pow(&mut args),
        | "squareRoot" => transform::square_root(&mut args),
        | "invert" => transform::invert(&mut args),
        | "absolute" => transform::absolute(&mut args),
        | "derivative" => transform::derivative(&mut args),
        | "perSecond" => transform::per_second(&mut args),
        | "nonNegativeDerivative" => {
            transform::non_negative_derivative(&mut args)
        }
        | "integral" => transform::integral(&mut args),
        | "log" => transform::logarithm(&mut args),
        | "transformNull" => transform::transform_null(&mut args),
        | "isNonNull" => transform::is_non_null(&mut args),
        | "keepLastValue" => transform::keep_last_value(&mut args),
        | "changed" => transform::changed(&mut args),
        | "consolidateBy" => transform::consolidate_by(&mut args),
        | "cumulative" => transform::cumulative(&mut args),

        // Windowing
        | "movingAverage" => window::moving_average(ctx, &mut args).await,
        | "movingMedian" => window::moving_median(ctx, &mut args).await,

        // Filters
        | "highestCurrent" => filter::highest_current(&mut args),
        | "highestMax" => filter::highest_max(&mut args),
        | "highestAverage" => filter::highest_average(&mut args),
        | "lowestCurrent" => filter::lowest_current(&mut args),
        | "lowestAverage" => filter::lowest_average(&mut args),
        | "currentAbove" => filter::current_above(&mut args),
        | "currentBelow" => filter::current_below(&mut args),
        | "averageAbove" => filter::average_above(&mut args),
        | "averageBelow" => filter::average_below(&mut args),
        | "maximumAbove" => filter::maximum_above(&mut args),
        | "maximumBelow" => filter::maximum_below(&mut args),
        | "minimumAbove" => filter::minimum_above(&mut args),
        | "minimumBelow" => filter::minimum_below(&mut args),
        | "nPercentile" => filter::n_percentile(&mut args),
        | "removeAboveValue" => filter::remove_above_value(&mut args),
        | "removeBelowValue" => filter::remove_below_value(&mut args),
        | "removeAbovePercentile" => {
            filter::remove_above_percentile(&mut args)
        }
        | "removeBelowPercentile" => {
            filter::remove_below_percentile(&mut args)
        }
        | "removeEmptySeries" => filter::remove_empty_series(&mut args),
        | "limit" => filter::limit(&mut args),
        | "sortByName" => filter::sort_by_name(&mut args),
        | "sortByTotal" => filter::sort_by_total(&mut args),
        | "sortByMaxima" => filter::sort_by_maxima(&mut args),
        | "sortByMinima" => filter::sort_by_minima(&mut args),
        | "exclude" => filter::exclude(&mut args),
        | "grep" => filter::grep(&mut args),
        | "fallbackSeries" => filter::fallback_series(&mut args),

        // Naming
        | "alias" => naming::alias(&mut args),
        | "aliasByNode" => naming::alias_by_node(&mut args),
        | "aliasByMetric" => naming::alias_by_metric(&mut args),
        | "aliasSub" => naming::alias_sub(&mut args),

        // Grouping
        | "group" => grouping::group(&mut args),
        | "mapSeries" | "map" => grouping::map_series(&mut args),
        | "reduceSeries" | "reduce" => {
            grouping::reduce_series(ctx, &mut args).await
        }
        | "groupByNode" => grouping::group_by_node(ctx, &mut args).await,
        | "sumSeriesWithWildcards" => {
            grouping::sum_series_with_wildcards(&mut args)
        }
        | "averageSeriesWithWildcards" => {
            grouping::average_series_with_wildcards(&mut args)
        }
        | "multiplySeriesWithWildcards" => {
            grouping::multiply_series_with_wildcards(&mut args)
        }

        // Time-based
        | "summarize" => timefn::summarize(&mut args),
        | "smartSummarize" => timefn::smart_summarize(ctx, &mut args).await,
        | "hitcount" => timefn::hitcount(ctx, &mut args).await,
        | "timeShift" => timefn::time_shift(ctx, &mut args).await,
        | "timeStack" => timefn::time_stack(ctx, &mut args).await,
        | "timeSlice" => timefn::time_slice(ctx, &mut args),
        | "constantLine" => timefn::constant_line(ctx, &mut args),
        | "threshold" => timefn::threshold(ctx, &mut args),
        | "aggregateLine" => timefn::aggregate_line(ctx, &mut args),
        | "time" | "timeFunction" => timefn::time_function(ctx, &mut args),
        | "sin" | "sinFunction" => timefn::sin_function(ctx, &mut args),
        | "randomWalk" | "randomWalkFunction" => {
            timefn::random_walk(ctx, &mut args)
        }
        | "identity" => timefn::identity(ctx, &mut args),

        | other => Err(EvalError::UnknownFunction(other.to_string())),
    }
}

/// Positional-or-keyword argument extraction with typed coercions.
pub(crate) struct Args {
    function: String,
    positional: VecDeque<Value>,
    kwargs: HashMap<String, Value>,
}

impl Args {
    fn new(
        function: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Args {
        Args {
            function: function.to_string(),
            positional: args.into(),
            kwargs: kwargs.into_iter().collect(),
        }
    }

    pub fn bad(&self, message: impl Into<String>) -> EvalError {
        EvalError::BadArgument {
            function: self.function.clone(),
            message: message.into(),
        }
    }

    pub fn take(&mut self, name: &str) -> Option<Value> {
        if let Some(value) = self.positional.pop_front() {
            return Some(value);
        }
        self.kwargs.remove(name)
    }

    pub fn series_list(&mut self, name: &str) -> Result<Vec<Series>, EvalError> {
        match self.take(name) {
            | Some(Value::SeriesList(list)) => Ok(list),
            | Some(_) => Err(self.bad(format!("'{name}' must be a series list"))),
            | None => Err(self.bad(format!("missing argument '{name}'"))),
        }
    }

    /// All remaining positional arguments, each a series list.
    pub fn series_lists_rest(&mut self) -> Result<Vec<Vec<Series>>, EvalError> {
        let mut lists = Vec::new();
        while let Some(value) = self.positional.pop_front() {
            match value {
                | Value::SeriesList(list) => lists.push(list),
                | Value::SeriesLists(more) => lists.extend(more),
                | _ => {
                    return Err(
                        self.bad("every argument must be a series list")
                    )
                }
            }
        }
        Ok(lists)
    }

    pub fn series_lists(
        &mut self,
        name: &str,
    ) -> Result<Vec<Vec<Series>>, EvalError> {
        match self.take(name) {
            | Some(Value::SeriesLists(lists)) => Ok(lists),
            | Some(Value::SeriesList(list)) => Ok(vec![list]),
            | Some(_) => Err(self.bad(format!(
                "'{name}' must be a list of series lists"
            ))),
            | None => Err(self.bad(format!("missing argument '{name}'"))),
        }
    }

    pub fn f64(&mut self, name: &str) -> Result<f64, EvalError> {
        match self.take(name) {
            | Some(Value::Int(v)) => Ok(v as f64),
            | Some(Value::Float(v)) => Ok(v),
            | Some(_) => Err(self.bad(format!("'{name}' must be a number"))),
            | None => Err(self.bad(format!("missing argument '{name}'"))),
        }
    }

    pub fn opt_f64(&mut self, name: &str) -> Result<Option<f64>, EvalError> {
        match self.take(name) {
            | None => Ok(None),
            | Some(Value::Int(v)) => Ok(Some(v as f64)),
            | Some(Value::Float(v)) => Ok(Some(v)),
            | Some(_) => Err(self.bad(format!("'{name}' must be a number"))),
        }
    }

    pub fn f64_or(&mut self, name: &str, default: f64) -> Result<f64, EvalError> {
        Ok(self.opt_f64(name)?.unwrap_or(default))
    }

    pub fn i64(&mut self, name: &str) -> Result<i64, EvalError> {
        match self.take(name) {
            | Some(Value::Int(v)) => Ok(v),
            | Some(Value::Float(v)) if v.fract() == 0.0 => Ok(v as i64),
            | Some(_) => Err(self.bad(format!("'{name}' must be an integer"))),
            | None => Err(self.bad(format!("missing argument '{name}'"))),
        }
    }

    pub fn usize_(&mut self, name: &str) -> Result<usize, EvalError> {
        let value = self.i64(name)?;
        usize::try_from(value)
            .map_err(|_| self.bad(format!("'{name}' must be non-negative")))
    }

    pub fn string(&mut self, name: &str) -> Result<String, EvalError> {
        match self.take(name) {
            | Some(Value::Str(v)) => Ok(v),
            | Some(_) => Err(self.bad(format!("'{name}' must be a string"))),
            | None => Err(self.bad(format!("missing argument '{name}'"))),
        }
    }

    pub fn opt_string(
        &mut self,
        name: &str,
    ) -> Result<Option<String>, EvalError> {
        match self.take(name) {
            | None => Ok(None),
            | Some(Value::Str(v)) => Ok(Some(v)),
            | Some(_) => Err(self.bad(format!("'{name}' must be a string"))),
        }
    }

    pub fn string_or(
        &mut self,
        name: &str,
        default: &str,
    ) -> Result<String, EvalError> {
        Ok(self.opt_string(name)?.unwrap_or_else(|| default.to_string()))
    }

    pub fn bool_or(
        &mut self,
        name: &str,
        default: bool,
    ) -> Result<bool, EvalError> {
        match self.take(name) {
            | None => Ok(default),
            | Some(Value::Bool(v)) => Ok(v),
            | Some(_) => Err(self.bad(format!("'{name}' must be a boolean"))),
        }
    }

    /// Remaining positional integers (node positions and the like).
    pub fn usize_rest(&mut self) -> Result<Vec<usize>, EvalError> {
        let mut out = Vec::new();
        while self.positional.front().is_some() {
            out.push(self.usize_("position")?);
        }
        Ok(out)
    }

    /// Remaining positional strings.
    pub fn string_rest(&mut self) -> Result<Vec<String>, EvalError> {
        let mut out = Vec::new();
        while self.positional.front().is_some() {
            out.push(self.string("matcher")?);
        }
        Ok(out)
    }

    /// Window size: a point count or a quoted time span.
    pub fn count_or_span(&mut self, name: &str) -> Result<Value, EvalError> {
        match self.take(name) {
            | Some(v @ (Value::Int(_) | Value::Str(_))) => Ok(v),
            | Some(Value::Float(v)) => Ok(Value::Int(v as i64)),
            | Some(_) => Err(self.bad(format!(
                "'{name}' must be a point count or a time span"
            ))),
            | None => Err(self.bad(format!("missing argument '{name}'"))),
        }
    }
}

// Null-tolerant arithmetic mirroring the evaluation semantics of the
// upstream function set: absent points poison some operations and are
// skipped by others.

pub(crate) fn safe_sum(values: &[Option<f64>]) -> Option<f64> {
    let usable: Vec<f64> = values.iter().filter_map(|v| *v).collect();
    if usable.is_empty() {
        None
    } else {
        Some(usable.iter().sum())
    }
}

pub(crate) fn safe_diff(values: &[Option<f64>]) -> Option<f64> {
    let usable: Vec<f64> = values.iter().filter_map(|v| *v).collect();
    let (first, rest) = usable.split_first()?;
    Some(first - rest.iter().sum::<f64>())
}

pub(crate) fn safe_len(values: &[Option<f64>]) -> usize {
    values.iter().filter(|v| v.is_some()).count()
}

pub(crate) fn safe_div(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        | (Some(a), Some(b)) if b != 0.0 => Some(a / b),
        | _ => None,
    }
}

pub(crate) fn safe_pow(a: Option<f64>, b: f64) -> Option<f64> {
    let result = a?.powf(b);
    if result.is_nan() {
        None
    } else {
        Some(result)
    }
}

pub(crate) fn safe_mul(factors: &[Option<f64>]) -> Option<f64> {
    let mut product = 1.0;
    for factor in factors {
        product *= (*factor)?;
    }
    Some(product)
}

pub(crate) fn safe_subtract(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    Some(a? - b?)
}

pub(crate) fn safe_avg(values: &[Option<f64>]) -> Option<f64> {
    safe_div(safe_sum(values), Some(safe_len(values) as f64))
}

pub(crate) fn safe_std_dev(values: &[Option<f64>]) -> Option<f64> {
    let usable: Vec<f64> = values.iter().filter_map(|v| *v).collect();
    if usable.is_empty() {
        return None;
    }
    let avg = usable.iter().sum::<f64>() / usable.len() as f64;
    let sum_squares: f64 =
        usable.iter().map(|v| (v - avg) * (v - avg)).sum();
    Some((sum_squares / usable.len() as f64).sqrt())
}

pub(crate) fn safe_last(values: &[Option<f64>]) -> Option<f64> {
    values.iter().rev().find_map(|v| *v)
}

pub(crate) fn safe_min(values: &[Option<f64>]) -> Option<f64> {
    values
        .iter()
        .filter_map(|v| *v)
        .fold(None, |acc: Option<f64>, v| {
            Some(acc.map_or(v, |a| a.min(v)))
        })
}

pub(crate) fn safe_max(values: &[Option<f64>]) -> Option<f64> {
    values
        .iter()
        .filter_map(|v| *v)
        .fold(None, |acc: Option<f64>, v| {
            Some(acc.map_or(v, |a| a.max(v)))
        })
}

pub(crate) fn safe_abs(value: Option<f64>) -> Option<f64> {
    value.map(f64::abs)
}

pub(crate) fn safe_is_not_empty(values: &[Option<f64>]) -> bool {
    safe_len(values) > 0
}

/// NIST rank-based percentile over non-null points.
pub(crate) fn get_percentile(
    points: &[Option<f64>],
    n: f64,
    interpolate: bool,
) -> Option<f64> {
    let mut sorted: Vec<f64> = points.iter().filter_map(|v| *v).collect();
    sorted.sort_by(f64::total_cmp);
    if sorted.is_empty() {
        return None;
    }
    let fractional_rank = (n / 100.0) * (sorted.len() + 1) as f64;
    let mut rank = fractional_rank as usize;
    let rank_fraction = fractional_rank - rank as f64;

    if !interpolate {
        rank += rank_fraction.ceil() as usize;
    }

    let mut percentile = if rank == 0 {
        sorted[0]
    } else if rank - 1 >= sorted.len() {
        sorted[sorted.len() - 1]
    } else {
        sorted[rank - 1]
    };

    if interpolate && rank != sorted.len() {
        let next_value = sorted[rank];
        percentile += rank_fraction * (next_value - percentile);
    }
    Some(percentile)
}

/// Unique path expressions joined for generated series names.
pub(crate) fn format_path_expressions(series_list: &[Series]) -> String {
    let mut seen = Vec::new();
    for series in series_list {
        if !seen.contains(&series.path_expression) {
            seen.push(series.path_expression.clone());
        }
    }
    seen.join(",")
}

/// Shortest numeric rendering, matching "%g"-style names ("10", "2.5").
pub(crate) fn fmt_g(value: f64) -> String {
    if value == value.trunc() && value.abs() < 1e16 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}
