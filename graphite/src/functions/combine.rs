use super::{
    format_path_expressions,
    get_percentile,
    safe_diff,
    safe_div,
    safe_len,
    safe_max,
    safe_min,
    safe_mul,
    safe_std_dev,
    safe_subtract,
    safe_sum,
    Args,
};
use crate::evaluator::{EvalError, Value};
use crate::series::{normalize, zipped_rows, Series, SeriesError};

fn combined(
    name: String,
    start: i64,
    end: i64,
    step: i64,
    values: Vec<Option<f64>>,
) -> Value {
    let series = Series::new(name, start, end, step, values);
    Value::SeriesList(vec![series])
}

fn rowwise(
    args: &mut Args,
    name_for: impl Fn(&[Series]) -> String,
    row_fn: impl Fn(&[Option<f64>]) -> Option<f64>,
) -> Result<Value, EvalError> {
    let series_lists = args.series_lists_rest()?;
    let (series_list, start, end, step) = normalize(series_lists)?;
    let name = name_for(&series_list);
    let values = zipped_rows(&series_list)
        .iter()
        .map(|row| row_fn(row))
        .collect();
    Ok(combined(name, start, end, step, values))
}

pub(super) fn sum_series(args: &mut Args) -> Result<Value, EvalError> {
    match rowwise(
        args,
        |list| format!("sumSeries({})", format_path_expressions(list)),
        |row| safe_sum(row),
    ) {
        // An empty input group sums to nothing rather than failing.
        | Err(EvalError::Series(SeriesError::NormalizeEmptyResult)) => {
            Ok(Value::SeriesList(vec![]))
        }
        | other => other,
    }
}

pub(super) fn average_series(args: &mut Args) -> Result<Value, EvalError> {
    rowwise(
        args,
        |list| format!("averageSeries({})", format_path_expressions(list)),
        |row| safe_div(safe_sum(row), Some(safe_len(row) as f64)),
    )
}

pub(super) fn stddev_series(args: &mut Args) -> Result<Value, EvalError> {
    rowwise(
        args,
        |list| format!("stddevSeries({})", format_path_expressions(list)),
        |row| safe_std_dev(row),
    )
}

pub(super) fn min_series(args: &mut Args) -> Result<Value, EvalError> {
    rowwise(
        args,
        |list| format!("minSeries({})", format_path_expressions(list)),
        |row| safe_min(row),
    )
}

pub(super) fn max_series(args: &mut Args) -> Result<Value, EvalError> {
    rowwise(
        args,
        |list| format!("maxSeries({})", format_path_expressions(list)),
        |row| safe_max(row),
    )
}

pub(super) fn range_of_series(args: &mut Args) -> Result<Value, EvalError> {
    rowwise(
        args,
        |list| format!("rangeOfSeries({})", format_path_expressions(list)),
        |row| safe_subtract(safe_max(row), safe_min(row)),
    )
}

pub(super) fn diff_series(args: &mut Args) -> Result<Value, EvalError> {
    rowwise(
        args,
        |list| format!("diffSeries({})", format_path_expressions(list)),
        |row| safe_diff(row),
    )
}

pub(super) fn multiply_series(args: &mut Args) -> Result<Value, EvalError> {
    let series_lists = args.series_lists_rest()?;
    let (series_list, start, end, step) = normalize(series_lists)?;
    if series_list.len() == 1 {
        return Ok(Value::SeriesList(series_list));
    }
    let name = format!(
        "multiplySeries({})",
        series_list
            .iter()
            .map(|s| s.name.clone())
            .collect::<Vec<_>>()
            .join(",")
    );
    let values = zipped_rows(&series_list)
        .iter()
        .map(|row| safe_mul(row))
        .collect();
    Ok(combined(name, start, end, step, values))
}

pub(super) fn count_series(args: &mut Args) -> Result<Value, EvalError> {
    rowwise(
        args,
        |list| format!("countSeries({})", format_path_expressions(list)),
        |row| Some(row.len() as f64),
    )
}

pub(super) fn divide_series(args: &mut Args) -> Result<Value, EvalError> {
    let dividends = args.series_list("dividendSeriesList")?;
    let divisors = args.series_list("divisorSeries")?;
    if divisors.len() != 1 {
        return Err(args.bad(
            "second argument must reference exactly 1 series",
        ));
    }
    let divisor = &divisors[0];

    let mut results = Vec::with_capacity(dividends.len());
    for dividend in dividends {
        let name =
            format!("divideSeries({},{})", dividend.name, divisor.name);
        let pair = vec![dividend, divisor.clone()];
        let (pair, start, end, step) = normalize(vec![pair])?;
        let values = zipped_rows(&pair)
            .iter()
            .map(|row| safe_div(row[0], row[1]))
            .collect();
        results.push(Series::new(name, start, end, step, values));
    }
    Ok(Value::SeriesList(results))
}

pub(super) fn percentile_of_series(
    args: &mut Args,
) -> Result<Value, EvalError> {
    let series_list = args.series_list("seriesList")?;
    let n = args.f64("n")?;
    let interpolate = args.bool_or("interpolate", false)?;
    if n <= 0.0 {
        return Err(args.bad(
            "the requested percent is required to be greater than 0",
        ));
    }
    let path = series_list
        .first()
        .map(|s| s.path_expression.clone())
        .unwrap_or_default();
    let name = format!("percentileOfSeries({path},{})", super::fmt_g(n));
    let (series_list, start, end, step) = normalize(vec![series_list])?;
    let values = zipped_rows(&series_list)
        .iter()
        .map(|row| get_percentile(row, n, interpolate))
        .collect();
    Ok(combined(name, start, end, step, values))
}

pub(super) fn as_percent(args: &mut Args) -> Result<Value, EvalError> {
    let series_list = args.series_list("seriesList")?;
    let total = args.take("total");

    let (series_list, ..) = normalize(vec![series_list])?;
    let (total_values, total_text): (Vec<Option<f64>>, Option<String>) =
        match total {
            | None => {
                let rows = zipped_rows(&series_list);
                (rows.iter().map(|row| safe_sum(row)).collect(), None)
            }
            | Some(Value::SeriesList(total_list)) => {
                if total_list.len() != 1 {
                    return Err(args.bad(
                        "second argument must reference exactly 1 series",
                    ));
                }
                let mut group = series_list.clone();
                group.push(total_list[0].clone());
                let (group, ..) = normalize(vec![group])?;
                let total_series = group.last().unwrap();
                (total_series.points(), Some(total_series.name.clone()))
            }
            | Some(Value::Int(v)) => {
                let len =
                    series_list.first().map(|s| s.values.len()).unwrap_or(0);
                (vec![Some(v as f64); len], Some(v.to_string()))
            }
            | Some(Value::Float(v)) => {
                let len =
                    series_list.first().map(|s| s.values.len()).unwrap_or(0);
                (vec![Some(v); len], Some(super::fmt_g(v)))
            }
            | Some(_) => {
                return Err(
                    args.bad("'total' must be a series or a number")
                )
            }
        };

    let mut results = Vec::with_capacity(series_list.len());
    for series in &series_list {
        let values = series
            .points()
            .iter()
            .zip(total_values.iter())
            .map(|(value, total)| {
                safe_mul(&[safe_div(*value, *total), Some(100.0)])
            })
            .collect();
        let reference = total_text
            .clone()
            .unwrap_or_else(|| series.path_expression.clone());
        let name = format!("asPercent({}, {reference})", series.name);
        let mut result =
            Series::new(name, series.start, series.end, series.step, values);
        result.consolidation = series.consolidation;
        results.push(result);
    }
    Ok(Value::SeriesList(results))
}
