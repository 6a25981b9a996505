use super::{safe_avg, safe_max, safe_min, Args};
use crate::attime::parse_time_offset;
use crate::context::RequestContext;
use crate::evaluator::{evaluate_target, EvalError, Value};
use crate::series::Series;

/// Re-reads each input series over `[start - seconds, start]` in bootstrap
/// mode and splices the prefix in front of the original values. The last
/// bootstrap bucket overlaps the first original bucket and is dropped.
pub(super) async fn fetch_with_bootstrap(
    ctx: &mut RequestContext,
    series_list: &[Series],
    seconds: i64,
) -> Result<Vec<Series>, EvalError> {
    let mut bootstrap_ctx = ctx.bootstrap_window(seconds);
    let mut bootstraps: Vec<Series> = Vec::new();
    let mut fetched: Vec<String> = Vec::new();
    for series in series_list {
        if fetched.contains(&series.path_expression) {
            // One path expression can resolve to several series; a single
            // fetch already brought all of them.
            continue;
        }
        fetched.push(series.path_expression.clone());
        let more =
            evaluate_target(&mut bootstrap_ctx, &series.path_expression)
                .await?;
        bootstraps.extend(more);
    }

    let mut combined_list = Vec::with_capacity(series_list.len());
    for (bootstrap, original) in bootstraps.iter().zip(series_list.iter()) {
        let mut prefix: Vec<Option<f64>> =
            if bootstrap.step != original.step && original.step > 0 {
                let ratio = (bootstrap.step / original.step).max(1) as usize;
                bootstrap
                    .values
                    .iter()
                    .flat_map(|value| std::iter::repeat(*value).take(ratio))
                    .collect()
            } else {
                bootstrap.values.clone()
            };
        prefix.pop();

        let mut values = prefix;
        values.extend(original.values.iter().cloned());
        let mut combined = Series::new(
            original.name.clone(),
            bootstrap.start,
            original.end,
            original.step,
            values,
        );
        combined.path_expression = original.path_expression.clone();
        combined.consolidation = original.consolidation;
        combined_list.push(combined);
    }
    ctx.absorb(bootstrap_ctx);
    Ok(combined_list)
}

struct Window {
    points: usize,
    seconds: i64,
    label: String,
}

fn window_of(
    args: &Args,
    size: &Value,
    max_step: i64,
) -> Result<Window, EvalError> {
    match size {
        | Value::Int(count) => {
            let points = usize::try_from(*count)
                .map_err(|_| args.bad("window size must be positive"))?;
            Ok(Window {
                points,
                seconds: max_step * *count,
                label: count.to_string(),
            })
        }
        | Value::Str(span) => {
            let seconds = parse_time_offset(span)?.abs();
            Ok(Window {
                points: 0, // per-series, filled in from the step
                seconds,
                label: format!("\"{span}\""),
            })
        }
        | _ => Err(args.bad("window size must be a count or a time span")),
    }
}

pub(super) async fn moving_average(
    ctx: &mut RequestContext,
    args: &mut Args,
) -> Result<Value, EvalError> {
    let series_list = args.series_list("seriesList")?;
    let size = args.count_or_span("windowSize")?;
    let func = args.string_or("func", "avg")?;
    let aggregate = match func.as_str() {
        | "avg" => safe_avg,
        | "min" => safe_min,
        | "max" => safe_max,
        | other => {
            return Err(
                args.bad(format!("unknown window function '{other}'"))
            )
        }
    };
    if series_list.is_empty() {
        return Ok(Value::SeriesList(vec![]));
    }

    let max_step = series_list.iter().map(|s| s.step).max().unwrap_or(60);
    let window = window_of(args, &size, max_step)?;
    let bootstrap_list =
        fetch_with_bootstrap(ctx, &series_list, window.seconds).await?;

    let mut results = Vec::with_capacity(series_list.len());
    for (bootstrap, series) in bootstrap_list.iter().zip(series_list.iter())
    {
        let window_points = if window.points > 0 {
            window.points
        } else {
            (window.seconds / series.step.max(1)) as usize
        };
        let name =
            format!("movingAverage({},{})", series.name, window.label);
        let offset = bootstrap.values.len() - series.values.len();
        let mut values = Vec::with_capacity(series.values.len());
        for i in 0..series.values.len() {
            let hi = i + offset + 1;
            let lo = hi.saturating_sub(window_points);
            values.push(aggregate(&bootstrap.values[lo..hi]));
        }
        let mut result = Series::new(
            name,
            series.start,
            series.end,
            series.step,
            values,
        );
        result.consolidation = series.consolidation;
        results.push(result);
    }
    Ok(Value::SeriesList(results))
}

pub(super) async fn moving_median(
    ctx: &mut RequestContext,
    args: &mut Args,
) -> Result<Value, EvalError> {
    let series_list = args.series_list("seriesList")?;
    let size = args.count_or_span("windowSize")?;
    if series_list.is_empty() {
        return Ok(Value::SeriesList(vec![]));
    }

    let max_step = series_list.iter().map(|s| s.step).max().unwrap_or(60);
    let window = window_of(args, &size, max_step)?;
    let bootstrap_list =
        fetch_with_bootstrap(ctx, &series_list, window.seconds).await?;

    let mut results = Vec::with_capacity(series_list.len());
    for (bootstrap, series) in bootstrap_list.iter().zip(series_list.iter())
    {
        let window_points = if window.points > 0 {
            window.points
        } else {
            (window.seconds / series.step.max(1)) as usize
        };
        let name = match &size {
            | Value::Str(span) => {
                format!("movingMedian({},\"{span}\")", series.name)
            }
            | _ => format!("movingMedian({},{window_points})", series.name),
        };
        let offset = bootstrap.values.len() - series.values.len();
        let mut values = Vec::with_capacity(series.values.len());
        for i in 0..series.values.len() {
            // The median window excludes the current point.
            let hi = i + offset;
            let lo = hi.saturating_sub(window_points);
            let mut sorted: Vec<f64> = bootstrap.values[lo..hi]
                .iter()
                .filter_map(|v| *v)
                .collect();
            sorted.sort_by(f64::total_cmp);
            if sorted.is_empty() {
                values.push(None);
            } else {
                values.push(Some(sorted[sorted.len() / 2]));
            }
        }
        let mut result = Series::new(
            name,
            series.start,
            series.end,
            series.step,
            values,
        );
        result.consolidation = series.consolidation;
        results.push(result);
    }
    Ok(Value::SeriesList(results))
}
