use chrono::{DateTime, Timelike, Utc};

use super::{fmt_g, safe_avg, safe_max, safe_min, Args};
use crate::attime::{parse_at_time, parse_time_offset};
use crate::context::RequestContext;
use crate::evaluator::{evaluate_target, EvalError, Value};
use crate::series::Series;

const MINUTE: i64 = 60;
const HOUR: i64 = 3600;
const DAY: i64 = 86400;

fn bucket_aggregate(bucket: &[f64], func: &str) -> f64 {
    match func {
        | "avg" => bucket.iter().sum::<f64>() / bucket.len() as f64,
        | "last" => bucket[bucket.len() - 1],
        | "max" => bucket.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        | "min" => bucket.iter().cloned().fold(f64::INFINITY, f64::min),
        | _ => bucket.iter().sum(),
    }
}

pub(super) fn summarize(args: &mut Args) -> Result<Value, EvalError> {
    let series_list = args.series_list("seriesList")?;
    let interval_string = args.string("intervalString")?;
    let func = args.string_or("func", "sum")?;
    let align_to_from = args.bool_or("alignToFrom", false)?;
    let interval = parse_time_offset(&interval_string)?;
    if interval <= 0 {
        return Err(args.bad("interval must be positive"));
    }

    let mut results = Vec::with_capacity(series_list.len());
    for series in &series_list {
        let mut buckets: std::collections::HashMap<i64, Vec<f64>> =
            std::collections::HashMap::new();
        let mut timestamp = series.start;
        for value in &series.values {
            let bucket = if align_to_from {
                (timestamp - series.start) / interval
            } else {
                timestamp - timestamp.rem_euclid(interval)
            };
            if let Some(value) = value {
                buckets.entry(bucket).or_default().push(*value);
            }
            timestamp += series.step;
        }

        let (new_start, range_end) = if align_to_from {
            (series.start, series.end)
        } else {
            (
                series.start - series.start.rem_euclid(interval),
                series.end - series.end.rem_euclid(interval) + interval,
            )
        };

        let mut new_values = Vec::new();
        let mut new_end = range_end;
        let mut ts = new_start;
        while ts < range_end {
            let bucket = if align_to_from {
                new_end = ts;
                (ts - series.start) / interval
            } else {
                ts - ts.rem_euclid(interval)
            };
            match buckets.get(&bucket) {
                | Some(bucket) if !bucket.is_empty() => {
                    new_values.push(Some(bucket_aggregate(bucket, &func)));
                }
                | _ => new_values.push(None),
            }
            ts += interval;
        }
        if align_to_from {
            new_end += interval;
        }

        let suffix = if align_to_from { ", true" } else { "" };
        let name = format!(
            "summarize({}, \"{interval_string}\", \"{func}\"{suffix})",
            series.name
        );
        results.push(Series::new(
            name, new_start, new_end, interval, new_values,
        ));
    }
    Ok(Value::SeriesList(results))
}

fn align_to_interval(start: i64, interval: i64) -> i64 {
    let Some(date) = DateTime::<Utc>::from_timestamp(start, 0) else {
        return start;
    };
    let aligned = if interval >= DAY {
        date.date_naive().and_hms_opt(0, 0, 0)
    } else if interval >= HOUR {
        date.date_naive().and_hms_opt(date.hour(), 0, 0)
    } else if interval >= MINUTE {
        date.date_naive().and_hms_opt(date.hour(), date.minute(), 0)
    } else {
        None
    };
    aligned
        .map(|naive| naive.and_utc().timestamp())
        .unwrap_or(start)
}

pub(super) async fn smart_summarize(
    ctx: &mut RequestContext,
    args: &mut Args,
) -> Result<Value, EvalError> {
    let series_list = args.series_list("seriesList")?;
    let interval_string = args.string("intervalString")?;
    let func = args.string_or("func", "sum")?;
    let _ = args.bool_or("alignToFrom", false)?;
    let interval = parse_time_offset(&interval_string)?;
    if interval <= 0 {
        return Err(args.bad("interval must be positive"));
    }

    // Re-fetch from an interval-aligned start so buckets line up with
    // wall-clock boundaries.
    let aligned_start = align_to_interval(ctx.start_time, interval);
    let mut refetched = Vec::with_capacity(series_list.len());
    for series in &series_list {
        let mut aligned_ctx = ctx.shifted(aligned_start, ctx.end_time);
        let mut fetched =
            evaluate_target(&mut aligned_ctx, &series.path_expression)
                .await?;
        ctx.absorb(aligned_ctx);
        if fetched.is_empty() {
            continue;
        }
        refetched.push(fetched.remove(0));
    }

    let mut results = Vec::with_capacity(refetched.len());
    for series in &refetched {
        let mut buckets: std::collections::HashMap<i64, Vec<f64>> =
            std::collections::HashMap::new();
        let mut last_bucket = 0;
        let mut timestamp = series.start;
        for value in &series.values {
            if timestamp >= series.end {
                break;
            }
            let bucket = (timestamp - series.start) / interval;
            last_bucket = bucket;
            if let Some(value) = value {
                buckets.entry(bucket).or_default().push(*value);
            }
            timestamp += series.step;
        }

        let mut new_values = Vec::new();
        let mut ts = series.start;
        while ts < series.end {
            let bucket = (ts - series.start) / interval;
            match buckets.get(&bucket) {
                | Some(bucket) if !bucket.is_empty() => {
                    new_values.push(Some(bucket_aggregate(bucket, &func)));
                }
                | _ => new_values.push(None),
            }
            ts += interval;
        }

        let aligned_end = series.start + last_bucket * interval + interval;
        let name = format!(
            "smartSummarize({}, \"{interval_string}\", \"{func}\")",
            series.name
        );
        results.push(Series::new(
            name,
            series.start,
            aligned_end,
            interval,
            new_values,
        ));
    }
    Ok(Value::SeriesList(results))
}

pub(super) async fn hitcount(
    ctx: &mut RequestContext,
    args: &mut Args,
) -> Result<Value, EvalError> {
    let mut series_list = args.series_list("seriesList")?;
    let interval_string = args.string("intervalString")?;
    let align_to_interval_flag = args.bool_or("alignToInterval", false)?;
    let interval = parse_time_offset(&interval_string)?;
    if interval <= 0 {
        return Err(args.bad("interval must be positive"));
    }

    if align_to_interval_flag {
        let aligned_start = align_to_interval(ctx.start_time, interval);
        let mut aligned = Vec::with_capacity(series_list.len());
        for series in &series_list {
            let mut aligned_ctx = ctx.shifted(aligned_start, ctx.end_time);
            let mut fetched =
                evaluate_target(&mut aligned_ctx, &series.path_expression)
                    .await?;
            ctx.absorb(aligned_ctx);
            if fetched.is_empty() {
                continue;
            }
            let mut refetched = fetched.remove(0);
            let interval_count = (series.end - series.start) / interval;
            refetched.end =
                refetched.start + interval_count * interval + interval;
            aligned.push(refetched);
        }
        series_list = aligned;
    }

    let mut results = Vec::with_capacity(series_list.len());
    for series in &series_list {
        let step = series.step.max(1);
        let bucket_count = (((series.end - series.start) as f64)
            / interval as f64)
            .ceil() as i64;
        let bucket_count = bucket_count.max(0) as usize;
        let mut buckets: Vec<Vec<f64>> = vec![Vec::new(); bucket_count];
        let new_start = series.end - bucket_count as i64 * interval;

        for (i, value) in series.values.iter().enumerate() {
            let Some(value) = value else {
                continue;
            };
            let start_time = series.start + i as i64 * step;
            let (start_bucket, start_mod) = (
                (start_time - new_start).div_euclid(interval),
                (start_time - new_start).rem_euclid(interval),
            );
            let end_time = start_time + step;
            let (mut end_bucket, mut end_mod) = (
                (end_time - new_start).div_euclid(interval),
                (end_time - new_start).rem_euclid(interval),
            );
            if end_bucket >= bucket_count as i64 {
                end_bucket = bucket_count as i64 - 1;
                end_mod = interval;
            }

            if start_bucket == end_bucket {
                if start_bucket >= 0 {
                    buckets[start_bucket as usize]
                        .push(value * (end_mod - start_mod) as f64);
                }
            } else {
                if start_bucket >= 0 {
                    buckets[start_bucket as usize]
                        .push(value * (interval - start_mod) as f64);
                }
                let hits_per_bucket = value * interval as f64;
                for bucket in
                    buckets.iter_mut().take(end_bucket.max(0) as usize).skip(
                        (start_bucket + 1).max(0) as usize,
                    )
                {
                    bucket.push(hits_per_bucket);
                }
                if end_mod > 0 && end_bucket >= 0 {
                    buckets[end_bucket as usize]
                        .push(value * end_mod as f64);
                }
            }
        }

        let new_values: Vec<Option<f64>> = buckets
            .iter()
            .map(|bucket| {
                if bucket.is_empty() {
                    None
                } else {
                    Some(bucket.iter().sum())
                }
            })
            .collect();

        let suffix = if align_to_interval_flag { ", true" } else { "" };
        let name = format!(
            "hitcount({}, \"{interval_string}\"{suffix})",
            series.name
        );
        results.push(Series::new(
            name, new_start, series.end, interval, new_values,
        ));
    }
    Ok(Value::SeriesList(results))
}

pub(super) async fn time_shift(
    ctx: &mut RequestContext,
    args: &mut Args,
) -> Result<Value, EvalError> {
    let series_list = args.series_list("seriesList")?;
    let mut shift = args.string("timeShift")?;
    let reset_end = args.bool_or("resetEnd", true)?;
    // An unsigned shift means looking backwards.
    if shift.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        shift = format!("-{shift}");
    }
    let delta = parse_time_offset(&shift)?;

    let Some(series) = series_list.first() else {
        return Ok(Value::SeriesList(vec![]));
    };

    let mut shifted_ctx =
        ctx.shifted(ctx.start_time + delta, ctx.end_time + delta);
    let shifted =
        evaluate_target(&mut shifted_ctx, &series.path_expression).await?;
    ctx.absorb(shifted_ctx);

    let mut results = Vec::with_capacity(shifted.len());
    for mut shifted_series in shifted {
        shifted_series.name =
            format!("timeShift({}, {shift})", shifted_series.name);
        if reset_end {
            shifted_series.end = series.end;
        } else {
            shifted_series.end =
                shifted_series.end - shifted_series.start + series.start;
        }
        shifted_series.start = series.start;
        results.push(shifted_series);
    }
    Ok(Value::SeriesList(results))
}

pub(super) async fn time_stack(
    ctx: &mut RequestContext,
    args: &mut Args,
) -> Result<Value, EvalError> {
    let series_list = args.series_list("seriesList")?;
    let mut shift_unit = args.string("timeShiftUnit")?;
    let shift_start = args.i64("timeShiftStart")?;
    let shift_end = args.i64("timeShiftEnd")?;
    if shift_unit.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        shift_unit = format!("-{shift_unit}");
    }
    let delta = parse_time_offset(&shift_unit)?;

    let Some(series) = series_list.first() else {
        return Ok(Value::SeriesList(vec![]));
    };

    let mut results = Vec::new();
    for shift in shift_start..shift_end {
        let inner_delta = delta * shift;
        let mut shifted_ctx = ctx.shifted(
            ctx.start_time + inner_delta,
            ctx.end_time + inner_delta,
        );
        let shifted =
            evaluate_target(&mut shifted_ctx, &series.path_expression)
                .await?;
        ctx.absorb(shifted_ctx);
        for mut shifted_series in shifted {
            shifted_series.name = format!(
                "timeShift({}, {shift_unit}, {shift})",
                shifted_series.name
            );
            shifted_series.start = series.start;
            shifted_series.end = series.end;
            results.push(shifted_series);
        }
    }
    Ok(Value::SeriesList(results))
}

pub(super) fn time_slice(
    ctx: &mut RequestContext,
    args: &mut Args,
) -> Result<Value, EvalError> {
    let mut series_list = args.series_list("seriesList")?;
    let start_ref = args.string("startSliceAt")?;
    let end_ref = args.string_or("endSliceAt", "now")?;
    let slice_start = parse_at_time(&start_ref, ctx.end_time)?;
    let slice_end = parse_at_time(&end_ref, ctx.end_time)?;

    for series in series_list.iter_mut() {
        series.name = format!(
            "timeSlice({}, {slice_start}, {slice_end})",
            series.name
        );
        let mut current = ctx.start_time;
        for value in series.values.iter_mut() {
            if current < slice_start || current > slice_end {
                *value = None;
            }
            current += series.step;
        }
    }
    Ok(Value::SeriesList(series_list))
}

pub(super) fn constant_line(
    ctx: &mut RequestContext,
    args: &mut Args,
) -> Result<Value, EvalError> {
    let value = args.f64("value")?;
    let start = ctx.start_time;
    let end = ctx.end_time;
    let step = (end - start).max(1);
    let mut series = Series::new(
        fmt_g(value),
        start,
        end,
        step,
        vec![Some(value), Some(value)],
    );
    series.path_expression = format!("constantLine({})", fmt_g(value));
    Ok(Value::SeriesList(vec![series]))
}

pub(super) fn threshold(
    ctx: &mut RequestContext,
    args: &mut Args,
) -> Result<Value, EvalError> {
    let value = args.f64("value")?;
    let label = args.opt_string("label")?;
    let _color = args.opt_string("color")?;
    let mut args2 =
        Args::new("constantLine", vec![Value::Float(value)], vec![]);
    let Value::SeriesList(mut list) = constant_line(ctx, &mut args2)? else {
        unreachable!();
    };
    if let Some(label) = label {
        list[0].name = label;
    }
    Ok(Value::SeriesList(list))
}

pub(super) fn aggregate_line(
    ctx: &mut RequestContext,
    args: &mut Args,
) -> Result<Value, EvalError> {
    let series_list = args.series_list("seriesList")?;
    let func = args.string_or("func", "avg")?;
    let series = series_list
        .first()
        .ok_or_else(|| args.bad("no series to aggregate"))?;
    let value = match func.as_str() {
        | "avg" => safe_avg(&series.values),
        | "min" => safe_min(&series.values),
        | "max" => safe_max(&series.values),
        | other => {
            return Err(args.bad(format!("invalid function {other}")))
        }
    }
    .ok_or_else(|| args.bad("series has no values to aggregate"))?;

    let mut args2 =
        Args::new("constantLine", vec![Value::Float(value)], vec![]);
    let Value::SeriesList(mut list) = constant_line(ctx, &mut args2)? else {
        unreachable!();
    };
    list[0].name = format!(
        "aggregateLine({},{})",
        series.path_expression, value as i64
    );
    Ok(Value::SeriesList(list))
}

pub(super) fn time_function(
    ctx: &mut RequestContext,
    args: &mut Args,
) -> Result<Value, EvalError> {
    let name = args.string("name")?;
    let step = args.f64_or("step", 60.0)? as i64;
    if step <= 0 {
        return Err(args.bad("step must be positive"));
    }
    let mut values = Vec::new();
    let mut when = ctx.start_time;
    while when < ctx.end_time {
        values.push(Some(when as f64));
        when += step;
    }
    let series =
        Series::new(name, ctx.start_time, ctx.end_time, step, values);
    Ok(Value::SeriesList(vec![series]))
}

pub(super) fn sin_function(
    ctx: &mut RequestContext,
    args: &mut Args,
) -> Result<Value, EvalError> {
    let name = args.string("name")?;
    let amplitude = args.f64_or("amplitude", 1.0)?;
    let step = args.f64_or("step", 60.0)? as i64;
    if step <= 0 {
        return Err(args.bad("step must be positive"));
    }
    let mut values = Vec::new();
    let mut when = ctx.start_time;
    while when < ctx.end_time {
        values.push(Some((when as f64).sin() * amplitude));
        when += step;
    }
    let series =
        Series::new(name, ctx.start_time, ctx.end_time, step, values);
    Ok(Value::SeriesList(vec![series]))
}

pub(super) fn random_walk(
    ctx: &mut RequestContext,
    args: &mut Args,
) -> Result<Value, EvalError> {
    let name = args.string("name")?;
    let step = args.f64_or("step", 60.0)? as i64;
    if step <= 0 {
        return Err(args.bad("step must be positive"));
    }
    let mut values = Vec::new();
    let mut current = 0.0f64;
    let mut when = ctx.start_time;
    while when < ctx.end_time {
        values.push(Some(current));
        current += rand::random::<f64>() - 0.5;
        when += step;
    }
    let series =
        Series::new(name, ctx.start_time, ctx.end_time, step, values);
    Ok(Value::SeriesList(vec![series]))
}

pub(super) fn identity(
    ctx: &mut RequestContext,
    args: &mut Args,
) -> Result<Value, EvalError> {
    let name = args.string("name")?;
    let step = 60;
    let values = (ctx.start_time..ctx.end_time)
        .step_by(step as usize)
        .map(|ts| Some(ts as f64))
        .collect();
    let mut series =
        Series::new(name.clone(), ctx.start_time, ctx.end_time, step, values);
    series.path_expression = format!("identity(\"{name}\")");
    Ok(Value::SeriesList(vec![series]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::Args;

    fn series_from(
        start: i64,
        step: i64,
        values: &[Option<f64>],
    ) -> Series {
        Series::new(
            "m",
            start,
            start + step * values.len() as i64,
            step,
            values.to_vec(),
        )
    }

    fn run_summarize(
        series: Series,
        interval: &str,
        func: &str,
        align: bool,
    ) -> Series {
        let mut args = Args::new(
            "summarize",
            vec![
                Value::SeriesList(vec![series]),
                Value::Str(interval.into()),
                Value::Str(func.into()),
                Value::Bool(align),
            ],
            vec![],
        );
        match summarize(&mut args).unwrap() {
            | Value::SeriesList(mut list) => list.remove(0),
            | _ => panic!("expected series list"),
        }
    }

    #[test]
    fn summarize_sums_buckets() {
        // Three one-minute samples inside one aligned ten-minute bucket.
        let start = 1_200;
        let series = series_from(
            start,
            60,
            &[Some(10.0), Some(20.0), Some(30.0)],
        );
        let result = run_summarize(series, "10min", "sum", false);
        assert_eq!(result.name, "summarize(m, \"10min\", \"sum\")");
        assert_eq!(result.step, 600);
        assert_eq!(result.values[0], Some(60.0));
    }

    #[test]
    fn summarize_min_keeps_smallest() {
        let series = series_from(600, 60, &[Some(10.0), Some(4.0)]);
        let result = run_summarize(series, "10min", "min", false);
        assert_eq!(result.values[0], Some(4.0));
    }

    #[test]
    fn constant_line_spans_the_window() {
        let store = std::sync::Arc::new(lib::store::MemoryStore::new());
        let mut ctx = RequestContext::new(store, 0, 600);
        let mut args =
            Args::new("constantLine", vec![Value::Int(42)], vec![]);
        match constant_line(&mut ctx, &mut args).unwrap() {
            | Value::SeriesList(list) => {
                assert_eq!(list[0].name, "42");
                assert_eq!(list[0].values, vec![Some(42.0), Some(42.0)]);
                assert_eq!(
                    list[0].path_expression,
                    "constantLine(42)"
                );
            }
            | _ => panic!("expected series list"),
        }
    }
}
