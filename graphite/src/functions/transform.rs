use super::{fmt_g, safe_abs, safe_min, safe_mul, safe_pow, Args};
use crate::evaluator::{EvalError, Value};
use crate::series::{Consolidation, Series};

fn mapped(
    args: &mut Args,
    rename: impl Fn(&str) -> String,
    map: impl Fn(&Series, usize, Option<f64>) -> Option<f64>,
) -> Result<Value, EvalError> {
    let mut series_list = args.series_list("seriesList")?;
    for series in series_list.iter_mut() {
        let values: Vec<Option<f64>> = series
            .values
            .iter()
            .enumerate()
            .map(|(i, v)| map(series, i, *v))
            .collect();
        series.values = values;
        series.set_name(rename(&series.name));
    }
    Ok(Value::SeriesList(series_list))
}

fn derived(
    args: &mut Args,
    rename: impl Fn(&str) -> String,
    derive: impl Fn(&Series) -> Vec<Option<f64>>,
) -> Result<Value, EvalError> {
    let series_list = args.series_list("seriesList")?;
    let mut results = Vec::with_capacity(series_list.len());
    for series in &series_list {
        let values = derive(series);
        let mut result = Series::new(
            rename(&series.name),
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

pub(super) fn scale(args: &mut Args) -> Result<Value, EvalError> {
    let mut series_list = args.series_list("seriesList")?;
    let factor = args.f64("factor")?;
    for series in series_list.iter_mut() {
        series.set_name(format!("scale({},{})", series.name, fmt_g(factor)));
        for value in series.values.iter_mut() {
            *value = safe_mul(&[*value, Some(factor)]);
        }
    }
    Ok(Value::SeriesList(series_list))
}

pub(super) fn scale_to_seconds(args: &mut Args) -> Result<Value, EvalError> {
    let mut series_list = args.series_list("seriesList")?;
    let seconds = args.f64("seconds")?;
    for series in series_list.iter_mut() {
        series.set_name(format!(
            "scaleToSeconds({},{})",
            series.name,
            fmt_g(seconds)
        ));
        let factor = seconds / series.step as f64;
        for value in series.values.iter_mut() {
            *value = safe_mul(&[*value, Some(factor)]);
        }
    }
    Ok(Value::SeriesList(series_list))
}

pub(super) fn offset(args: &mut Args) -> Result<Value, EvalError> {
    let mut series_list = args.series_list("seriesList")?;
    let factor = args.f64("factor")?;
    for series in series_list.iter_mut() {
        series
            .set_name(format!("offset({},{})", series.name, fmt_g(factor)));
        for value in series.values.iter_mut() {
            *value = value.map(|v| v + factor);
        }
    }
    Ok(Value::SeriesList(series_list))
}

pub(super) fn offset_to_zero(args: &mut Args) -> Result<Value, EvalError> {
    let mut series_list = args.series_list("seriesList")?;
    for series in series_list.iter_mut() {
        series.set_name(format!("offsetToZero({})", series.name));
        let minimum = safe_min(&series.values);
        if let Some(minimum) = minimum {
            for value in series.values.iter_mut() {
                *value = value.map(|v| v - minimum);
            }
        }
    }
    Ok(Value::SeriesList(series_list))
}

pub(super) fn pow(args: &mut Args) -> Result<Value, EvalError> {
    let series_list = args.series_list("seriesList")?;
    let factor = args.f64("factor")?;
    let mut args2 = Args::new(
        "pow",
        vec![Value::SeriesList(series_list)],
        vec![],
    );
    mapped(
        &mut args2,
        |name| format!("pow({name},{})", fmt_g(factor)),
        |_, _, value| safe_pow(value, factor),
    )
}

pub(super) fn square_root(args: &mut Args) -> Result<Value, EvalError> {
    mapped(
        args,
        |name| format!("squareRoot({name})"),
        |_, _, value| safe_pow(value, 0.5),
    )
}

pub(super) fn invert(args: &mut Args) -> Result<Value, EvalError> {
    mapped(
        args,
        |name| format!("invert({name})"),
        |_, _, value| safe_pow(value, -1.0),
    )
}

pub(super) fn absolute(args: &mut Args) -> Result<Value, EvalError> {
    mapped(
        args,
        |name| format!("absolute({name})"),
        |_, _, value| safe_abs(value),
    )
}

pub(super) fn derivative(args: &mut Args) -> Result<Value, EvalError> {
    derived(
        args,
        |name| format!("derivative({name})"),
        |series| {
            let mut previous: Option<f64> = None;
            series
                .values
                .iter()
                .map(|value| {
                    let delta = match (previous, value) {
                        | (Some(prev), Some(v)) => Some(v - prev),
                        | _ => None,
                    };
                    previous = *value;
                    delta
                })
                .collect()
        },
    )
}

pub(super) fn per_second(args: &mut Args) -> Result<Value, EvalError> {
    let series_list = args.series_list("seriesList")?;
    let max_value = args.opt_f64("maxValue")?;
    let mut args2 =
        Args::new("perSecond", vec![Value::SeriesList(series_list)], vec![]);
    derived(
        &mut args2,
        |name| format!("perSecond({name})"),
        |series| {
            let step = series.step as f64;
            let mut previous: Option<f64> = None;
            series
                .values
                .iter()
                .map(|value| {
                    let rate = match (previous, value) {
                        | (Some(prev), Some(v)) => {
                            let diff = v - prev;
                            if diff >= 0.0 {
                                Some(diff / step)
                            } else if max_value.is_some_and(|max| max >= *v) {
                                max_value.map(|max| {
                                    ((max - prev) + v + 1.0) / step
                                })
                            } else {
                                None
                            }
                        }
                        | _ => None,
                    };
                    previous = *value;
                    rate
                })
                .collect()
        },
    )
}

pub(super) fn non_negative_derivative(
    args: &mut Args,
) -> Result<Value, EvalError> {
    let series_list = args.series_list("seriesList")?;
    let max_value = args.opt_f64("maxValue")?;
    let mut args2 = Args::new(
        "nonNegativeDerivative",
        vec![Value::SeriesList(series_list)],
        vec![],
    );
    derived(
        &mut args2,
        |name| format!("nonNegativeDerivative({name})"),
        |series| {
            let mut previous: Option<f64> = None;
            series
                .values
                .iter()
                .map(|value| {
                    let delta = match (previous, value) {
                        | (Some(prev), Some(v)) => {
                            let diff = v - prev;
                            if diff >= 0.0 {
                                Some(diff)
                            } else if max_value.is_some_and(|max| max >= *v) {
                                max_value.map(|max| (max - prev) + v + 1.0)
                            } else {
                                None
                            }
                        }
                        | _ => None,
                    };
                    previous = *value;
                    delta
                })
                .collect()
        },
    )
}

pub(super) fn integral(args: &mut Args) -> Result<Value, EvalError> {
    derived(
        args,
        |name| format!("integral({name})"),
        |series| {
            let mut current = 0.0;
            series
                .values
                .iter()
                .map(|value|

                    value.map(|v| {
                        current += v;
                        current
                    }))
                .collect()
        },
    )
}

pub(super) fn logarithm(args: &mut Args) -> Result<Value, EvalError> {
    let series_list = args.series_list("seriesList")?;
    let base = args.f64_or("base", 10.0)?;
    let mut args2 =
        Args::new("log", vec![Value::SeriesList(series_list)], vec![]);
    derived(
        &mut args2,
        |name| format!("log({name}, {})", fmt_g(base)),
        |series| {
            series
                .values
                .iter()
                .map(|value| match value {
                    | Some(v) if *v > 0.0 => Some(v.log(base)),
                    | _ => None,
                })
                .collect()
        },
    )
}

pub(super) fn transform_null(args: &mut Args) -> Result<Value, EvalError> {
    let series_list = args.series_list("seriesList")?;
    let default = args.f64_or("default", 0.0)?;
    let mut args2 = Args::new(
        "transformNull",
        vec![Value::SeriesList(series_list)],
        vec![],
    );
    mapped(
        &mut args2,
        |name| format!("transformNull({name},{})", fmt_g(default)),
        |_, _, value| Some(value.unwrap_or(default)),
    )
}

pub(super) fn is_non_null(args: &mut Args) -> Result<Value, EvalError> {
    mapped(
        args,
        |name| format!("isNonNull({name})"),
        |_, _, value| Some(if value.is_some() { 1.0 } else { 0.0 }),
    )
}

pub(super) fn keep_last_value(args: &mut Args) -> Result<Value, EvalError> {
    let mut series_list = args.series_list("seriesList")?;
    let limit = args.f64_or("limit", f64::INFINITY)?;
    for series in series_list.iter_mut() {
        series.set_name(format!("keepLastValue({})", series.name));
        let mut consecutive_nones = 0usize;
        for i in 0..series.values.len() {
            if i == 0 {
                continue;
            }
            if series.values[i].is_none() {
                consecutive_nones += 1;
            } else {
                if consecutive_nones > 0
                    && consecutive_nones as f64 <= limit
                {
                    let fill = series.values[i - consecutive_nones - 1];
                    for index in (i - consecutive_nones)..i {
                        series.values[index] = fill;
                    }
                }
                consecutive_nones = 0;
            }
        }
        // A trailing gap is only bridged while strictly under the limit.
        let len = series.values.len();
        if consecutive_nones > 0 && (consecutive_nones as f64) < limit {
            let fill = series.values[len - consecutive_nones - 1];
            for index in (len - consecutive_nones)..len {
                series.values[index] = fill;
            }
        }
    }
    Ok(Value::SeriesList(series_list))
}

pub(super) fn changed(args: &mut Args) -> Result<Value, EvalError> {
    let mut series_list = args.series_list("seriesList")?;
    for series in series_list.iter_mut() {
        series.set_name(format!("changed({})", series.name));
        let mut previous: Option<f64> = None;
        for value in series.values.iter_mut() {
            let current = *value;
            *value = match (previous, current) {
                | (None, _) => {
                    previous = current;
                    Some(0.0)
                }
                | (Some(prev), Some(v)) if v != prev => {
                    previous = Some(v);
                    Some(1.0)
                }
                | _ => Some(0.0),
            };
        }
    }
    Ok(Value::SeriesList(series_list))
}

pub(super) fn consolidate_by(args: &mut Args) -> Result<Value, EvalError> {
    let mut series_list = args.series_list("seriesList")?;
    let function = args.string("consolidationFunc")?;
    let consolidation = Consolidation::from_name(&function)
        .map_err(|e| args.bad(e.to_string()))?;
    for series in series_list.iter_mut() {
        series.consolidation = consolidation;
        series.set_name(format!(
            "consolidateBy({},\"{function}\")",
            series.name
        ));
    }
    Ok(Value::SeriesList(series_list))
}

pub(super) fn cumulative(args: &mut Args) -> Result<Value, EvalError> {
    let series_list = args.series_list("seriesList")?;
    let mut args2 = Args::new(
        "consolidateBy",
        vec![
            Value::SeriesList(series_list),
            Value::Str("sum".to_string()),
        ],
        vec![],
    );
    consolidate_by(&mut args2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::Args;

    fn series(values: &[Option<f64>]) -> Series {
        Series::new("m", 0, 60 * values.len() as i64, 60, values.to_vec())
    }

    fn apply(
        f: impl Fn(&mut Args) -> Result<Value, EvalError>,
        values: &[Option<f64>],
        extra: Vec<Value>,
    ) -> Series {
        let mut args_vec = vec![Value::SeriesList(vec![series(values)])];
        args_vec.extend(extra);
        let mut args = Args::new("test", args_vec, vec![]);
        match f(&mut args).unwrap() {
            | Value::SeriesList(mut list) => list.remove(0),
            | _ => panic!("expected series list"),
        }
    }

    #[test]
    fn scale_multiplies_and_renames() {
        let result = apply(
            scale,
            &[Some(1.0), None, Some(3.0)],
            vec![Value::Int(10)],
        );
        assert_eq!(result.name, "scale(m,10)");
        assert_eq!(result.values, vec![Some(10.0), None, Some(30.0)]);
    }

    #[test]
    fn derivative_needs_two_points() {
        let result =
            apply(derivative, &[Some(1.0), Some(4.0), None, Some(10.0)], vec![]);
        assert_eq!(result.values, vec![None, Some(3.0), None, None]);
    }

    #[test]
    fn non_negative_derivative_drops_resets() {
        let result = apply(
            non_negative_derivative,
            &[Some(1.0), Some(4.0), Some(2.0), Some(5.0)],
            vec![],
        );
        assert_eq!(result.values, vec![None, Some(3.0), None, Some(3.0)]);
    }

    #[test]
    fn integral_accumulates_over_gaps() {
        let result =
            apply(integral, &[Some(1.0), None, Some(2.0)], vec![]);
        assert_eq!(result.values, vec![Some(1.0), None, Some(3.0)]);
    }

    #[test]
    fn transform_null_fills_default() {
        let result = apply(
            transform_null,
            &[Some(1.0), None],
            vec![Value::Int(-1)],
        );
        assert_eq!(result.name, "transformNull(m,-1)");
        assert_eq!(result.values, vec![Some(1.0), Some(-1.0)]);
    }

    #[test]
    fn keep_last_value_bridges_gaps() {
        let result = apply(
            keep_last_value,
            &[Some(1.0), None, None, Some(4.0), None],
            vec![],
        );
        assert_eq!(
            result.values,
            vec![Some(1.0), Some(1.0), Some(1.0), Some(4.0), Some(4.0)]
        );
    }

    #[test]
    fn changed_flags_transitions() {
        let result = apply(
            changed,
            &[Some(1.0), Some(1.0), Some(2.0), None, Some(2.0)],
            vec![],
        );
        assert_eq!(
            result.values,
            vec![Some(0.0), Some(0.0), Some(1.0), Some(0.0), Some(0.0)]
        );
    }

    #[test]
    fn consolidate_by_switches_strategy() {
        let result = apply(
            consolidate_by,
            &[Some(1.0)],
            vec![Value::Str("max".into())],
        );
        assert_eq!(result.consolidation, Consolidation::Max);
        assert_eq!(result.name, "consolidateBy(m,\"max\")");
    }
}
