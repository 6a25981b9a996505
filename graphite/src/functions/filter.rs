use regex::Regex;

use super::{
    get_percentile,
    safe_avg,
    safe_is_not_empty,
    safe_last,
    safe_max,
    safe_min,
    safe_sum,
    Args,
};
use crate::evaluator::{EvalError, Value};
use crate::series::Series;

fn compile(args: &Args, pattern: &str) -> Result<Regex, EvalError> {
    Regex::new(pattern)
        .map_err(|e| args.bad(format!("invalid regex '{pattern}': {e}")))
}

fn keep(
    args: &mut Args,
    predicate: impl Fn(&Series, f64) -> bool,
) -> Result<Value, EvalError> {
    let series_list = args.series_list("seriesList")?;
    let n = args.f64("n")?;
    Ok(Value::SeriesList(
        series_list
            .into_iter()
            .filter(|series| predicate(series, n))
            .collect(),
    ))
}

fn ranked(
    args: &mut Args,
    score: impl Fn(&Series) -> Option<f64>,
    descending: bool,
) -> Result<Vec<Series>, EvalError> {
    let mut series_list = args.series_list("seriesList")?;
    series_list.sort_by(|a, b| {
        let (a, b) = (score(a), score(b));
        let ordering = match (a, b) {
            | (Some(a), Some(b)) => a.total_cmp(&b),
            | (None, Some(_)) => std::cmp::Ordering::Less,
            | (Some(_), None) => std::cmp::Ordering::Greater,
            | (None, None) => std::cmp::Ordering::Equal,
        };
        if descending {
            ordering.reverse()
        } else {
            ordering
        }
    });
    Ok(series_list)
}

pub(super) fn highest_current(args: &mut Args) -> Result<Value, EvalError> {
    let mut series_list = args.series_list("seriesList")?;
    let n = args.usize_("n")?;
    series_list.sort_by(|a, b| {
        cmp_opt(safe_last(&a.values), safe_last(&b.values))
    });
    let keep_from = series_list.len().saturating_sub(n);
    Ok(Value::SeriesList(series_list.split_off(keep_from)))
}

pub(super) fn lowest_current(args: &mut Args) -> Result<Value, EvalError> {
    let mut series_list = args.series_list("seriesList")?;
    let n = args.usize_("n")?;
    series_list.sort_by(|a, b| {
        cmp_opt(safe_last(&a.values), safe_last(&b.values))
    });
    series_list.truncate(n);
    Ok(Value::SeriesList(series_list))
}

pub(super) fn highest_max(args: &mut Args) -> Result<Value, EvalError> {
    let series_list = args.series_list("seriesList")?;
    let n = args.usize_("n")?;
    let mut args2 = Args::new(
        "highestMax",
        vec![Value::SeriesList(series_list), Value::Int(n as i64)],
        vec![],
    );
    let mut top = match highest_current(&mut args2)? {
        | Value::SeriesList(list) => list,
        | _ => unreachable!(),
    };
    // Same selection, but ranked by maximum and returned highest first.
    top.sort_by(|a, b| {
        cmp_opt(safe_max(&b.values), safe_max(&a.values))
    });
    Ok(Value::SeriesList(top))
}

pub(super) fn highest_average(args: &mut Args) -> Result<Value, EvalError> {
    let mut series_list = args.series_list("seriesList")?;
    let n = args.usize_("n")?;
    series_list
        .sort_by(|a, b| cmp_opt(safe_avg(&a.values), safe_avg(&b.values)));
    let keep_from = series_list.len().saturating_sub(n);
    Ok(Value::SeriesList(series_list.split_off(keep_from)))
}

pub(super) fn lowest_average(args: &mut Args) -> Result<Value, EvalError> {
    let mut series_list = args.series_list("seriesList")?;
    let n = args.usize_("n")?;
    series_list
        .sort_by(|a, b| cmp_opt(safe_avg(&a.values), safe_avg(&b.values)));
    series_list.truncate(n);
    Ok(Value::SeriesList(series_list))
}

pub(super) fn current_above(args: &mut Args) -> Result<Value, EvalError> {
    keep(args, |series, n| {
        safe_last(&series.values).is_some_and(|v| v >= n)
    })
}

pub(super) fn current_below(args: &mut Args) -> Result<Value, EvalError> {
    keep(args, |series, n| {
        safe_last(&series.values).map_or(true, |v| v <= n)
    })
}

pub(super) fn average_above(args: &mut Args) -> Result<Value, EvalError> {
    keep(args, |series, n| {
        safe_avg(&series.values).is_some_and(|v| v >= n)
    })
}

pub(super) fn average_below(args: &mut Args) -> Result<Value, EvalError> {
    keep(args, |series, n| {
        safe_avg(&series.values).map_or(true, |v| v <= n)
    })
}

pub(super) fn maximum_above(args: &mut Args) -> Result<Value, EvalError> {
    keep(args, |series, n| {
        safe_max(&series.values).is_some_and(|v| v > n)
    })
}

pub(super) fn maximum_below(args: &mut Args) -> Result<Value, EvalError> {
    keep(args, |series, n| {
        safe_max(&series.values).map_or(true, |v| v <= n)
    })
}

pub(super) fn minimum_above(args: &mut Args) -> Result<Value, EvalError> {
    keep(args, |series, n| {
        safe_min(&series.values).is_some_and(|v| v > n)
    })
}

pub(super) fn minimum_below(args: &mut Args) -> Result<Value, EvalError> {
    keep(args, |series, n| {
        safe_min(&series.values).map_or(true, |v| v <= n)
    })
}

pub(super) fn n_percentile(args: &mut Args) -> Result<Value, EvalError> {
    let series_list = args.series_list("seriesList")?;
    let n = args.f64("n")?;
    if n <= 0.0 {
        return Err(
            args.bad("the requested percent is required to be greater than 0")
        );
    }
    let mut results = Vec::new();
    for series in &series_list {
        let Some(percentile) = get_percentile(&series.values, n, false)
        else {
            continue;
        };
        let name =
            format!("nPercentile({}, {})", series.name, super::fmt_g(n));
        let point_count =
            ((series.end - series.start) / series.step.max(1)).max(0) as usize;
        let mut result = Series::new(
            name,
            series.start,
            series.end,
            series.step,
            vec![Some(percentile); point_count],
        );
        result.consolidation = series.consolidation;
        results.push(result);
    }
    Ok(Value::SeriesList(results))
}

pub(super) fn remove_above_value(args: &mut Args) -> Result<Value, EvalError> {
    let mut series_list = args.series_list("seriesList")?;
    let n = args.f64("n")?;
    for series in series_list.iter_mut() {
        series.set_name(format!(
            "removeAboveValue({}, {})",
            series.name,
            super::fmt_g(n)
        ));
        for value in series.values.iter_mut() {
            if value.is_some_and(|v| v > n) {
                *value = None;
            }
        }
    }
    Ok(Value::SeriesList(series_list))
}

pub(super) fn remove_below_value(args: &mut Args) -> Result<Value, EvalError> {
    let mut series_list = args.series_list("seriesList")?;
    let n = args.f64("n")?;
    for series in series_list.iter_mut() {
        series.set_name(format!(
            "removeBelowValue({}, {})",
            series.name,
            super::fmt_g(n)
        ));
        for value in series.values.iter_mut() {
            if value.is_some_and(|v| v < n) {
                *value = None;
            }
        }
    }
    Ok(Value::SeriesList(series_list))
}

pub(super) fn remove_above_percentile(
    args: &mut Args,
) -> Result<Value, EvalError> {
    let mut series_list = args.series_list("seriesList")?;
    let n = args.f64("n")?;
    for series in series_list.iter_mut() {
        series.set_name(format!(
            "removeAbovePercentile({}, {})",
            series.name,
            super::fmt_g(n)
        ));
        if let Some(percentile) = get_percentile(&series.values, n, false) {
            for value in series.values.iter_mut() {
                if value.is_some_and(|v| v > percentile) {
                    *value = None;
                }
            }
        }
    }
    Ok(Value::SeriesList(series_list))
}

pub(super) fn remove_below_percentile(
    args: &mut Args,
) -> Result<Value, EvalError> {
    let mut series_list = args.series_list("seriesList")?;
    let n = args.f64("n")?;
    for series in series_list.iter_mut() {
        series.set_name(format!(
            "removeBelowPercentile({}, {})",
            series.name,
            super::fmt_g(n)
        ));
        if let Some(percentile) = get_percentile(&series.values, n, false) {
            for value in series.values.iter_mut() {
                if value.is_some_and(|v| v < percentile) {
                    *value = None;
                }
            }
        }
    }
    Ok(Value::SeriesList(series_list))
}

pub(super) fn remove_empty_series(
    args: &mut Args,
) -> Result<Value, EvalError> {
    let series_list = args.series_list("seriesList")?;
    Ok(Value::SeriesList(
        series_list
            .into_iter()
            .filter(|series| safe_is_not_empty(&series.values))
            .collect(),
    ))
}

pub(super) fn limit(args: &mut Args) -> Result<Value, EvalError> {
    let mut series_list = args.series_list("seriesList")?;
    let n = args.usize_("n")?;
    series_list.truncate(n);
    Ok(Value::SeriesList(series_list))
}

pub(super) fn sort_by_name(args: &mut Args) -> Result<Value, EvalError> {
    let mut series_list = args.series_list("seriesList")?;
    series_list.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Value::SeriesList(series_list))
}

pub(super) fn sort_by_total(args: &mut Args) -> Result<Value, EvalError> {
    let sorted = ranked(args, |s| safe_sum(&s.values), true)?;
    Ok(Value::SeriesList(sorted))
}

pub(super) fn sort_by_maxima(args: &mut Args) -> Result<Value, EvalError> {
    let sorted = ranked(args, |s| safe_max(&s.values), true)?;
    Ok(Value::SeriesList(sorted))
}

pub(super) fn sort_by_minima(args: &mut Args) -> Result<Value, EvalError> {
    let series_list = args.series_list("seriesList")?;
    let alive: Vec<Series> = series_list
        .into_iter()
        .filter(|s| safe_max(&s.values).is_some_and(|v| v > 0.0))
        .collect();
    let mut args2 =
        Args::new("sortByMinima", vec![Value::SeriesList(alive)], vec![]);
    let sorted = ranked(&mut args2, |s| safe_min(&s.values), false)?;
    Ok(Value::SeriesList(sorted))
}

pub(super) fn exclude(args: &mut Args) -> Result<Value, EvalError> {
    let series_list = args.series_list("seriesList")?;
    let pattern = args.string("pattern")?;
    let regex = compile(args, &pattern)?;
    Ok(Value::SeriesList(
        series_list
            .into_iter()
            .filter(|series| !regex.is_match(&series.name))
            .collect(),
    ))
}

pub(super) fn grep(args: &mut Args) -> Result<Value, EvalError> {
    let series_list = args.series_list("seriesList")?;
    let pattern = args.string("pattern")?;
    let regex = compile(args, &pattern)?;
    Ok(Value::SeriesList(
        series_list
            .into_iter()
            .filter(|series| regex.is_match(&series.name))
            .collect(),
    ))
}

pub(super) fn fallback_series(args: &mut Args) -> Result<Value, EvalError> {
    let series_list = args.series_list("seriesList")?;
    let fallback = args.series_list("fallback")?;
    if series_list.is_empty() {
        Ok(Value::SeriesList(fallback))
    } else {
        Ok(Value::SeriesList(series_list))
    }
}

fn cmp_opt(a: Option<f64>, b: Option<f64>) -> std::cmp::Ordering {
    match (a, b) {
        | (Some(a), Some(b)) => a.total_cmp(&b),
        | (None, Some(_)) => std::cmp::Ordering::Less,
        | (Some(_), None) => std::cmp::Ordering::Greater,
        | (None, None) => std::cmp::Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::Args;

    fn series(name: &str, values: &[f64]) -> Series {
        Series::new(
            name,
            0,
            60 * values.len() as i64,
            60,
            values.iter().map(|v| Some(*v)).collect(),
        )
    }

    fn names(value: Value) -> Vec<String> {
        match value {
            | Value::SeriesList(list) => {
                list.into_iter().map(|s| s.name).collect()
            }
            | _ => panic!("expected series list"),
        }
    }

    #[test]
    fn exclude_drops_matches() {
        let mut args = Args::new(
            "exclude",
            vec![
                Value::SeriesList(vec![
                    series("host.one", &[1.0]),
                    series("host.two", &[2.0]),
                ]),
                Value::Str("two".into()),
            ],
            vec![],
        );
        assert_eq!(names(exclude(&mut args).unwrap()), vec!["host.one"]);
    }

    #[test]
    fn current_filters_use_last_value() {
        let mut args = Args::new(
            "currentAbove",
            vec![
                Value::SeriesList(vec![
                    series("low", &[1.0, 2.0]),
                    series("high", &[1.0, 50.0]),
                ]),
                Value::Int(50),
            ],
            vec![],
        );
        assert_eq!(names(current_above(&mut args).unwrap()), vec!["high"]);
    }

    #[test]
    fn maximum_above_is_strict() {
        let mut args = Args::new(
            "maximumAbove",
            vec![
                Value::SeriesList(vec![
                    series("a", &[10.0]),
                    series("b", &[11.0]),
                ]),
                Value::Int(10),
            ],
            vec![],
        );
        assert_eq!(names(maximum_above(&mut args).unwrap()), vec!["b"]);
    }

    #[test]
    fn highest_current_returns_top_n() {
        let mut args = Args::new(
            "highestCurrent",
            vec![
                Value::SeriesList(vec![
                    series("a", &[1.0]),
                    series("b", &[3.0]),
                    series("c", &[2.0]),
                ]),
                Value::Int(2),
            ],
            vec![],
        );
        assert_eq!(
            names(highest_current(&mut args).unwrap()),
            vec!["c", "b"]
        );
    }

    #[test]
    fn remove_above_value_nulls_peaks() {
        let mut args = Args::new(
            "removeAboveValue",
            vec![
                Value::SeriesList(vec![series("a", &[1.0, 100.0, 2.0])]),
                Value::Int(10),
            ],
            vec![],
        );
        match remove_above_value(&mut args).unwrap() {
            | Value::SeriesList(list) => {
                assert_eq!(
                    list[0].values,
                    vec![Some(1.0), None, Some(2.0)]
                );
                assert_eq!(list[0].name, "removeAboveValue(a, 10)");
            }
            | _ => panic!("expected series list"),
        }
    }

    #[test]
    fn fallback_kicks_in_when_empty() {
        let mut args = Args::new(
            "fallbackSeries",
            vec![
                Value::SeriesList(vec![]),
                Value::SeriesList(vec![series("fallback", &[0.0])]),
            ],
            vec![],
        );
        assert_eq!(
            names(fallback_series(&mut args).unwrap()),
            vec!["fallback"]
        );
    }
}
