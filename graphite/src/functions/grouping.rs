use std::collections::HashMap;

use super::{call_function, Args};
use crate::context::RequestContext;
use crate::evaluator::{EvalError, Value};
use crate::series::Series;

pub(super) fn group(args: &mut Args) -> Result<Value, EvalError> {
    let lists = args.series_lists_rest()?;
    Ok(Value::SeriesList(lists.into_iter().flatten().collect()))
}

/// Splits a series list into sub-lists sharing the given name node.
pub(super) fn map_series(args: &mut Args) -> Result<Value, EvalError> {
    let series_list = args.series_list("seriesList")?;
    let map_node = args.usize_("mapNode")?;
    let mut keys: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, Vec<Series>> = HashMap::new();
    for series in series_list {
        let key = series
            .name
            .split('.')
            .nth(map_node)
            .unwrap_or_default()
            .to_string();
        if !grouped.contains_key(&key) {
            keys.push(key.clone());
        }
        grouped.entry(key).or_default().push(series);
    }
    Ok(Value::SeriesLists(
        keys.into_iter()
            .map(|key| grouped.remove(&key).unwrap())
            .collect(),
    ))
}

/// Reduces each mapped sub-list to one series by matching `reduce_node`
/// against the matchers and handing the matched series, in matcher order,
/// to the named function.
pub(super) async fn reduce_series(
    ctx: &mut RequestContext,
    args: &mut Args,
) -> Result<Value, EvalError> {
    let series_lists = args.series_lists("seriesLists")?;
    let reduce_function = args.string("reduceFunction")?;
    let reduce_node = args.usize_("reduceNode")?;
    let matchers = args.string_rest()?;
    if matchers.is_empty() {
        return Err(args.bad("at least one reduce matcher is required"));
    }

    let mut keys: Vec<String> = Vec::new();
    let mut slots: HashMap<String, Vec<Option<Series>>> = HashMap::new();
    for series_list in series_lists {
        for series in series_list {
            let nodes: Vec<&str> = series.name.split('.').collect();
            let Some(node) = nodes.get(reduce_node).copied() else {
                continue;
            };
            let Some(position) =
                matchers.iter().position(|m| m == node)
            else {
                continue;
            };
            let reduced_name = format!(
                "{}.reduce.{reduce_function}",
                nodes[..reduce_node].join(".")
            );
            if !slots.contains_key(&reduced_name) {
                keys.push(reduced_name.clone());
                slots.insert(
                    reduced_name.clone(),
                    vec![None; matchers.len()],
                );
            }
            slots.get_mut(&reduced_name).unwrap()[position] = Some(series);
        }
    }

    let mut results = Vec::with_capacity(keys.len());
    for key in keys {
        let matched = slots.remove(&key).unwrap();
        let call_args: Vec<Value> = matched
            .into_iter()
            .map(|slot| Value::SeriesList(slot.into_iter().collect()))
            .collect();
        let reduced =
            call_function(ctx, &reduce_function, call_args, vec![]).await?;
        let Value::SeriesList(mut reduced) = reduced else {
            return Err(args.bad(format!(
                "'{reduce_function}' did not reduce to a series"
            )));
        };
        if reduced.is_empty() {
            continue;
        }
        let mut series = reduced.remove(0);
        series.name = key;
        results.push(series);
    }
    Ok(Value::SeriesList(results))
}

pub(super) async fn group_by_node(
    ctx: &mut RequestContext,
    args: &mut Args,
) -> Result<Value, EvalError> {
    let series_list = args.series_list("seriesList")?;
    let node_num = args.usize_("nodeNum")?;
    let callback = args.string("callback")?;

    let mut keys: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, Vec<Series>> = HashMap::new();
    for series in series_list {
        let key = series
            .name
            .split('.')
            .nth(node_num)
            .unwrap_or_default()
            .to_string();
        if !grouped.contains_key(&key) {
            keys.push(key.clone());
        }
        grouped.entry(key).or_default().push(series);
    }

    let mut results = Vec::with_capacity(keys.len());
    for key in keys {
        let members = grouped.remove(&key).unwrap();
        let reduced = call_function(
            ctx,
            &callback,
            vec![Value::SeriesList(members)],
            vec![],
        )
        .await?;
        let Value::SeriesList(mut reduced) = reduced else {
            return Err(args.bad(format!(
                "'{callback}' did not reduce to a series"
            )));
        };
        if reduced.is_empty() {
            continue;
        }
        let mut series = reduced.remove(0);
        series.name = key;
        results.push(series);
    }
    Ok(Value::SeriesList(results))
}

fn name_without_positions(name: &str, positions: &[usize]) -> String {
    name.split('.')
        .enumerate()
        .filter(|(i, _)| !positions.contains(i))
        .map(|(_, piece)| piece)
        .collect::<Vec<_>>()
        .join(".")
}

fn merge_with(
    args: &mut Args,
    combiner: impl Fn(&mut Args) -> Result<Value, EvalError>,
) -> Result<Value, EvalError> {
    let series_list = args.series_list("seriesList")?;
    let positions = args.usize_rest()?;

    let mut names: Vec<String> = Vec::new();
    let mut merged: HashMap<String, Series> = HashMap::new();
    for series in series_list {
        let new_name = name_without_positions(&series.name, &positions);
        match merged.remove(&new_name) {
            | None => {
                names.push(new_name.clone());
                let mut series = series;
                series.name = new_name.clone();
                merged.insert(new_name, series);
            }
            | Some(existing) => {
                let mut args2 = Args::new(
                    "merge",
                    vec![
                        Value::SeriesList(vec![existing]),
                        Value::SeriesList(vec![series]),
                    ],
                    vec![],
                );
                let Value::SeriesList(mut combined) =
                    combiner(&mut args2)?
                else {
                    return Err(args2.bad("combiner did not yield series"));
                };
                let mut series = combined.remove(0);
                series.name = new_name.clone();
                merged.insert(new_name, series);
            }
        }
    }
    Ok(Value::SeriesList(
        names
            .into_iter()
            .map(|name| merged.remove(&name).unwrap())
            .collect(),
    ))
}

pub(super) fn sum_series_with_wildcards(
    args: &mut Args,
) -> Result<Value, EvalError> {
    merge_with(args, super::combine::sum_series)
}

pub(super) fn average_series_with_wildcards(
    args: &mut Args,
) -> Result<Value, EvalError> {
    merge_with(args, super::combine::average_series)
}

pub(super) fn multiply_series_with_wildcards(
    args: &mut Args,
) -> Result<Value, EvalError> {
    merge_with(args, super::combine::multiply_series)
}
