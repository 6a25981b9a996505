use lazy_static::lazy_static;
use regex::Regex;

use super::Args;
use crate::evaluator::{EvalError, Value};

lazy_static! {
    // Peels a bare metric path out of a generated name like
    // "movingAverage(a.b.c,10)".
    static ref METRIC_PIECES: Regex =
        Regex::new(r"(?:.*\()?(?P<name>[-\w*\.]+)(?:,|\)?.*)?").unwrap();
}

pub(super) fn alias(args: &mut Args) -> Result<Value, EvalError> {
    let mut series_list = args.series_list("seriesList")?;
    let new_name = args.string("newName")?;
    for series in series_list.iter_mut() {
        series.name = new_name.clone();
    }
    Ok(Value::SeriesList(series_list))
}

pub(super) fn alias_by_node(args: &mut Args) -> Result<Value, EvalError> {
    let mut series_list = args.series_list("seriesList")?;
    let nodes = args.usize_rest()?;
    for series in series_list.iter_mut() {
        let base = METRIC_PIECES
            .captures(&series.name)
            .and_then(|c| c.name("name"))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| series.name.clone());
        let pieces: Vec<&str> = base.split('.').collect();
        series.name = nodes
            .iter()
            .filter_map(|n| pieces.get(*n).copied())
            .collect::<Vec<_>>()
            .join(".");
    }
    Ok(Value::SeriesList(series_list))
}

pub(super) fn alias_by_metric(args: &mut Args) -> Result<Value, EvalError> {
    let mut series_list = args.series_list("seriesList")?;
    for series in series_list.iter_mut() {
        let last = series.name.split('.').next_back().unwrap_or_default();
        series.name =
            last.split(',').next().unwrap_or_default().to_string();
    }
    Ok(Value::SeriesList(series_list))
}

pub(super) fn alias_sub(args: &mut Args) -> Result<Value, EvalError> {
    let mut series_list = args.series_list("seriesList")?;
    let search = args.string("search")?;
    let replace = args.string("replace")?;
    let regex = Regex::new(&search)
        .map_err(|e| args.bad(format!("invalid regex '{search}': {e}")))?;
    // Translate "\1" style backreferences into the "${1}" form.
    let replace = backrefs(&replace);
    for series in series_list.iter_mut() {
        series.name =
            regex.replace_all(&series.name, replace.as_str()).to_string();
    }
    Ok(Value::SeriesList(series_list))
}

fn backrefs(replace: &str) -> String {
    let mut out = String::with_capacity(replace.len());
    let mut chars = replace.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' && chars.peek().is_some_and(|c| c.is_ascii_digit()) {
            let mut digits = String::new();
            while chars.peek().is_some_and(|c| c.is_ascii_digit()) {
                digits.push(chars.next().unwrap());
            }
            out.push_str(&format!("${{{digits}}}"));
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::Args;
    use crate::series::Series;

    fn series(name: &str) -> Series {
        Series::new(name, 0, 60, 60, vec![Some(1.0)])
    }

    fn first_name(value: Value) -> String {
        match value {
            | Value::SeriesList(list) => list[0].name.clone(),
            | _ => panic!("expected series list"),
        }
    }

    #[test]
    fn alias_by_node_extracts_from_wrapped_names() {
        let mut args = Args::new(
            "aliasByNode",
            vec![
                Value::SeriesList(vec![series(
                    "movingAverage(servers.web01.cpu,10)",
                )]),
                Value::Int(1),
            ],
            vec![],
        );
        assert_eq!(first_name(alias_by_node(&mut args).unwrap()), "web01");
    }

    #[test]
    fn alias_by_node_joins_multiple_nodes() {
        let mut args = Args::new(
            "aliasByNode",
            vec![
                Value::SeriesList(vec![series("ganglia.host.cpu.load5")]),
                Value::Int(1),
                Value::Int(3),
            ],
            vec![],
        );
        assert_eq!(
            first_name(alias_by_node(&mut args).unwrap()),
            "host.load5"
        );
    }

    #[test]
    fn alias_by_metric_keeps_basename() {
        let mut args = Args::new(
            "aliasByMetric",
            vec![Value::SeriesList(vec![series(
                "carbon.agents.graphite.creates",
            )])],
            vec![],
        );
        assert_eq!(
            first_name(alias_by_metric(&mut args).unwrap()),
            "creates"
        );
    }

    #[test]
    fn alias_sub_supports_backreferences() {
        let mut args = Args::new(
            "aliasSub",
            vec![
                Value::SeriesList(vec![series("ip.tcp25")]),
                Value::Str("^.*tcp(\\d+)".into()),
                Value::Str("\\1".into()),
            ],
            vec![],
        );
        assert_eq!(first_name(alias_sub(&mut args).unwrap()), "25");
    }
}
