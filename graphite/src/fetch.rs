use lib::store::StoreError;
use tracing::debug;

use crate::context::RequestContext;
use crate::series::Series;

/// Buckets raw samples into aligned slots.
///
/// `last_slot = (end - start) / retention` full buckets are always emitted.
/// The partial bucket at `last_slot` is appended only for real-time
/// evaluation (and then only when it holds a sample), or unconditionally in
/// bootstrap mode so that window functions know exactly how much overlap to
/// trim.
pub fn unpack_values(
    data: &[(String, i64)],
    retention: i64,
    start_time: i64,
    end_time: i64,
    bootstrap: bool,
    allow_real_time: bool,
) -> Vec<Option<f64>> {
    let slot_of = |timestamp: i64| (timestamp - start_time) / retention;

    let mut points = std::collections::HashMap::new();
    for (member, timestamp) in data {
        // Member format is "<ts> <value>"; the second field is the sample.
        let Some(field) = member.split_whitespace().nth(1) else {
            continue;
        };
        let Ok(value) = field.parse::<f64>() else {
            continue;
        };
        points.insert(slot_of(*timestamp), value);
    }

    let last_slot = slot_of(end_time);
    let mut values: Vec<Option<f64>> = (0..last_slot)
        .map(|slot| points.get(&slot).copied())
        .collect();

    let last_point = points.get(&last_slot).copied();
    if bootstrap {
        values.push(last_point);
    } else if allow_real_time {
        if let Some(point) = last_point {
            values.push(Some(point));
        }
    }
    values
}

/// Materializes one series per metric matching `path_expr` over the context
/// window. A pattern with no metrics yields a single stub series so the
/// caller can uniformly fall into its no-data handling.
pub async fn fetch_data(
    ctx: &mut RequestContext,
    path_expr: &str,
) -> Result<Vec<Series>, StoreError> {
    let metrics = ctx.store.get_pattern_metrics(path_expr).await?;

    if metrics.is_empty() {
        debug!(pattern = path_expr, "No metrics under pattern, using stub");
        ctx.graphite_patterns
            .entry(path_expr.to_string())
            .or_default();
        return Ok(vec![Series::stub(path_expr, ctx.start_time)]);
    }

    let retention = ctx.store.get_metric_retention(&metrics[0]).await?;
    let data = ctx
        .store
        .get_metrics_values(&metrics, ctx.start_time, ctx.end_time)
        .await?;

    let mut series_list = Vec::with_capacity(metrics.len());
    for (metric, samples) in metrics.iter().zip(data.iter()) {
        ctx.metrics.insert(metric.clone());
        ctx.graphite_patterns
            .entry(path_expr.to_string())
            .or_default()
            .insert(metric.clone());
        let values = unpack_values(
            samples,
            retention,
            ctx.start_time,
            ctx.end_time,
            ctx.bootstrap,
            ctx.allow_real_time,
        );
        let mut series = Series::new(
            metric.clone(),
            ctx.start_time,
            ctx.end_time,
            retention,
            values,
        );
        series.path_expression = path_expr.to_string();
        series_list.push(series);
    }
    Ok(series_list)
}
