use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consolidation {
    Average,
    Sum,
    Min,
    Max,
}

impl Consolidation {
    pub fn from_name(name: &str) -> Result<Consolidation, SeriesError> {
        match name {
            | "average" | "avg" => Ok(Consolidation::Average),
            | "sum" => Ok(Consolidation::Sum),
            | "min" => Ok(Consolidation::Min),
            | "max" => Ok(Consolidation::Max),
            | other => {
                Err(SeriesError::InvalidConsolidation(other.to_string()))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            | Consolidation::Average => "average",
            | Consolidation::Sum => "sum",
            | Consolidation::Min => "min",
            | Consolidation::Max => "max",
        }
    }

    pub fn apply(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        Some(match self {
            | Consolidation::Sum => values.iter().sum(),
            | Consolidation::Average => {
                values.iter().sum::<f64>() / values.len() as f64
            }
            | Consolidation::Min => {
                values.iter().cloned().fold(f64::INFINITY, f64::min)
            }
            | Consolidation::Max => {
                values.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
            }
        })
    }
}

#[derive(Error, Debug)]
pub enum SeriesError {
    #[error("invalid consolidation function '{0}'")]
    InvalidConsolidation(String),
    #[error("cannot normalize an empty series group")]
    NormalizeEmptyResult,
}

/// One labeled numeric sequence. Index `i` of `values` corresponds to the
/// bucket starting at `start + i * step`.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: String,
    pub path_expression: String,
    pub start: i64,
    pub end: i64,
    pub step: i64,
    pub values: Vec<Option<f64>>,
    pub consolidation: Consolidation,
    values_per_point: usize,
    pub stub: bool,
}

impl Series {
    pub fn new(
        name: impl Into<String>,
        start: i64,
        end: i64,
        step: i64,
        values: Vec<Option<f64>>,
    ) -> Series {
        let name = name.into();
        Series {
            path_expression: name.clone(),
            name,
            start,
            end,
            step,
            values,
            consolidation: Consolidation::Average,
            values_per_point: 1,
            stub: false,
        }
    }

    /// Placeholder for a pattern with no matching metrics; keeps the
    /// checker's no-data handling uniform.
    pub fn stub(path_expr: impl Into<String>, start: i64) -> Series {
        let mut series = Series::new(path_expr, start, start, 60, vec![]);
        series.stub = true;
        series
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.path_expression = self.name.clone();
    }

    /// Schedules downsampling; `points` reflects it lazily, the raw buffer
    /// stays untouched.
    pub fn consolidate(&mut self, values_per_point: usize) {
        self.values_per_point = values_per_point.max(1);
    }

    /// The consolidated view of the values. Mirrors the quirk of the
    /// original consolidating iterator: after the complete chunks, one
    /// trailing element is always emitted for the remainder, even when it
    /// is empty.
    pub fn points(&self) -> Vec<Option<f64>> {
        if self.values_per_point <= 1 {
            return self.values.clone();
        }
        let mut out = Vec::new();
        let mut chunks = self.values.chunks_exact(self.values_per_point);
        for chunk in &mut chunks {
            out.push(self.consolidate_chunk(chunk));
        }
        out.push(self.consolidate_chunk(chunks.remainder()));
        out
    }

    fn consolidate_chunk(&self, chunk: &[Option<f64>]) -> Option<f64> {
        let usable: Vec<f64> = chunk.iter().filter_map(|v| *v).collect();
        self.consolidation.apply(&usable)
    }

    /// Raw value for the bucket containing `timestamp`, None when outside
    /// the fetched range.
    pub fn value_at(&self, timestamp: i64) -> Option<f64> {
        if self.step <= 0 {
            return None;
        }
        let index = (timestamp - self.start).div_euclid(self.step);
        if index < 0 || index as usize >= self.values.len() {
            return None;
        }
        self.values[index as usize]
    }
}

fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn lcm(a: i64, b: i64) -> i64 {
    if a == b {
        return a;
    }
    let (a, b) = if a < b { (b, a) } else { (a, b) };
    a / gcd(a, b) * b
}

/// Aligns a group of series lists to a common step: consolidates each
/// series to the LCM of all steps and clips the common range.
pub fn normalize(
    series_lists: Vec<Vec<Series>>,
) -> Result<(Vec<Series>, i64, i64, i64), SeriesError> {
    let mut series_list: Vec<Series> =
        series_lists.into_iter().flatten().collect();
    if series_list.is_empty() {
        return Err(SeriesError::NormalizeEmptyResult);
    }
    let step = series_list
        .iter()
        .map(|s| s.step)
        .fold(1, lcm);
    for series in series_list.iter_mut() {
        series.consolidate((step / series.step) as usize);
    }
    let start = series_list.iter().map(|s| s.start).min().unwrap();
    let mut end = series_list.iter().map(|s| s.end).max().unwrap();
    end -= (end - start).rem_euclid(step);
    Ok((series_list, start, end, step))
}

/// Zip the consolidated views row by row, stopping at the shortest.
pub fn zipped_rows(series_list: &[Series]) -> Vec<Vec<Option<f64>>> {
    let views: Vec<Vec<Option<f64>>> =
        series_list.iter().map(|s| s.points()).collect();
    let rows = views.iter().map(|v| v.len()).min().unwrap_or(0);
    (0..rows)
        .map(|i| views.iter().map(|v| v[i]).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(step: i64, values: &[Option<f64>]) -> Series {
        Series::new("s", 0, step * values.len() as i64, step, values.to_vec())
    }

    #[test]
    fn consolidation_applies_per_chunk() {
        let mut s = series(10, &[Some(1.0), Some(3.0), Some(5.0), None]);
        s.consolidate(2);
        assert_eq!(s.points(), vec![Some(2.0), Some(5.0), None]);

        s.consolidation = Consolidation::Sum;
        assert_eq!(s.points(), vec![Some(4.0), Some(5.0), None]);
    }

    #[test]
    fn normalize_aligns_steps() {
        let a = series(10, &[Some(1.0); 6]);
        let b = series(15, &[Some(2.0); 4]);
        let (aligned, start, end, step) =
            normalize(vec![vec![a], vec![b]]).unwrap();
        assert_eq!(step, 30);
        assert_eq!(start, 0);
        assert_eq!(end, 60);
        assert_eq!(aligned.len(), 2);
    }

    #[test]
    fn normalize_rejects_empty_input() {
        assert!(matches!(
            normalize(vec![vec![], vec![]]),
            Err(SeriesError::NormalizeEmptyResult)
        ));
    }

    #[test]
    fn value_lookup_is_range_checked() {
        let s = series(10, &[Some(1.0), Some(2.0)]);
        assert_eq!(s.value_at(0), Some(1.0));
        assert_eq!(s.value_at(19), Some(2.0));
        assert_eq!(s.value_at(20), None);
        assert_eq!(s.value_at(-1), None);
    }
}
