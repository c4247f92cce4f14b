use std::{collections::BTreeMap, fmt, fs, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Metric {
    Loss,
    Accuracy,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Loss => write!(f, "Loss"),
            Metric::Accuracy => write!(f, "Accuracy"),
        }
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "loss" => Ok(Metric::Loss),
            "accuracy" => Ok(Metric::Accuracy),
            other => Err(Error::Config(format!("unknown metric {other:?}"))),
        }
    }
}

/// One measurement of one seed at one dataset size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    #[serde(rename = "Rank")]
    pub rank: usize,
    #[serde(rename = "Size")]
    pub size: usize,
    #[serde(rename = "Metric")]
    pub metric: Metric,
    #[serde(rename = "Value")]
    pub value: f64,
}

/// Mean and spread of one metric across seeds at one size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurvePoint {
    pub size: usize,
    pub mean: f64,
    pub std: f64,
    pub count: usize,
}

/// Rows from any number of workers, in no particular order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultTable {
    rows: Vec<ResultRow>,
}

impl ResultTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, row: ResultRow) {
        self.rows.push(row);
    }

    pub fn extend(&mut self, other: ResultTable) {
        self.rows.extend(other.rows);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn read_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let rows = reader
            .deserialize()
            .collect::<std::result::Result<Vec<ResultRow>, _>>()?;
        Ok(Self { rows })
    }

    /// Groups the rows of `metric` by size, sorted by size. The spread is the
    /// population standard deviation across seeds.
    pub fn curve(&self, metric: Metric) -> Vec<CurvePoint> {
        let mut by_size: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
        for row in self.rows.iter().filter(|row| row.metric == metric) {
            by_size.entry(row.size).or_default().push(row.value);
        }

        by_size
            .into_iter()
            .map(|(size, values)| {
                let count = values.len();
                let mean = values.iter().sum::<f64>() / count as f64;
                let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
                CurvePoint {
                    size,
                    mean,
                    std: var.sqrt(),
                    count,
                }
            })
            .collect()
    }
}

impl FromIterator<ResultRow> for ResultTable {
    fn from_iter<I: IntoIterator<Item = ResultRow>>(iter: I) -> Self {
        Self {
            rows: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ResultTable {
        let mut table = ResultTable::new();
        for rank in 0..3 {
            for size in [100, 10] {
                table.push(ResultRow {
                    rank,
                    size,
                    metric: Metric::Loss,
                    value: 2.0 + rank as f64 * 0.1 - size as f64 / 1000.0,
                });
                table.push(ResultRow {
                    rank,
                    size,
                    metric: Metric::Accuracy,
                    value: 0.1 * (rank + 1) as f64,
                });
            }
        }
        table
    }

    #[test]
    fn curve_groups_by_size() {
        let points = table().curve(Metric::Accuracy);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].size, 10);
        assert_eq!(points[1].size, 100);
        assert_eq!(points[0].count, 3);
        assert!((points[0].mean - 0.2).abs() < 1e-12);
        assert!((points[0].std - (0.02f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn csv_round_trip_gives_same_curves() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("cifar_curves.csv");
        let original = table();
        original.write_csv(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Rank,Size,Metric,Value"));

        let restored = ResultTable::read_csv(&path).unwrap();
        assert_eq!(restored, original);
        for metric in [Metric::Loss, Metric::Accuracy] {
            assert_eq!(restored.curve(metric), original.curve(metric));
        }
    }

    #[test]
    fn metric_parses_case_insensitively() {
        assert_eq!("Loss".parse::<Metric>().unwrap(), Metric::Loss);
        assert_eq!("accuracy".parse::<Metric>().unwrap(), Metric::Accuracy);
        assert!("f1".parse::<Metric>().is_err());
    }
}
