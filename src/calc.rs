use serde::Serialize;
use std::fmt;

pub const TEST_WEIGHT: f64 = 0.4;
pub const EXAM_WEIGHT: f64 = 0.6;

/// Computes a derived cell from the scored columns of one row.
pub trait Aggregate: fmt::Debug + Sync {
    fn aggregate(&self, header: &[String], row: &[String], first_scored: usize) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    Test,
    Exam,
}

impl Category {
    pub fn tag(self) -> char {
        match self {
            Category::Test => 'T',
            Category::Exam => 'E',
        }
    }

    /// Accepts the assessment type names used by the entry forms.
    pub fn from_type_name(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "test" | "t" => Some(Category::Test),
            "exam" | "e" => Some(Category::Exam),
            _ => None,
        }
    }
}

/// Classifies a scored column by the leading character of its name.
pub fn category_of(column: &str) -> Option<Category> {
    match column.trim_start().chars().next()?.to_ascii_uppercase() {
        'T' => Some(Category::Test),
        'E' => Some(Category::Exam),
        _ => None,
    }
}

/// Blank, unparsable and non-finite cells are not scores.
pub fn parse_score(cell: &str) -> Option<f64> {
    let v = cell.trim().parse::<f64>().ok()?;
    v.is_finite().then_some(v)
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RowAverage {
    pub test_sum: f64,
    pub test_count: usize,
    pub exam_sum: f64,
    pub exam_count: usize,
}

impl RowAverage {
    pub fn test_avg(&self) -> f64 {
        if self.test_count == 0 {
            0.0
        } else {
            self.test_sum / self.test_count as f64
        }
    }

    pub fn exam_avg(&self) -> f64 {
        if self.exam_count == 0 {
            0.0
        } else {
            self.exam_sum / self.exam_count as f64
        }
    }

    pub fn weighted(&self) -> f64 {
        TEST_WEIGHT * self.test_avg() + EXAM_WEIGHT * self.exam_avg()
    }
}

pub fn row_average<'a, I>(scored: I) -> RowAverage
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut acc = RowAverage::default();
    for (column, cell) in scored {
        let Some(category) = category_of(column) else {
            continue;
        };
        let Some(score) = parse_score(cell) else {
            continue;
        };
        match category {
            Category::Test => {
                acc.test_sum += score;
                acc.test_count += 1;
            }
            Category::Exam => {
                acc.exam_sum += score;
                acc.exam_count += 1;
            }
        }
    }
    acc
}

pub fn format_average(v: f64) -> String {
    format!("{:.2}", v)
}

/// 40% test mean plus 60% exam mean; a category with no scores contributes 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedAverage;

impl Aggregate for WeightedAverage {
    fn aggregate(&self, header: &[String], row: &[String], first_scored: usize) -> String {
        let scored = header
            .iter()
            .zip(row.iter())
            .skip(first_scored)
            .map(|(h, c)| (h.as_str(), c.as_str()));
        format_average(row_average(scored).weighted())
    }
}
