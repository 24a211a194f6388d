use crate::calc::{format_average, parse_score};
use crate::db::CourseProfile;
use crate::table::{cell_at, Table};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt::Write as _;

pub const DISTRIBUTION_BUCKETS: [(&str, f64); 4] = [
    ("0–49%", 50.0),
    ("50–69%", 70.0),
    ("70–84%", 85.0),
    ("85–100%", f64::INFINITY),
];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAverage {
    pub student_id: String,
    pub student_name: String,
    pub average: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub label: &'static str,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseReport {
    pub course_id: String,
    pub course_name: String,
    pub subject: Option<String>,
    pub grade_level: Option<String>,
    pub exam_type: Option<String>,
    pub teacher: Option<String>,
    pub generated_at: String,
    pub students: Vec<StudentAverage>,
    pub class_average: f64,
    pub distribution: Vec<Bucket>,
}

/// Summarizes the derived column of a gradebook. Rows whose average is not
/// numeric are left out of every figure.
pub fn course_report(
    course_id: &str,
    course: &CourseProfile,
    gradebook: &Table,
    generated_at: DateTime<Local>,
) -> CourseReport {
    let avg_idx = gradebook.layout().identity.len();
    let students: Vec<StudentAverage> = gradebook
        .rows()
        .iter()
        .filter_map(|r| {
            let average = parse_score(cell_at(r, avg_idx))?;
            Some(StudentAverage {
                student_id: cell_at(r, 0).to_string(),
                student_name: cell_at(r, 1).to_string(),
                average,
            })
        })
        .collect();

    let class_average = if students.is_empty() {
        0.0
    } else {
        students.iter().map(|s| s.average).sum::<f64>() / students.len() as f64
    };

    let mut distribution: Vec<Bucket> = DISTRIBUTION_BUCKETS
        .iter()
        .map(|(label, _)| Bucket {
            label: *label,
            count: 0,
        })
        .collect();
    for s in &students {
        if let Some(i) = DISTRIBUTION_BUCKETS
            .iter()
            .position(|(_, upper)| s.average < *upper)
        {
            distribution[i].count += 1;
        }
    }

    CourseReport {
        course_id: course_id.to_string(),
        course_name: course.name.clone(),
        subject: course.subject.clone(),
        grade_level: course.grade_level.clone(),
        exam_type: course.exam_type.clone(),
        teacher: course.teacher.clone(),
        generated_at: generated_at.format("%Y-%m-%dT%H:%M:%S").to_string(),
        students,
        class_average,
        distribution,
    }
}

impl CourseReport {
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "COURSE REPORT - {}", self.course_id);
        let _ = writeln!(
            out,
            "Course: {} | Teacher: {}",
            self.course_name,
            self.teacher.as_deref().unwrap_or("Unassigned")
        );
        let _ = writeln!(
            out,
            "Subject: {} | Grade: {} | Exam: {}",
            self.subject.as_deref().unwrap_or("-"),
            self.grade_level.as_deref().unwrap_or("-"),
            self.exam_type.as_deref().unwrap_or("-")
        );
        let _ = writeln!(out, "Generated At: {}", self.generated_at);
        out.push('\n');
        out.push_str("Student ID, Student Name, Average\n");
        out.push_str("--------------------------------------\n");
        for s in &self.students {
            let _ = writeln!(
                out,
                "{}, {}, {}",
                s.student_id,
                s.student_name,
                format_average(s.average)
            );
        }
        let _ = writeln!(out, "\nClass Average: {}\n", format_average(self.class_average));
        out.push_str("Performance Distribution:\n");
        for b in &self.distribution {
            let _ = writeln!(out, "{} → {} students", b.label, b.count);
        }
        out
    }

    pub fn file_name(&self, at: DateTime<Local>) -> String {
        format!("{}_report_{}.txt", self.course_id, at.format("%Y-%m-%d_%H-%M"))
    }
}
