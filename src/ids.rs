use crate::calc::Category;
use rand::Rng;
use std::collections::HashSet;

pub const ID_SPACE: u32 = 10_000;

/// Entity set an ID must be unique within.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdScope {
    Assessment(Category),
    Staff,
    Student,
}

impl IdScope {
    pub fn prefix(self) -> &'static str {
        match self {
            IdScope::Assessment(Category::Test) => "T",
            IdScope::Assessment(Category::Exam) => "E",
            IdScope::Staff => "S",
            IdScope::Student => "L",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "staff" => Some(IdScope::Staff),
            "student" => Some(IdScope::Student),
            other => Category::from_type_name(other).map(IdScope::Assessment),
        }
    }
}

/// `prefix` followed by a zero-padded draw from `[0, 10000)`, redrawn until
/// it is not in `existing`. Never returns when the whole space is taken.
pub fn generate<R: Rng + ?Sized>(rng: &mut R, existing: &HashSet<String>, prefix: &str) -> String {
    loop {
        let n: u32 = rng.gen_range(0..ID_SPACE);
        let id = format!("{prefix}{n:04}");
        if !existing.contains(&id) {
            return id;
        }
    }
}

/// True when every code under `prefix` is already taken.
pub fn is_saturated(existing: &HashSet<String>, prefix: &str) -> bool {
    let taken = existing
        .iter()
        .filter(|id| {
            id.strip_prefix(prefix)
                .is_some_and(|n| n.len() == 4 && n.bytes().all(|b| b.is_ascii_digit()))
        })
        .count();
    taken >= ID_SPACE as usize
}
