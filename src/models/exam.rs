use crate::error::{Error, Result};
use crate::utils::validation::validate_all;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Physically reordered edition of an exam sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BookletType {
    A,
    B,
    C,
    D,
}

impl BookletType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookletType::A => "A",
            BookletType::B => "B",
            BookletType::C => "C",
            BookletType::D => "D",
        }
    }
}

impl fmt::Display for BookletType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookletType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(BookletType::A),
            "B" => Ok(BookletType::B),
            "C" => Ok(BookletType::C),
            "D" => Ok(BookletType::D),
            other => Err(Error::BadRequest(format!("Unknown booklet type: {:?}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exam {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub exam_type_id: Uuid,
    pub name: String,
    pub negative_coefficient: Decimal,
    pub booklet_types: Vec<BookletType>,
}

impl Exam {
    pub fn new(id: Uuid, organization_id: Uuid, exam_type_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            organization_id,
            exam_type_id,
            name: name.into(),
            negative_coefficient: default_coefficient(),
            booklet_types: default_booklets(),
        }
    }

    /// Allowed booklets, sorted and deduplicated. Falls back to A/B when the
    /// stored set is empty.
    pub fn booklets(&self) -> Vec<BookletType> {
        let mut booklets = self.booklet_types.clone();
        booklets.sort();
        booklets.dedup();
        if booklets.is_empty() {
            return default_booklets();
        }
        booklets
    }

    pub fn validate_scoring(&self) -> Result<()> {
        if self.negative_coefficient.is_sign_negative() {
            return Err(Error::BadRequest(format!(
                "Exam {} has a negative marking coefficient of {}",
                self.id, self.negative_coefficient
            )));
        }
        Ok(())
    }
}

pub fn default_coefficient() -> Decimal {
    Decimal::ONE / Decimal::from(3)
}

pub fn default_booklets() -> Vec<BookletType> {
    vec![BookletType::A, BookletType::B]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamType {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub subjects: Vec<SubjectRange>,
}

impl ExamType {
    /// Checks every range and that no two ranges share a canonical question.
    pub fn validate_layout(&self) -> Result<()> {
        validate_all(&self.subjects)?;

        let mut ranges: Vec<&SubjectRange> = self.subjects.iter().collect();
        ranges.sort_by_key(|r| r.start);
        for pair in ranges.windows(2) {
            if pair[1].start <= pair[0].end {
                return Err(Error::BadRequest(format!(
                    "Subject ranges {} [{}-{}] and {} [{}-{}] overlap in exam type {}",
                    pair[0].code, pair[0].start, pair[0].end, pair[1].code, pair[1].start, pair[1].end, self.code
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_bounds"))]
pub struct SubjectRange {
    #[validate(length(min = 1))]
    pub code: String,
    pub name: String,
    #[validate(range(min = 1))]
    pub start: u32,
    pub end: u32,
    pub weight: Option<Decimal>,
}

fn validate_bounds(range: &SubjectRange) -> std::result::Result<(), ValidationError> {
    if range.end < range.start {
        let mut err = ValidationError::new("range_bounds");
        err.message = Some(format!("end {} is before start {}", range.end, range.start).into());
        return Err(err);
    }
    Ok(())
}

impl SubjectRange {
    pub fn new(code: impl Into<String>, name: impl Into<String>, start: u32, end: u32) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            start,
            end,
            weight: None,
        }
    }

    pub fn len(&self) -> usize {
        if self.end < self.start {
            return 0;
        }
        (self.end - self.start + 1) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, question_number: u32) -> bool {
        question_number >= self.start && question_number <= self.end
    }

    pub fn weight_or_default(&self) -> Decimal {
        self.weight.unwrap_or(Decimal::ONE)
    }
}

/// One test of an exam, administered per subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamTest {
    pub id: Uuid,
    pub exam_id: Uuid,
    pub subject_code: Option<String>,
    pub subject_name: String,
}

impl ExamTest {
    pub fn code_matches(&self, code: Option<&str>) -> bool {
        match (self.subject_code.as_deref(), code) {
            (Some(ours), Some(theirs)) => same_label(ours, theirs),
            _ => false,
        }
    }

    pub fn name_matches(&self, name: Option<&str>) -> bool {
        name.map(|theirs| same_label(&self.subject_name, theirs))
            .unwrap_or(false)
    }

    /// Picks the test for a subject range: code match first, name second.
    pub fn find_for_range<'a>(tests: &'a [ExamTest], range: &SubjectRange) -> Option<&'a ExamTest> {
        tests
            .iter()
            .find(|t| t.code_matches(Some(&range.code)))
            .or_else(|| tests.iter().find(|t| t.name_matches(Some(&range.name))))
    }

    pub fn label(&self) -> String {
        match &self.subject_code {
            Some(code) => format!("{} ({})", self.subject_name, code),
            None => self.subject_name.clone(),
        }
    }
}

pub fn same_label(a: &str, b: &str) -> bool {
    let a = a.trim();
    let b = b.trim();
    !a.is_empty() && a.to_lowercase() == b.to_lowercase()
}
