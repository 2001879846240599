use crate::models::exam::BookletType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AnswerOption {
    A,
    B,
    C,
    D,
    E,
}

impl AnswerOption {
    /// Case-insensitive; anything outside A-E is `None`.
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'A' => Some(AnswerOption::A),
            'B' => Some(AnswerOption::B),
            'C' => Some(AnswerOption::C),
            'D' => Some(AnswerOption::D),
            'E' => Some(AnswerOption::E),
            _ => None,
        }
    }

    /// Parses a stored answer letter, ignoring surrounding whitespace.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut chars = raw.trim().chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Self::from_char(c),
            _ => None,
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            AnswerOption::A => 'A',
            AnswerOption::B => 'B',
            AnswerOption::C => 'C',
            AnswerOption::D => 'D',
            AnswerOption::E => 'E',
        }
    }
}

impl fmt::Display for AnswerOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// A row of the exam's master answer key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalAnswerRow {
    pub question_number: u32,
    pub correct_answer: String,
    pub subject_code: Option<String>,
    pub subject_name: Option<String>,
    #[serde(default)]
    pub booklet_question_numbers: BTreeMap<BookletType, u32>,
    #[serde(default)]
    pub booklet_answers: BTreeMap<BookletType, String>,
    pub competency_code: Option<String>,
    pub competency_text: Option<String>,
}

impl CanonicalAnswerRow {
    pub fn new(question_number: u32, correct_answer: &str, subject_code: &str) -> Self {
        Self {
            question_number,
            correct_answer: correct_answer.to_string(),
            subject_code: Some(subject_code.to_string()),
            subject_name: None,
            booklet_question_numbers: BTreeMap::new(),
            booklet_answers: BTreeMap::new(),
            competency_code: None,
            competency_text: None,
        }
    }

    pub fn with_booklet(mut self, booklet: BookletType, question_number: u32, answer: Option<&str>) -> Self {
        self.booklet_question_numbers.insert(booklet, question_number);
        if let Some(answer) = answer {
            self.booklet_answers.insert(booklet, answer.to_string());
        }
        self
    }

    pub fn with_competency(mut self, code: &str, text: Option<&str>) -> Self {
        self.competency_code = Some(code.to_string());
        self.competency_text = text.map(str::to_string);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedKeyEntry {
    pub booklet_question_number: u32,
    pub answer: AnswerOption,
    pub canonical_question_number: u32,
    pub competency_code: Option<String>,
    pub competency_text: Option<String>,
}

/// Resolved key of one test in one booklet, ordered by booklet question number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookletAnswerKey {
    pub exam_test_id: Uuid,
    pub booklet: BookletType,
    pub entries: Vec<ResolvedKeyEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookletKeySet {
    pub exam_id: Uuid,
    pub fingerprint: String,
    pub keys: Vec<BookletAnswerKey>,
}

impl BookletKeySet {
    pub fn empty(exam_id: Uuid) -> Self {
        Self {
            exam_id,
            fingerprint: String::new(),
            keys: Vec::new(),
        }
    }

    pub fn key_for(&self, exam_test_id: Uuid, booklet: BookletType) -> Option<&BookletAnswerKey> {
        self.keys
            .iter()
            .find(|k| k.exam_test_id == exam_test_id && k.booklet == booklet)
    }

    pub fn keys_for_test(&self, exam_test_id: Uuid) -> BTreeMap<BookletType, Vec<ResolvedKeyEntry>> {
        self.keys
            .iter()
            .filter(|k| k.exam_test_id == exam_test_id)
            .map(|k| (k.booklet, k.entries.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Competency {
    pub code: String,
    pub text: Option<String>,
    pub subject_code: Option<String>,
    pub questions: BTreeSet<u32>,
}

/// Competency code -> tagged canonical questions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompetencyMap {
    pub competencies: BTreeMap<String, Competency>,
}

impl CompetencyMap {
    pub fn from_rows(rows: &[CanonicalAnswerRow]) -> Self {
        let mut map = Self::default();
        for row in rows {
            if let Some(code) = row.competency_code.as_deref() {
                map.tag(
                    row.question_number,
                    code,
                    row.competency_text.as_deref(),
                    row.subject_code.as_deref(),
                );
            }
        }
        map
    }

    pub fn tag(&mut self, question_number: u32, code: &str, text: Option<&str>, subject_code: Option<&str>) {
        let code = code.trim();
        if code.is_empty() {
            return;
        }
        let entry = self
            .competencies
            .entry(code.to_string())
            .or_insert_with(|| Competency {
                code: code.to_string(),
                text: None,
                subject_code: subject_code.map(str::to_string),
                questions: BTreeSet::new(),
            });
        if entry.text.is_none() {
            entry.text = text.map(str::to_string);
        }
        entry.questions.insert(question_number);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Competency> {
        self.competencies.values()
    }
}
