//! Respondent records and the bounded-batch table reader
//!
//! A respondent table is a delimited file with one row per exam taker. The
//! reader streams it in batches of at most `batch_size` records so peak memory
//! stays independent of table size.

use crate::config::TableConfig;
use crate::error::ComputeError;
use crate::types::{CourseCode, QuestionBlock};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io::Read;

/// One exam taker's row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RespondentRecord {
    pub course_code: CourseCode,
    /// Encoded objective answers for the general block
    pub general_answers: Option<String>,
    /// Encoded objective answers for the subject-specific block
    pub specific_answers: Option<String>,
    /// Raw discursive score fields keyed by upper-case column name
    pub score_fields: BTreeMap<String, String>,
}

impl RespondentRecord {
    pub fn new(course_code: impl Into<String>) -> Self {
        Self {
            course_code: course_code.into(),
            ..Default::default()
        }
    }

    pub fn with_general_answers(mut self, answers: impl Into<String>) -> Self {
        self.general_answers = Some(answers.into());
        self
    }

    pub fn with_specific_answers(mut self, answers: impl Into<String>) -> Self {
        self.specific_answers = Some(answers.into());
        self
    }

    pub fn with_score(mut self, field: &str, value: impl Into<String>) -> Self {
        self.score_fields
            .insert(field.to_ascii_uppercase(), value.into());
        self
    }

    /// Encoded answer string for a block, if present
    pub fn answers(&self, block: QuestionBlock) -> Option<&str> {
        match block {
            QuestionBlock::General => self.general_answers.as_deref(),
            QuestionBlock::Specific => self.specific_answers.as_deref(),
        }
    }

    pub fn score_field(&self, name: &str) -> Option<&str> {
        self.score_fields.get(name).map(String::as_str)
    }
}

/// Normalize a code read from a table: trims, strips quotes and collapses
/// integral floats (`"123.0"` → `"123"`).
pub fn normalize_code(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('"').trim();
    if let Some((int_part, frac)) = trimmed.split_once('.') {
        if !int_part.is_empty()
            && int_part.bytes().all(|b| b.is_ascii_digit())
            && frac.bytes().all(|b| b == b'0')
        {
            return int_part.to_string();
        }
    }
    trimmed.to_string()
}

/// Decode a raw field; anything that is not UTF-8 is read as Latin-1 so each
/// byte stays exactly one character.
fn decode_field(bytes: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => Cow::Owned(bytes.iter().map(|&b| char::from(b)).collect()),
    }
}

fn normalize_header(raw: &str) -> String {
    raw.trim().trim_matches('"').trim().to_ascii_uppercase()
}

struct ColumnIndex {
    course: usize,
    general_answers: Option<usize>,
    specific_answers: Option<usize>,
    scores: Vec<(String, usize)>,
}

impl ColumnIndex {
    fn from_headers(
        headers: &csv::ByteRecord,
        table: &TableConfig,
        score_prefixes: &[String],
    ) -> Result<Self, ComputeError> {
        let names: Vec<String> = headers
            .iter()
            .map(|h| normalize_header(&String::from_utf8_lossy(h)))
            .collect();
        let find = |wanted: &str| {
            let wanted = normalize_header(wanted);
            names.iter().position(|n| *n == wanted)
        };

        let course = find(table.course_column.as_str())
            .ok_or_else(|| ComputeError::MissingColumn(table.course_column.clone()))?;
        let general_answers = find(table.general_answers_column.as_str());
        let specific_answers = find(table.specific_answers_column.as_str());
        if general_answers.is_none() && specific_answers.is_none() {
            tracing::warn!(
                general = %table.general_answers_column,
                specific = %table.specific_answers_column,
                "respondent table has no objective answer columns"
            );
        }

        let prefixes: Vec<String> = score_prefixes.iter().map(|p| normalize_header(p)).collect();
        let scores = names
            .iter()
            .enumerate()
            .filter(|(_, n)| prefixes.iter().any(|p| n.starts_with(p.as_str())))
            .map(|(i, n)| (n.clone(), i))
            .collect();

        Ok(Self {
            course,
            general_answers,
            specific_answers,
            scores,
        })
    }
}

/// Streaming iterator over batches of respondent records
pub struct RespondentBatches<R: Read> {
    reader: csv::Reader<R>,
    columns: ColumnIndex,
    batch_size: usize,
    row: csv::ByteRecord,
    finished: bool,
    rows_read: u64,
}

impl<R: Read> RespondentBatches<R> {
    /// Open a batch reader; fails when the header row lacks the course column
    pub fn new(
        source: R,
        table: &TableConfig,
        score_prefixes: &[String],
        batch_size: usize,
    ) -> Result<Self, ComputeError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(table.delimiter_byte()?)
            .has_headers(true)
            .flexible(true)
            .from_reader(source);
        let headers = reader.byte_headers()?.clone();
        let columns = ColumnIndex::from_headers(&headers, table, score_prefixes)?;

        Ok(Self {
            reader,
            columns,
            batch_size: batch_size.max(1),
            row: csv::ByteRecord::new(),
            finished: false,
            rows_read: 0,
        })
    }

    /// Rows consumed so far
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    fn raw_field(&self, index: Option<usize>) -> Option<Cow<'_, str>> {
        self.row.get(index?).map(decode_field)
    }

    fn field(&self, index: Option<usize>) -> Option<String> {
        let value = self.raw_field(index)?;
        let value = value.trim().trim_matches('"');
        if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        }
    }

    /// Answer strings are positional; only blank ones are dropped
    fn answer_field(&self, index: Option<usize>) -> Option<String> {
        let value = self.raw_field(index)?;
        if value.trim().is_empty() {
            None
        } else {
            Some(value.into_owned())
        }
    }

    fn current_record(&self) -> RespondentRecord {
        let course_code = self
            .field(Some(self.columns.course))
            .map(|c| normalize_code(&c))
            .unwrap_or_default();

        let score_fields = self
            .columns
            .scores
            .iter()
            .filter_map(|(name, i)| self.field(Some(*i)).map(|v| (name.clone(), v)))
            .collect();

        RespondentRecord {
            course_code,
            general_answers: self.answer_field(self.columns.general_answers),
            specific_answers: self.answer_field(self.columns.specific_answers),
            score_fields,
        }
    }
}

impl<R: Read> Iterator for RespondentBatches<R> {
    type Item = Result<Vec<RespondentRecord>, ComputeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut batch = Vec::with_capacity(self.batch_size.min(4096));
        while batch.len() < self.batch_size {
            match self.reader.read_byte_record(&mut self.row) {
                Ok(true) => {
                    self.rows_read += 1;
                    batch.push(self.current_record());
                }
                Ok(false) => {
                    self.finished = true;
                    break;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e.into()));
                }
            }
        }

        if batch.is_empty() {
            None
        } else {
            Some(Ok(batch))
        }
    }
}
