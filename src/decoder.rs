//! Response decoder
//!
//! Turns one respondent's raw answer string and score fields into per-topic
//! signals, using a [`ResolvedMapping`] handed in by the caller.
//!
//! - Objective answers: `'1'` correct, `'0'` incorrect, anything else ignored
//! - Discursive scores: numeric text, `.` or `,` as decimal separator
//! - Every signal fans out to each topic its question maps to

use crate::error::MalformedSignal;
use crate::mapping::{QuestionSource, ResolvedMapping};
use crate::schema::RespondentRecord;
use crate::types::{Signal, TopicSignal, MAX_ABS_SCORE};

/// Output of decoding one record against one block
#[derive(Debug, Default, PartialEq)]
pub struct Decoded<'m> {
    pub signals: Vec<TopicSignal<'m>>,
    pub defects: Vec<MalformedSignal>,
}

/// Stateless decoder
pub struct ResponseDecoder;

impl ResponseDecoder {
    /// Decode one block of a record
    ///
    /// # Arguments
    /// * `record` - Respondent row, used for discursive score fields
    /// * `answers` - The block's objective answer string, if present
    /// * `mapping` - Resolved mapping for the record's (group, year) or year
    pub fn decode<'m>(
        record: &RespondentRecord,
        answers: Option<&str>,
        mapping: &'m ResolvedMapping,
    ) -> Decoded<'m> {
        let mut decoded = Decoded::default();
        Self::decode_objective(answers, mapping, &mut decoded);
        Self::decode_discursive(record, mapping, &mut decoded);
        decoded
    }

    fn decode_objective<'m>(
        answers: Option<&str>,
        mapping: &'m ResolvedMapping,
        out: &mut Decoded<'m>,
    ) {
        // Offsets count characters; absent or truncated strings skip the block
        let Some(answers) = answers else {
            return;
        };
        let answers: Vec<char> = answers.chars().collect();
        if answers.len() < mapping.min_answer_len {
            return;
        }

        for question in &mapping.objective {
            let QuestionSource::Offset(offset) = question.source else {
                continue;
            };
            let Some(&answer) = answers.get(offset) else {
                out.defects.push(MalformedSignal::AnswerTooShort);
                continue;
            };
            let signal = match answer {
                '1' => Signal::Objective { correct: true },
                '0' => Signal::Objective { correct: false },
                _ => continue,
            };
            fan_out(&question.topics, mapping, signal, out);
        }
    }

    fn decode_discursive<'m>(
        record: &RespondentRecord,
        mapping: &'m ResolvedMapping,
        out: &mut Decoded<'m>,
    ) {
        for question in &mapping.discursive {
            let QuestionSource::ScoreField(field) = &question.source else {
                continue;
            };
            let Some(raw) = record.score_field(field) else {
                continue;
            };
            match parse_score(raw) {
                Ok(Some(score)) => {
                    fan_out(&question.topics, mapping, Signal::Discursive { score }, out)
                }
                Ok(None) => {}
                Err(defect) => out.defects.push(defect),
            }
        }
    }
}

fn fan_out<'m>(topics: &[usize], mapping: &'m ResolvedMapping, signal: Signal, out: &mut Decoded<'m>) {
    for &position in topics {
        out.signals.push(TopicSignal {
            topic: mapping.topic(position),
            signal,
        });
    }
}

/// Parse a raw discursive score; blank means absent
pub fn parse_score(raw: &str) -> Result<Option<f64>, MalformedSignal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let normalized = trimmed.replace(',', ".");
    match normalized.parse::<f64>() {
        Ok(value) if !value.is_finite() => Err(MalformedSignal::NonNumericScore),
        Ok(value) if value.abs() > MAX_ABS_SCORE => Err(MalformedSignal::ScoreOutOfRange),
        Ok(value) => Ok(Some(value)),
        Err(_) => Err(MalformedSignal::NonNumericScore),
    }
}
