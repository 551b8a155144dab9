use std::collections::HashSet;

use crate::{
    error::{Error, Result},
    model::{api::vote::Answer, db::ballot::Question, mongodb::Id},
};

/// Longest write-in accepted, in characters.
pub const MAX_WRITE_IN_LEN: usize = 256;

/// What a single validated answer selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Choice {
    /// One of the question's predefined options.
    Option(Id),
    /// Free text supplied instead of an option. Always trimmed and non-empty.
    WriteIn(String),
}

/// An answer that has been checked against the ballot structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidAnswer {
    pub question_id: Id,
    pub choice: Choice,
}

/// Check a full submission against the ballot's questions.
///
/// Nothing is written before this succeeds. A submission may skip questions,
/// but may not answer any question twice.
pub fn validate_answers(questions: &[Question], answers: &[Answer]) -> Result<Vec<ValidAnswer>> {
    if answers.is_empty() {
        return Err(Error::InvalidAnswer("no answers were given".to_string()));
    }

    let mut seen = HashSet::with_capacity(answers.len());
    answers
        .iter()
        .map(|answer| {
            let question = questions
                .iter()
                .find(|q| q.id == answer.question_id)
                .ok_or(Error::InvalidQuestion(answer.question_id))?;
            if !seen.insert(question.id) {
                return Err(Error::InvalidAnswer(format!(
                    "question {} was answered more than once",
                    question.id
                )));
            }
            let choice = validate_choice(question, answer)?;
            Ok(ValidAnswer {
                question_id: question.id,
                choice,
            })
        })
        .collect()
}

fn validate_choice(question: &Question, answer: &Answer) -> Result<Choice> {
    let write_in = answer
        .write_in
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty());

    match (answer.option_id, write_in) {
        (Some(option), None) => {
            if question.options.iter().any(|o| o.id == option) {
                Ok(Choice::Option(option))
            } else {
                Err(Error::InvalidOption {
                    question: question.id,
                    option,
                })
            }
        }
        (None, Some(text)) => {
            if !question.allow_write_in {
                return Err(Error::InvalidAnswer(format!(
                    "question {} does not accept write-ins",
                    question.id
                )));
            }
            if text.chars().count() > MAX_WRITE_IN_LEN {
                return Err(Error::InvalidAnswer(format!(
                    "write-in is longer than {MAX_WRITE_IN_LEN} characters"
                )));
            }
            Ok(Choice::WriteIn(text.to_string()))
        }
        (Some(_), Some(_)) => Err(Error::InvalidAnswer(format!(
            "answer to question {} gives both an option and a write-in",
            question.id
        ))),
        (None, None) => Err(Error::InvalidAnswer(format!(
            "answer to question {} gives neither an option nor a write-in",
            question.id
        ))),
    }
}
