//! Validated question content and the per-render option shuffle.

use indexmap::IndexSet;
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use thiserror::Error;

use crate::dao::models::QuestionEntity;

/// Reasons a question loaded from content is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuestionError {
    #[error("question {index} has no options")]
    NoOptions { index: usize },
    #[error("question {index} lists option `{option}` twice")]
    DuplicateOption { index: usize, option: String },
    #[error("answer of question {index} is not one of its options")]
    AnswerNotAnOption { index: usize },
}

/// Immutable multiple-choice question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    text: String,
    options: IndexSet<String>,
    answer: String,
}

impl Question {
    /// Validate a raw entity found at position `index` of its set.
    pub fn from_entity(index: usize, entity: QuestionEntity) -> Result<Self, QuestionError> {
        if entity.options.is_empty() {
            return Err(QuestionError::NoOptions { index });
        }

        let mut options = IndexSet::with_capacity(entity.options.len());
        for option in entity.options {
            if let Some(duplicate) = options.replace(option) {
                return Err(QuestionError::DuplicateOption {
                    index,
                    option: duplicate,
                });
            }
        }

        if !options.contains(&entity.answer) {
            return Err(QuestionError::AnswerNotAnOption { index });
        }

        Ok(Self {
            text: entity.question,
            options,
            answer: entity.answer,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn answer(&self) -> &str {
        &self.answer
    }

    pub fn options(&self) -> impl Iterator<Item = &str> {
        self.options.iter().map(String::as_str)
    }

    pub fn has_option(&self, option: &str) -> bool {
        self.options.contains(option)
    }

    /// Options in a uniform random order that is stable for a given seed.
    pub fn shuffled_options(&self, seed: u64) -> Vec<String> {
        let mut options = self.options.iter().cloned().collect::<Vec<_>>();
        let mut rng = StdRng::seed_from_u64(seed);
        options.shuffle(&mut rng);
        options
    }
}

/// Ordered questions served for one level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionSet {
    level: u32,
    questions: Vec<Question>,
}

impl QuestionSet {
    pub fn from_entities(level: u32, entities: Vec<QuestionEntity>) -> Result<Self, QuestionError> {
        let questions = entities
            .into_iter()
            .enumerate()
            .map(|(index, entity)| Question::from_entity(index, entity))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { level, questions })
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn get(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

/// Derive the shuffle seed for one question of one session.
pub fn option_seed(session_seed: u64, question_index: usize) -> u64 {
    let index = u64::try_from(question_index).unwrap_or(u64::MAX);
    session_seed ^ index.wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(options: &[&str], answer: &str) -> QuestionEntity {
        QuestionEntity {
            question: "Capital of France?".into(),
            options: options.iter().map(|o| o.to_string()).collect(),
            answer: answer.into(),
        }
    }

    #[test]
    fn valid_question_keeps_option_order() {
        let question =
            Question::from_entity(0, entity(&["Paris", "Rome", "Oslo", "Bern"], "Paris")).unwrap();
        assert_eq!(
            question.options().collect::<Vec<_>>(),
            ["Paris", "Rome", "Oslo", "Bern"]
        );
        assert_eq!(question.answer(), "Paris");
    }

    #[test]
    fn duplicate_options_are_rejected() {
        let err = Question::from_entity(4, entity(&["Paris", "Paris"], "Paris")).unwrap_err();
        assert_eq!(
            err,
            QuestionError::DuplicateOption {
                index: 4,
                option: "Paris".into()
            }
        );
    }

    #[test]
    fn answer_must_be_an_option() {
        let err = Question::from_entity(1, entity(&["Rome", "Oslo"], "Paris")).unwrap_err();
        assert_eq!(err, QuestionError::AnswerNotAnOption { index: 1 });
    }

    #[test]
    fn empty_options_are_rejected() {
        let err = Question::from_entity(2, entity(&[], "Paris")).unwrap_err();
        assert_eq!(err, QuestionError::NoOptions { index: 2 });
    }

    #[test]
    fn shuffle_is_a_reproducible_permutation() {
        let question =
            Question::from_entity(0, entity(&["A", "B", "C", "D", "E", "F"], "A")).unwrap();
        let first = question.shuffled_options(42);
        let second = question.shuffled_options(42);
        assert_eq!(first, second);

        let mut sorted = first.clone();
        sorted.sort();
        assert_eq!(sorted, ["A", "B", "C", "D", "E", "F"]);
    }

    #[test]
    fn shuffle_reaches_every_position() {
        let question = Question::from_entity(0, entity(&["A", "B", "C", "D"], "A")).unwrap();
        let mut first_slots = IndexSet::new();
        for seed in 0..200 {
            first_slots.insert(question.shuffled_options(seed)[0].clone());
        }
        assert_eq!(first_slots.len(), 4);
    }

    #[test]
    fn seeds_differ_per_question() {
        assert_ne!(option_seed(7, 0), option_seed(7, 1));
        assert_eq!(option_seed(7, 3), option_seed(7, 3));
    }
}
