//! Question service.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tally_common::{AppError, AppResult};
use tally_db::model::{Choice, Question};
use tally_db::SurveyStore;
use tracing::info;
use validator::Validate;

use super::timeout::bounded;

/// Input for editing a question.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateQuestionInput {
    #[validate(length(min = 1, max = 500))]
    pub question: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub choices: Option<Vec<Choice>>,
    pub sort_order: Option<i32>,
}

/// The questions a fresh deployment starts with.
#[must_use]
pub fn default_questions() -> Vec<Question> {
    let build = |id: &str, sort_order: i32, label: &str, count: usize| Question {
        id: id.to_string(),
        question: format!("Question {sort_order}"),
        choices: (1..=count)
            .map(|n| Choice {
                text: format!("{label} {n}"),
            })
            .collect(),
        sort_order,
    };
    vec![build("q1", 1, "Option", 9), build("q2", 2, "Choice", 5)]
}

/// Question service.
#[derive(Clone)]
pub struct QuestionService {
    store: Arc<dyn SurveyStore>,
    store_timeout: Duration,
}

impl QuestionService {
    /// Create a new question service.
    #[must_use]
    pub fn new(store: Arc<dyn SurveyStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
        }
    }

    /// Questions in display order.
    pub async fn list(&self) -> AppResult<Vec<Question>> {
        bounded(self.store_timeout, self.store.list_questions()).await
    }

    /// Questions in display order, seeding the defaults into an empty store.
    pub async fn list_or_seed(&self) -> AppResult<Vec<Question>> {
        let questions = self.list().await?;
        if !questions.is_empty() {
            return Ok(questions);
        }

        let defaults = default_questions();
        for question in &defaults {
            bounded(self.store_timeout, self.store.save_question(question)).await?;
        }
        info!(count = defaults.len(), "Seeded default questions");
        Ok(defaults)
    }

    /// Edit a question's text, choice texts or order.
    ///
    /// Choices are addressed by position, so the choice list may grow but
    /// never shrink.
    pub async fn update(&self, id: &str, input: UpdateQuestionInput) -> AppResult<Question> {
        input.validate()?;

        let mut question = bounded(self.store_timeout, self.store.find_question(id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Question not found: {id}")))?;

        if let Some(text) = input.question {
            question.question = text;
        }
        if let Some(choices) = input.choices {
            if choices.len() < question.choices.len() {
                return Err(AppError::Validation(format!(
                    "Question {id} has {} choices; choices cannot be removed",
                    question.choices.len()
                )));
            }
            if choices.iter().any(|c| c.text.trim().is_empty()) {
                return Err(AppError::Validation(
                    "Choice text cannot be empty".to_string(),
                ));
            }
            question.choices = choices;
        }
        if let Some(sort_order) = input.sort_order {
            question.sort_order = sort_order;
        }

        bounded(self.store_timeout, self.store.save_question(&question)).await?;
        Ok(question)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tally_db::MemorySurveyStore;

    fn service() -> QuestionService {
        QuestionService::new(Arc::new(MemorySurveyStore::new()), Duration::from_secs(1))
    }

    fn choices(texts: &[&str]) -> Vec<Choice> {
        texts
            .iter()
            .map(|t| Choice {
                text: (*t).to_string(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_list_or_seed_seeds_once() {
        let service = service();

        let seeded = service.list_or_seed().await.unwrap();
        assert_eq!(seeded.len(), 2);
        assert_eq!(seeded[0].choices.len(), 9);
        assert_eq!(seeded[0].choices[8].text, "Option 9");
        assert_eq!(seeded[1].choices[0].text, "Choice 1");

        assert_eq!(service.list().await.unwrap(), seeded);
    }

    #[tokio::test]
    async fn test_update_renames_and_grows_choices() {
        let service = service();
        service.list_or_seed().await.unwrap();

        let mut texts: Vec<String> = (1..=5).map(|n| format!("Renamed {n}")).collect();
        texts.push("Added".to_string());
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();

        let updated = service
            .update(
                "q2",
                UpdateQuestionInput {
                    question: Some("Favourite?".to_string()),
                    choices: Some(choices(&refs)),
                    sort_order: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.question, "Favourite?");
        assert_eq!(updated.choices.len(), 6);
        assert_eq!(updated.sort_order, 2);
    }

    #[tokio::test]
    async fn test_update_refuses_to_drop_choices() {
        let service = service();
        service.list_or_seed().await.unwrap();

        let err = service
            .update(
                "q2",
                UpdateQuestionInput {
                    question: None,
                    choices: Some(choices(&["Only one"])),
                    sort_order: None,
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(service.list().await.unwrap()[1].choices.len(), 5);
    }

    #[tokio::test]
    async fn test_update_unknown_question() {
        let err = service()
            .update(
                "q7",
                UpdateQuestionInput {
                    question: Some("x".to_string()),
                    choices: None,
                    sort_order: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
