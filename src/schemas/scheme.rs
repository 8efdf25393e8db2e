use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::{MarkingScheme, SchemeQuestion};

#[derive(Debug, Serialize, Deserialize, Validate)]
pub(crate) struct SchemeQuestionCreate {
    #[validate(length(min = 1, message = "question_number must not be empty"))]
    pub(crate) question_number: String,
    #[validate(length(min = 1, message = "question_text must not be empty"))]
    pub(crate) question_text: String,
    #[validate(range(exclusive_min = 0.0, message = "max_marks must be positive"))]
    pub(crate) max_marks: f64,
    pub(crate) model_answer: String,
    #[serde(default)]
    pub(crate) keywords: Vec<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct SchemeCreate {
    #[validate(length(min = 1, message = "name must not be empty"))]
    pub(crate) name: String,
    #[validate(length(min = 1, message = "subject must not be empty"))]
    pub(crate) subject: String,
    #[validate(range(exclusive_min = 0.0, message = "total_marks must be positive"))]
    pub(crate) total_marks: f64,
    #[serde(default = "default_passing_marks")]
    #[validate(range(min = 0.0, message = "passing_marks must be non-negative"))]
    pub(crate) passing_marks: f64,
    #[validate(length(min = 1, message = "questions must not be empty"))]
    #[validate(nested)]
    pub(crate) questions: Vec<SchemeQuestionCreate>,
}

fn default_passing_marks() -> f64 {
    40.0
}

#[derive(Debug, Serialize)]
pub(crate) struct SchemeResponse {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) subject: String,
    pub(crate) total_marks: f64,
    pub(crate) passing_marks: f64,
    pub(crate) questions: Vec<SchemeQuestion>,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
}

impl SchemeResponse {
    pub(crate) fn from_model(scheme: MarkingScheme) -> Self {
        Self {
            id: scheme.id,
            name: scheme.name,
            subject: scheme.subject,
            total_marks: scheme.total_marks,
            passing_marks: scheme.passing_marks,
            questions: scheme.questions.0,
            created_at: format_primitive(scheme.created_at),
            updated_at: format_primitive(scheme.updated_at),
        }
    }
}
