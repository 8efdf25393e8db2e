pub(crate) mod scoring;
pub(crate) mod verification;
pub(crate) mod vision;

use async_trait::async_trait;

use crate::db::models::{MarkingScheme, QuestionScore, VerificationOutcome};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ExtractedText {
    pub(crate) text: String,
    pub(crate) confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ScoredAnswers {
    pub(crate) question_scores: Vec<QuestionScore>,
    pub(crate) total_score: f64,
    pub(crate) max_score: f64,
    pub(crate) confidence: f64,
}

/// Reads handwritten answers off a script image.
#[async_trait]
pub(crate) trait VisionExtraction: Send + Sync {
    async fn extract_text(&self, image: &[u8], file_name: &str) -> anyhow::Result<ExtractedText>;
}

/// Scores extracted answers against a marking scheme.
#[async_trait]
pub(crate) trait SemanticScoring: Send + Sync {
    async fn score_answers(
        &self,
        extracted_text: &str,
        scheme: &MarkingScheme,
    ) -> anyhow::Result<ScoredAnswers>;
}

/// Second-pass check of the awarded scores.
#[async_trait]
pub(crate) trait Verification: Send + Sync {
    async fn verify(
        &self,
        extracted_text: &str,
        scored: &ScoredAnswers,
        scheme: &MarkingScheme,
    ) -> anyhow::Result<VerificationOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scored_answers_compare_by_value() {
        let make = || ScoredAnswers {
            question_scores: vec![QuestionScore {
                question_number: "1".to_string(),
                awarded_marks: 7.5,
                max_marks: 10.0,
                confidence: 0.9,
                feedback: String::new(),
            }],
            total_score: 7.5,
            max_score: 10.0,
            confidence: 0.9,
        };
        assert_eq!(make(), make());
    }
}
