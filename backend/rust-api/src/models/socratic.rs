use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use super::user::bson_datetime_as_chrono;

/// Questions per Socratic session
pub const TOTAL_QUESTIONS: usize = 5;
pub const MIN_LEVEL: i32 = 1;
pub const MAX_LEVEL: i32 = 5;
pub const START_LEVEL: i32 = 3;

pub const GRADING_FALLBACK_FEEDBACK: &str =
    "Could not evaluate reliably. Please be more specific and reference the article.";

/// Socratic session stored in MongoDB "socratic_sessions" collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocraticSession {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub article_id: ObjectId,
    pub user_id: ObjectId,
    #[serde(default)]
    pub questions_asked: Vec<String>,
    #[serde(default)]
    pub questions_answered: Vec<AnswerRecord>,
    #[serde(default)]
    pub questions_asked_count: i32,
    #[serde(default)]
    pub questions_answered_count: i32,
    pub current_level: i32,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRecord {
    pub answer: String,
    pub score: f64,
    pub is_correct: bool,
    /// Level the question was asked at
    pub difficulty: i32,
}

/// Where a session stands, derived from the persisted arrays.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionPhase {
    AwaitingFirstQuestion,
    /// `index` is 1-based.
    AwaitingAnswer { index: usize, question: String },
    /// An answer was recorded but the follow-up question never got stored.
    NeedsQuestion { index: usize },
    Completed,
}

pub fn clamp_level(level: i32) -> i32 {
    level.clamp(MIN_LEVEL, MAX_LEVEL)
}

/// Difficulty after grading: one step up on a correct answer, one down otherwise.
pub fn next_level(current: i32, correct: bool) -> i32 {
    let step = if correct { 1 } else { -1 };
    clamp_level(current + step)
}

impl SocraticSession {
    pub fn new(article_id: ObjectId, user_id: ObjectId) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            article_id,
            user_id,
            questions_asked: Vec::new(),
            questions_answered: Vec::new(),
            questions_asked_count: 0,
            questions_answered_count: 0,
            current_level: START_LEVEL,
            is_completed: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        let answered = self.questions_answered.len();
        if self.is_completed || answered >= TOTAL_QUESTIONS {
            return SessionPhase::Completed;
        }
        if answered == 0 && self.questions_asked.is_empty() {
            return SessionPhase::AwaitingFirstQuestion;
        }
        match self.questions_asked.get(answered) {
            Some(question) => SessionPhase::AwaitingAnswer {
                index: answered + 1,
                question: question.clone(),
            },
            None => SessionPhase::NeedsQuestion {
                index: answered + 1,
            },
        }
    }

    /// 1-based index of the question the next answer belongs to
    pub fn current_index(&self) -> usize {
        self.questions_answered.len() + 1
    }

    pub fn level(&self) -> i32 {
        clamp_level(self.current_level)
    }

    /// Resets the session to a single opening question.
    pub fn start(&mut self, question: String) {
        self.questions_asked = vec![question];
        self.questions_answered.clear();
        self.current_level = START_LEVEL;
        self.is_completed = false;
        self.sync_counts();
    }

    /// 1-based slot an incoming answer is recorded into. Resubmitting the last
    /// answered question while its follow-up is missing targets that slot again.
    pub fn answer_slot(&self, client_index: Option<usize>, question: &str) -> usize {
        if let SessionPhase::NeedsQuestion { index } = self.phase() {
            let last = index - 1;
            let same_question = self
                .questions_asked
                .get(last.saturating_sub(1))
                .is_some_and(|asked| asked == question);
            if last >= 1 && (client_index == Some(last) || same_question) {
                return last;
            }
        }
        self.current_index()
    }

    /// Level the question at `index` was asked at
    pub fn difficulty_for(&self, index: usize) -> i32 {
        self.questions_answered
            .get(index.saturating_sub(1))
            .map(|record| record.difficulty)
            .unwrap_or_else(|| self.level())
    }

    /// Records the answer for the current index and advances level and completion.
    pub fn record_answer(&mut self, question: &str, record: AnswerRecord) -> usize {
        self.record_answer_at(self.current_index(), question, record)
    }

    /// Records the answer at a 1-based `index`, replacing an earlier answer there.
    /// `question` is the text the student saw; it wins over a stale stored copy.
    /// Returns the 1-based index that was answered.
    pub fn record_answer_at(&mut self, index: usize, question: &str, record: AnswerRecord) -> usize {
        let index = index.clamp(1, self.current_index());
        let slot = index - 1;

        match self.questions_asked.get_mut(slot) {
            Some(stored) if stored != question => *stored = question.to_string(),
            Some(_) => {}
            None => self.questions_asked.push(question.to_string()),
        }

        self.current_level = next_level(record.difficulty, record.is_correct);
        if let Some(existing) = self.questions_answered.get_mut(slot) {
            *existing = record;
        } else {
            self.questions_answered.push(record);
        }

        self.is_completed = self.questions_answered.len() >= TOTAL_QUESTIONS;
        self.sync_counts();
        index
    }

    pub fn push_question(&mut self, question: String) {
        self.questions_asked.push(question);
        self.sync_counts();
    }

    pub fn sync_counts(&mut self) {
        self.questions_asked_count = self.questions_asked.len() as i32;
        self.questions_answered_count = self.questions_answered.len() as i32;
        self.updated_at = Utc::now();
    }

    pub fn score_summary(&self) -> ScoreSummary {
        ScoreSummary::from_records(&self.questions_answered)
    }
}

/// Per-question scores and difficulty path, always `TOTAL_QUESTIONS` long
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreSummary {
    pub scores: Vec<f64>,
    pub difficulty_path: Vec<i32>,
    pub average: f64,
}

impl ScoreSummary {
    pub fn from_records(records: &[AnswerRecord]) -> Self {
        let mut scores: Vec<f64> = records
            .iter()
            .take(TOTAL_QUESTIONS)
            .map(|r| if r.score.is_finite() { r.score } else { 0.0 })
            .collect();
        scores.resize(TOTAL_QUESTIONS, 0.0);

        let mut difficulty_path: Vec<i32> = records
            .iter()
            .take(TOTAL_QUESTIONS)
            .map(|r| r.difficulty)
            .collect();
        difficulty_path.resize(TOTAL_QUESTIONS, 0);

        let sum: f64 = scores.iter().sum();
        let average = (sum / TOTAL_QUESTIONS as f64 * 100.0).round() / 100.0;

        Self {
            scores,
            difficulty_path,
            average,
        }
    }
}

/// Grading verdict for a single answer
#[derive(Debug, Clone, PartialEq)]
pub struct GradingResult {
    pub is_correct: bool,
    pub score: f64,
    pub feedback: String,
}

impl GradingResult {
    pub fn new(is_correct: bool, score: f64, feedback: String) -> Self {
        let score = if !is_correct || !score.is_finite() {
            0.0
        } else {
            score.clamp(0.0, 100.0)
        };
        Self {
            is_correct,
            score,
            feedback,
        }
    }

    pub fn fallback() -> Self {
        Self::new(false, 0.0, GRADING_FALLBACK_FEEDBACK.to_string())
    }
}

/// Aggregate evaluation written after the last answer
#[derive(Debug, Clone, PartialEq)]
pub struct FinalEvaluation {
    pub comprehension_score: i32,
    pub critical_thinking_score: i32,
    pub quality_score: i32,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub recommendations: Vec<String>,
    pub summary_text: String,
    pub is_fallback: bool,
}

impl FinalEvaluation {
    pub fn fallback() -> Self {
        Self {
            comprehension_score: 70,
            critical_thinking_score: 68,
            quality_score: 72,
            strengths: vec!["Completed the Socratic flow".to_string()],
            weaknesses: vec!["Some answers need more evidence".to_string()],
            recommendations: vec!["Add concrete examples from the article".to_string()],
            summary_text: "Feedback generation failed due to temporary limits. Try again later."
                .to_string(),
            is_fallback: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalFeedback {
    pub average_score: f64,
    pub scores: Vec<f64>,
    pub difficulty_path: Vec<i32>,
    pub comprehension_score: i32,
    pub critical_thinking_score: i32,
    pub quality_score: i32,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub recommendations: Vec<String>,
    pub summary_text: String,
    pub is_fallback: bool,
}

impl FinalFeedback {
    pub fn new(summary: ScoreSummary, evaluation: FinalEvaluation) -> Self {
        Self {
            average_score: summary.average,
            scores: summary.scores,
            difficulty_path: summary.difficulty_path,
            comprehension_score: evaluation.comprehension_score,
            critical_thinking_score: evaluation.critical_thinking_score,
            quality_score: evaluation.quality_score,
            strengths: evaluation.strengths,
            weaknesses: evaluation.weaknesses,
            recommendations: evaluation.recommendations,
            summary_text: evaluation.summary_text,
            is_fallback: evaluation.is_fallback,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub article_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSessionQuery {
    pub article_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocraticStepRequest {
    pub article_id: Option<String>,
    pub session_id: Option<String>,
    pub user_answer: Option<String>,
    pub current_level: Option<i32>,
    pub question_index: Option<usize>,
    pub current_question: Option<String>,
}

impl SocraticStepRequest {
    pub fn answer(&self) -> Option<&str> {
        self.user_answer
            .as_deref()
            .map(str::trim)
            .filter(|answer| !answer.is_empty())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StepFeedback {
    Grading(String),
    Final(FinalFeedback),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SocraticStepResponse {
    pub question: Option<String>,
    pub level: i32,
    pub question_index: usize,
    pub is_completed: bool,
    pub feedback: Option<StepFeedback>,
    pub answer_score: Option<f64>,
    pub is_correct: Option<bool>,
    pub average_score: Option<f64>,
}

impl SocraticStepResponse {
    pub fn question(question: String, level: i32, index: usize) -> Self {
        Self {
            question: Some(question),
            level,
            question_index: index,
            is_completed: false,
            feedback: None,
            answer_score: None,
            is_correct: None,
            average_score: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: String,
    pub article_id: String,
    pub questions_asked: Vec<String>,
    pub questions_answered: Vec<AnswerRecord>,
    pub questions_asked_count: i32,
    pub questions_answered_count: i32,
    pub current_level: i32,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<SocraticSession> for SessionResponse {
    fn from(session: SocraticSession) -> Self {
        Self {
            id: session.id.map(|id| id.to_hex()).unwrap_or_default(),
            article_id: session.article_id.to_hex(),
            questions_asked: session.questions_asked,
            questions_answered: session.questions_answered,
            questions_asked_count: session.questions_asked_count,
            questions_answered_count: session.questions_answered_count,
            current_level: session.current_level,
            is_completed: session.is_completed,
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}
