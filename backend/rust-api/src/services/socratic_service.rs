//! Adaptive five-question Socratic sessions.
//!
//! [`Tutor`] owns every LLM interaction (questions, grading, final
//! evaluation) and mutates an in-memory [`SocraticSession`];
//! [`SocraticService`] loads and persists sessions around it.

use std::sync::Arc;

use serde_json::Value;

use crate::metrics::{SOCRATIC_ANSWERS_TOTAL, SOCRATIC_SESSIONS_TOTAL};
use crate::models::article::Article;
use crate::models::progress::StudentProgressRecord;
use crate::models::socratic::{
    AnswerRecord, FinalEvaluation, FinalFeedback, GradingResult, SessionPhase, SocraticSession,
    SocraticStepRequest, SocraticStepResponse, StepFeedback, START_LEVEL, TOTAL_QUESTIONS,
};
use crate::services::collections::{ARTICLES, SOCRATIC_SESSIONS, STUDENT_PROGRESS};
use crate::services::errors::{parse_object_id, ServiceError};
use crate::services::llm::{generate_with_retry, LlmClient, LlmError, LlmRequest};
use crate::utils::text::{extract_json_object, strip_code_fences, truncate_chars};
use crate::utils::time::chrono_to_bson;
use anyhow::{anyhow, Context, Result};
use mongodb::bson::{self, doc, oid::ObjectId};
use mongodb::{Collection, Database};

const LLM_RETRIES: usize = 1;
const PREVIEW_CHARS: usize = 3000;
const MAX_STRENGTHS: usize = 6;
const MAX_WEAKNESSES: usize = 6;
const MAX_RECOMMENDATIONS: usize = 8;
const SUMMARY_FALLBACK: &str = "Summary not available.";

/// Question index reported once the session is over
pub const COMPLETED_INDEX: usize = TOTAL_QUESTIONS + 1;

fn list_or(list: &[String], fallback: &str) -> String {
    if list.is_empty() {
        fallback.to_string()
    } else {
        list.join(", ")
    }
}

// JS-style coercions: models return numbers as strings and booleans as anything.
fn json_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn json_number(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) if s.trim().is_empty() => 0.0,
        Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

fn json_string_list(value: &Value, cap: usize) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .take(cap)
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_json_reply(reply: &str) -> Option<Value> {
    let cleaned = strip_code_fences(reply);
    serde_json::from_str::<Value>(&cleaned)
        .ok()
        .or_else(|| extract_json_object(&cleaned).and_then(|raw| serde_json::from_str(raw).ok()))
        .filter(Value::is_object)
}

/// `None` when the reply is not a JSON object
pub(crate) fn parse_grading(reply: &str) -> Option<GradingResult> {
    let parsed = parse_json_reply(reply)?;
    let feedback = parsed["feedback"].as_str().unwrap_or_default().to_string();
    Some(GradingResult::new(
        json_truthy(&parsed["isCorrect"]),
        json_number(&parsed["score"]),
        feedback,
    ))
}

pub(crate) fn parse_final_evaluation(reply: &str) -> Option<FinalEvaluation> {
    let parsed = parse_json_reply(reply)?;
    let score = |key: &str| {
        let n = json_number(&parsed[key]);
        if n.is_finite() {
            n.round().clamp(0.0, 100.0) as i32
        } else {
            0
        }
    };

    Some(FinalEvaluation {
        comprehension_score: score("comprehensionScore"),
        critical_thinking_score: score("criticalThinkingScore"),
        quality_score: score("qualityScore"),
        strengths: json_string_list(&parsed["strengths"], MAX_STRENGTHS),
        weaknesses: json_string_list(&parsed["weaknesses"], MAX_WEAKNESSES),
        recommendations: json_string_list(&parsed["recommendations"], MAX_RECOMMENDATIONS),
        summary_text: parsed["summaryText"]
            .as_str()
            .unwrap_or(SUMMARY_FALLBACK)
            .to_string(),
        is_fallback: false,
    })
}

pub(crate) fn first_question_prompt(article: &Article) -> String {
    let preview = article
        .full_text
        .as_deref()
        .filter(|text| !text.is_empty())
        .map(|text| truncate_chars(text, PREVIEW_CHARS))
        .unwrap_or("Not available");

    format!(
        "You are a Socratic teaching bot.
Generate the FIRST question for this academic article.

Difficulty Level: {level} (1=easy, 5=hard)

Title: {title}
Authors: {authors}
Abstract: {abstract_text}
Topics: {topics}
Text Preview: {preview}

Guidelines:
- Moderately challenging comprehension
- Not too basic, not too advanced
- Encourage explanation (not yes/no)

Respond ONLY with the question text.",
        level = START_LEVEL,
        title = article.title,
        authors = list_or(&article.authors, "Unknown"),
        abstract_text = article.abstract_or("No abstract"),
        topics = list_or(&article.main_topics, "Not available"),
    )
}

pub(crate) fn next_question_prompt(
    article: &Article,
    index: usize,
    level: i32,
    previous_answer: Option<&str>,
) -> String {
    let context = previous_answer
        .map(|answer| format!("\nStudent's previous answer (for context): \"{answer}\"\n"))
        .unwrap_or_default();

    format!(
        "You are a Socratic teaching bot.
Generate the NEXT question (Question {index} of {total}).

Difficulty Level: {level} (1=easy, 5=hard)

Article Title: {title}
Topics: {topics}
{context}
Guidelines by difficulty:
- Level 1: simple comprehension
- Level 2: method/design basics
- Level 3: findings reasoning
- Level 4: implications/limitations
- Level 5: critical thinking, alternatives, future work

Respond ONLY with the question text.",
        total = TOTAL_QUESTIONS,
        title = article.title,
        topics = list_or(&article.main_topics, "Not available"),
    )
}

pub(crate) fn grading_prompt(article: &Article, question: &str, answer: &str) -> String {
    format!(
        r#"You are an educational grader.

Rules:
- Decide if the answer is correct enough to be considered "correct".
- If NOT correct => score MUST be 0.
- If correct => score 1-100 based on accuracy, completeness, and clarity.
- Keep feedback short (1-2 sentences).

Return ONLY valid JSON (no markdown):
{{
  "isCorrect": true,
  "score": 85,
  "feedback": "..."
}}

Article Title: {title}
Abstract: {abstract_text}
Topics: {topics}

Question: {question}
Student Answer: {answer}
"#,
        title = article.title,
        abstract_text = article.abstract_or("No abstract"),
        topics = list_or(&article.main_topics, "Not available"),
    )
}

pub(crate) fn final_evaluation_prompt(article: &Article, session: &SocraticSession, average: f64) -> String {
    let transcript = session
        .questions_asked
        .iter()
        .take(TOTAL_QUESTIONS)
        .enumerate()
        .map(|(i, question)| {
            let n = i + 1;
            match session.questions_answered.get(i) {
                Some(record) => format!(
                    "Q{n}: {question}\nA{n}: {}\nScore: {}\nCorrect: {}\nDifficulty: {}",
                    record.answer, record.score, record.is_correct, record.difficulty
                ),
                None => format!("Q{n}: {question}\nA{n}: No answer\nScore: 0\nCorrect: false\nDifficulty: 0"),
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        r#"You are an expert educational evaluator.

Analyze the student's FULL 5-question Socratic session and return ONLY valid JSON (no markdown).

Return EXACTLY this JSON schema:
{{
  "comprehensionScore": 0,
  "criticalThinkingScore": 0,
  "qualityScore": 0,
  "strengths": ["...", "..."],
  "weaknesses": ["...", "..."],
  "recommendations": ["...", "..."],
  "summaryText": "..."
}}

Rules:
- Scores must be integers 0-100.
- Strengths/weaknesses/recommendations should be specific to the student's answers, not generic.
- summaryText: 3-4 sentences, concise.
- Use the final averageScore ({average}/100) to calibrate tone.

Article:
Title: {title}
Abstract: {abstract_text}
Topics: {topics}

Session Q&A:
{transcript}
"#,
        title = article.title,
        abstract_text = article.abstract_or("No abstract"),
        topics = list_or(&article.main_topics, "Not available"),
    )
}

/// LLM side of a session: asks, grades and evaluates.
pub struct Tutor<'a> {
    llm: &'a dyn LlmClient,
    model: &'a str,
    article: &'a Article,
}

impl<'a> Tutor<'a> {
    pub fn new(llm: &'a dyn LlmClient, model: &'a str, article: &'a Article) -> Self {
        Self { llm, model, article }
    }

    async fn ask(&self, prompt: String, operation: &str) -> Result<String, LlmError> {
        let response = generate_with_retry(
            self.llm,
            LlmRequest::prompt(self.model, prompt),
            LLM_RETRIES,
            operation,
        )
        .await?;
        Ok(response.text.trim().to_string())
    }

    /// Opens the session with a level-3 question.
    pub async fn open(&self, session: &mut SocraticSession) -> Result<String, LlmError> {
        let question = self
            .ask(first_question_prompt(self.article), "socratic_question")
            .await?;
        session.start(question.clone());
        Ok(question)
    }

    /// Grades the answer and records it at the 1-based `index`.
    /// Unparseable grading falls back; provider errors surface.
    pub async fn answer(
        &self,
        session: &mut SocraticSession,
        index: usize,
        question: &str,
        answer: &str,
    ) -> Result<GradingResult, LlmError> {
        let reply = self
            .ask(grading_prompt(self.article, question, answer), "socratic_grade")
            .await?;
        let grading = parse_grading(&reply).unwrap_or_else(|| {
            tracing::warn!("Grading reply was not valid JSON, using fallback");
            GradingResult::fallback()
        });

        let difficulty = session.difficulty_for(index);
        session.record_answer_at(
            index,
            question,
            AnswerRecord {
                answer: answer.to_string(),
                score: grading.score,
                is_correct: grading.is_correct,
                difficulty,
            },
        );
        SOCRATIC_ANSWERS_TOTAL
            .with_label_values(&[if grading.is_correct { "true" } else { "false" }])
            .inc();

        Ok(grading)
    }

    /// Generates and stores the question for the current index at the current level.
    pub async fn next_question(
        &self,
        session: &mut SocraticSession,
        previous_answer: Option<&str>,
    ) -> Result<String, LlmError> {
        let prompt = next_question_prompt(
            self.article,
            session.current_index(),
            session.level(),
            previous_answer,
        );
        let question = self.ask(prompt, "socratic_question").await?;
        session.push_question(question.clone());
        Ok(question)
    }

    /// Score summary plus the aggregate evaluation; never fails.
    pub async fn finish(&self, session: &SocraticSession) -> FinalFeedback {
        let summary = session.score_summary();
        let prompt = final_evaluation_prompt(self.article, session, summary.average);

        let evaluation = match self.ask(prompt, "socratic_evaluation").await {
            Ok(reply) => parse_final_evaluation(&reply).unwrap_or_else(|| {
                tracing::warn!("Final evaluation reply was not valid JSON, using fallback");
                FinalEvaluation::fallback()
            }),
            Err(e) => {
                tracing::warn!("Final evaluation failed, using fallback: {}", e);
                FinalEvaluation::fallback()
            }
        };

        FinalFeedback::new(summary, evaluation)
    }
}

pub(crate) fn graded_question_response(
    question: String,
    session: &SocraticSession,
    grading: &GradingResult,
) -> SocraticStepResponse {
    SocraticStepResponse {
        feedback: Some(StepFeedback::Grading(grading.feedback.clone())),
        answer_score: Some(grading.score),
        is_correct: Some(grading.is_correct),
        ..SocraticStepResponse::question(question, session.level(), session.questions_asked.len())
    }
}

pub(crate) fn completion_response(
    session: &SocraticSession,
    grading: &GradingResult,
    feedback: FinalFeedback,
) -> SocraticStepResponse {
    SocraticStepResponse {
        question: None,
        level: session.level(),
        question_index: COMPLETED_INDEX,
        is_completed: true,
        average_score: Some(feedback.average_score),
        feedback: Some(StepFeedback::Final(feedback)),
        answer_score: Some(grading.score),
        is_correct: Some(grading.is_correct),
    }
}

pub struct SocraticService {
    mongo: Database,
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl SocraticService {
    pub fn new(mongo: Database, llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            mongo,
            llm,
            model: model.into(),
        }
    }

    fn sessions(&self) -> Collection<SocraticSession> {
        self.mongo.collection::<SocraticSession>(SOCRATIC_SESSIONS)
    }

    async fn load_article(&self, article_id: &ObjectId) -> Result<Article> {
        self.mongo
            .collection::<Article>(ARTICLES)
            .find_one(doc! { "_id": article_id })
            .await
            .context("Failed to query article")?
            .ok_or_else(|| ServiceError::NotFound("Article not found".to_string()).into())
    }

    pub async fn create_session(&self, user_id: ObjectId, article_id: &str) -> Result<SocraticSession> {
        let article_id = parse_object_id(article_id, "Article")?;
        self.load_article(&article_id).await?;

        let mut session = SocraticSession::new(article_id, user_id);
        let inserted = self
            .sessions()
            .insert_one(&session)
            .await
            .context("Failed to insert Socratic session")?;
        session.id = Some(
            inserted
                .inserted_id
                .as_object_id()
                .ok_or_else(|| anyhow!("Failed to get inserted session ID"))?,
        );

        SOCRATIC_SESSIONS_TOTAL.with_label_values(&["created"]).inc();
        tracing::info!(
            user_id = %user_id.to_hex(),
            article_id = %article_id.to_hex(),
            "Socratic session created"
        );
        Ok(session)
    }

    /// Latest unfinished session for (user, article)
    pub async fn active_session(&self, user_id: &ObjectId, article_id: &str) -> Result<Option<SocraticSession>> {
        let Ok(article_id) = ObjectId::parse_str(article_id.trim()) else {
            return Ok(None);
        };

        self.sessions()
            .find_one(doc! { "user_id": user_id, "article_id": article_id, "is_completed": false })
            .sort(doc! { "created_at": -1 })
            .await
            .context("Failed to query active session")
    }

    /// Persists arrays, counts, level and completion. Only unfinished sessions are written.
    async fn save(&self, session: &SocraticSession) -> Result<()> {
        let session_id = session.id.ok_or_else(|| anyhow!("Session has no ID"))?;
        let result = self
            .sessions()
            .update_one(
                doc! { "_id": session_id, "user_id": session.user_id, "is_completed": false },
                doc! { "$set": {
                    "questions_asked": bson::to_bson(&session.questions_asked)?,
                    "questions_answered": bson::to_bson(&session.questions_answered)?,
                    "questions_asked_count": session.questions_asked_count,
                    "questions_answered_count": session.questions_answered_count,
                    "current_level": session.current_level,
                    "is_completed": session.is_completed,
                    "updated_at": chrono_to_bson(session.updated_at),
                }},
            )
            .await
            .context("Failed to update Socratic session")?;

        if result.matched_count == 0 {
            return Err(ServiceError::BadRequest("Session already completed".to_string()).into());
        }
        Ok(())
    }

    /// One turn of the Socratic loop: serve a question or grade an answer.
    pub async fn step(&self, user_id: ObjectId, req: SocraticStepRequest) -> Result<SocraticStepResponse> {
        let (Some(raw_article_id), Some(raw_session_id)) = (
            req.article_id.as_deref().filter(|id| !id.trim().is_empty()),
            req.session_id.as_deref().filter(|id| !id.trim().is_empty()),
        ) else {
            return Err(ServiceError::BadRequest("Missing required fields".to_string()).into());
        };

        let article_id = parse_object_id(raw_article_id, "Article")?;
        let session_id = parse_object_id(raw_session_id, "Session")?;
        let article = self.load_article(&article_id).await?;

        let mut session = self
            .sessions()
            .find_one(doc! { "_id": session_id, "user_id": user_id })
            .await
            .context("Failed to query Socratic session")?
            .ok_or_else(|| ServiceError::NotFound("Session not found".to_string()))?;

        let phase = session.phase();
        if phase == SessionPhase::Completed {
            return Err(ServiceError::BadRequest("Session already completed".to_string()).into());
        }

        let tutor = Tutor::new(self.llm.as_ref(), &self.model, &article);

        let Some(answer) = req.answer() else {
            return match phase {
                SessionPhase::AwaitingFirstQuestion => {
                    let question = tutor.open(&mut session).await?;
                    self.save(&session).await?;
                    SOCRATIC_SESSIONS_TOTAL.with_label_values(&["started"]).inc();
                    Ok(SocraticStepResponse::question(question, START_LEVEL, 1))
                }
                SessionPhase::AwaitingAnswer { index, question } => {
                    Ok(SocraticStepResponse::question(question, session.level(), index))
                }
                SessionPhase::NeedsQuestion { index } => {
                    tracing::info!(session_id = %session_id.to_hex(), index, "Regenerating lost question");
                    let question = tutor.next_question(&mut session, None).await?;
                    self.save(&session).await?;
                    Ok(SocraticStepResponse::question(question, session.level(), index))
                }
                SessionPhase::Completed => {
                    Err(ServiceError::BadRequest("Session already completed".to_string()).into())
                }
            };
        };

        let question = req
            .current_question
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ServiceError::BadRequest("Missing currentQuestion for grading".to_string()))?;

        let index = session.answer_slot(req.question_index, question);
        if index < session.current_index() {
            tracing::info!(session_id = %session_id.to_hex(), index, "Regrading resubmitted answer");
        } else if req.question_index.is_some_and(|i| i != index)
            || req.current_level.is_some_and(|l| l != session.level())
        {
            tracing::warn!(
                session_id = %session_id.to_hex(),
                client_index = ?req.question_index,
                client_level = ?req.current_level,
                index,
                level = session.level(),
                "Client session hints disagree with stored state"
            );
        }

        let grading = tutor.answer(&mut session, index, question, answer).await?;
        self.save(&session).await?;

        if session.is_completed {
            let feedback = tutor.finish(&session).await;
            let record = StudentProgressRecord::from_feedback(user_id, article_id, session_id, &feedback);
            if let Err(e) = self
                .mongo
                .collection::<StudentProgressRecord>(STUDENT_PROGRESS)
                .insert_one(&record)
                .await
            {
                tracing::error!(session_id = %session_id.to_hex(), "Failed to insert student progress: {}", e);
            }

            SOCRATIC_SESSIONS_TOTAL.with_label_values(&["completed"]).inc();
            tracing::info!(
                session_id = %session_id.to_hex(),
                user_id = %user_id.to_hex(),
                average = feedback.average_score,
                fallback = feedback.is_fallback,
                "Socratic session completed"
            );
            return Ok(completion_response(&session, &grading, feedback));
        }

        let next = tutor.next_question(&mut session, Some(answer)).await?;
        self.save(&session).await?;
        Ok(graded_question_response(next, &session, &grading))
    }
}
