//! Extraction contracts: one per pipeline stage plus quiz generation.
//!
//! A contract owns its input and declares the system instruction, the prompt,
//! the response schema, and the semantic checks the parsed output must pass.
//! Every failure while turning a raw payload into output is a
//! [`StudyKitError::SchemaViolation`], which the client never retries.

use std::collections::HashSet;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use studykit_shared::{
    KnowledgeGraph, QuizQuestion, Result, StudyKitError, SummaryArtifact, Topic,
};

use crate::schema::{Field, Schema};

// ---------------------------------------------------------------------------
// Contract trait
// ---------------------------------------------------------------------------

/// Request template, response schema and validators for one call.
pub trait Contract: Send + Sync {
    /// Parsed and validated output.
    type Output: DeserializeOwned + Send;

    /// Short identifier used in logs and errors.
    fn name(&self) -> &'static str;

    fn system_instruction(&self) -> &'static str;

    /// The instruction body, with the input embedded.
    fn prompt(&self) -> String;

    fn response_schema(&self) -> Schema;

    /// Semantic checks beyond structure. Returns a description of the first violation.
    fn validate(&self, output: &Self::Output) -> std::result::Result<(), String>;

    /// Turn a raw payload into validated output.
    fn parse(&self, raw: &str) -> Result<Self::Output> {
        let name = self.name();
        let body = strip_code_fence(raw.trim());
        if body.is_empty() {
            return Err(StudyKitError::schema(name, "empty payload"));
        }

        let value: Value = serde_json::from_str(body)
            .map_err(|e| StudyKitError::schema(name, format!("payload is not valid JSON: {e}")))?;

        self.response_schema()
            .check(&value)
            .map_err(|m| StudyKitError::schema(name, m))?;

        let output: Self::Output = serde_json::from_value(value)
            .map_err(|e| StudyKitError::schema(name, e.to_string()))?;

        self.validate(&output)
            .map_err(|m| StudyKitError::schema(name, m))?;

        Ok(output)
    }
}

/// Models occasionally wrap JSON in a Markdown fence despite the JSON MIME type.
fn strip_code_fence(raw: &str) -> &str {
    let Some(rest) = raw.strip_prefix("```") else {
        return raw;
    };
    let rest = match rest.get(..4) {
        Some(tag) if tag.eq_ignore_ascii_case("json") => &rest[4..],
        _ => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Truncate content to at most `max_chars` characters, on a char boundary.
pub fn truncate_content(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        None => content.to_string(),
        Some((cut, _)) => {
            format!("{}\n\n[... content truncated for context window ...]", &content[..cut])
        }
    }
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// Executive summary of the whole document.
#[derive(Debug, Clone)]
pub struct SummaryContract<'a> {
    text: &'a str,
    max_chars: usize,
}

impl<'a> SummaryContract<'a> {
    pub fn new(text: &'a str, max_chars: usize) -> Self {
        Self { text, max_chars }
    }
}

impl Contract for SummaryContract<'_> {
    type Output = SummaryArtifact;

    fn name(&self) -> &'static str {
        "summary"
    }

    fn system_instruction(&self) -> &'static str {
        "You are an expert academic analyst. You write faithful, well-structured \
         summaries of study material for students. Use only information present \
         in the document."
    }

    fn prompt(&self) -> String {
        format!(
            "Produce an executive summary of the document below.\n\
             - overview: one paragraph capturing the main thesis.\n\
             - key_takeaways: 3 to 7 short statements, most important first.\n\
             - detailed_summary: a thorough summary organized by theme.\n\n\
             DOCUMENT:\n{}",
            truncate_content(self.text, self.max_chars)
        )
    }

    fn response_schema(&self) -> Schema {
        Schema::object(vec![
            Field::required("overview", Schema::String),
            Field::required("key_takeaways", Schema::array(Schema::String)),
            Field::required("detailed_summary", Schema::String),
        ])
    }

    fn validate(&self, output: &SummaryArtifact) -> std::result::Result<(), String> {
        if output.overview.trim().is_empty() {
            return Err("overview is blank".into());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Knowledge graph
// ---------------------------------------------------------------------------

/// Entities and the relationships between them.
#[derive(Debug, Clone)]
pub struct KnowledgeGraphContract<'a> {
    text: &'a str,
    max_chars: usize,
}

impl<'a> KnowledgeGraphContract<'a> {
    pub fn new(text: &'a str, max_chars: usize) -> Self {
        Self { text, max_chars }
    }
}

const ENTITY_TYPES: &[&str] = &["concept", "person", "theory", "method"];

impl Contract for KnowledgeGraphContract<'_> {
    type Output = KnowledgeGraph;

    fn name(&self) -> &'static str {
        "knowledge_graph"
    }

    fn system_instruction(&self) -> &'static str {
        "You are a knowledge engineer. You extract the key entities of a document \
         and the relationships between them as a compact, accurate graph."
    }

    fn prompt(&self) -> String {
        format!(
            "Extract a knowledge graph from the document below.\n\
             - entities: the important concepts, people, theories and methods. \
             Give each a short unique id and a type.\n\
             - relationships: directed edges; source and target must be ids of \
             listed entities, relation is a short verb phrase.\n\n\
             DOCUMENT:\n{}",
            truncate_content(self.text, self.max_chars)
        )
    }

    fn response_schema(&self) -> Schema {
        Schema::object(vec![
            Field::required(
                "entities",
                Schema::array(Schema::object(vec![
                    Field::required("id", Schema::String),
                    Field::required("type", Schema::Enum(ENTITY_TYPES)),
                    Field::required("name", Schema::String),
                ])),
            ),
            Field::required(
                "relationships",
                Schema::array(Schema::object(vec![
                    Field::required("source", Schema::String),
                    Field::required("target", Schema::String),
                    Field::required("relation", Schema::String),
                ])),
            ),
        ])
    }

    fn validate(&self, graph: &KnowledgeGraph) -> std::result::Result<(), String> {
        let mut ids = HashSet::new();
        for entity in &graph.entities {
            if !ids.insert(entity.id.as_str()) {
                return Err(format!("duplicate entity id '{}'", entity.id));
            }
        }

        for (i, rel) in graph.relationships.iter().enumerate() {
            for endpoint in [&rel.source, &rel.target] {
                if !ids.contains(endpoint.as_str()) {
                    return Err(format!(
                        "relationships[{i}] references undeclared entity '{endpoint}'"
                    ));
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

/// Wire shape of the topics response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicsPayload {
    pub topics: Vec<Topic>,
}

/// Topic breakdown with difficulty and importance ratings.
#[derive(Debug, Clone)]
pub struct TopicsContract<'a> {
    text: &'a str,
    max_chars: usize,
}

impl<'a> TopicsContract<'a> {
    pub fn new(text: &'a str, max_chars: usize) -> Self {
        Self { text, max_chars }
    }
}

impl Contract for TopicsContract<'_> {
    type Output = TopicsPayload;

    fn name(&self) -> &'static str {
        "topics"
    }

    fn system_instruction(&self) -> &'static str {
        "You are a curriculum designer. You break study material into coherent \
         topics that a student can learn and be tested on one at a time."
    }

    fn prompt(&self) -> String {
        format!(
            "Break the document below into its main study topics.\n\
             For each topic give a unique topic_id, a title, a short summary, \
             difficulty_level from 1 (introductory) to 5 (expert), \
             importance_score from 1 (peripheral) to 10 (central), and ordered \
             subtopics, each with a title and its key_concepts.\n\n\
             DOCUMENT:\n{}",
            truncate_content(self.text, self.max_chars)
        )
    }

    fn response_schema(&self) -> Schema {
        let subtopic = Schema::object(vec![
            Field::required("title", Schema::String),
            Field::required("key_concepts", Schema::array(Schema::String)),
        ]);
        Schema::object(vec![Field::required(
            "topics",
            Schema::array(Schema::object(vec![
                Field::required("topic_id", Schema::String),
                Field::required("title", Schema::String),
                Field::required("summary", Schema::String),
                Field::required("difficulty_level", Schema::Integer),
                Field::required("importance_score", Schema::Integer),
                Field::required("subtopics", Schema::array(subtopic)),
            ])),
        )])
    }

    fn validate(&self, payload: &TopicsPayload) -> std::result::Result<(), String> {
        if payload.topics.is_empty() {
            return Err("no topics returned".into());
        }

        let mut ids = HashSet::new();
        for topic in &payload.topics {
            if !ids.insert(topic.topic_id.as_str()) {
                return Err(format!("duplicate topic_id '{}'", topic.topic_id));
            }
            if !(1..=5).contains(&topic.difficulty_level) {
                return Err(format!(
                    "topic '{}': difficulty_level {} outside 1..=5",
                    topic.topic_id, topic.difficulty_level
                ));
            }
            if !(1..=10).contains(&topic.importance_score) {
                return Err(format!(
                    "topic '{}': importance_score {} outside 1..=10",
                    topic.topic_id, topic.importance_score
                ));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Quiz
// ---------------------------------------------------------------------------

/// Adaptive hint embedded in a quiz-regeneration request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Directive {
    Easier,
    Advanced,
}

impl Directive {
    pub fn instruction(&self) -> &'static str {
        match self {
            Self::Easier => "Generate easier, fundamentals-focused questions.",
            Self::Advanced => "Generate advanced, scenario-based questions.",
        }
    }
}

/// Wire shape of the quiz response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizPayload {
    pub questions: Vec<QuizQuestion>,
}

/// Multiple-choice quiz for a single topic.
#[derive(Debug, Clone)]
pub struct QuizContract<'a> {
    topic: &'a Topic,
    question_count: usize,
    directive: Option<Directive>,
}

impl<'a> QuizContract<'a> {
    pub fn new(topic: &'a Topic, question_count: usize, directive: Option<Directive>) -> Self {
        Self {
            topic,
            question_count,
            directive,
        }
    }
}

impl Contract for QuizContract<'_> {
    type Output = QuizPayload;

    fn name(&self) -> &'static str {
        "quiz"
    }

    fn system_instruction(&self) -> &'static str {
        "You are an experienced examiner. You write unambiguous multiple-choice \
         questions with exactly one correct option and a short explanation."
    }

    fn prompt(&self) -> String {
        let mut outline = String::new();
        for sub in &self.topic.subtopics {
            outline.push_str(&format!(
                "- {}: {}\n",
                sub.title,
                sub.key_concepts.join(", ")
            ));
        }

        let mut prompt = format!(
            "Write {count} multiple-choice questions about the topic below.\n\
             Each question needs a unique question_id, the question, a difficulty \
             (easy, medium or hard), 4 distinct options, a correct_answer that \
             repeats one option verbatim, and an explanation.\n\n\
             TOPIC: {title} (difficulty {level}/5)\n\
             SUMMARY: {summary}\n\
             SUBTOPICS:\n{outline}",
            count = self.question_count,
            title = self.topic.title,
            level = self.topic.difficulty_level,
            summary = self.topic.summary,
        );

        if let Some(directive) = self.directive {
            prompt.push_str("\nADJUSTMENT: ");
            prompt.push_str(directive.instruction());
            prompt.push('\n');
        }

        prompt
    }

    fn response_schema(&self) -> Schema {
        Schema::object(vec![Field::required(
            "questions",
            Schema::array(Schema::object(vec![
                Field::required("question_id", Schema::String),
                Field::required("question", Schema::String),
                Field::required("difficulty", Schema::String),
                Field::required("options", Schema::array(Schema::String)),
                Field::required("correct_answer", Schema::String),
                Field::required("explanation", Schema::String),
            ])),
        )])
    }

    fn validate(&self, payload: &QuizPayload) -> std::result::Result<(), String> {
        if payload.questions.is_empty() {
            return Err("no questions returned".into());
        }

        let mut question_ids = HashSet::new();
        for q in &payload.questions {
            if !question_ids.insert(q.question_id.as_str()) {
                return Err(format!("duplicate question_id '{}'", q.question_id));
            }
            if q.options.len() < 2 {
                return Err(format!(
                    "question '{}' has {} option(s), need at least 2",
                    q.question_id,
                    q.options.len()
                ));
            }

            let mut seen = HashSet::new();
            if let Some(dup) = q.options.iter().find(|o| !seen.insert(o.as_str())) {
                return Err(format!(
                    "question '{}' lists option '{dup}' more than once",
                    q.question_id
                ));
            }

            let matches = q.options.iter().filter(|o| **o == q.correct_answer).count();
            if matches != 1 {
                return Err(format!(
                    "question '{}': correct_answer '{}' is not exactly one of the options",
                    q.question_id, q.correct_answer
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use studykit_shared::{EntityType, ErrorClass, Subtopic};

    fn topic() -> Topic {
        Topic {
            topic_id: "t1".into(),
            title: "Thermodynamics".into(),
            summary: "Energy, heat and work.".into(),
            difficulty_level: 3,
            importance_score: 8,
            subtopics: vec![Subtopic {
                title: "Second law".into(),
                key_concepts: vec!["entropy".into(), "irreversibility".into()],
            }],
        }
    }

    fn quiz_json(options: &str, correct: &str) -> String {
        format!(
            r#"{{"questions":[{{"question_id":"q1","question":"What always increases?","difficulty":"easy","options":{options},"correct_answer":"{correct}","explanation":"Second law."}}]}}"#
        )
    }

    fn assert_violation<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected schema violation");
        assert_eq!(err.classification(), ErrorClass::SchemaViolation);
        assert!(err.to_string().contains(needle), "unexpected message: {err}");
    }

    #[test]
    fn entity_schema_enum_matches_entity_type() {
        let names: Vec<_> = EntityType::ALL.iter().map(|t| t.as_str()).collect();
        assert_eq!(names, ENTITY_TYPES);
    }

    #[test]
    fn summary_parses_valid_payload() {
        let contract = SummaryContract::new("text", 100);
        let raw = r#"{"overview":"O","key_takeaways":["a","b"],"detailed_summary":"D"}"#;
        let summary = contract.parse(raw).expect("parse summary");
        assert_eq!(summary.key_takeaways, vec!["a", "b"]);
    }

    #[test]
    fn summary_accepts_fenced_payload() {
        let contract = SummaryContract::new("text", 100);
        let raw = "```json\n{\"overview\":\"O\",\"key_takeaways\":[],\"detailed_summary\":\"D\"}\n```";
        assert!(contract.parse(raw).is_ok());
    }

    #[test]
    fn fence_language_tag_is_case_insensitive() {
        let contract = SummaryContract::new("text", 100);
        for tag in ["JSON", "Json", ""] {
            let raw = format!(
                "```{tag}\n{{\"overview\":\"O\",\"key_takeaways\":[],\"detailed_summary\":\"D\"}}\n```"
            );
            assert!(contract.parse(&raw).is_ok(), "tag {tag:?}");
        }
    }

    #[test]
    fn empty_payload_is_violation() {
        let contract = SummaryContract::new("text", 100);
        assert_violation(contract.parse("   "), "empty payload");
    }

    #[test]
    fn missing_field_is_violation() {
        let contract = SummaryContract::new("text", 100);
        assert_violation(
            contract.parse(r#"{"overview":"O","key_takeaways":[]}"#),
            "$.detailed_summary: required field missing",
        );
    }

    #[test]
    fn wrong_type_is_violation() {
        let contract = SummaryContract::new("text", 100);
        assert_violation(
            contract.parse(r#"{"overview":"O","key_takeaways":"a, b","detailed_summary":"D"}"#),
            "$.key_takeaways: expected array",
        );
    }

    #[test]
    fn graph_with_dangling_endpoint_is_violation() {
        let contract = KnowledgeGraphContract::new("text", 100);
        let raw = r#"{
            "entities":[{"id":"a","type":"concept","name":"Entropy"}],
            "relationships":[{"source":"a","target":"b","relation":"relates to"}]
        }"#;
        assert_violation(contract.parse(raw), "undeclared entity 'b'");
    }

    #[test]
    fn graph_with_unknown_entity_type_is_violation() {
        let contract = KnowledgeGraphContract::new("text", 100);
        let raw = r#"{"entities":[{"id":"a","type":"planet","name":"Mars"}],"relationships":[]}"#;
        assert_violation(contract.parse(raw), "$.entities[0].type");
    }

    #[test]
    fn graph_with_resolved_endpoints_parses() {
        let contract = KnowledgeGraphContract::new("text", 100);
        let raw = r#"{
            "entities":[
                {"id":"a","type":"concept","name":"Entropy"},
                {"id":"b","type":"person","name":"Clausius"}
            ],
            "relationships":[{"source":"b","target":"a","relation":"coined"}]
        }"#;
        let graph = contract.parse(raw).expect("parse graph");
        assert_eq!(graph.entities.len(), 2);
        assert_eq!(graph.relationships[0].relation, "coined");
    }

    #[test]
    fn topics_out_of_range_difficulty_is_violation() {
        let contract = TopicsContract::new("text", 100);
        let raw = r#"{"topics":[{"topic_id":"t1","title":"T","summary":"S","difficulty_level":9,"importance_score":5,"subtopics":[]}]}"#;
        assert_violation(contract.parse(raw), "difficulty_level 9");
    }

    #[test]
    fn empty_topic_list_is_violation() {
        let contract = TopicsContract::new("text", 100);
        assert_violation(contract.parse(r#"{"topics":[]}"#), "no topics");
    }

    #[test]
    fn quiz_correct_answer_must_be_listed() {
        let t = topic();
        let contract = QuizContract::new(&t, 1, None);
        assert_violation(
            contract.parse(&quiz_json(r#"["energy","entropy"]"#, "Entropy")),
            "not exactly one of the options",
        );
    }

    #[test]
    fn quiz_rejects_duplicate_options() {
        let t = topic();
        let contract = QuizContract::new(&t, 1, None);
        assert_violation(
            contract.parse(&quiz_json(r#"["entropy","entropy"]"#, "entropy")),
            "more than once",
        );
    }

    #[test]
    fn quiz_rejects_single_option() {
        let t = topic();
        let contract = QuizContract::new(&t, 1, None);
        assert_violation(
            contract.parse(&quiz_json(r#"["entropy"]"#, "entropy")),
            "need at least 2",
        );
    }

    #[test]
    fn quiz_parses_valid_payload() {
        let t = topic();
        let contract = QuizContract::new(&t, 1, None);
        let payload = contract
            .parse(&quiz_json(r#"["energy","entropy","mass"]"#, "entropy"))
            .expect("parse quiz");
        assert_eq!(payload.questions.len(), 1);
        assert!(payload.questions[0].is_correct("entropy"));
    }

    #[test]
    fn quiz_prompt_carries_directive() {
        let t = topic();
        let neutral = QuizContract::new(&t, 5, None).prompt();
        assert!(!neutral.contains("ADJUSTMENT"));
        assert!(neutral.contains("Second law: entropy, irreversibility"));

        let easier = QuizContract::new(&t, 5, Some(Directive::Easier)).prompt();
        assert!(easier.contains("easier, fundamentals-focused"));

        let advanced = QuizContract::new(&t, 5, Some(Directive::Advanced)).prompt();
        assert!(advanced.contains("advanced, scenario-based"));
    }

    #[test]
    fn truncate_short_content() {
        assert_eq!(truncate_content("short text", 100), "short text");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let content = "é".repeat(200);
        let result = truncate_content(&content, 100);
        assert!(result.starts_with(&"é".repeat(100)));
        assert!(result.contains("truncated"));
    }
}
