//! Core domain types for StudyKit study artifacts and quizzes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for pipeline run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// Executive summary produced by the Summary stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryArtifact {
    /// One-paragraph overview.
    pub overview: String,
    /// Ordered key takeaways.
    pub key_takeaways: Vec<String>,
    /// Longer, structured summary.
    pub detailed_summary: String,
}

// ---------------------------------------------------------------------------
// Knowledge graph
// ---------------------------------------------------------------------------

/// Kind of a knowledge-graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Concept,
    Person,
    Theory,
    Method,
}

impl EntityType {
    pub const ALL: [EntityType; 4] = [Self::Concept, Self::Person, Self::Theory, Self::Method];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Concept => "concept",
            Self::Person => "person",
            Self::Theory => "theory",
            Self::Method => "method",
        }
    }
}

/// A node in the knowledge graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub name: String,
}

/// A directed, labelled edge between two declared entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source: String,
    pub target: String,
    pub relation: String,
}

/// Knowledge graph produced by the KnowledgeGraph stage.
///
/// Every relationship endpoint references a declared entity id; the
/// reasoning contract rejects payloads that break this.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
}

impl KnowledgeGraph {
    /// Look up an entity by id.
    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id == id)
    }

    /// Relationships leaving the given entity.
    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Relationship> + 'a {
        self.relationships.iter().filter(move |r| r.source == id)
    }
}

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

/// A subtopic with its key concepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtopic {
    pub title: String,
    pub key_concepts: Vec<String>,
}

/// A study topic produced by the Topics stage. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub topic_id: String,
    pub title: String,
    pub summary: String,
    /// 1 (introductory) to 5 (expert).
    pub difficulty_level: u8,
    /// 1 (peripheral) to 10 (central).
    pub importance_score: u8,
    pub subtopics: Vec<Subtopic>,
}

// ---------------------------------------------------------------------------
// Quiz
// ---------------------------------------------------------------------------

/// A single multiple-choice question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub question_id: String,
    pub question: String,
    pub difficulty: String,
    /// Ordered, unique, at least two.
    pub options: Vec<String>,
    /// Equals exactly one entry of `options`.
    pub correct_answer: String,
    pub explanation: String,
}

impl QuizQuestion {
    /// Exact-match answer check.
    pub fn is_correct(&self, selection: &str) -> bool {
        self.correct_answer == selection
    }
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// The complete output of a successful pipeline run.
///
/// Only ever constructed with all three stage results present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifacts {
    pub summary: SummaryArtifact,
    pub knowledge_graph: KnowledgeGraph,
    pub topics: Vec<Topic>,
}

impl Artifacts {
    /// Look up a topic by id.
    pub fn topic(&self, topic_id: &str) -> Option<&Topic> {
        self.topics.iter().find(|t| t.topic_id == topic_id)
    }
}
