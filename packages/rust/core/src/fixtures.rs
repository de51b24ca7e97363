//! Shared test data for the core crate.

use studykit_shared::{
    Artifacts, Entity, EntityType, KnowledgeGraph, QuizQuestion, Relationship, Subtopic,
    SummaryArtifact, Topic,
};

pub(crate) const SUMMARY_JSON: &str = r#"{
    "overview": "Heat flows from hot to cold.",
    "key_takeaways": ["Energy is conserved", "Entropy increases"],
    "detailed_summary": "The laws of thermodynamics describe energy and entropy."
}"#;

pub(crate) const GRAPH_JSON: &str = r#"{
    "entities": [
        {"id": "entropy", "type": "concept", "name": "Entropy"},
        {"id": "clausius", "type": "person", "name": "Rudolf Clausius"}
    ],
    "relationships": [
        {"source": "clausius", "target": "entropy", "relation": "introduced"}
    ]
}"#;

pub(crate) const TOPICS_JSON: &str = r#"{
    "topics": [{
        "topic_id": "t1",
        "title": "Thermodynamics",
        "summary": "Energy, heat and work.",
        "difficulty_level": 3,
        "importance_score": 9,
        "subtopics": [{"title": "Second law", "key_concepts": ["entropy"]}]
    }]
}"#;

pub(crate) fn topic() -> Topic {
    Topic {
        topic_id: "t1".into(),
        title: "Thermodynamics".into(),
        summary: "Energy, heat and work.".into(),
        difficulty_level: 3,
        importance_score: 9,
        subtopics: vec![Subtopic {
            title: "Second law".into(),
            key_concepts: vec!["entropy".into()],
        }],
    }
}

pub(crate) fn artifacts() -> Artifacts {
    Artifacts {
        summary: SummaryArtifact {
            overview: "Heat flows from hot to cold.".into(),
            key_takeaways: vec!["Energy is conserved".into()],
            detailed_summary: "Details.".into(),
        },
        knowledge_graph: KnowledgeGraph {
            entities: vec![Entity {
                id: "entropy".into(),
                entity_type: EntityType::Concept,
                name: "Entropy".into(),
            }],
            relationships: Vec::<Relationship>::new(),
        },
        topics: vec![topic()],
    }
}

/// `n` questions where option `b{i}` is correct.
pub(crate) fn questions(n: usize) -> Vec<QuizQuestion> {
    (0..n)
        .map(|i| QuizQuestion {
            question_id: format!("q{i}"),
            question: format!("Question {i}?"),
            difficulty: "medium".into(),
            options: vec![format!("a{i}"), format!("b{i}"), format!("c{i}")],
            correct_answer: format!("b{i}"),
            explanation: format!("b{i} is right."),
        })
        .collect()
}

/// Quiz payload JSON matching [`questions`].
pub(crate) fn quiz_json(n: usize) -> String {
    serde_json::json!({ "questions": questions(n) }).to_string()
}
