//! Static topic catalog and keyword tables
//!
//! The catalog lists every topic a conversation or a nudge may target, with
//! the topics it bridges to naturally. The keyword tables drive topic
//! detection for the six topics the analyzer scores.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

pub const GENERAL_TOPIC: &str = "general";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicDifficulty {
    Easy,
    Moderate,
    Sensitive,
}

/// Catalog entry, fixed at process start
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTopic {
    pub id: String,
    pub name: String,
    pub keywords: Vec<String>,
    pub bridgeable_to: Vec<String>,
    pub difficulty: TopicDifficulty,
}

fn topic(id: &str, name: &str, keywords: &[&str], bridgeable_to: &[&str], difficulty: TopicDifficulty) -> ConversationTopic {
    ConversationTopic {
        id: id.to_string(),
        name: name.to_string(),
        keywords: keywords.iter().map(|s| s.to_string()).collect(),
        bridgeable_to: bridgeable_to.iter().map(|s| s.to_string()).collect(),
        difficulty,
    }
}

static TOPIC_CATALOG: Lazy<Vec<ConversationTopic>> = Lazy::new(|| {
    use TopicDifficulty::*;
    vec![
        topic("school", "School & Learning", &["school", "class", "teacher", "homework", "test"], &["friends", "responsibility", "hobbies", "feelings"], Easy),
        topic("friends", "Friends", &["friend", "play", "recess", "party"], &["school", "feelings", "sports", "family"], Easy),
        topic("family", "Family", &["mom", "dad", "sister", "brother", "grandma"], &["feelings", "responsibility", "friends"], Moderate),
        topic("hobbies", "Hobbies & Creativity", &["draw", "game", "lego", "music", "read"], &["school", "friends", "nature", "screen_time"], Easy),
        topic("feelings", "Feelings", &["feel", "happy", "sad", "angry", "worried"], &["family", "friends", "health"], Sensitive),
        topic("nature", "Nature & Animals", &["animal", "dog", "cat", "tree", "outside"], &["hobbies", "health", "responsibility"], Easy),
        topic("sports", "Sports & Movement", &["soccer", "basketball", "run", "swim", "team"], &["friends", "health", "hobbies"], Easy),
        topic("health", "Health & Sleep", &["sleep", "eat", "vegetables", "doctor", "tired"], &["sports", "feelings", "family"], Moderate),
        topic("responsibility", "Chores & Responsibility", &["chores", "clean", "room", "help", "pet"], &["family", "school", "nature"], Moderate),
        topic("screen_time", "Screen Time", &["tablet", "phone", "video", "youtube", "screen"], &["hobbies", "health", "family"], Sensitive),
        topic(GENERAL_TOPIC, "General Chat", &[], &["hobbies", "friends", "school", "nature"], Easy),
    ]
});

pub fn all_topics() -> &'static [ConversationTopic] {
    &TOPIC_CATALOG
}

pub fn find_topic(id: &str) -> Option<&'static ConversationTopic> {
    let id = id.to_lowercase();
    TOPIC_CATALOG.iter().find(|t| t.id == id)
}

/// Whether the catalog lists a direct bridge between two topics
pub fn is_bridgeable(from: &str, to: &str) -> bool {
    if from.eq_ignore_ascii_case(to) {
        return true;
    }
    find_topic(from)
        .map(|t| t.bridgeable_to.iter().any(|b| b.eq_ignore_ascii_case(to)))
        .unwrap_or(false)
}

// ============ Keyword Tables ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeBand {
    Young,  // 8 and under
    Middle, // 9-12
    Teen,   // 13+
}

impl AgeBand {
    pub fn from_age(age: u8) -> Self {
        match age {
            0..=8 => AgeBand::Young,
            9..=12 => AgeBand::Middle,
            _ => AgeBand::Teen,
        }
    }
}

/// Keyword lists and weights used to score one topic
#[derive(Debug, Clone)]
pub struct TopicKeywordTable {
    pub topic_id: &'static str,
    pub primary: &'static [&'static str],
    pub secondary: &'static [&'static str],
    pub context: &'static [&'static str],
    pub weight: f64,
    /// Multipliers for young, middle and teen children
    pub age_multipliers: [f64; 3],
}

impl TopicKeywordTable {
    pub fn age_multiplier(&self, band: AgeBand) -> f64 {
        match band {
            AgeBand::Young => self.age_multipliers[0],
            AgeBand::Middle => self.age_multipliers[1],
            AgeBand::Teen => self.age_multipliers[2],
        }
    }
}

pub const PRIMARY_MATCH_SCORE: f64 = 3.0;
pub const SECONDARY_MATCH_SCORE: f64 = 2.0;
pub const CONTEXT_MATCH_SCORE: f64 = 1.0;

pub static TOPIC_KEYWORD_TABLES: &[TopicKeywordTable] = &[
    TopicKeywordTable {
        topic_id: "school",
        primary: &["school", "teacher", "homework", "class", "classroom", "test", "exam"],
        secondary: &["math", "reading", "spelling", "science", "project", "grade", "lesson"],
        context: &["learn", "study", "bus", "lunch", "desk", "quiz"],
        weight: 1.0,
        age_multipliers: [1.0, 1.1, 1.1],
    },
    TopicKeywordTable {
        topic_id: "friends",
        primary: &["friend", "friends", "best friend", "playdate", "classmate"],
        secondary: &["recess", "party", "sleepover", "hang out", "together"],
        context: &["play", "laugh", "share", "invite", "group"],
        weight: 1.0,
        age_multipliers: [1.0, 1.1, 1.2],
    },
    TopicKeywordTable {
        topic_id: "family",
        primary: &["mom", "dad", "mum", "sister", "brother", "grandma", "grandpa", "family"],
        secondary: &["parents", "cousin", "aunt", "uncle", "baby"],
        context: &["home", "dinner", "house", "visit", "holiday"],
        weight: 0.9,
        age_multipliers: [1.2, 1.0, 0.9],
    },
    TopicKeywordTable {
        topic_id: "hobbies",
        primary: &["game", "drawing", "draw", "lego", "minecraft", "music", "painting"],
        secondary: &["build", "craft", "piano", "guitar", "book", "dance", "sing"],
        context: &["fun", "favorite", "make", "create", "collect"],
        weight: 1.0,
        age_multipliers: [1.1, 1.0, 1.0],
    },
    TopicKeywordTable {
        topic_id: "feelings",
        primary: &["feel", "feeling", "sad", "angry", "scared", "worried", "upset"],
        secondary: &["happy", "lonely", "nervous", "mad", "cry", "afraid"],
        context: &["heart", "hurt", "calm", "okay", "better"],
        weight: 1.2,
        age_multipliers: [0.9, 1.0, 1.1],
    },
    TopicKeywordTable {
        topic_id: "nature",
        primary: &["animal", "animals", "dog", "cat", "dinosaur", "ocean", "forest"],
        secondary: &["bird", "fish", "tree", "flower", "bug", "weather", "planet"],
        context: &["outside", "park", "garden", "rain", "sun", "zoo"],
        weight: 1.0,
        age_multipliers: [1.2, 1.0, 0.9],
    },
];

/// Count keyword hits in already-normalized text
pub fn count_matches(text: &str, words: &[&str]) -> usize {
    words.iter().filter(|w| contains_term(text, w)).count()
}

/// Term match on word boundaries; multi-word terms use substring match
pub fn contains_term(text: &str, term: &str) -> bool {
    if term.contains(' ') {
        return text.contains(term);
    }
    text.split(|c: char| !c.is_alphanumeric())
        .any(|word| word == term)
}
