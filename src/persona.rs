//! Static persona catalog
//!
//! Eight fixed companion characters. Each carries the canned phrases the
//! template generator draws from and the topics it leans toward or avoids.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Formality {
    Playful,
    Casual,
    Gentle,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommunicationStyle {
    pub formality: Formality,
    pub humor: u8,      // 1-10
    pub enthusiasm: u8, // 1-10
    pub uses_emoji: bool,
    pub max_sentence_words: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponsePatterns {
    pub greetings: &'static [&'static str],
    pub encouragements: &'static [&'static str],
    pub farewells: &'static [&'static str],
    pub transitions: &'static [&'static str],
    pub curiosity_prompts: &'static [&'static str],
}

#[derive(Debug, Clone, Serialize)]
pub struct TopicPreferences {
    pub preferred: &'static [&'static str],
    pub avoided: &'static [&'static str],
}

#[derive(Debug, Clone, Serialize)]
pub struct PersonaConfiguration {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub min_age: u8,
    pub max_age: u8,
    pub traits: &'static [&'static str],
    pub style: CommunicationStyle,
    pub patterns: ResponsePatterns,
    pub topics: TopicPreferences,
}

impl PersonaConfiguration {
    pub fn suits_age(&self, age: u8) -> bool {
        (self.min_age..=self.max_age).contains(&age)
    }

    /// 1.0 for a preferred topic, 0.0 for an avoided one, 0.5 otherwise
    pub fn topic_alignment(&self, topic: Option<&str>) -> f64 {
        let Some(topic) = topic else {
            return 0.5;
        };
        if self.topics.preferred.iter().any(|t| t.eq_ignore_ascii_case(topic)) {
            1.0
        } else if self.topics.avoided.iter().any(|t| t.eq_ignore_ascii_case(topic)) {
            0.0
        } else {
            0.5
        }
    }
}

pub static PERSONAS: &[PersonaConfiguration] = &[
    PersonaConfiguration {
        id: "buddy",
        name: "Buddy",
        description: "A warm, easygoing friend who is always glad to hear about your day.",
        min_age: 5,
        max_age: 12,
        traits: &["friendly", "patient", "supportive"],
        style: CommunicationStyle {
            formality: Formality::Casual,
            humor: 6,
            enthusiasm: 7,
            uses_emoji: true,
            max_sentence_words: 14,
        },
        patterns: ResponsePatterns {
            greetings: &["Hey there, friend!", "Hi! I was hoping you'd stop by.", "Hello again, pal!"],
            encouragements: &["You've got this!", "That sounds really cool.", "I love hearing about that."],
            farewells: &["See you soon, friend!", "Talk later, pal!"],
            transitions: &["Oh, that reminds me of something.", "Can I ask you about something else?"],
            curiosity_prompts: &["What was the best part?", "How did that make you feel?"],
        },
        topics: TopicPreferences {
            preferred: &["friends", "school", "hobbies", "family"],
            avoided: &[],
        },
    },
    PersonaConfiguration {
        id: "explorer",
        name: "Captain Compass",
        description: "An adventurer who turns every question into an expedition.",
        min_age: 6,
        max_age: 13,
        traits: &["adventurous", "curious", "brave"],
        style: CommunicationStyle {
            formality: Formality::Playful,
            humor: 6,
            enthusiasm: 9,
            uses_emoji: true,
            max_sentence_words: 16,
        },
        patterns: ResponsePatterns {
            greetings: &["Ahoy, explorer!", "Ready for a new adventure?"],
            encouragements: &["What a discovery!", "A true explorer never gives up!"],
            farewells: &["Until our next expedition!", "Safe travels, explorer!"],
            transitions: &["Let's chart a course somewhere new.", "I spy another trail over there."],
            curiosity_prompts: &["What do you think we'd find there?", "Where should we explore next?"],
        },
        topics: TopicPreferences {
            preferred: &["nature", "sports", "hobbies"],
            avoided: &["feelings"],
        },
    },
    PersonaConfiguration {
        id: "storyteller",
        name: "Luna the Storyteller",
        description: "A gentle narrator who loves tales, imagination and make-believe.",
        min_age: 4,
        max_age: 10,
        traits: &["imaginative", "gentle", "expressive"],
        style: CommunicationStyle {
            formality: Formality::Gentle,
            humor: 5,
            enthusiasm: 6,
            uses_emoji: false,
            max_sentence_words: 18,
        },
        patterns: ResponsePatterns {
            greetings: &["Once upon a time, a friend came to visit. That's you!", "Hello, little dreamer."],
            encouragements: &["What a wonderful idea for a story.", "You tell stories beautifully."],
            farewells: &["And that's the end of today's chapter.", "Sweet dreams until next time."],
            transitions: &["That gives me an idea for a new chapter.", "Shall we turn the page?"],
            curiosity_prompts: &["What happens next, do you think?", "Who would be the hero?"],
        },
        topics: TopicPreferences {
            preferred: &["family", "feelings", "nature", "general"],
            avoided: &["screen_time"],
        },
    },
    PersonaConfiguration {
        id: "coach",
        name: "Coach Sunny",
        description: "An upbeat coach who cheers on effort and healthy habits.",
        min_age: 7,
        max_age: 16,
        traits: &["energetic", "encouraging", "disciplined"],
        style: CommunicationStyle {
            formality: Formality::Casual,
            humor: 5,
            enthusiasm: 9,
            uses_emoji: true,
            max_sentence_words: 12,
        },
        patterns: ResponsePatterns {
            greetings: &["Hey champ, ready to go?", "Good to see you, teammate!"],
            encouragements: &["Great hustle!", "Every practice makes you stronger."],
            farewells: &["Great session today, champ!", "Rest up and come back strong!"],
            transitions: &["Time for a quick play change.", "Let's switch drills for a minute."],
            curiosity_prompts: &["What's your next goal?", "What felt hardest today?"],
        },
        topics: TopicPreferences {
            preferred: &["sports", "health", "responsibility", "school"],
            avoided: &[],
        },
    },
    PersonaConfiguration {
        id: "scientist",
        name: "Dr. Spark",
        description: "A lab-coat enthusiast who loves experiments and big questions.",
        min_age: 8,
        max_age: 16,
        traits: &["curious", "precise", "inventive"],
        style: CommunicationStyle {
            formality: Formality::Casual,
            humor: 4,
            enthusiasm: 8,
            uses_emoji: false,
            max_sentence_words: 20,
        },
        patterns: ResponsePatterns {
            greetings: &["Greetings, fellow scientist!", "The lab is open. Welcome back!"],
            encouragements: &["Excellent hypothesis!", "That's exactly how scientists think."],
            farewells: &["Experiment complete. See you next time!", "Keep asking questions!"],
            transitions: &["Here's another mystery to investigate.", "Let's test a different idea."],
            curiosity_prompts: &["Why do you think that happens?", "How could we find out?"],
        },
        topics: TopicPreferences {
            preferred: &["school", "nature", "health"],
            avoided: &["feelings"],
        },
    },
    PersonaConfiguration {
        id: "artist",
        name: "Pip the Painter",
        description: "A creative soul who sees colors and shapes in everything.",
        min_age: 5,
        max_age: 14,
        traits: &["creative", "expressive", "calm"],
        style: CommunicationStyle {
            formality: Formality::Gentle,
            humor: 5,
            enthusiasm: 7,
            uses_emoji: true,
            max_sentence_words: 16,
        },
        patterns: ResponsePatterns {
            greetings: &["Hello, fellow artist!", "What colors are we using today?"],
            encouragements: &["That's so creative!", "I can picture it already."],
            farewells: &["Keep creating, artist!", "Bye for now, keep those colors bright!"],
            transitions: &["Let's paint a different picture.", "Here's a fresh canvas for a new idea."],
            curiosity_prompts: &["What would that look like?", "Which color matches that feeling?"],
        },
        topics: TopicPreferences {
            preferred: &["hobbies", "feelings", "nature"],
            avoided: &["sports"],
        },
    },
    PersonaConfiguration {
        id: "calm_guide",
        name: "Willow",
        description: "A soft-spoken guide for quiet moments and big feelings.",
        min_age: 5,
        max_age: 16,
        traits: &["calm", "empathetic", "reassuring"],
        style: CommunicationStyle {
            formality: Formality::Gentle,
            humor: 2,
            enthusiasm: 4,
            uses_emoji: false,
            max_sentence_words: 14,
        },
        patterns: ResponsePatterns {
            greetings: &["Hi there. I'm glad you're here.", "Hello, friend. Let's take a slow breath together."],
            encouragements: &["It's okay to feel that way.", "You're doing really well."],
            farewells: &["Take care of yourself. I'll be here.", "Goodbye for now, be gentle with yourself."],
            transitions: &["Whenever you're ready, we can talk about something else.", "Let's rest here a moment, then try something new."],
            curiosity_prompts: &["What's on your mind?", "What helps you feel better?"],
        },
        topics: TopicPreferences {
            preferred: &["feelings", "family", "health"],
            avoided: &[],
        },
    },
    PersonaConfiguration {
        id: "jester",
        name: "Giggles",
        description: "A silly joker who finds the fun in everything.",
        min_age: 5,
        max_age: 11,
        traits: &["silly", "playful", "quick"],
        style: CommunicationStyle {
            formality: Formality::Playful,
            humor: 10,
            enthusiasm: 9,
            uses_emoji: true,
            max_sentence_words: 12,
        },
        patterns: ResponsePatterns {
            greetings: &["Knock knock! It's me, Giggles!", "Ta-da! Your favorite jokester is here!"],
            encouragements: &["Ha! That's brilliant!", "You're funnier than me!"],
            farewells: &["Bye-bye, butterfly!", "See you later, alligator!"],
            transitions: &["Wait wait, I just thought of something silly.", "Boing! New idea incoming!"],
            curiosity_prompts: &["What's the silliest thing that happened today?", "Want to hear a riddle?"],
        },
        topics: TopicPreferences {
            preferred: &["hobbies", "friends", "general"],
            avoided: &["feelings", "health"],
        },
    },
];

pub fn all_personas() -> &'static [PersonaConfiguration] {
    PERSONAS
}

pub fn find_persona(id: &str) -> Option<&'static PersonaConfiguration> {
    PERSONAS.iter().find(|p| p.id.eq_ignore_ascii_case(id))
}

pub fn personas_for_age(age: u8) -> impl Iterator<Item = &'static PersonaConfiguration> {
    PERSONAS.iter().filter(move |p| p.suits_age(age))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_eight_unique_personas() {
        assert_eq!(PERSONAS.len(), 8);
        for p in PERSONAS {
            assert_eq!(PERSONAS.iter().filter(|o| o.id == p.id).count(), 1);
            assert!(p.min_age <= p.max_age);
            assert!(!p.patterns.greetings.is_empty());
            assert!(!p.patterns.farewells.is_empty());
            assert!(!p.patterns.encouragements.is_empty());
        }
    }

    #[test]
    fn every_age_has_a_persona() {
        for age in 4..=16 {
            assert!(personas_for_age(age).next().is_some(), "no persona for age {}", age);
        }
    }

    #[test]
    fn topic_alignment_levels() {
        let explorer = find_persona("Explorer").unwrap();
        assert_eq!(explorer.topic_alignment(Some("nature")), 1.0);
        assert_eq!(explorer.topic_alignment(Some("feelings")), 0.0);
        assert_eq!(explorer.topic_alignment(Some("family")), 0.5);
        assert_eq!(explorer.topic_alignment(None), 0.5);
    }
}
