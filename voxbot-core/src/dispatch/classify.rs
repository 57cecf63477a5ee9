//! Fast-path command detection.
//!
//! Loose patterns only decide the command *category*; parameters (a volume
//! level, a turn angle) are left to the language model's tool call. Order
//! matters: the first matching pattern wins, and "stop" is checked before
//! "shut down" so a plain stop never powers the robot off.

use regex::Regex;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCategory {
    Volume,
    Time,
    Date,
    Camera,
    MotorStop,
    Shutdown,
    MotorForward,
    MotorBackward,
    MotorLeft,
    MotorRight,
    MotorExplore,
    DistanceQuery,
}

impl CommandCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Volume => "volume",
            Self::Time => "time",
            Self::Date => "date",
            Self::Camera => "camera",
            Self::MotorStop => "motor_stop",
            Self::Shutdown => "shutdown",
            Self::MotorForward => "motor_forward",
            Self::MotorBackward => "motor_backward",
            Self::MotorLeft => "motor_left",
            Self::MotorRight => "motor_right",
            Self::MotorExplore => "motor_explore",
            Self::DistanceQuery => "distance_query",
        }
    }
}

/// Precedence-ordered patterns, matched against the lowercased transcript.
const PATTERNS: &[(CommandCategory, &str)] = &[
    (
        CommandCategory::Volume,
        r"(?:set|change|adjust|make|turn|increase|decrease|raise|lower)\s+(?:the\s+)?volume",
    ),
    (CommandCategory::Time, r"(?:what|tell).*time|time.*(?:is\s+it)"),
    (
        CommandCategory::Date,
        r"(?:what|tell).*(?:date|day)|(?:date|day).*(?:is\s+it|today)",
    ),
    (
        CommandCategory::Camera,
        r"(?:take|capture|use)\s+(?:a\s+)?(?:picture|photo|image|camera)|(?:what.*see|describe.*see)",
    ),
    (
        CommandCategory::MotorStop,
        r"^stop$|^halt$|^freeze$|stop\s+(?:moving|motors?|driving|it)|(?:motors?|robot)\s+stop",
    ),
    (
        CommandCategory::Shutdown,
        r"shut\s*down|power\s+off|turn\s+off\s+(?:the\s+)?(?:system|robot|everything)",
    ),
    (
        CommandCategory::MotorForward,
        r"(?:go|move|drive|walk|run)\s+forward|^forward$|move\s+ahead|go\s+ahead",
    ),
    (
        CommandCategory::MotorBackward,
        r"(?:go|move|drive)\s+(?:back(?:ward)?s?)|reverse|back\s*up",
    ),
    (CommandCategory::MotorLeft, r"(?:turn|go|rotate|spin)\s+left|left\s+turn"),
    (CommandCategory::MotorRight, r"(?:turn|go|rotate|spin)\s+right|right\s+turn"),
    (
        CommandCategory::MotorExplore,
        r"explore|start\s+explor|roam(?:\s+around)?|wander|autonomous|auto\s*pilot",
    ),
    (
        CommandCategory::DistanceQuery,
        r"how\s+far|what.*distance|check\s+distance|measure\s+distance|obstacle.*distance|distance.*obstacle",
    ),
];

pub struct CommandClassifier {
    patterns: Vec<(CommandCategory, Regex)>,
}

impl CommandClassifier {
    pub fn new() -> Result<Self> {
        let patterns = PATTERNS
            .iter()
            .map(|(category, pattern)| Ok((*category, Regex::new(pattern)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Category of `transcript`, or `None` for open conversation.
    pub fn classify(&self, transcript: &str) -> Option<CommandCategory> {
        let text = transcript.trim().to_lowercase();
        // Recognizers like to end utterances with punctuation; "Stop." is still a stop.
        let text = text.trim_end_matches(&['.', '!', '?'][..]);
        self.patterns
            .iter()
            .find(|(_, re)| re.is_match(text))
            .map(|(category, _)| *category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::CommandCategory::*;

    fn classify(text: &str) -> Option<CommandCategory> {
        CommandClassifier::new().unwrap().classify(text)
    }

    #[test]
    fn recognises_each_category() {
        let cases = [
            ("Set the volume to 70", Volume),
            ("what time is it", Time),
            ("tell me the date", Date),
            ("take a picture", Camera),
            ("what do you see", Camera),
            ("stop", MotorStop),
            ("Stop.", MotorStop),
            ("please shut down", Shutdown),
            ("go forward", MotorForward),
            ("back up a bit", MotorBackward),
            ("turn left", MotorLeft),
            ("rotate right", MotorRight),
            ("start exploring", MotorExplore),
            ("how far is the wall", DistanceQuery),
        ];
        for (text, expected) in cases {
            assert_eq!(classify(text), Some(expected), "{text}");
        }
    }

    #[test]
    fn stop_takes_precedence_over_shutdown() {
        assert_eq!(classify("robot stop"), Some(MotorStop));
        assert_eq!(classify("stop moving and shut down"), Some(MotorStop));
        assert_eq!(classify("power off the robot"), Some(Shutdown));
    }

    #[test]
    fn open_questions_are_not_commands() {
        assert_eq!(classify("why is the sky blue"), None);
        assert_eq!(classify("tell me a joke"), None);
    }
}
