use serde::{Deserialize, Serialize};

const HELP_REPLY: &str = "Reply JOIN to subscribe. Reply STOP to opt out.";

/// Keyword sets and name-capture behaviour for the opt-in flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptInPolicy {
    /// Ask for a first name after a successful join (default: true)
    pub ask_name_on_join: bool,
    /// Country calling code used for numbers without a leading `+` (default: "1")
    pub country_code: String,
    pub opt_in_keywords: Vec<String>,
    pub opt_out_keywords: Vec<String>,
    pub help_keywords: Vec<String>,
}

impl Default for OptInPolicy {
    fn default() -> Self {
        let words = |list: &[&str]| list.iter().map(|w| w.to_string()).collect();
        Self {
            ask_name_on_join: true,
            country_code: "1".to_string(),
            opt_in_keywords: words(&["JOIN", "START", "SUBSCRIBE"]),
            opt_out_keywords: words(&[
                "STOP",
                "STOPALL",
                "UNSUBSCRIBE",
                "CANCEL",
                "END",
                "QUIT",
                "STOPA",
                "STOP1",
                "STOP2",
            ]),
            help_keywords: words(&["HELP", "INFO"]),
        }
    }
}

/// What an inbound body asks for. Opt-out wins over everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    OptOut,
    Help,
    OptIn,
    Other,
}

impl OptInPolicy {
    pub fn classify(&self, body: &str) -> Intent {
        let upper = body.trim().to_uppercase();
        let tokens: Vec<&str> = upper.split_whitespace().collect();
        let hit = |set: &[String]| {
            tokens
                .iter()
                .any(|t| set.iter().any(|k| k.eq_ignore_ascii_case(t)))
        };

        if hit(&self.opt_out_keywords) {
            Intent::OptOut
        } else if hit(&self.help_keywords) {
            Intent::Help
        } else if hit(&self.opt_in_keywords) {
            Intent::OptIn
        } else {
            Intent::Other
        }
    }
}

/// Result of applying one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    InvalidNumber,
    OptedOut { created: bool },
    Help,
    OptedIn { created: bool, ask_name: bool },
    NameCaptured(String),
    Unrecognized,
}

impl Outcome {
    /// Text sent back to the subscriber.
    pub fn reply(&self) -> String {
        match self {
            Outcome::InvalidNumber => format!("Invalid number. {HELP_REPLY}"),
            Outcome::OptedOut { .. } => "You're opted out. Reply START to resubscribe.".to_string(),
            Outcome::OptedIn { ask_name: true, .. } => {
                "You're subscribed! Reply with your first name (example: Joey). Reply STOP to opt out."
                    .to_string()
            }
            Outcome::OptedIn { .. } => "You're subscribed! Reply STOP to opt out.".to_string(),
            Outcome::NameCaptured(name) => {
                format!("Thanks, {name}! You're all set. Reply STOP to opt out.")
            }
            Outcome::Help | Outcome::Unrecognized => HELP_REPLY.to_string(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::InvalidNumber => "invalid_number",
            Outcome::OptedOut { .. } => "opted_out",
            Outcome::Help => "help",
            Outcome::OptedIn { .. } => "opted_in",
            Outcome::NameCaptured(_) => "name_captured",
            Outcome::Unrecognized => "unrecognized",
        }
    }
}

/// Reduce free text to a plausible first name: ASCII letters, spaces,
/// apostrophes and hyphens, whitespace collapsed, at most 40 characters.
pub fn clean_name(raw: &str) -> String {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphabetic() || c.is_whitespace() || *c == '\'' || *c == '-')
        .collect();
    let collapsed = kept.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(40).collect::<String>().trim().to_string()
}
