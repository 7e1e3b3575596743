// Person-name recognition
// A rule-based recognizer behind a trait seam, so a model-backed recognizer
// can be dropped in without touching the detector.

use crate::types::{Category, EntityMatch};
use regex::Regex;
use std::collections::HashSet;

/// On-host person-name recognition capability.
///
/// Implementations must be deterministic, must not touch the network, and
/// must only return spans on non-structural lines whose text does not read as
/// a tax-form label.
pub trait PersonEntityRecognizer: Send + Sync {
    fn recognize(&self, text: &str) -> Vec<EntityMatch>;
}

/// Common given names used to gate the capitalization heuristics.
const KNOWN_FIRST_NAMES: &[&str] = &[
    "aaron", "adam", "alan", "albert", "alex", "alexander", "alice", "amanda", "amber", "amy",
    "andrea", "andrew", "angela", "anna", "anne", "anthony", "ashley", "austin", "barbara",
    "benjamin", "beth", "betty", "beverly", "billy", "bobby", "bradley", "brandon", "brenda",
    "brian", "brittany", "bruce", "bryan", "carl", "carol", "carolyn", "catherine", "charles",
    "charlotte", "cheryl", "chris", "christian", "christina", "christine", "christopher",
    "cynthia", "dan", "daniel", "danielle", "david", "deborah", "debra", "denise", "dennis",
    "diana", "diane", "donald", "donna", "doris", "dorothy", "douglas", "dylan", "edward",
    "elizabeth", "emily", "emma", "eric", "ethan", "eugene", "evelyn", "frances", "frank",
    "gary", "george", "gerald", "gloria", "greg", "gregory", "hannah", "harold", "harry",
    "heather", "helen", "henry", "howard", "isabella", "jack", "jacob", "jacqueline", "james",
    "jane", "janet", "janice", "jason", "jean", "jeff", "jeffrey", "jennifer", "jeremy",
    "jerry", "jesse", "jessica", "joan", "joe", "john", "johnny", "jonathan", "jordan",
    "jose", "joseph", "joshua", "joyce", "juan", "judith", "judy", "julia", "julie", "justin",
    "karen", "katherine", "kathleen", "kathryn", "kathy", "keith", "kelly", "kenneth", "kevin",
    "kimberly", "kyle", "larry", "laura", "lauren", "lawrence", "linda", "lisa", "logan",
    "lori", "louis", "madison", "margaret", "maria", "marie", "marilyn", "martha", "mary",
    "matthew", "megan", "melissa", "michael", "michelle", "mike", "nancy", "natalie",
    "nathan", "nicholas", "nicole", "noah", "olivia", "pamela", "patricia", "patrick",
    "paul", "peter", "philip", "phillip", "rachel", "ralph", "randy", "raymond", "rebecca",
    "richard", "robert", "roger", "ronald", "rose", "roy", "russell", "ruth", "ryan",
    "samantha", "samuel", "sandra", "sara", "sarah", "scott", "sean", "sharon", "shirley",
    "sophia", "stephanie", "stephen", "steve", "steven", "susan", "teresa", "terry",
    "theresa", "thomas", "timothy", "tyler", "victoria", "vincent", "virginia", "walter",
    "wayne", "william", "zachary",
];

/// Tax-domain words that capitalization heuristics must not treat as names.
const TAX_TERMS: &[&str] = &[
    "adjusted", "gross", "income", "taxable", "deduction", "deductions", "withholding",
    "exemption", "dependent", "dependents", "filing", "jointly", "separately", "refund",
    "return", "returns", "credit", "credits", "federal", "state", "internal", "revenue",
    "service", "taxpayer", "employer", "employee", "wages", "earned", "unearned", "interest",
    "dividends", "capital", "gains", "losses", "standard", "itemized", "schedule", "form",
    "statement", "wage", "tax", "estimated", "quarterly", "annual", "fiscal", "medicare",
    "social", "security", "retirement", "pension", "distribution", "rollover", "contribution",
];

/// Structural and technical words common in assistant transcripts, plus
/// sentence-leading function words that otherwise read as title case.
const TECHNICAL_TERMS: &[&str] = &[
    "error", "warning", "info", "debug", "trace", "fatal", "function", "method", "class",
    "object", "string", "number", "boolean", "array", "value", "null", "true", "false",
    "import", "export", "module", "package", "request", "response", "server", "client",
    "token", "session", "user", "admin", "password", "login", "logout", "file", "folder",
    "path", "data", "json", "yaml", "http", "https", "api", "url", "uri", "host", "port",
    "config", "settings", "default", "none", "some", "result", "option", "note", "example",
    "step", "steps", "summary", "overview", "details", "section", "chapter", "page",
    "table", "figure", "appendix", "version", "release", "update", "upgrade", "install",
    "thanks", "thank", "hello", "dear", "regards", "sincerely", "best", "subject",
    "the", "this", "that", "these", "those", "your", "our", "their", "his", "her", "its",
    "was", "were", "been", "have", "has", "had", "will", "would", "should", "could", "can",
    "and", "but", "for", "not", "are", "with", "from", "into", "about", "please", "when",
];

const MONTHS: &[&str] = &[
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december", "jan", "feb", "mar", "apr", "jun", "jul", "aug",
    "sep", "sept", "oct", "nov", "dec",
];

const US_STATES: &[&str] = &[
    "alabama", "alaska", "arizona", "arkansas", "california", "colorado", "connecticut",
    "delaware", "florida", "georgia", "hawaii", "idaho", "illinois", "indiana", "iowa",
    "kansas", "kentucky", "louisiana", "maine", "maryland", "massachusetts", "michigan",
    "minnesota", "mississippi", "missouri", "montana", "nebraska", "nevada", "hampshire",
    "jersey", "mexico", "york", "carolina", "dakota", "ohio", "oklahoma", "oregon",
    "pennsylvania", "rhode", "island", "tennessee", "texas", "utah", "vermont", "virginia",
    "washington", "wisconsin", "wyoming", "new", "north", "south", "west",
];

const COMMON_ORGS: &[&str] = &[
    "inc", "llc", "corp", "corporation", "company", "bank", "trust", "group", "services",
    "associates", "partners", "holdings", "international", "national", "united", "american",
    "google", "microsoft", "amazon", "apple", "meta", "netflix", "oracle", "salesforce",
    "fidelity", "vanguard", "schwab", "chase", "citibank", "wells", "fargo", "paypal",
];

/// Leading tokens that mark a markdown-structural line.
const STRUCTURAL_LINE_PREFIXES: &[&str] = &["#", "**", "-", "*", "_"];

/// Greeting words that precede a name without being part of it.
const GREETING_WORDS: &[&str] = &["Hi", "Hey", "Hello", "Dear", "Thanks", "Thank"];

#[derive(Debug, Clone, Copy, PartialEq)]
enum WordShape {
    Title,
    Caps,
    Lower,
    Other,
}

fn shape_of(word: &str) -> WordShape {
    let mut chars = word.chars();
    let Some(first) = chars.next() else {
        return WordShape::Other;
    };
    let rest_lower = chars.clone().all(|c| c.is_ascii_lowercase());
    if first.is_ascii_uppercase() && word.len() >= 2 && rest_lower {
        WordShape::Title
    } else if word.len() >= 2 && word.chars().all(|c| c.is_ascii_uppercase()) {
        WordShape::Caps
    } else if first.is_ascii_lowercase() && rest_lower {
        WordShape::Lower
    } else {
        WordShape::Other
    }
}

pub struct RuleBasedPersonRecognizer {
    word: Regex,
    email_header: Regex,
    angle_email_name: Regex,
    salutation: Regex,
    tax_form_label: Regex,
    numbered_list: Regex,
    first_names: HashSet<&'static str>,
    exclusion_union: HashSet<&'static str>,
}

impl RuleBasedPersonRecognizer {
    pub fn new() -> Self {
        let mut exclusion_union = HashSet::new();
        for list in [TAX_TERMS, TECHNICAL_TERMS, MONTHS, US_STATES, COMMON_ORGS] {
            exclusion_union.extend(list.iter().copied());
        }

        RuleBasedPersonRecognizer {
            word: Regex::new(r"[A-Za-z]+(?:['-][A-Za-z]+)*").unwrap(),
            email_header: Regex::new(
                r"(?m)^[ \t]*(?:From|To|Cc|Bcc|Reply-To|Sender):[ \t]*([A-Z][a-z]+(?:[ \t][A-Z][a-z]+)+)[ \t]*<[^<>\s]+@",
            )
            .unwrap(),
            angle_email_name: Regex::new(
                r"([A-Z][a-z]+(?:[ \t][A-Z][a-z]+)+)[ \t]*<[^<>\s]+@[^<>\s]+>",
            )
            .unwrap(),
            salutation: Regex::new(
                r"\b(?:Hi|Hey|Hello|Dear|Thanks|Thank you),?[ \t]+([A-Z][a-z]+(?:[ \t][A-Z][a-z]+)?)\b",
            )
            .unwrap(),
            tax_form_label: Regex::new(r"^(?:Form|Schedule|Statement|Wage|Tax)\b").unwrap(),
            numbered_list: Regex::new(r"^\d+\.").unwrap(),
            first_names: KNOWN_FIRST_NAMES.iter().copied().collect(),
            exclusion_union,
        }
    }

    fn is_known_first_name(&self, word: &str) -> bool {
        self.first_names.contains(word.to_lowercase().as_str())
    }

    fn is_excluded_word(&self, word: &str) -> bool {
        self.exclusion_union.contains(word.to_lowercase().as_str())
    }

    /// All words of the candidate sit in the exclusion union.
    fn all_words_excluded(&self, candidate: &str) -> bool {
        let mut words = candidate.split_whitespace().peekable();
        if words.peek().is_none() {
            return true;
        }
        words.all(|w| self.is_excluded_word(w))
    }

    /// The line containing `offset` is a heading, list item, or emphasis line.
    fn on_structural_line(&self, text: &str, offset: usize) -> bool {
        let line_start = text[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
        let line = &text[line_start..];
        let line = &line[..line.find('\n').unwrap_or(line.len())];
        let trimmed = line.trim_start();
        STRUCTURAL_LINE_PREFIXES
            .iter()
            .any(|p| trimmed.starts_with(p))
            || self.numbered_list.is_match(trimmed)
    }

    /// Shared rejection gate for every candidate.
    fn accept(&self, text: &str, start: usize, candidate: &str) -> bool {
        !self.on_structural_line(text, start)
            && !self.all_words_excluded(candidate)
            && !self.tax_form_label.is_match(candidate)
    }

    fn push(
        &self,
        out: &mut Vec<EntityMatch>,
        text: &str,
        start: usize,
        end: usize,
        candidate: &str,
    ) {
        if self.accept(text, start, candidate) {
            out.push(EntityMatch::new(start, end, Category::Person, candidate));
        }
    }

    /// Capitalization heuristics over the word stream. Working on words (not
    /// non-overlapping regex matches) lets "Karen Wilson" surface even when
    /// "Reach Karen" precedes it, and keeps names from crossing newlines.
    fn scan_word_heuristics(&self, text: &str, out: &mut Vec<EntityMatch>) {
        let words: Vec<(usize, usize, &str)> = self
            .word
            .find_iter(text)
            .map(|m| (m.start(), m.end(), m.as_str()))
            .collect();

        // Words count as adjacent only across plain spaces or tabs.
        let adjacent = |i: usize| -> bool {
            let gap = &text[words[i].1..words[i + 1].0];
            !gap.is_empty() && gap.bytes().all(|b| b == b' ' || b == b'\t')
        };

        for i in 0..words.len() {
            let (start, end, w1) = words[i];
            let s1 = shape_of(w1);

            // Standalone known first names ("Hi John and Jane" yields both).
            if s1 == WordShape::Title && self.is_known_first_name(w1) {
                self.push(out, text, start, end, w1);
            }

            if i + 1 >= words.len() || !adjacent(i) {
                continue;
            }
            let (_, end2, w2) = words[i + 1];
            let s2 = shape_of(w2);
            let pair = &text[start..end2];

            match (s1, s2) {
                // Title-case bigram: both words clean, or one is a known
                // first name. A leading greeting is the salutation pattern's
                // job, not part of the name.
                (WordShape::Title, WordShape::Title) => {
                    if !GREETING_WORDS.contains(&w1) {
                        let clean = !self.is_excluded_word(w1) && !self.is_excluded_word(w2);
                        let named =
                            self.is_known_first_name(w1) || self.is_known_first_name(w2);
                        if clean || named {
                            self.push(out, text, start, end2, pair);
                        }
                    }
                }
                // ALL-CAPS bigram gated on a known first name.
                (WordShape::Caps, WordShape::Caps) => {
                    if self.is_known_first_name(w1) || self.is_known_first_name(w2) {
                        self.push(out, text, start, end2, pair);
                    }
                }
                // Lowercase bigram only when the first word is a known name.
                (WordShape::Lower, WordShape::Lower) => {
                    if self.is_known_first_name(w1) && !self.is_excluded_word(w2) {
                        self.push(out, text, start, end2, pair);
                    }
                }
                _ => {}
            }

            // Trigrams and longer runs, title-case or ALL-CAPS, requiring a
            // known first name somewhere in the run.
            if matches!(s1, WordShape::Title | WordShape::Caps) {
                let mut j = i + 1;
                while j < words.len() && shape_of(words[j].2) == s1 && adjacent(j - 1) {
                    j += 1;
                }
                let run_len = j - i;
                if run_len >= 3 && (s1 == WordShape::Title || run_len <= 3) {
                    let run_end = words[j - 1].1;
                    let run = &text[start..run_end];
                    if run
                        .split_whitespace()
                        .any(|w| self.is_known_first_name(w))
                    {
                        self.push(out, text, start, run_end, run);
                    }
                }
            }
        }
    }
}

impl Default for RuleBasedPersonRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl PersonEntityRecognizer for RuleBasedPersonRecognizer {
    fn recognize(&self, text: &str) -> Vec<EntityMatch> {
        let mut out = Vec::new();

        self.scan_word_heuristics(text, &mut out);

        // Email headers: "From: Jane Doe <jane@example.com>".
        for caps in self.email_header.captures_iter(text) {
            if let Some(name) = caps.get(1) {
                self.push(&mut out, text, name.start(), name.end(), name.as_str());
            }
        }

        // Display name directly before an angle-bracketed address.
        for caps in self.angle_email_name.captures_iter(text) {
            if let Some(name) = caps.get(1) {
                self.push(&mut out, text, name.start(), name.end(), name.as_str());
            }
        }

        // Salutations.
        for caps in self.salutation.captures_iter(text) {
            if let Some(name) = caps.get(1) {
                self.push(&mut out, text, name.start(), name.end(), name.as_str());
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names_in(text: &str) -> Vec<String> {
        RuleBasedPersonRecognizer::new()
            .recognize(text)
            .into_iter()
            .map(|m| m.text)
            .collect()
    }

    #[test]
    fn test_title_bigram() {
        let names = names_in("I spoke with John Smith yesterday.");
        assert!(names.contains(&"John Smith".to_string()));
    }

    #[test]
    fn test_bigram_found_even_after_leading_capitalized_word() {
        let names = names_in("Reach Karen Wilson today");
        assert!(names.contains(&"Karen Wilson".to_string()));
    }

    #[test]
    fn test_trigram_requires_known_first_name() {
        let names = names_in("Signed by Mary Ellen Walton.");
        assert!(names.contains(&"Mary Ellen Walton".to_string()));
        let names = names_in("The Quarterly Budget Review happened.");
        assert!(!names.iter().any(|n| n.contains("Quarterly Budget Review")));
    }

    #[test]
    fn test_all_caps_gated_on_first_name() {
        let names = names_in("Employee: JOHN SMITH");
        assert!(names.contains(&"JOHN SMITH".to_string()));
        let names = names_in("READ THE MANUAL");
        assert!(names.is_empty());
    }

    #[test]
    fn test_lowercase_bigram() {
        let names = names_in("forward this to john smith when you can");
        assert!(names.contains(&"john smith".to_string()));
    }

    #[test]
    fn test_salutation_and_singleton() {
        let names = names_in("Hi John and Jane, welcome aboard.");
        assert!(names.contains(&"John".to_string()));
        assert!(names.contains(&"Jane".to_string()));
        assert!(!names.contains(&"Hi John".to_string()));
    }

    #[test]
    fn test_email_header() {
        let names = names_in("From: Jane Doe <jane.doe@example.com>");
        assert!(names.contains(&"Jane Doe".to_string()));
    }

    #[test]
    fn test_angle_email_name() {
        let names = names_in("Contact Bob Stone <bob@corp.example> for access");
        assert!(names.contains(&"Bob Stone".to_string()));
    }

    #[test]
    fn test_structural_line_rejected() {
        assert!(names_in("# John Smith\nplain text").is_empty());
        assert!(names_in("- John Smith is assigned").is_empty());
        assert!(names_in("1. John Smith reviews the doc").is_empty());
        assert!(names_in("**John Smith** leads").is_empty());
    }

    #[test]
    fn test_names_do_not_cross_newlines() {
        let names = names_in("Karen\nWilson");
        assert!(!names.contains(&"Karen Wilson".to_string()));
        // The standalone known first name on its own line still counts.
        assert!(names.contains(&"Karen".to_string()));
    }

    #[test]
    fn test_tax_form_label_rejected() {
        let names = names_in("Attach Form Schedule here");
        assert!(!names.iter().any(|n| n.starts_with("Form")));
    }

    #[test]
    fn test_exclusion_union_rejects_domain_terms() {
        let names = names_in("Adjusted Gross Income went up. New York state applies.");
        assert!(!names.contains(&"Adjusted Gross".to_string()));
        assert!(!names.contains(&"New York".to_string()));
    }

    #[test]
    fn test_months_not_names() {
        let names = names_in("See you in June July");
        assert!(names.is_empty());
    }
}
