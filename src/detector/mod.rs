// Entity detection engine
// Layered scan over a text buffer: context-gated numerics, fixed patterns,
// dates, bare amounts, person names, secrets. The detector reports every
// candidate it sees; overlap resolution belongs to the sanitizer.

pub mod patterns;
pub mod person;
pub mod validators;

pub use person::{PersonEntityRecognizer, RuleBasedPersonRecognizer};

use crate::types::{Category, EntityMatch};
use patterns::{is_llm_identifier, Patterns};
use std::collections::HashSet;
use validators::{
    is_routing_number, is_valid_date, is_year_shaped, shannon_entropy,
};

pub struct EntityDetector {
    patterns: Patterns,
    person: Box<dyn PersonEntityRecognizer>,
}

impl EntityDetector {
    pub fn new() -> Self {
        EntityDetector {
            patterns: Patterns::new(),
            person: Box::new(RuleBasedPersonRecognizer::new()),
        }
    }

    /// Swap in a different person recognizer (e.g. a model-backed one).
    pub fn with_recognizer(recognizer: Box<dyn PersonEntityRecognizer>) -> Self {
        EntityDetector {
            patterns: Patterns::new(),
            person: recognizer,
        }
    }

    /// Scan `text` and return every candidate match, in layer order.
    ///
    /// Deterministic for a given input and side-effect-free. Candidates may
    /// overlap and the same span may appear under two categories; the
    /// sanitizer's dedupe and longest-first substitution resolve that.
    pub fn detect(&self, text: &str) -> Vec<EntityMatch> {
        let mut matches = Vec::new();
        if text.is_empty() {
            return matches;
        }

        self.detect_bank_context(text, &mut matches);
        self.detect_financial_context(text, &mut matches);
        self.detect_fixed_patterns(text, &mut matches);
        self.detect_tax_years(text, &mut matches);
        self.detect_dates(text, &mut matches);
        self.detect_context_currency(text, &mut matches);
        matches.extend(self.person.recognize(text));
        self.detect_secrets(text, &mut matches);

        matches
    }

    /// Layer 1: digit groups near banking keywords. Nine-digit groups that
    /// pass the ABA prefix and checksum become routing numbers and are
    /// excluded from the account-number pass.
    fn detect_bank_context(&self, text: &str, out: &mut Vec<EntityMatch>) {
        let keywords = keyword_spans(&self.patterns.bank_keywords, text);
        if keywords.is_empty() {
            return;
        }

        let mut routing_spans: HashSet<(usize, usize)> = HashSet::new();
        for m in self.patterns.nine_digits.find_iter(text) {
            if near_any(&keywords, m.start(), m.end(), patterns::BANK_WINDOW)
                && is_routing_number(m.as_str())
            {
                routing_spans.insert((m.start(), m.end()));
                out.push(EntityMatch::new(
                    m.start(),
                    m.end(),
                    Category::RoutingNumber,
                    m.as_str(),
                ));
            }
        }

        for m in self.patterns.account_digits.find_iter(text) {
            if routing_spans.contains(&(m.start(), m.end())) {
                continue;
            }
            if near_any(&keywords, m.start(), m.end(), patterns::BANK_WINDOW) {
                out.push(EntityMatch::new(
                    m.start(),
                    m.end(),
                    Category::BankAccount,
                    m.as_str(),
                ));
            }
        }
    }

    /// Layer 2: 8-12 digit groups near financial/tax keywords.
    fn detect_financial_context(&self, text: &str, out: &mut Vec<EntityMatch>) {
        let keywords = keyword_spans(&self.patterns.financial_keywords, text);
        if keywords.is_empty() {
            return;
        }
        for m in self.patterns.financial_account_digits.find_iter(text) {
            if is_year_shaped(m.as_str()) || is_routing_number(m.as_str()) {
                continue;
            }
            if near_any(&keywords, m.start(), m.end(), patterns::FINANCIAL_WINDOW) {
                out.push(EntityMatch::new(
                    m.start(),
                    m.end(),
                    Category::BankAccount,
                    m.as_str(),
                ));
            }
        }
    }

    /// Layer 3: fixed-pattern entities, in precedence order.
    fn detect_fixed_patterns(&self, text: &str, out: &mut Vec<EntityMatch>) {
        let p = &self.patterns;
        let fixed: [(&regex::Regex, Category); 15] = [
            (&p.url, Category::Url),
            (&p.email, Category::Email),
            (&p.credit_card, Category::CreditCard),
            (&p.bank_card, Category::BankCard),
            (&p.dollar_currency, Category::Currency),
            (&p.itin, Category::Itin),
            (&p.ssn, Category::Ssn),
            (&p.ein, Category::Ein),
            (&p.iban, Category::Iban),
            (&p.ip, Category::Ip),
            (&p.phone, Category::Phone),
            (&p.street_address, Category::Address),
            (&p.po_box, Category::Address),
            (&p.partial_address, Category::PartialAddress),
            (&p.zip_anchored_address, Category::Address),
        ];
        for (regex, category) in fixed {
            for m in regex.find_iter(text) {
                if category == Category::Ip && !valid_ip_octets(m.as_str()) {
                    continue;
                }
                out.push(EntityMatch::new(m.start(), m.end(), category, m.as_str()));
            }
        }
    }

    /// Layer 4: four-digit years near tax keywords.
    fn detect_tax_years(&self, text: &str, out: &mut Vec<EntityMatch>) {
        let keywords = keyword_spans(&self.patterns.tax_year_keywords, text);
        if keywords.is_empty() {
            return;
        }
        for m in self.patterns.year.find_iter(text) {
            if near_any(&keywords, m.start(), m.end(), patterns::TAX_YEAR_WINDOW) {
                out.push(EntityMatch::new(
                    m.start(),
                    m.end(),
                    Category::TaxYear,
                    m.as_str(),
                ));
            }
        }
    }

    /// Layer 5: calendar dates, promoted to DOB near birth keywords. Spans
    /// that look like path or filename segments are skipped.
    fn detect_dates(&self, text: &str, out: &mut Vec<EntityMatch>) {
        let dob_keywords = keyword_spans(&self.patterns.dob_keywords, text);
        let bytes = text.as_bytes();

        let mut push_date = |start: usize, end: usize, m: u32, d: u32, y: u32, raw: &str| {
            if !is_valid_date(m, d, y) {
                return;
            }
            // Path heuristic: /2024/01/15 or report-01-15-2024.pdf.
            if start > 0 && (bytes[start - 1] == b'/' || bytes[start - 1] == b'\\') {
                return;
            }
            if end < bytes.len() && bytes[end] == b'.' {
                return;
            }
            let category = if near_any(&dob_keywords, start, end, patterns::DOB_WINDOW) {
                Category::Dob
            } else {
                Category::Date
            };
            out.push(EntityMatch::new(start, end, category, raw));
        };

        for caps in self.patterns.slash_date.captures_iter(text) {
            let whole = caps.get(0).unwrap();
            let (m, d, y) = (num(&caps, 1), num(&caps, 2), num(&caps, 3));
            push_date(whole.start(), whole.end(), m, d, y, whole.as_str());
        }
        for caps in self.patterns.dash_date.captures_iter(text) {
            let whole = caps.get(0).unwrap();
            let (m, d, y) = (num(&caps, 1), num(&caps, 2), num(&caps, 3));
            push_date(whole.start(), whole.end(), m, d, y, whole.as_str());
        }
        for caps in self.patterns.iso_date.captures_iter(text) {
            let whole = caps.get(0).unwrap();
            let (y, m, d) = (num(&caps, 1), num(&caps, 2), num(&caps, 3));
            push_date(whole.start(), whole.end(), m, d, y, whole.as_str());
        }
    }

    /// Layer 6: bare amounts near financial vocabulary, no `$` required.
    fn detect_context_currency(&self, text: &str, out: &mut Vec<EntityMatch>) {
        let keywords = keyword_spans(&self.patterns.currency_keywords, text);
        if keywords.is_empty() {
            return;
        }

        let mut push_amount = |start: usize, end: usize, raw: &str| {
            let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
            if is_year_shaped(&digits) || digits.len() == 9 {
                // Years and SSN/EIN-shaped digit runs are never amounts.
                return;
            }
            if near_any(&keywords, start, end, patterns::CURRENCY_WINDOW) {
                out.push(EntityMatch::new(start, end, Category::Currency, raw));
            }
        };

        for m in self.patterns.grouped_amount.find_iter(text) {
            push_amount(m.start(), m.end(), m.as_str());
        }
        for m in self.patterns.plain_amount.find_iter(text) {
            push_amount(m.start(), m.end(), m.as_str());
        }
    }

    /// Layer 8: credential-shaped tokens. Known vendor prefixes, bearer
    /// tokens, then the entropy gate. LLM-API identifiers are never secrets.
    fn detect_secrets(&self, text: &str, out: &mut Vec<EntityMatch>) {
        for m in self.patterns.prefixed_secret.find_iter(text) {
            if is_llm_identifier(m.as_str()) {
                continue;
            }
            out.push(EntityMatch::new(
                m.start(),
                m.end(),
                Category::Secret,
                m.as_str(),
            ));
        }

        for caps in self.patterns.bearer_token.captures_iter(text) {
            if let Some(token) = caps.get(1) {
                if is_llm_identifier(token.as_str()) {
                    continue;
                }
                out.push(EntityMatch::new(
                    token.start(),
                    token.end(),
                    Category::Secret,
                    token.as_str(),
                ));
            }
        }

        for m in self.patterns.entropy_candidate.find_iter(text) {
            if is_llm_identifier(m.as_str()) {
                continue;
            }
            if m.as_str().len() >= patterns::SECRET_MIN_LEN
                && shannon_entropy(m.as_str()) >= patterns::SECRET_ENTROPY_THRESHOLD
            {
                out.push(EntityMatch::new(
                    m.start(),
                    m.end(),
                    Category::Secret,
                    m.as_str(),
                ));
            }
        }
    }
}

impl Default for EntityDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn num(caps: &regex::Captures<'_>, index: usize) -> u32 {
    caps.get(index)
        .and_then(|g| g.as_str().parse().ok())
        .unwrap_or(0)
}

fn valid_ip_octets(candidate: &str) -> bool {
    candidate
        .split('.')
        .all(|octet| octet.parse::<u32>().map(|o| o <= 255).unwrap_or(false))
}

fn keyword_spans(regex: &regex::Regex, text: &str) -> Vec<(usize, usize)> {
    regex.find_iter(text).map(|m| (m.start(), m.end())).collect()
}

/// True when any keyword span sits within `window` bytes of the candidate.
fn near_any(keywords: &[(usize, usize)], start: usize, end: usize, window: usize) -> bool {
    keywords.iter().any(|&(ks, ke)| {
        let distance = if ke <= start {
            start - ke
        } else if end <= ks {
            ks - end
        } else {
            0
        };
        distance <= window
    })
}
