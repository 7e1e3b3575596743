// Compiled regex set and context keyword lists for the entity detector
// All patterns run on the linear-time regex engine; none backtrack.

use regex::Regex;

/// Keywords that put nearby digit groups in a banking context.
pub const BANK_KEYWORDS: &str =
    r"(?i)\b(?:bank account|direct deposit|account|routing|ABA|checking|savings|acct)\b";

/// Keywords that put nearby digit groups in a financial/tax context.
pub const FINANCIAL_KEYWORDS: &str = r"(?i)\b(?:deposit|refund|1040|8888|W-2|1099|payment|transfer|wire|ACH|EFT|tax return|withholding|payroll)\b";

/// Keywords that promote a nearby 4-digit year to a tax year.
pub const TAX_YEAR_KEYWORDS: &str = r"(?i)\b(?:tax year|TY|filing|return|W-2|1040|1099|Schedule|Form|fiscal year|FY)\b";

/// Keywords that promote a nearby date to a date of birth.
pub const DOB_KEYWORDS: &str =
    r"(?i)\b(?:DOB|date of birth|birthdate|birth date|birthday|born)\b";

/// Keywords that make bare numbers read as money.
pub const CURRENCY_KEYWORDS: &str = r"(?i)\b(?:wages|income|salary|payment|refund|balance|amount|total|gross|net|compensation|earned|adjusted|taxable|liability|deduction|withholding|dividend|distribution|contribution|proceeds|revenue|cost|expense|fee|rent|royalty|alimony|stipend|bonus|commission|pension|annuity|benefit)\b";

/// Identifier prefixes minted by LLM APIs; never secrets.
pub const LLM_ID_PREFIXES: &[&str] = &[
    "call_", "toolu_", "chatcmpl-", "msg_", "resp_", "run_", "step_", "asst_", "file-", "org-",
    "snip_", "tool_", "block_", "embd_", "modr_", "ft-", "batch_",
];

/// Byte distance limits for the context windows.
pub const BANK_WINDOW: usize = 120;
pub const FINANCIAL_WINDOW: usize = 200;
pub const TAX_YEAR_WINDOW: usize = 60;
pub const DOB_WINDOW: usize = 60;
pub const CURRENCY_WINDOW: usize = 200;

/// Entropy gate for bare high-entropy tokens.
pub const SECRET_MIN_LEN: usize = 20;
pub const SECRET_ENTROPY_THRESHOLD: f64 = 4.0;

pub struct Patterns {
    // Context keyword scanners
    pub bank_keywords: Regex,
    pub financial_keywords: Regex,
    pub tax_year_keywords: Regex,
    pub dob_keywords: Regex,
    pub currency_keywords: Regex,

    // Digit groups resolved by context
    pub nine_digits: Regex,
    pub account_digits: Regex,
    pub financial_account_digits: Regex,

    // Fixed-pattern entities, in precedence order
    pub url: Regex,
    pub email: Regex,
    pub credit_card: Regex,
    pub bank_card: Regex,
    pub dollar_currency: Regex,
    pub itin: Regex,
    pub ssn: Regex,
    pub ein: Regex,
    pub iban: Regex,
    pub ip: Regex,
    pub phone: Regex,
    pub street_address: Regex,
    pub po_box: Regex,
    pub partial_address: Regex,
    pub zip_anchored_address: Regex,

    // Years, dates, bare amounts
    pub year: Regex,
    pub slash_date: Regex,
    pub dash_date: Regex,
    pub iso_date: Regex,
    pub grouped_amount: Regex,
    pub plain_amount: Regex,

    // Secrets
    pub prefixed_secret: Regex,
    pub bearer_token: Regex,
    pub entropy_candidate: Regex,
}

impl Patterns {
    pub fn new() -> Self {
        Patterns {
            bank_keywords: Regex::new(BANK_KEYWORDS).unwrap(),
            financial_keywords: Regex::new(FINANCIAL_KEYWORDS).unwrap(),
            tax_year_keywords: Regex::new(TAX_YEAR_KEYWORDS).unwrap(),
            dob_keywords: Regex::new(DOB_KEYWORDS).unwrap(),
            currency_keywords: Regex::new(CURRENCY_KEYWORDS).unwrap(),

            nine_digits: Regex::new(r"\b\d{9}\b").unwrap(),
            account_digits: Regex::new(r"\b\d{8,17}\b").unwrap(),
            financial_account_digits: Regex::new(r"\b\d{8,12}\b").unwrap(),

            url: Regex::new(r"https?://[^\s<>\[\]{}|\\^`]+").unwrap(),
            email: Regex::new(r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b").unwrap(),
            // Four groups of four digits with separators.
            credit_card: Regex::new(r"\b\d{4}[-\s]\d{4}[-\s]\d{4}[-\s]\d{4}\b").unwrap(),
            // Unseparated long PANs.
            bank_card: Regex::new(r"\b\d{16,19}\b").unwrap(),
            dollar_currency: Regex::new(r"\$\s?\d[\d,]*(?:\.\d{1,2})?").unwrap(),
            // ITIN: 9xx-xx-xxxx. SSN: every other xxx-xx-xxxx. Space
            // separators count too; the canary treats them as SSN-shaped, so
            // the detector has to catch them first.
            itin: Regex::new(r"\b9\d{2}[-\s]\d{2}[-\s]\d{4}\b").unwrap(),
            ssn: Regex::new(r"\b[0-8]\d{2}[-\s]\d{2}[-\s]\d{4}\b").unwrap(),
            ein: Regex::new(r"\b\d{2}-\d{7}\b").unwrap(),
            iban: Regex::new(r"\b[A-Z]{2}\d{2}[A-Z0-9]{11,30}\b").unwrap(),
            ip: Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap(),
            // Requires separators or parens so plain digit runs stay with the
            // banking layers.
            phone: Regex::new(
                r"(?:\+\d{1,3}[-.\s]?)?(?:\(\d{3}\)[-.\s]?|\b\d{3}[-.\s])\d{3}[-.\s]\d{4}\b",
            )
            .unwrap(),
            street_address: Regex::new(
                r"(?i)\b\d{1,5}\s+(?:[A-Za-z0-9'.-]+\s+){0,3}?(?:street|st|road|rd|avenue|ave|drive|dr|lane|ln|way|court|ct|circle|cir|boulevard|blvd|place|pl|terrace|ter|parkway|pkwy)\b\.?(?:,?\s*(?:apt|suite|ste|unit|#)\s*[A-Za-z0-9-]+)?(?:,\s*[A-Za-z .]+,\s*[A-Z]{2}\s+\d{5}(?:-\d{4})?)?",
            )
            .unwrap(),
            po_box: Regex::new(r"(?i)\bP\.?\s?O\.?\s?Box\s+\d+\b").unwrap(),
            // City, ST 12345 with no street part.
            partial_address: Regex::new(
                r"\b[A-Z][a-z]+(?:\s[A-Z][a-z]+)?,\s*[A-Z]{2}\s+\d{5}(?:-\d{4})?\b",
            )
            .unwrap(),
            // Number + capitalized words + city/state/zip, no street suffix.
            zip_anchored_address: Regex::new(
                r"\b\d{1,5}\s+[A-Z][a-z]+(?:\s+[A-Z][a-z]+){0,2},\s*[A-Z][a-z]+(?:\s[A-Z][a-z]+)?,\s*[A-Z]{2}\s+\d{5}(?:-\d{4})?\b",
            )
            .unwrap(),

            year: Regex::new(r"\b(?:19|20)\d{2}\b").unwrap(),
            slash_date: Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b").unwrap(),
            dash_date: Regex::new(r"\b(\d{1,2})-(\d{1,2})-(\d{4})\b").unwrap(),
            iso_date: Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").unwrap(),
            grouped_amount: Regex::new(r"\b\d{1,3}(?:,\d{3})+(?:\.\d{1,2})?\b").unwrap(),
            plain_amount: Regex::new(r"\b\d{5,}\b").unwrap(),

            prefixed_secret: Regex::new(
                r"\b(?:sk-|sk_|pk_|ghp_|AKIA|xox|SG\.|hf_|api-|token-|secret-)[A-Za-z0-9_\-\.]{8,}",
            )
            .unwrap(),
            bearer_token: Regex::new(r"\bBearer\s+([A-Za-z0-9._~+/=\-]{8,})").unwrap(),
            entropy_candidate: Regex::new(r"\b[A-Za-z0-9_-]{20,}\b").unwrap(),
        }
    }
}

impl Default for Patterns {
    fn default() -> Self {
        Self::new()
    }
}

/// True when the token starts with an identifier prefix minted by an LLM API.
pub fn is_llm_identifier(token: &str) -> bool {
    LLM_ID_PREFIXES.iter().any(|p| token.starts_with(p))
}
