// Checksum and shape validators used to suppress detector false positives

/// ABA routing-number prefix ranges: 00-12 (Federal Reserve), 21-32 (thrift),
/// 61-72 (electronic), 80 (traveler's cheque).
pub fn aba_prefix_valid(digits: &str) -> bool {
    let Some(prefix) = digits.get(0..2).and_then(|p| p.parse::<u32>().ok()) else {
        return false;
    };
    matches!(prefix, 0..=12 | 21..=32 | 61..=72 | 80)
}

/// ABA checksum: 3(d1+d4+d7) + 7(d2+d5+d8) + (d3+d6+d9) must be 0 mod 10.
pub fn aba_checksum_valid(digits: &str) -> bool {
    if digits.len() != 9 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let d: Vec<u32> = digits.bytes().map(|b| (b - b'0') as u32).collect();
    let sum = 3 * (d[0] + d[3] + d[6]) + 7 * (d[1] + d[4] + d[7]) + (d[2] + d[5] + d[8]);
    sum % 10 == 0
}

/// Full routing-number validity: nine digits, plausible prefix, checksum.
pub fn is_routing_number(digits: &str) -> bool {
    digits.len() == 9 && aba_prefix_valid(digits) && aba_checksum_valid(digits)
}

/// A four-digit group that reads as a year (1900-2099).
pub fn is_year_shaped(digits: &str) -> bool {
    digits.len() == 4
        && digits
            .parse::<u32>()
            .map(|y| (1900..=2099).contains(&y))
            .unwrap_or(false)
}

/// Calendar plausibility for detected dates.
pub fn is_valid_date(month: u32, day: u32, year: u32) -> bool {
    (1..=12).contains(&month) && (1..=31).contains(&day) && (1900..=2100).contains(&year)
}

/// Shannon entropy in bits per character.
pub fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }
    let mut counts = std::collections::HashMap::new();
    let mut total = 0usize;
    for c in s.chars() {
        *counts.entry(c).or_insert(0usize) += 1;
        total += 1;
    }
    let total = total as f64;
    counts
        .values()
        .map(|&count| {
            let p = count as f64 / total;
            -p * p.log2()
        })
        .sum()
}
