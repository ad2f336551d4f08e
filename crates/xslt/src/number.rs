//! Format-token handling for `xsl:number`.

use crate::decimal_format::group_digits;

/// Zero digits of the decimal digit families recognised in format tokens.
const DIGIT_ZEROS: &[char] = &[
    '0', '\u{0660}', '\u{06F0}', '\u{0966}', '\u{09E6}', '\u{0A66}', '\u{0AE6}', '\u{0B66}', '\u{0E50}',
    '\u{0ED0}', '\u{FF10}',
];

fn digit_zero(c: char) -> Option<char> {
    DIGIT_ZEROS
        .iter()
        .copied()
        .find(|&zero| (zero..=char::from_u32(zero as u32 + 9).unwrap_or(zero)).contains(&c))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Decimal { zero: char, width: usize },
    Alpha { first: char, count: u32, skip: Option<char> },
    Roman { upper: bool },
}

fn parse_token(token: &str) -> Token {
    let mut chars = token.chars();
    let first = chars.next().unwrap_or('1');
    let single = chars.next().is_none();

    if let Some(zero) = digit_zero(first) {
        let one = char::from_u32(zero as u32 + 1).unwrap_or('1');
        let all_digits = token.chars().all(|c| digit_zero(c) == Some(zero));
        let leading_zeros = token.chars().rev().skip(1).all(|c| c == zero);
        if all_digits && leading_zeros && token.ends_with(one) {
            return Token::Decimal {
                zero,
                width: token.chars().count(),
            };
        }
    }
    match (first, single) {
        ('a', true) => Token::Alpha { first: 'a', count: 26, skip: None },
        ('A', true) => Token::Alpha { first: 'A', count: 26, skip: None },
        ('i', true) => Token::Roman { upper: false },
        ('I', true) => Token::Roman { upper: true },
        ('\u{03B1}', true) => Token::Alpha { first: '\u{03B1}', count: 25, skip: Some('\u{03C2}') },
        ('\u{0391}', true) => Token::Alpha { first: '\u{0391}', count: 25, skip: Some('\u{03A2}') },
        _ => Token::Decimal { zero: '0', width: 1 },
    }
}

fn to_alpha(mut n: u64, first: char, count: u32, skip: Option<char>) -> String {
    let letters: Vec<char> = (0..count)
        .filter_map(|i| char::from_u32(first as u32 + i))
        .filter(|c| Some(*c) != skip)
        .collect();
    let base = letters.len() as u64;
    let mut out = Vec::new();
    while n > 0 {
        n -= 1;
        out.push(letters[(n % base) as usize]);
        n /= base;
    }
    out.iter().rev().collect()
}

fn to_roman(n: u64, upper: bool) -> Option<String> {
    if n == 0 || n > 3999 {
        return None;
    }
    const TABLE: &[(u64, &str)] = &[
        (1000, "m"),
        (900, "cm"),
        (500, "d"),
        (400, "cd"),
        (100, "c"),
        (90, "xc"),
        (50, "l"),
        (40, "xl"),
        (10, "x"),
        (9, "ix"),
        (5, "v"),
        (4, "iv"),
        (1, "i"),
    ];
    let mut rest = n;
    let mut out = String::new();
    for &(value, numeral) in TABLE {
        while rest >= value {
            out.push_str(numeral);
            rest -= value;
        }
    }
    Some(if upper { out.to_uppercase() } else { out })
}

fn to_decimal(n: u64, zero: char, width: usize, grouping: Option<(&str, usize)>) -> String {
    let mut digits = n.to_string();
    while digits.len() < width {
        digits.insert(0, '0');
    }
    if zero != '0' {
        digits = digits
            .chars()
            .map(|c| {
                c.to_digit(10)
                    .and_then(|d| char::from_u32(zero as u32 + d))
                    .unwrap_or(c)
            })
            .collect();
    }
    match grouping {
        Some((separator, size)) => group_digits(&digits, separator, size),
        None => digits,
    }
}

fn format_one(n: u64, token: &Token, grouping: Option<(&str, usize)>) -> String {
    match token {
        Token::Decimal { zero, width } => to_decimal(n, *zero, *width, grouping),
        Token::Alpha { first, count, skip } if n > 0 => to_alpha(n, *first, *count, *skip),
        Token::Roman { upper } => to_roman(n, *upper).unwrap_or_else(|| n.to_string()),
        Token::Alpha { .. } => n.to_string(),
    }
}

/// Splits a format string into its alphanumeric tokens and the separators
/// around them: `(prefix, tokens, separators, suffix)`.
fn tokenize(format: &str) -> (String, Vec<String>, Vec<String>, String) {
    let mut prefix = String::new();
    let mut tokens = Vec::new();
    let mut separators = Vec::new();
    let mut current = String::new();
    let mut in_token = false;

    for c in format.chars() {
        let alnum = c.is_alphanumeric();
        if alnum != in_token && !current.is_empty() {
            let part = std::mem::take(&mut current);
            if in_token {
                tokens.push(part);
            } else if tokens.is_empty() {
                prefix = part;
            } else {
                separators.push(part);
            }
        }
        in_token = alnum;
        current.push(c);
    }
    let mut suffix = String::new();
    if !current.is_empty() {
        if in_token {
            tokens.push(current);
        } else if tokens.is_empty() {
            prefix = current;
        } else {
            suffix = current;
        }
    }
    (prefix, tokens, separators, suffix)
}

/// Formats the list of numbers produced by `xsl:number`.
pub fn format_numbers(numbers: &[u64], format: &str, grouping: Option<(&str, usize)>) -> String {
    let (prefix, tokens, separators, suffix) = tokenize(format);
    let tokens: Vec<Token> = if tokens.is_empty() {
        vec![Token::Decimal { zero: '0', width: 1 }]
    } else {
        tokens.iter().map(|t| parse_token(t)).collect()
    };

    let mut out = prefix;
    for (i, &n) in numbers.iter().enumerate() {
        if i > 0 {
            let separator = separators
                .get(i - 1)
                .or(separators.last())
                .map(String::as_str)
                .unwrap_or(".");
            out.push_str(separator);
        }
        let token = tokens.get(i).or(tokens.last()).unwrap_or(&tokens[0]);
        out.push_str(&format_one(n, token, grouping));
    }
    out.push_str(&suffix);
    out
}
