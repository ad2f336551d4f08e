//! `xsl:decimal-format` declarations and the `format-number()` picture
//! formatter.

#[derive(Debug, Clone, PartialEq)]
pub struct DecimalFormat {
    pub decimal_separator: char,
    pub grouping_separator: char,
    pub infinity: String,
    pub minus_sign: char,
    pub nan: String,
    pub percent: char,
    pub per_mille: char,
    pub zero_digit: char,
    pub digit: char,
    pub pattern_separator: char,
}

impl Default for DecimalFormat {
    fn default() -> Self {
        DecimalFormat {
            decimal_separator: '.',
            grouping_separator: ',',
            infinity: "Infinity".to_string(),
            minus_sign: '-',
            nan: "NaN".to_string(),
            percent: '%',
            per_mille: '\u{2030}',
            zero_digit: '0',
            digit: '#',
            pattern_separator: ';',
        }
    }
}

impl DecimalFormat {
    /// Applies one attribute of an `xsl:decimal-format` declaration. Returns
    /// false for unknown attributes or values that are not a single character
    /// where one is required.
    pub fn set(&mut self, attribute: &str, value: &str) -> bool {
        let mut chars = value.chars();
        let single = match (chars.next(), chars.next()) {
            (Some(c), None) => Some(c),
            _ => None,
        };
        let slot = match attribute {
            "infinity" => {
                self.infinity = value.to_string();
                return true;
            }
            "NaN" => {
                self.nan = value.to_string();
                return true;
            }
            "decimal-separator" => &mut self.decimal_separator,
            "grouping-separator" => &mut self.grouping_separator,
            "minus-sign" => &mut self.minus_sign,
            "percent" => &mut self.percent,
            "per-mille" => &mut self.per_mille,
            "zero-digit" => &mut self.zero_digit,
            "digit" => &mut self.digit,
            "pattern-separator" => &mut self.pattern_separator,
            _ => return false,
        };
        match single {
            Some(c) => {
                *slot = c;
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Default)]
struct Picture {
    prefix: String,
    suffix: String,
    integer_min_digits: usize,
    fraction_min_digits: usize,
    fraction_max_digits: usize,
    grouping_size: usize,
    multiplier: f64,
}

fn parse_picture(pattern: &str, format: &DecimalFormat) -> Result<Picture, String> {
    let mut pic = Picture {
        multiplier: 1.0,
        ..Default::default()
    };
    let mut in_fraction = false;
    let mut seen_digit = false;
    let mut in_suffix = false;
    let mut group = None;

    for ch in pattern.chars() {
        let is_body = ch == format.digit
            || ch == format.zero_digit
            || ch == format.decimal_separator
            || ch == format.grouping_separator;
        if is_body && !in_suffix {
            if ch == format.decimal_separator {
                if in_fraction {
                    return Err(format!("Picture '{}' has two decimal separators", pattern));
                }
                in_fraction = true;
            } else if ch == format.grouping_separator {
                if !in_fraction {
                    group = Some(0);
                }
            } else {
                seen_digit = true;
                if in_fraction {
                    pic.fraction_max_digits += 1;
                    if ch == format.zero_digit {
                        pic.fraction_min_digits += 1;
                    }
                } else {
                    if ch == format.zero_digit {
                        pic.integer_min_digits += 1;
                    }
                    if let Some(size) = group.as_mut() {
                        *size += 1;
                    }
                }
            }
            continue;
        }

        if ch == format.percent {
            pic.multiplier = 100.0;
        } else if ch == format.per_mille {
            pic.multiplier = 1000.0;
        }
        if seen_digit || in_fraction {
            in_suffix = true;
            pic.suffix.push(ch);
        } else {
            pic.prefix.push(ch);
        }
    }

    if !seen_digit && !in_fraction {
        return Err(format!("Picture '{}' has no digit placeholder", pattern));
    }
    pic.grouping_size = group.unwrap_or(0);
    Ok(pic)
}

fn localize_digits(digits: &str, zero: char) -> String {
    if zero == '0' {
        return digits.to_string();
    }
    digits
        .chars()
        .map(|c| match c.to_digit(10) {
            Some(d) => char::from_u32(zero as u32 + d).unwrap_or(c),
            None => c,
        })
        .collect()
}

pub(crate) fn group_digits(digits: &str, separator: &str, size: usize) -> String {
    if size == 0 {
        return digits.to_string();
    }
    let chars: Vec<char> = digits.chars().collect();
    let mut result = String::new();
    for (i, ch) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i).is_multiple_of(size) {
            result.push_str(separator);
        }
        result.push(*ch);
    }
    result
}

/// Formats `value` with a JDK-style decimal picture such as `#,##0.00`.
pub fn format_number(value: f64, picture: &str, format: &DecimalFormat) -> Result<String, String> {
    let mut patterns = picture.split(format.pattern_separator);
    let positive = patterns.next().unwrap_or_default();
    let negative = patterns.next();
    if patterns.next().is_some() {
        return Err(format!("Picture '{}' has more than two sub-pictures", picture));
    }

    let pic = parse_picture(positive, format)?;
    if value.is_nan() {
        return Ok(format.nan.clone());
    }

    let (prefix, suffix) = match (value.is_sign_negative() && value != 0.0, negative) {
        (true, Some(neg)) => {
            let neg_pic = parse_picture(neg, format)?;
            (neg_pic.prefix, neg_pic.suffix)
        }
        (true, None) => (format!("{}{}", format.minus_sign, pic.prefix), pic.suffix.clone()),
        (false, _) => (pic.prefix.clone(), pic.suffix.clone()),
    };

    if value.is_infinite() {
        return Ok(format!("{}{}{}", prefix, format.infinity, suffix));
    }

    let scaled = value.abs() * pic.multiplier;
    let rounded = format!("{:.*}", pic.fraction_max_digits, scaled);
    let (int_digits, frac_digits) = match rounded.split_once('.') {
        Some((i, f)) => (i.to_string(), f.to_string()),
        None => (rounded, String::new()),
    };

    let mut int_digits = int_digits.trim_start_matches('0').to_string();
    while int_digits.len() < pic.integer_min_digits {
        int_digits.insert(0, '0');
    }
    let mut frac_digits = frac_digits;
    while frac_digits.len() > pic.fraction_min_digits && frac_digits.ends_with('0') {
        frac_digits.pop();
    }
    if int_digits.is_empty() && frac_digits.is_empty() {
        int_digits.push('0');
    }

    let mut body = group_digits(
        &localize_digits(&int_digits, format.zero_digit),
        &format.grouping_separator.to_string(),
        pic.grouping_size,
    );
    if !frac_digits.is_empty() {
        body.push(format.decimal_separator);
        body.push_str(&localize_digits(&frac_digits, format.zero_digit));
    }

    Ok(format!("{}{}{}", prefix, body, suffix))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(value: f64, picture: &str) -> String {
        format_number(value, picture, &DecimalFormat::default()).unwrap()
    }

    #[test]
    fn formats_grouping_and_fraction() {
        assert_eq!(fmt(1234567.891, "#,##0.00"), "1,234,567.89");
        assert_eq!(fmt(0.5, "#.00"), ".50");
        assert_eq!(fmt(3.0, "000"), "003");
        assert_eq!(fmt(2.5, "#.##"), "2.5");
        assert_eq!(fmt(0.0, "#"), "0");
    }

    #[test]
    fn negative_and_special_values() {
        assert_eq!(fmt(-12.0, "#"), "-12");
        assert_eq!(fmt(-12.0, "#;(#)"), "(12)");
        assert_eq!(fmt(f64::NAN, "#"), "NaN");
        assert_eq!(fmt(f64::INFINITY, "#"), "Infinity");
        assert_eq!(fmt(0.25, "#%"), "25%");
    }

    #[test]
    fn custom_separators() {
        let mut format = DecimalFormat::default();
        assert!(format.set("decimal-separator", ","));
        assert!(format.set("grouping-separator", "."));
        assert!(!format.set("digit", "##"));
        assert_eq!(format_number(1234.5, "#.##0,00", &format).unwrap(), "1.234,50");
    }

    #[test]
    fn rejects_bad_pictures() {
        assert!(format_number(1.0, "#.#.#", &DecimalFormat::default()).is_err());
        assert!(format_number(1.0, "abc", &DecimalFormat::default()).is_err());
    }
}
