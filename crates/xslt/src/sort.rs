use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataType {
    #[default]
    Text,
    Number,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaseOrder {
    #[default]
    UpperFirst,
    LowerFirst,
}

/// One evaluated `xsl:sort`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortKey {
    pub data_type: DataType,
    pub descending: bool,
    pub case_order: CaseOrder,
    pub lang: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SortValue {
    Text(String),
    Number(f64),
}

fn compare_case(a: &str, b: &str, order: CaseOrder) -> Ordering {
    for (x, y) in a.chars().zip(b.chars()) {
        if x == y {
            continue;
        }
        let upper_first = match (x.is_uppercase(), y.is_uppercase()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => x.cmp(&y),
        };
        return match order {
            CaseOrder::UpperFirst => upper_first,
            CaseOrder::LowerFirst => upper_first.reverse(),
        };
    }
    a.len().cmp(&b.len())
}

fn compare_text(a: &str, b: &str, order: CaseOrder) -> Ordering {
    let folded = a.to_lowercase().cmp(&b.to_lowercase());
    folded.then_with(|| compare_case(a, b, order))
}

/// NaN sorts before every number.
fn compare_numbers(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

pub fn compare(a: &SortValue, b: &SortValue, key: &SortKey) -> Ordering {
    let ordering = match (a, b) {
        (SortValue::Number(x), SortValue::Number(y)) => compare_numbers(*x, *y),
        (SortValue::Text(x), SortValue::Text(y)) => compare_text(x, y, key.case_order),
        (SortValue::Number(_), SortValue::Text(_)) => Ordering::Less,
        (SortValue::Text(_), SortValue::Number(_)) => Ordering::Greater,
    };
    if key.descending {
        ordering.reverse()
    } else {
        ordering
    }
}

/// Stable multi-key sort. `values[i]` holds the key values of `items[i]`.
pub fn sort_by_keys<T>(items: Vec<T>, values: Vec<Vec<SortValue>>, keys: &[SortKey]) -> Vec<T> {
    let mut rows: Vec<(T, Vec<SortValue>)> = items.into_iter().zip(values).collect();
    rows.sort_by(|(_, a), (_, b)| {
        keys.iter()
            .zip(a.iter().zip(b.iter()))
            .map(|(key, (x, y))| compare(x, y, key))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
    rows.into_iter().map(|(item, _)| item).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbers(values: &[f64]) -> Vec<Vec<SortValue>> {
        values.iter().map(|v| vec![SortValue::Number(*v)]).collect()
    }

    #[test]
    fn numeric_sort_is_stable_with_nan_first() {
        let key = SortKey {
            data_type: DataType::Number,
            ..Default::default()
        };
        let items = vec!["3", "1", "nan", "2", "1b"];
        let sorted = sort_by_keys(
            items,
            numbers(&[3.0, 1.0, f64::NAN, 2.0, 1.0]),
            std::slice::from_ref(&key),
        );
        assert_eq!(sorted, vec!["nan", "1", "1b", "2", "3"]);
    }

    #[test]
    fn text_sort_folds_case_then_orders_upper_first() {
        let key = SortKey::default();
        let words = ["b", "a", "B", "A"];
        let values = words.iter().map(|w| vec![SortValue::Text(w.to_string())]).collect();
        let sorted = sort_by_keys(words.to_vec(), values, std::slice::from_ref(&key));
        assert_eq!(sorted, vec!["A", "a", "B", "b"]);

        let lower = SortKey {
            case_order: CaseOrder::LowerFirst,
            ..Default::default()
        };
        let values = words.iter().map(|w| vec![SortValue::Text(w.to_string())]).collect();
        let sorted = sort_by_keys(words.to_vec(), values, std::slice::from_ref(&lower));
        assert_eq!(sorted, vec!["a", "A", "b", "B"]);
    }

    #[test]
    fn secondary_key_breaks_ties() {
        let keys = vec![
            SortKey::default(),
            SortKey {
                data_type: DataType::Number,
                descending: true,
                ..Default::default()
            },
        ];
        let values = vec![
            vec![SortValue::Text("x".into()), SortValue::Number(1.0)],
            vec![SortValue::Text("x".into()), SortValue::Number(2.0)],
            vec![SortValue::Text("a".into()), SortValue::Number(0.0)],
        ];
        let sorted = sort_by_keys(vec![1, 2, 3], values, &keys);
        assert_eq!(sorted, vec![3, 2, 1]);
    }
}
