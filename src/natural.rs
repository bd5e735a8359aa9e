use std::cmp::Ordering;

use crate::normalize::normalize_text;

#[derive(Debug, PartialEq, Eq)]
enum Chunk<'a> {
    Digits(&'a str),
    Text(&'a str),
}

/// Split into alternating runs of ASCII digits and everything else.
fn chunks(s: &str) -> Vec<Chunk<'_>> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut in_digits = None;

    for (i, c) in s.char_indices() {
        let digit = c.is_ascii_digit();
        match in_digits {
            Some(prev) if prev != digit => {
                out.push(make_chunk(&s[start..i], prev));
                start = i;
            }
            _ => {}
        }
        in_digits = Some(digit);
    }
    if let Some(prev) = in_digits {
        out.push(make_chunk(&s[start..], prev));
    }
    out
}

fn make_chunk(s: &str, digits: bool) -> Chunk<'_> {
    if digits {
        Chunk::Digits(s)
    } else {
        Chunk::Text(s)
    }
}

/// Numeric comparison of digit runs of any length.
fn cmp_digits(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Accent- and case-insensitive first, then by code point so distinct strings
/// never tie.
fn cmp_text(a: &str, b: &str) -> Ordering {
    normalize_text(a)
        .cmp(&normalize_text(b))
        .then_with(|| a.cmp(b))
}

/// Compare two strings so that embedded numbers sort by value:
/// `item-2` comes before `item-10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let left = chunks(a);
    let right = chunks(b);

    for (l, r) in left.iter().zip(right.iter()) {
        let ord = match (l, r) {
            (Chunk::Digits(x), Chunk::Digits(y)) => cmp_digits(x, y),
            (Chunk::Digits(x), Chunk::Text(y))
            | (Chunk::Text(x), Chunk::Digits(y))
            | (Chunk::Text(x), Chunk::Text(y)) => cmp_text(x, y),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }

    left.len().cmp(&right.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sorted(items: &[&str]) -> Vec<String> {
        let mut v: Vec<String> = items.iter().map(|s| s.to_string()).collect();
        v.sort_by(|a, b| natural_cmp(a, b));
        v
    }

    #[test]
    fn test_chunks() {
        assert_eq!(
            chunks("item-10b"),
            vec![Chunk::Text("item-"), Chunk::Digits("10"), Chunk::Text("b")]
        );
        assert!(chunks("").is_empty());
    }

    #[test]
    fn test_numeric_runs_sort_by_value() {
        assert_eq!(
            sorted(&["item-2", "item-10", "item-1"]),
            vec!["item-1", "item-2", "item-10"]
        );
        assert_eq!(sorted(&["a2", "a10", "a1"]), vec!["a1", "a2", "a10"]);
    }

    #[test]
    fn test_leading_zeros_compare_equal() {
        assert_eq!(natural_cmp("a01", "a1"), Ordering::Equal);
        assert_eq!(natural_cmp("007", "7"), Ordering::Equal);
    }

    #[test]
    fn test_shorter_sequence_first() {
        assert_eq!(natural_cmp("note", "note 2"), Ordering::Less);
        assert_eq!(natural_cmp("note 2", "note"), Ordering::Greater);
        assert_eq!(natural_cmp("same", "same"), Ordering::Equal);
    }

    #[test]
    fn test_huge_numbers_do_not_overflow() {
        assert_eq!(
            natural_cmp("v99999999999999999999999", "v100000000000000000000000"),
            Ordering::Less
        );
    }

    #[test]
    fn test_antisymmetric_and_transitive() {
        let corpus = [
            "item-2", "item-10", "item-1", "a2", "a10", "a1", "B3", "b", "Ábc", "abc", "10", "9x",
        ];
        for a in corpus {
            for b in corpus {
                assert_eq!(natural_cmp(a, b), natural_cmp(b, a).reverse(), "{} vs {}", a, b);
                for c in corpus {
                    if natural_cmp(a, b) != Ordering::Greater
                        && natural_cmp(b, c) != Ordering::Greater
                    {
                        assert_ne!(natural_cmp(a, c), Ordering::Greater, "{} {} {}", a, b, c);
                    }
                }
            }
        }
    }
}
