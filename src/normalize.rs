use unicode_normalization::char::decompose_canonical;

fn is_combining_diacritic(c: char) -> bool {
    ('\u{0300}'..='\u{036F}').contains(&c)
}

/// Lower-case `c`, decompose it canonically and drop combining diacritics.
/// Final sigma folds to `σ`, since per-character lowercasing cannot see word
/// boundaries.
fn fold_char(c: char, mut emit: impl FnMut(char)) {
    for lower in c.to_lowercase() {
        let lower = if lower == 'ς' { 'σ' } else { lower };
        decompose_canonical(lower, |d| {
            if !is_combining_diacritic(d) {
                emit(d);
            }
        });
    }
}

/// Case-fold and strip accents so that "Café" and "cafe" compare equal.
///
/// Folding is done per character, which keeps the output aligned with
/// [`normalize_with_offsets`].
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        fold_char(c, |d| out.push(d));
    }
    out
}

/// Normalize `chars` and record, for every output character, the index of the
/// input character it came from.
pub fn normalize_with_offsets(chars: &[char]) -> (Vec<char>, Vec<usize>) {
    let mut folded = Vec::with_capacity(chars.len());
    let mut origin = Vec::with_capacity(chars.len());
    for (i, &c) in chars.iter().enumerate() {
        fold_char(c, |d| {
            folded.push(d);
            origin.push(i);
        });
    }
    (folded, origin)
}
