// src/bot/normalizer.rs - Canonical text form used by every moderation rule
//
// Raw chat text is lowercased, stripped of accents, folded to ASCII, de-leeted and
// reduced to `[a-z0-9@ ]` with single spaces. Every later stage assumes this form.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Letters that survive decomposition, plus common Cyrillic/Greek lookalikes
static FOLD_TABLE: Lazy<HashMap<char, &'static str>> = Lazy::new(|| {
    [
        ('ß', "ss"), ('þ', "th"), ('ð', "d"), ('đ', "d"), ('ħ', "h"),
        ('ł', "l"), ('ø', "o"), ('œ', "oe"), ('æ', "ae"), ('å', "a"),
        ('ś', "s"), ('ş', "s"), ('š', "s"), ('č', "c"), ('ć', "c"),
        ('ç', "c"), ('ñ', "n"), ('ğ', "g"), ('ý', "y"), ('ı', "i"),
        // Cyrillic lookalikes
        ('а', "a"), ('е', "e"), ('о', "o"), ('р', "p"), ('с', "c"),
        ('х', "x"), ('у', "y"), ('і', "i"), ('к', "k"), ('м', "m"),
        ('т', "t"), ('в', "b"), ('н', "h"),
        // Greek lookalikes
        ('α', "a"), ('ο', "o"), ('ρ', "p"), ('υ', "u"), ('ι', "i"),
        ('κ', "k"), ('ν', "v"), ('τ', "t"), ('ε', "e"),
    ]
    .into_iter()
    .collect()
});

static LEET_TABLE: Lazy<HashMap<char, char>> = Lazy::new(|| {
    [
        ('0', 'o'), ('1', 'i'), ('!', 'i'), ('3', 'e'), ('4', 'a'), ('@', 'a'),
        ('$', 's'), ('5', 's'), ('7', 't'), ('8', 'b'), ('+', 't'), ('|', 'l'),
    ]
    .into_iter()
    .collect()
});

/// Normalize raw message text. Total and idempotent: `normalize(normalize(s)) == normalize(s)`.
pub fn normalize(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let stripped = strip_accents(&lowered);
    let folded = fold_letters(&stripped);
    let deleeted = substitute_leetspeak(&folded);
    collapse_whitespace(&filter_charset(&deleeted))
}

/// Compatibility-decompose and drop combining marks ("café" -> "cafe")
fn strip_accents(text: &str) -> String {
    text.nfkd().filter(|c| !is_combining_mark(*c)).collect()
}

fn fold_letters(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    for c in text.chars() {
        match FOLD_TABLE.get(&c) {
            Some(replacement) => result.push_str(replacement),
            None => result.push(c),
        }
    }
    result
}

fn substitute_leetspeak(text: &str) -> String {
    text.chars()
        .map(|c| LEET_TABLE.get(&c).copied().unwrap_or(c))
        .collect()
}

/// Keep `[a-z0-9@]` and whitespace; everything else becomes a space
fn filter_charset(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '@' {
                c
            } else {
                ' '
            }
        })
        .collect()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
