//! Answer normalization shared by the judges.
//!
//! Comparisons fold case, width, diacritics and katakana so that `ＦＯＯ`,
//! `foo` and `Foo` compare equal, as do `Café` and `cafe`, and `ﾌｼﾞｻﾝ`,
//! `フジサン` and `ふじさん`.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

const FULLWIDTH_START: u32 = 0xFF01;
const FULLWIDTH_END: u32 = 0xFF5E;
const FULLWIDTH_OFFSET: u32 = 0xFEE0;
const KATAKANA_OFFSET: u32 = 0x60;
const VOICED_MARK: char = '\u{3099}';
const SEMI_VOICED_MARK: char = '\u{309A}';

/// Compatibility form with accents removed: `Pokémon` becomes `Pokemon`, halfwidth
/// katakana becomes fullwidth. Kana voicing marks are kept since they change the reading.
pub fn strip_diacritics(input: &str) -> String {
    input
        .nfkd()
        .filter(|ch| !is_combining_mark(*ch) || matches!(*ch, VOICED_MARK | SEMI_VOICED_MARK))
        .nfkc()
        .collect()
}

/// Fullwidth ASCII variants to ASCII, ideographic space to a plain space.
pub fn fold_width(input: &str) -> String {
    input
        .chars()
        .map(|ch| {
            let code = ch as u32;
            if (FULLWIDTH_START..=FULLWIDTH_END).contains(&code) {
                char::from_u32(code - FULLWIDTH_OFFSET).unwrap_or(ch)
            } else if ch == '\u{3000}' {
                ' '
            } else {
                ch
            }
        })
        .collect()
}

/// Katakana to hiragana. Characters without a hiragana counterpart (ヷ, ー) are kept.
pub fn hiraganize(input: &str) -> String {
    input
        .chars()
        .map(|ch| {
            let code = ch as u32;
            let convertible =
                (0x30A1..=0x30F6).contains(&code) || (0x30FD..=0x30FE).contains(&code);
            if convertible {
                char::from_u32(code - KATAKANA_OFFSET).unwrap_or(ch)
            } else {
                ch
            }
        })
        .collect()
}

pub fn is_hiragana(ch: char) -> bool {
    ('\u{3041}'..='\u{309F}').contains(&ch)
}

pub fn is_katakana(ch: char) -> bool {
    ('\u{30A0}'..='\u{30FF}').contains(&ch)
}

pub fn is_kana(ch: char) -> bool {
    is_hiragana(ch) || is_katakana(ch)
}

/// Keeps only characters that are letters or digits in any script.
pub fn letters_only(input: &str) -> String {
    input.chars().filter(|ch| ch.is_alphanumeric()).collect()
}

/// Canonical form for case, width, accent and kana insensitive equality.
pub fn normalize_answer(input: &str) -> String {
    hiraganize(&fold_width(&strip_diacritics(input.trim())).to_lowercase())
}

/// Stricter form that also drops punctuation and whitespace.
pub fn normalize_loose(input: &str) -> String {
    letters_only(&normalize_answer(input))
}

pub fn answers_match(candidate: &str, expected: &str) -> bool {
    normalize_answer(candidate) == normalize_answer(expected)
}
