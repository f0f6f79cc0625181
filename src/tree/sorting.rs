//! Ordering and name normalization for folder listings

use std::cmp::Ordering;

use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// How a folder's entries are ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortMethod {
    /// Alphabetical, accent and case insensitive
    LocaleAlpha,
    NewestFirst,
    OldestFirst,
    /// Plain ASCII case-insensitive comparison
    AsciiCaseInsensitive,
    /// Alphabetical with digit runs compared by value
    Natural,
    /// Files shuffled on every listing, folders stay natural
    Random,
}

impl SortMethod {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => SortMethod::LocaleAlpha,
            1 => SortMethod::NewestFirst,
            2 => SortMethod::OldestFirst,
            3 => SortMethod::AsciiCaseInsensitive,
            5 => SortMethod::Random,
            _ => SortMethod::Natural,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            SortMethod::LocaleAlpha => 0,
            SortMethod::NewestFirst => 1,
            SortMethod::OldestFirst => 2,
            SortMethod::AsciiCaseInsensitive => 3,
            SortMethod::Natural => 4,
            SortMethod::Random => 5,
        }
    }
}

static IMDB_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)_imdb[^_]*_").unwrap());

/// Name shown for a file, with `_imdbtt0000000_` markers removed
pub fn display_name(file_name: &str) -> String {
    let cleaned = IMDB_MARKER.replace_all(file_name, "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        file_name.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Lowercase, accent-free key used for ordering and letter buckets
pub fn sort_key(name: &str, ignore_articles: bool) -> String {
    let key: String = name
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();

    if ignore_articles {
        for article in ["the ", "a "] {
            if let Some(rest) = key.strip_prefix(article) {
                if !rest.trim().is_empty() {
                    return rest.trim_start().to_string();
                }
            }
        }
    }
    key
}

/// ATZ bucket of a name: `A`..=`Z`, or `#` for anything else
pub fn bucket_letter(name: &str, ignore_articles: bool) -> char {
    match sort_key(name, ignore_articles)
        .chars()
        .next()
        .map(|c| c.to_ascii_uppercase())
    {
        Some(c) if c.is_ascii_uppercase() => c,
        _ => '#',
    }
}

/// Compare with digit runs ordered by numeric value, case-insensitively
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a_chars = a.chars().peekable();
    let mut b_chars = b.chars().peekable();

    loop {
        match (a_chars.peek().copied(), b_chars.peek().copied()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let x_run = take_digits(&mut a_chars);
                let y_run = take_digits(&mut b_chars);
                let x_trim = x_run.trim_start_matches('0');
                let y_trim = y_run.trim_start_matches('0');
                let ord = x_trim
                    .len()
                    .cmp(&y_trim.len())
                    .then_with(|| x_trim.cmp(y_trim))
                    .then_with(|| x_run.len().cmp(&y_run.len()));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(x), Some(y)) => {
                let ord = x.to_lowercase().cmp(y.to_lowercase());
                if ord != Ordering::Equal {
                    return ord;
                }
                a_chars.next();
                b_chars.next();
            }
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(c) = chars.peek().copied() {
        if !c.is_ascii_digit() {
            break;
        }
        run.push(c);
        chars.next();
    }
    run
}

/// Sort items in place
///
/// Random ordering shuffles; callers that keep folders in natural order
/// sort those with [`SortMethod::Natural`] instead.
pub fn sort_items<T>(
    items: &mut [T],
    method: SortMethod,
    ignore_articles: bool,
    name: impl Fn(&T) -> &str,
    modified: impl Fn(&T) -> i64,
) {
    match method {
        SortMethod::LocaleAlpha => items.sort_by_cached_key(|item| {
            (sort_key(name(item), ignore_articles), name(item).to_string())
        }),
        SortMethod::NewestFirst => items.sort_by(|a, b| {
            modified(b)
                .cmp(&modified(a))
                .then_with(|| natural_cmp(name(a), name(b)))
        }),
        SortMethod::OldestFirst => items.sort_by(|a, b| {
            modified(a)
                .cmp(&modified(b))
                .then_with(|| natural_cmp(name(a), name(b)))
        }),
        SortMethod::AsciiCaseInsensitive => {
            items.sort_by_cached_key(|item| name(item).to_ascii_lowercase())
        }
        SortMethod::Natural => items.sort_by(|a, b| {
            natural_cmp(
                &sort_key(name(a), ignore_articles),
                &sort_key(name(b), ignore_articles),
            )
        }),
        SortMethod::Random => items.shuffle(&mut rand::rng()),
    }
}
