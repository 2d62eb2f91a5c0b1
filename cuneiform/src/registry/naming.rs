use convert_case::{Case, Casing};
use regex::Regex;
use std::sync::OnceLock;

/// Storage name of a model's table.
pub fn table_name(model: &str) -> String {
    model.to_case(Case::Snake)
}

/// Foreign-key column synthesized for a reference field.
pub fn foreign_key_column(field: &str) -> String {
    format!("{field}_id")
}

/// Name of the accessor installed on a referenced model, listing the rows
/// of `model` that point at it.
pub fn reverse_accessor(model: &str) -> String {
    pluralize(&table_name(model))
}

/// English plural of a snake_case word, good enough for model names.
pub fn pluralize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix('y') {
        let after_vowel = stem
            .chars()
            .last()
            .map(|c| "aeiou".contains(c))
            .unwrap_or(false);
        if !after_vowel {
            return format!("{stem}ies");
        }
    }
    if ["s", "x", "z", "ch", "sh"].iter().any(|s| word.ends_with(s)) {
        return format!("{word}es");
    }
    format!("{word}s")
}

/// Whether a model, enum, field or symbol name is usable as an identifier.
pub fn is_identifier(name: &str) -> bool {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    IDENT
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"))
        .is_match(name)
}
