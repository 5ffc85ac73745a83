//! Name normalization for constraint matching.
//!
//! Patients refer to doctors in whatever grammatical case the sentence
//! demands ("к Марку", "у Дана"); the excluded set stores whatever form
//! the patient used when banning. Matching therefore generates
//! nominative candidates for both sides and also accepts a bounded
//! Levenshtein distance for typos.

/// Genitive → nominative suffix rewrites, checked on the lowercased name.
/// Ordering matters: longer suffixes first so "Марии" hits `ии→ия`
/// before `и` rules.
const GENITIVE_ENDINGS: &[(&str, &str)] = &[
    ("ии", "ия"), // Мар-ии → Мария
    ("ны", "на"), // Ан-ны → Анна
    ("ры", "ра"), // Ве-ры → Вера
    ("а", ""),    // Иван-а → Иван
    ("я", ""),    // Арсени-я → Арсений
];

/// Dative → nominative suffix rewrites.
const DATIVE_ENDINGS: &[(&str, &str)] = &[
    ("у", ""),   // Марк-у → Марк
    ("е", "а"),  // Мари-е → Мария
    ("и", "а"),  // Анн-и → Анна
];

/// Generate possible nominative forms of a name, original included.
pub fn nominative_variants(name: &str) -> Vec<String> {
    let trimmed = name.trim();
    if trimmed.chars().count() < 3 {
        return vec![trimmed.to_owned()];
    }

    let lower = trimmed.to_lowercase();
    let mut variants = vec![trimmed.to_owned()];

    for table in [GENITIVE_ENDINGS, DATIVE_ENDINGS] {
        for (ending, replacement) in table {
            let ending_len = ending.chars().count();
            if lower.ends_with(ending) && lower.chars().count() > ending_len + 1 {
                let base: String = lower
                    .chars()
                    .take(lower.chars().count() - ending_len)
                    .collect();
                let candidate = capitalize(&format!("{base}{replacement}"));
                if !variants
                    .iter()
                    .any(|v| v.to_lowercase() == candidate.to_lowercase())
                {
                    variants.push(candidate);
                }
            }
        }
    }

    variants
}

/// Bounded edit-distance match on lowercased, trimmed names.
pub fn fuzzy_match(a: &str, b: &str, max_distance: usize) -> bool {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b {
        return true;
    }
    strsim::levenshtein(&a, &b) <= max_distance
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
