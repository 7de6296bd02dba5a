//! Text normalisation shared by the parser and the registry lookups.

/// Fold Spanish accented characters onto their ASCII base letter
pub fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'ä' | 'â' => 'a',
        'é' | 'è' | 'ë' | 'ê' => 'e',
        'í' | 'ì' | 'ï' | 'î' => 'i',
        'ó' | 'ò' | 'ö' | 'ô' => 'o',
        'ú' | 'ù' | 'ü' | 'û' => 'u',
        'ñ' => 'n',
        'ç' => 'c',
        other => other,
    }
}

/// Lowercase, fold accents, turn separators (spaces, hyphens, underscores,
/// punctuation) into single spaces and trim.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;

    for c in text.chars().flat_map(|c| c.to_lowercase()).map(fold_accent) {
        if c.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        } else {
            pending_space = true;
        }
    }

    out
}

pub fn tokenize(normalized: &str) -> Vec<String> {
    normalized.split(' ').filter(|t| !t.is_empty()).map(|t| t.to_string()).collect()
}

/// Raw words as typed (case preserved), split on separators
pub fn raw_words(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Índice   de MOROSIDAD "), "indice de morosidad");
        assert_eq!(normalize("últimos 3 años"), "ultimos 3 anos");
        assert_eq!(normalize("BBVA-Bancomer_México"), "bbva bancomer mexico");
        assert_eq!(normalize("IMOR'; DROP"), "imor drop");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_raw_words_keep_case() {
        assert_eq!(raw_words("dame el ROE de INVEX"), vec!["dame", "el", "ROE", "de", "INVEX"]);
    }
}
