//! URL slug derivation
//!
//! Catalog rows carry a unique slug derived from their display name. The
//! derivation keeps alphanumeric characters, collapses whitespace and
//! separators into single hyphens, and lowercases the result.

/// Derive a slug from a display name.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_hyphen = false;

    for ch in name.chars() {
        if ch.is_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            for lower in ch.to_lowercase() {
                slug.push(lower);
            }
        } else {
            pending_hyphen = true;
        }
    }

    slug
}

/// Derive a slug from several name components joined in order.
pub fn slugify_parts(parts: &[&str]) -> String {
    let joined = parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    slugify(&joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify_basic() {
        assert_eq!(slugify("Amazing Spider-Man"), "amazing-spider-man");
        assert_eq!(slugify("Earth-616"), "earth-616");
    }

    #[test]
    fn test_slugify_collapses_separators() {
        assert_eq!(slugify("  Secret   Wars !! "), "secret-wars");
        assert_eq!(slugify("X-Men: Gold #1"), "x-men-gold-1");
    }

    #[test]
    fn test_slugify_unicode() {
        assert_eq!(slugify("Überman"), "überman");
    }

    #[test]
    fn test_slugify_parts() {
        assert_eq!(
            slugify_parts(&["Marvel", "Earth-616", "Amazing Spider-Man"]),
            "marvel-earth-616-amazing-spider-man"
        );
        assert_eq!(slugify_parts(&["", "Marvel"]), "marvel");
    }
}
