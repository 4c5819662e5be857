//! Content fingerprints and stable chunk identifiers (blake3, lowercase hex).

/// Hash of (file path, chunk kind, chunk text).
///
/// Every field is length-prefixed, so no pair of different inputs can produce
/// the same byte stream.
#[must_use]
pub fn fingerprint(file_path: &str, kind: &str, text: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    for field in [file_path, kind, text] {
        hasher.update(&(field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// Stable identifier of the chunk with `fingerprint` inside `file_path`.
#[must_use]
pub fn chunk_id(file_path: &str, fingerprint: &str) -> String {
    blake3::hash(format!("{file_path}:{fingerprint}").as_bytes())
        .to_hex()
        .to_string()
}

/// Hash of a whole file's content.
#[must_use]
pub fn file_hash(source: &str) -> String {
    blake3::hash(source.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn fingerprint_is_lowercase_hex() {
        let fp = fingerprint("src/a.rs", "function_item", "fn a() {}");
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn fields_are_not_concatenated_ambiguously() {
        assert_ne!(fingerprint("ab", "c", "d"), fingerprint("a", "bc", "d"));
        assert_ne!(fingerprint("a", "b", "cd"), fingerprint("a", "bc", "d"));
    }

    #[test]
    fn path_and_kind_participate() {
        let text = "fn a() {}";
        let base = fingerprint("a.rs", "function_item", text);
        assert_ne!(base, fingerprint("b.rs", "function_item", text));
        assert_ne!(base, fingerprint("a.rs", "file", text));
    }

    #[test]
    fn chunk_id_depends_on_path_and_fingerprint() {
        let fp = fingerprint("a.rs", "file", "x");
        assert_eq!(chunk_id("a.rs", &fp), chunk_id("a.rs", &fp));
        assert_ne!(chunk_id("a.rs", &fp), chunk_id("b.rs", &fp));
        assert_ne!(chunk_id("a.rs", &fp), fp);
    }

    #[test]
    fn file_hash_matches_blake3() {
        assert_eq!(file_hash(""), blake3::hash(b"").to_hex().to_string());
    }

    proptest! {
        #[test]
        fn deterministic(path in ".{0,20}", kind in "[a-z_]{1,20}", text in ".{0,200}") {
            prop_assert_eq!(fingerprint(&path, &kind, &text), fingerprint(&path, &kind, &text));
        }

        #[test]
        fn any_text_change_changes_fingerprint(text in ".{0,100}", extra in ".{1,5}") {
            let changed = format!("{text}{extra}");
            prop_assert_ne!(fingerprint("f.rs", "file", &text), fingerprint("f.rs", "file", &changed));
        }
    }
}
