//! File-name handling: sanitization and extension derivation.

/// Strip every character outside `[A-Za-z0-9._-]`.
///
/// Kept characters retain their relative order.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect()
}

/// Extension of the final path component, without the dot.
///
/// Leading dots of the component do not start an extension, so `.bashrc`
/// has none. Returns an empty string when there is no extension.
pub fn file_extension(name: &str) -> &str {
    let base = name.rsplit('/').next().unwrap_or(name);
    let stem = base.trim_start_matches('.');
    match stem.rfind('.') {
        Some(idx) => &stem[idx + 1..],
        None => "",
    }
}

/// Whether a sanitized name is safe to use as a single path component.
pub fn is_usable_file_name(name: &str) -> bool {
    !matches!(name, "" | "." | "..")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_special_characters() {
        assert_eq!(sanitize_file_name("%t$e@s/&t.txt"), "test.txt");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "....etcpasswd");
        assert_eq!(sanitize_file_name("my file (1).txt"), "myfile1.txt");
    }

    #[test]
    fn sanitize_drops_non_ascii_letters_and_digits() {
        assert_eq!(sanitize_file_name("ünï.txt"), "n.txt");
        assert_eq!(sanitize_file_name("ünï².txt"), "n.txt");
        assert_eq!(sanitize_file_name("файл.txt"), ".txt");
    }

    #[test]
    fn sanitize_keeps_allowed_characters() {
        assert_eq!(sanitize_file_name("test-some_thing.txt"), "test-some_thing.txt");
    }

    #[test]
    fn sanitize_only_emits_allowed_characters() {
        let inputs = [
            "a\u{0}b",
            "tab\tname.txt",
            "quote\"d'.md",
            "~/x/y/z.txt",
            "ünï².txt",
            "файл.txt",
            "名前١٢.txt",
        ];
        for input in inputs {
            let out = sanitize_file_name(input);
            assert!(
                out.chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')),
                "unexpected character kept in {out:?}"
            );
            // Kept characters appear in input order.
            let mut rest = input.chars();
            for c in out.chars() {
                assert!(rest.any(|o| o == c));
            }
        }
    }

    #[test]
    fn extension_rules() {
        assert_eq!(file_extension("test.txt"), "txt");
        assert_eq!(file_extension("archive.tar.gz"), "gz");
        assert_eq!(file_extension("%t$e@s/&t.txt"), "txt");
        assert_eq!(file_extension("dir.d/noext"), "");
        assert_eq!(file_extension(".bashrc"), "");
        assert_eq!(file_extension("..hidden.txt"), "txt");
        assert_eq!(file_extension("trailing."), "");
        assert_eq!(file_extension(""), "");
    }

    #[test]
    fn usable_names() {
        assert!(is_usable_file_name("a.txt"));
        assert!(is_usable_file_name(".txt"));
        assert!(!is_usable_file_name(""));
        assert!(!is_usable_file_name("."));
        assert!(!is_usable_file_name(".."));
    }
}
