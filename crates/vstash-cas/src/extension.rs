//! Storage extensions derived from client-supplied filenames.

/// Placeholder used when a filename carries no usable extension.
pub const DEFAULT_EXTENSION: &str = "bin";

/// Upper bound on stored extension length.
pub const MAX_EXTENSION_LEN: usize = 16;

/// Derive a storage extension from an original filename.
///
/// Only the last path component is considered, leading dots are ignored
/// (dotfiles have no extension) and the result is lowercased. Anything that
/// is not a short ASCII-alphanumeric token falls back to `default`.
pub fn extension_from_filename(filename: &str, default: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
        .trim()
        .trim_start_matches('.');

    match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            let ext = ext.to_ascii_lowercase();
            if is_valid_extension(&ext) {
                ext
            } else {
                default.to_string()
            }
        }
        _ => default.to_string(),
    }
}

/// Whether `ext` may appear in a canonical object name.
///
/// Canonical extensions are 1 to [`MAX_EXTENSION_LEN`] lowercase ASCII
/// letters or digits.
pub fn is_valid_extension(ext: &str) -> bool {
    !ext.is_empty()
        && ext.len() <= MAX_EXTENSION_LEN
        && ext.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_extension() {
        assert_eq!(extension_from_filename("greet.txt", DEFAULT_EXTENSION), "txt");
        assert_eq!(extension_from_filename("Photo.JPG", DEFAULT_EXTENSION), "jpg");
        assert_eq!(extension_from_filename("archive.tar.gz", DEFAULT_EXTENSION), "gz");
    }

    #[test]
    fn test_missing_extension_uses_default() {
        assert_eq!(extension_from_filename("README", DEFAULT_EXTENSION), "bin");
        assert_eq!(extension_from_filename(".bashrc", DEFAULT_EXTENSION), "bin");
        assert_eq!(extension_from_filename("trailing.", DEFAULT_EXTENSION), "bin");
        assert_eq!(extension_from_filename("", "dat"), "dat");
    }

    #[test]
    fn test_path_components_are_stripped() {
        assert_eq!(extension_from_filename("../../etc/passwd", DEFAULT_EXTENSION), "bin");
        assert_eq!(extension_from_filename("C:\\docs\\report.pdf", DEFAULT_EXTENSION), "pdf");
        assert_eq!(extension_from_filename("dir.d/file", DEFAULT_EXTENSION), "bin");
    }

    #[test]
    fn test_unsafe_extension_rejected() {
        assert_eq!(extension_from_filename("x.p h p", DEFAULT_EXTENSION), "bin");
        assert_eq!(extension_from_filename("x.tx$", DEFAULT_EXTENSION), "bin");
        assert_eq!(
            extension_from_filename("x.averyveryverylongextension", DEFAULT_EXTENSION),
            "bin"
        );
        assert!(!is_valid_extension("a/b"));
        assert!(is_valid_extension("mp4"));
    }

    #[test]
    fn test_canonical_extensions_are_lowercase() {
        assert!(!is_valid_extension("BIN"));
        assert!(!is_valid_extension("Txt"));
        assert!(is_valid_extension("abcdefghijklmnop"));
        assert!(!is_valid_extension("abcdefghijklmnopq"));
        assert_eq!(extension_from_filename("SCAN.PDF", DEFAULT_EXTENSION), "pdf");
    }
}
