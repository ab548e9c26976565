use anyhow::{Context, Result};
use regex::Regex;
use std::path::PathBuf;
use std::sync::OnceLock;
use which::which;

/// Finds an external tool in the system PATH.
pub fn find_executable(name: &str) -> Result<PathBuf> {
    which(name).with_context(|| {
        format!(
            "{} executable not found in PATH. Please ensure it is installed and in your PATH.",
            name
        )
    })
}

/// Table names accepted on the command line.
pub fn is_valid_table_name(name: &str) -> bool {
    static TABLE_NAME: OnceLock<Regex> = OnceLock::new();
    TABLE_NAME
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_$]{1,64}$").expect("static regex"))
        .is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names() {
        assert!(is_valid_table_name("orders"));
        assert!(is_valid_table_name("order_items_2024"));
        assert!(!is_valid_table_name(""));
        assert!(!is_valid_table_name("orders; DROP TABLE users"));
        assert!(!is_valid_table_name("a`b"));
    }

    #[test]
    fn test_missing_executable() {
        let err = find_executable("definitely-not-a-real-tool-dbsync").unwrap_err();
        assert!(err.to_string().contains("not found in PATH"));
    }
}
