//! Common test helpers shared across integration tests.
#![allow(dead_code)]

// Drops identifier quotes outside string literals and collapses whitespace,
// so expectations can be written without dialect quoting.
fn unquoted(sql: &str) -> String {
    let mut literal = false;
    let stripped: String = sql
        .chars()
        .filter(|&ch| {
            if ch == '\'' {
                literal = !literal;
            }
            literal || !matches!(ch, '"' | '`')
        })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Asserts that `sql` contains every fragment, in the given order.
#[allow(clippy::missing_panics_doc)]
pub fn assert_sql_contains(sql: &str, fragments: &[&str]) {
    let haystack = unquoted(sql);
    let mut rest = haystack.as_str();

    for fragment in fragments.iter().map(|fragment| unquoted(fragment)) {
        let Some(at) = rest.find(&fragment) else {
            panic!("`{fragment}` not found in order in `{haystack}`");
        };
        rest = &rest[at + fragment.len()..];
    }
}
