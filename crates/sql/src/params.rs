//! # Named parameters
//!
//! Query text refers to parameters as `@name`. Sequence parameters are
//! expanded into suffixed scalar parameters (`@ids` becomes
//! `@ids_1, @ids_2, …`) so variable-length `IN (…)` lists work without
//! dialect-specific array binding. Binding then rewrites every named token
//! into the dialect's positional placeholder.

use anyhow::{Result, bail};
use indexmap::IndexMap;

use crate::dialect::Dialect;
use crate::query::Statement;
use crate::types::DataType;

/// A parameter value: a scalar or a sequence to be expanded.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    /// Single value bound to one placeholder.
    Value(DataType),
    /// Sequence expanded into one placeholder per element.
    List(Vec<DataType>),
}

/// Ordered, case-insensitive map of named parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    entries: IndexMap<String, Param>,
}

impl Params {
    /// Creates an empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a scalar parameter.
    #[must_use]
    pub fn set(mut self, name: impl Into<String>, value: impl Into<DataType>) -> Self {
        self.insert(name, Param::Value(value.into()));
        self
    }

    /// Adds a sequence parameter.
    #[must_use]
    pub fn list(
        mut self, name: impl Into<String>, values: impl IntoIterator<Item = impl Into<DataType>>,
    ) -> Self {
        self.insert(name, Param::List(values.into_iter().map(Into::into).collect()));
        self
    }

    /// Inserts or replaces a parameter.
    pub fn insert(&mut self, name: impl Into<String>, param: Param) {
        let name = name.into();
        let existing = self.entries.keys().find(|key| key.eq_ignore_ascii_case(&name)).cloned();
        match existing {
            Some(key) => {
                self.entries.insert(key, param);
            }
            None => {
                self.entries.insert(name, param);
            }
        }
    }

    /// Looks up a parameter by name, ignoring ASCII case.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Param> {
        self.entries.get(name).or_else(|| {
            self.entries.iter().find(|(key, _)| key.eq_ignore_ascii_case(name)).map(|(_, v)| v)
        })
    }

    /// Number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when there are no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates parameters in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Param)> {
        self.entries.iter().map(|(name, param)| (name.as_str(), param))
    }
}

/// Expands sequence parameters referenced by `sql`.
///
/// Returns the rewritten text and the flattened scalar parameters it
/// references. An empty sequence expands to `NULL`. Tokens with no matching
/// parameter are left in place for [`bind`] to report.
///
/// # Errors
///
/// Never fails today; the signature leaves room for stricter token rules.
pub fn expand(sql: &str, params: &Params) -> Result<(String, Params)> {
    let mut expanded = Params::new();

    let text = rewrite(sql, |name, out| {
        match params.get(name) {
            Some(Param::List(values)) if values.is_empty() => out.push_str("NULL"),
            Some(Param::List(values)) => {
                let names: Vec<String> = (1..=values.len()).map(|n| format!("{name}_{n}")).collect();
                for (suffixed, value) in names.iter().zip(values) {
                    expanded.insert(suffixed.clone(), Param::Value(value.clone()));
                }
                let tokens: Vec<String> = names.iter().map(|n| format!("@{n}")).collect();
                out.push_str(&tokens.join(", "));
            }
            Some(Param::Value(value)) => {
                expanded.insert(name, Param::Value(value.clone()));
                out.push('@');
                out.push_str(name);
            }
            None => {
                out.push('@');
                out.push_str(name);
            }
        }
        Ok(())
    })?;

    Ok((text, expanded))
}

/// Expands `params` into `sql` and converts every named token into the
/// dialect's positional placeholder.
///
/// # Errors
///
/// Returns an error if the text references a parameter that was not supplied.
pub fn bind(sql: &str, params: &Params, dialect: &dyn Dialect) -> Result<Statement> {
    let (text, expanded) = expand(sql, params)?;
    let mut values = Vec::new();

    let sql = rewrite(&text, |name, out| {
        let Some(Param::Value(value)) = expanded.get(name) else {
            bail!("missing parameter '@{name}'");
        };
        values.push(value.clone());
        out.push_str(&dialect.render_placeholder(values.len()));
        Ok(())
    })?;

    tracing::debug!(sql = %sql, param_count = values.len(), "bound named parameters");

    Ok(Statement { sql, params: values })
}

const fn is_ident(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

// Calls `token` for every `@name` outside quoted text. `@@name` system
// variables are copied through untouched.
fn rewrite(sql: &str, mut token: impl FnMut(&str, &mut String) -> Result<()>) -> Result<String> {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.char_indices().peekable();
    let mut quote: Option<char> = None;

    while let Some((pos, ch)) = chars.next() {
        if let Some(open) = quote {
            out.push(ch);
            if ch == open {
                quote = None;
            }
            continue;
        }

        match ch {
            '\'' | '"' | '`' => {
                quote = Some(ch);
                out.push(ch);
            }
            '@' if matches!(chars.peek(), Some((_, '@'))) => {
                out.push('@');
                while let Some(&(_, next)) = chars.peek() {
                    if next != '@' && !is_ident(next) {
                        break;
                    }
                    out.push(next);
                    chars.next();
                }
            }
            '@' => {
                let start = pos + 1;
                let mut end = start;
                while let Some(&(idx, next)) = chars.peek() {
                    if !is_ident(next) {
                        break;
                    }
                    end = idx + next.len_utf8();
                    chars.next();
                }
                if end == start {
                    out.push('@');
                } else {
                    token(&sql[start..end], &mut out)?;
                }
            }
            _ => out.push(ch),
        }
    }

    Ok(out)
}
