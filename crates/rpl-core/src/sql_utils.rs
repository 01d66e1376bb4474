//! SQL identifier and literal quoting utilities

/// Quote a SQL identifier with double quotes (DuckDB, PostgreSQL).
///
/// Embedded double quotes are doubled, following the SQL standard.
///
/// # Examples
/// ```
/// use rpl_core::sql_utils::quote_ident;
/// assert_eq!(quote_ident("Polizas"), r#""Polizas""#);
/// assert_eq!(quote_ident(r#"my"table"#), r#""my""table""#);
/// ```
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a SQL identifier with backticks (MySQL).
///
/// # Examples
/// ```
/// use rpl_core::sql_utils::quote_ident_backtick;
/// assert_eq!(quote_ident_backtick("ApiKeys"), "`ApiKeys`");
/// ```
pub fn quote_ident_backtick(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

/// Escape a SQL string literal value by doubling single quotes.
///
/// This is for use inside single-quoted SQL string literals, not identifiers.
pub fn escape_sql_string(value: &str) -> String {
    value.replace('\'', "''")
}

/// Render `value` as a single-quoted SQL string literal.
pub fn quote_string(value: &str) -> String {
    format!("'{}'", escape_sql_string(value))
}

/// Join quoted identifiers with `, ` using `quote`.
pub fn quote_list<S: AsRef<str>>(idents: &[S], quote: fn(&str) -> String) -> String {
    idents
        .iter()
        .map(|i| quote(i.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_simple() {
        assert_eq!(quote_ident("Clients"), r#""Clients""#);
    }

    #[test]
    fn test_quote_ident_with_embedded_quotes() {
        assert_eq!(quote_ident(r#"my"table"#), r#""my""table""#);
    }

    #[test]
    fn test_quote_ident_backtick_escapes() {
        assert_eq!(quote_ident_backtick("a`b"), "`a``b`");
    }

    #[test]
    fn test_quote_string() {
        assert_eq!(quote_string("O'Neill"), "'O''Neill'");
        assert_eq!(escape_sql_string("plain"), "plain");
    }

    #[test]
    fn test_quote_list() {
        assert_eq!(
            quote_list(&["CompanyId", "Seccion"], quote_ident),
            r#""CompanyId", "Seccion""#
        );
        assert_eq!(quote_list::<&str>(&[], quote_ident), "");
    }
}
