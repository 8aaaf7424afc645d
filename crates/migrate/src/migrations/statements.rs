//! Splitting raw migration SQL into executable statements
//!
//! Boundaries come from the sqlparser tokenizer of the connection's dialect,
//! so semicolons inside string literals, comments, quoted identifiers,
//! dollar-quoted bodies and trigger `BEGIN ... END` blocks are not split on.
//! Statement text is sliced from the original input, never re-rendered.

use sqlparser::dialect::{Dialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Location, Token, TokenWithLocation, Tokenizer};
use tracing::warn;

use crate::backends::SqlDialect;

fn parser_dialect(dialect: SqlDialect) -> Box<dyn Dialect> {
    match dialect {
        SqlDialect::SQLite => Box::new(SQLiteDialect {}),
        SqlDialect::PostgreSQL | SqlDialect::CockroachDB => Box::new(PostgreSqlDialect {}),
        SqlDialect::MySQL => Box::new(MySqlDialect {}),
    }
}

/// Split `sql` into trimmed statements without their terminating `;`.
/// Comment-only and empty statements are dropped.
pub fn split_statements(sql: &str, dialect: SqlDialect) -> Vec<String> {
    let parser_dialect = parser_dialect(dialect);
    let tokens = Tokenizer::new(parser_dialect.as_ref(), sql)
        .with_unescape(false)
        .tokenize_with_location();

    match tokens {
        Ok(tokens) => split_on_tokens(sql, &tokens).unwrap_or_else(|| {
            warn!(%dialect, "token locations did not map onto the input, using naive semicolon splitting");
            split_naive(sql)
        }),
        Err(e) => {
            warn!(%dialect, error = %e, "SQL tokenizing failed, using naive semicolon splitting");
            split_naive(sql)
        }
    }
}

fn split_naive(sql: &str) -> Vec<String> {
    sql.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Procedural blocks whose opening keyword never raised the depth, so their
/// `END <keyword>` must not lower it either
const UNCOUNTED_BLOCKS: [&str; 4] = ["IF", "LOOP", "WHILE", "REPEAT"];

fn split_on_tokens(sql: &str, tokens: &[TokenWithLocation]) -> Option<Vec<String>> {
    let offsets = LineOffsets::new(sql);
    let mut statements = Vec::new();
    let mut start = 0;
    let mut has_content = false;
    let mut in_trigger = false;
    let mut depth = 0usize;
    let mut closing_case = false;

    for (index, token) in tokens.iter().enumerate() {
        match &token.token {
            Token::Whitespace(_) | Token::EOF => {}
            Token::SemiColon if depth == 0 => {
                let end = offsets.byte_offset(&token.location)?;
                if has_content {
                    statements.push(sql.get(start..end)?.trim().to_string());
                }
                start = end + 1;
                has_content = false;
                in_trigger = false;
            }
            Token::Word(word) => {
                has_content = true;
                match word.keyword {
                    Keyword::TRIGGER => in_trigger = true,
                    Keyword::CASE if in_trigger && closing_case => closing_case = false,
                    Keyword::BEGIN | Keyword::CASE if in_trigger => depth += 1,
                    Keyword::END if in_trigger => match next_word(&tokens[index + 1..]) {
                        Some(next) if UNCOUNTED_BLOCKS.iter().any(|kw| next.eq_ignore_ascii_case(kw)) => {}
                        Some(next) if next.eq_ignore_ascii_case("CASE") => {
                            closing_case = true;
                            depth = depth.saturating_sub(1);
                        }
                        _ => depth = depth.saturating_sub(1),
                    },
                    _ => {}
                }
            }
            _ => has_content = true,
        }
    }

    if has_content {
        statements.push(sql.get(start..)?.trim().to_string());
    }
    Some(statements)
}

/// The next word after skipping whitespace and comments
fn next_word(tokens: &[TokenWithLocation]) -> Option<&str> {
    tokens
        .iter()
        .find(|token| !matches!(token.token, Token::Whitespace(_)))
        .and_then(|token| match &token.token {
            Token::Word(word) => Some(word.value.as_str()),
            _ => None,
        })
}

/// Maps tokenizer locations (1-based line and character column) to byte offsets
struct LineOffsets<'a> {
    sql: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineOffsets<'a> {
    fn new(sql: &'a str) -> Self {
        let starts = std::iter::once(0)
            .chain(sql.match_indices('\n').map(|(index, _)| index + 1))
            .collect();
        Self { sql, starts }
    }

    fn byte_offset(&self, location: &Location) -> Option<usize> {
        let line = usize::try_from(location.line).ok()?.checked_sub(1)?;
        let column = usize::try_from(location.column).ok()?.checked_sub(1)?;
        let line_start = *self.starts.get(line)?;
        let (within, _) = self.sql.get(line_start..)?.char_indices().nth(column)?;
        Some(line_start + within)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_simple_statements() {
        let sql = "CREATE TABLE a (id INTEGER);\nCREATE TABLE b (id INTEGER);\n";
        assert_eq!(
            split_statements(sql, SqlDialect::SQLite),
            vec!["CREATE TABLE a (id INTEGER)", "CREATE TABLE b (id INTEGER)"]
        );
    }

    #[test]
    fn test_keeps_trailing_statement_without_semicolon() {
        let sql = "DROP TABLE a;\nDROP TABLE b";
        assert_eq!(split_statements(sql, SqlDialect::PostgreSQL), vec!["DROP TABLE a", "DROP TABLE b"]);
    }

    #[test]
    fn test_ignores_semicolons_in_literals_and_comments() {
        let sql = "-- first; still a comment\nINSERT INTO notes (body) VALUES ('a;b');\n/* block; comment */\nINSERT INTO notes (body) VALUES ('it''s');";
        let statements = split_statements(sql, SqlDialect::SQLite);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].ends_with("VALUES ('a;b')"));
        assert!(statements[0].starts_with("-- first; still a comment"));
        assert!(statements[1].ends_with("VALUES ('it''s')"));
    }

    #[test]
    fn test_drops_comment_only_and_empty_input() {
        assert!(split_statements("", SqlDialect::MySQL).is_empty());
        assert!(split_statements("  \n-- nothing to do here\n;;", SqlDialect::MySQL).is_empty());
    }

    #[test]
    fn test_dollar_quoted_function_body_stays_whole() {
        let sql = "CREATE FUNCTION touch() RETURNS trigger AS $$\nBEGIN\n  NEW.updated_at = now();\n  RETURN NEW;\nEND;\n$$ LANGUAGE plpgsql;\nSELECT 1;";
        let statements = split_statements(sql, SqlDialect::PostgreSQL);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].ends_with("LANGUAGE plpgsql"));
        assert_eq!(statements[1], "SELECT 1");
    }

    #[test]
    fn test_trigger_body_stays_whole() {
        let sql = "CREATE TRIGGER touch AFTER UPDATE ON notes\nBEGIN\n  UPDATE notes SET body = CASE WHEN body IS NULL THEN '' ELSE body END;\n  SELECT 1;\nEND;\nCREATE INDEX notes_body_idx ON notes (body);";
        let statements = split_statements(sql, SqlDialect::SQLite);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE TRIGGER"));
        assert!(statements[0].ends_with("END"));
        assert_eq!(statements[1], "CREATE INDEX notes_body_idx ON notes (body)");
    }

    #[test]
    fn test_mysql_trigger_with_control_flow_stays_whole() {
        let sql = "CREATE TRIGGER fill_defaults BEFORE INSERT ON x FOR EACH ROW\n\
                   BEGIN\n\
                     IF NEW.a IS NULL THEN SET NEW.a = 1; END IF;\n\
                     WHILE NEW.c < 3 DO SET NEW.c = NEW.c + 1; END WHILE;\n\
                     CASE NEW.d WHEN 1 THEN SET NEW.d = 2; ELSE SET NEW.d = 3; END CASE;\n\
                     SET NEW.b = 2;\n\
                   END;\n\
                   CREATE INDEX i ON x (a);";
        let statements = split_statements(sql, SqlDialect::MySQL);
        assert_eq!(statements.len(), 2, "{:?}", statements);
        assert!(statements[0].starts_with("CREATE TRIGGER fill_defaults"));
        assert!(statements[0].ends_with("END"));
        assert_eq!(statements[1], "CREATE INDEX i ON x (a)");
    }

    #[test]
    fn test_multibyte_text_keeps_offsets_aligned() {
        let sql = "INSERT INTO notes (body) VALUES ('héllo wörld');\nINSERT INTO notes (body) VALUES ('ok');";
        assert_eq!(
            split_statements(sql, SqlDialect::SQLite),
            vec![
                "INSERT INTO notes (body) VALUES ('héllo wörld')",
                "INSERT INTO notes (body) VALUES ('ok')"
            ]
        );
    }

    #[test]
    fn test_naive_fallback() {
        assert_eq!(split_naive(" a ; ;b;"), vec!["a", "b"]);
    }
}
