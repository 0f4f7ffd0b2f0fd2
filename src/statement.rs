use thiserror::Error;

/// How a SQL statement typed in the shell is sent to the inspected application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Returns rows, sent as a `query` and cached.
    Query,
    /// Mutates the database, sent as an `update` naming the tables it touches.
    Update { affected_tables: Vec<String> },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatementError {
    #[error("empty statement")]
    EmptyStatement,

    #[error("statement not supported: {0}")]
    Unsupported(String),
}

const QUERY_KEYWORDS: &[&str] = &["select", "with", "pragma", "explain", "values"];
const UPDATE_KEYWORDS: &[&str] = &[
    "insert", "replace", "update", "delete", "create", "drop", "alter",
];

/// Table name with quoting and a trailing column list removed.
fn table_name(token: &str) -> String {
    let name = token.split('(').next().unwrap_or(token);
    name.trim_matches(|c| matches!(c, '"' | '`' | '[' | ']' | ';'))
        .to_string()
}

/// Token following the keyword sequence `path`, skipping an optional
/// `or <conflict>` clause right after the first keyword.
fn after<'a>(tokens: &[&'a str], path: &[&str]) -> Option<&'a str> {
    let mut rest = tokens;
    for (i, keyword) in path.iter().enumerate() {
        let (first, tail) = rest.split_first()?;
        if !first.eq_ignore_ascii_case(keyword) {
            return None;
        }
        rest = tail;
        if i == 0 && rest.first().is_some_and(|t| t.eq_ignore_ascii_case("or")) {
            rest = rest.get(2..)?;
        }
    }
    rest.first().copied()
}

fn affected_tables(tokens: &[&str]) -> Vec<String> {
    let patterns: &[&[&str]] = &[
        &["insert", "into"],
        &["replace", "into"],
        &["update"],
        &["delete", "from"],
        &["create", "table"],
        &["drop", "table"],
        &["alter", "table"],
    ];

    patterns
        .iter()
        .find_map(|path| after(tokens, path))
        .map(table_name)
        .filter(|name| !name.is_empty())
        .into_iter()
        .collect()
}

impl TryFrom<&str> for Statement {
    type Error = StatementError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let tokens = value.split_whitespace().collect::<Vec<&str>>();
        let Some(first) = tokens.first() else {
            return Err(StatementError::EmptyStatement);
        };

        let keyword = first.to_lowercase();
        if QUERY_KEYWORDS.contains(&keyword.as_str()) {
            Ok(Statement::Query)
        } else if UPDATE_KEYWORDS.contains(&keyword.as_str()) {
            Ok(Statement::Update {
                affected_tables: affected_tables(&tokens),
            })
        } else {
            Err(StatementError::Unsupported(value.trim().to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(tables: &[&str]) -> Statement {
        Statement::Update {
            affected_tables: tables.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    #[should_panic(expected = "Unsupported")]
    fn unsupported_statement() {
        let _: Statement = "get from somewhere".try_into().unwrap();
    }

    #[test]
    #[should_panic(expected = "EmptyStatement")]
    fn empty_statement() {
        let _: Statement = "   ".try_into().unwrap();
    }

    #[test]
    fn queries_are_case_insensitive() {
        assert_eq!(Statement::Query, "SELECT * FROM users".try_into().unwrap());
        assert_eq!(Statement::Query, "with x as (select 1) select * from x".try_into().unwrap());
    }

    #[test]
    fn insert_names_its_table() {
        assert_eq!(
            update(&["users"]),
            "insert into users (name) values ('ada')".try_into().unwrap()
        );
        assert_eq!(
            update(&["users"]),
            "INSERT OR REPLACE INTO \"users\"(name) VALUES (?)".try_into().unwrap()
        );
    }

    #[test]
    fn update_and_delete_name_their_table() {
        assert_eq!(
            update(&["users"]),
            "update users set name = 'x'".try_into().unwrap()
        );
        assert_eq!(
            update(&["users"]),
            "update or ignore `users` set name = 'x'".try_into().unwrap()
        );
        assert_eq!(
            update(&["sessions"]),
            "delete from [sessions];".try_into().unwrap()
        );
    }

    #[test]
    fn schema_changes_are_updates() {
        assert_eq!(
            update(&["logs"]),
            "create table logs(id integer)".try_into().unwrap()
        );
        assert_eq!(update(&[]), "create index i on logs(id)".try_into().unwrap());
    }
}
