use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::protocol::{
    DomainChannel, Listener, Multiplexer, RequestError, ValueWithType, envelope::DOMAIN_SQL,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlServerIdentification {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub schema_version: i64,
    #[serde(default)]
    pub date_time_format: Option<Value>,
    #[serde(default)]
    pub tables: Vec<SqlTable>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlTable {
    pub name: String,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub columns: Vec<SqlColumn>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub auto_increment: bool,
    #[serde(default)]
    pub extensions: Vec<String>,
}

/// Rows of a select statement. Each row maps a column name to its raw JSON value.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueryResult {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Map<String, Value>>,
}

impl QueryResult {
    /// Cell at `row`/`column`, `None` when either is out of range.
    pub fn cell(&self, row: usize, column: &str) -> Option<&Value> {
        self.rows.get(row)?.get(column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub affected_rows: i64,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    id: &'a str,
    query: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRequest<'a> {
    id: &'a str,
    query: &'a str,
    affected_tables: &'a [String],
    variables: &'a [Option<ValueWithType>],
}

/// Client of the `sql` domain.
pub struct SqlClient {
    channel: Arc<DomainChannel<SqlServerIdentification>>,
}

impl SqlClient {
    pub fn new(mux: &Arc<Multiplexer>) -> Self {
        Self {
            channel: DomainChannel::register(DOMAIN_SQL, mux),
        }
    }

    pub fn servers(&self) -> Vec<SqlServerIdentification> {
        self.channel.servers()
    }

    pub fn add_server_listener(&self, listener: Listener<SqlServerIdentification>) {
        self.channel.add_server_listener(listener);
    }

    pub fn pending_count(&self) -> usize {
        self.channel.pending_count()
    }

    pub fn query(&self, server_id: &str, query: &str) -> Result<QueryResult, RequestError> {
        self.channel.request(
            "query",
            &QueryRequest {
                id: server_id,
                query,
            },
        )
    }

    /// Runs a mutating statement. `variables` bind positional placeholders, `None`
    /// binds SQL `NULL`.
    pub fn update(
        &self,
        server_id: &str,
        query: &str,
        affected_tables: &[String],
        variables: &[Option<ValueWithType>],
    ) -> Result<UpdateResult, RequestError> {
        self.channel.request(
            "update",
            &UpdateRequest {
                id: server_id,
                query,
                affected_tables,
                variables,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::protocol::multiplexer::tests::{Remote, spawn};

    #[test]
    fn query_decodes_rows() {
        let remote = Remote::new();
        let client = Arc::new(SqlClient::new(&remote.mux));

        let caller = Arc::clone(&client);
        let call = spawn(move || caller.query("main.db", "select * from users"));
        let request = remote.answer(
            "query",
            json!({"columns": ["id", "name"], "rows": [{"id": 1, "name": "ada"}, {"id": 2, "name": null}]}),
        );

        assert_eq!(request["domain"], "sql");
        assert_eq!(
            request["data"]["data"],
            json!({"id": "main.db", "query": "select * from users"})
        );
        let result = call.join().unwrap().unwrap();
        assert_eq!(result.columns, vec!["id", "name"]);
        assert_eq!(result.cell(0, "name"), Some(&json!("ada")));
        assert_eq!(result.cell(1, "name"), Some(&Value::Null));
        assert_eq!(result.cell(2, "name"), None);
    }

    #[test]
    fn update_sends_tables_and_nullable_variables() {
        let remote = Remote::new();
        let client = Arc::new(SqlClient::new(&remote.mux));

        let caller = Arc::clone(&client);
        let call = spawn(move || {
            caller.update(
                "main.db",
                "update users set name = ? where id = ?",
                &["users".to_string()],
                &[None, Some(ValueWithType::Int(7))],
            )
        });
        let request = remote.answer("update", json!({"affectedRows": 1}));

        assert_eq!(
            request["data"]["data"],
            json!({
                "id": "main.db",
                "query": "update users set name = ? where id = ?",
                "affectedTables": ["users"],
                "variables": [null, {"type": "int", "value": 7}]
            })
        );
        assert_eq!(call.join().unwrap().unwrap().affected_rows, 1);
    }

    #[test]
    fn remote_error_surfaces() {
        let remote = Remote::new();
        let client = Arc::new(SqlClient::new(&remote.mux));

        let caller = Arc::clone(&client);
        let call = spawn(move || caller.query("main.db", "select * from nope"));
        remote.fail("query", "no such table: nope");

        match call.join().unwrap() {
            Err(RequestError::Remote(message)) => assert_eq!(message, "no such table: nope"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(client.pending_count(), 0);
    }

    #[test]
    fn identification_decodes_schema() {
        let remote = Remote::new();
        let client = SqlClient::new(&remote.mux);

        remote.push(json!({"domain": "sql", "data": {"type": "identify", "data": {
            "id": "main.db",
            "name": "Main database",
            "schemaVersion": 3,
            "tables": [{
                "name": "users",
                "primaryKey": ["id"],
                "columns": [
                    {"name": "id", "type": "INTEGER", "autoIncrement": true},
                    {"name": "name", "type": "TEXT", "nullable": true}
                ]
            }]
        }}}));

        let servers = client.servers();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].schema_version, 3);
        let table = &servers[0].tables[0];
        assert_eq!(table.primary_key, vec!["id"]);
        assert!(table.columns[0].auto_increment);
        assert!(table.columns[1].nullable);
        assert!(!table.columns[1].optional);
    }
}
