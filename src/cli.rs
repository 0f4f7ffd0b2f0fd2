//! Interactive shell over an inspection [`Session`].
//!
//! The utilities present in this module read [`Command`]s from any reader and
//! print their results to any writer, so the same loop drives the binary and
//! the tests.
use std::io::{self, BufRead, Write};

use chrono::DateTime;
use thiserror::Error;

use crate::{
    Command, CommandError, Statement,
    client::{FileInfo, QueryResult, StorageServer},
    inspector::{CachedEntry, CachedValue},
    protocol::RequestError,
    session::Session,
};

#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("output error: {0}")]
    Io(#[from] io::Error),
}

/// Prompts for one command. End of input reads as `.exit`.
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> Result<Command, ShellError>
where
    R: BufRead,
    W: Write,
{
    let mut s = String::default();
    write!(&mut writer, "> ")?;
    writer.flush()?;

    if reader.read_line(&mut s)? == 0 {
        return Ok(Command::Exit);
    }
    Ok(s.as_str().try_into()?)
}

fn format_date(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|date| date.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}

fn print_servers<W: Write>(writer: &mut W, servers: &[StorageServer]) -> io::Result<()> {
    if servers.is_empty() {
        return writeln!(writer, "no storage servers announced yet");
    }
    for server in servers {
        writeln!(writer, "{:<9} {:<24} {}", server.kind(), server.id(), server.name())?;
    }
    Ok(())
}

fn print_entries<W: Write>(writer: &mut W, entries: &[CachedEntry]) -> io::Result<()> {
    for entry in entries {
        match &entry.value {
            CachedValue::Value(value) => writeln!(writer, "{} = {value}", entry.key)?,
            CachedValue::Binary { size } => writeln!(writer, "{} = <{size} bytes>", entry.key)?,
        }
    }
    writeln!(writer, "({} entries)", entries.len())
}

fn print_rows<W: Write>(writer: &mut W, result: &QueryResult) -> io::Result<()> {
    writeln!(writer, "{}", result.columns.join(" | "))?;
    for row in &result.rows {
        let cells: Vec<String> = result
            .columns
            .iter()
            .map(|column| match row.get(column) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(serde_json::Value::Null) | None => "NULL".to_string(),
                Some(other) => other.to_string(),
            })
            .collect();
        writeln!(writer, "{}", cells.join(" | "))?;
    }
    writeln!(writer, "({} rows)", result.rows.len())
}

fn print_files<W: Write>(writer: &mut W, files: &[FileInfo]) -> io::Result<()> {
    let mut files: Vec<&FileInfo> = files.iter().collect();
    files.sort_by(|a, b| a.path.cmp(&b.path));
    for file in files {
        if file.is_dir {
            writeln!(writer, "{:>10}  {}  {}/", "-", format_date(file.date), file.path)?;
        } else {
            writeln!(writer, "{:>10}  {}  {}", file.size, format_date(file.date), file.path)?;
        }
    }
    Ok(())
}

/// Runs one command. Returns `false` once the shell should stop.
pub fn execute<W: Write>(
    session: &Session,
    command: Command,
    writer: &mut W,
) -> Result<bool, ShellError> {
    match command {
        Command::Exit => return Ok(false),
        Command::Servers => print_servers(writer, &session.servers())?,
        Command::Session => {
            let identifications = session.session_identifications();
            if identifications.is_empty() {
                writeln!(writer, "the application has not identified itself yet")?;
            }
            for id in identifications {
                let state = if id.paused { "paused" } else { "running" };
                writeln!(writer, "{} {} ({state})", id.bundle_id, id.version)?;
            }
        }
        Command::Unpause => session.unpause()?,
        Command::KeyValueGet { server } => {
            print_entries(writer, &session.key_value().get_data(&server)?)?
        }
        Command::KeyValueReload { server } => {
            print_entries(writer, &session.key_value().reload(&server)?)?
        }
        Command::KeyValueValue { server, key } => {
            let value = session.key_value().get_value(&server, &key)?;
            writeln!(writer, "{key} = {value}")?;
        }
        Command::KeyValueSet { server, key, value } => {
            session.key_value().set(&server, key, value)?
        }
        Command::KeyValueRemove { server, key } => session.key_value().remove(&server, &key)?,
        Command::KeyValueClear { server } => session.key_value().clear(&server)?,
        Command::Sql {
            server,
            query,
            statement,
        } => match statement {
            Statement::Query => print_rows(writer, &session.sql().query(&server, &query, false)?)?,
            Statement::Update { affected_tables } => {
                let result = session
                    .sql()
                    .update(&server, &query, &affected_tables, &[])?;
                writeln!(writer, "{} row(s) affected", result.affected_rows)?;
            }
        },
        Command::SqlReload { server, query } => {
            print_rows(writer, &session.sql().query(&server, &query, true)?)?
        }
        Command::FileList { server } => print_files(writer, &session.file().get_data(&server)?)?,
        Command::FileReload { server } => print_files(writer, &session.file().reload(&server)?)?,
        Command::FileCat { server, path } => {
            let bytes = session.file().read(&server, &path)?;
            writeln!(writer, "{}", String::from_utf8_lossy(&bytes))?;
        }
        Command::FileWrite {
            server,
            path,
            contents,
        } => session.file().write(&server, &path, contents.as_bytes())?,
        Command::FileRemove {
            server,
            path,
            recursive,
        } => session.file().remove(&server, &path, recursive)?,
    }
    Ok(true)
}

/// Prompts and executes until `.exit` or end of input. Command errors are
/// reported on `writer` and do not stop the loop.
pub fn run<R, W>(session: &Session, mut reader: R, mut writer: W) -> io::Result<()>
where
    R: BufRead,
    W: Write,
{
    loop {
        let outcome = prompt(&mut reader, &mut writer)
            .and_then(|command| execute(session, command, &mut writer));
        match outcome {
            Ok(true) => {}
            Ok(false) => return Ok(()),
            Err(ShellError::Io(e)) => return Err(e),
            Err(e) => writeln!(writer, "error: {e}")?,
        }
    }
}
