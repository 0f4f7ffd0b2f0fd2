use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use chrono::Utc;
use log::debug;

use crate::{
    client::{FileClient, FileInfo},
    protocol::{RequestError, lock},
};

/// Root requested when listing a whole server.
const LIST_ROOT: &str = "";

/// Strips leading slashes so `/a/b` and `a/b` name the same entry.
pub fn normalize(path: &str) -> &str {
    path.trim_start_matches('/')
}

fn parent(path: &str) -> Option<&str> {
    path.rfind('/').map(|at| &path[..at])
}

fn is_under(path: &str, dir: &str) -> bool {
    path.len() > dir.len() && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/'
}

/// Read-through cache of file listings over a [`FileClient`].
///
/// A listing holds leaf files plus directory placeholders: entries with
/// `is_dir` set that stand for directories with nothing listed under them.
pub struct FileInspector {
    client: Arc<FileClient>,
    cache: Mutex<HashMap<String, Vec<FileInfo>>>,
}

impl FileInspector {
    pub fn new(client: Arc<FileClient>) -> Self {
        Self {
            client,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_data(&self, server_id: &str) -> Result<Vec<FileInfo>, RequestError> {
        let mut cache = lock(&self.cache);
        if let Some(files) = cache.get(server_id) {
            return Ok(files.clone());
        }
        Self::fetch(&self.client, &mut cache, server_id)
    }

    pub fn reload(&self, server_id: &str) -> Result<Vec<FileInfo>, RequestError> {
        let mut cache = lock(&self.cache);
        Self::fetch(&self.client, &mut cache, server_id)
    }

    /// Reads a file remotely. Contents are never cached.
    pub fn read(&self, server_id: &str, path: &str) -> Result<Vec<u8>, RequestError> {
        self.client.read(server_id, normalize(path))
    }

    pub fn write(&self, server_id: &str, path: &str, bytes: &[u8]) -> Result<(), RequestError> {
        let path = normalize(path);
        let mut cache = lock(&self.cache);
        self.client.write(server_id, path, bytes)?;

        if let Some(files) = cache.get_mut(server_id) {
            let entry = FileInfo {
                path: path.to_string(),
                size: bytes.len() as u64,
                date: Utc::now().timestamp_millis(),
                is_dir: false,
            };
            match files.iter_mut().find(|file| file.path == path) {
                Some(file) => *file = entry,
                None => {
                    files.retain(|file| !(file.is_dir && is_under(path, &file.path)));
                    files.push(entry);
                }
            }
        }
        Ok(())
    }

    pub fn remove(&self, server_id: &str, path: &str, recursive: bool) -> Result<(), RequestError> {
        let path = normalize(path);
        let mut cache = lock(&self.cache);
        self.client.remove(server_id, path, recursive)?;

        if let Some(files) = cache.get_mut(server_id) {
            files.retain(|file| file.path != path && !(recursive && is_under(&file.path, path)));

            if let Some(dir) = parent(path) {
                let still_listed = files
                    .iter()
                    .any(|file| file.path == dir || is_under(&file.path, dir));
                if !still_listed {
                    debug!("file {server_id}: keeping emptied directory {dir}");
                    files.push(FileInfo {
                        path: dir.to_string(),
                        size: 0,
                        date: Utc::now().timestamp_millis(),
                        is_dir: true,
                    });
                }
            }
        }
        Ok(())
    }

    fn fetch(
        client: &FileClient,
        cache: &mut HashMap<String, Vec<FileInfo>>,
        server_id: &str,
    ) -> Result<Vec<FileInfo>, RequestError> {
        let files: Vec<FileInfo> = client
            .list(server_id, LIST_ROOT)?
            .into_iter()
            .map(|mut file| {
                file.path = normalize(&file.path).to_string();
                file
            })
            .collect();
        debug!("file {server_id}: cached {} entries", files.len());

        cache.insert(server_id.to_string(), files.clone());
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::protocol::multiplexer::tests::{Remote, spawn};

    fn inspector(remote: &Remote) -> Arc<FileInspector> {
        Arc::new(FileInspector::new(Arc::new(FileClient::new(&remote.mux))))
    }

    fn load(remote: &Remote, inspector: &Arc<FileInspector>, listing: serde_json::Value) {
        let caller = Arc::clone(inspector);
        let call = spawn(move || caller.get_data("docs"));
        remote.answer("list", listing);
        call.join().unwrap().unwrap();
    }

    fn paths(inspector: &FileInspector) -> Vec<String> {
        let mut paths: Vec<String> = inspector
            .get_data("docs")
            .unwrap()
            .into_iter()
            .map(|file| file.path)
            .collect();
        paths.sort();
        paths
    }

    #[test]
    fn helpers() {
        assert_eq!(normalize("//a/b"), "a/b");
        assert_eq!(parent("a/b/c"), Some("a/b"));
        assert_eq!(parent("a"), None);
        assert!(is_under("a/b", "a"));
        assert!(!is_under("ab", "a"));
        assert!(!is_under("a", "a"));
    }

    #[test]
    fn write_replaces_ancestor_placeholder() {
        let remote = Remote::new();
        let inspector = inspector(&remote);
        load(
            &remote,
            &inspector,
            json!([
                {"path": "/a", "size": 0, "date": 1, "isDir": true},
                {"path": "/c.txt", "size": 9, "date": 1}
            ]),
        );

        let caller = Arc::clone(&inspector);
        let call = spawn(move || caller.write("docs", "/a/b.txt", b"hello"));
        let request = remote.answer("write", json!(null));
        call.join().unwrap().unwrap();

        assert_eq!(request["data"]["data"]["path"], "a/b.txt");
        assert_eq!(paths(&inspector), vec!["a/b.txt", "c.txt"]);
        let written = inspector
            .get_data("docs")
            .unwrap()
            .into_iter()
            .find(|file| file.path == "a/b.txt")
            .unwrap();
        assert_eq!(written.size, 5);
        assert!(!written.is_dir);
        assert!(remote.no_request());
    }

    #[test]
    fn write_replaces_existing_entry() {
        let remote = Remote::new();
        let inspector = inspector(&remote);
        load(&remote, &inspector, json!([{"path": "c.txt", "size": 9, "date": 1}]));

        let caller = Arc::clone(&inspector);
        let call = spawn(move || caller.write("docs", "c.txt", b"ab"));
        remote.answer("write", json!(null));
        call.join().unwrap().unwrap();

        let files = inspector.get_data("docs").unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].size, 2);
        assert!(files[0].date > 1);
    }

    #[test]
    fn removing_last_file_keeps_directory_visible() {
        let remote = Remote::new();
        let inspector = inspector(&remote);
        load(
            &remote,
            &inspector,
            json!([{"path": "a/b.txt", "size": 1, "date": 1}, {"path": "c.txt", "size": 1, "date": 1}]),
        );

        let caller = Arc::clone(&inspector);
        let call = spawn(move || caller.remove("docs", "a/b.txt", false));
        remote.answer("remove", json!(null));
        call.join().unwrap().unwrap();

        let files = inspector.get_data("docs").unwrap();
        let dir = files.iter().find(|file| file.path == "a").unwrap();
        assert!(dir.is_dir);
        assert_eq!(paths(&inspector), vec!["a", "c.txt"]);
    }

    #[test]
    fn recursive_remove_drops_subtree() {
        let remote = Remote::new();
        let inspector = inspector(&remote);
        load(
            &remote,
            &inspector,
            json!([
                {"path": "cache/x", "size": 1, "date": 1},
                {"path": "cache/y/z", "size": 1, "date": 1},
                {"path": "cached.txt", "size": 1, "date": 1}
            ]),
        );

        let caller = Arc::clone(&inspector);
        let call = spawn(move || caller.remove("docs", "/cache", true));
        let request = remote.answer("remove", json!(null));
        call.join().unwrap().unwrap();

        assert_eq!(request["data"]["data"]["recursive"], true);
        assert_eq!(paths(&inspector), vec!["cached.txt"]);
    }

    #[test]
    fn failed_write_leaves_listing_untouched() {
        let remote = Remote::new();
        let inspector = inspector(&remote);
        load(&remote, &inspector, json!([{"path": "a", "size": 0, "date": 1, "isDir": true}]));

        let caller = Arc::clone(&inspector);
        let call = spawn(move || caller.write("docs", "a/b.txt", b"x"));
        remote.fail("write", "permission denied");
        assert!(call.join().unwrap().is_err());

        assert_eq!(paths(&inspector), vec!["a"]);
    }

    #[test]
    fn read_is_never_cached() {
        let remote = Remote::new();
        let inspector = inspector(&remote);

        for _ in 0..2 {
            let caller = Arc::clone(&inspector);
            let call = spawn(move || caller.read("docs", "/c.txt"));
            let request = remote.answer("read", json!({"data": "aGk="}));
            assert_eq!(request["data"]["data"]["path"], "c.txt");
            assert_eq!(call.join().unwrap().unwrap(), b"hi".to_vec());
        }
    }
}
