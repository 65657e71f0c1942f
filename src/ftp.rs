use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream};

use crate::error::InventoryError;
use crate::lister::{DirectoryLister, EntryKind, ListingEntry, RemotePath};

pub trait FtpClient: Send + Sync {
    /// Raw MLSD lines for `directory`.
    fn mlsd(&self, directory: &str) -> Result<Vec<String>, InventoryError>;
    fn retrieve(&self, path: &str, destination: &Path) -> Result<(), InventoryError>;
}

impl<C: FtpClient> FtpClient for Arc<C> {
    fn mlsd(&self, directory: &str) -> Result<Vec<String>, InventoryError> {
        (**self).mlsd(directory)
    }

    fn retrieve(&self, path: &str, destination: &Path) -> Result<(), InventoryError> {
        (**self).retrieve(path, destination)
    }
}

#[derive(Debug, Clone)]
pub struct FtpCredentials {
    pub host: String,
    pub user: String,
    pub password: String,
}

/// One control connection, opened lazily and reopened after a failure.
pub struct FtpSessionClient {
    credentials: FtpCredentials,
    stream: Mutex<Option<FtpStream>>,
}

impl FtpSessionClient {
    pub fn new(credentials: FtpCredentials) -> Self {
        Self {
            credentials,
            stream: Mutex::new(None),
        }
    }

    fn connect(&self) -> Result<FtpStream, FtpError> {
        let address = if self.credentials.host.contains(':') {
            self.credentials.host.clone()
        } else {
            format!("{}:21", self.credentials.host)
        };
        let mut stream = FtpStream::connect(address)?;
        stream.login(
            self.credentials.user.as_str(),
            self.credentials.password.as_str(),
        )?;
        stream.transfer_type(FileType::Binary)?;
        Ok(stream)
    }

    fn with_stream<T, F>(&self, mut op: F) -> Result<T, FtpError>
    where
        F: FnMut(&mut FtpStream) -> Result<T, FtpError>,
    {
        let mut guard = self
            .stream
            .lock()
            .map_err(|_| FtpError::ConnectionError(io::Error::other("ftp session poisoned")))?;
        if guard.is_none() {
            *guard = Some(self.connect()?);
        }
        let Some(stream) = guard.as_mut() else {
            return Err(FtpError::ConnectionError(io::Error::other(
                "ftp session unavailable",
            )));
        };
        let result = op(stream);
        if result.is_err() {
            *guard = None;
        }
        result
    }
}

impl FtpClient for FtpSessionClient {
    fn mlsd(&self, directory: &str) -> Result<Vec<String>, InventoryError> {
        self.with_stream(|stream| stream.mlsd(Some(directory)))
            .map_err(|err| InventoryError::Listing {
                container: directory.to_string(),
                message: err.to_string(),
            })
    }

    fn retrieve(&self, path: &str, destination: &Path) -> Result<(), InventoryError> {
        let mut file = File::create(destination)
            .map_err(|err| InventoryError::Filesystem(err.to_string()))?;
        self.with_stream(|stream| {
            stream.retr(path, |reader| {
                io::copy(reader, &mut file).map_err(FtpError::ConnectionError)
            })
        })
        .map(|_| ())
        .map_err(|err| InventoryError::Download {
            path: path.to_string(),
            message: err.to_string(),
        })
    }
}

impl Drop for FtpSessionClient {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.stream.lock() {
            if let Some(mut stream) = guard.take() {
                let _ = stream.quit();
            }
        }
    }
}

/// Lists an FTP directory tree rooted at `root`.
pub struct FtpLister<C: FtpClient> {
    client: C,
    root: String,
}

impl<C: FtpClient> FtpLister<C> {
    pub fn new(client: C, root: &str) -> Self {
        let trimmed = root.trim().trim_end_matches('/');
        Self {
            client,
            root: trimmed.to_string(),
        }
    }

    pub fn directory(&self, path: &RemotePath) -> String {
        if path.is_root() {
            self.root.clone()
        } else {
            format!("{}/{}", self.root, path)
        }
    }

    fn entries(&self, path: &RemotePath) -> Result<Vec<ListingEntry>, InventoryError> {
        let directory = self.directory(path);
        let lines = self.client.mlsd(&directory)?;
        let mut entries = Vec::with_capacity(lines.len());
        for line in lines {
            match parse_mlsd_line(&line) {
                Some(entry) => entries.push(entry),
                None => {
                    if !is_navigation_entry(&line) {
                        tracing::debug!(directory = %directory, line = %line, "skipping MLSD entry");
                    }
                }
            }
        }
        Ok(entries)
    }
}

impl<C: FtpClient> DirectoryLister for FtpLister<C> {
    fn list(&self, path: &RemotePath) -> Result<Vec<ListingEntry>, InventoryError> {
        Ok(self
            .entries(path)?
            .into_iter()
            .filter(|entry| entry.kind == EntryKind::Container)
            .collect())
    }

    fn list_files(&self, path: &RemotePath) -> Result<Vec<String>, InventoryError> {
        let directory = self.directory(path);
        Ok(self
            .entries(path)?
            .into_iter()
            .filter(|entry| entry.kind == EntryKind::File)
            .map(|entry| format!("{directory}/{}", entry.name))
            .collect())
    }

    fn describe(&self, path: &RemotePath) -> String {
        self.directory(path)
    }
}

/// Parses one MLSD fact line (`type=dir;modify=...; name`). Only `dir` and
/// `file` entries are kept.
pub fn parse_mlsd_line(line: &str) -> Option<ListingEntry> {
    let (facts, name) = line.trim_end_matches(['\r', '\n']).split_once(' ')?;
    if name.is_empty() {
        return None;
    }
    let kind = facts
        .split(';')
        .filter_map(|fact| fact.split_once('='))
        .find(|(key, _)| key.eq_ignore_ascii_case("type"))
        .map(|(_, value)| value.to_ascii_lowercase())?;
    match kind.as_str() {
        "dir" => Some(ListingEntry::container(name)),
        "file" => Some(ListingEntry::file(name)),
        _ => None,
    }
}

fn is_navigation_entry(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower.contains("type=cdir") || lower.contains("type=pdir")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn parses_mlsd_facts() {
        assert_eq!(
            parse_mlsd_line("type=dir;modify=20230411093000;perm=el; refD1"),
            Some(ListingEntry::container("refD1"))
        );
        assert_eq!(
            parse_mlsd_line("size=1024;type=file;modify=20230411093000; o3_AmonZ_x.nc\r\n"),
            Some(ListingEntry::file("o3_AmonZ_x.nc"))
        );
        assert_eq!(parse_mlsd_line("type=cdir;perm=el; ."), None);
        assert_eq!(parse_mlsd_line("garbage"), None);
    }

    struct CannedFtp {
        listings: HashMap<String, Vec<String>>,
    }

    impl FtpClient for CannedFtp {
        fn mlsd(&self, directory: &str) -> Result<Vec<String>, InventoryError> {
            self.listings
                .get(directory)
                .cloned()
                .ok_or_else(|| InventoryError::Listing {
                    container: directory.to_string(),
                    message: "550 No such directory".to_string(),
                })
        }

        fn retrieve(&self, path: &str, _destination: &Path) -> Result<(), InventoryError> {
            Err(InventoryError::Download {
                path: path.to_string(),
                message: "not used".to_string(),
            })
        }
    }

    #[test]
    fn lists_directories_and_files_separately() {
        let mut listings = HashMap::new();
        listings.insert(
            "/badc/ccmi/v1".to_string(),
            vec![
                "type=cdir;perm=el; .".to_string(),
                "type=dir;perm=el; extra".to_string(),
                "type=file;size=10; ta_AmonZ_CMAM_refD1_r1_gnz_1960.nc".to_string(),
            ],
        );
        let lister = FtpLister::new(CannedFtp { listings }, "/badc/ccmi/");
        let path = RemotePath::root().join("v1");

        let dirs = lister.list(&path).unwrap();
        assert_eq!(dirs, vec![ListingEntry::container("extra")]);

        let files = lister.list_files(&path).unwrap();
        assert_eq!(files, vec!["/badc/ccmi/v1/ta_AmonZ_CMAM_refD1_r1_gnz_1960.nc"]);
        assert_eq!(lister.describe(&RemotePath::root()), "/badc/ccmi");
    }
}
