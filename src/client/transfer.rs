use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::{AppError, AppResult};

const VERSION: &str = "HTTP/1.0";
const HEADER_END: &str = "\r\n\r\n";

/// Asks the peer of a private link for one of its shared files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRequest {
    path: String,
}

impl FileRequest {
    pub fn new(path: impl Into<String>) -> Self {
        FileRequest { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn to_text(&self) -> String {
        format!("GET {} {}{}", self.path, VERSION, HEADER_END)
    }

    pub fn parse(text: &str) -> AppResult<FileRequest> {
        let path = text
            .strip_prefix("GET ")
            .and_then(|rest| rest.strip_suffix(HEADER_END))
            .and_then(|rest| rest.strip_suffix(VERSION))
            .and_then(|rest| rest.strip_suffix(' '))
            .filter(|path| !path.is_empty())
            .ok_or_else(|| AppError::InvalidValue(format!("file request: {:?}", text)))?;
        Ok(FileRequest::new(path))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileResponse {
    Found { body: String },
    NotFound,
}

impl FileResponse {
    pub fn to_text(&self) -> String {
        match self {
            FileResponse::Found { body } => format!(
                "{} 200 OK\r\nContent-Length: {}{}{}",
                VERSION,
                body.len(),
                HEADER_END,
                body
            ),
            FileResponse::NotFound => {
                format!("{} 404 Not Found\r\nContent-Length: 0{}", VERSION, HEADER_END)
            }
        }
    }

    pub fn parse(text: &str) -> AppResult<FileResponse> {
        let invalid = || AppError::InvalidValue(format!("file response: {:?}", text));
        let (head, body) = text.split_once(HEADER_END).ok_or_else(invalid)?;
        let mut lines = head.split("\r\n");
        let status = lines.next().ok_or_else(invalid)?;
        let content_length = lines
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .ok_or_else(invalid)?;
        if content_length != body.len() {
            return Err(invalid());
        }

        match status.strip_prefix(VERSION).map(str::trim) {
            Some(status) if status.starts_with("200") => Ok(FileResponse::Found {
                body: body.to_string(),
            }),
            Some(status) if status.starts_with("404") => Ok(FileResponse::NotFound),
            _ => Err(invalid()),
        }
    }
}

/// The directory a client shares with its private link peers.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reads `path` relative to the root. Paths that could leave the root are
    /// treated as missing.
    pub fn lookup(&self, path: &str) -> Option<String> {
        let relative = Path::new(path);
        if !relative
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
        {
            debug!(path, "refusing path outside the shared directory");
            return None;
        }
        match fs::read_to_string(self.root.join(relative)) {
            Ok(body) => Some(body),
            Err(err) => {
                debug!(path, "shared file unavailable: {}", err);
                None
            }
        }
    }

    pub fn respond(&self, request: &FileRequest) -> FileResponse {
        match self.lookup(request.path()) {
            Some(body) => FileResponse::Found { body },
            None => FileResponse::NotFound,
        }
    }
}
