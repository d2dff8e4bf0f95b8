//! Keys and query results shared by the batcher and the watcher.

use serde_json::Value;

/// Which side of a vstorage node a query reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathKind {
    /// The leaf value published at the path.
    Data,
    /// The names of the path's children.
    Children,
}

impl PathKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PathKind::Data => "data",
            PathKind::Children => "children",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "data" => Some(PathKind::Data),
            "children" => Some(PathKind::Children),
            _ => None,
        }
    }
}

impl std::fmt::Display for PathKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A watched vstorage address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchedKey {
    kind: PathKind,
    path: String,
}

impl WatchedKey {
    pub fn new(kind: PathKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    pub fn data(path: impl Into<String>) -> Self {
        Self::new(PathKind::Data, path)
    }

    pub fn children(path: impl Into<String>) -> Self {
        Self::new(PathKind::Children, path)
    }

    pub fn kind(&self) -> PathKind {
        self.kind
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Map key form: `"<kind>.<path>"`.
    pub fn canonical(&self) -> String {
        format!("{}.{}", self.kind, self.path)
    }

    /// Inverse of [`WatchedKey::canonical`].
    pub fn from_canonical(key: &str) -> Option<Self> {
        let (kind, path) = key.split_once('.')?;
        Some(Self::new(PathKind::parse(kind)?, path))
    }

    /// The `abci_query` path for this key.
    pub fn rpc_path(&self) -> String {
        format!("/custom/vstorage/{}/{}", self.kind, self.path)
    }
}

impl std::fmt::Display for WatchedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.kind, self.path)
    }
}

/// Marker used to decide whether a polled value actually changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeToken {
    /// Block height of the most recent write, when the node reports one.
    BlockHeight(u64),
    /// Serialized value, used when no height is available.
    Content(String),
}

/// Outcome of querying one key.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Value {
        value: Value,
        block_height: Option<u64>,
    },
    Error(String),
}

impl QueryResult {
    /// `None` for errors.
    pub fn change_token(&self) -> Option<ChangeToken> {
        match self {
            QueryResult::Value {
                block_height: Some(height),
                ..
            } => Some(ChangeToken::BlockHeight(*height)),
            QueryResult::Value { value, .. } => Some(ChangeToken::Content(value.to_string())),
            QueryResult::Error(_) => None,
        }
    }
}
