//! Typed interpretation of a request path.
//!
//! Zero segments address the server root, one segment a database (or a
//! server-level endpoint such as `_all_dbs`), and two or more a document or
//! sub-resource inside a database. Segments are percent-decoded, so a
//! database named `a/b` travels as `/a%2Fb`.

use std::fmt;

use percent_encoding::percent_decode_str;

use crate::error::PathError;

/// Prefixes of document ids that may span two path segments.
const PREFIXED_DOC_KINDS: [&str; 2] = ["_design", "_local"];

/// Resource addressed by a request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourcePath {
    /// `/`
    Root,
    /// `/_all_dbs`
    AllDatabases,
    /// `/_uuids`
    Uuids,
    /// `/<db>`
    Database(String),
    /// `/<db>/_all_docs`
    AllDocs(String),
    /// `/<db>/_changes`
    Changes(String),
    /// `/<db>/<doc-id>`, including `_design/<name>` and `_local/<name>`.
    Document { db: String, doc_id: String },
}

impl ResourcePath {
    /// Parses the path component of a request (any `?query` must already be
    /// stripped). A single trailing slash is ignored.
    pub fn parse(path: &str) -> Result<Self, PathError> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Ok(Self::Root);
        }

        let segments = trimmed
            .split('/')
            .enumerate()
            .map(|(i, raw)| decode_segment(i, raw))
            .collect::<Result<Vec<_>, _>>()?;

        match segments.as_slice() {
            [one] if one == "_all_dbs" => Ok(Self::AllDatabases),
            [one] if one == "_uuids" => Ok(Self::Uuids),
            [db] => Ok(Self::Database(db.clone())),
            [db, special] if special == "_all_docs" => Ok(Self::AllDocs(db.clone())),
            [db, special] if special == "_changes" => Ok(Self::Changes(db.clone())),
            [db, doc_id] => {
                if is_reserved_doc_id(doc_id) && !has_document_prefix(doc_id) {
                    return Err(PathError::Unsupported(path.to_string()));
                }
                Ok(Self::Document {
                    db: db.clone(),
                    doc_id: doc_id.clone(),
                })
            }
            [db, kind, name] if PREFIXED_DOC_KINDS.contains(&kind.as_str()) => Ok(Self::Document {
                db: db.clone(),
                doc_id: format!("{kind}/{name}"),
            }),
            _ => Err(PathError::Unsupported(path.to_string())),
        }
    }

    /// Database named by this path, if any.
    pub fn database(&self) -> Option<&str> {
        match self {
            Self::Root | Self::AllDatabases | Self::Uuids => None,
            Self::Database(db) | Self::AllDocs(db) | Self::Changes(db) => Some(db),
            Self::Document { db, .. } => Some(db),
        }
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => f.write_str("/"),
            Self::AllDatabases => f.write_str("/_all_dbs"),
            Self::Uuids => f.write_str("/_uuids"),
            Self::Database(db) => write!(f, "/{db}"),
            Self::AllDocs(db) => write!(f, "/{db}/_all_docs"),
            Self::Changes(db) => write!(f, "/{db}/_changes"),
            Self::Document { db, doc_id } => write!(f, "/{db}/{doc_id}"),
        }
    }
}

fn decode_segment(index: usize, raw: &str) -> Result<String, PathError> {
    if raw.is_empty() {
        return Err(PathError::EmptySegment(index));
    }
    percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| PathError::InvalidEncoding(raw.to_string()))
}

fn is_reserved_doc_id(doc_id: &str) -> bool {
    doc_id.starts_with('_')
}

fn has_document_prefix(doc_id: &str) -> bool {
    PREFIXED_DOC_KINDS
        .iter()
        .any(|kind| {
            doc_id
                .strip_prefix(kind)
                .is_some_and(|rest| rest.len() > 1 && rest.starts_with('/'))
        })
}
