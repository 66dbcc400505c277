//! Git commit objects: building the signed payload and taking raw objects
//! apart again.
//!
//! The signature travels in the `gpgsig` header. The signed payload is the
//! object with that header (and its continuation lines) removed, which is
//! the same convention git uses for its own signed commits.

use serde::Serialize;

use crate::error::{EngineError, EngineResult};

const SIGNATURE_HEADER: &str = "gpgsig";

/// Fields of a commit before it is signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitPayload {
    pub tree: String,
    pub parents: Vec<String>,
    /// `Name <email>` without timestamp.
    pub author: String,
    pub committer: String,
    /// Seconds since the epoch, recorded in UTC.
    pub timestamp: i64,
    pub message: String,
}

impl CommitPayload {
    /// The exact bytes that get signed.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.render(None).into_bytes()
    }

    /// The full object with `armored` embedded as the signature header.
    pub fn to_signed_bytes(&self, armored: &str) -> Vec<u8> {
        self.render(Some(armored)).into_bytes()
    }

    fn render(&self, signature: Option<&str>) -> String {
        let mut out = format!("tree {}\n", self.tree);
        for parent in &self.parents {
            out.push_str(&format!("parent {parent}\n"));
        }
        out.push_str(&format!("author {} {} +0000\n", self.author, self.timestamp));
        out.push_str(&format!(
            "committer {} {} +0000\n",
            self.committer, self.timestamp
        ));
        if let Some(armored) = signature {
            let folded: Vec<&str> = armored.trim_end_matches('\n').split('\n').collect();
            out.push_str(&format!("{SIGNATURE_HEADER} {}\n", folded.join("\n ")));
        }
        out.push('\n');
        out.push_str(&self.message);
        if !self.message.ends_with('\n') {
            out.push('\n');
        }
        out
    }
}

/// A commit as read back from the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawCommit {
    pub hash: String,
    pub tree: String,
    /// Raw `author` header value, including timestamp and timezone.
    pub author: String,
    pub committer: String,
    pub message: String,
    /// Unfolded signature header, if the commit carries one.
    pub signature: Option<String>,
    /// Object bytes with the signature header removed.
    #[serde(skip)]
    pub payload: Vec<u8>,
}

impl RawCommit {
    /// Split a raw commit object into its parts.
    pub fn parse(hash: &str, object: &[u8]) -> EngineResult<Self> {
        let split = object
            .windows(2)
            .position(|w| w == b"\n\n")
            .ok_or_else(|| EngineError::MalformedObject(format!("{hash}: no header terminator")))?;
        let (headers, body) = (&object[..split], &object[split + 2..]);

        let mut payload = Vec::with_capacity(object.len());
        let mut tree = None;
        let mut author = None;
        let mut committer = None;
        let mut signature: Option<Vec<String>> = None;
        let mut in_signature = false;

        for line in headers.split(|b| *b == b'\n') {
            if in_signature {
                if let Some(continuation) = line.strip_prefix(b" ") {
                    if let Some(lines) = signature.as_mut() {
                        lines.push(String::from_utf8_lossy(continuation).into_owned());
                    }
                    continue;
                }
                in_signature = false;
            }

            let text = String::from_utf8_lossy(line);
            if let Some(first) = text.strip_prefix("gpgsig ") {
                signature = Some(vec![first.to_string()]);
                in_signature = true;
                continue;
            }
            if let Some(value) = text.strip_prefix("tree ") {
                tree = Some(value.to_string());
            } else if let Some(value) = text.strip_prefix("author ") {
                author = Some(value.to_string());
            } else if let Some(value) = text.strip_prefix("committer ") {
                committer = Some(value.to_string());
            }

            payload.extend_from_slice(line);
            payload.push(b'\n');
        }
        payload.push(b'\n');
        payload.extend_from_slice(body);

        let message = String::from_utf8_lossy(body)
            .trim_end_matches('\n')
            .to_string();

        Ok(RawCommit {
            hash: hash.to_string(),
            tree: tree.ok_or_else(|| EngineError::MalformedObject(format!("{hash}: no tree")))?,
            author: author
                .ok_or_else(|| EngineError::MalformedObject(format!("{hash}: no author")))?,
            committer: committer
                .ok_or_else(|| EngineError::MalformedObject(format!("{hash}: no committer")))?,
            message,
            signature: signature.map(|lines| lines.join("\n")),
            payload,
        })
    }
}
