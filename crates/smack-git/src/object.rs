//! Git object encoding: `"<type> <len>\0"` headers, SHA-1 addressing, and
//! the tree/commit body formats.

use anyhow::{bail, Result};
use sha1::{Digest, Sha1};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Commit => "commit",
            ObjectType::Tree => "tree",
            ObjectType::Blob => "blob",
            ObjectType::Tag => "tag",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Ok(match name {
            "commit" => ObjectType::Commit,
            "tree" => ObjectType::Tree,
            "blob" => ObjectType::Blob,
            "tag" => ObjectType::Tag,
            other => bail!("unknown object type: {other}"),
        })
    }

    /// The three-bit type code used in pack object headers.
    pub fn pack_code(&self) -> u8 {
        match self {
            ObjectType::Commit => 1,
            ObjectType::Tree => 2,
            ObjectType::Blob => 3,
            ObjectType::Tag => 4,
        }
    }

    pub fn from_pack_code(code: u8) -> Result<Self> {
        Ok(match code {
            1 => ObjectType::Commit,
            2 => ObjectType::Tree,
            3 => ObjectType::Blob,
            4 => ObjectType::Tag,
            6 | 7 => bail!("delta objects not supported"),
            other => bail!("unknown pack object type code: {other}"),
        })
    }
}

/// `"<type> <len>\0" + content` — the byte sequence both hashed and stored.
pub fn encode_with_header(kind: ObjectType, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 24);
    out.extend_from_slice(kind.as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(content.len().to_string().as_bytes());
    out.push(0);
    out.extend_from_slice(content);
    out
}

/// SHA-1 of the header-framed object, hex-encoded.
pub fn object_id(kind: ObjectType, content: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(encode_with_header(kind, content));
    hex::encode(hasher.finalize())
}

/// Splits a header-framed object into its type and content.
pub fn decode_with_header(data: &[u8]) -> Result<(ObjectType, Vec<u8>)> {
    let Some(nul) = data.iter().position(|&b| b == 0) else {
        bail!("object header missing NUL terminator");
    };
    let header = std::str::from_utf8(&data[..nul])?;
    let Some((kind, len)) = header.split_once(' ') else {
        bail!("malformed object header: {header}");
    };
    let kind = ObjectType::from_name(kind)?;
    let len: usize = len.parse()?;
    let content = data[nul + 1..].to_vec();
    if content.len() != len {
        bail!("object length mismatch: header {} body {}", len, content.len());
    }
    Ok((kind, content))
}

/// One `(mode, name, id)` tree entry.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeEntry {
    pub mode: String,
    pub name: String,
    pub id: String,
}

/// Encodes a tree body. Entries must carry hex ids; git requires them
/// sorted by name, which the caller guarantees.
pub fn encode_tree(entries: &[TreeEntry]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for entry in entries {
        out.extend_from_slice(entry.mode.as_bytes());
        out.push(b' ');
        out.extend_from_slice(entry.name.as_bytes());
        out.push(0);
        out.extend_from_slice(&hex::decode(&entry.id)?);
    }
    Ok(out)
}

pub fn decode_tree(content: &[u8]) -> Result<Vec<TreeEntry>> {
    let mut entries = Vec::new();
    let mut pos = 0;

    while pos < content.len() {
        let Some(space) = content[pos..].iter().position(|&b| b == b' ') else {
            bail!("tree entry missing mode terminator");
        };
        let mode = std::str::from_utf8(&content[pos..pos + space])?.to_string();
        pos += space + 1;

        let Some(nul) = content[pos..].iter().position(|&b| b == 0) else {
            bail!("tree entry missing name terminator");
        };
        let name = std::str::from_utf8(&content[pos..pos + nul])?.to_string();
        pos += nul + 1;

        if pos + 20 > content.len() {
            bail!("tree entry truncated before object id");
        }
        let id = hex::encode(&content[pos..pos + 20]);
        pos += 20;

        entries.push(TreeEntry { mode, name, id });
    }

    Ok(entries)
}

/// Encodes a commit body pointing at `tree_id` with no parents, authored
/// and committed by the server identity.
pub fn encode_commit(tree_id: &str, message: &str, timestamp: i64) -> Vec<u8> {
    let signature = format!("Smack <smack@example.com> {timestamp} +0000");
    format!(
        "tree {tree_id}\nauthor {signature}\ncommitter {signature}\n\n{message}\n"
    )
    .into_bytes()
}

/// Pulls the tree id and parent ids out of a commit body.
pub fn parse_commit(content: &[u8]) -> Result<(String, Vec<String>)> {
    let text = std::str::from_utf8(content)?;
    let mut tree = None;
    let mut parents = Vec::new();

    for line in text.lines() {
        if line.is_empty() {
            break; // headers end at the blank line before the message
        }
        if let Some(id) = line.strip_prefix("tree ") {
            tree = Some(id.to_string());
        } else if let Some(id) = line.strip_prefix("parent ") {
            parents.push(id.to_string());
        }
    }

    match tree {
        Some(tree) => Ok((tree, parents)),
        None => bail!("commit has no tree header"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_ids_match_git() {
        // `echo -n 'hello' | git hash-object --stdin`
        assert_eq!(
            object_id(ObjectType::Blob, b"hello"),
            "b6fc4c620b67d95f953a5c1c1230aaab5db5a1b0"
        );
    }

    #[test]
    fn header_frames_round_trip() {
        let framed = encode_with_header(ObjectType::Blob, b"abc");
        assert_eq!(&framed[..9], b"blob 3\0ab");
        let (kind, content) = decode_with_header(&framed).unwrap();
        assert_eq!(kind, ObjectType::Blob);
        assert_eq!(content, b"abc");
    }

    #[test]
    fn trees_round_trip() {
        let entries = vec![
            TreeEntry {
                mode: "100644".into(),
                name: "index.html".into(),
                id: "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".into(),
            },
            TreeEntry {
                mode: "100644".into(),
                name: "script.js".into(),
                id: "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb".into(),
            },
        ];
        let encoded = encode_tree(&entries).unwrap();
        assert_eq!(decode_tree(&encoded).unwrap(), entries);
    }

    #[test]
    fn commits_parse_tree_and_parents() {
        let body = encode_commit("c".repeat(40).as_str(), "seed", 1700000000);
        let (tree, parents) = parse_commit(&body).unwrap();
        assert_eq!(tree, "c".repeat(40));
        assert!(parents.is_empty());

        let with_parent = format!(
            "tree {}\nparent {}\nauthor A <a@b> 0 +0000\ncommitter A <a@b> 0 +0000\n\nmsg\n",
            "d".repeat(40),
            "e".repeat(40)
        );
        let (tree, parents) = parse_commit(with_parent.as_bytes()).unwrap();
        assert_eq!(tree, "d".repeat(40));
        assert_eq!(parents, vec!["e".repeat(40)]);
    }

    #[test]
    fn delta_pack_codes_are_rejected() {
        assert!(ObjectType::from_pack_code(6).is_err());
        assert!(ObjectType::from_pack_code(7).is_err());
        let err = ObjectType::from_pack_code(6).unwrap_err();
        assert!(err.to_string().contains("delta objects not supported"));
    }
}
