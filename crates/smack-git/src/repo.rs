//! A minimal bare repository: zlib-deflated loose objects fanned out under
//! `objects/`, plain ref files under `refs/`, and a symbolic `HEAD`.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use flate2::write::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use tracing::info;

use crate::object::{
    decode_tree, decode_with_header, encode_commit, encode_tree, encode_with_header, object_id,
    parse_commit, ObjectType, TreeEntry,
};
use crate::pkt::ZERO_ID;

pub struct Repository {
    path: PathBuf,
}

impl Repository {
    /// Opens an existing repository, or `None` if nothing is there yet.
    pub fn open(path: &Path) -> Option<Self> {
        path.join("HEAD").exists().then(|| Self {
            path: path.to_path_buf(),
        })
    }

    /// Initializes an empty bare repository.
    pub fn init(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path.join("objects"))?;
        std::fs::create_dir_all(path.join("refs/heads"))?;
        std::fs::write(path.join("HEAD"), "ref: refs/heads/main\n")?;
        info!("Initialized bare repository at {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    // -- Object database --

    pub fn store_object(&self, kind: ObjectType, content: &[u8]) -> Result<String> {
        let id = object_id(kind, content);
        let file = self.object_path(&id);
        if file.exists() {
            return Ok(id);
        }

        std::fs::create_dir_all(file.parent().expect("object path has a parent"))?;

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&encode_with_header(kind, content))?;
        std::fs::write(&file, encoder.finish()?)?;

        Ok(id)
    }

    pub fn read_object(&self, id: &str) -> Result<(ObjectType, Vec<u8>)> {
        let compressed = std::fs::read(self.object_path(id))
            .with_context(|| format!("object not found: {id}"))?;

        let mut decoder = ZlibDecoder::new(Vec::new());
        decoder.write_all(&compressed)?;
        let raw = decoder.finish()?;

        decode_with_header(&raw)
    }

    pub fn has_object(&self, id: &str) -> bool {
        self.object_path(id).exists()
    }

    fn object_path(&self, id: &str) -> PathBuf {
        self.path.join("objects").join(&id[..2]).join(&id[2..])
    }

    // -- Refs --

    /// Writes (or, for the zero id, deletes) a ref. Ref names are
    /// path-sanitized before touching the filesystem.
    pub fn set_ref(&self, name: &str, id: &str) -> Result<()> {
        let file = self.ref_path(name)?;

        if id == ZERO_ID {
            if file.exists() {
                std::fs::remove_file(file)?;
            }
            return Ok(());
        }

        std::fs::create_dir_all(file.parent().expect("ref path has a parent"))?;
        std::fs::write(file, format!("{id}\n"))?;
        Ok(())
    }

    pub fn ref_id(&self, name: &str) -> Result<Option<String>> {
        let file = self.ref_path(name)?;
        match std::fs::read_to_string(file) {
            Ok(content) => Ok(Some(content.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn ref_path(&self, name: &str) -> Result<PathBuf> {
        if name.split('/').any(|part| {
            part.is_empty() || part == "." || part == ".." || part.contains('\\')
        }) {
            bail!("invalid ref name: {name}");
        }
        Ok(self.path.join(name))
    }

    /// All non-symbolic refs as (name, id), sorted by name.
    pub fn refs(&self) -> Result<Vec<(String, String)>> {
        let mut refs = Vec::new();
        let heads = self.path.join("refs/heads");
        collect_refs(&heads, "refs/heads", &mut refs)?;
        refs.sort();
        Ok(refs)
    }

    /// Resolves the symbolic HEAD to an object id, if the target exists.
    pub fn head(&self) -> Result<Option<String>> {
        let head = std::fs::read_to_string(self.path.join("HEAD"))?;
        let head = head.trim();
        match head.strip_prefix("ref: ") {
            Some(target) => self.ref_id(target),
            None => Ok(Some(head.to_string())),
        }
    }

    // -- Store sync --

    /// Writes the app triplet as three blobs, one tree, one commit, and
    /// points `refs/heads/main` (and HEAD) at it.
    pub fn commit_snapshot(&self, html: &str, css: &str, js: &str, timestamp: i64) -> Result<String> {
        let html_id = self.store_object(ObjectType::Blob, html.as_bytes())?;
        let css_id = self.store_object(ObjectType::Blob, css.as_bytes())?;
        let js_id = self.store_object(ObjectType::Blob, js.as_bytes())?;

        // Tree entries sorted by name, as git requires.
        let tree = encode_tree(&[
            TreeEntry {
                mode: "100644".into(),
                name: "index.html".into(),
                id: html_id,
            },
            TreeEntry {
                mode: "100644".into(),
                name: "script.js".into(),
                id: js_id,
            },
            TreeEntry {
                mode: "100644".into(),
                name: "styles.css".into(),
                id: css_id,
            },
        ])?;
        let tree_id = self.store_object(ObjectType::Tree, &tree)?;

        let commit = encode_commit(&tree_id, "Sync from database", timestamp);
        let commit_id = self.store_object(ObjectType::Commit, &commit)?;

        self.set_ref("refs/heads/main", &commit_id)?;
        Ok(commit_id)
    }

    /// Reads the blobs of the tree at HEAD, keyed by filename.
    pub fn head_tree_blobs(&self) -> Result<HashMap<String, Vec<u8>>> {
        let Some(commit_id) = self.head()? else {
            bail!("repository has no HEAD commit");
        };

        let (kind, commit) = self.read_object(&commit_id)?;
        if kind != ObjectType::Commit {
            bail!("HEAD does not point at a commit");
        }
        let (tree_id, _) = parse_commit(&commit)?;

        let (kind, tree) = self.read_object(&tree_id)?;
        if kind != ObjectType::Tree {
            bail!("commit tree is not a tree object");
        }

        let mut blobs = HashMap::new();
        for entry in decode_tree(&tree)? {
            if let Ok((ObjectType::Blob, content)) = self.read_object(&entry.id) {
                blobs.insert(entry.name, content);
            }
        }
        Ok(blobs)
    }

    /// The transitive closure of commits, trees, and blobs reachable from
    /// the wanted ids, materialized into an owned map (no recursion).
    pub fn collect_reachable(
        &self,
        wants: &[String],
    ) -> Result<HashMap<String, (ObjectType, Vec<u8>)>> {
        let mut objects: HashMap<String, (ObjectType, Vec<u8>)> = HashMap::new();
        let mut pending: Vec<String> = wants.to_vec();

        while let Some(id) = pending.pop() {
            if objects.contains_key(&id) {
                continue;
            }
            let (kind, content) = self.read_object(&id)?;

            match kind {
                ObjectType::Commit => {
                    let (tree, parents) = parse_commit(&content)?;
                    pending.push(tree);
                    pending.extend(parents);
                }
                ObjectType::Tree => {
                    for entry in decode_tree(&content)? {
                        pending.push(entry.id);
                    }
                }
                ObjectType::Blob | ObjectType::Tag => {}
            }

            objects.insert(id, (kind, content));
        }

        Ok(objects)
    }
}

fn collect_refs(dir: &Path, prefix: &str, out: &mut Vec<(String, String)>) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let full = format!("{prefix}/{name}");
        if entry.file_type()?.is_dir() {
            collect_refs(&entry.path(), &full, out)?;
        } else {
            let id = std::fs::read_to_string(entry.path())?;
            out.push((full, id.trim().to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_repo() -> Repository {
        let mut path = std::env::temp_dir();
        path.push(format!("smack-git-test-{}", Uuid::new_v4()));
        Repository::init(&path).expect("init repo")
    }

    #[test]
    fn open_returns_none_until_initialized() {
        let mut path = std::env::temp_dir();
        path.push(format!("smack-git-missing-{}", Uuid::new_v4()));
        assert!(Repository::open(&path).is_none());

        Repository::init(&path).unwrap();
        assert!(Repository::open(&path).is_some());
    }

    #[test]
    fn objects_round_trip_through_loose_storage() {
        let repo = temp_repo();
        let id = repo.store_object(ObjectType::Blob, b"<h1>hi</h1>").unwrap();
        assert!(repo.has_object(&id));

        let (kind, content) = repo.read_object(&id).unwrap();
        assert_eq!(kind, ObjectType::Blob);
        assert_eq!(content, b"<h1>hi</h1>");

        // Idempotent store.
        let again = repo.store_object(ObjectType::Blob, b"<h1>hi</h1>").unwrap();
        assert_eq!(id, again);
    }

    #[test]
    fn snapshot_seeds_head_and_main() {
        let repo = temp_repo();
        let commit_id = repo
            .commit_snapshot("<h1>app</h1>", "body{}", "console.log(1)", 1700000000)
            .unwrap();

        assert_eq!(repo.head().unwrap().as_deref(), Some(commit_id.as_str()));
        assert_eq!(
            repo.ref_id("refs/heads/main").unwrap().as_deref(),
            Some(commit_id.as_str())
        );

        let blobs = repo.head_tree_blobs().unwrap();
        assert_eq!(blobs["index.html"], b"<h1>app</h1>");
        assert_eq!(blobs["styles.css"], b"body{}");
        assert_eq!(blobs["script.js"], b"console.log(1)");
    }

    #[test]
    fn reachable_closure_has_commit_tree_and_blobs() {
        let repo = temp_repo();
        let commit_id = repo.commit_snapshot("h", "c", "j", 1700000000).unwrap();

        let objects = repo.collect_reachable(&[commit_id.clone()]).unwrap();
        // One commit, one tree, three blobs.
        assert_eq!(objects.len(), 5);
        assert!(matches!(objects[&commit_id].0, ObjectType::Commit));
        assert_eq!(
            objects.values().filter(|(k, _)| *k == ObjectType::Blob).count(),
            3
        );
    }

    #[test]
    fn zero_id_deletes_refs_and_bad_names_are_rejected() {
        let repo = temp_repo();
        repo.commit_snapshot("h", "c", "j", 1700000000).unwrap();

        assert!(repo.set_ref("refs/heads/../escape", "a".repeat(40).as_str()).is_err());

        repo.set_ref("refs/heads/main", ZERO_ID).unwrap();
        assert!(repo.ref_id("refs/heads/main").unwrap().is_none());
        assert!(repo.refs().unwrap().is_empty());
    }
}
