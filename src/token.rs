//! Credential store file and provisioning operations.
//!
//! The store is a pretty-printed JSON object mapping client ids to their
//! current credential:
//!
//! ```text
//! {
//!   "alice": "Zm9v...",
//!   "bob42": "YmFy..."
//! }
//! ```
//!
//! Every provisioning operation is idempotent on unchanged input. Writes go
//! through a temporary file and a rename so readers never see a partial file.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use tempfile::NamedTempFile;

use crate::identity::{ClientId, CredentialSource};
use crate::{CourseDropError, Result};

/// Client id -> credential, ordered by client id.
pub type TokenMap = BTreeMap<String, String>;

/// Random bytes per credential (256 bits).
pub const TOKEN_BYTES: usize = 32;

/// Generate a new URL-safe credential.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Groups of client ids that share one credential value.
///
/// Any group here is a configuration error: only the first id of each group
/// (in client-id order) can ever authenticate.
pub fn find_duplicates(tokens: &TokenMap) -> Vec<Vec<String>> {
    let mut by_token: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (id, token) in tokens {
        by_token.entry(token.as_str()).or_default().push(id.clone());
    }
    by_token
        .into_values()
        .filter(|ids| ids.len() > 1)
        .collect()
}

/// Result of [`TokenStore::add`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddOutcome {
    /// The client's credential.
    pub token: String,
    /// Whether the client was newly registered.
    pub created: bool,
}

/// Result of [`TokenStore::bulk_import`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Newly registered clients.
    pub added: usize,
    /// Lines naming an already registered client.
    pub existing: usize,
    /// Lines that are not valid client ids.
    pub rejected: Vec<String>,
    /// Registered clients after the import.
    pub total: usize,
}

/// JSON-file backed credential store.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    /// Create a store backed by the file at `path` (which need not exist yet).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the mapping. A missing file is an empty store.
    pub fn load(&self) -> Result<TokenMap> {
        match fs::read_to_string(&self.path) {
            Ok(content) => {
                let tokens: TokenMap = serde_json::from_str(&content).map_err(|e| {
                    CourseDropError::TokenStore(format!(
                        "invalid JSON in {}: {e}",
                        self.path.display()
                    ))
                })?;
                Ok(tokens)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "Token file not found, treating as empty");
                Ok(TokenMap::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically replace the backing file with `tokens`.
    pub fn save(&self, tokens: &TokenMap) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut content = serde_json::to_string_pretty(tokens)?;
        content.push('\n');

        // Uniquely named and created 0600
        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(content.as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| e.error)?;

        tracing::debug!(path = %self.path.display(), clients = tokens.len(), "Token file saved");
        Ok(())
    }

    /// Register a client. An already registered client keeps its credential.
    pub fn add(&self, id: &ClientId) -> Result<AddOutcome> {
        let mut tokens = self.load()?;

        if let Some(token) = tokens.get(id.as_str()) {
            return Ok(AddOutcome {
                token: token.clone(),
                created: false,
            });
        }

        let token = generate_token();
        tokens.insert(id.to_string(), token.clone());
        self.save(&tokens)?;
        tracing::info!(client = %id, "Client registered");

        Ok(AddOutcome {
            token,
            created: true,
        })
    }

    /// Issue a fresh credential, registering the client if needed.
    pub fn rotate(&self, id: &ClientId) -> Result<String> {
        let mut tokens = self.load()?;
        let token = generate_token();
        tokens.insert(id.to_string(), token.clone());
        self.save(&tokens)?;
        tracing::info!(client = %id, "Credential rotated");
        Ok(token)
    }

    /// Revoke a client's credential. Returns `false` if it was not registered.
    pub fn remove(&self, id: &ClientId) -> Result<bool> {
        let mut tokens = self.load()?;
        if tokens.remove(id.as_str()).is_none() {
            return Ok(false);
        }
        self.save(&tokens)?;
        tracing::info!(client = %id, "Client removed");
        Ok(true)
    }

    /// Registered client ids, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        Ok(self.load()?.into_keys().collect())
    }

    /// Register every id in `lines` (one per line; blanks and `#` comments skipped).
    pub fn bulk_import<'a>(&self, lines: impl IntoIterator<Item = &'a str>) -> Result<ImportSummary> {
        let mut tokens = self.load()?;
        let mut summary = ImportSummary::default();
        let mut seen = BTreeSet::new();

        for line in lines {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let id = match ClientId::parse(line) {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!(line = %line, error = %e, "Skipping invalid client id");
                    summary.rejected.push(line.to_string());
                    continue;
                }
            };

            if tokens.contains_key(id.as_str()) || !seen.insert(id.clone()) {
                summary.existing += 1;
                continue;
            }

            tokens.insert(id.to_string(), generate_token());
            summary.added += 1;
        }

        if summary.added > 0 {
            self.save(&tokens)?;
        }
        summary.total = tokens.len();

        Ok(summary)
    }

    /// Register every id listed in the file at `path`.
    pub fn bulk_import_file(&self, path: impl AsRef<Path>) -> Result<ImportSummary> {
        let content = fs::read_to_string(path.as_ref())?;
        self.bulk_import(content.lines())
    }

    /// Write `client_id,token` rows for distribution. Returns the row count.
    ///
    /// Nothing is written when the store is empty.
    pub fn export_csv(&self, output: impl AsRef<Path>) -> Result<usize> {
        let tokens = self.load()?;
        if tokens.is_empty() {
            return Ok(0);
        }

        let mut csv = String::from("client_id,token\n");
        for (id, token) in &tokens {
            csv.push_str(id);
            csv.push(',');
            csv.push_str(token);
            csv.push('\n');
        }
        fs::write(output.as_ref(), csv)?;

        Ok(tokens.len())
    }

    /// Groups of client ids sharing a credential (see [`find_duplicates`]).
    pub fn duplicate_credentials(&self) -> Result<Vec<Vec<String>>> {
        Ok(find_duplicates(&self.load()?))
    }
}

impl CredentialSource for TokenStore {
    fn load(&self) -> Result<TokenMap> {
        TokenStore::load(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_store() -> (TempDir, TokenStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = TokenStore::new(temp_dir.path().join("tokens").join("tokens.json"));
        (temp_dir, store)
    }

    fn id(raw: &str) -> ClientId {
        ClientId::parse(raw).unwrap()
    }

    #[test]
    fn test_generate_token_shape() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let (_temp_dir, store) = setup_store();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_load_corrupt_file_fails() {
        let (_temp_dir, store) = setup_store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "{ not json").unwrap();

        assert!(matches!(store.load(), Err(CourseDropError::TokenStore(_))));
    }

    #[test]
    fn test_add_is_idempotent() {
        let (_temp_dir, store) = setup_store();

        let first = store.add(&id("alice")).unwrap();
        assert!(first.created);

        let second = store.add(&id("ALICE")).unwrap();
        assert!(!second.created);
        assert_eq!(first.token, second.token);
        assert_eq!(store.list().unwrap(), vec!["alice".to_string()]);
    }

    #[test]
    fn test_rotate_replaces_token() {
        let (_temp_dir, store) = setup_store();

        let original = store.add(&id("alice")).unwrap().token;
        let rotated = store.rotate(&id("alice")).unwrap();

        assert_ne!(original, rotated);
        assert_eq!(store.load().unwrap()["alice"], rotated);
    }

    #[test]
    fn test_remove() {
        let (_temp_dir, store) = setup_store();
        store.add(&id("alice")).unwrap();

        assert!(store.remove(&id("alice")).unwrap());
        assert!(!store.remove(&id("alice")).unwrap());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_bulk_import() {
        let (_temp_dir, store) = setup_store();
        store.add(&id("alice")).unwrap();

        let input = "alice\nbob\n\n# comment\nCAROL\nbob\nnot valid!\n";
        let summary = store.bulk_import(input.lines()).unwrap();

        assert_eq!(summary.added, 2);
        assert_eq!(summary.existing, 2);
        assert_eq!(summary.rejected, vec!["not valid!".to_string()]);
        assert_eq!(summary.total, 3);
        assert_eq!(
            store.list().unwrap(),
            vec!["alice".to_string(), "bob".to_string(), "carol".to_string()]
        );

        // Re-running on the same input changes nothing
        let before = store.load().unwrap();
        let again = store.bulk_import(input.lines()).unwrap();
        assert_eq!(again.added, 0);
        assert_eq!(store.load().unwrap(), before);
    }

    #[test]
    fn test_bulk_import_file() {
        let (temp_dir, store) = setup_store();
        let roster = temp_dir.path().join("roster.txt");
        fs::write(&roster, "dave\neve\n").unwrap();

        let summary = store.bulk_import_file(&roster).unwrap();
        assert_eq!(summary.added, 2);
        assert_eq!(summary.total, 2);
    }

    #[test]
    fn test_export_csv() {
        let (temp_dir, store) = setup_store();
        let output = temp_dir.path().join("tokens.csv");

        assert_eq!(store.export_csv(&output).unwrap(), 0);
        assert!(!output.exists());

        store.add(&id("bob")).unwrap();
        store.add(&id("alice")).unwrap();

        assert_eq!(store.export_csv(&output).unwrap(), 2);
        let csv = fs::read_to_string(&output).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "client_id,token");
        assert!(lines[1].starts_with("alice,"));
        assert!(lines[2].starts_with("bob,"));
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let (_temp_dir, store) = setup_store();
        store.add(&id("alice")).unwrap();

        assert!(store.path().exists());
        let entries: Vec<_> = fs::read_dir(store.path().parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![store.path().file_name().unwrap().to_os_string()]);
    }

    #[test]
    fn test_concurrent_saves_never_tear_the_file() {
        let (_temp_dir, store) = setup_store();

        std::thread::scope(|scope| {
            for i in 0..8 {
                let store = &store;
                scope.spawn(move || {
                    let mut tokens = TokenMap::new();
                    tokens.insert(format!("client{i}"), generate_token());
                    store.save(&tokens).unwrap();
                });
            }
        });

        let tokens = store.load().unwrap();
        assert_eq!(tokens.len(), 1);
        let entries = fs::read_dir(store.path().parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_duplicate_credentials() {
        let (_temp_dir, store) = setup_store();
        let mut tokens = TokenMap::new();
        tokens.insert("alice".to_string(), "same".to_string());
        tokens.insert("bob".to_string(), "unique".to_string());
        tokens.insert("carol".to_string(), "same".to_string());
        store.save(&tokens).unwrap();

        let duplicates = store.duplicate_credentials().unwrap();
        assert_eq!(
            duplicates,
            vec![vec!["alice".to_string(), "carol".to_string()]]
        );
    }
}
