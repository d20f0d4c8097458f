//! SQLite-backed identity store

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

use crate::error::{IdentityError, Result};
use crate::identity::{Identity, IdentityKind, IdentityStore};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS identities (
    id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    wallet_address TEXT,
    github_username TEXT,
    github_repo TEXT,
    birth_issue TEXT,
    wallet_verified INTEGER NOT NULL DEFAULT 0,
    repo_verified INTEGER NOT NULL DEFAULT 0,
    approved INTEGER NOT NULL DEFAULT 0,
    kind TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_identities_wallet
    ON identities (wallet_address) WHERE wallet_address IS NOT NULL AND wallet_address != '';
CREATE UNIQUE INDEX IF NOT EXISTS idx_identities_github
    ON identities (LOWER(github_username)) WHERE github_username IS NOT NULL AND github_username != '';
"#;

const COLUMNS: &str = "id, display_name, wallet_address, github_username, github_repo, \
     birth_issue, wallet_verified, repo_verified, approved, kind, created_at";

pub struct SqliteIdentityStore {
    conn: Mutex<Connection>,
}

impl SqliteIdentityStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.run_migrations()?;
        info!("Opened identity store at {}", path.as_ref().display());
        Ok(storage)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.run_migrations()?;
        Ok(storage)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn find_one(&self, filter: &str, value: &str) -> Result<Option<Identity>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM identities WHERE {} ORDER BY created_at, id LIMIT 1",
            COLUMNS, filter
        );
        let mut stmt = conn.prepare(&sql)?;
        let row = stmt.query_row(params![value], row_to_identity).optional()?;
        row.transpose()
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| IdentityError::Storage(format!("bad timestamp '{}': {}", raw, e)))
}

/// Rows decode in two steps so malformed values become `Storage` errors
/// instead of panics.
fn row_to_identity(row: &Row<'_>) -> rusqlite::Result<Result<Identity>> {
    let id: String = row.get(0)?;
    let kind: String = row.get(9)?;
    let created_at: String = row.get(10)?;

    let display_name: String = row.get(1)?;
    let wallet_address: Option<String> = row.get(2)?;
    let github_username: Option<String> = row.get(3)?;
    let github_repo: Option<String> = row.get(4)?;
    let birth_issue: Option<String> = row.get(5)?;
    let wallet_verified: bool = row.get(6)?;
    let repo_verified: bool = row.get(7)?;
    let approved: bool = row.get(8)?;

    let id = match Uuid::parse_str(&id) {
        Ok(id) => id,
        Err(e) => return Ok(Err(IdentityError::Storage(format!("bad id '{}': {}", id, e)))),
    };
    let created_at = match parse_time(&created_at) {
        Ok(t) => t,
        Err(e) => return Ok(Err(e)),
    };

    Ok(Ok(Identity {
        id,
        display_name,
        wallet_address,
        github_username,
        github_repo,
        birth_issue,
        wallet_verified,
        repo_verified,
        approved,
        kind: IdentityKind::parse(&kind),
        created_at,
    }))
}

fn map_constraint(err: rusqlite::Error) -> IdentityError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            IdentityError::Storage(format!("uniqueness violated: {}", err))
        }
        _ => IdentityError::from(err),
    }
}

impl IdentityStore for SqliteIdentityStore {
    fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>> {
        self.find_one("id = ?1", &id.to_string())
    }

    fn find_by_wallet(&self, address: &str) -> Result<Option<Identity>> {
        self.find_one("wallet_address = ?1", &address.to_ascii_lowercase())
    }

    fn find_by_github(&self, username: &str) -> Result<Option<Identity>> {
        self.find_one("LOWER(github_username) = LOWER(?1)", username)
    }

    fn find_by_name(&self, display_name: &str) -> Result<Option<Identity>> {
        self.find_one("LOWER(display_name) = LOWER(?1)", display_name)
    }

    fn create(&self, identity: &Identity) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT INTO identities ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                COLUMNS
            ),
            params![
                identity.id.to_string(),
                identity.display_name,
                identity.wallet_address,
                identity.github_username,
                identity.github_repo,
                identity.birth_issue,
                identity.wallet_verified,
                identity.repo_verified,
                identity.approved,
                identity.kind.as_str(),
                identity.created_at.to_rfc3339(),
            ],
        )
        .map_err(map_constraint)?;
        Ok(())
    }

    fn update(&self, identity: &Identity) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "UPDATE identities SET display_name = ?2, wallet_address = ?3, github_username = ?4,
                 github_repo = ?5, birth_issue = ?6, wallet_verified = ?7, repo_verified = ?8,
                 approved = ?9, kind = ?10 WHERE id = ?1",
                params![
                    identity.id.to_string(),
                    identity.display_name,
                    identity.wallet_address,
                    identity.github_username,
                    identity.github_repo,
                    identity.birth_issue,
                    identity.wallet_verified,
                    identity.repo_verified,
                    identity.approved,
                    identity.kind.as_str(),
                ],
            )
            .map_err(map_constraint)?;
        if changed == 0 {
            return Err(IdentityError::Storage(format!(
                "identity {} not found",
                identity.id
            )));
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<Identity>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM identities ORDER BY created_at",
            COLUMNS
        ))?;
        let rows = stmt
            .query_map([], row_to_identity)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oracle(name: &str, wallet: Option<&str>, github: Option<&str>) -> Identity {
        let mut identity = Identity::new(name, Utc::now());
        identity.wallet_address = wallet.map(str::to_string);
        identity.github_username = github.map(str::to_string);
        identity.wallet_verified = wallet.is_some();
        identity.reclassify();
        identity
    }

    #[test]
    fn test_storage_in_memory() {
        let storage = SqliteIdentityStore::in_memory().unwrap();
        let identity = oracle("shrimp", Some("0xabc0000000000000000000000000000000000001"), None);
        storage.create(&identity).unwrap();

        let found = storage
            .find_by_wallet("0xABC0000000000000000000000000000000000001")
            .unwrap()
            .unwrap();
        assert_eq!(found, identity);
        assert_eq!(found.kind, IdentityKind::Human);
    }

    #[test]
    fn test_update_and_lookup_by_github() {
        let storage = SqliteIdentityStore::in_memory().unwrap();
        let mut identity = oracle("arthur", None, Some("Nazt"));
        storage.create(&identity).unwrap();

        identity.github_repo = Some("nazt/arthur".into());
        identity.approved = true;
        storage.update(&identity).unwrap();

        let found = storage.find_by_github("nazt").unwrap().unwrap();
        assert_eq!(found.github_repo.as_deref(), Some("nazt/arthur"));
        assert!(found.approved);
        assert_eq!(storage.find_by_name("ARTHUR").unwrap().unwrap().id, identity.id);
    }

    #[test]
    fn test_unique_github_username() {
        let storage = SqliteIdentityStore::in_memory().unwrap();
        storage.create(&oracle("a", None, Some("nazt"))).unwrap();
        assert!(matches!(
            storage.create(&oracle("b", None, Some("NAZT"))),
            Err(IdentityError::Storage(_))
        ));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identities.db");
        let identity = oracle("shrimp", None, Some("nazt"));
        {
            let storage = SqliteIdentityStore::new(&path).unwrap();
            storage.create(&identity).unwrap();
        }
        let storage = SqliteIdentityStore::new(&path).unwrap();
        assert_eq!(storage.list().unwrap(), vec![identity]);
    }

    #[test]
    fn test_unique_wallet() {
        let storage = SqliteIdentityStore::in_memory().unwrap();
        let wallet = "0xabc0000000000000000000000000000000000002";
        storage.create(&oracle("a", Some(wallet), None)).unwrap();
        assert!(matches!(
            storage.create(&oracle("b", Some(wallet), None)),
            Err(IdentityError::Storage(_))
        ));

        // Moving the wallet onto another row through update is refused too
        let mut other = oracle("c", None, Some("nazt"));
        storage.create(&other).unwrap();
        other.wallet_address = Some(wallet.to_string());
        assert!(matches!(storage.update(&other), Err(IdentityError::Storage(_))));
    }

    #[test]
    fn test_duplicate_display_names_resolve_oldest_first() {
        let storage = SqliteIdentityStore::in_memory().unwrap();
        let older = oracle("SHRIMP", Some("0xabc0000000000000000000000000000000000003"), None);
        let mut newer = oracle("shrimp", None, Some("nazt"));
        newer.created_at = older.created_at + chrono::Duration::seconds(5);
        storage.create(&newer).unwrap();
        storage.create(&older).unwrap();

        assert_eq!(storage.find_by_name("Shrimp").unwrap().unwrap().id, older.id);
        assert_eq!(storage.list().unwrap().len(), 2);
    }

    #[test]
    fn test_resolver_link_conflict_over_sqlite() {
        use crate::allowlist::{AllowList, StaticAllowList};
        use crate::clock::ManualClock;
        use crate::resolver::{Aspect, IdentityResolver};
        use std::sync::Arc;

        let resolver = IdentityResolver::new(
            Arc::new(SqliteIdentityStore::in_memory().unwrap()),
            Arc::new(StaticAllowList::new(AllowList::default(), false)),
            Arc::new(ManualClock::default()),
        );
        let wallet = "0xabc0000000000000000000000000000000000004";
        resolver.resolve_by_wallet(wallet, Some("holder")).unwrap();
        let oracle = resolver
            .resolve_by_github("nazt", "nazt/shrimp", None, None)
            .unwrap()
            .identity;
        let other = resolver
            .resolve_by_github("arthur", "arthur/oracle", None, None)
            .unwrap()
            .identity;

        assert!(matches!(
            resolver.link(oracle.id, Aspect::Wallet(wallet.to_string())),
            Err(IdentityError::ConflictingLink(_))
        ));
        assert!(matches!(
            resolver.link(
                other.id,
                Aspect::Github {
                    username: "NAZT".into(),
                    repo: "nazt/shrimp".into(),
                    birth_issue: None,
                }
            ),
            Err(IdentityError::ConflictingLink(_))
        ));
        let unchanged = resolver.store().find_by_id(other.id).unwrap().unwrap();
        assert_eq!(unchanged.github_username.as_deref(), Some("arthur"));
    }
}
