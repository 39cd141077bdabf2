//! Embedded libSQL storage layer.
//!
//! The [`Storage`] struct wraps a libSQL database holding every tenant-scoped
//! table: the knowledge store, demand signals, recommendations, published
//! content, trust snapshots, growth campaigns and the receipt ledger.
//!
//! **Write rules:**
//! - every query is filtered by tenant id;
//! - every write is an upsert keyed by a stable identifier, except receipts,
//!   which are append-only (a trigger rejects updates).

mod content;
mod growth;
mod knowledge;
mod ledger;
mod migrations;
mod recommendations;
mod trust;

pub use content::AssetWrite;
pub use growth::NewSendReceipt;

use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use serde::de::DeserializeOwned;
use trustline_shared::{Result, Tenant, TrustlineError, new_id};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| TrustlineError::io(parent, e))?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode (audit viewers).
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    TrustlineError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 if no migrations have been applied.
    pub async fn schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0,
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(TrustlineError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Tenant operations
    // -----------------------------------------------------------------------

    /// Insert a tenant, or update its name/keywords if the domain already exists.
    pub async fn upsert_tenant(
        &self,
        domain: &str,
        name: &str,
        keywords: &[String],
    ) -> Result<Tenant> {
        self.check_writable()?;
        let id = new_id();
        let now = Utc::now().to_rfc3339();
        let keywords_json = to_json(keywords)?;
        self.conn
            .execute(
                "INSERT INTO tenants (id, domain, name, keywords_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(domain) DO UPDATE SET
                   name = excluded.name,
                   keywords_json = excluded.keywords_json",
                params![id.as_str(), domain, name, keywords_json.as_str(), now.as_str()],
            )
            .await
            .map_err(db_err)?;

        self.tenant_by_domain(domain)
            .await?
            .ok_or_else(|| TrustlineError::Storage(format!("tenant {domain} vanished after upsert")))
    }

    /// Look up a tenant by its public domain.
    pub async fn tenant_by_domain(&self, domain: &str) -> Result<Option<Tenant>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, domain, name, keywords_json, created_at FROM tenants WHERE domain = ?1",
                params![domain],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(Tenant {
                id: get_string(&row, 0)?,
                domain: get_string(&row, 1)?,
                name: get_string(&row, 2)?,
                keywords: from_json(&get_string(&row, 3)?)?,
                created_at: get_time(&row, 4)?,
            })),
            None => Ok(None),
        }
    }

    /// Resolve a tenant by domain, failing with `NotFound` when unknown.
    pub async fn require_tenant(&self, domain: &str) -> Result<Tenant> {
        self.tenant_by_domain(domain)
            .await?
            .ok_or_else(|| TrustlineError::not_found("tenant", domain))
    }

    /// Remove every row belonging to a tenant, including its receipts.
    ///
    /// This is the only operation that deletes receipts.
    pub async fn reset_tenant(&self, tenant_id: &str) -> Result<()> {
        self.check_writable()?;
        let statements = [
            "DELETE FROM send_receipts WHERE campaign_id IN (SELECT id FROM campaigns WHERE tenant_id = ?1)",
            "DELETE FROM segment_snapshots WHERE campaign_id IN (SELECT id FROM campaigns WHERE tenant_id = ?1)",
            "DELETE FROM campaigns WHERE tenant_id = ?1",
            "DELETE FROM audience WHERE tenant_id = ?1",
            "DELETE FROM receipts WHERE tenant_id = ?1",
            "DELETE FROM trust_snapshots WHERE tenant_id = ?1",
            "DELETE FROM asset_versions WHERE asset_id IN (SELECT id FROM assets WHERE tenant_id = ?1)",
            "DELETE FROM assets WHERE tenant_id = ?1",
            "DELETE FROM product_patches WHERE tenant_id = ?1",
            "DELETE FROM recommendations WHERE tenant_id = ?1",
            "DELETE FROM gaps WHERE tenant_id = ?1",
            "DELETE FROM needs WHERE question_id IN (SELECT id FROM questions WHERE tenant_id = ?1)",
            "DELETE FROM questions WHERE tenant_id = ?1",
            "DELETE FROM answer_samples WHERE tenant_id = ?1",
            "DELETE FROM products WHERE tenant_id = ?1",
            "DELETE FROM evidence WHERE claim_id IN (SELECT id FROM claims WHERE tenant_id = ?1)",
            "DELETE FROM claims WHERE tenant_id = ?1",
        ];
        for sql in statements {
            self.conn
                .execute(sql, params![tenant_id])
                .await
                .map_err(db_err)?;
        }
        tracing::warn!(tenant = tenant_id, "tenant data reset");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

pub(crate) fn db_err(e: impl std::fmt::Display) -> TrustlineError {
    TrustlineError::Storage(e.to_string())
}

pub(crate) fn get_string(row: &libsql::Row, idx: i32) -> Result<String> {
    row.get::<String>(idx).map_err(db_err)
}

pub(crate) fn get_opt_string(row: &libsql::Row, idx: i32) -> Option<String> {
    row.get::<String>(idx).ok()
}

pub(crate) fn get_i64(row: &libsql::Row, idx: i32) -> Result<i64> {
    row.get::<i64>(idx).map_err(db_err)
}

pub(crate) fn get_u8(row: &libsql::Row, idx: i32) -> Result<u8> {
    let v = get_i64(row, idx)?;
    u8::try_from(v).map_err(|_| TrustlineError::Storage(format!("value {v} out of range for u8")))
}

pub(crate) fn get_bool(row: &libsql::Row, idx: i32) -> Result<bool> {
    Ok(get_i64(row, idx)? != 0)
}

pub(crate) fn get_time(row: &libsql::Row, idx: i32) -> Result<DateTime<Utc>> {
    parse_time(&get_string(row, idx)?)
}

pub(crate) fn get_opt_time(row: &libsql::Row, idx: i32) -> Result<Option<DateTime<Utc>>> {
    get_opt_string(row, idx).map(|s| parse_time(&s)).transpose()
}

pub(crate) fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TrustlineError::Storage(format!("invalid date {s:?}: {e}")))
}

pub(crate) fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(db_err)
}

pub(crate) fn from_json<T: DeserializeOwned>(s: &str) -> Result<T> {
    serde_json::from_str(s).map_err(|e| TrustlineError::Storage(format!("corrupt JSON column: {e}")))
}

/// Parse a `db_enum` column.
pub(crate) fn get_enum<T>(row: &libsql::Row, idx: i32) -> Result<T>
where
    T: std::str::FromStr<Err = TrustlineError>,
{
    get_string(row, idx)?.parse()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    pub async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("tl_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    pub async fn test_tenant(storage: &Storage) -> Tenant {
        storage
            .upsert_tenant("shop.example.com", "Example Shop", &["linen".into(), "shirt".into()])
            .await
            .expect("upsert tenant")
    }
}
