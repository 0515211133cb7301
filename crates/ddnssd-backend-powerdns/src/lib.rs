// # PowerDNS SQL Backend
//
// This crate implements the backend contract directly against a PowerDNS
// database schema: `domains(id, name)` joined to
// `records(domain_id, name, type, content, ttl, change_date)`.
//
// Each mutation is one statement or one transaction, so CONFLICT is not
// reachable; a concurrent writer is serialised by the database. Transient
// failures (deadlock, lost connection) retry the whole statement. A missing
// base-domain row means the zone was never provisioned: the operation logs a
// warning and affects zero rows, and the daemon keeps running.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::any::AnyPoolOptions;
use sqlx::{AnyPool, Row};
use tracing::{debug, warn};

use ddnssd_core::config::{BackendConfig, HostContext};
use ddnssd_core::record::{DnsRecord, RecordType, canonical_name, enumeration_name};
use ddnssd_core::registry::BackendRegistry;
use ddnssd_core::{Backend, BackendFactory, Backoff, Error, Result};

pub struct PowerDnsBackend {
    pool: AnyPool,
    base_domain: String,
}

impl PowerDnsBackend {
    pub fn new(pool: AnyPool, base_domain: &str) -> Self {
        Self {
            pool,
            base_domain: canonical_name(base_domain),
        }
    }

    /// Connect to the server carrying the PowerDNS schema.
    pub async fn connect(database_url: &str, base_domain: &str) -> Result<Self> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(2)
            .connect(database_url)
            .await
            .map_err(|e| Error::fatal(format!("cannot connect to PowerDNS database: {e}")))?;
        Ok(Self::new(pool, base_domain))
    }

    /// The base domain's row id, or `None` when the zone was never created.
    async fn domain_id(&self) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT id FROM domains WHERE name = ?")
            .bind(&self.base_domain)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify(e, "domain lookup"))?;
        row.map(|r| {
            r.try_get::<i64, _>("id")
                .map_err(|e| Error::fatal(format!("domains schema mismatch: {e}")))
        })
        .transpose()
    }

    /// The base domain's row id, with the missing-zone warning applied.
    ///
    /// `None` means the caller should treat the operation as a no-op.
    async fn domain_id_or_warn(&self, what: &str) -> Result<Option<i64>> {
        let id = self.domain_id().await?;
        if id.is_none() {
            warn!(
                base_domain = self.base_domain,
                what, "base domain has no row in domains; dropping operation"
            );
        }
        Ok(id)
    }

    async fn add(&self, rr: &DnsRecord) -> Result<()> {
        let Some(domain_id) = self.domain_id_or_warn("add").await? else {
            return Ok(());
        };

        let existing = sqlx::query(
            "SELECT id FROM records WHERE domain_id = ? AND name = ? AND type = ? AND content = ?",
        )
        .bind(domain_id)
        .bind(rr.name())
        .bind(rr.rtype().as_str())
        .bind(rr.value())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify(e, "record lookup"))?;

        if existing.is_some() {
            debug!(record = %rr, "record already present");
            return Ok(());
        }

        sqlx::query(
            "INSERT INTO records (domain_id, name, type, content, ttl, change_date) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(domain_id)
        .bind(rr.name())
        .bind(rr.rtype().as_str())
        .bind(rr.value())
        .bind(rr.ttl() as i64)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| classify(e, "record insert"))?;
        Ok(())
    }

    async fn remove(&self, rr: &DnsRecord) -> Result<()> {
        self.remove_with(rr.name(), rr.rtype(), Some(&rr.value())).await
    }

    async fn remove_with(
        &self,
        name: &str,
        rtype: RecordType,
        content: Option<&str>,
    ) -> Result<()> {
        let Some(domain_id) = self.domain_id_or_warn("remove").await? else {
            return Ok(());
        };

        let mut sql =
            String::from("DELETE FROM records WHERE domain_id = ? AND name = ? AND type = ?");
        if content.is_some() {
            sql.push_str(" AND content = ?");
        }

        let mut query = sqlx::query(&sql)
            .bind(domain_id)
            .bind(name)
            .bind(rtype.as_str());
        if let Some(content) = content {
            query = query.bind(content);
        }

        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| classify(e, "record delete"))?;
        if result.rows_affected() == 0 {
            debug!(name, %rtype, "nothing to remove");
        }
        Ok(())
    }

    /// Atomically replace the rrset at (name, type) with the given record.
    async fn upsert(&self, rr: &DnsRecord) -> Result<()> {
        let Some(domain_id) = self.domain_id_or_warn("upsert").await? else {
            return Ok(());
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| classify(e, "transaction begin"))?;

        sqlx::query("DELETE FROM records WHERE domain_id = ? AND name = ? AND type = ?")
            .bind(domain_id)
            .bind(rr.name())
            .bind(rr.rtype().as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| classify(e, "upsert delete"))?;

        sqlx::query(
            "INSERT INTO records (domain_id, name, type, content, ttl, change_date) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(domain_id)
        .bind(rr.name())
        .bind(rr.rtype().as_str())
        .bind(rr.value())
        .bind(rr.ttl() as i64)
        .bind(Utc::now().timestamp())
        .execute(&mut *tx)
        .await
        .map_err(|e| classify(e, "upsert insert"))?;

        // Dropping an uncommitted transaction rolls it back.
        tx.commit()
            .await
            .map_err(|e| classify(e, "transaction commit"))
    }

    /// Update the TTL of a whole rrset; the SRV set follows the newest record.
    async fn set_rrset_ttl(&self, name: &str, rtype: RecordType, ttl: u32) -> Result<()> {
        let Some(domain_id) = self.domain_id().await? else {
            return Ok(());
        };
        sqlx::query(
            "UPDATE records SET ttl = ?, change_date = ? \
             WHERE domain_id = ? AND name = ? AND type = ?",
        )
        .bind(ttl as i64)
        .bind(Utc::now().timestamp())
        .bind(domain_id)
        .bind(name)
        .bind(rtype.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| classify(e, "ttl update"))?;
        Ok(())
    }

    async fn count_at(&self, name: &str, rtype: RecordType) -> Result<i64> {
        let Some(domain_id) = self.domain_id().await? else {
            return Ok(0);
        };
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM records WHERE domain_id = ? AND name = ? AND type = ?",
        )
        .bind(domain_id)
        .bind(name)
        .bind(rtype.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify(e, "record count"))?;
        row.try_get::<i64, _>("n")
            .map_err(|e| Error::fatal(format!("records schema mismatch: {e}")))
    }

    /// Contents of the rrset at (name, type).
    async fn contents_at(&self, name: &str, rtype: RecordType) -> Result<Vec<String>> {
        let Some(domain_id) = self.domain_id().await? else {
            return Ok(Vec::new());
        };
        let rows = sqlx::query(
            "SELECT content FROM records WHERE domain_id = ? AND name = ? AND type = ?",
        )
        .bind(domain_id)
        .bind(name)
        .bind(rtype.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| classify(e, "record select"))?;
        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("content")
                    .map_err(|e| Error::fatal(format!("records schema mismatch: {e}")))
            })
            .collect()
    }

    async fn publish_once(&self, rr: &DnsRecord) -> Result<()> {
        match rr.rtype() {
            RecordType::A | RecordType::Aaaa | RecordType::Cname | RecordType::Txt => {
                self.upsert(rr).await
            }
            RecordType::Srv => {
                self.set_rrset_ttl(rr.name(), RecordType::Srv, rr.ttl()).await?;
                self.add(rr).await
            }
            RecordType::Ptr => self.add(rr).await,
        }
    }

    async fn suppress_once(&self, rr: &DnsRecord) -> Result<()> {
        self.remove(rr).await?;

        if rr.rtype() == RecordType::Srv
            && self.count_at(rr.name(), RecordType::Srv).await? == 0
        {
            self.remove_with(rr.name(), RecordType::Txt, None).await?;
            if let Some(parent) = rr.parent_name() {
                self.remove(&DnsRecord::ptr(parent, rr.ttl(), rr.name())).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for PowerDnsBackend {
    fn name(&self) -> &str {
        "power_dns"
    }

    async fn dns_records(&self) -> Result<Vec<DnsRecord>> {
        let Some(domain_id) = self.domain_id_or_warn("enumerate").await? else {
            return Ok(Vec::new());
        };

        let rows = with_retry("record enumeration", || async {
            sqlx::query(
                "SELECT name, type, content, ttl FROM records WHERE domain_id = ? \
                 AND type IN ('A', 'AAAA', 'SRV', 'PTR', 'TXT', 'CNAME')",
            )
            .bind(domain_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify(e, "record enumeration"))
        })
        .await?;

        let mut records = Vec::new();
        for row in rows {
            let name: String = row
                .try_get("name")
                .map_err(|e| Error::fatal(format!("records schema mismatch: {e}")))?;
            let type_field: String = row
                .try_get("type")
                .map_err(|e| Error::fatal(format!("records schema mismatch: {e}")))?;
            let content: String = row
                .try_get("content")
                .map_err(|e| Error::fatal(format!("records schema mismatch: {e}")))?;
            let ttl: i64 = row
                .try_get("ttl")
                .map_err(|e| Error::fatal(format!("records schema mismatch: {e}")))?;

            let parsed = type_field
                .parse::<RecordType>()
                .and_then(|rtype| DnsRecord::parse(&name, ttl as u32, rtype, &content));
            match parsed {
                Ok(rr) => records.push(rr),
                Err(e) => {
                    warn!(name, rtype = type_field, content, error = %e, "skipping unparsable row");
                }
            }
        }
        Ok(records)
    }

    async fn publish_record(&self, rr: &DnsRecord) -> Result<()> {
        with_retry("publish", || self.publish_once(rr)).await
    }

    async fn suppress_record(&self, rr: &DnsRecord) -> Result<()> {
        with_retry("suppress", || self.suppress_once(rr)).await
    }

    async fn suppress_shared_records(&self) -> Result<()> {
        let enumeration = enumeration_name(&self.base_domain);
        let services = self.contents_at(&enumeration, RecordType::Ptr).await?;

        for service in services {
            self.remove_with(&canonical_name(&service), RecordType::Ptr, None)
                .await?;
        }
        self.remove_with(&enumeration, RecordType::Ptr, None).await
    }
}

/// Retry a whole statement or transaction through transient failures.
async fn with_retry<T, F, Fut>(what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut backoff = Backoff::default();
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                warn!(what, error = %e, "transient database failure");
                match backoff.next() {
                    Some(pause) => tokio::time::sleep(pause).await,
                    None => return Err(e),
                }
            }
            Err(e) => return Err(e),
        }
    }
}

fn classify(err: sqlx::Error, what: &str) -> Error {
    match &err {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
            let message = db.message().to_ascii_lowercase();
            // MySQL reports deadlocks as 1213 / SQLSTATE 40001.
            if code == "1213" || code == "40001" || message.contains("deadlock") {
                Error::transient(format!("{what}: {err}"))
            } else {
                Error::fatal(format!("{what}: {err}"))
            }
        }
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::WorkerCrashed => Error::transient(format!("{what}: {err}")),
        sqlx::Error::PoolClosed | sqlx::Error::Configuration(_) => {
            Error::fatal(format!("{what}: {err}"))
        }
        _ => Error::transient(format!("{what}: {err}")),
    }
}

/// Factory for creating PowerDNS backends
pub struct PowerDnsFactory;

#[async_trait]
impl BackendFactory for PowerDnsFactory {
    async fn create(
        &self,
        config: &BackendConfig,
        host: &HostContext,
    ) -> Result<Box<dyn Backend>> {
        match config {
            BackendConfig::PowerDns { database_url } => {
                if database_url.is_empty() {
                    return Err(Error::config("PowerDNS database URL is required"));
                }
                let backend =
                    PowerDnsBackend::connect(database_url, &host.base_domain).await?;
                Ok(Box::new(backend))
            }
            _ => Err(Error::config("invalid config for power_dns backend")),
        }
    }
}

/// Register the PowerDNS backend with a registry.
pub fn register(registry: &BackendRegistry) {
    registry.register("power_dns", Box::new(PowerDnsFactory));
}
