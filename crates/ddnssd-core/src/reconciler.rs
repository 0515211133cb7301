//! Reconciler
//!
//! A reconciliation pass aligns one backend's zone state with the desired
//! record set computed from the tracked containers. Owned records (A/AAAA/SRV
//! matching the host suffix) are brought exactly in line; shared records
//! (PTR/TXT/CNAME) are created when missing but never deleted, since other
//! daemons co-author them.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::backend::Backend;
use crate::error::Result;
use crate::metrics;
use crate::record::{DnsRecord, RecordType};

/// The mutations one pass will issue against a backend.
#[derive(Debug, Default)]
pub struct ReconcilePlan {
    /// Owned records present in the backend but no longer desired
    pub to_delete: Vec<DnsRecord>,
    /// Desired records the backend does not hold yet
    pub to_create: Vec<DnsRecord>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.to_delete.is_empty() && self.to_create.is_empty()
    }

    /// Compute the plan from a backend snapshot and the desired set.
    ///
    /// `existing` is partitioned into our live owned records and the shared
    /// types; subtracting the shared records from the create side prevents
    /// re-publishing PTR/TXT entries that already exist identically.
    pub fn build(
        existing: &[DnsRecord],
        desired: &HashSet<DnsRecord>,
        hostname: &str,
    ) -> ReconcilePlan {
        let our_live: HashSet<&DnsRecord> = existing
            .iter()
            .filter(|rr| rr.owned_by(hostname))
            .collect();
        let shared_existing: HashSet<&DnsRecord> = existing
            .iter()
            .filter(|rr| {
                matches!(
                    rr.rtype(),
                    RecordType::Ptr | RecordType::Txt | RecordType::Cname
                )
            })
            .collect();

        let to_delete = our_live
            .iter()
            .filter(|rr| !desired.contains(*rr))
            .map(|rr| (*rr).clone())
            .collect();
        let to_create = desired
            .iter()
            .filter(|rr| !our_live.contains(*rr) && !shared_existing.contains(*rr))
            .cloned()
            .collect();

        ReconcilePlan {
            to_delete,
            to_create,
        }
    }
}

/// Run one reconciliation pass against `backend`.
///
/// Deletes precede creates so that a rename (same `(name, type)`, different
/// value) lands correctly. Per-record failures are logged and the pass
/// continues; only fatal errors abort it.
pub async fn reconcile_backend(
    backend: &dyn Backend,
    desired: &HashSet<DnsRecord>,
    hostname: &str,
) -> Result<()> {
    let existing = backend.dns_records().await?;
    let plan = ReconcilePlan::build(&existing, desired, hostname);

    debug!(
        backend = backend.name(),
        existing = existing.len(),
        desired = desired.len(),
        delete = plan.to_delete.len(),
        create = plan.to_create.len(),
        "computed reconcile plan"
    );

    for rr in &plan.to_delete {
        let result = backend.suppress_record(rr).await;
        metrics::record_backend_op(backend.name(), "suppress", result.is_ok());
        if let Err(e) = result {
            if e.is_fatal() {
                return Err(e);
            }
            warn!(backend = backend.name(), record = %rr, error = %e, "reconcile delete failed");
        }
    }

    for rr in &plan.to_create {
        let result = backend.publish_record(rr).await;
        metrics::record_backend_op(backend.name(), "publish", result.is_ok());
        if let Err(e) = result {
            if e.is_fatal() {
                return Err(e);
            }
            warn!(backend = backend.name(), record = %rr, error = %e, "reconcile create failed");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: &str = "host.example.com";

    fn a(name: &str, addr: &str) -> DnsRecord {
        DnsRecord::a(name, 60, addr.parse().unwrap())
    }

    fn desired_of(records: &[DnsRecord]) -> HashSet<DnsRecord> {
        records.iter().cloned().collect()
    }

    #[test]
    fn stale_owned_records_are_deleted() {
        let keep = a("c1.host.example.com", "10.0.0.1");
        let stale = a("stale.host.example.com", "10.0.0.99");
        let existing = vec![keep.clone(), stale.clone()];

        let plan = ReconcilePlan::build(&existing, &desired_of(&[keep]), HOST);

        assert_eq!(plan.to_delete, vec![stale]);
        assert!(plan.to_create.is_empty());
    }

    #[test]
    fn orphaned_shared_records_are_retained() {
        let orphan_ptr = DnsRecord::ptr(
            "_http._tcp.example.com",
            60,
            "gone._http._tcp.example.com",
        );
        let orphan_txt = DnsRecord::txt("gone._http._tcp.example.com", 60, vec![]);
        let existing = vec![orphan_ptr, orphan_txt];

        let plan = ReconcilePlan::build(&existing, &HashSet::new(), HOST);

        assert!(plan.is_empty());
    }

    #[test]
    fn foreign_owned_records_are_left_alone() {
        // Same zone, different host: fails the ownership test, so not ours
        // to delete.
        let foreign = a("c9.otherhost.example.com", "10.0.0.50");
        let plan = ReconcilePlan::build(&[foreign], &HashSet::new(), HOST);
        assert!(plan.is_empty());
    }

    #[test]
    fn missing_desired_records_are_created() {
        let wanted = a("c1.host.example.com", "10.0.0.1");
        let plan = ReconcilePlan::build(&[], &desired_of(&[wanted.clone()]), HOST);
        assert_eq!(plan.to_create, vec![wanted]);
    }

    #[test]
    fn identical_shared_records_are_not_recreated() {
        let ptr = DnsRecord::ptr(
            "_http._tcp.example.com",
            60,
            "c1._http._tcp.example.com",
        );
        let existing = vec![ptr.clone()];
        let plan = ReconcilePlan::build(&existing, &desired_of(&[ptr]), HOST);
        assert!(plan.is_empty());
    }

    #[test]
    fn rename_deletes_old_and_creates_new() {
        let old = a("c1.host.example.com", "10.0.0.1");
        let new = a("c1.host.example.com", "10.0.0.2");
        let plan = ReconcilePlan::build(&[old.clone()], &desired_of(&[new.clone()]), HOST);
        assert_eq!(plan.to_delete, vec![old]);
        assert_eq!(plan.to_create, vec![new]);
    }
}
