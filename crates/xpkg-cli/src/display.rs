//! Table formatting for `xpkg get`

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use xpkg_kube::apis::TYPE_HEALTHY;
use xpkg_kube::{Package, PackageRevision};

const NONE: &str = "<none>";

/// Column-aligned text table
#[derive(Debug, Default)]
pub struct Table {
    headers: Vec<&'static str>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: &[&'static str]) -> Self {
        Self {
            headers: headers.to_vec(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Render with columns padded to their widest cell, separated by three spaces
    pub fn render(&self) -> String {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.len()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                if let Some(w) = widths.get_mut(i) {
                    *w = (*w).max(cell.len());
                }
            }
        }

        let line = |cells: Vec<&str>| {
            let last = cells.len().saturating_sub(1);
            let mut out = String::new();
            for (i, cell) in cells.into_iter().enumerate() {
                if i == last {
                    out.push_str(cell);
                } else {
                    out.push_str(&format!("{:<width$}   ", cell, width = widths[i]));
                }
            }
            out
        };

        let mut lines = vec![line(self.headers.clone())];
        for row in &self.rows {
            lines.push(line(row.iter().map(String::as_str).collect()));
        }
        lines.join("\n")
    }
}

/// Revision table: `NAME REVISION IMAGE STATE DEP-FOUND DEP-INSTALLED HEALTHY AGE`
pub fn revision_table<'a>(
    revisions: impl IntoIterator<Item = &'a dyn PackageRevision>,
    now: DateTime<Utc>,
) -> Table {
    let mut table = Table::new(&[
        "NAME",
        "REVISION",
        "IMAGE",
        "STATE",
        "DEP-FOUND",
        "DEP-INSTALLED",
        "HEALTHY",
        "AGE",
    ]);
    for rev in revisions {
        let deps = rev.dependency_status();
        table.push(vec![
            rev.object_name().to_string(),
            rev.revision().to_string(),
            rev.source().to_string(),
            rev.desired_state().to_string(),
            deps.found.to_string(),
            deps.installed.to_string(),
            rev.condition(TYPE_HEALTHY).status.to_string(),
            age(created(rev.object_meta()), now),
        ]);
    }
    table
}

/// Package table: `NAME PACKAGE REVISION HEALTHY AGE`
pub fn package_table<'a>(
    packages: impl IntoIterator<Item = &'a dyn Package>,
    now: DateTime<Utc>,
) -> Table {
    let mut table = Table::new(&["NAME", "PACKAGE", "REVISION", "HEALTHY", "AGE"]);
    for pkg in packages {
        table.push(vec![
            pkg.object_name().to_string(),
            pkg.source().to_string(),
            pkg.current_revision().unwrap_or(NONE).to_string(),
            pkg.condition(TYPE_HEALTHY).status.to_string(),
            age(created(pkg.object_meta()), now),
        ]);
    }
    table
}

fn created(meta: &ObjectMeta) -> Option<DateTime<Utc>> {
    meta.creation_timestamp.as_ref().map(|t| t.0)
}

/// Largest whole unit of elapsed time, kubectl style
pub fn age(created: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(created) = created else {
        return NONE.to_string();
    };
    let secs = (now - created).num_seconds().max(0);
    match secs {
        s if s < 120 => format!("{}s", s),
        s if s < 2 * 3600 => format!("{}m", s / 60),
        s if s < 2 * 86400 => format!("{}h", s / 3600),
        s => format!("{}d", s / 86400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use xpkg_kube::apis::{Condition, DependencyStatus, RevisionDesiredState};
    use xpkg_kube::{
        Conditioned, Object, PackageResource, Provider, ProviderRevision, RevisionResource,
    };

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn stamp(obj: &mut impl Object, ago: Duration) {
        obj.object_meta_mut().creation_timestamp = Some(Time(now() - ago));
    }

    #[test]
    fn test_age_units() {
        let n = now();
        assert_eq!(age(None, n), "<none>");
        assert_eq!(age(Some(n - Duration::seconds(42)), n), "42s");
        assert_eq!(age(Some(n - Duration::minutes(15)), n), "15m");
        assert_eq!(age(Some(n - Duration::hours(5)), n), "5h");
        assert_eq!(age(Some(n - Duration::days(9)), n), "9d");
        // Clock skew never renders negative ages
        assert_eq!(age(Some(n + Duration::seconds(5)), n), "0s");
    }

    #[test]
    fn test_revision_table() {
        let mut active = ProviderRevision::new_revision("provider-aws-1a2b3c");
        active.set_revision(2);
        active.set_source("xpkg.io/acme/provider-aws:v1.1.0".to_string());
        active.set_desired_state(RevisionDesiredState::Active);
        active.set_dependency_status(DependencyStatus::new(3, 2, 0));
        active.set_condition(Condition::healthy());
        stamp(&mut active, Duration::minutes(5));

        let mut parked = ProviderRevision::new_revision("provider-aws-9f8e7d");
        parked.set_revision(1);
        parked.set_source("xpkg.io/acme/provider-aws:v1.0.0".to_string());
        parked.set_desired_state(RevisionDesiredState::Inactive);
        stamp(&mut parked, Duration::days(3));

        let rows: Vec<&dyn PackageRevision> = vec![&active, &parked];
        let table = revision_table(rows, now());

        insta::assert_snapshot!(table.render(), @r###"
        NAME                  REVISION   IMAGE                              STATE      DEP-FOUND   DEP-INSTALLED   HEALTHY   AGE
        provider-aws-1a2b3c   2          xpkg.io/acme/provider-aws:v1.1.0   Active     3           2               True      5m
        provider-aws-9f8e7d   1          xpkg.io/acme/provider-aws:v1.0.0   Inactive   0           0               Unknown   3d
        "###);
    }

    #[test]
    fn test_package_table_without_current_revision() {
        let mut pkg = Provider::new_package("provider-aws", "xpkg.io/acme/provider-aws:v1.0.0");
        stamp(&mut pkg, Duration::seconds(30));

        let rows: Vec<&dyn Package> = vec![&pkg];
        let table = package_table(rows, now());

        insta::assert_snapshot!(table.render(), @r###"
        NAME           PACKAGE                            REVISION   HEALTHY   AGE
        provider-aws   xpkg.io/acme/provider-aws:v1.0.0   <none>     Unknown   30s
        "###);
    }

    #[test]
    fn test_empty_table_has_only_headers() {
        let table = Table::new(&["NAME", "AGE"]);
        assert!(table.is_empty());
        assert_eq!(table.render(), "NAME   AGE");
    }
}
