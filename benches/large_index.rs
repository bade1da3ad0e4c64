// SPDX-License-Identifier: MPL-2.0

//! This bench monitors the cost of a whole resolution over synthetic indices
//! with many records.
//!
//! The index is built inside the measured closure, since the reduced indices
//! are cached on it.

use std::sync::Arc;

use criterion::*;
use envsolve::{resolve, Index, MatchSpec, PackageRecord, Request, SolverConfig};

fn record(name: usize, version: u32, depends: Vec<String>) -> Arc<PackageRecord> {
    Arc::new(
        PackageRecord::new(format!("p{name}"), &format!("1.{version}"), "0")
            .unwrap()
            .with_depends(depends),
    )
}

/// Every version of a package pins the next package to the same version,
/// except the newest one of the last package, which does not exist. The
/// newest versions of the whole chain have to give way together.
fn pinned_chain(c: &mut Criterion, package_count: usize, version_count: u32) {
    let mut records = Vec::new();
    for n in 0..package_count {
        for v in 0..version_count {
            let depends = if n + 1 < package_count {
                vec![format!("p{} ==1.{v}", n + 1)]
            } else {
                Vec::new()
            };
            if n + 1 == package_count && v + 1 == version_count {
                continue;
            }
            records.push(record(n, v, depends));
        }
    }
    let request = Request::install([MatchSpec::from_name("p0")]);
    let config = SolverConfig::default();

    c.bench_function("pinned_chain", |b| {
        b.iter(|| {
            let index = Index::new(records.iter().cloned()).unwrap();
            let _ = resolve(&index, &request, &config);
        })
    });
}

/// Many packages with ranged dependencies on a shared base package, with
/// an installed environment to keep frozen.
fn wide_environment(c: &mut Criterion, package_count: usize, version_count: u32) {
    let mut records = Vec::new();
    for v in 0..version_count {
        records.push(record(0, v, Vec::new()));
    }
    for n in 1..package_count {
        for v in 0..version_count {
            let low = v.saturating_sub(3);
            records.push(record(n, v, vec![format!("p0 >=1.{low},<=1.{v}")]));
        }
    }
    let installed: Vec<Arc<PackageRecord>> = (0..package_count / 2)
        .map(|n| records[n * version_count as usize].clone())
        .collect();
    let request = Request::install(
        (package_count / 2..package_count).map(|n| MatchSpec::from_name(format!("p{n}"))),
    )
    .with_installed(installed);
    let config = SolverConfig::default();

    c.bench_function("wide_environment", |b| {
        b.iter(|| {
            let index = Index::new(records.iter().cloned()).unwrap();
            let _ = resolve(&index, &request, &config);
        })
    });
}

fn bench_group(c: &mut Criterion) {
    pinned_chain(c, 30, 20);
    wide_environment(c, 40, 15);
}

criterion_group!(benches, bench_group);
criterion_main!(benches);
