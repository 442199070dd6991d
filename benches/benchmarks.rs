//! Performance benchmarks for Runbooks.
//!
//! This module contains benchmarks for:
//! - Output reference extraction from block bodies
//! - Dependency graph construction for large runbooks
//! - Output file and trailer parsing
//!
//! Run with: `cargo bench`

use std::collections::HashMap;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use runbooks::core::{parse_outputs, parse_trailer, OutputRegistry};
use runbooks::deps::extract_references;
use runbooks::runbook::render;
use runbooks::DependencyGraph;

// ============================================================================
// Mock Data Fixtures
// ============================================================================

mod fixtures {
    /// A block body referencing `refs` outputs of earlier blocks.
    pub fn body_with_refs(refs: usize) -> String {
        let mut body = String::from("#!/usr/bin/env bash\nset -euo pipefail\n");
        for i in 0..refs {
            body.push_str(&format!(
                "gcloud deploy --project {{{{ ._blocks.block_{i}.outputs.project_id }}}} \\\n  --region {{{{ .Region }}}}\n"
            ));
        }
        body
    }

    /// A chain of blocks where each references the previous two.
    pub fn chain(len: usize) -> Vec<(String, String)> {
        (0..len)
            .map(|i| {
                let mut body = format!("echo \"project_id=p-{i}\" >> \"$RUNBOOK_OUTPUT\"\n");
                for dep in i.saturating_sub(2)..i {
                    body.push_str(&format!("echo {{{{ ._blocks.block-{dep}.outputs.project_id }}}}\n"));
                }
                (format!("block-{i}"), body)
            })
            .collect()
    }

    /// Output file content with `n` entries and a few malformed lines.
    pub fn output_file(n: usize) -> String {
        let mut content = String::new();
        for i in 0..n {
            content.push_str(&format!("key_{i}=value number {i}\n"));
        }
        content.push_str("no equals sign\n1bad=key\nempty=\n");
        content
    }

    /// Trailer bytes carrying `n` variables.
    pub fn trailer(n: usize) -> Vec<u8> {
        let mut bytes = b"__RUNBOOKS_PWD__\0/tmp/work\0__RUNBOOKS_ENV__\0".to_vec();
        for i in 0..n {
            bytes.extend_from_slice(format!("VAR_{i}=line one\nline two {i}\0").as_bytes());
        }
        bytes.extend_from_slice(b"__RUNBOOKS_END__\0");
        bytes
    }
}

// ============================================================================
// Dependency Benchmarks
// ============================================================================

fn bench_extract_references(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract_references");

    for refs in &[1, 10, 100] {
        let body = fixtures::body_with_refs(*refs);
        group.throughput(Throughput::Elements(*refs as u64));
        group.bench_with_input(BenchmarkId::from_parameter(refs), &body, |b, body| {
            b.iter(|| extract_references(black_box(body)));
        });
    }

    group.finish();
}

fn bench_graph_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_build");

    for len in &[10, 100, 500] {
        let blocks = fixtures::chain(*len);
        group.throughput(Throughput::Elements(*len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &blocks, |b, blocks| {
            b.iter(|| {
                DependencyGraph::build(blocks.iter().map(|(id, body)| (id.as_str(), body.as_str())))
            });
        });
    }

    group.finish();
}

fn bench_readiness(c: &mut Criterion) {
    let blocks = fixtures::chain(500);
    let graph = DependencyGraph::build(blocks.iter().map(|(id, body)| (id.as_str(), body.as_str())));
    let registry = OutputRegistry::new();

    c.bench_function("readiness_last_of_500", |b| {
        b.iter(|| graph.readiness(black_box("block-499"), &registry));
    });
}

// ============================================================================
// Parsing Benchmarks
// ============================================================================

fn bench_parse_outputs(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_outputs");

    for n in &[10, 100, 1000] {
        let content = fixtures::output_file(*n);
        group.throughput(Throughput::Bytes(content.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &content, |b, content| {
            b.iter(|| parse_outputs(black_box(content)));
        });
    }

    group.finish();
}

fn bench_parse_trailer(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_trailer");

    for n in &[10, 100, 1000] {
        let bytes = fixtures::trailer(*n);
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &bytes, |b, bytes| {
            b.iter(|| parse_trailer(black_box(bytes)));
        });
    }

    group.finish();
}

fn bench_render(c: &mut Criterion) {
    let body = "deploy --region {{ .Region }} --zone {{ .Zone }} {{ range .Items }}x{{ end }}\n".repeat(50);
    let vars: HashMap<String, String> = [("Region", "us-east1"), ("Zone", "b")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let registry = OutputRegistry::new();

    c.bench_function("render_50_lines", |b| {
        b.iter(|| render(black_box(&body), &vars, &registry));
    });
}

criterion_group!(dependency_benches, bench_extract_references, bench_graph_build, bench_readiness);
criterion_group!(parsing_benches, bench_parse_outputs, bench_parse_trailer, bench_render);
criterion_main!(dependency_benches, parsing_benches);
