use criterion::{Criterion, black_box, criterion_group, criterion_main};

/// Build a document with `n` typed fields under a wildcard, plus a couple of
/// user functions so the bench exercises inlining.
fn build_document(n: usize) -> String {
    let mut doc = String::from(
        "functions:\n  - percentage: number && next >= 0 && next <= 100\n  - shortString: string && next.length < 64\nroot:\n  users:\n    $uid:\n      .read/write: auth.uid == $uid\n",
    );
    for i in 0..n {
        let kind = match i % 3 {
            0 => "required percentage",
            1 => "required shortString",
            _ => "indexed number",
        };
        doc.push_str(&format!("      field{i}: {kind}\n"));
    }
    doc
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");

    for &n in &[5, 20, 50] {
        let doc = build_document(n);
        group.bench_function(format!("{n}_fields"), |b| {
            b.iter(|| scorch::Compilation::from_yaml(black_box(&doc)).unwrap());
        });
    }

    group.finish();
}

fn bench_expressions(c: &mut Criterion) {
    let source = "auth.uid == $uid && next.a.b.c == prev.a.b.c && oneOf('x', 'y', 'z')";
    let doc = format!("root:\n  $uid:\n    .value: {source}\n");

    c.bench_function("deep_expression", |b| {
        b.iter(|| scorch::Compilation::from_yaml(black_box(&doc)).unwrap());
    });
}

criterion_group!(benches, bench_compile, bench_expressions);
criterion_main!(benches);
