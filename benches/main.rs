use criterion::criterion_group;
use criterion::criterion_main;
use criterion::Criterion;
use std::hint::black_box;

use panda_runtime::runtime::coretypes::string_helpers;
use panda_runtime::runtime::panda_file::File;
use panda_runtime::{Options, Runtime};

const BOOT_FILE: &str = ".record Lpanda/Object; access=public\n";

fn haystack<T: From<u8>>(len: usize) -> Vec<T> {
    (0..len).map(|i| T::from(b'a' + (i % 7) as u8)).collect()
}

fn search(c: &mut Criterion) {
    let narrow: Vec<u8> = haystack(4096);
    let wide: Vec<u16> = haystack(4096);
    let pattern: Vec<u8> = b"gabcdefg".to_vec();
    let wide_pattern: Vec<u16> = pattern.iter().map(|&b| b as u16).collect();
    let missing: Vec<u8> = b"abcdefgz".to_vec();

    let mut group = c.benchmark_group("index_of");
    group.bench_function("narrow_in_narrow", |b| {
        b.iter(|| string_helpers::index_of(black_box(&narrow), black_box(&pattern), 100))
    });
    group.bench_function("wide_in_wide", |b| {
        b.iter(|| string_helpers::index_of(black_box(&wide), black_box(&wide_pattern), 100))
    });
    group.bench_function("narrow_in_wide", |b| {
        b.iter(|| string_helpers::index_of(black_box(&wide), black_box(&pattern), 100))
    });
    group.bench_function("missing", |b| {
        b.iter(|| string_helpers::index_of(black_box(&narrow), black_box(&missing), 0))
    });
    group.finish();

    c.bench_function("last_index_of", |b| {
        b.iter(|| string_helpers::last_index_of(black_box(&narrow), black_box(&pattern), 4000))
    });
}

fn strings(c: &mut Criterion) {
    let boot = File::parse("bench-boot.abc", BOOT_FILE).unwrap();
    let runtime = Runtime::create(Options::default(), vec![boot]).unwrap();
    let ctx = runtime.string_context(runtime.main_thread());
    let ascii = "the quick brown fox jumps over the lazy dog".repeat(4);
    let greek = "η γρήγορη καφέ αλεπού".repeat(4);

    c.bench_function("create_from_utf8_ascii", |b| {
        b.iter(|| ctx.create_from_utf8(black_box(ascii.as_bytes()), true))
    });
    c.bench_function("create_from_utf8_greek", |b| {
        b.iter(|| ctx.create_from_utf8(black_box(greek.as_bytes()), true))
    });
    let first = ctx.create_from_utf8(ascii.as_bytes(), true).unwrap();
    let second = ctx.create_from_utf8(greek.as_bytes(), true).unwrap();
    c.bench_function("concat_mixed", |b| b.iter(|| ctx.concat(black_box(first), black_box(second))));
}

criterion_group!(benches, search, strings);
criterion_main!(benches);
