//! Criterion benchmarks for minipb
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use minipb::mini_descriptor::{field_modifier, MtDataEncoder};
use minipb::mini_table::Platform;
use minipb::wire::varint;
use minipb::*;

fn build(fields: &[(FieldType, u32, u64)]) -> &'static MiniTable {
    let mut e = MtDataEncoder::new();
    e.start_message(0);
    for &(ty, n, m) in fields {
        e.put_field(ty, n, m).unwrap();
    }
    MiniTable::build(e.as_bytes(), Platform::Bit64).unwrap().leak()
}

fn scalar_payload() -> (&'static MiniTable, Vec<u8>) {
    let t = build(&[
        (FieldType::Int32, 1, 0),
        (FieldType::Int64, 2, 0),
        (FieldType::Fixed64, 3, 0),
        (FieldType::Bool, 4, 0),
        (FieldType::SInt32, 5, 0),
        (FieldType::Double, 6, 0),
    ]);
    let mut buf = Vec::new();
    for i in 0..8u64 {
        buf.push(0x08);
        varint::encode_u64(150 + i, &mut buf);
        buf.push(0x10);
        varint::encode_u64(1_700_000_000_000 + i, &mut buf);
        buf.push(0x19);
        buf.extend_from_slice(&(50_000_000 + i).to_le_bytes());
        buf.extend_from_slice(&[0x20, 0x01, 0x28, 0x03]);
        buf.push(0x31);
        buf.extend_from_slice(&1.25f64.to_le_bytes());
    }
    (t, buf)
}

fn string_payload(len: usize) -> (&'static MiniTable, Vec<u8>) {
    let t = build(&[(FieldType::Bytes, 1, 0), (FieldType::Bytes, 2, field_modifier::IS_REPEATED)]);
    let mut buf = vec![0x0A];
    varint::encode_u64(len as u64, &mut buf);
    buf.extend(core::iter::repeat(b'x').take(len));
    for _ in 0..8 {
        buf.push(0x12);
        varint::encode_u64(len as u64, &mut buf);
        buf.extend(core::iter::repeat(b'y').take(len));
    }
    (t, buf)
}

fn packed_payload(count: u32) -> (&'static MiniTable, Vec<u8>) {
    let t = build(
        &[(FieldType::UInt32, 1, field_modifier::IS_REPEATED | field_modifier::IS_PACKED)],
    );
    let mut body = Vec::new();
    for i in 0..count {
        varint::encode_u32(i * 37, &mut body);
    }
    let mut buf = vec![0x0A];
    varint::encode_u64(body.len() as u64, &mut buf);
    buf.extend_from_slice(&body);
    (t, buf)
}

fn nested_payload(levels: usize) -> (&'static MiniTable, Vec<u8>) {
    let t = build(&[(FieldType::Message, 1, 0), (FieldType::Int32, 2, 0)]);
    t.set_sub_message(t.field(0).unwrap(), t);
    let mut body = vec![0x10, 0x2A];
    for _ in 0..levels {
        let mut outer = vec![0x0A];
        varint::encode_u64(body.len() as u64, &mut outer);
        outer.extend_from_slice(&body);
        outer.extend_from_slice(&[0x10, 0x01]);
        body = outer;
    }
    (t, body)
}

fn run_decode(table: &'static MiniTable, buf: &[u8], options: DecodeOptions) {
    let arena = Arena::new();
    let msg = Message::new(table, &arena).unwrap();
    decode(black_box(buf), &msg, None, options).unwrap();
    black_box(&msg);
}

fn bench_decode_fast_vs_generic(c: &mut Criterion) {
    let (t, buf) = scalar_payload();
    let mut group = c.benchmark_group("decode_scalars");
    for (name, opts) in [
        ("fast_table", DecodeOptions::default()),
        ("generic", DecodeOptions::default().with_disable_fast_table(true)),
    ] {
        group.bench_with_input(BenchmarkId::new(name, buf.len()), &buf, |b, buf| {
            b.iter(|| run_decode(t, buf, opts));
        });
    }
    group.finish();
}

fn bench_decode_strings(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_strings");
    for len in [8usize, 64, 512] {
        let (t, buf) = string_payload(len);
        group.bench_with_input(BenchmarkId::new("copy", len), &buf, |b, buf| {
            b.iter(|| run_decode(t, buf, DecodeOptions::default()));
        });
        group.bench_with_input(BenchmarkId::new("alias", len), &buf, |b, buf| {
            b.iter(|| run_decode(t, buf, DecodeOptions::default().with_alias_strings(true)));
        });
    }
    group.finish();
}

fn bench_decode_packed(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_packed");
    for count in [16u32, 256, 4096] {
        let (t, buf) = packed_payload(count);
        group.bench_with_input(BenchmarkId::new("uint32", count), &buf, |b, buf| {
            b.iter(|| run_decode(t, buf, DecodeOptions::default()));
        });
    }
    group.finish();
}

fn bench_decode_nested(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_nested");
    for levels in [4usize, 32] {
        let (t, buf) = nested_payload(levels);
        group.bench_with_input(BenchmarkId::new("levels", levels), &buf, |b, buf| {
            b.iter(|| run_decode(t, buf, DecodeOptions::default()));
        });
    }
    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let (t, buf) = scalar_payload();
    let arena = Arena::new();
    let msg = Message::new(t, &arena).unwrap();
    decode(&buf, &msg, None, DecodeOptions::default()).unwrap();
    c.bench_function("encode_scalars", |b| {
        b.iter(|| {
            let out = encode(black_box(&msg), EncodeOptions::default()).unwrap();
            black_box(out);
        });
    });
}

criterion_group!(
    benches,
    bench_decode_fast_vs_generic,
    bench_decode_strings,
    bench_decode_packed,
    bench_decode_nested,
    bench_encode
);
criterion_main!(benches);
