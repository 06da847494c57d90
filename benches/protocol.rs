#[macro_use]
extern crate criterion;

use criterion::black_box;
use criterion::Criterion;
use mcplcwatch::protocol::{
    build_read_frame, build_write_words_frame, parse_word_response, AccessRoute, FrameType,
};
use mcplcwatch::DeviceType;

fn build_read(c: &mut Criterion) {
    let route = AccessRoute::default();

    c.bench_function("build_read_frame_3e", move |b| {
        b.iter(|| build_read_frame(DeviceType::D, black_box(100), 960, FrameType::E3, &route))
    });
}

fn build_write(c: &mut Criterion) {
    let route = AccessRoute::default();
    let values: Vec<u16> = (0..960u16).collect();

    c.bench_function("build_write_words_frame_3e", move |b| {
        b.iter(|| build_write_words_frame(DeviceType::D, 0, black_box(&values), FrameType::E3, &route))
    });
}

fn parse_read(c: &mut Criterion) {
    let mut response = vec![0u8; FrameType::E3.payload_offset()];
    for value in 0..960u16 {
        response.extend_from_slice(&value.to_le_bytes());
    }

    c.bench_function("parse_word_response_3e", move |b| {
        b.iter(|| parse_word_response(black_box(&response), 960, FrameType::E3))
    });
}

criterion_group!(benches, build_read, build_write, parse_read);
criterion_main!(benches);
