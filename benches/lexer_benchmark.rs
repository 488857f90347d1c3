use bytes::Bytes;
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use makex::lexer::tokenize;

fn criterion_benchmark(c: &mut Criterion) {
    let line = "OBJS += $(patsubst %.c,%.o,$(wildcard src/*.c)) # generated\n";
    let s = line.repeat(400000 / line.len());

    c.bench_function("tokenize", |b| {
        b.iter(|| black_box(tokenize(black_box(Bytes::from(s.clone())))))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
