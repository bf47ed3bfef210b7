//! Ogx 性能基准测试.
//!
//! 覆盖 CRC-32 计算、顺序解封装与带损坏数据的重同步路径.

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use ogx::core::ogg_crc32;
use ogx::format::{IoContext, OggContainer, OggPager};

/// 生成交织的两路逻辑流, 每路 `packets` 个 packet
fn make_interleaved(packets: usize, packet_size: usize) -> Vec<u8> {
    let mut a = OggPager::new(1);
    let mut b = OggPager::new(2);
    let mut out = Vec::new();
    for i in 0..packets {
        let payload = vec![(i % 251) as u8; packet_size];
        let last = i + 1 == packets;
        a.write_packet(&payload, i as i64 * 960, last).unwrap();
        b.write_packet(&payload, i as i64 * 1024, last).unwrap();
        out.extend(a.take_bytes());
        out.extend(b.take_bytes());
    }
    out
}

/// 顺序读取全部 packet 描述符
fn demux_all(data: Vec<u8>) -> usize {
    let container = OggContainer::new(IoContext::from_bytes(data));
    let mut count = 0;
    while container.gather_one_page().unwrap() != ogx::format::GatherOutcome::Exhausted {
        for serial in container.active_serials().unwrap() {
            let reader = container.get_stream(serial).unwrap();
            while reader.try_next_packet().unwrap().is_some() {
                count += 1;
            }
        }
    }
    count
}

fn bench_crc(c: &mut Criterion) {
    let data: Vec<u8> = (0..65536u32).map(|i| (i * 31) as u8).collect();
    let mut group = c.benchmark_group("crc");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("ogg_crc32_64k", |b| {
        b.iter(|| ogg_crc32(black_box(&data)));
    });
    group.finish();
}

fn bench_demux(c: &mut Criterion) {
    let data = make_interleaved(500, 400);
    let mut group = c.benchmark_group("demux");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("interleaved_2x500", |b| {
        b.iter(|| demux_all(black_box(data.clone())));
    });
    group.finish();
}

fn bench_resync(c: &mut Criterion) {
    // 每隔一页破坏一个载荷字节, 强制触发重同步
    let mut data = make_interleaved(200, 400);
    let mut pos = 0;
    let mut flip = false;
    while let Some(found) = data[pos..].windows(4).position(|w| w == b"OggS") {
        let page_start = pos + found;
        if flip && page_start + 40 < data.len() {
            data[page_start + 40] ^= 0xFF;
        }
        flip = !flip;
        pos = page_start + 4;
    }

    c.bench_function("resync_corrupt_every_other_page", |b| {
        b.iter(|| demux_all(black_box(data.clone())));
    });
}

criterion_group!(benches, bench_crc, bench_demux, bench_resync);
criterion_main!(benches);
