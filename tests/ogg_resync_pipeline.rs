//! 端到端集成测试: 损坏数据下的重同步.
//!
//! 测试流程: 生成有效页面 → 插入垃圾数据/破坏校验和/截断 → 解封装 → 验证丢弃量与标志

use ogx::format::{
    ContainerOptions, GatherOutcome, IoContext, OggContainer, OggPager, PacketFlags, PageBuilder,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 辅助: 一个只含单个 packet 的有效页面
fn valid_page(serial: u32, sequence: u32, payload: &[u8]) -> Vec<u8> {
    PageBuilder::new(serial, sequence)
        .granule(i64::from(sequence))
        .packet(payload)
        .build()
        .unwrap()
}

/// 辅助: 在有效页面前放置 `n` 字节垃圾
fn with_garbage_prefix(n: usize) -> Vec<u8> {
    let mut data = vec![0u8; n];
    data.extend(valid_page(1, 0, &[9u8; 10]));
    data
}

#[test]
fn test_garbage_prefix_waste_is_exact() {
    init_logger();
    for n in [1usize, 17, 4096, 40_000] {
        let container = OggContainer::new(IoContext::from_bytes(with_garbage_prefix(n)));
        assert!(container.initialize().unwrap(), "前置 {n} 字节垃圾");
        let stats = container.stats().unwrap();
        assert_eq!(stats.waste_bits, 8 * n as u64);
        assert_eq!(stats.pages, 1);

        let desc = container
            .get_stream(1)
            .unwrap()
            .next_packet()
            .unwrap()
            .unwrap();
        assert_eq!(desc.flags, PacketFlags::FOUND_BY_RESYNC);
        assert_eq!(desc.offset, n as u64 + 28);
    }
}

#[test]
fn test_garbage_prefix_at_window_limit() {
    init_logger();
    let container = OggContainer::new(IoContext::from_bytes(with_garbage_prefix(65_535)));
    assert!(container.initialize().unwrap());
    assert_eq!(container.stats().unwrap().waste_bits, 8 * 65_535);
}

#[test]
fn test_garbage_prefix_beyond_window() {
    init_logger();
    let container = OggContainer::new(IoContext::from_bytes(with_garbage_prefix(65_536)));
    assert!(!container.initialize().unwrap());
    assert!(container.active_serials().unwrap().is_empty());
    // 扫描不会重复进行, 页面再也不会被找回
    assert_eq!(
        container.gather_one_page().unwrap(),
        GatherOutcome::Exhausted
    );
    assert_eq!(container.stats().unwrap().waste_bits, 8 * 65_536);
}

#[test]
fn test_configured_window() {
    let options = ContainerOptions {
        resync_window: 1024,
        ..ContainerOptions::default()
    };
    let found = OggContainer::with_options(
        IoContext::from_bytes(with_garbage_prefix(1023)),
        options.clone(),
        ogx::format::AcceptAll,
    )
    .unwrap();
    assert!(found.initialize().unwrap());

    let lost = OggContainer::with_options(
        IoContext::from_bytes(with_garbage_prefix(1024)),
        options,
        ogx::format::AcceptAll,
    )
    .unwrap();
    assert!(!lost.initialize().unwrap());
}

#[test]
fn test_garbage_between_pages() {
    init_logger();
    let mut data = valid_page(1, 0, b"first");
    data.extend(vec![0x11u8; 333]);
    data.extend(valid_page(1, 1, b"second"));

    let container = OggContainer::new(IoContext::from_bytes(data));
    assert!(container.initialize().unwrap());
    let reader = container.get_stream(1).unwrap();

    let first = reader.read_packet().unwrap().unwrap();
    assert_eq!(&first.data[..], b"first");
    assert!(first.flags.is_empty());

    let second = reader.read_packet().unwrap().unwrap();
    assert_eq!(&second.data[..], b"second");
    assert_eq!(second.flags, PacketFlags::FOUND_BY_RESYNC);
    assert_eq!(container.stats().unwrap().waste_bytes(), 333);
}

#[test]
fn test_corrupted_middle_page() {
    init_logger();
    let pages: Vec<Vec<u8>> = (0..3)
        .map(|seq| valid_page(4, seq, &[seq as u8; 50]))
        .collect();
    let mut broken = pages[1].clone();
    let last = broken.len() - 1;
    broken[last] ^= 0xFF;

    let mut data = pages[0].clone();
    data.extend(&broken);
    data.extend(&pages[2]);

    let container = OggContainer::new(IoContext::from_bytes(data));
    assert!(container.initialize().unwrap());
    let reader = container.get_stream(4).unwrap();

    let p0 = reader.next_packet().unwrap().unwrap();
    assert_eq!(p0.page_sequence, 0);
    let p2 = reader.next_packet().unwrap().unwrap();
    assert_eq!(p2.page_sequence, 2);
    assert_eq!(
        p2.flags,
        PacketFlags::FOUND_BY_RESYNC | PacketFlags::SEQUENCE_GAP
    );
    assert!(reader.next_packet().unwrap().is_none());

    let stats = container.stats().unwrap();
    assert_eq!(stats.pages, 2);
    assert_eq!(stats.waste_bytes(), broken.len() as u64);
}

#[test]
fn test_lost_middle_page_does_not_join_fragments() {
    init_logger();
    // 600 个满段 + 终止段 = 601 段, 分成 255 + 255 + 91 段的三页
    let big = vec![0x5Au8; 255 * 600];
    let mut pager = OggPager::new(6);
    pager.write_packet(&big, 9600, false).unwrap();
    pager.write_packet(b"after", 10_560, true).unwrap();
    let mut data = pager.take_bytes();

    let page_len = 27 + 255 + 255 * 255;
    data[page_len + 27 + 255 + 100] ^= 0xFF;

    let container = OggContainer::new(IoContext::from_bytes(data));
    assert!(container.initialize().unwrap());
    let reader = container.get_stream(6).unwrap();

    // 第一页与第三页的片段不能拼接成 87975 字节的 packet
    let packet = reader.read_packet().unwrap().unwrap();
    assert_eq!(&packet.data[..], b"after");
    assert_eq!(packet.page_sequence, 3);
    assert_eq!(packet.flags, PacketFlags::END_OF_STREAM);
    assert!(reader.read_packet().unwrap().is_none());
    assert_eq!(container.stats().unwrap().waste_bytes(), page_len as u64);
}

#[test]
fn test_truncated_tail_ends_streams() {
    init_logger();
    let mut pager = OggPager::new(8);
    pager.write_packet(&[1u8; 100], 0, false).unwrap();
    pager.write_packet(&[2u8; 100], 1, false).unwrap();
    let mut data = pager.take_bytes();
    // 截断最后一页的载荷
    data.truncate(data.len() - 30);

    let container = OggContainer::new(IoContext::from_bytes(data));
    assert!(container.initialize().unwrap());
    let reader = container.get_stream(8).unwrap();
    assert!(reader.next_packet().unwrap().is_some());
    assert!(reader.next_packet().unwrap().is_none());
    assert!(reader.is_ended().unwrap());
    assert!(container.stats().unwrap().waste_bits > 0);
}

#[test]
fn test_heavy_corruption_degrades_gracefully() {
    init_logger();
    let mut pager = OggPager::new(2);
    for i in 0..100u32 {
        pager
            .write_packet(&[(i % 200) as u8; 120], i64::from(i), i == 99)
            .unwrap();
    }
    let mut data = pager.take_bytes();
    // 每 997 字节破坏一个字节
    for pos in (40..data.len()).step_by(997) {
        data[pos] ^= 0xA5;
    }

    let container = OggContainer::new(IoContext::from_bytes(data));
    container.initialize().unwrap();
    let total = container.total_page_count().unwrap();
    let stats = container.stats().unwrap();
    assert!(total < 100);
    assert!(total > 0);
    assert!(stats.waste_bits > 0);
}
