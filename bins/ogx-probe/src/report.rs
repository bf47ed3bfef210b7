//! 探测结果收集.
//!
//! 逐页推进容器, 每步之后把各逻辑流排队的描述符取空并累计统计,
//! 这样不可寻址输入 (stdin) 也只需保留很小的数据窗口.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use ogx_core::OgxResult;
use ogx_format::{
    GatherOutcome, NewStream, OggContainer, PacketDescriptor, PacketFlags, StreamDecision,
};
use serde::Serialize;

/// 完整探测结果
#[derive(Debug, Serialize)]
pub struct ProbeOutput {
    pub container: ContainerInfo,
    pub streams: Vec<StreamInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packets: Option<Vec<PacketInfo>>,
}

/// 容器信息
#[derive(Debug, Serialize)]
pub struct ContainerInfo {
    pub filename: String,
    pub seekable: bool,
    pub nb_streams: usize,
    pub pages: u64,
    pub waste_bytes: u64,
}

/// 逻辑流信息
#[derive(Debug, Default, Serialize)]
pub struct StreamInfo {
    pub serial: u32,
    pub codec_name: String,
    pub pages: u64,
    /// 完整 packet 数 (跨页 packet 只计一次)
    pub packets: u64,
    pub bytes: u64,
    pub overhead_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_granule: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_granule: Option<i64>,
    pub resyncs: u64,
    pub sequence_gaps: u64,
    pub ended_by_eos: bool,
}

/// 单个描述符
#[derive(Debug, Serialize)]
pub struct PacketInfo {
    pub serial: u32,
    pub offset: u64,
    pub length: usize,
    pub granule: i64,
    pub page_sequence: u32,
    pub flags: String,
}

impl From<&PacketDescriptor> for PacketInfo {
    fn from(desc: &PacketDescriptor) -> Self {
        Self {
            serial: desc.serial,
            offset: desc.offset,
            length: desc.length,
            granule: desc.granule_position,
            page_sequence: desc.page_sequence,
            flags: flag_names(desc.flags),
        }
    }
}

/// 标志名称, 以 `|` 连接
pub fn flag_names(flags: PacketFlags) -> String {
    flags
        .iter_names()
        .map(|(name, _)| name)
        .collect::<Vec<_>>()
        .join("|")
}

/// 根据第一个 packet 的魔数识别编解码器
pub fn identify_codec(first_packet: &[u8]) -> &'static str {
    const SIGNATURES: &[(&[u8], &str)] = &[
        (b"\x01vorbis", "vorbis"),
        (b"OpusHead", "opus"),
        (b"\x7fFLAC", "flac"),
        (b"Speex   ", "speex"),
        (b"\x80theora", "theora"),
        (b"fishead\0", "skeleton"),
        (b"\x80kate\0\0\0", "kate"),
    ];
    SIGNATURES
        .iter()
        .find(|(magic, _)| first_packet.starts_with(magic))
        .map_or("unknown", |(_, name)| name)
}

/// 新流回调记录的编解码器名称
pub type CodecTable = Arc<Mutex<BTreeMap<u32, &'static str>>>;

/// 创建一个记录编解码器名称并接受所有流的决策器
pub fn codec_recorder(table: CodecTable) -> impl Fn(&NewStream<'_>) -> StreamDecision + Send + Sync {
    move |stream: &NewStream<'_>| {
        let codec = identify_codec(stream.first_packet());
        log::debug!(
            "新逻辑流 serial={} codec={codec} bos={}",
            stream.serial(),
            stream.is_bos(),
        );
        if let Ok(mut table) = table.lock() {
            table.entry(stream.serial()).or_insert(codec);
        }
        StreamDecision::Accept
    }
}

/// 逐页读取整个容器并汇总
pub fn collect(
    container: &OggContainer,
    filename: &str,
    codecs: &CodecTable,
    keep_packets: bool,
) -> OgxResult<ProbeOutput> {
    let mut streams: BTreeMap<u32, StreamInfo> = BTreeMap::new();
    let mut packets = keep_packets.then(Vec::new);

    loop {
        let outcome = container.gather_one_page()?;
        for serial in container.active_serials()? {
            let reader = container.get_stream(serial)?;
            let info = streams.entry(serial).or_insert_with(|| StreamInfo {
                serial,
                ..StreamInfo::default()
            });
            while let Some(desc) = reader.try_next_packet()? {
                accumulate(info, &desc);
                if let Some(list) = packets.as_mut() {
                    list.push(PacketInfo::from(&desc));
                }
            }
            info.pages = reader.pages()?;
            info.overhead_bytes = reader.overhead_bits()? / 8;
        }
        if outcome == GatherOutcome::Exhausted {
            break;
        }
    }

    let stats = container.stats()?;
    let codecs = codecs.lock().map(|t| t.clone()).unwrap_or_default();
    for info in streams.values_mut() {
        info.codec_name = codecs.get(&info.serial).copied().unwrap_or("unknown").to_string();
    }

    Ok(ProbeOutput {
        container: ContainerInfo {
            filename: filename.to_string(),
            seekable: container.is_seekable(),
            nb_streams: streams.len(),
            pages: stats.pages,
            waste_bytes: stats.waste_bytes(),
        },
        streams: streams.into_values().collect(),
        packets,
    })
}

fn accumulate(info: &mut StreamInfo, desc: &PacketDescriptor) {
    info.bytes += desc.length as u64;
    if !desc.continues_on_next_page() {
        info.packets += 1;
    }
    // -1 表示该页没有 packet 在此结束
    if desc.granule_position >= 0 {
        info.first_granule.get_or_insert(desc.granule_position);
        info.last_granule = Some(desc.granule_position);
    }
    if desc.found_by_resync() {
        info.resyncs += 1;
    }
    if desc.flags.contains(PacketFlags::SEQUENCE_GAP) {
        info.sequence_gaps += 1;
    }
    if desc.is_end_of_stream() {
        info.ended_by_eos = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ogx_format::{IoContext, OggPager};

    fn two_stream_file() -> Vec<u8> {
        let mut vorbis = OggPager::new(100);
        vorbis.write_packet(b"\x01vorbis-id", 0, false).unwrap();
        vorbis.write_packet(&[7u8; 600], 1024, true).unwrap();

        let mut opus = OggPager::new(200);
        opus.write_packet(b"OpusHead-id", 0, false).unwrap();
        opus.write_packet(b"frame", 960, true).unwrap();

        let mut data = vorbis.take_bytes();
        data.extend(opus.take_bytes());
        data
    }

    #[test]
    fn test_identify_codec() {
        assert_eq!(identify_codec(b"\x01vorbis\0\0"), "vorbis");
        assert_eq!(identify_codec(b"OpusHead\x01"), "opus");
        assert_eq!(identify_codec(b"\x7fFLAC\x01\x00"), "flac");
        assert_eq!(identify_codec(b""), "unknown");
    }

    #[test]
    fn test_flag_names() {
        assert_eq!(flag_names(PacketFlags::empty()), "");
        assert_eq!(
            flag_names(PacketFlags::FOUND_BY_RESYNC | PacketFlags::END_OF_STREAM),
            "FOUND_BY_RESYNC|END_OF_STREAM"
        );
    }

    #[test]
    fn test_collect_two_streams() {
        let codecs = CodecTable::default();
        let container = OggContainer::with_decider(
            IoContext::from_bytes(two_stream_file()),
            codec_recorder(codecs.clone()),
        );
        let output = collect(&container, "mem", &codecs, true).unwrap();

        assert_eq!(output.container.nb_streams, 2);
        assert_eq!(output.container.waste_bytes, 0);
        let vorbis = &output.streams[0];
        assert_eq!(vorbis.serial, 100);
        assert_eq!(vorbis.codec_name, "vorbis");
        assert_eq!(vorbis.packets, 2);
        assert_eq!(vorbis.bytes, 10 + 600);
        assert_eq!(vorbis.last_granule, Some(1024));
        assert!(vorbis.ended_by_eos);
        assert_eq!(output.streams[1].codec_name, "opus");
        assert_eq!(output.packets.as_ref().map(Vec::len), Some(4));
    }

    #[test]
    fn test_collect_non_seekable() {
        let codecs = CodecTable::default();
        let container = OggContainer::with_decider(
            IoContext::from_reader(std::io::Cursor::new(two_stream_file())),
            codec_recorder(codecs.clone()),
        );
        let output = collect(&container, "-", &codecs, false).unwrap();
        assert!(!output.container.seekable);
        assert_eq!(output.streams.len(), 2);
        assert!(output.packets.is_none());
    }
}
