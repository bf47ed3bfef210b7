//! ogx-probe - Ogg 容器信息探测工具
//!
//! 读取整个 Ogg 容器, 输出每个逻辑流的页面数、packet 数、载荷字节数、
//! 容器开销与粒度范围, 以及重同步丢弃的数据量.

mod logging;
mod report;

use std::process;

use anyhow::{Context, bail};
use clap::Parser;
use ogx_format::{ContainerOptions, IoContext, OggContainer};

use report::{CodecTable, ProbeOutput, codec_recorder};

/// Ogx Ogg 容器信息探测工具
#[derive(Parser, Debug)]
#[command(name = "ogx-probe", version, about = "纯 Rust Ogg 容器信息探测工具")]
struct Cli {
    /// 输入文件路径
    input: Option<String>,

    /// 从标准输入读取 (不可寻址)
    #[arg(long, conflicts_with = "input")]
    stdin: bool,

    /// 容器配置文件 (JSON)
    #[arg(long)]
    config: Option<String>,

    /// 覆盖重同步搜索窗口 (字节)
    #[arg(long)]
    resync_window: Option<usize>,

    /// 逐个列出 packet 描述符
    #[arg(long)]
    show_packets: bool,

    /// 输出 JSON 格式
    #[arg(long)]
    json: bool,

    /// 静默模式 (只输出探测结果)
    #[arg(short, long)]
    quiet: bool,

    /// 日志级别 (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();

    if cli.input.is_none() && !cli.stdin {
        print_banner();
        return;
    }

    if let Err(e) = logging::init("ogx-probe", cli.verbose) {
        eprintln!("警告: 日志初始化失败: {e:#}");
    }

    if let Err(e) = run(&cli) {
        tracing::error!("探测失败: {e:#}");
        eprintln!("错误: {e:#}");
        process::exit(1);
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let mut options = match &cli.config {
        Some(path) => ContainerOptions::from_json_file(path)
            .with_context(|| format!("加载配置文件 '{path}' 失败"))?,
        None => ContainerOptions::default(),
    };
    if let Some(window) = cli.resync_window {
        options.resync_window = window;
    }

    let (io, filename) = match &cli.input {
        Some(path) if !cli.stdin => (
            IoContext::open_read(path).with_context(|| format!("无法打开文件 '{path}'"))?,
            path.clone(),
        ),
        Some(_) => bail!("--stdin 与输入文件不能同时使用"),
        None => (IoContext::from_reader(std::io::stdin()), "-".to_string()),
    };

    if !cli.quiet {
        eprintln!(
            "ogx-probe 版本 {} -- 纯 Rust Ogg 探测工具",
            env!("CARGO_PKG_VERSION")
        );
        eprintln!("输入: {filename}");
    }
    tracing::info!("开始探测: {filename} (resync_window={})", options.resync_window);

    let codecs = CodecTable::default();
    let container = OggContainer::with_options(io, options, codec_recorder(codecs.clone()))
        .context("创建容器失败")?;
    let output = report::collect(&container, &filename, &codecs, cli.show_packets)
        .context("读取容器失败")?;
    container.dispose()?;

    tracing::info!(
        "探测完成: {} 个逻辑流, {} 页, 丢弃 {} 字节",
        output.container.nb_streams,
        output.container.pages,
        output.container.waste_bytes,
    );

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("序列化结果失败")?;
        println!("{json}");
    } else {
        print_text(&output);
    }
    Ok(())
}

/// 文本输出
fn print_text(output: &ProbeOutput) {
    let c = &output.container;
    println!("[CONTAINER]");
    println!("  文件名       : {}", c.filename);
    println!("  可寻址       : {}", if c.seekable { "是" } else { "否" });
    println!("  逻辑流数量   : {}", c.nb_streams);
    println!("  页面数       : {}", c.pages);
    println!("  丢弃字节     : {}", c.waste_bytes);
    println!("[/CONTAINER]");
    println!();

    for s in &output.streams {
        println!("[STREAM serial={}]", s.serial);
        println!("  编解码器     : {}", s.codec_name);
        println!("  页面数       : {}", s.pages);
        println!("  packet 数    : {}", s.packets);
        println!("  载荷字节     : {}", s.bytes);
        println!("  容器开销     : {} 字节", s.overhead_bytes);
        if let (Some(first), Some(last)) = (s.first_granule, s.last_granule) {
            println!("  粒度范围     : {first} .. {last}");
        }
        if s.resyncs > 0 {
            println!("  重同步次数   : {}", s.resyncs);
        }
        if s.sequence_gaps > 0 {
            println!("  序号断裂     : {}", s.sequence_gaps);
        }
        println!("  EOS          : {}", if s.ended_by_eos { "是" } else { "否" });
        println!("[/STREAM]");
        println!();
    }

    if let Some(packets) = &output.packets {
        println!("[PACKETS]");
        for p in packets {
            println!(
                "  serial={:<10} offset={:<10} len={:<6} granule={:<10} seq={:<6} {}",
                p.serial, p.offset, p.length, p.granule, p.page_sequence, p.flags,
            );
        }
        println!("[/PACKETS]");
    }
}

fn print_banner() {
    println!(
        "ogx-probe 版本 {} -- 纯 Rust Ogg 容器探测工具",
        env!("CARGO_PKG_VERSION")
    );
    println!();
    println!("用法: ogx-probe [选项] <输入文件>");
    println!("      ogx-probe --stdin [选项] < input.ogg");
    println!();
    println!("使用 --help 查看所有选项");
}
