use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use synced_lyrics_rs::app::App;
use synced_lyrics_rs::audio::{AudioStreamReader, StreamFormat};
use synced_lyrics_rs::config::Config;
use synced_lyrics_rs::lyrics::{Lyrics, Timestamp};
use synced_lyrics_rs::player::StoppedReason;

#[derive(Parser)]
#[command(name = "synced-lyrics-rs")]
#[command(about = "边听边给歌词打时间标签", long_about = None)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// 输出调试日志
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 解析歌词文件并以标准格式重新输出
    Normalize {
        /// 歌词文件
        lrc: PathBuf,
        /// 不将毫秒四舍五入到百分之一秒
        #[arg(long)]
        no_round: bool,
        /// 输出文件，默认输出到标准输出
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// 查看音频文件的格式和时长
    Inspect {
        /// 音频文件
        audio: PathBuf,
        /// 以 JSON 输出
        #[arg(long)]
        json: bool,
    },
    /// 播放音频并从标准输入读取同步命令
    Sync {
        /// 音频文件
        audio: PathBuf,
        /// 没有已保存的歌词时载入的纯文本歌词
        #[arg(short, long)]
        lyrics: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct AudioInfo {
    path: PathBuf,
    format: StreamFormat,
    source_frame_size: i64,
    dest_frame_size: i64,
    length_bytes: i64,
    duration: String,
    duration_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(cli.config)?;
    debug!("当前配置: {:?}", config);

    match cli.command {
        Commands::Normalize {
            lrc,
            no_round,
            output,
        } => normalize(&lrc, !no_round, output.as_deref()),
        Commands::Inspect { audio, json } => inspect(&audio, json),
        Commands::Sync { audio, lyrics } => sync(Arc::new(config), &audio, lyrics.as_deref()).await,
    }
}

fn normalize(path: &Path, round_to_hundredths: bool, output: Option<&Path>) -> Result<()> {
    let content =
        fs::read_to_string(path).with_context(|| format!("无法读取歌词文件 {:?}", path))?;
    let lyrics = Lyrics::parse(&content);
    info!("解析到 {} 行歌词", lyrics.len());

    let text = lyrics.serialize(round_to_hundredths);
    match output {
        Some(output) => {
            fs::write(output, text).with_context(|| format!("无法写入 {:?}", output))?;
            info!("已写入 {:?}", output);
        }
        None => println!("{}", text),
    }
    Ok(())
}

fn inspect(path: &Path, json: bool) -> Result<()> {
    let reader = AudioStreamReader::open(path)?;
    let mapper = reader.mapper();
    let duration = reader.total_time();

    let info = AudioInfo {
        path: path.to_path_buf(),
        format: reader.format(),
        source_frame_size: mapper.source_frame_size(),
        dest_frame_size: mapper.dest_frame_size(),
        length_bytes: reader.len(),
        duration: duration.to_string(),
        duration_ms: duration.as_millis(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!("文件: {}", info.path.display());
        println!(
            "格式: {} Hz, {} 声道, {} 位{}",
            info.format.sample_rate,
            info.format.channels,
            info.format.bits_per_sample,
            if info.format.float { " 浮点" } else { "" }
        );
        println!(
            "帧大小: 源 {} 字节, 输出 {} 字节",
            info.source_frame_size, info.dest_frame_size
        );
        println!("时长: {} ({} 字节)", info.duration, info.length_bytes);
    }
    Ok(())
}

const SYNC_HELP: &str =
    "命令: p 播放/暂停, s 停止, t 标记当前行, j 跳转到当前行, n/b 下一行/上一行, +/- 微调, w 保存, q 退出";

async fn sync(config: Arc<Config>, audio: &Path, lyrics: Option<&Path>) -> Result<()> {
    let mut app = App::new(config);
    app.open_track(audio)?;

    if app.editor().export_document().is_empty() {
        if let Some(lyrics) = lyrics {
            let text = fs::read_to_string(lyrics)
                .with_context(|| format!("无法读取歌词文件 {:?}", lyrics))?;
            app.select_lyrics_text(&text);
        }
    }

    let Some((_poller, mut positions)) = app.spawn_position_poller() else {
        anyhow::bail!("音频未能打开");
    };

    println!("{}", SYNC_HELP);
    print_current_line(&app);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = stdin.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if !handle_command(&mut app, line.trim()) {
                    break;
                }
            }
            changed = positions.changed() => {
                if changed.is_err() {
                    break;
                }
                let position = *positions.borrow_and_update();
                info!("播放位置: {} / {}", position, app.transport().duration());
                app.transport_mut().process_output_events();
            }
            _ = tokio::signal::ctrl_c() => {
                info!("收到中断信号");
                break;
            }
        }
    }

    if app.is_dirty() {
        warn!("退出时仍有未保存的修改");
    }
    app.close();
    Ok(())
}

/// 处理一条命令，返回 false 表示退出
fn handle_command(app: &mut App, command: &str) -> bool {
    match command {
        "p" => app.transport_mut().toggle_play_pause(),
        "s" => app.transport_mut().stop(StoppedReason::ByUser),
        "t" => {
            let inserted = app.sync_current_line();
            println!("已标记: {}", inserted);
        }
        "j" => match app.jump_to_current_line() {
            Ok(Some(target)) => println!("跳转到 {}", target),
            Ok(None) => println!("当前行没有时间标签"),
            Err(e) => error!("跳转失败: {}", e),
        },
        "n" => app.editor_mut().move_to_next_line(),
        "b" => app.editor_mut().move_to_previous_line(),
        "+" | "-" => match app.nudge_current_line(command == "+") {
            Some(timestamp) => println!("已调整为 {}", timestamp),
            None => println!("当前行没有时间标签"),
        },
        "w" => match app.save() {
            Ok(()) => println!("已保存"),
            Err(e) => error!("保存失败: {:#}", e),
        },
        "q" => return false,
        "" => {}
        other => {
            println!("未知命令: {}", other);
            println!("{}", SYNC_HELP);
            return true;
        }
    }

    print_current_line(app);
    true
}

fn print_current_line(app: &App) {
    let editor = app.editor();
    let line = editor.buffer().current_line();
    let position: Timestamp = app.transport().current_position();
    println!(
        "[{:?} {}] > {}",
        app.transport().state(),
        position,
        if line.is_empty() { "(空行)" } else { line }
    );
}
