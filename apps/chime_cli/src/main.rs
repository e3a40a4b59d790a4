//! chime-cli - 命令行播放器
//!
//! 播放音频文件直到结束，或以 JSON 输出文件信息。

use std::path::{Path, PathBuf};
use std::time::Duration;

use chime_player::{
    event_channel, PcmDecoder, PlaybackEvent, Player, PlayerConfig, SymphoniaDecoder,
    SystemEngine,
};
use crossbeam_channel::RecvTimeoutError;
use serde::Serialize;

#[derive(Serialize)]
struct FileInfo {
    path: PathBuf,
    channels: u16,
    sample_rate: u32,
    length_secs: Option<f64>,
    codec: String,
}

fn usage(program: &str) -> ! {
    eprintln!("Usage:");
    eprintln!(
        "  {} play <file> [--volume <0.0-1.0>] [--config <config.json>]",
        program
    );
    eprintln!("  {} info <file>   # prints JSON (channels/sample_rate/length)", program);
    std::process::exit(1);
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        usage(&args[0]);
    }

    let input_path = PathBuf::from(&args[2]);

    match args[1].as_str() {
        "play" => {
            let mut volume = None;
            let mut config = PlayerConfig::default();
            let mut rest = args[3..].iter();
            while let Some(flag) = rest.next() {
                match (flag.as_str(), rest.next()) {
                    ("--volume", Some(v)) => match v.parse::<f32>() {
                        Ok(v) => volume = Some(v),
                        Err(_) => {
                            eprintln!("Invalid volume: {}", v);
                            std::process::exit(1);
                        }
                    },
                    ("--config", Some(p)) => match PlayerConfig::from_json_file(Path::new(p)) {
                        Ok(c) => config = c,
                        Err(e) => {
                            eprintln!("Failed to load config {}: {}", p, e);
                            std::process::exit(1);
                        }
                    },
                    _ => usage(&args[0]),
                }
            }
            std::process::exit(play(&input_path, config, volume));
        }
        "info" => match file_info(&input_path) {
            Ok(info) => match serde_json::to_string(&info) {
                Ok(json) => println!("{}", json),
                Err(e) => {
                    eprintln!("Failed to encode info: {}", e);
                    std::process::exit(4);
                }
            },
            Err(e) => {
                println!(r#"{{"valid":false,"error":{}}}"#, serde_json::json!(e));
                std::process::exit(2);
            }
        },
        command => {
            eprintln!("Unknown command: {}", command);
            std::process::exit(1);
        }
    }
}

/// 播放到结束，返回进程退出码
fn play(path: &Path, config: PlayerConfig, volume: Option<f32>) -> i32 {
    let (tx, rx) = event_channel(config.event_capacity);
    let mut player = Player::with_events(SystemEngine, config, tx);

    if let Err(e) = player.play(path) {
        eprintln!("{}", e);
        return 2;
    }
    if let Some(v) = volume {
        player.set_volume(v);
    }

    let length = player.length().ok();
    println!("Playing {}", path.display());

    loop {
        match rx.recv_timeout(Duration::from_millis(500)) {
            Ok(PlaybackEvent::Progress { elapsed, .. }) => {
                eprint!("\r  {} / {}", format_time(Some(elapsed)), format_time(length));
            }
            Ok(PlaybackEvent::Ended { elapsed }) => {
                eprintln!("\r  {} / {}", format_time(Some(elapsed)), format_time(length));
                println!("Finished");
                return 0;
            }
            Ok(PlaybackEvent::Failed { message, .. }) => {
                eprintln!();
                eprintln!("Playback failed: {}", message);
                return 2;
            }
            Err(RecvTimeoutError::Timeout) => {
                // 通道满时结束事件可能被丢弃
                if player.has_ended() {
                    eprintln!();
                    return match player.playback_error() {
                        Some(message) => {
                            eprintln!("Playback failed: {}", message);
                            2
                        }
                        None => {
                            println!("Finished");
                            0
                        }
                    };
                }
                // 设备出错时不会再有事件
                if player.has_stopped() {
                    eprintln!();
                    eprintln!("Output device stopped");
                    return 3;
                }
            }
            Err(RecvTimeoutError::Disconnected) => return 3,
        }
    }
}

fn file_info(path: &Path) -> Result<FileInfo, String> {
    let decoder = SymphoniaDecoder::open(path).map_err(|e| e.to_string())?;
    let format = decoder.format();
    let length_secs = decoder
        .total_frames()
        .ok()
        .filter(|_| format.sample_rate > 0)
        .map(|frames| frames as f64 / format.sample_rate as f64);

    Ok(FileInfo {
        path: path.to_path_buf(),
        channels: format.channels,
        sample_rate: format.sample_rate,
        length_secs,
        codec: decoder.info.codec.clone(),
    })
}

fn format_time(t: Option<Duration>) -> String {
    match t {
        Some(t) => {
            let secs = t.as_secs();
            format!("{:02}:{:02}", secs / 60, secs % 60)
        }
        None => "--:--".to_string(),
    }
}
