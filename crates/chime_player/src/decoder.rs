//! 音频解码器
//!
//! 使用 symphonia 解码音频文件

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::{EngineError, PcmDecoder, PcmFormat};

/// 解码器错误
#[derive(thiserror::Error, Debug)]
pub enum DecoderError {
    #[error("No supported audio track found")]
    NoTrack,
    #[error("Unsupported codec")]
    UnsupportedCodec,
    #[error("Track length is unknown")]
    UnknownLength,
    #[error("Decoded {actual} channels, expected {expected}")]
    ChannelMismatch { expected: u16, actual: usize },
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SymphoniaError> for DecoderError {
    fn from(e: SymphoniaError) -> Self {
        DecoderError::Decode(e.to_string())
    }
}

/// 音频信息
#[derive(Debug, Clone)]
pub struct AudioInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub total_frames: Option<u64>,
    pub codec: String,
}

/// symphonia 解码器
///
/// 把按包解码的数据整理成按帧读取的交错 f32 流。
pub struct SymphoniaDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_buf: Option<SampleBuffer<f32>>,
    /// 已解码但尚未交给设备的采样
    pending: Vec<f32>,
    pending_pos: usize,
    /// 已交给设备的帧数
    cursor: u64,
    pub info: AudioInfo,
}

impl SymphoniaDecoder {
    /// 打开音频文件，按扩展名提示探测格式
    pub fn open(path: &Path) -> Result<Self, DecoderError> {
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| DecoderError::Decode(e.to_string()))?;

        let format = probed.format;

        // 查找第一个音频轨道
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecoderError::NoTrack)?;

        let track_id = track.id;
        let codec_params = &track.codec_params;

        let sample_rate = codec_params.sample_rate.unwrap_or(44100);
        let channels = match codec_params.channels {
            Some(c) => c.count() as u16,
            None => {
                log::warn!("{}: channel layout unknown, assuming stereo", path.display());
                2
            }
        };

        let info = AudioInfo {
            sample_rate,
            channels,
            total_frames: codec_params.n_frames,
            codec: format!("{:?}", codec_params.codec),
        };

        let decoder = symphonia::default::get_codecs()
            .make(codec_params, &DecoderOptions::default())
            .map_err(|_| DecoderError::UnsupportedCodec)?;

        log::debug!(
            "Opened {}: {} Hz, {} ch, {:?} frames, codec {}",
            path.display(),
            info.sample_rate,
            info.channels,
            info.total_frames,
            info.codec
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_buf: None,
            pending: Vec::new(),
            pending_pos: 0,
            cursor: 0,
            info,
        })
    }

    /// 解码下一个包到 `pending`，流结束时返回 false
    fn refill(&mut self) -> Result<bool, DecoderError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(false);
                }
                Err(e) => return Err(e.into()),
            };

            // 跳过非目标轨道
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    log::warn!("Skipping corrupt packet: {}", e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let spec = *decoded.spec();
            let capacity = decoded.capacity();
            check_channels(self.info.channels, spec.channels.count())?;

            if self
                .sample_buf
                .as_ref()
                .is_some_and(|b| b.capacity() < capacity)
            {
                self.sample_buf = None;
            }
            let buf = self
                .sample_buf
                .get_or_insert_with(|| SampleBuffer::new(capacity as u64, spec));
            buf.copy_interleaved_ref(decoded);

            self.pending.clear();
            self.pending.extend_from_slice(buf.samples());
            self.pending_pos = 0;

            if !self.pending.is_empty() {
                return Ok(true);
            }
        }
    }

    fn read_frames(&mut self, out: &mut [f32]) -> Result<u64, DecoderError> {
        let channels = self.info.channels.max(1) as usize;
        let wanted = (out.len() / channels) * channels;
        let mut written = 0;

        while written < wanted {
            if self.pending_pos >= self.pending.len() && !self.refill()? {
                break;
            }
            let available = self.pending.len() - self.pending_pos;
            let n = available.min(wanted - written);
            out[written..written + n]
                .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
            self.pending_pos += n;
            written += n;
        }

        let frames = (written / channels) as u64;
        self.cursor += frames;
        Ok(frames)
    }
}

/// 解码出的声道数必须与设备配置一致，否则按帧切分会错位
fn check_channels(expected: u16, actual: usize) -> Result<(), DecoderError> {
    if actual != expected as usize {
        return Err(DecoderError::ChannelMismatch { expected, actual });
    }
    Ok(())
}

impl PcmDecoder for SymphoniaDecoder {
    fn format(&self) -> PcmFormat {
        PcmFormat {
            channels: self.info.channels,
            sample_rate: self.info.sample_rate,
        }
    }

    fn read_pcm_frames(&mut self, out: &mut [f32]) -> Result<u64, EngineError> {
        Ok(self.read_frames(out)?)
    }

    fn cursor(&self) -> Result<u64, EngineError> {
        Ok(self.cursor)
    }

    fn total_frames(&self) -> Result<u64, EngineError> {
        Ok(self.info.total_frames.ok_or(DecoderError::UnknownLength)?)
    }
}
