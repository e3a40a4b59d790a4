//! 测试用音频引擎
//!
//! 记录存活的解码器和设备数量，`pump` 在当前线程上模拟一次设备回调。

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    AudioEngine, DataCallback, DecoderError, DeviceConfig, DeviceState, EngineError, OutputDevice,
    OutputError, PcmDecoder, PcmFormat, SymphoniaDecoder,
};

/// 模拟曲目
#[derive(Debug, Clone, Copy)]
pub struct MockTrack {
    pub channels: u16,
    pub sample_rate: u32,
    pub total_frames: u64,
    /// 读到该帧位置后返回解码错误
    pub fail_at: Option<u64>,
    pub unknown_length: bool,
}

impl MockTrack {
    pub fn new(channels: u16, sample_rate: u32, total_frames: u64) -> Self {
        Self {
            channels,
            sample_rate,
            total_frames,
            fail_at: None,
            unknown_length: false,
        }
    }
}

/// 注入的设备故障
#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
    pub device_init: bool,
    pub device_start: bool,
    pub device_stop: bool,
    pub volume_query: bool,
    pub volume_set: bool,
}

struct DeviceSlot {
    id: u64,
    channels: u16,
    started: Arc<AtomicBool>,
    callback: DataCallback,
}

#[derive(Default)]
struct Shared {
    tracks: Mutex<HashMap<PathBuf, MockTrack>>,
    faults: Mutex<Faults>,
    live_decoders: AtomicUsize,
    live_devices: AtomicUsize,
    next_device_id: AtomicU64,
    slot: Mutex<Option<DeviceSlot>>,
    last_config: Mutex<Option<DeviceConfig>>,
}

#[derive(Clone, Default)]
pub struct MockEngine {
    shared: Arc<Shared>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_track(&self, path: impl Into<PathBuf>, track: MockTrack) {
        self.shared.tracks.lock().insert(path.into(), track);
    }

    pub fn set_faults(&self, faults: Faults) {
        *self.shared.faults.lock() = faults;
    }

    pub fn live_decoders(&self) -> usize {
        self.shared.live_decoders.load(Ordering::SeqCst)
    }

    pub fn live_devices(&self) -> usize {
        self.shared.live_devices.load(Ordering::SeqCst)
    }

    pub fn last_config(&self) -> Option<DeviceConfig> {
        *self.shared.last_config.lock()
    }

    /// 驱动当前设备的回调一次，设备未启动时返回 None
    pub fn pump(&self, frames: usize) -> Option<Vec<f32>> {
        let mut slot = self.shared.slot.lock();
        let slot = slot.as_mut()?;
        if !slot.started.load(Ordering::SeqCst) {
            return None;
        }
        // 预填非零值，检查回调是否写满缓冲区
        let mut out = vec![-1.0f32; frames * slot.channels as usize];
        (slot.callback)(&mut out);
        Some(out)
    }
}

impl AudioEngine for MockEngine {
    type Decoder = MockDecoder;
    type Device = MockDevice;

    fn open_decoder(&self, path: &Path) -> Result<Self::Decoder, EngineError> {
        let track = self.shared.tracks.lock().get(path).copied().ok_or_else(|| {
            DecoderError::Io(io::Error::new(io::ErrorKind::NotFound, "no such track"))
        })?;
        self.shared.live_decoders.fetch_add(1, Ordering::SeqCst);
        Ok(MockDecoder {
            track,
            cursor: 0,
            shared: self.shared.clone(),
        })
    }

    fn init_device(
        &self,
        config: DeviceConfig,
        callback: DataCallback,
    ) -> Result<Self::Device, EngineError> {
        *self.shared.last_config.lock() = Some(config);
        if self.shared.faults.lock().device_init {
            return Err(OutputError::NoDevice.into());
        }

        let id = self.shared.next_device_id.fetch_add(1, Ordering::SeqCst);
        let started = Arc::new(AtomicBool::new(false));
        *self.shared.slot.lock() = Some(DeviceSlot {
            id,
            channels: config.channels,
            started: started.clone(),
            callback,
        });
        self.shared.live_devices.fetch_add(1, Ordering::SeqCst);

        Ok(MockDevice {
            id,
            started,
            volume: AtomicU32::new(1.0f32.to_bits()),
            shared: self.shared.clone(),
        })
    }
}

/// 真实 symphonia 解码器 + 模拟设备
#[derive(Clone, Default)]
pub struct FileEngine {
    pub devices: MockEngine,
}

impl AudioEngine for FileEngine {
    type Decoder = SymphoniaDecoder;
    type Device = MockDevice;

    fn open_decoder(&self, path: &Path) -> Result<Self::Decoder, EngineError> {
        Ok(SymphoniaDecoder::open(path)?)
    }

    fn init_device(
        &self,
        config: DeviceConfig,
        callback: DataCallback,
    ) -> Result<Self::Device, EngineError> {
        self.devices.init_device(config, callback)
    }
}

/// 在临时目录写一个 16-bit PCM WAV 文件
pub fn write_wav(name: &str, sample_rate: u32, channels: u16, frames: u32) -> PathBuf {
    write_truncated_wav(name, sample_rate, channels, frames, frames)
}

/// 头部声明 `declared_frames` 帧，实际只写入 `frames` 帧
pub fn write_truncated_wav(
    name: &str,
    sample_rate: u32,
    channels: u16,
    frames: u32,
    declared_frames: u32,
) -> PathBuf {
    let block_align = channels as u32 * 2;
    let data_len = declared_frames * block_align;
    let mut bytes = Vec::with_capacity(44 + (frames * block_align) as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVEfmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&channels.to_le_bytes());
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    bytes.extend_from_slice(&(sample_rate * block_align).to_le_bytes());
    bytes.extend_from_slice(&(channels * 2).to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    for i in 0..frames * channels as u32 {
        let sample = ((i % 64) as i16 - 32) * 256;
        bytes.extend_from_slice(&sample.to_le_bytes());
    }

    let path = std::env::temp_dir().join(format!(
        "chime-test-{}-{}.wav",
        std::process::id(),
        name
    ));
    std::fs::write(&path, bytes).unwrap();
    path
}

pub struct MockDecoder {
    track: MockTrack,
    cursor: u64,
    shared: Arc<Shared>,
}

impl PcmDecoder for MockDecoder {
    fn format(&self) -> PcmFormat {
        PcmFormat {
            channels: self.track.channels,
            sample_rate: self.track.sample_rate,
        }
    }

    fn read_pcm_frames(&mut self, out: &mut [f32]) -> Result<u64, EngineError> {
        if self.track.fail_at.is_some_and(|at| self.cursor >= at) {
            return Err(DecoderError::Decode("corrupt frame".into()).into());
        }
        let channels = self.track.channels.max(1) as usize;
        let wanted = (out.len() / channels) as u64;
        let frames = wanted.min(self.track.total_frames - self.cursor);
        out[..frames as usize * channels].fill(0.25);
        self.cursor += frames;
        Ok(frames)
    }

    fn cursor(&self) -> Result<u64, EngineError> {
        Ok(self.cursor)
    }

    fn total_frames(&self) -> Result<u64, EngineError> {
        if self.track.unknown_length {
            return Err(DecoderError::UnknownLength.into());
        }
        Ok(self.track.total_frames)
    }
}

impl Drop for MockDecoder {
    fn drop(&mut self) {
        self.shared.live_decoders.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct MockDevice {
    id: u64,
    started: Arc<AtomicBool>,
    volume: AtomicU32,
    shared: Arc<Shared>,
}

impl OutputDevice for MockDevice {
    fn start(&self) -> Result<(), EngineError> {
        if self.shared.faults.lock().device_start {
            return Err(OutputError::Start("injected".into()).into());
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<(), EngineError> {
        if self.shared.faults.lock().device_stop {
            return Err(OutputError::Stop("injected".into()).into());
        }
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn state(&self) -> DeviceState {
        if self.started.load(Ordering::SeqCst) {
            DeviceState::Started
        } else {
            DeviceState::Stopped
        }
    }

    fn volume(&self) -> Result<f32, EngineError> {
        if self.shared.faults.lock().volume_query {
            return Err(OutputError::Stream("injected".into()).into());
        }
        Ok(f32::from_bits(self.volume.load(Ordering::SeqCst)))
    }

    fn set_volume(&self, volume: f32) -> Result<(), EngineError> {
        if self.shared.faults.lock().volume_set {
            return Err(OutputError::InvalidVolume(volume).into());
        }
        self.volume.store(volume.to_bits(), Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        let removed = {
            let mut slot = self.shared.slot.lock();
            if slot.as_ref().is_some_and(|s| s.id == self.id) {
                slot.take()
            } else {
                None
            }
        };
        // 回调持有解码器，在锁外释放
        drop(removed);
        self.shared.live_devices.fetch_sub(1, Ordering::SeqCst);
    }
}
