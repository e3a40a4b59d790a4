//! 音频输出
//!
//! 使用 cpal 进行音频播放

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleFormat, Stream, StreamConfig};

use crate::{DataCallback, DeviceConfig, DeviceState, EngineError, OutputDevice};

/// 音频输出错误
#[derive(thiserror::Error, Debug)]
pub enum OutputError {
    #[error("No output device available")]
    NoDevice,
    #[error("No supported config")]
    NoConfig,
    #[error("Stream error: {0}")]
    Stream(String),
    #[error("Failed to start stream: {0}")]
    Start(String),
    #[error("Failed to stop stream: {0}")]
    Stop(String),
    #[error("Invalid volume: {0}")]
    InvalidVolume(f32),
}

/// cpal 输出设备
///
/// 流回调先调用数据拉取回调，再乘以主音量。
pub struct CpalDevice {
    stream: Stream,
    started: Arc<AtomicBool>,
    /// f32 位模式
    volume: Arc<AtomicU32>,
    config: DeviceConfig,
}

impl CpalDevice {
    /// 在默认输出设备上创建
    pub fn new(config: DeviceConfig, callback: DataCallback) -> Result<Self, OutputError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(OutputError::NoDevice)?;

        Self::with_device(&device, config, callback)
    }

    /// 使用指定设备创建，创建后处于停止状态
    pub fn with_device(
        device: &Device,
        config: DeviceConfig,
        mut callback: DataCallback,
    ) -> Result<Self, OutputError> {
        let supported_config = device
            .supported_output_configs()
            .map_err(|e| OutputError::Stream(e.to_string()))?
            .find(|c| {
                c.channels() == config.channels
                    && c.min_sample_rate().0 <= config.sample_rate
                    && c.max_sample_rate().0 >= config.sample_rate
                    && c.sample_format() == SampleFormat::F32
            })
            .ok_or(OutputError::NoConfig)?;

        let mut stream_config: StreamConfig = supported_config
            .with_sample_rate(cpal::SampleRate(config.sample_rate))
            .into();
        if let Some(frames) = config.period_frames {
            stream_config.buffer_size = BufferSize::Fixed(frames);
        }

        log::debug!("Output stream config: {:?}", stream_config);

        let started = Arc::new(AtomicBool::new(false));
        let volume = Arc::new(AtomicU32::new(1.0f32.to_bits()));

        let volume_clone = volume.clone();
        let started_clone = started.clone();

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    callback(data);
                    let gain = f32::from_bits(volume_clone.load(Ordering::Relaxed));
                    if (gain - 1.0).abs() > f32::EPSILON {
                        for sample in data.iter_mut() {
                            *sample *= gain;
                        }
                    }
                },
                move |err| {
                    log::error!("Audio output error: {}", err);
                    started_clone.store(false, Ordering::Release);
                },
                None,
            )
            .map_err(|e| OutputError::Stream(e.to_string()))?;

        // 部分后端创建后即开始输出
        if let Err(e) = stream.pause() {
            log::debug!("Backend cannot pause a fresh stream: {}", e);
        }

        Ok(Self {
            stream,
            started,
            volume,
            config,
        })
    }

    pub fn config(&self) -> DeviceConfig {
        self.config
    }
}

impl OutputDevice for CpalDevice {
    fn start(&self) -> Result<(), EngineError> {
        self.stream
            .play()
            .map_err(|e| OutputError::Start(e.to_string()))?;
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&self) -> Result<(), EngineError> {
        self.stream
            .pause()
            .map_err(|e| OutputError::Stop(e.to_string()))?;
        self.started.store(false, Ordering::Release);
        Ok(())
    }

    fn state(&self) -> DeviceState {
        if self.started.load(Ordering::Acquire) {
            DeviceState::Started
        } else {
            DeviceState::Stopped
        }
    }

    fn volume(&self) -> Result<f32, EngineError> {
        Ok(f32::from_bits(self.volume.load(Ordering::Relaxed)))
    }

    fn set_volume(&self, volume: f32) -> Result<(), EngineError> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(OutputError::InvalidVolume(volume).into());
        }
        self.volume.store(volume.to_bits(), Ordering::Relaxed);
        Ok(())
    }
}
