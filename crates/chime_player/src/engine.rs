//! 音频引擎抽象
//!
//! 播放器只通过这里的 trait 访问外部的解码器与输出设备。
//! 默认实现 [`SystemEngine`] 使用 symphonia 解码、cpal 输出。

use std::path::Path;

use crate::{CpalDevice, DecoderError, OutputError, SymphoniaDecoder};

/// 引擎错误
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Decoder(#[from] DecoderError),
    #[error(transparent)]
    Output(#[from] OutputError),
}

/// 数据拉取回调，由设备在音频线程上调用。
///
/// 参数为交错排列的 f32 输出缓冲区，长度为 `帧数 * 声道数`。
pub type DataCallback = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// 解码器输出的 PCM 格式（采样格式固定为交错 f32）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub channels: u16,
    pub sample_rate: u32,
}

/// 输出设备配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    pub channels: u16,
    pub sample_rate: u32,
    /// 每次回调请求的帧数，`None` 表示使用设备默认值
    pub period_frames: Option<u32>,
}

impl DeviceConfig {
    /// 按解码器的输出格式生成设备配置
    pub fn for_format(format: PcmFormat, period_frames: Option<u32>) -> Self {
        Self {
            channels: format.channels,
            sample_rate: format.sample_rate,
            period_frames,
        }
    }
}

/// 设备运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Stopped,
    Started,
}

/// 绑定到单个文件的 PCM 解码器
pub trait PcmDecoder: Send + 'static {
    /// 输出格式
    fn format(&self) -> PcmFormat;

    /// 读取至多 `out.len() / channels` 帧，返回实际读取的帧数。
    ///
    /// 返回 `Ok(0)` 表示已到达流末尾。
    fn read_pcm_frames(&mut self, out: &mut [f32]) -> Result<u64, EngineError>;

    /// 当前读取位置（帧）
    fn cursor(&self) -> Result<u64, EngineError>;

    /// 总帧数
    fn total_frames(&self) -> Result<u64, EngineError>;
}

/// 输出设备
///
/// 设备被 drop 时必须停止回调并释放底层资源。
pub trait OutputDevice {
    fn start(&self) -> Result<(), EngineError>;
    fn stop(&self) -> Result<(), EngineError>;
    fn state(&self) -> DeviceState;
    /// 主音量 (0.0 - 1.0)
    fn volume(&self) -> Result<f32, EngineError>;
    fn set_volume(&self, volume: f32) -> Result<(), EngineError>;
}

/// 外部音频引擎
pub trait AudioEngine {
    type Decoder: PcmDecoder;
    type Device: OutputDevice;

    /// 打开绑定到 `path` 的解码器
    fn open_decoder(&self, path: &Path) -> Result<Self::Decoder, EngineError>;

    /// 创建输出设备；创建失败时 `callback` 随之释放
    fn init_device(
        &self,
        config: DeviceConfig,
        callback: DataCallback,
    ) -> Result<Self::Device, EngineError>;
}

/// symphonia + cpal 引擎
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEngine;

impl AudioEngine for SystemEngine {
    type Decoder = SymphoniaDecoder;
    type Device = CpalDevice;

    fn open_decoder(&self, path: &Path) -> Result<Self::Decoder, EngineError> {
        Ok(SymphoniaDecoder::open(path)?)
    }

    fn init_device(
        &self,
        config: DeviceConfig,
        callback: DataCallback,
    ) -> Result<Self::Device, EngineError> {
        Ok(CpalDevice::new(config, callback)?)
    }
}
