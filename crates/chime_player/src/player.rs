//! 播放器
//!
//! 管理解码器与输出设备的绑定、播放标志和生命周期。
//! 每次绑定文件都会新建一份 [`Session`]，由数据回调与调用线程共享：
//! 解码器由互斥锁保护，播放标志使用原子变量。

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::{
    AudioEngine, DataCallback, DeviceConfig, DeviceState, EngineError, OutputDevice, PcmDecoder,
    PcmFormat, PlaybackEvent, PlaybackState, PlayerConfig, SystemEngine, TrackInfo,
};

/// 播放器错误
#[derive(thiserror::Error, Debug)]
pub enum PlayerError {
    #[error("Failed to allocate player resources")]
    Allocation,
    #[error("Failed to open {path:?}: {source}")]
    DecodeOpen {
        path: PathBuf,
        #[source]
        source: EngineError,
    },
    #[error("Failed to init device: {0}")]
    DeviceInit(#[source] EngineError),
    #[error("Failed to start device: {0}")]
    DeviceStart(#[source] EngineError),
    #[error("Failed to stop device: {0}")]
    DeviceStop(#[source] EngineError),
    #[error("Query failed: {0}")]
    Query(#[source] EngineError),
    #[error("Sample rate is zero")]
    ZeroSampleRate,
    #[error("No file is bound to the player")]
    NotConfigured,
    #[error("Player is closed")]
    Closed,
}

/// 数据回调与调用线程共享的状态
struct Session<D> {
    decoder: Mutex<D>,
    format: PcmFormat,
    is_playing: AtomicBool,
    has_ended: AtomicBool,
    failure: Mutex<Option<String>>,
}

impl<D: PcmDecoder> Session<D> {
    fn new(decoder: D) -> Self {
        let format = decoder.format();
        Self {
            decoder: Mutex::new(decoder),
            format,
            is_playing: AtomicBool::new(false),
            has_ended: AtomicBool::new(false),
            failure: Mutex::new(None),
        }
    }

    fn finish(&self) {
        self.has_ended.store(true, Ordering::Release);
        self.is_playing.store(false, Ordering::Release);
    }

    fn elapsed(&self, frames: u64) -> Duration {
        frames_to_duration(frames, self.format.sample_rate).unwrap_or_default()
    }
}

/// 已绑定的解码器 + 设备。字段顺序保证设备先于解码器释放。
struct Binding<E: AudioEngine> {
    device: E::Device,
    session: Arc<Session<E::Decoder>>,
    track: TrackInfo,
}

/// 播放器
pub struct Player<E: AudioEngine = SystemEngine> {
    engine: E,
    config: PlayerConfig,
    events: Option<Sender<PlaybackEvent>>,
    binding: Option<Binding<E>>,
    closed: bool,
}

impl Player<SystemEngine> {
    /// 使用系统音频引擎创建播放器
    pub fn system(config: PlayerConfig) -> Self {
        Self::new(SystemEngine, config)
    }
}

impl<E: AudioEngine> Player<E> {
    pub fn new(engine: E, config: PlayerConfig) -> Self {
        Self {
            engine,
            config,
            events: None,
            binding: None,
            closed: false,
        }
    }

    /// 创建播放器，音频线程会把 [`PlaybackEvent`] 发到 `events`
    pub fn with_events(engine: E, config: PlayerConfig, events: Sender<PlaybackEvent>) -> Self {
        Self {
            engine,
            config,
            events: Some(events),
            binding: None,
            closed: false,
        }
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// 播放文件；已有绑定时先释放旧的解码器和设备
    pub fn play(&mut self, path: impl AsRef<Path>) -> Result<(), PlayerError> {
        if self.closed {
            return Err(PlayerError::Closed);
        }
        let path = path.as_ref();
        log::info!("Playing {}", path.display());

        self.unconfigure();

        let decoder = self.engine.open_decoder(path).map_err(|source| {
            log::error!("Failed to open decoder for {}: {}", path.display(), source);
            PlayerError::DecodeOpen {
                path: path.to_path_buf(),
                source,
            }
        })?;

        let session = Arc::new(Session::new(decoder));
        let format = session.format;
        let device_config = DeviceConfig::for_format(format, self.config.period_frames);
        let callback = data_callback(
            session.clone(),
            self.events.clone(),
            self.config.progress_interval(),
        );

        // 失败时 session 随作用域释放，解码器不会泄漏
        let device = self
            .engine
            .init_device(device_config, callback)
            .map_err(|e| {
                log::error!("Failed to init device: {}", e);
                PlayerError::DeviceInit(e)
            })?;

        if let Some(volume) = self.config.initial_volume {
            if let Err(e) = device.set_volume(volume) {
                log::warn!("Failed to set initial volume: {}", e);
            }
        }

        session.is_playing.store(true, Ordering::Release);
        if let Err(e) = device.start() {
            log::error!("Failed to start device: {}", e);
            drop(device);
            return Err(PlayerError::DeviceStart(e));
        }

        log::debug!(
            "Bound {}: {} Hz, {} ch",
            path.display(),
            format.sample_rate,
            format.channels
        );

        self.binding = Some(Binding {
            device,
            session,
            track: TrackInfo {
                path: path.to_path_buf(),
                sample_rate: format.sample_rate,
                channels: format.channels,
            },
        });
        Ok(())
    }

    /// 暂停；只修改标志，设备继续运行并输出静音
    pub fn pause(&self) {
        if let Some(binding) = self.live_binding() {
            binding.session.is_playing.store(false, Ordering::Release);
        }
    }

    /// 恢复；未绑定文件或已播放结束时无效果
    pub fn resume(&self) {
        if let Some(binding) = self.live_binding() {
            if binding.session.has_ended.load(Ordering::Acquire) {
                log::debug!("resume ignored: playback has ended");
                return;
            }
            binding.session.is_playing.store(true, Ordering::Release);
        }
    }

    /// 停止设备输出，不释放解码器和设备
    pub fn stop(&self) -> Result<(), PlayerError> {
        let binding = self.bound()?;
        binding.device.stop().map_err(|e| {
            log::error!("Failed to stop device: {}", e);
            PlayerError::DeviceStop(e)
        })?;
        log::info!("Playback stopped");
        Ok(())
    }

    /// 已关闭、未绑定、播放结束或设备已停止时返回 true
    pub fn has_stopped(&self) -> bool {
        match self.live_binding() {
            None => true,
            Some(binding) => {
                binding.session.has_ended.load(Ordering::Acquire)
                    || binding.device.state() == DeviceState::Stopped
            }
        }
    }

    /// 主音量；未在播放或查询失败时返回 0.0
    pub fn volume(&self) -> f32 {
        let Some(binding) = self.live_binding() else {
            return 0.0;
        };
        if !binding.session.is_playing.load(Ordering::Acquire) {
            return 0.0;
        }
        match binding.device.volume() {
            Ok(v) => v,
            Err(e) => {
                log::warn!("Failed to get master volume: {}", e);
                0.0
            }
        }
    }

    /// 设置主音量，失败只记录日志
    pub fn set_volume(&self, volume: f32) {
        let Some(binding) = self.live_binding() else {
            log::debug!("set_volume ignored: no device bound");
            return;
        };
        let volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };
        if let Err(e) = binding.device.set_volume(volume) {
            log::warn!("Failed to set master volume: {}", e);
        }
    }

    /// 当前播放时间
    pub fn current_playtime(&self) -> Result<Duration, PlayerError> {
        let binding = self.bound()?;
        let frames = binding
            .session
            .decoder
            .lock()
            .cursor()
            .map_err(PlayerError::Query)?;
        frames_to_duration(frames, binding.session.format.sample_rate)
    }

    /// 曲目总长
    pub fn length(&self) -> Result<Duration, PlayerError> {
        let binding = self.bound()?;
        let frames = binding
            .session
            .decoder
            .lock()
            .total_frames()
            .map_err(PlayerError::Query)?;
        frames_to_duration(frames, binding.session.format.sample_rate)
    }

    pub fn is_playing(&self) -> bool {
        self.live_binding()
            .is_some_and(|b| b.session.is_playing.load(Ordering::Acquire))
    }

    pub fn has_ended(&self) -> bool {
        self.live_binding()
            .is_some_and(|b| b.session.has_ended.load(Ordering::Acquire))
    }

    pub fn is_configured(&self) -> bool {
        self.live_binding().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// 播放中途的解码错误；正常结束时为 None
    pub fn playback_error(&self) -> Option<String> {
        self.live_binding()
            .and_then(|b| b.session.failure.lock().clone())
    }

    pub fn track_info(&self) -> Option<&TrackInfo> {
        self.live_binding().map(|b| &b.track)
    }

    pub fn state(&self) -> PlaybackState {
        let Some(binding) = self.live_binding() else {
            return PlaybackState::Idle;
        };
        if binding.session.has_ended.load(Ordering::Acquire) {
            PlaybackState::Ended
        } else if binding.device.state() == DeviceState::Stopped {
            PlaybackState::Stopped
        } else if binding.session.is_playing.load(Ordering::Acquire) {
            PlaybackState::Playing
        } else {
            PlaybackState::Paused
        }
    }

    /// 释放解码器和设备并关闭播放器，可重复调用
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.unconfigure();
        self.events = None;
        self.closed = true;
        log::info!("Player closed");
    }

    fn live_binding(&self) -> Option<&Binding<E>> {
        if self.closed {
            None
        } else {
            self.binding.as_ref()
        }
    }

    fn bound(&self) -> Result<&Binding<E>, PlayerError> {
        if self.closed {
            return Err(PlayerError::Closed);
        }
        self.binding.as_ref().ok_or(PlayerError::NotConfigured)
    }

    fn unconfigure(&mut self) {
        if let Some(binding) = self.binding.take() {
            binding.session.is_playing.store(false, Ordering::Release);
            let Binding {
                device,
                session,
                track,
            } = binding;
            // 先停掉回调再释放解码器
            drop(device);
            drop(session);
            log::debug!("Released decoder and device for {}", track.path.display());
        }
    }
}

impl<E: AudioEngine> Drop for Player<E> {
    fn drop(&mut self) {
        self.close();
    }
}

fn frames_to_duration(frames: u64, sample_rate: u32) -> Result<Duration, PlayerError> {
    if sample_rate == 0 {
        return Err(PlayerError::ZeroSampleRate);
    }
    Ok(Duration::from_secs_f64(frames as f64 / sample_rate as f64))
}

/// 构造设备的数据拉取回调
///
/// 事件用 `try_send` 发送，通道满或接收端关闭时直接丢弃。
fn data_callback<D: PcmDecoder>(
    session: Arc<Session<D>>,
    events: Option<Sender<PlaybackEvent>>,
    progress_interval: Duration,
) -> DataCallback {
    let interval_frames =
        (progress_interval.as_secs_f64() * session.format.sample_rate as f64) as u64;
    let channels = session.format.channels.max(1) as usize;
    let mut last_report: Option<u64> = None;

    let publish = move |event: PlaybackEvent| {
        if let Some(tx) = &events {
            let _ = tx.try_send(event);
        }
    };

    Box::new(move |out: &mut [f32]| {
        // 不足一帧的请求不推进解码器
        if out.len() < channels || !session.is_playing.load(Ordering::Acquire) {
            out.fill(0.0);
            return;
        }

        let mut decoder = session.decoder.lock();
        let result = decoder.read_pcm_frames(out);
        let cursor = decoder.cursor().ok();
        drop(decoder);

        match result {
            Ok(0) => {
                out.fill(0.0);
                session.finish();
                log::info!("Playback reached end of stream");
                publish(PlaybackEvent::Ended {
                    elapsed: session.elapsed(cursor.unwrap_or(0)),
                });
            }
            Ok(frames) => {
                let used = (frames as usize * channels).min(out.len());
                out[used..].fill(0.0);

                let Some(position) = cursor else {
                    return;
                };
                let due = last_report
                    .map_or(true, |last| position.saturating_sub(last) >= interval_frames);
                if due {
                    last_report = Some(position);
                    publish(PlaybackEvent::Progress {
                        elapsed: session.elapsed(position),
                        frames: position,
                    });
                }
            }
            Err(e) => {
                out.fill(0.0);
                log::error!("Failed to read PCM frames: {}", e);
                *session.failure.lock() = Some(e.to_string());
                session.finish();
                publish(PlaybackEvent::Failed {
                    elapsed: session.elapsed(cursor.unwrap_or(0)),
                    message: e.to_string(),
                });
            }
        }
    })
}
