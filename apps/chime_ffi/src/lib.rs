//! Chime FFI - C ABI wrapper for host applications (editor plugins, scripting FFIs).
//!
//! Every entry point accepts NULL handles and returns a safe default for them.
//! Notifications are delivered on a dedicated dispatcher thread, never on the
//! audio thread.

use std::ffi::{c_void, CStr};
use std::os::raw::{c_char, c_float};
use std::path::PathBuf;
use std::sync::Once;
use std::thread::{self, JoinHandle};

use chime_player::{event_channel, Player, PlayerConfig, PlayerError, SystemEngine};

/// `void (*)(double seconds, bool ended, void *user_data)`
pub type NotifyCallback =
    Option<unsafe extern "C" fn(seconds: f64, ended: bool, user_data: *mut c_void)>;

/// Opaque player handle handed to C callers.
pub struct ChimePlayer {
    player: Player,
    dispatcher: Option<JoinHandle<()>>,
}

struct UserData(*mut c_void);

// SAFETY: the pointer is never dereferenced on the Rust side, it is only
// passed back to the callback the caller registered together with it.
unsafe impl Send for UserData {}

impl UserData {
    fn get(&self) -> *mut c_void {
        self.0
    }
}

static INIT_LOGGER: Once = Once::new();

fn init_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Info)
            .parse_default_env()
            .try_init();
    });
}

/// `CHIME_CONFIG` may point to a JSON player config.
fn load_config() -> PlayerConfig {
    let Some(path) = std::env::var_os("CHIME_CONFIG").map(PathBuf::from) else {
        return PlayerConfig::default();
    };
    match PlayerConfig::from_json_file(&path) {
        Ok(config) => config,
        Err(e) => {
            log::warn!("Ignoring config {}: {}", path.display(), e);
            PlayerConfig::default()
        }
    }
}

fn create_handle(
    callback: NotifyCallback,
    user_data: *mut c_void,
) -> Result<ChimePlayer, PlayerError> {
    let config = load_config();

    let Some(callback) = callback else {
        return Ok(ChimePlayer {
            player: Player::system(config),
            dispatcher: None,
        });
    };

    let (tx, rx) = event_channel(config.event_capacity);
    let user_data = UserData(user_data);
    let dispatcher = thread::Builder::new()
        .name("chime-notify".into())
        .spawn(move || {
            // Ends once the player and its device drop their senders.
            for event in rx.iter() {
                unsafe {
                    callback(
                        event.elapsed().as_secs_f64(),
                        event.is_ended(),
                        user_data.get(),
                    )
                };
            }
        })
        .map_err(|e| {
            log::error!("Failed to spawn notification thread: {}", e);
            PlayerError::Allocation
        })?;

    Ok(ChimePlayer {
        player: Player::with_events(SystemEngine, config, tx),
        dispatcher: Some(dispatcher),
    })
}

fn cstr_to_path(ptr: *const c_char) -> Result<PathBuf, &'static str> {
    if ptr.is_null() {
        return Err("null path");
    }
    let s = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().to_string();
    if s.is_empty() {
        return Err("empty path");
    }
    Ok(PathBuf::from(s))
}

/// # Safety
/// `p` must be NULL or a live handle returned by `player_create*`.
unsafe fn handle<'a>(p: *mut ChimePlayer) -> Option<&'a mut ChimePlayer> {
    unsafe { p.as_mut() }
}

/// Creates a player without notifications. Returns NULL on allocation failure.
#[no_mangle]
pub extern "C" fn player_create() -> *mut ChimePlayer {
    player_create_with_callback(None, std::ptr::null_mut())
}

/// Creates a player whose `callback` receives progress and end notifications.
/// Returns NULL on allocation failure.
#[no_mangle]
pub extern "C" fn player_create_with_callback(
    callback: NotifyCallback,
    user_data: *mut c_void,
) -> *mut ChimePlayer {
    init_logging();
    match create_handle(callback, user_data) {
        Ok(handle) => {
            log::info!("Created player");
            Box::into_raw(Box::new(handle))
        }
        Err(e) => {
            log::error!("Failed to create player: {}", e);
            std::ptr::null_mut()
        }
    }
}

/// Plays `file_name`, replacing whatever was playing.
///
/// # Safety
/// `p` must be NULL or a live handle; `file_name` must be NULL or a
/// NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn player_play(p: *mut ChimePlayer, file_name: *const c_char) -> bool {
    let Some(h) = (unsafe { handle(p) }) else {
        return false;
    };
    let path = match cstr_to_path(file_name) {
        Ok(path) => path,
        Err(e) => {
            log::error!("player_play: {}", e);
            return false;
        }
    };
    h.player.play(&path).is_ok()
}

/// # Safety
/// `p` must be NULL or a live handle.
#[no_mangle]
pub unsafe extern "C" fn player_get_volume(p: *mut ChimePlayer) -> c_float {
    match unsafe { handle(p) } {
        Some(h) => h.player.volume(),
        None => 0.0,
    }
}

/// # Safety
/// `p` must be NULL or a live handle.
#[no_mangle]
pub unsafe extern "C" fn player_set_volume(p: *mut ChimePlayer, volume: c_float) {
    if let Some(h) = unsafe { handle(p) } {
        h.player.set_volume(volume);
    }
}

/// # Safety
/// `p` must be NULL or a live handle.
#[no_mangle]
pub unsafe extern "C" fn player_pause(p: *mut ChimePlayer) {
    if let Some(h) = unsafe { handle(p) } {
        h.player.pause();
    }
}

/// # Safety
/// `p` must be NULL or a live handle.
#[no_mangle]
pub unsafe extern "C" fn player_resume(p: *mut ChimePlayer) {
    if let Some(h) = unsafe { handle(p) } {
        h.player.resume();
    }
}

/// # Safety
/// `p` must be NULL or a live handle.
#[no_mangle]
pub unsafe extern "C" fn player_stop(p: *mut ChimePlayer) -> bool {
    match unsafe { handle(p) } {
        Some(h) => h.player.stop().is_ok(),
        None => false,
    }
}

/// # Safety
/// `p` must be NULL or a live handle.
#[no_mangle]
pub unsafe extern "C" fn player_has_stopped(p: *mut ChimePlayer) -> bool {
    match unsafe { handle(p) } {
        Some(h) => h.player.has_stopped(),
        None => true,
    }
}

/// Writes the elapsed seconds into `out_seconds`. Returns false on failure.
///
/// # Safety
/// `p` must be NULL or a live handle; `out_seconds` must be NULL or writable.
#[no_mangle]
pub unsafe extern "C" fn player_get_current_playtime(
    p: *mut ChimePlayer,
    out_seconds: *mut f64,
) -> bool {
    let Some(h) = (unsafe { handle(p) }) else {
        return false;
    };
    write_seconds(h.player.current_playtime(), out_seconds)
}

/// Writes the track length in seconds into `out_seconds`. Returns false on failure.
///
/// # Safety
/// `p` must be NULL or a live handle; `out_seconds` must be NULL or writable.
#[no_mangle]
pub unsafe extern "C" fn player_get_length(p: *mut ChimePlayer, out_seconds: *mut f64) -> bool {
    let Some(h) = (unsafe { handle(p) }) else {
        return false;
    };
    write_seconds(h.player.length(), out_seconds)
}

fn write_seconds(
    result: Result<std::time::Duration, PlayerError>,
    out_seconds: *mut f64,
) -> bool {
    if out_seconds.is_null() {
        return false;
    }
    match result {
        Ok(d) => {
            unsafe { *out_seconds = d.as_secs_f64() };
            true
        }
        Err(e) => {
            log::debug!("Time query failed: {}", e);
            false
        }
    }
}

/// Releases the player and sets `*p` to NULL. Safe to call repeatedly.
/// Must not be called from inside the notification callback.
///
/// # Safety
/// `p` must be NULL or point to NULL or to a live handle.
#[no_mangle]
pub unsafe extern "C" fn player_destroy(p: *mut *mut ChimePlayer) {
    if p.is_null() {
        return;
    }
    let raw = unsafe { *p };
    if raw.is_null() {
        return;
    }

    let mut h = unsafe { Box::from_raw(raw) };
    h.player.close();
    if let Some(dispatcher) = h.dispatcher.take() {
        if dispatcher.join().is_err() {
            log::error!("Notification thread panicked");
        }
    }
    drop(h);

    unsafe { *p = std::ptr::null_mut() };
    log::info!("Destroyed player");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::ptr;

    unsafe extern "C" fn ignore(_seconds: f64, _ended: bool, _user_data: *mut c_void) {}

    #[test]
    fn test_null_handle_defaults() {
        let null = ptr::null_mut();
        let path = CString::new("song.mp3").unwrap();
        let mut seconds = -1.0;

        unsafe {
            assert!(!player_play(null, path.as_ptr()));
            assert!(!player_stop(null));
            assert!(player_has_stopped(null));
            assert_eq!(player_get_volume(null), 0.0);
            assert!(!player_get_length(null, &mut seconds));
            assert!(!player_get_current_playtime(null, &mut seconds));
            player_set_volume(null, 0.5);
            player_pause(null);
            player_resume(null);
            player_destroy(ptr::null_mut());
        }
        assert_eq!(seconds, -1.0);
    }

    #[test]
    fn test_destroy_twice_nulls_handle() {
        let mut p = player_create();
        assert!(!p.is_null());

        unsafe {
            assert!(player_has_stopped(p));
            player_destroy(&mut p);
            assert!(p.is_null());
            player_destroy(&mut p);
        }
        assert!(p.is_null());
    }

    #[test]
    fn test_play_rejects_bad_paths() {
        let mut p = player_create();
        let missing = CString::new("/nonexistent/chime/song.wav").unwrap();
        let empty = CString::new("").unwrap();
        let mut seconds = 0.0;

        unsafe {
            assert!(!player_play(p, ptr::null()));
            assert!(!player_play(p, empty.as_ptr()));
            assert!(!player_play(p, missing.as_ptr()));
            assert!(player_has_stopped(p));
            assert!(!player_get_length(p, &mut seconds));
            assert!(!player_get_length(p, ptr::null_mut()));
            assert!(!player_stop(p));
            player_destroy(&mut p);
        }
    }

    #[test]
    fn test_callback_player_shuts_down_dispatcher() {
        let mut p = player_create_with_callback(Some(ignore), ptr::null_mut());
        assert!(!p.is_null());

        unsafe { player_destroy(&mut p) };
        assert!(p.is_null());
    }

    #[test]
    fn test_cstr_to_path() {
        let path = CString::new("music/a.flac").unwrap();
        assert_eq!(
            cstr_to_path(path.as_ptr()).unwrap(),
            PathBuf::from("music/a.flac")
        );
        assert!(cstr_to_path(ptr::null()).is_err());
    }
}
