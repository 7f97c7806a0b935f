use std::path::PathBuf;

pub const DAEMON_TCP_PORT: u16 = 9876;
pub const RELAY_TCP_PORT: u16 = 9877;

const LOCAL_HOST: &str = "127.0.0.1";

pub fn daemon_address() -> String {
    format!("{}:{}", LOCAL_HOST, DAEMON_TCP_PORT)
}

pub fn relay_address() -> String {
    format!("{}:{}", LOCAL_HOST, RELAY_TCP_PORT)
}

/// IPC socket name for the mpv instance serving `voice_channel`.
#[cfg(unix)]
pub fn mpv_socket_name(voice_channel: u64) -> String {
    format!(
        "{}/voicecast-mpv-{}.sock",
        std::env::temp_dir().display(),
        voice_channel
    )
}

#[cfg(windows)]
pub fn mpv_socket_name(voice_channel: u64) -> String {
    format!("voicecast-mpv-{}", voice_channel)
}

#[cfg(unix)]
pub fn mpv_socket_arg(voice_channel: u64) -> String {
    format!("--input-ipc-server={}", mpv_socket_name(voice_channel))
}

#[cfg(windows)]
pub fn mpv_socket_arg(voice_channel: u64) -> String {
    format!(
        "--input-ipc-server=\\\\.\\pipe\\{}",
        mpv_socket_name(voice_channel)
    )
}

pub fn data_dir() -> PathBuf {
    // ~/.local/share/voicecast on every unix, including macOS
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("voicecast")
    }
    #[cfg(windows)]
    {
        if let Some(dir) = portable_dir("data") {
            return dir;
        }
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("voicecast")
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("voicecast")
    }
    #[cfg(windows)]
    {
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                if exe_dir.join("config.toml").exists() {
                    return exe_dir.to_path_buf();
                }
            }
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("voicecast")
    }
}

/// `<exe dir>/<name>` when it exists, for portable installs.
#[cfg(windows)]
fn portable_dir(name: &str) -> Option<PathBuf> {
    let exe_path = std::env::current_exe().ok()?;
    let dir = exe_path.parent()?.join(name);
    dir.exists().then_some(dir)
}

#[cfg(unix)]
pub fn mpv_binary_name() -> &'static str {
    "mpv"
}

#[cfg(windows)]
pub fn mpv_binary_name() -> &'static str {
    "mpv.exe"
}

/// Find the mpv binary used as the local voice output.
///
/// Checks `MPV_PATH`, then beside the current executable, then `PATH`.
pub fn find_mpv_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("MPV_PATH") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }

    let exe_name = mpv_binary_name();

    if let Ok(current_exe) = std::env::current_exe() {
        if let Some(dir) = current_exe.parent() {
            let local_mpv = dir.join(exe_name);
            if local_mpv.exists() {
                return Some(local_mpv);
            }
        }
    }

    let path = std::env::var("PATH").ok()?;
    #[cfg(unix)]
    let separator = ":";
    #[cfg(windows)]
    let separator = ";";

    path.split(separator)
        .map(|dir| PathBuf::from(dir).join(exe_name))
        .find(|p| p.exists())
}
