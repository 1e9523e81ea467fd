//! Operator configuration – reads/writes `~/.strider/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use strider_types::StriderError;

/// Where the loop takes operator commands from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Keyboard,
    Joystick,
    Network,
}

impl InputKind {
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "keyboard" | "keys" => Some(Self::Keyboard),
            "joystick" | "gamepad" => Some(Self::Joystick),
            "network" | "relay" => Some(Self::Network),
            _ => None,
        }
    }

    /// Parse a comma-separated list such as `"keyboard,network"`.
    pub fn parse_list(raw: &str) -> Result<Vec<Self>, StriderError> {
        let mut kinds = Vec::new();
        for token in raw.split(',').filter(|t| !t.trim().is_empty()) {
            let kind = Self::parse(token)
                .ok_or_else(|| StriderError::Config(format!("unknown input source '{}'", token.trim())))?;
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        Ok(kinds)
    }
}

impl std::fmt::Display for InputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputKind::Keyboard => write!(f, "keyboard"),
            InputKind::Joystick => write!(f, "joystick"),
            InputKind::Network => write!(f, "network"),
        }
    }
}

/// Persisted operator configuration stored in `~/.strider/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StriderConfig {
    /// Robot profile name (`go2`, `tinydog`).
    #[serde(default = "default_profile")]
    pub profile: String,

    /// JSON linear policy file.  Unset runs the zero policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_path: Option<PathBuf>,

    /// Stream state to the relay and accept relayed commands.
    #[serde(default = "default_true")]
    pub bridge_enabled: bool,

    #[serde(default = "default_bridge_url")]
    pub bridge_url: String,

    /// Port `strider relay` listens on.
    #[serde(default = "default_relay_port")]
    pub relay_port: u16,

    /// Per-viewer command budget of the relay, frames per second.
    #[serde(default = "default_relay_command_rate")]
    pub relay_command_rate: u32,

    #[serde(default = "default_inputs")]
    pub inputs: Vec<InputKind>,

    /// Keyboard speed per held key.
    #[serde(default = "default_keyboard_max_vel")]
    pub keyboard_max_vel: f64,

    /// JSON Lines run log.  Unset disables recording.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_path: Option<PathBuf>,

    /// Running-phase limit in seconds; `0` runs until stopped.
    #[serde(default = "default_max_duration_s")]
    pub max_duration_s: f64,
}

fn default_profile() -> String {
    "go2".to_string()
}
fn default_true() -> bool {
    true
}
fn default_bridge_url() -> String {
    strider_bridge::bridge::DEFAULT_URL.to_string()
}
fn default_relay_port() -> u16 {
    strider_relay::DEFAULT_PORT
}
fn default_relay_command_rate() -> u32 {
    strider_relay::server::DEFAULT_COMMAND_RATE
}
fn default_inputs() -> Vec<InputKind> {
    vec![InputKind::Keyboard, InputKind::Network]
}
fn default_keyboard_max_vel() -> f64 {
    strider_input::keyboard::DEFAULT_MAX_VEL
}
fn default_max_duration_s() -> f64 {
    strider_runtime::control_loop::DEFAULT_MAX_DURATION.as_secs_f64()
}

impl Default for StriderConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            policy_path: None,
            bridge_enabled: true,
            bridge_url: default_bridge_url(),
            relay_port: default_relay_port(),
            relay_command_rate: default_relay_command_rate(),
            inputs: default_inputs(),
            keyboard_max_vel: default_keyboard_max_vel(),
            record_path: None,
            max_duration_s: default_max_duration_s(),
        }
    }
}

impl StriderConfig {
    /// `None` when the run is unbounded.
    pub fn max_duration(&self) -> Option<std::time::Duration> {
        (self.max_duration_s > 0.0).then(|| std::time::Duration::from_secs_f64(self.max_duration_s))
    }
}

/// Return the path to `~/.strider/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".strider").join("config.toml")
}

/// Load the config, falling back to defaults when no file exists.
/// Environment overrides apply either way.
pub fn load() -> Result<StriderConfig, StriderError> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg)?;
    Ok(cfg)
}

/// Load the config from a specific path.  `None` if the file does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<StriderConfig>, StriderError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| StriderError::Config(format!("failed to read config at {}: {e}", path.display())))?;
    let cfg: StriderConfig =
        toml::from_str(&raw).map_err(|e| StriderError::Config(format!("failed to parse config: {e}")))?;
    Ok(Some(cfg))
}

/// Apply `STRIDER_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `STRIDER_PROFILE` | `profile` |
/// | `STRIDER_POLICY_PATH` | `policy_path` |
/// | `STRIDER_BRIDGE_URL` | `bridge_url` (empty disables the bridge) |
/// | `STRIDER_RELAY_PORT` | `relay_port` |
/// | `STRIDER_INPUT` | `inputs`, comma separated |
///
/// # Errors
///
/// Returns [`StriderError::Config`] for an unknown `STRIDER_INPUT` token.
/// An unparsable port is ignored.
pub fn apply_env_overrides(cfg: &mut StriderConfig) -> Result<(), StriderError> {
    if let Ok(v) = std::env::var("STRIDER_PROFILE") {
        cfg.profile = v;
    }
    if let Ok(v) = std::env::var("STRIDER_POLICY_PATH") {
        cfg.policy_path = (!v.is_empty()).then(|| PathBuf::from(v));
    }
    if let Ok(v) = std::env::var("STRIDER_BRIDGE_URL") {
        cfg.bridge_enabled = !v.is_empty();
        if !v.is_empty() {
            cfg.bridge_url = v;
        }
    }
    if let Ok(v) = std::env::var("STRIDER_RELAY_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.relay_port = port;
    }
    if let Ok(v) = std::env::var("STRIDER_INPUT") {
        cfg.inputs = InputKind::parse_list(&v)?;
    }
    Ok(())
}

/// Save the config to disk, creating `~/.strider/` if necessary.
pub fn save(cfg: &StriderConfig) -> Result<(), StriderError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &StriderConfig, path: &Path) -> Result<(), StriderError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| StriderError::Config(format!("failed to create config directory: {e}")))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| StriderError::Config(format!("failed to set config directory permissions: {e}")))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| StriderError::Config(format!("failed to serialize config: {e}")))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| StriderError::Config(format!("failed to write config at {}: {e}", path.display())))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| StriderError::Config(format!("failed to write config at {}: {e}", path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests touching STRIDER_* variables run one at a time.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&StriderConfig::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .expect("dir metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn roundtrip_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = StriderConfig {
            profile: "tinydog".to_string(),
            policy_path: Some(PathBuf::from("/opt/policies/tinydog.json")),
            inputs: vec![InputKind::Joystick],
            record_path: Some(PathBuf::from("runs/latest.jsonl")),
            max_duration_s: 0.0,
            ..StriderConfig::default()
        };
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded, cfg);
        assert_eq!(loaded.max_duration(), None);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "profile = \"tinydog\"\ninputs = [\"joystick\", \"network\"]\n").unwrap();

        let cfg = load_from(&path).unwrap().unwrap();
        assert_eq!(cfg.profile, "tinydog");
        assert_eq!(cfg.inputs, vec![InputKind::Joystick, InputKind::Network]);
        assert_eq!(cfg.relay_port, 8000);
        assert_eq!(cfg.bridge_url, "ws://127.0.0.1:8000/ws");
        assert!(cfg.bridge_enabled);
        assert_eq!(cfg.max_duration(), Some(std::time::Duration::from_secs(500)));
    }

    #[test]
    fn bad_toml_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "inputs = [\"telepathy\"]\n").unwrap();
        assert!(matches!(load_from(&path), Err(StriderError::Config(_))));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn config_path_points_to_strider_dir() {
        let p = config_path_for_home("/home/operator");
        assert!(p.to_string_lossy().contains(".strider"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn input_list_parsing() {
        assert_eq!(
            InputKind::parse_list("keyboard, relay,keyboard").unwrap(),
            vec![InputKind::Keyboard, InputKind::Network]
        );
        assert!(InputKind::parse_list("").unwrap().is_empty());
        assert!(matches!(InputKind::parse_list("mouse"), Err(StriderError::Config(_))));
    }

    #[test]
    fn env_overrides_apply() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        // SAFETY: env access is serialised by ENV_LOCK.
        unsafe {
            std::env::set_var("STRIDER_PROFILE", "tinydog");
            std::env::set_var("STRIDER_RELAY_PORT", "9100");
            std::env::set_var("STRIDER_INPUT", "joystick");
            std::env::set_var("STRIDER_BRIDGE_URL", "ws://robot:8000/ws");
        }
        let mut cfg = StriderConfig::default();
        let result = apply_env_overrides(&mut cfg);
        unsafe {
            std::env::remove_var("STRIDER_PROFILE");
            std::env::remove_var("STRIDER_RELAY_PORT");
            std::env::remove_var("STRIDER_INPUT");
            std::env::remove_var("STRIDER_BRIDGE_URL");
        }
        result.unwrap();
        assert_eq!(cfg.profile, "tinydog");
        assert_eq!(cfg.relay_port, 9100);
        assert_eq!(cfg.inputs, vec![InputKind::Joystick]);
        assert_eq!(cfg.bridge_url, "ws://robot:8000/ws");
        assert!(cfg.bridge_enabled);
    }

    #[test]
    fn empty_bridge_url_disables_bridge() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        // SAFETY: env access is serialised by ENV_LOCK.
        unsafe { std::env::set_var("STRIDER_BRIDGE_URL", "") };
        let mut cfg = StriderConfig::default();
        let result = apply_env_overrides(&mut cfg);
        unsafe { std::env::remove_var("STRIDER_BRIDGE_URL") };
        result.unwrap();
        assert!(!cfg.bridge_enabled);
        assert_eq!(cfg.bridge_url, default_bridge_url());
    }

    #[test]
    fn invalid_port_is_ignored() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        // SAFETY: env access is serialised by ENV_LOCK.
        unsafe { std::env::set_var("STRIDER_RELAY_PORT", "not-a-port") };
        let mut cfg = StriderConfig::default();
        let result = apply_env_overrides(&mut cfg);
        unsafe { std::env::remove_var("STRIDER_RELAY_PORT") };
        result.unwrap();
        assert_eq!(cfg.relay_port, 8000);
    }

    #[test]
    fn unknown_env_input_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        // SAFETY: env access is serialised by ENV_LOCK.
        unsafe { std::env::set_var("STRIDER_INPUT", "keyboard,mouse") };
        let mut cfg = StriderConfig::default();
        let result = apply_env_overrides(&mut cfg);
        unsafe { std::env::remove_var("STRIDER_INPUT") };
        assert!(matches!(result, Err(StriderError::Config(_))));
    }
}
