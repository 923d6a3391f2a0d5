use std::path::PathBuf;

/// Service configuration, read once from the environment at startup. Every
/// field falls back to a documented default when its variable is missing or
/// unparseable (each fallback logs a warning).
#[derive(Debug, Clone)]
pub struct Config {
  /// Host every listener binds on.
  pub host: String,

  /// The primary animation port; sessions here also receive mirrored
  /// broadcasts of accepted requests.
  pub port: u16,

  /// Additional animation ports. No mirroring happens on these.
  pub extra_ports: Vec<u16>,

  /// The local administrative text console port.
  pub local_port: u16,

  /// Pixel count for the emulated strip when no driver is wired in.
  pub led_count: usize,

  /// Whether continuous animations are persisted across restarts.
  pub persist: bool,

  /// Directory backing the persisted-animation store.
  pub animation_dir: PathBuf,

  /// Whether a self-test animation is submitted on startup.
  pub test_animation: bool,
}

impl Default for Config {
  fn default() -> Self {
    Config {
      host: "0.0.0.0".to_string(),
      port: 1119,
      extra_ports: vec![],
      local_port: 1118,
      led_count: 240,
      persist: false,
      animation_dir: PathBuf::from(".animations"),
      test_animation: false,
    }
  }
}

pub fn from_env() -> Config {
  let defaults = Config::default();

  Config {
    host: env_string("STRAND_HOST", defaults.host),
    port: env_parsed("STRAND_PORT", defaults.port),
    extra_ports: match std::env::var("STRAND_EXTRA_PORTS") {
      Ok(raw) => parse_ports(&raw),
      Err(_) => {
        log::debug!("'STRAND_EXTRA_PORTS' not set, no extra ports");
        vec![]
      }
    },
    local_port: env_parsed("STRAND_LOCAL_PORT", defaults.local_port),
    led_count: env_parsed("STRAND_LED_COUNT", defaults.led_count),
    persist: env_flag("STRAND_PERSIST", defaults.persist),
    animation_dir: PathBuf::from(env_string(
      "STRAND_ANIMATION_DIR",
      defaults.animation_dir.to_string_lossy().into_owned(),
    )),
    test_animation: env_flag("STRAND_TEST_ANIMATION", defaults.test_animation),
  }
}

fn env_parsed<T>(name: &str, fallback: T) -> T
where
  T: std::str::FromStr + std::fmt::Display,
{
  match std::env::var(name) {
    Ok(raw) => raw.parse::<T>().unwrap_or_else(|_| {
      log::warn!("'{}' value '{}' not valid, defaulting to {}", name, raw, fallback);
      fallback
    }),
    Err(_) => {
      log::debug!("'{}' not set, defaulting to {}", name, fallback);
      fallback
    }
  }
}

fn env_string(name: &str, fallback: String) -> String {
  std::env::var(name).unwrap_or_else(|_| {
    log::debug!("'{}' not set, defaulting to '{}'", name, fallback);
    fallback
  })
}

fn env_flag(name: &str, fallback: bool) -> bool {
  match std::env::var(name) {
    Ok(raw) => parse_bool(&raw),
    Err(_) => {
      log::debug!("'{}' not set, defaulting to {}", name, fallback);
      fallback
    }
  }
}

/// Parses the space-separated port list format (`"1120 1121"`), skipping
/// tokens that fail to parse with a warning.
fn parse_ports(raw: &str) -> Vec<u16> {
  raw
    .split_whitespace()
    .filter_map(|token| match token.parse::<u16>() {
      Ok(port) => Some(port),
      Err(_) => {
        log::warn!("could not parse port '{}', skipping", token);
        None
      }
    })
    .collect()
}

fn parse_bool(raw: &str) -> bool {
  matches!(raw.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}
