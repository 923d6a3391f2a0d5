use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default gap between lit pixels for the multi-pixel-run effects.
pub const DEFAULT_SPACING: u32 = 4;

/// Fallback frame delay for loopable effects that do not document their own.
pub const DEFAULT_FRAME_DELAY_MS: u64 = 50;

/// Preset colors used to fill the optional pixel-marathon slots.
pub mod presets {
  pub const GREEN: u64 = 0x00FF00;
  pub const YELLOW: u64 = 0xFFFF00;
  pub const BLUE: u64 = 0x0000FF;
  pub const PURPLE: u64 = 0xA020F0;
}

/// The direction a moving effect travels along the strip, serialized as the
/// single character flag clients send on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
  #[serde(rename = "F")]
  Forward,

  #[serde(rename = "B")]
  Backward,
}

impl Default for Direction {
  fn default() -> Self {
    Direction::Forward
  }
}

impl std::fmt::Display for Direction {
  fn fmt(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
    match self {
      Direction::Forward => write!(formatter, "F"),
      Direction::Backward => write!(formatter, "B"),
    }
  }
}

/// How a submitted request should be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
  /// Run the bounded render operation once and discard it.
  OneShot,

  /// Loop the render operation until an external cancel is observed.
  Continuous,

  /// Terminate a previously started continuous animation by identifier.
  Cancel,
}

/// Whether an effect terminates on its own or can loop forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
  Bounded,
  Loopable,
}

/// Every effect the server understands, each variant carrying only its own
/// typed fields. Optional fields resolve to the documented defaults through
/// the accessor methods below, so a decoded effect is valid as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Effect {
  Color {
    color: u64,
  },
  MultiColor {
    colors: Vec<u64>,
  },
  MultiPixelRunToColor {
    color: u64,
    spacing: Option<u32>,
    direction: Option<Direction>,
    delay: Option<u64>,
  },
  SparkleToColor {
    color: u64,
    delay: Option<u64>,
  },
  Stack {
    color: u64,
    direction: Option<Direction>,
    delay: Option<u64>,
  },
  Wipe {
    color: u64,
    direction: Option<Direction>,
  },
  Alternate {
    color: u64,
    second: Option<u64>,
    delay: Option<u64>,
  },
  MultiPixelRun {
    color: u64,
    spacing: Option<u32>,
    direction: Option<Direction>,
    delay: Option<u64>,
  },
  PixelRun {
    color: u64,
    second: Option<u64>,
    direction: Option<Direction>,
    delay: Option<u64>,
  },
  PixelRunWithTrail {
    color: u64,
    second: Option<u64>,
    direction: Option<Direction>,
    delay: Option<u64>,
  },
  PixelMarathon {
    color: u64,
    second: Option<u64>,
    third: Option<u64>,
    fourth: Option<u64>,
    fifth: Option<u64>,
  },
  SmoothChase {
    colors: Vec<u64>,
    direction: Option<Direction>,
    delay: Option<u64>,
  },
  Sparkle {
    color: u64,
    delay: Option<u64>,
  },
  StackOverflow {
    color: u64,
    second: Option<u64>,
  },
}

impl Effect {
  /// Bounded effects change the strip once and finish; loopable effects can
  /// be driven repeatedly until canceled.
  pub fn family(&self) -> Family {
    match self {
      Effect::Color { .. }
      | Effect::MultiColor { .. }
      | Effect::MultiPixelRunToColor { .. }
      | Effect::SparkleToColor { .. }
      | Effect::Stack { .. }
      | Effect::Wipe { .. } => Family::Bounded,
      _ => Family::Loopable,
    }
  }

  /// The resolved delay between loop iterations for this effect.
  pub fn frame_delay(&self) -> Duration {
    let millis = match self {
      Effect::MultiPixelRunToColor { delay, .. } | Effect::MultiPixelRun { delay, .. } => delay.unwrap_or(150),
      Effect::PixelRun { delay, .. } | Effect::PixelRunWithTrail { delay, .. } | Effect::SmoothChase { delay, .. } => {
        delay.unwrap_or(50)
      }
      Effect::Sparkle { delay, .. } | Effect::SparkleToColor { delay, .. } => delay.unwrap_or(10),
      Effect::Stack { delay, .. } | Effect::Alternate { delay, .. } => delay.unwrap_or(DEFAULT_FRAME_DELAY_MS),
      _ => DEFAULT_FRAME_DELAY_MS,
    };
    Duration::from_millis(millis)
  }

  /// A short tag for log lines.
  pub fn kind(&self) -> &'static str {
    match self {
      Effect::Color { .. } => "color",
      Effect::MultiColor { .. } => "multi-color",
      Effect::MultiPixelRunToColor { .. } => "multi-pixel-run-to-color",
      Effect::SparkleToColor { .. } => "sparkle-to-color",
      Effect::Stack { .. } => "stack",
      Effect::Wipe { .. } => "wipe",
      Effect::Alternate { .. } => "alternate",
      Effect::MultiPixelRun { .. } => "multi-pixel-run",
      Effect::PixelRun { .. } => "pixel-run",
      Effect::PixelRunWithTrail { .. } => "pixel-run-with-trail",
      Effect::PixelMarathon { .. } => "pixel-marathon",
      Effect::SmoothChase { .. } => "smooth-chase",
      Effect::Sparkle { .. } => "sparkle",
      Effect::StackOverflow { .. } => "stack-overflow",
    }
  }
}

/// One immutable animation request as exchanged over the wire: a mode, an
/// optional identifier, and (for everything but cancels) a tagged effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationRequest {
  pub mode: Mode,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,

  #[serde(flatten)]
  pub effect: Option<Effect>,
}

impl AnimationRequest {
  pub fn one_shot(effect: Effect) -> Self {
    AnimationRequest {
      mode: Mode::OneShot,
      id: None,
      effect: Some(effect),
    }
  }

  pub fn continuous<T>(effect: Effect, id: Option<T>) -> Self
  where
    T: Into<String>,
  {
    AnimationRequest {
      mode: Mode::Continuous,
      id: id.map(|inner| inner.into()),
      effect: Some(effect),
    }
  }

  pub fn cancel<T>(id: T) -> Self
  where
    T: Into<String>,
  {
    AnimationRequest {
      mode: Mode::Cancel,
      id: Some(id.into()),
      effect: None,
    }
  }
}
