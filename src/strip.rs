use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::animation::{presets, Direction, Effect, DEFAULT_SPACING};

/// Things that can go wrong inside a render call. Recoverable failures are
/// logged by the caller and the owning loop keeps going; fatal failures end
/// the loop and remove its registry entry.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
  #[error("render call failed - {0}")]
  Recoverable(String),

  #[error("strip unusable - {0}")]
  Fatal(String),
}

impl RenderError {
  pub fn is_fatal(&self) -> bool {
    matches!(self, RenderError::Fatal(_))
  }
}

/// The rendering collaborator boundary. A `run` call executes exactly one
/// bounded cycle of the effect against the device and returns; the dispatcher
/// never interrupts a call in flight.
pub trait Strip: Send + Sync + 'static {
  fn run(&self, effect: &Effect) -> Result<(), RenderError>;

  fn set_all(&self, color: u64) -> Result<(), RenderError>;
}

/// An in-memory strip used when no hardware driver is wired in, and by the
/// test suite. One `run` advances the effect by a single frame.
pub struct EmulatedStrip {
  pixels: Mutex<Vec<u64>>,
  cursor: AtomicUsize,
}

impl EmulatedStrip {
  pub fn new(count: usize) -> Self {
    EmulatedStrip {
      pixels: Mutex::new(vec![0u64; count]),
      cursor: AtomicUsize::new(0),
    }
  }

  /// A point-in-time copy of the pixel buffer.
  pub fn pixels(&self) -> Vec<u64> {
    self.pixels.lock().unwrap_or_else(|poison| poison.into_inner()).clone()
  }

  fn frame(&self) -> usize {
    self.cursor.fetch_add(1, Ordering::SeqCst)
  }
}

impl Strip for EmulatedStrip {
  fn run(&self, effect: &Effect) -> Result<(), RenderError> {
    let mut pixels = self.pixels.lock().unwrap_or_else(|poison| poison.into_inner());

    if pixels.is_empty() {
      return Err(RenderError::Fatal("strip has no pixels".into()));
    }

    let count = pixels.len();
    let frame = self.frame();

    match effect {
      Effect::Color { color }
      | Effect::Wipe { color, .. }
      | Effect::MultiPixelRunToColor { color, .. }
      | Effect::SparkleToColor { color, .. }
      | Effect::Stack { color, .. } => {
        pixels.iter_mut().for_each(|pixel| *pixel = *color);
      }
      Effect::MultiColor { colors } => {
        if colors.is_empty() {
          return Err(RenderError::Recoverable("multi-color effect with no colors".into()));
        }
        for (index, pixel) in pixels.iter_mut().enumerate() {
          *pixel = colors[index % colors.len()];
        }
      }
      Effect::Alternate { color, second, .. } => {
        let second = second.unwrap_or(0x0);
        let flip = frame % 2 == 0;
        pixels.iter_mut().for_each(|pixel| *pixel = if flip { *color } else { second });
      }
      Effect::StackOverflow { color, second } => {
        let second = second.unwrap_or(0xFF);
        for (index, pixel) in pixels.iter_mut().enumerate() {
          *pixel = if (index + frame) % 2 == 0 { *color } else { second };
        }
      }
      Effect::Sparkle { color, .. } => {
        // crude scatter: one fresh pixel per frame
        let index = (frame * 7 + 3) % count;
        pixels[index] = *color;
      }
      Effect::MultiPixelRun {
        color, spacing, direction, ..
      } => {
        let spacing = spacing.unwrap_or(DEFAULT_SPACING).max(1) as usize;
        let offset = directional_offset(frame, count, direction.unwrap_or_default());
        for (index, pixel) in pixels.iter_mut().enumerate() {
          *pixel = if (index + offset) % spacing == 0 { *color } else { 0x0 };
        }
      }
      Effect::PixelRun {
        color, second, direction, ..
      }
      | Effect::PixelRunWithTrail {
        color, second, direction, ..
      } => {
        let background = second.unwrap_or(0x0);
        let head = directional_offset(frame, count, direction.unwrap_or_default());
        pixels.iter_mut().for_each(|pixel| *pixel = background);
        pixels[head] = *color;
      }
      Effect::PixelMarathon {
        color,
        second,
        third,
        fourth,
        fifth,
      } => {
        let runners = [
          *color,
          second.unwrap_or(presets::GREEN),
          third.unwrap_or(presets::YELLOW),
          fourth.unwrap_or(presets::BLUE),
          fifth.unwrap_or(presets::PURPLE),
        ];
        for (lane, runner) in runners.iter().enumerate() {
          pixels[(frame + lane * 3) % count] = *runner;
        }
      }
      Effect::SmoothChase { colors, direction, .. } => {
        if colors.is_empty() {
          return Err(RenderError::Recoverable("smooth-chase effect with no colors".into()));
        }
        let offset = directional_offset(frame, colors.len(), direction.unwrap_or_default());
        for (index, pixel) in pixels.iter_mut().enumerate() {
          *pixel = colors[(index + offset) % colors.len()];
        }
      }
    }

    Ok(())
  }

  fn set_all(&self, color: u64) -> Result<(), RenderError> {
    let mut pixels = self.pixels.lock().unwrap_or_else(|poison| poison.into_inner());
    pixels.iter_mut().for_each(|pixel| *pixel = color);
    Ok(())
  }
}

fn directional_offset(frame: usize, length: usize, direction: Direction) -> usize {
  match direction {
    Direction::Forward => frame % length,
    Direction::Backward => (length - 1) - (frame % length),
  }
}
