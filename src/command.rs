use crate::animation::{AnimationRequest, Effect};
use crate::server::Server;

/// What the interpreter sends back to the admin session, plus whether the
/// session should close afterwards.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reply {
  lines: Vec<String>,
  quit: bool,
}

impl Reply {
  fn say<T>(text: T) -> Self
  where
    T: Into<String>,
  {
    Reply {
      lines: vec![text.into()],
      quit: false,
    }
  }

  fn quitting<T>(text: T) -> Self
  where
    T: Into<String>,
  {
    Reply {
      lines: vec![text.into()],
      quit: true,
    }
  }

  fn silent() -> Self {
    Reply::default()
  }

  pub fn lines(&self) -> &[String] {
    &self.lines
  }

  pub fn quits(&self) -> bool {
    self.quit
  }
}

/// Parses one administrative command line and drives the dispatcher and
/// registry accordingly. The command token is case-insensitive; identifier
/// arguments are taken verbatim.
pub async fn interpret(line: &str, server: &Server) -> Reply {
  let trimmed = line.trim();
  log::trace!("parsing admin command '{}'", trimmed);

  let mut tokens = trimmed.split_whitespace();

  let first = match tokens.next() {
    Some(first) => first.to_uppercase(),
    None => return Reply::silent(),
  };

  match first.as_str() {
    // the admin session performs the actual stop after the reply has been
    // written back, so the console sees the acknowledgement
    "QUIT" | "Q" => {
      log::info!("shutting down server");
      Reply::quitting("shutting down")
    }
    "DEBUG" => {
      log::set_max_level(log::LevelFilter::Debug);
      log::debug!("set logging level to debug");
      Reply::say("logging level set to debug")
    }
    "TRACE" => {
      log::set_max_level(log::LevelFilter::Trace);
      log::trace!("set logging level to trace");
      Reply::say("logging level set to trace")
    }
    "INFO" => {
      log::set_max_level(log::LevelFilter::Info);
      log::info!("set logging level to info");
      Reply::say("logging level set to info")
    }
    "CLEAR" => {
      let request = AnimationRequest::one_shot(Effect::Color { color: 0x0 });

      if let Err(error) = server.handler().submit(request).await {
        log::warn!("unable to submit clear request - {}", error);
      }

      Reply::say("strip cleared")
    }
    "SHOW" => show(tokens.next(), server),
    "END" => end(tokens.collect(), server).await,
    _ => {
      log::warn!("'{}' is not a valid command", trimmed);
      Reply::say(format!("invalid command: {}", trimmed))
    }
  }
}

fn show(id: Option<&str>, server: &Server) -> Reply {
  let snapshot = server.registry().snapshot();

  match id {
    Some(id) => match snapshot.get(id) {
      Some(info) => Reply::say(format!("{}: {:?}", id, info.request)),
      None => Reply::say(format!("{}: NOT FOUND", id)),
    },
    None => {
      let mut ids = snapshot.into_keys().collect::<Vec<_>>();
      ids.sort();
      Reply::say(format!("running animations: {:?}", ids))
    }
  }
}

async fn end(targets: Vec<&str>, server: &Server) -> Reply {
  if targets.is_empty() {
    log::warn!("end command requires an animation id");
    return Reply::say("animation id must be specified");
  }

  if targets.len() == 1 && targets[0].eq_ignore_ascii_case("all") {
    server.handler().cancel_all().await;
    return Reply::say("ended all animations");
  }

  for id in &targets {
    if let Err(error) = server.handler().submit(AnimationRequest::cancel(*id)).await {
      log::warn!("unable to end '{}' - {}", id, error);
    }
  }

  Reply::say(format!("ended {} animation(s)", targets.len()))
}
