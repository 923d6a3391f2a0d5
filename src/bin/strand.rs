use std::io::Result;

use strand::config;
use strand::server::Server;

async fn serve() -> Result<()> {
  let config = config::from_env();
  log::info!("loaded configuration {:?}", config);

  let server = Server::builder().config(config).build()?;
  server.start().await?;

  // the admin QUIT command flips the running flag; idle until then
  while server.is_running() {
    async_std::task::sleep(std::time::Duration::from_millis(500)).await;
  }

  Ok(())
}

fn main() -> Result<()> {
  dotenv::dotenv().ok();

  // initialize permissive, then gate through the global max level so the
  // admin DEBUG/TRACE/INFO commands can adjust verbosity at runtime
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("trace")).init();
  log::set_max_level(log::LevelFilter::Info);

  log::info!("starting async main thread");
  async_std::task::block_on(serve())?;
  Ok(())
}
