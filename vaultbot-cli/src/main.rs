mod cli;
mod run;
mod server;

use cli::VaultBotArgs;

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    vaultbot_logger::init();

    let args = VaultBotArgs::from_env()?;
    run::run(args)
}
