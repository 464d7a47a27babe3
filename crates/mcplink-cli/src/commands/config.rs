//! Configuration management commands.

use crate::{AppContext, ConfigAction};

pub fn handle(action: ConfigAction, ctx: &AppContext) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            print!("{}", ctx.config.to_toml()?);
        }
        ConfigAction::Path => {
            println!("{}", mcplink_core::Config::config_dir().join("config.toml").display());
        }
        ConfigAction::Servers => {
            if ctx.config.servers.is_empty() {
                println!("No servers registered.");
                println!("Add entries under [servers] in the config file.");
            }
            let width = ctx.config.servers.keys().map(String::len).max().unwrap_or(0);
            for (name, target) in &ctx.config.servers {
                println!("{:width$}  {}", name, target, width = width);
            }
        }
    }
    Ok(())
}
