//! `telefeed sessions ...`: register, list and log out bot accounts.

use std::sync::Arc;

use {
    anyhow::{Context, Result},
    clap::Subcommand,
    secrecy::Secret,
};

use {
    telefeed_channels::Connector,
    telefeed_sessions::{AccountKey, SessionPool},
};

use crate::app::App;

#[derive(Subcommand)]
pub enum SessionAction {
    /// Verify a bot token and store it for the account.
    Add {
        #[arg(long, env = "TELEFEED_OWNER")]
        owner: String,
        /// Local account name the rules refer to.
        #[arg(long)]
        account: String,
        /// Bot token from @BotFather.
        #[arg(long, env = "TELEFEED_BOT_TOKEN", hide_env_values = true)]
        token: String,
    },
    /// List the owner's stored sessions.
    List {
        #[arg(long, env = "TELEFEED_OWNER")]
        owner: String,
    },
    /// Deactivate a session. Its rules stay but stop forwarding.
    Logout {
        #[arg(long, env = "TELEFEED_OWNER")]
        owner: String,
        #[arg(long)]
        account: String,
    },
}

pub async fn handle_sessions(app: &App, action: SessionAction) -> Result<()> {
    let connector = Arc::new(app.connector()?);
    let pool = SessionPool::new(
        connector.clone(),
        app.session_store().await?,
        app.config.sessions.clone(),
    );

    match action {
        SessionAction::Add {
            owner,
            account,
            token,
        } => {
            let credential = Secret::new(token);
            let connected = connector
                .connect(&account, &credential)
                .await
                .context("bot token was not accepted")?;
            connected.connection.disconnect().await;

            pool.register(&AccountKey::new(&owner, &account), credential)
                .await?;
            match connected.display_name {
                Some(name) => println!("Stored session for {account} (@{name})."),
                None => println!("Stored session for {account}."),
            }
        },
        SessionAction::List { owner } => {
            let sessions = pool.list(&owner).await?;
            if sessions.is_empty() {
                println!("No sessions for {owner}.");
            }
            for info in sessions {
                let state = if info.active {
                    "active"
                } else {
                    "logged out"
                };
                println!(
                    "{} [{state}] last used {}",
                    info.key.account,
                    info.last_used_at.format("%Y-%m-%d %H:%M")
                );
            }
        },
        SessionAction::Logout { owner, account } => {
            pool.deactivate(&AccountKey::new(&owner, &account)).await?;
            println!("Logged out {account}.");
        },
    }

    Ok(())
}
