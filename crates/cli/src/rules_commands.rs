//! `telefeed rules ...`: edit the rule file directly.
//!
//! A running `telefeed run` keeps its own copy of the rules and picks up
//! changes made here on its next start.

use {
    anyhow::{Result, bail},
    clap::{Args, Subcommand},
};

use {
    telefeed_channels::{Replacement, RuleFilters},
    telefeed_redirect::rule_from_invite,
    telefeed_rules::{NewRule, Rule, RuleStore},
};

use crate::app::App;

#[derive(Args, Clone)]
pub struct OwnerArg {
    /// User that owns the rules.
    #[arg(long, env = "TELEFEED_OWNER")]
    owner: String,
}

#[derive(Args, Clone, Default)]
pub struct FilterArgs {
    /// Only forward messages containing one of these keywords.
    #[arg(long, value_delimiter = ',')]
    whitelist: Vec<String>,
    /// Drop messages containing any of these keywords.
    #[arg(long, value_delimiter = ',')]
    blacklist: Vec<String>,
    /// Text replacement applied before forwarding, as `from=to`. Repeatable.
    #[arg(long = "replace", value_parser = parse_replacement)]
    replacements: Vec<Replacement>,
}

impl From<FilterArgs> for RuleFilters {
    fn from(args: FilterArgs) -> Self {
        Self {
            whitelist: args.whitelist,
            blacklist: args.blacklist,
            replacements: args.replacements,
        }
    }
}

#[derive(Subcommand)]
pub enum RuleAction {
    /// List the owner's rules.
    List {
        #[command(flatten)]
        owner: OwnerArg,
    },
    /// Add a rule between two numeric conversation ids.
    Add {
        #[command(flatten)]
        owner: OwnerArg,
        /// Rule name, unique per owner.
        name: String,
        /// Account whose session reads the source and writes the destination.
        #[arg(long)]
        account: String,
        #[arg(long, allow_hyphen_values = true)]
        source: String,
        #[arg(long, allow_hyphen_values = true)]
        destination: String,
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Add a rule whose source is resolved from a channel link. The rule is
    /// named `from_<title>`.
    AddInvite {
        #[command(flatten)]
        owner: OwnerArg,
        /// Link such as `https://t.me/channel` or `@channel`.
        link: String,
        #[arg(long)]
        account: String,
        #[arg(long, allow_hyphen_values = true)]
        destination: String,
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Delete a rule.
    Remove {
        #[command(flatten)]
        owner: OwnerArg,
        name: String,
    },
    /// Resume forwarding for a rule.
    Enable {
        #[command(flatten)]
        owner: OwnerArg,
        name: String,
    },
    /// Stop forwarding for a rule without deleting it.
    Disable {
        #[command(flatten)]
        owner: OwnerArg,
        name: String,
    },
    /// Replace a rule's filters. No filter flags clears them.
    Filters {
        #[command(flatten)]
        owner: OwnerArg,
        name: String,
        #[command(flatten)]
        filters: FilterArgs,
    },
}

pub async fn handle_rules(app: &App, action: RuleAction) -> Result<()> {
    let rules = app.rules().await?;

    match action {
        RuleAction::List { owner } => {
            let list = rules.list(&owner.owner).await?;
            if list.is_empty() {
                println!("No rules for {}.", owner.owner);
            }
            for rule in &list {
                println!("{}", describe(rule));
            }
        },
        RuleAction::Add {
            owner,
            name,
            account,
            source,
            destination,
            filters,
        } => {
            let rule =
                NewRule::new(name, account, source, destination).with_filters(filters.into());
            let rule = rules.add(&owner.owner, rule).await?;
            println!("Added {}", describe(&rule));
        },
        RuleAction::AddInvite {
            owner,
            link,
            account,
            destination,
            filters,
        } => {
            let resolver = app.resolver(&owner.owner, &account).await?;
            let rule =
                rule_from_invite(&resolver, &account, &link, destination, filters.into()).await?;
            let rule = rules.add(&owner.owner, rule).await?;
            println!("Added {}", describe(&rule));
        },
        RuleAction::Remove { owner, name } => {
            if !rules.remove(&owner.owner, &name).await? {
                bail!("no rule named '{name}' for {}", owner.owner);
            }
            println!("Removed rule '{name}'.");
        },
        RuleAction::Enable { owner, name } => {
            let rule = rules.set_active(&owner.owner, &name, true).await?;
            println!("Enabled {}", describe(&rule));
        },
        RuleAction::Disable { owner, name } => {
            let rule = rules.set_active(&owner.owner, &name, false).await?;
            println!("Disabled {}", describe(&rule));
        },
        RuleAction::Filters {
            owner,
            name,
            filters,
        } => {
            let rule = rules
                .update_filters(&owner.owner, &name, filters.into())
                .await?;
            println!("Updated {}", describe(&rule));
        },
    }

    Ok(())
}

fn parse_replacement(raw: &str) -> std::result::Result<Replacement, String> {
    match raw.split_once('=') {
        Some((from, to)) if !from.is_empty() => Ok(Replacement {
            from: from.to_string(),
            to: to.to_string(),
        }),
        _ => Err(format!("expected FROM=TO, got '{raw}'")),
    }
}

fn describe(rule: &Rule) -> String {
    let state = if rule.active {
        "active"
    } else {
        "inactive"
    };
    let mut line = format!(
        "{} [{state}] {} -> {} via {}",
        rule.name, rule.source, rule.destination, rule.account
    );
    if !rule.channel_name.is_empty() {
        line.push_str(&format!(" ({})", rule.channel_name));
    }
    let filters = &rule.filters;
    if !filters.is_empty() {
        line.push_str(&format!(
            " filters: +{} -{} ~{}",
            filters.whitelist.len(),
            filters.blacklist.len(),
            filters.replacements.len()
        ));
    }
    line
}
