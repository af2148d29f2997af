//! Command table and message parsing.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Help,
    Ping,
    Whoami,
    Faucet,
    Trust,
    Stats,
    Balance,
    Tokens,
    XrplStatus,
    HotWallet,
    Blacklist,
    Whitelist,
    Blacklisted,
    Reconcile,
    Resolve,
}

pub struct CommandSpec {
    pub command: Command,
    pub name: &'static str,
    pub usage: &'static str,
    pub summary: &'static str,
    pub admin: bool,
}

pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: Command::Help,
        name: "help",
        usage: "help",
        summary: "Show this help message",
        admin: false,
    },
    CommandSpec {
        command: Command::Ping,
        name: "ping",
        usage: "ping",
        summary: "Check if the bot is online",
        admin: false,
    },
    CommandSpec {
        command: Command::Whoami,
        name: "whoami",
        usage: "whoami",
        summary: "Show your TextRP ID and wallet",
        admin: false,
    },
    CommandSpec {
        command: Command::Faucet,
        name: "faucet",
        usage: "faucet",
        summary: "Claim your daily tokens",
        admin: false,
    },
    CommandSpec {
        command: Command::Trust,
        name: "trust",
        usage: "trust",
        summary: "Check your trust line for the faucet token",
        admin: false,
    },
    CommandSpec {
        command: Command::Stats,
        name: "stats",
        usage: "stats",
        summary: "Show faucet statistics",
        admin: false,
    },
    CommandSpec {
        command: Command::Balance,
        name: "balance",
        usage: "balance [address]",
        summary: "Check XRP and faucet token balance (defaults to your wallet)",
        admin: false,
    },
    CommandSpec {
        command: Command::Tokens,
        name: "tokens",
        usage: "tokens [address]",
        summary: "Show non-zero token balances",
        admin: false,
    },
    CommandSpec {
        command: Command::XrplStatus,
        name: "xrplstatus",
        usage: "xrplstatus",
        summary: "Check the connected XRPL node",
        admin: false,
    },
    CommandSpec {
        command: Command::HotWallet,
        name: "hotwallet",
        usage: "hotwallet",
        summary: "Show the hot wallet balance",
        admin: true,
    },
    CommandSpec {
        command: Command::Blacklist,
        name: "blacklist",
        usage: "blacklist <wallet> [reason]",
        summary: "Block a wallet from claiming",
        admin: true,
    },
    CommandSpec {
        command: Command::Whitelist,
        name: "whitelist",
        usage: "whitelist <wallet>",
        summary: "Remove a wallet from the blacklist",
        admin: true,
    },
    CommandSpec {
        command: Command::Blacklisted,
        name: "blacklisted",
        usage: "blacklisted",
        summary: "List blacklisted wallets",
        admin: true,
    },
    CommandSpec {
        command: Command::Reconcile,
        name: "reconcile",
        usage: "reconcile",
        summary: "Re-check pending payouts and verify statistics",
        admin: true,
    },
    CommandSpec {
        command: Command::Resolve,
        name: "resolve",
        usage: "resolve <key> confirmed <tx>|failed",
        summary: "Settle a pending payout by hand",
        admin: true,
    },
];

impl Command {
    pub fn lookup(name: &str) -> Option<Command> {
        COMMANDS
            .iter()
            .find(|spec| spec.name.eq_ignore_ascii_case(name))
            .map(|spec| spec.command)
    }

    pub fn spec(self) -> &'static CommandSpec {
        COMMANDS
            .iter()
            .find(|spec| spec.command == self)
            .unwrap_or(&COMMANDS[0])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Known { command: Command, args: Vec<String> },
    Unknown(String),
}

/// `None` when the message is not addressed to the bot.
pub fn parse(prefix: &str, body: &str) -> Option<Invocation> {
    let rest = body.trim().strip_prefix(prefix)?;
    let mut words = rest.split_whitespace();
    let name = words.next()?;
    let args = words.map(str::to_string).collect();
    Some(match Command::lookup(name) {
        Some(command) => Invocation::Known { command, args },
        None => Invocation::Unknown(name.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_command_resolves_to_its_own_spec() {
        for spec in COMMANDS {
            assert_eq!(Command::lookup(spec.name), Some(spec.command));
            assert_eq!(spec.command.spec().name, spec.name);
        }
    }

    #[test]
    fn parses_prefixed_messages() {
        assert_eq!(
            parse("!", "!faucet"),
            Some(Invocation::Known {
                command: Command::Faucet,
                args: vec![]
            })
        );
        assert_eq!(
            parse("!", "  !Blacklist rAbc spam bot  "),
            Some(Invocation::Known {
                command: Command::Blacklist,
                args: vec!["rAbc".into(), "spam".into(), "bot".into()]
            })
        );
        assert_eq!(parse("!", "!dance"), Some(Invocation::Unknown("dance".into())));
    }

    #[test]
    fn ignores_plain_chat() {
        assert_eq!(parse("!", "hello there"), None);
        assert_eq!(parse("!", "!"), None);
        assert_eq!(parse("!", ""), None);
    }
}
