//! Chat command dispatcher.
//!
//! The chat transport hands over `(sender, room, body)` and delivers whatever
//! reply comes back. The sender's user id carries the claimant wallet.

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{FaucetError, FaucetResult, format_wait};
use crate::faucet::LedgerFacts;
use crate::faucet::units::Drops;
use crate::faucet::orchestrator::{ClaimOrchestrator, ClaimRequest, ManualResolution, Resolution};
use crate::faucet::reporter::AdminStatsReporter;
use crate::identity::{validate_classic_address, wallet_from_user_id};

mod commands;

pub use commands::{COMMANDS, Command, Invocation};

const MAX_REASON_LEN: usize = 256;
const MAX_LISTED: usize = 25;

#[derive(Debug, Clone)]
pub struct CommandContext {
    pub sender: String,
    pub room_id: String,
}

pub struct CommandDispatcher {
    prefix: String,
    orchestrator: Arc<ClaimOrchestrator>,
    reporter: Arc<AdminStatsReporter>,
    facts: Arc<dyn LedgerFacts>,
}

impl CommandDispatcher {
    pub fn new(
        prefix: impl Into<String>,
        orchestrator: Arc<ClaimOrchestrator>,
        reporter: Arc<AdminStatsReporter>,
        facts: Arc<dyn LedgerFacts>,
    ) -> Self {
        let prefix = prefix.into();
        assert!(!prefix.is_empty(), "Command prefix must be non-empty");
        Self {
            prefix,
            orchestrator,
            reporter,
            facts,
        }
    }

    /// Reply for a chat message, or `None` if it is not a command.
    pub async fn handle(&self, ctx: &CommandContext, body: &str) -> Option<String> {
        self.handle_at(ctx, body, Utc::now()).await
    }

    pub async fn handle_at(
        &self,
        ctx: &CommandContext,
        body: &str,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let (command, args) = match commands::parse(&self.prefix, body)? {
            Invocation::Known { command, args } => (command, args),
            Invocation::Unknown(name) => {
                debug!(sender = %ctx.sender, name, "Unknown command");
                return Some(format!(
                    "Unknown command `{}{name}`. Use `{}help` to see what I can do.",
                    self.prefix, self.prefix
                ));
            }
        };
        info!(sender = %ctx.sender, room = %ctx.room_id, command = command.spec().name, "Command received");

        let reply = match self.run(ctx, command, &args, now).await {
            Ok(reply) => reply,
            Err(err) => {
                match &err {
                    FaucetError::Denied(_)
                    | FaucetError::Validation(_)
                    | FaucetError::ClaimInProgress
                    | FaucetError::Unauthorized => {
                        debug!(sender = %ctx.sender, "Command rejected: {err}")
                    }
                    _ => warn!(sender = %ctx.sender, command = command.spec().name, "Command failed: {err}"),
                }
                format!("❌ {}", err.user_message())
            }
        };
        Some(reply)
    }

    async fn run(
        &self,
        ctx: &CommandContext,
        command: Command,
        args: &[String],
        now: DateTime<Utc>,
    ) -> FaucetResult<String> {
        match command {
            Command::Help => Ok(self.help(ctx)),
            Command::Ping => Ok("🏓 Pong! Bot is online.".to_string()),
            Command::Whoami => Ok(self.whoami(ctx)),
            Command::Faucet => self.faucet(ctx, now).await,
            Command::Trust => self.trust(ctx).await,
            Command::Stats => self.stats(now).await,
            Command::Balance => self.balance(ctx, args).await,
            Command::Tokens => self.tokens(ctx, args).await,
            Command::XrplStatus => self.xrpl_status().await,
            Command::HotWallet => self.hot_wallet(ctx).await,
            Command::Blacklist => self.blacklist(ctx, args, now).await,
            Command::Whitelist => self.whitelist(ctx, args).await,
            Command::Blacklisted => self.blacklisted(ctx).await,
            Command::Reconcile => self.reconcile(ctx).await,
            Command::Resolve => self.resolve(ctx, args).await,
        }
    }

    fn help(&self, ctx: &CommandContext) -> String {
        let is_admin = self.reporter.is_admin(&ctx.sender);
        let mut text = String::from("**TextRP Faucet Bot Commands**\n");
        for spec in COMMANDS.iter().filter(|spec| is_admin || !spec.admin) {
            let _ = writeln!(text, "• `{}{}` - {}", self.prefix, spec.usage, spec.summary);
        }
        text
    }

    fn whoami(&self, ctx: &CommandContext) -> String {
        let wallet = wallet_from_user_id(&ctx.sender).ok();
        format!(
            "**Your Information:**\n• **TextRP ID:** `{}`\n• **Wallet Address:** `{}`",
            ctx.sender,
            wallet.as_deref().unwrap_or("Not detected")
        )
    }

    async fn faucet(&self, ctx: &CommandContext, now: DateTime<Utc>) -> FaucetResult<String> {
        let wallet = wallet_from_user_id(&ctx.sender)?;
        let request = ClaimRequest::new(wallet, format!("{}:{}", ctx.room_id, ctx.sender));
        let receipt = self.orchestrator.submit_claim_at(&request, now).await?;
        let currency = &self.orchestrator.policy().asset.currency;
        let wait = (receipt.next_claim_at - receipt.claimed_at)
            .to_std()
            .unwrap_or_default();
        Ok(format!(
            "✅ **Faucet Claim Successful!**\n\nYou received **{} {currency}** tokens!\n\n\
             **Transaction:** `{}`\n\nCome back in {} for your next claim!",
            receipt.amount,
            receipt.transaction_reference,
            format_wait(wait)
        ))
    }

    async fn trust(&self, ctx: &CommandContext) -> FaucetResult<String> {
        let wallet = wallet_from_user_id(&ctx.sender)?;
        let asset = &self.orchestrator.policy().asset;
        if self.facts.trust_line_present(&wallet, asset).await? {
            let balance = self.facts.token_balance(&wallet, asset).await?;
            Ok(format!(
                "✅ **Trust Line Found**\n\n**Currency:** {}\n**Issuer:** `{}`\n**Balance:** {balance}\n\n\
                 You can receive {} tokens!",
                asset.currency, asset.issuer, asset.currency
            ))
        } else {
            Ok(format!(
                "❌ **No Trust Line Found**\n\nRequired:\n• Currency: {}\n• Issuer: `{}`\n\n\
                 Please create a trust line to receive tokens.",
                asset.currency, asset.issuer
            ))
        }
    }

    async fn stats(&self, now: DateTime<Utc>) -> FaucetResult<String> {
        let overview = self.reporter.overview(now).await?;
        let currency = &self.orchestrator.policy().asset.currency;
        let last = overview
            .stats
            .last_updated
            .map_or_else(|| "never".to_string(), |at| at.format("%Y-%m-%d %H:%M UTC").to_string());
        Ok(format!(
            "**Faucet Statistics**\n• Total claims: {}\n• Total distributed: {} {currency}\n\
             • Unique wallets: {}\n• Claims (24h): {}\n• Blacklisted wallets: {}\n\
             • Pending payouts: {}\n• Last claim: {last}",
            overview.stats.total_claims,
            overview.stats.total_distributed,
            overview.stats.unique_wallets,
            overview.claims_24h,
            overview.blacklisted_count,
            overview.pending_payouts,
        ))
    }

    /// Wallet named in the first argument, else the sender's own.
    fn target_wallet(
        &self,
        ctx: &CommandContext,
        args: &[String],
        command: Command,
    ) -> FaucetResult<String> {
        match args {
            [] => wallet_from_user_id(&ctx.sender).map_err(|_| self.usage(command)),
            [address] => validate_classic_address(address),
            _ => Err(self.usage(command)),
        }
    }

    async fn balance(&self, ctx: &CommandContext, args: &[String]) -> FaucetResult<String> {
        let wallet = self.target_wallet(ctx, args, Command::Balance)?;
        let asset = &self.orchestrator.policy().asset;
        let xrp = self.facts.xrp_balance(&wallet).await?;
        if xrp == Drops::ZERO {
            return Ok(format!(
                "⚠️ Account not found or not activated.\nAddress: `{wallet}`\n\n\
                 Note: XRP accounts need a reserve deposit before they exist on the ledger."
            ));
        }
        let token = self.facts.token_balance(&wallet, asset).await?;
        Ok(format!(
            "💰 **Balance:** {xrp}\n• {}: {token}\nAddress: `{wallet}`",
            asset.currency
        ))
    }

    async fn tokens(&self, ctx: &CommandContext, args: &[String]) -> FaucetResult<String> {
        let wallet = self.target_wallet(ctx, args, Command::Tokens)?;
        let holdings = self.facts.token_holdings(&wallet).await?;
        let xrp = self.facts.xrp_balance(&wallet).await?;
        let mut text = format!("🪙 **Token Balances** for `{wallet}`\n**XRP:** {xrp}\n");
        if holdings.is_empty() {
            text.push_str("\n_No other tokens held_");
            return Ok(text);
        }
        for holding in holdings.iter().take(MAX_LISTED) {
            let _ = writeln!(
                text,
                "**{}:** {} (issuer `{}`)",
                holding.currency, holding.balance, holding.issuer
            );
        }
        if holdings.len() > MAX_LISTED {
            let _ = writeln!(text, "… and {} more", holdings.len() - MAX_LISTED);
        }
        Ok(text)
    }

    async fn xrpl_status(&self) -> FaucetResult<String> {
        let status = self.facts.node_status().await?;
        let ledger = status
            .validated_ledger
            .map_or_else(|| "none yet".to_string(), |seq| seq.to_string());
        Ok(format!(
            "🌐 **XRPL Node Status**\n**Node:** {}\n**State:** {}\n**Validated ledger:** {ledger}\n\
             **Version:** {}",
            status.endpoint, status.server_state, status.build_version
        ))
    }

    async fn hot_wallet(&self, ctx: &CommandContext) -> FaucetResult<String> {
        let balance = self.reporter.hot_wallet_balance(&ctx.sender).await?;
        Ok(format!(
            "**Hot Wallet** `{}`\n• XRP: {}\n• {}: {}",
            balance.address, balance.xrp, balance.currency, balance.token
        ))
    }

    async fn blacklist(
        &self,
        ctx: &CommandContext,
        args: &[String],
        now: DateTime<Utc>,
    ) -> FaucetResult<String> {
        let (wallet, reason) = args
            .split_first()
            .ok_or_else(|| self.usage(Command::Blacklist))?;
        let reason = (!reason.is_empty()).then(|| {
            let joined = reason.join(" ");
            joined.chars().take(MAX_REASON_LEN).collect::<String>()
        });
        self.reporter
            .admin_blacklist(wallet, reason, &ctx.sender, now)
            .await?;
        Ok(format!("🚫 `{wallet}` has been blacklisted."))
    }

    async fn whitelist(&self, ctx: &CommandContext, args: &[String]) -> FaucetResult<String> {
        let [wallet] = args else {
            return Err(self.usage(Command::Whitelist));
        };
        if self.reporter.admin_whitelist(wallet, &ctx.sender).await? {
            Ok(format!("✅ `{wallet}` has been removed from the blacklist."))
        } else {
            Ok(format!("`{wallet}` was not blacklisted."))
        }
    }

    async fn blacklisted(&self, ctx: &CommandContext) -> FaucetResult<String> {
        let entries = self.reporter.list_blacklist(&ctx.sender).await?;
        if entries.is_empty() {
            return Ok("The blacklist is empty.".to_string());
        }
        let mut text = format!("**Blacklisted wallets ({})**\n", entries.len());
        for entry in entries.iter().take(MAX_LISTED) {
            let _ = writeln!(
                text,
                "• `{}` by {} ({}){}",
                entry.wallet_address,
                entry.added_by,
                entry.added_at.format("%Y-%m-%d"),
                entry
                    .reason
                    .as_deref()
                    .map(|reason| format!(": {reason}"))
                    .unwrap_or_default()
            );
        }
        if entries.len() > MAX_LISTED {
            let _ = writeln!(text, "… and {} more", entries.len() - MAX_LISTED);
        }
        Ok(text)
    }

    async fn reconcile(&self, ctx: &CommandContext) -> FaucetResult<String> {
        let summary = self.reporter.reconcile_payouts(&ctx.sender).await?;
        let check = self.reporter.verify_stats(&ctx.sender).await?;
        Ok(format!(
            "**Reconciliation**\n• Committed: {}\n• Failed: {}\n• Still pending: {}\n\
             • Busy: {}\n• Statistics {}",
            summary.committed,
            summary.failed,
            summary.unresolved,
            summary.skipped,
            if check.repaired {
                "were out of sync and have been rebuilt"
            } else {
                "match the claim history"
            }
        ))
    }

    async fn resolve(&self, ctx: &CommandContext, args: &[String]) -> FaucetResult<String> {
        let resolution = match args {
            [_, verdict, tx] if verdict.eq_ignore_ascii_case("confirmed") => {
                ManualResolution::Confirmed(tx.clone())
            }
            [_, verdict] if verdict.eq_ignore_ascii_case("failed") => ManualResolution::Failed,
            _ => return Err(self.usage(Command::Resolve)),
        };
        let key = &args[0];
        match self
            .reporter
            .resolve_payout(key, resolution, &ctx.sender)
            .await?
        {
            Resolution::Committed(record) => Ok(format!(
                "✅ Payout `{key}` recorded as a claim for `{}`.",
                record.wallet_address
            )),
            Resolution::Failed(_) => Ok(format!(
                "Payout `{key}` marked failed; the wallet may claim again."
            )),
            Resolution::Unresolved => Ok(format!("Payout `{key}` is still pending.")),
        }
    }

    fn usage(&self, command: Command) -> FaucetError {
        FaucetError::Validation(format!("usage: {}{}", self.prefix, command.spec().usage))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::faucet::{PayoutOutcome, PayoutTicket, TokenHolding};
    use crate::faucet::units::TokenAmount;
    use crate::test_support::{
        ALICE, BOB, DAY, FakeLedgerFacts, ScriptedSubmitter, memory_ledger, t0, test_policy,
    };

    const ADMIN: &str = "@admin:textrp.io";

    struct Bot {
        dispatcher: CommandDispatcher,
        facts: Arc<FakeLedgerFacts>,
        submitter: Arc<ScriptedSubmitter>,
    }

    async fn bot() -> Bot {
        let ledger = Arc::new(memory_ledger(DAY).await);
        let facts = Arc::new(FakeLedgerFacts::default());
        facts.fund(ALICE, Drops::new(20_000_000), true);
        let submitter = Arc::new(ScriptedSubmitter::default());
        let orchestrator = Arc::new(ClaimOrchestrator::new(
            ledger,
            facts.clone(),
            submitter.clone(),
            test_policy(),
        ));
        let reporter = Arc::new(AdminStatsReporter::new(
            orchestrator.clone(),
            facts.clone(),
            &[ADMIN.to_string()],
            Duration::from_secs(30),
        ));
        Bot {
            dispatcher: CommandDispatcher::new("!", orchestrator, reporter, facts.clone()),
            facts,
            submitter,
        }
    }

    fn from(sender: &str) -> CommandContext {
        CommandContext {
            sender: sender.to_string(),
            room_id: "!room:textrp.io".to_string(),
        }
    }

    fn user(wallet: &str) -> CommandContext {
        from(&format!("@{wallet}:matrix.textrp.io"))
    }

    #[tokio::test]
    async fn plain_messages_get_no_reply() {
        let bot = bot().await;
        assert_eq!(bot.dispatcher.handle_at(&user(ALICE), "gm", t0()).await, None);
    }

    #[tokio::test]
    async fn faucet_then_cooldown_reply() {
        let bot = bot().await;
        let reply = bot
            .dispatcher
            .handle_at(&user(ALICE), "!faucet", t0())
            .await
            .unwrap();
        assert!(reply.contains("You received **100 TXT**"), "{reply}");
        assert!(reply.contains("24h 0m"), "{reply}");

        let later = t0() + chrono::Duration::hours(23) + chrono::Duration::minutes(59);
        let reply = bot
            .dispatcher
            .handle_at(&user(ALICE), "!faucet", later)
            .await
            .unwrap();
        assert!(reply.contains("Please wait 1m"), "{reply}");
    }

    #[tokio::test]
    async fn faucet_without_wallet_in_user_id() {
        let bot = bot().await;
        let reply = bot
            .dispatcher
            .handle_at(&from("@alice:textrp.io"), "!faucet", t0())
            .await
            .unwrap();
        assert!(reply.starts_with("❌ Invalid request"), "{reply}");
    }

    #[tokio::test]
    async fn infrastructure_failures_stay_generic() {
        let bot = bot().await;
        bot.facts.fail_next_lookup();
        let reply = bot
            .dispatcher
            .handle_at(&user(ALICE), "!faucet", t0())
            .await
            .unwrap();
        assert!(reply.contains("try again later"), "{reply}");
        assert!(!reply.contains("rippled"), "{reply}");
    }

    #[tokio::test]
    async fn admin_commands_are_gated() {
        let bot = bot().await;
        let reply = bot
            .dispatcher
            .handle_at(&user(ALICE), &format!("!blacklist {BOB} spam"), t0())
            .await
            .unwrap();
        assert!(reply.contains("restricted to faucet admins"), "{reply}");

        let reply = bot
            .dispatcher
            .handle_at(&from(ADMIN), &format!("!blacklist {BOB} spam bot"), t0())
            .await
            .unwrap();
        assert!(reply.contains("has been blacklisted"), "{reply}");

        let reply = bot
            .dispatcher
            .handle_at(&from(ADMIN), "!blacklisted", t0())
            .await
            .unwrap();
        assert!(reply.contains(BOB) && reply.contains("spam bot"), "{reply}");

        let reply = bot
            .dispatcher
            .handle_at(&from(ADMIN), &format!("!whitelist {BOB}"), t0())
            .await
            .unwrap();
        assert!(reply.contains("removed from the blacklist"), "{reply}");
    }

    #[tokio::test]
    async fn help_hides_admin_commands_from_users() {
        let bot = bot().await;
        let user_help = bot.dispatcher.handle_at(&user(ALICE), "!help", t0()).await.unwrap();
        assert!(user_help.contains("!faucet"));
        assert!(!user_help.contains("!blacklist"));

        let admin_help = bot.dispatcher.handle_at(&from(ADMIN), "!help", t0()).await.unwrap();
        assert!(admin_help.contains("!resolve"));
    }

    #[tokio::test]
    async fn resolve_settles_pending_payout() {
        let bot = bot().await;
        bot.submitter
            .push_outcome(PayoutOutcome::Ambiguous(PayoutTicket::default()));
        let reply = bot
            .dispatcher
            .handle_at(&user(ALICE), "!faucet", t0())
            .await
            .unwrap();
        assert!(reply.contains("not confirmed yet"), "{reply}");

        let key = crate::faucet::idempotency::idempotency_key(ALICE, None, DAY);
        let reply = bot
            .dispatcher
            .handle_at(&from(ADMIN), &format!("!resolve {key} failed"), t0())
            .await
            .unwrap();
        assert!(reply.contains("marked failed"), "{reply}");

        let reply = bot
            .dispatcher
            .handle_at(&from(ADMIN), "!resolve onlykey", t0())
            .await
            .unwrap();
        assert!(reply.contains("usage: !resolve"), "{reply}");
    }

    #[tokio::test]
    async fn balance_defaults_to_sender_wallet() {
        let bot = bot().await;
        bot.facts.set_tokens(ALICE, TokenAmount::from_whole(300));
        let reply = bot.dispatcher.handle_at(&user(ALICE), "!balance", t0()).await.unwrap();
        assert!(reply.contains("20 XRP"), "{reply}");
        assert!(reply.contains("TXT: 300"), "{reply}");
        assert!(reply.contains(ALICE), "{reply}");

        // any address can be looked up, by anyone
        bot.facts.fund(BOB, Drops::new(1_500_000), false);
        let reply = bot
            .dispatcher
            .handle_at(&from("@someone:textrp.io"), &format!("!balance {BOB}"), t0())
            .await
            .unwrap();
        assert!(reply.contains("1.5 XRP") && reply.contains(BOB), "{reply}");
    }

    #[tokio::test]
    async fn balance_rejects_bad_or_missing_address() {
        let bot = bot().await;
        let reply = bot
            .dispatcher
            .handle_at(&user(ALICE), "!balance not-an-address", t0())
            .await
            .unwrap();
        assert!(reply.starts_with("❌ Invalid request"), "{reply}");

        let reply = bot
            .dispatcher
            .handle_at(&from("@alice:textrp.io"), "!balance", t0())
            .await
            .unwrap();
        assert!(reply.contains("usage: !balance [address]"), "{reply}");

        let reply = bot
            .dispatcher
            .handle_at(&user(ALICE), &format!("!balance {BOB}"), t0())
            .await
            .unwrap();
        assert!(reply.contains("not activated"), "{reply}");
    }

    #[tokio::test]
    async fn tokens_lists_positive_holdings() {
        let bot = bot().await;
        let reply = bot.dispatcher.handle_at(&user(ALICE), "!tokens", t0()).await.unwrap();
        assert!(reply.contains("No other tokens held"), "{reply}");

        bot.facts.set_holdings(
            ALICE,
            vec![TokenHolding {
                currency: "TXT".to_string(),
                issuer: "rf1BiGeXwwQoi8Z2ueFYTEXSwuJYfV2Jpn".to_string(),
                balance: "42.5".parse().unwrap(),
            }],
        );
        let reply = bot
            .dispatcher
            .handle_at(&from("@someone:textrp.io"), &format!("!tokens {ALICE}"), t0())
            .await
            .unwrap();
        assert!(reply.contains("**TXT:** 42.5"), "{reply}");
        assert!(reply.contains("**XRP:** 20 XRP"), "{reply}");
    }

    #[tokio::test]
    async fn xrplstatus_reports_node() {
        let bot = bot().await;
        let reply = bot.dispatcher.handle_at(&user(ALICE), "!xrplstatus", t0()).await.unwrap();
        assert!(reply.contains("**State:** full"), "{reply}");
        assert!(reply.contains("91000000"), "{reply}");

        bot.facts.fail_next_lookup();
        let reply = bot.dispatcher.handle_at(&user(ALICE), "!xrplstatus", t0()).await.unwrap();
        assert!(reply.contains("try again later"), "{reply}");
    }

    #[tokio::test]
    async fn hot_wallet_balance_is_admin_only() {
        let bot = bot().await;
        let reply = bot.dispatcher.handle_at(&user(ALICE), "!hotwallet", t0()).await.unwrap();
        assert!(reply.contains("restricted to faucet admins"), "{reply}");

        bot.facts
            .fund("rPT1Sjq2YGrBMTttX4GZHjKu9dyfzbpAYe", Drops::new(50_000_000), true);
        let reply = bot.dispatcher.handle_at(&from(ADMIN), "!hotwallet", t0()).await.unwrap();
        assert!(reply.contains("**Hot Wallet**"), "{reply}");
        assert!(reply.contains("50 XRP"), "{reply}");
    }

    #[tokio::test]
    async fn unknown_command_points_to_help() {
        let bot = bot().await;
        let reply = bot.dispatcher.handle_at(&user(ALICE), "!moon", t0()).await.unwrap();
        assert!(reply.contains("!help"));
    }
}
