use std::sync::Arc;
use std::time::Instant;

use sea_orm::DatabaseConnection;
use secrecy::SecretString;

use crate::bot::CommandDispatcher;
use crate::faucet::orchestrator::ClaimOrchestrator;
use crate::faucet::reporter::AdminStatsReporter;

#[derive(Clone)]
pub struct AppState {
    pub database: DatabaseConnection,
    pub orchestrator: Arc<ClaimOrchestrator>,
    pub reporter: Arc<AdminStatsReporter>,
    pub dispatcher: Arc<CommandDispatcher>,
    /// `None` leaves `/bot/command` disabled.
    pub bridge_token: Option<Arc<SecretString>>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        database: DatabaseConnection,
        orchestrator: Arc<ClaimOrchestrator>,
        reporter: Arc<AdminStatsReporter>,
        dispatcher: Arc<CommandDispatcher>,
        bridge_token: Option<SecretString>,
    ) -> Self {
        Self {
            database,
            orchestrator,
            reporter,
            dispatcher,
            bridge_token: bridge_token.map(Arc::new),
            start_time: Instant::now(),
        }
    }
}
