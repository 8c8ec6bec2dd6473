//! Application state shared across handlers

use std::sync::Arc;

use axum::extract::FromRef;

use crate::auth::AuthConfig;
use crate::loan::LoanService;
use crate::services::ScoringService;
use crate::store::LedgerStore;
use crate::websocket::WsState;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub loan_service: Arc<LoanService>,
    pub scoring_service: Arc<ScoringService>,
    pub ws_state: WsState,
    pub auth: Arc<AuthConfig>,
}

impl AppState {
    /// Wire the services over one ledger store, publishing events to the WebSocket feed
    pub fn new(store: Arc<dyn LedgerStore>, auth: AuthConfig) -> Self {
        let ws_state = WsState::new();
        let scoring = ScoringService::new(store.clone());
        let loan_service = LoanService::new(store, scoring.clone(), Arc::new(ws_state.clone()));

        Self {
            loan_service: Arc::new(loan_service),
            scoring_service: Arc::new(scoring),
            ws_state,
            auth: Arc::new(auth),
        }
    }
}

impl FromRef<AppState> for WsState {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.ws_state.clone()
    }
}

impl FromRef<AppState> for Arc<LoanService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.loan_service.clone()
    }
}

impl FromRef<AppState> for Arc<ScoringService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.scoring_service.clone()
    }
}

impl FromRef<AppState> for Arc<AuthConfig> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.auth.clone()
    }
}
