use std::sync::Arc;

use crate::storage::RankingStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RankingStore>,
}

impl AppState {
    pub fn new(store: Arc<RankingStore>) -> Self {
        Self { store }
    }
}
