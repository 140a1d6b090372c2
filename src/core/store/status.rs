use super::{Store, keys};
use crate::core::error::WatchResult;
use crate::core::finesse::AgentStatus;

impl Store {
    pub async fn save_agent_status(&self, status: &AgentStatus) -> WatchResult<()> {
        self.set_json(keys::AGENT_STATUS, status).await
    }

    pub async fn load_agent_status(&self) -> WatchResult<Option<AgentStatus>> {
        self.get_json(keys::AGENT_STATUS).await
    }

    pub async fn clear_agent_status(&self) -> WatchResult<()> {
        self.remove(keys::AGENT_STATUS).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::finesse::AgentState;
    use crate::core::store::memory_store;

    #[tokio::test]
    async fn status_snapshot_is_replaced_wholesale() {
        let store = memory_store().await;
        assert!(store.load_agent_status().await.unwrap().is_none());

        let mut first = AgentStatus::new(AgentState::NotReady);
        first.reason_code_id = Some(2);
        first.first_name = Some("Jane".into());
        store.save_agent_status(&first).await.unwrap();

        let second = AgentStatus::new(AgentState::Ready);
        store.save_agent_status(&second).await.unwrap();
        let loaded = store.load_agent_status().await.unwrap().unwrap();
        assert_eq!(loaded, second);
        assert_eq!(loaded.first_name, None);

        store.clear_agent_status().await.unwrap();
        assert!(store.load_agent_status().await.unwrap().is_none());
    }
}
