//! Dealer profiles
//!
//! Read-only access to the dealer characters shown in the lobby and chat:
//! display name, portrait images and the outfit stages that drive the chat
//! personality. Profiles are maintained outside this service.

mod postgres;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ApiResult;

pub use postgres::PgDealerStore;

/// One outfit stage of a dealer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutfitStage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// A dealer profile as served to the front end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dealer {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub professional_image_url: Option<String>,
    #[serde(default)]
    pub outfit_stages: Vec<OutfitStage>,
    /// Remaining profile fields, passed through as stored
    #[serde(flatten)]
    pub profile: Map<String, Value>,
}

impl Dealer {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            avatar_url: None,
            professional_image_url: None,
            outfit_stages: Vec::new(),
            profile: Map::new(),
        }
    }
}

/// Read access to dealer profiles
#[async_trait]
pub trait DealerStore: Send + Sync {
    /// All dealers, ordered by id
    async fn list_dealers(&self) -> ApiResult<Vec<Dealer>>;

    async fn get_dealer(&self, id: &str) -> ApiResult<Option<Dealer>>;

    /// Cheap reachability check for health reporting
    async fn ping(&self) -> ApiResult<()>;

    fn backend_name(&self) -> &'static str;
}

/// Fixed dealer set held in memory, for development and tests
#[derive(Default)]
pub struct InMemoryDealerStore {
    dealers: BTreeMap<String, Dealer>,
}

impl InMemoryDealerStore {
    pub fn new(dealers: impl IntoIterator<Item = Dealer>) -> Self {
        Self {
            dealers: dealers.into_iter().map(|d| (d.id.clone(), d)).collect(),
        }
    }
}

#[async_trait]
impl DealerStore for InMemoryDealerStore {
    async fn list_dealers(&self) -> ApiResult<Vec<Dealer>> {
        Ok(self.dealers.values().cloned().collect())
    }

    async fn get_dealer(&self, id: &str) -> ApiResult<Option<Dealer>> {
        Ok(self.dealers.get(id).cloned())
    }

    async fn ping(&self) -> ApiResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dealer_wire_shape() {
        let mut dealer = Dealer::new("emma", "Emma");
        dealer.avatar_url = Some("https://cdn.example.com/emma.webp".to_string());
        dealer.outfit_stages.push(OutfitStage {
            stage_name: Some("Elegant".to_string()),
            image_url: None,
        });
        dealer.profile.insert("bio".to_string(), json!("Croupier in Monaco"));

        let value = serde_json::to_value(&dealer).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "emma",
                "name": "Emma",
                "avatarUrl": "https://cdn.example.com/emma.webp",
                "outfitStages": [{"stageName": "Elegant"}],
                "bio": "Croupier in Monaco"
            })
        );
    }

    #[tokio::test]
    async fn test_in_memory_store_orders_by_id() {
        let store = InMemoryDealerStore::new([Dealer::new("sofia", "Sofia"), Dealer::new("emma", "Emma")]);

        let ids: Vec<String> = store
            .list_dealers()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, ["emma", "sofia"]);
        assert!(store.get_dealer("lisa").await.unwrap().is_none());
    }
}
