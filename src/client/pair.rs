//! HyperMetro and remote replication pair facade

use crate::client::rest::{filter, RestClient};
use crate::domain::object::StorageObject;
use crate::domain::ports::PairApi;
use crate::error::Result;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::json;

/// `ASSOCIATEOBJTYPE` of a filesystem in pair queries
const FILESYSTEM_OBJECT_TYPE: i64 = 40;

#[async_trait]
impl PairApi for RestClient {
    async fn get_hypermetro_pairs_of(&self, local_object_id: &str) -> Result<Vec<StorageObject>> {
        self.get_batch_objs(
            &format!("Get hypermetro pairs of {}", local_object_id),
            &format!("/HyperMetroPair?{}", filter("LOCALOBJID", local_object_id)),
        )
        .await
    }

    async fn split_hypermetro_pair(&self, id: &str) -> Result<()> {
        self.update(
            &format!("Split hypermetro pair {}", id),
            Method::PUT,
            "/HyperMetroPair/disable_hcpair",
            json!({ "ID": id }),
        )
        .await
    }

    async fn delete_hypermetro_pair(&self, id: &str) -> Result<()> {
        self.delete(
            &format!("Delete hypermetro pair {}", id),
            &format!("/HyperMetroPair/{}", id),
            None,
        )
        .await
    }

    async fn get_replication_pairs_of(&self, local_object_id: &str) -> Result<Vec<StorageObject>> {
        self.get_list(
            &format!("Get replication pairs of {}", local_object_id),
            &format!(
                "/REPLICATIONPAIR/associate?ASSOCIATEOBJTYPE={}&ASSOCIATEOBJID={}",
                FILESYSTEM_OBJECT_TYPE, local_object_id
            ),
        )
        .await
    }

    async fn split_replication_pair(&self, id: &str) -> Result<()> {
        self.update(
            &format!("Split replication pair {}", id),
            Method::PUT,
            "/REPLICATIONPAIR/split",
            json!({ "ID": id }),
        )
        .await
    }

    async fn delete_replication_pair(&self, id: &str) -> Result<()> {
        self.delete(
            &format!("Delete replication pair {}", id),
            &format!("/REPLICATIONPAIR/{}", id),
            None,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::codes;
    use crate::testing::{envelope, rest_client, MockTransport};
    use serde_json::Value;

    #[tokio::test]
    async fn test_delete_missing_pair_succeeds() {
        let transport = MockTransport::scripted(|_| envelope(codes::PAIR_NOT_EXIST, Value::Null));
        let client = rest_client(transport);
        client.delete_hypermetro_pair("p1").await.unwrap();
        client.delete_replication_pair("r1").await.unwrap();
    }

    #[tokio::test]
    async fn test_pairs_of_filesystem() {
        let transport = MockTransport::scripted(|_| envelope(0, json!([{"ID": "p1", "LOCALOBJID": "12"}])));
        let client = rest_client(transport.clone());

        let pairs = client.get_hypermetro_pairs_of("12").await.unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(transport.count(|r| r.url.contains("LOCALOBJID::12&range=[0-100]")), 1);
    }
}
