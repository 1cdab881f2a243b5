//! Request builders for controller tests.

use nimbus_control::DeploymentRequest;
use serde_json::{json, Value};

/// Builder for inbound deployment messages.
pub struct RequestBuilder {
    body: Value,
}

impl RequestBuilder {
    /// Minimal valid request for `group`.
    pub fn new(group: &str) -> Self {
        Self {
            body: json!({
                "resourceGroupName": "rg",
                "group": group,
                "image": "repo/app:latest",
                "transactionId": "t1",
            }),
        }
    }

    pub fn with_transaction_id(mut self, id: &str) -> Self {
        self.body["transactionId"] = json!(id);
        self
    }

    pub fn with_image(mut self, image: &str) -> Self {
        self.body["image"] = json!(image);
        self
    }

    pub fn with_client_id(mut self, client_id: &str) -> Self {
        self.body["clientId"] = json!(client_id);
        self
    }

    pub fn build(self) -> DeploymentRequest {
        let payload = serde_json::to_vec(&self.body).unwrap();
        DeploymentRequest::from_message(&payload).unwrap()
    }
}
