use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{ClaimOutcome, CompleteOutcome, DeliveryApi, VerifyOutcome};
use crate::error::DispatchError;
use crate::models::courier::{GeoPoint, LocationUpdate};
use crate::models::order::Order;

pub struct HttpDeliveryApi {
    client: Client,
    base_url: String,
}

impl HttpDeliveryApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: Client::new(),
            base_url,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<R, DispatchError> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(net)?
            .error_for_status()
            .map_err(net)?;
        response.json::<R>().await.map_err(net)
    }

    async fn post_json<B: Serialize + Sync, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, DispatchError> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(net)?
            .error_for_status()
            .map_err(net)?;
        response.json::<R>().await.map_err(net)
    }
}

fn net(err: reqwest::Error) -> DispatchError {
    DispatchError::Network(err.to_string())
}

#[derive(Deserialize)]
struct OrdersResponse {
    orders: Vec<Order>,
}

#[derive(Serialize)]
struct OrderAction {
    order_id: Uuid,
    courier_id: Uuid,
}

#[derive(Deserialize)]
struct ClaimResponse {
    outcome: ClaimOutcome,
}

#[derive(Serialize)]
struct ReceivedLine {
    line_id: Uuid,
    received: bool,
}

#[derive(Serialize)]
struct VerifyRequest {
    order_id: Uuid,
    pin: String,
    received_items: Vec<ReceivedLine>,
}

#[derive(Deserialize)]
struct VerifyResponse {
    outcome: VerifyOutcome,
}

#[derive(Serialize)]
struct CompleteRequest {
    order_id: Uuid,
    pin: String,
}

#[derive(Deserialize)]
struct CompleteResponse {
    outcome: CompleteOutcome,
}

#[derive(Serialize)]
struct CourierRef {
    courier_id: Uuid,
}

#[derive(Deserialize)]
struct ActiveOrderResponse {
    order: Option<Order>,
}

#[async_trait]
impl DeliveryApi for HttpDeliveryApi {
    async fn fetch_ready_orders(&self) -> Result<Vec<Order>, DispatchError> {
        let response: OrdersResponse = self.get_json("/driver/orders/ready/").await?;
        Ok(response.orders)
    }

    async fn push_location(
        &self,
        courier_id: Uuid,
        position: &GeoPoint,
    ) -> Result<(), DispatchError> {
        let body = LocationUpdate {
            courier_id,
            position: position.clone(),
        };
        let _: serde_json::Value = self.post_json("/driver/location/update/", &body).await?;
        Ok(())
    }

    async fn claim_order(
        &self,
        order_id: Uuid,
        courier_id: Uuid,
    ) -> Result<ClaimOutcome, DispatchError> {
        let body = OrderAction {
            order_id,
            courier_id,
        };
        let response: ClaimResponse = self.post_json("/driver/order/pick/", &body).await?;
        Ok(response.outcome)
    }

    async fn reject_order(&self, order_id: Uuid, courier_id: Uuid) -> Result<(), DispatchError> {
        let body = OrderAction {
            order_id,
            courier_id,
        };
        let _: serde_json::Value = self.post_json("/driver/reject-order/", &body).await?;
        Ok(())
    }

    async fn submit_verification(
        &self,
        order_id: Uuid,
        pin: &str,
        received_lines: &[(Uuid, bool)],
    ) -> Result<VerifyOutcome, DispatchError> {
        let body = VerifyRequest {
            order_id,
            pin: pin.to_string(),
            received_items: received_lines
                .iter()
                .map(|(line_id, received)| ReceivedLine {
                    line_id: *line_id,
                    received: *received,
                })
                .collect(),
        };
        let response: VerifyResponse = self.post_json("/driver/verify-order/", &body).await?;
        Ok(response.outcome)
    }

    async fn complete_delivery(
        &self,
        order_id: Uuid,
        pin: &str,
    ) -> Result<CompleteOutcome, DispatchError> {
        let body = CompleteRequest {
            order_id,
            pin: pin.to_string(),
        };
        let response: CompleteResponse = self.post_json("/driver/complete-order/", &body).await?;
        Ok(response.outcome)
    }

    async fn fetch_active_order(&self, courier_id: Uuid) -> Result<Option<Order>, DispatchError> {
        let body = CourierRef { courier_id };
        let response: ActiveOrderResponse = self.post_json("/driver/ongoing-order/", &body).await?;
        Ok(response.order)
    }
}
