//! Client-side adapters that talk to a remote parkr server over HTTP.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use parkr_core::{
    Booking, BookingRequest, BookingService, BookingStatus, Lot, LotDirectory, Notifier, NotifyError, Slot, SlotStore,
    StoreError,
};
use parkr_shared::SlotNotification;

use crate::app_config::BusinessRules;

/// One client for every remote collaborator, authenticated with a bearer token.
#[derive(Clone)]
pub struct HttpParkingClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SlotCommand<'a> {
    slot_id: &'a str,
    lot_id: &'a str,
    rfid: &'a str,
}

#[derive(Deserialize)]
struct ConflictBody {
    current: Option<Slot>,
}

#[derive(Deserialize)]
struct LotsBody {
    data: Vec<Lot>,
}

#[derive(Deserialize)]
struct BookingsBody {
    bookings: Vec<Booking>,
}

#[derive(Serialize)]
struct StatusUpdate {
    status: BookingStatus,
}

impl HttpParkingClient {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        self.authorized(request)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, StoreError> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::NotFound(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Unavailable(format!("{}: {}", status, body)));
        }
        response
            .json()
            .await
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    async fn slot_command(&self, path: &str, lot_id: &str, slot_id: &str, rfid: &str) -> Result<Slot, StoreError> {
        let command = SlotCommand { slot_id, lot_id, rfid };
        let response = self.execute(self.client.post(self.url(path)).json(&command)).await?;

        if response.status() == StatusCode::CONFLICT {
            let body: ConflictBody = response
                .json()
                .await
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            let current = match body.current {
                Some(slot) => slot,
                None => self.current(lot_id, slot_id).await?,
            };
            return Err(StoreError::Conflict {
                current: Box::new(current),
            });
        }

        Self::decode(response).await
    }

    /// The server's business rules, so clients poll and validate the way it is configured.
    pub async fn business_rules(&self) -> Result<BusinessRules, StoreError> {
        Self::decode(self.execute(self.client.get(self.url("/settings"))).await?).await
    }

    async fn current(&self, lot_id: &str, slot_id: &str) -> Result<Slot, StoreError> {
        self.list_slots(Some(lot_id))
            .await?
            .into_iter()
            .find(|s| s.matches(lot_id, slot_id))
            .ok_or_else(|| StoreError::NotFound(format!("slot {}/{}", lot_id, slot_id)))
    }
}

#[async_trait]
impl SlotStore for HttpParkingClient {
    async fn list_slots(&self, lot_id: Option<&str>) -> Result<Vec<Slot>, StoreError> {
        let mut request = self.client.get(self.url("/slots"));
        if let Some(lot) = lot_id {
            request = request.query(&[("lotId", lot)]);
        }
        Self::decode(self.execute(request).await?).await
    }

    async fn reserve(&self, lot_id: &str, slot_id: &str, rfid: &str) -> Result<Slot, StoreError> {
        self.slot_command("/reserve", lot_id, slot_id, rfid).await
    }

    async fn free(&self, lot_id: &str, slot_id: &str, rfid: &str) -> Result<Slot, StoreError> {
        self.slot_command("/free", lot_id, slot_id, rfid).await
    }
}

#[async_trait]
impl LotDirectory for HttpParkingClient {
    async fn list_lots(&self) -> Result<Vec<Lot>, StoreError> {
        let body: LotsBody = Self::decode(self.execute(self.client.get(self.url("/parking-lots"))).await?).await?;
        Ok(body.data)
    }
}

#[async_trait]
impl BookingService for HttpParkingClient {
    async fn schedule(&self, request: &BookingRequest) -> Result<Booking, StoreError> {
        let response = self
            .execute(self.client.post(self.url("/bookings/schedule")).json(request))
            .await?;
        Self::decode(response).await
    }

    async fn list_for_user(&self, user_email: &str) -> Result<Vec<Booking>, StoreError> {
        let path = format!("/bookings/user/{}", user_email);
        let body: BookingsBody = Self::decode(self.execute(self.client.get(self.url(&path))).await?).await?;
        Ok(body.bookings)
    }

    async fn list_by_status(&self, status: BookingStatus) -> Result<Vec<Booking>, StoreError> {
        let request = self
            .client
            .get(self.url("/admin/bookings"))
            .query(&[("status", status.as_str())]);
        let body: BookingsBody = Self::decode(self.execute(request).await?).await?;
        Ok(body.bookings)
    }

    async fn update_status(&self, booking_id: Uuid, status: BookingStatus) -> Result<Booking, StoreError> {
        let path = format!("/admin/bookings/{}/status", booking_id);
        let response = self
            .execute(self.client.put(self.url(&path)).json(&StatusUpdate { status }))
            .await?;
        Self::decode(response).await
    }
}

#[async_trait]
impl Notifier for HttpParkingClient {
    async fn send(&self, notification: &SlotNotification) -> Result<(), NotifyError> {
        let response = self
            .authorized(
                self.client
                    .post(self.url("/notifications/send-email"))
                    .json(notification),
            )
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        if !response.status().is_success() {
            warn!("Notification service answered {}", response.status());
            return Err(NotifyError::Delivery(format!("status {}", response.status())));
        }
        Ok(())
    }
}
