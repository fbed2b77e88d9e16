use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::order::Order;
use crate::utils::error::ClientError;

/// Submits orders to an intake endpoint the way a storefront would.
#[derive(Debug, Clone)]
pub struct OrderClient {
    http: reqwest::Client,
    url: String,
}

impl OrderClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST one order. Any status other than `201`/`202` is an error.
    pub async fn submit(&self, order: &Order) -> Result<StatusCode, ClientError> {
        let response = self.http.post(&self.url).json(order).send().await?;
        let status = response.status();

        if status == StatusCode::CREATED || status == StatusCode::ACCEPTED {
            Ok(status)
        } else {
            Err(ClientError::Status(status.as_u16()))
        }
    }

    /// Submit random orders at `orders_per_hour` until `limit` orders went out
    /// or `shutdown` resolves. Returns the number of accepted orders.
    pub async fn run<F>(
        &self,
        orders_per_hour: u32,
        limit: Option<u64>,
        shutdown: F,
    ) -> Result<u64, ClientError>
    where
        F: Future<Output = ()>,
    {
        if orders_per_hour == 0 {
            return Err(ClientError::InvalidRate);
        }

        let period = Duration::from_secs_f64(3600.0 / f64::from(orders_per_hour));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let started = Instant::now();
        let mut attempted = 0u64;
        let mut accepted = 0u64;

        while limit.is_none_or(|limit| attempted < limit) {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }

            attempted += 1;
            let order = Order::random();
            match self.submit(&order).await {
                Ok(status) => {
                    accepted += 1;
                    info!(
                        n = attempted,
                        elapsed = ?started.elapsed(),
                        status = status.as_u16(),
                        customer = %order.customer_id,
                        items = order.items.len(),
                        total = order.total(),
                        "order sent"
                    );
                }
                Err(e) => warn!(n = attempted, error = %e, "order not accepted"),
            }
        }

        Ok(accepted)
    }
}
