//! Shift lifecycle: open before the first sale, settle cash and close.

use crate::checkbox::client::CheckboxClient;
use crate::checkbox::error::{CheckboxError, CheckboxResult, ErrorKind};
use crate::checkbox::models::{Payment, PaymentType, Receipt, ServiceRequest, Shift, ShiftBalance};
use crate::core::retry::{poll_until, PollConfig, PollOutcome, Probe};

/// Result of a close request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    /// No shift was open; the cashier session was dropped anyway
    AlreadyClosed,
    Closed {
        shift_id: String,
        /// Cash taken out of the drawer at close, kopecks
        income: i64,
        /// Balance reported by the close request
        balance: ShiftBalance,
    },
}

/// Stateless shift orchestration over a `CheckboxClient`.
#[derive(Clone)]
pub struct ShiftController {
    client: CheckboxClient,
    open_poll: PollConfig,
    close_poll: PollConfig,
    service_poll: PollConfig,
}

impl ShiftController {
    pub fn new(client: CheckboxClient) -> Self {
        Self {
            client,
            open_poll: PollConfig::shift(),
            close_poll: PollConfig::shift(),
            service_poll: PollConfig::receipt(),
        }
    }

    /// Overrides every polling schedule.
    #[must_use]
    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.open_poll = poll;
        self.close_poll = poll;
        self.service_poll = poll;
        self
    }

    pub fn client(&self) -> &CheckboxClient {
        &self.client
    }

    /// Current shift, or `None` when closed.
    pub async fn current(&self) -> CheckboxResult<Option<Shift>> {
        self.client
            .get_json::<Option<Shift>>("/cashier/shift", &[], ErrorKind::Shift)
            .await
    }

    /// Cash in the drawer in kopecks, `None` when closed.
    pub async fn balance(&self) -> CheckboxResult<Option<i64>> {
        Ok(self.current().await?.map(|shift| shift.balance.balance))
    }

    /// Opens a shift unless one is already open. Returns the shift ID.
    pub async fn ensure_open(&self) -> CheckboxResult<String> {
        if let Some(shift) = self.current().await? {
            return Ok(shift.id);
        }

        let shift: Shift = self
            .client
            .post_json("/shifts", &serde_json::json!({}), true, ErrorKind::Shift)
            .await
            .map_err(|e| {
                log::error!("shift open failed: {}", e);
                CheckboxError::Shift("Не вдалось відкрити зміну".to_string())
            })?;

        let outcome = poll_until(self.open_poll, || async move {
            match self.current().await {
                Ok(Some(current)) if current.is_opened() => Probe::Done(current.id),
                Ok(Some(current)) => Probe::Pending(current.status),
                Ok(None) => Probe::Pending("CLOSED".to_string()),
                Err(e) => {
                    log::warn!("shift status check failed: {}", e);
                    Probe::Unknown
                }
            }
        })
        .await;

        match outcome {
            PollOutcome::Ready(id) => {
                log::info!("shift: {}", id);
                Ok(id)
            }
            PollOutcome::TimedOut { attempts, last } => {
                log::error!("shift {} not opened after {} checks, last status {:?}", shift.id, attempts, last);
                Err(CheckboxError::Shift("Не вдалось підписати зміну".to_string()))
            }
        }
    }

    /// Issues a service-out receipt for the whole cash balance and waits for it.
    ///
    /// Returns `None` when there is nothing to take out.
    pub async fn service_out(&self) -> CheckboxResult<Option<String>> {
        let shift = self
            .current()
            .await?
            .ok_or_else(|| CheckboxError::Shift("Зміна закрита".to_string()))?;

        let balance = shift.balance.balance;
        if balance <= 0 {
            return Ok(None);
        }

        let request = ServiceRequest {
            payment: Payment {
                kind: PaymentType::Cash,
                value: -balance,
                label: Some("Готівка".to_string()),
            },
        };
        let receipt: Receipt = self
            .client
            .post_json("/receipts/service", &request, false, ErrorKind::Receipt)
            .await
            .map_err(|e| {
                log::error!("service out failed: {}", e);
                CheckboxError::Receipt("Не вдалось здійснити службову видачу".to_string())
            })?;
        log::info!("service out: {}", receipt.id);

        let path = format!("/receipts/{}", receipt.id);
        let path = path.as_str();
        let outcome = poll_until(self.service_poll, || async move {
            match self.client.get_json::<Receipt>(path, &[], ErrorKind::Receipt).await {
                Ok(current) if current.status == "DONE" => Probe::Done(current.id),
                Ok(current) => Probe::Pending(current.status),
                Err(e) => {
                    log::warn!("service out status check failed: {}", e);
                    Probe::Unknown
                }
            }
        })
        .await;

        match outcome {
            PollOutcome::Ready(id) => Ok(Some(id)),
            PollOutcome::TimedOut { last, .. } => {
                log::error!("service out signing error: {} ({:?})", receipt.id, last);
                Err(CheckboxError::Receipt("Не вдалось підписати службову видачу".to_string()))
            }
        }
    }

    /// Settles cash, closes the shift and waits until the backend reports no shift.
    ///
    /// The signature check runs first; nothing is sent if it fails. A closed
    /// shift is reported as `AlreadyClosed`. The cashier session is dropped
    /// after a successful close.
    pub async fn close(&self) -> CheckboxResult<CloseOutcome> {
        if self.current().await?.is_none() {
            log::info!("shift is already closed");
            self.client.sign_out().await;
            return Ok(CloseOutcome::AlreadyClosed);
        }

        self.client.ensure_signature().await?;
        self.service_out().await?;

        let closed: Shift = self
            .client
            .post_json("/shifts/close", &serde_json::json!({}), false, ErrorKind::Shift)
            .await?;
        let income = closed.balance.service_out;

        let outcome = poll_until(self.close_poll, || async move {
            match self.current().await {
                Ok(None) => Probe::Done(()),
                Ok(Some(current)) => Probe::Pending(current.status),
                Err(e) => {
                    log::warn!("shift status check failed: {}", e);
                    Probe::Unknown
                }
            }
        })
        .await;

        if let PollOutcome::TimedOut { last, .. } = outcome {
            log::error!("shift close error: {} ({:?})", closed.id, last);
            return Err(CheckboxError::Shift("Не вдалось підписати закриття зміни".to_string()));
        }

        log::info!("shift closed: {}", closed.id);
        self.client.sign_out().await;

        Ok(CloseOutcome::Closed {
            shift_id: closed.id,
            income,
            balance: closed.balance,
        })
    }
}
