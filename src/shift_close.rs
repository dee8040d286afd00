//! Daily shift close: settle cash, record income, report sales.

use chrono::{Local, NaiveDate, NaiveTime, Timelike};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

use crate::checkbox::models::ShiftBalance;
use crate::checkbox::{CloseOutcome, ShiftController};
use crate::core::money::format_price;
use crate::core::Role;
use crate::reconcile::traits::Ledger;
use crate::telegram::notifications::Broadcaster;

/// Sales block of one payment kind, `None` when nothing was sold.
pub fn prepare_report(sales: i64, returns: i64, header: &str, header_no_returns: &str) -> Option<String> {
    if sales == 0 {
        return None;
    }
    let proceeds = sales - returns;

    if returns != 0 {
        Some(format!(
            "{}:\n<pre>Одержано: {:>10} грн\nПовернуто:{:>10} грн\nВиручка:  {:>10} грн</pre>",
            header,
            format_price(sales),
            format_price(returns),
            format_price(proceeds)
        ))
    } else {
        Some(format!("{}: {} грн", header_no_returns, format_price(proceeds)))
    }
}

/// Report messages for a closed shift, in sending order.
pub fn report_messages(balance: &ShiftBalance) -> Vec<String> {
    let cash = prepare_report(balance.cash_sales, balance.cash_returns, "Готівка", "Готівкова виручка");
    let card = prepare_report(balance.card_sales, balance.card_returns, "Картка", "Карткова виручка");

    let total = match (&cash, &card) {
        (Some(_), Some(_)) => {
            let total = balance.cash_sales - balance.cash_returns + balance.card_sales - balance.card_returns;
            Some(format!("Всього: {} грн", format_price(total)))
        }
        _ => None,
    };

    [cash, card, total].into_iter().flatten().collect()
}

pub struct ShiftCloser {
    shifts: ShiftController,
    broadcaster: Broadcaster,
    ledger: Arc<dyn Ledger>,
    worksheet: Option<String>,
}

impl ShiftCloser {
    pub fn new(
        shifts: ShiftController,
        broadcaster: Broadcaster,
        ledger: Arc<dyn Ledger>,
        worksheet: Option<String>,
    ) -> Self {
        Self {
            shifts,
            broadcaster,
            ledger,
            worksheet: worksheet.filter(|w| !w.is_empty()),
        }
    }

    /// Closes the shift and reports it. Returns the cash income, or `None`
    /// when the shift was already closed.
    ///
    /// `origin` is the chat that asked for the close: it is left out of the
    /// broadcasts and a close failure is returned to it instead of being
    /// broadcast to admins.
    pub async fn close_and_report(&self, origin: Option<i64>) -> anyhow::Result<Option<i64>> {
        let (income, balance) = match self.shifts.close().await {
            Ok(CloseOutcome::AlreadyClosed) => return Ok(None),
            Ok(CloseOutcome::Closed { income, balance, .. }) => (income, balance),
            Err(e) => {
                log::error!("shift close failed: {}", e);
                if origin.is_none() {
                    self.broadcaster.broadcast_error(&e.to_string(), None).await;
                }
                return Err(e.into());
            }
        };

        let today = Local::now().date_naive();
        log::info!("{}: shift closed: cash profit {}", today, format_price(income));

        if income > 0 {
            self.record_income(today, income, origin).await;
        }

        for message in report_messages(&balance) {
            self.broadcaster.broadcast(Role::Supervisor, &message, origin).await;
        }

        Ok(Some(income))
    }

    async fn record_income(&self, today: NaiveDate, income: i64, origin: Option<i64>) {
        let Some(worksheet) = self.worksheet.as_deref().filter(|_| self.ledger.is_enabled()) else {
            log::debug!("cash ledger disabled, income not recorded");
            return;
        };

        let row = vec![json!(today.to_string()), json!(format_price(income))];
        if let Err(e) = self.ledger.append_row(worksheet, row).await {
            log::error!("shift reporting failed: {:#}", e);
            self.broadcaster.broadcast_error(&e.to_string(), origin).await;
        }
    }

    /// Runs the close once a day at `at`, checking every second.
    pub async fn run_daily(self: Arc<Self>, at: NaiveTime) {
        log::info!("shift close scheduled at {}", at.format("%H:%M"));

        let mut ticker = interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_run: Option<NaiveDate> = None;

        loop {
            ticker.tick().await;

            let now = Local::now().naive_local();
            if !is_due(now.time(), at) || last_run == Some(now.date()) {
                continue;
            }
            last_run = Some(now.date());

            let closer = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = closer.close_and_report(None).await {
                    log::error!("scheduled shift close failed: {:#}", e);
                }
            });
        }
    }
}

/// True during the minute named by `at`.
fn is_due(now: NaiveTime, at: NaiveTime) -> bool {
    now.hour() == at.hour() && now.minute() == at.minute()
}
