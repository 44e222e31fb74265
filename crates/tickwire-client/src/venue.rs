//! Convenience calls for a Deriv-style trading venue.
//!
//! Thin wrappers that build the venue's request bodies and delegate to the
//! [`Supervisor`]. Every call goes through the same correlation path as
//! [`Supervisor::send`].

use serde::{Deserialize, Serialize};
use serde_json::json;
use tickwire_core::{CallError, CallOutcome, StreamRoute, Topic};

use crate::session::SubscribeOutcome;
use crate::supervisor::Supervisor;
use crate::table::Listener;

/// Parameters for a contract purchase.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContractParams {
    /// Contract kind, e.g. `CALL` or `PUT`.
    pub contract_type: String,
    /// Underlying symbol, e.g. `R_100`.
    pub symbol: String,
    /// Stake; also sent as the maximum purchase price.
    pub amount: f64,
    /// Contract length in `duration_unit`s.
    pub duration: u32,
    /// Duration unit (`t` ticks, `s`, `m`, `h`, `d`).
    pub duration_unit: String,
    /// Account currency.
    pub currency: String,
}

/// Venue calls on top of a supervisor.
#[derive(Debug)]
pub struct VenueClient {
    supervisor: Supervisor,
}

impl VenueClient {
    /// Wrap a supervisor.
    pub fn new(supervisor: Supervisor) -> Self {
        Self { supervisor }
    }

    /// The underlying supervisor.
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Authorize the connection with an API token.
    pub async fn authorize(&self, token: &str) -> CallOutcome {
        self.supervisor.send(authorize_body(token)).await
    }

    /// Fetch the account status of the authorized account.
    pub async fn account_status(&self) -> CallOutcome {
        self.supervisor.send(json!({ "get_account_status": 1 })).await
    }

    /// Subscribe to the tick stream of `symbol`.
    ///
    /// Ticks arrive on topic `tick_{symbol}`.
    pub async fn subscribe_ticks(
        &self,
        symbol: &str,
        listener: Listener,
    ) -> Result<SubscribeOutcome, CallError> {
        self.supervisor
            .send_subscribe(tick_topic(symbol), ticks_body(symbol), listener)
            .await
    }

    /// Buy a contract.
    pub async fn buy_contract(&self, params: &ContractParams) -> CallOutcome {
        self.supervisor.send(buy_body(params)).await
    }
}

/// Topic on which ticks for `symbol` are delivered.
pub fn tick_topic(symbol: &str) -> Topic {
    StreamRoute::new("tick", "symbol").topic_for(symbol)
}

fn authorize_body(token: &str) -> serde_json::Value {
    json!({ "authorize": token })
}

fn ticks_body(symbol: &str) -> serde_json::Value {
    json!({ "ticks": symbol, "subscribe": 1 })
}

fn buy_body(params: &ContractParams) -> serde_json::Value {
    json!({
        "buy": 1,
        "price": params.amount,
        "parameters": {
            "contract_type": params.contract_type,
            "symbol": params.symbol,
            "amount": params.amount,
            "duration": params.duration,
            "duration_unit": params.duration_unit,
            "currency": params.currency,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn params() -> ContractParams {
        ContractParams {
            contract_type: "CALL".into(),
            symbol: "R_100".into(),
            amount: 10.0,
            duration: 5,
            duration_unit: "t".into(),
            currency: "USD".into(),
        }
    }

    #[test]
    fn tick_topic_uses_symbol() {
        assert_eq!(tick_topic("R_100").as_str(), "tick_R_100");
        assert_eq!(tick_topic("frxEURUSD").as_str(), "tick_frxEURUSD");
    }

    #[test]
    fn buy_body_shape() {
        let body = buy_body(&params());
        assert_eq!(body["buy"], 1);
        assert_eq!(body["price"], 10.0);
        assert_eq!(body["parameters"]["contract_type"], "CALL");
        assert_eq!(body["parameters"]["duration"], 5);
        assert_eq!(body["parameters"]["duration_unit"], "t");
        assert_eq!(body["parameters"]["currency"], "USD");
    }

    #[test]
    fn authorize_and_ticks_bodies() {
        assert_eq!(authorize_body("tok"), json!({"authorize": "tok"}));
        assert_eq!(ticks_body("R_50"), json!({"ticks": "R_50", "subscribe": 1}));
    }

    #[test]
    fn contract_params_deserialize() {
        let parsed: ContractParams = serde_json::from_value(json!({
            "contract_type": "PUT",
            "symbol": "R_10",
            "amount": 2.5,
            "duration": 1,
            "duration_unit": "m",
            "currency": "EUR"
        }))
        .unwrap();
        assert_eq!(parsed.contract_type, "PUT");
        assert_eq!(parsed.duration_unit, "m");
    }

    #[tokio::test]
    async fn calls_fail_fast_when_disconnected() {
        let venue = VenueClient::new(Supervisor::new(ClientConfig::default()));
        assert_matches!(venue.authorize("tok").await, Err(CallError::NotConnected));
        assert_matches!(venue.account_status().await, Err(CallError::NotConnected));
        assert_matches!(venue.buy_contract(&params()).await, Err(CallError::NotConnected));

        let outcome = venue
            .subscribe_ticks("R_100", Arc::new(|_| {}))
            .await
            .unwrap();
        assert_eq!(outcome, SubscribeOutcome::Deferred);
        assert!(venue.supervisor().table().is_subscribed(&tick_topic("R_100")));
    }
}
