//! JSON-RPC client for a chain node.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{Result, StratumError};
use crate::rpc::types::{AuxBlock, BlockTemplate, CreateAuxBlockResult, GbtResult};
use crate::rpc::{ChainClient, SubmitOutcome};

/// HTTP JSON-RPC client against a node daemon.
pub struct NodeClient {
    name: String,
    url: String,
    user: String,
    pass: String,
    http: reqwest::Client,
}

impl NodeClient {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        user: impl Into<String>,
        pass: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StratumError::UpstreamUnavailable {
                chain: "init".into(),
                message: e.to_string(),
            })?;

        Ok(Self {
            name: name.into(),
            url: url.into(),
            user: user.into(),
            pass: pass.into(),
            http,
        })
    }

    fn unavailable(&self, message: impl Into<String>) -> StratumError {
        StratumError::UpstreamUnavailable {
            chain: self.name.clone(),
            message: message.into(),
        }
    }

    /// Issue one RPC call; returns (result, rpc-error) once the transport
    /// and JSON layers succeed.
    async fn call(&self, method: &str, params: Value) -> Result<(Value, Option<Value>)> {
        let body = json!({
            "jsonrpc": "1.0",
            "id": "rxd-stratum",
            "method": method,
            "params": params,
        });

        debug!("{} rpc {} -> {}", self.name, method, self.url);

        let response = self
            .http
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.pass))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.unavailable(format!("{method}: {e}")))?;

        let payload: Value = response
            .json()
            .await
            .map_err(|e| self.unavailable(format!("{method}: invalid response: {e}")))?;

        let error = match payload.get("error") {
            Some(Value::Null) | None => None,
            Some(err) => Some(err.clone()),
        };
        let result = payload.get("result").cloned().unwrap_or(Value::Null);
        Ok((result, error))
    }
}

#[async_trait]
impl ChainClient for NodeClient {
    fn chain_name(&self) -> &str {
        &self.name
    }

    async fn fetch_template(&self) -> Result<BlockTemplate> {
        let (result, error) = self.call("getblocktemplate", json!([{}])).await?;
        if let Some(err) = error {
            // Syncing / warming-up nodes land here; the caller retries.
            return Err(self.unavailable(format!("getblocktemplate: {err}")));
        }
        let gbt: GbtResult = serde_json::from_value(result)
            .map_err(|e| self.unavailable(format!("getblocktemplate: {e}")))?;
        BlockTemplate::from_gbt(&self.name, gbt)
    }

    async fn submit_block(&self, block_hex: &str) -> Result<SubmitOutcome> {
        let (result, error) = self.call("submitblock", json!([block_hex])).await?;
        if let Some(err) = error {
            return Ok(SubmitOutcome::Rejected(err.to_string()));
        }
        // submitblock returns null on success, a reason string otherwise.
        match result {
            Value::Null => Ok(SubmitOutcome::Accepted),
            Value::String(reason) if reason.is_empty() => Ok(SubmitOutcome::Accepted),
            Value::String(reason) => Ok(SubmitOutcome::Rejected(reason)),
            other => Ok(SubmitOutcome::Rejected(other.to_string())),
        }
    }

    async fn fetch_aux_block(&self, payout_address: &str) -> Result<AuxBlock> {
        let (result, error) = self.call("createauxblock", json!([payout_address])).await?;
        if let Some(err) = error {
            return Err(self.unavailable(format!("createauxblock: {err}")));
        }
        let raw: CreateAuxBlockResult = serde_json::from_value(result)
            .map_err(|e| self.unavailable(format!("createauxblock: {e}")))?;
        AuxBlock::from_rpc(&self.name, raw)
    }

    async fn submit_aux_block(
        &self,
        aux_hash_hex: &str,
        auxpow_hex: &str,
    ) -> Result<SubmitOutcome> {
        let (result, error) = self
            .call("submitauxblock", json!([aux_hash_hex, auxpow_hex]))
            .await?;
        if let Some(err) = error {
            return Ok(SubmitOutcome::Rejected(err.to_string()));
        }
        match result {
            Value::Bool(true) => Ok(SubmitOutcome::Accepted),
            Value::Null => Ok(SubmitOutcome::Accepted),
            other => Ok(SubmitOutcome::Rejected(other.to_string())),
        }
    }
}
