//! # elspeth-landscape
//!
//! The append-only audit recorder (SQLite-backed, spec §4.2-4.3) and the
//! filesystem-backed content-addressed payload store. This is the only
//! crate that writes the identity & lineage model defined in
//! `elspeth-core` to durable storage.

pub mod error;
pub mod payload_store;
pub mod recorder;

pub use error::Error;
pub use payload_store::FilesystemPayloadStore;
pub use recorder::Landscape;

use async_trait::async_trait;
use elspeth_core::ids::{NodeId, RunId, StateId, TokenId};
use elspeth_core::model::{CallStatus, CallType, SecretResolution};
use elspeth_core::plugin::LandscapeHandle;
use elspeth_core::results::TokenOutcome;
use serde_json::Value;

fn bridge_err(e: Error) -> elspeth_core::Error {
    elspeth_core::Error::Other(e.to_string())
}

#[async_trait]
impl LandscapeHandle for Landscape {
    async fn record_call(
        &self,
        state_id: &StateId,
        call_type: CallType,
        status: CallStatus,
        request_data: &Value,
        response_data: Option<&Value>,
        error: Option<&Value>,
        latency_ms: Option<u64>,
    ) -> elspeth_core::Result<()> {
        let run_id = self.run_id_for_state(state_id).await.map_err(bridge_err)?;
        let call_index = self.allocate_call_index(state_id).await.map_err(bridge_err)?;
        Landscape::record_call(
            self,
            state_id,
            call_index,
            call_type,
            status,
            request_data,
            response_data,
            error,
            latency_ms,
            None,
            None,
            &run_id,
        )
        .await
        .map_err(bridge_err)?;
        Ok(())
    }

    async fn record_validation_error(
        &self,
        run_id: &RunId,
        node_id: &NodeId,
        row_data: &Value,
        error: &str,
        schema_mode: &str,
        destination: &str,
    ) -> elspeth_core::Result<()> {
        Landscape::record_validation_error(
            self,
            run_id,
            node_id,
            row_data,
            error.to_string(),
            schema_mode,
            destination.to_string(),
            None,
        )
        .await
        .map_err(bridge_err)?;
        Ok(())
    }

    async fn record_transform_error(
        &self,
        run_id: &RunId,
        token_id: &TokenId,
        transform_id: &NodeId,
        row_data: &Value,
        error_details: &Value,
        destination: &str,
    ) -> elspeth_core::Result<()> {
        Landscape::record_transform_error(
            self,
            run_id,
            token_id,
            transform_id,
            row_data,
            error_details.clone(),
            destination.to_string(),
        )
        .await
        .map_err(bridge_err)?;
        Ok(())
    }

    async fn record_token_outcome(
        &self,
        run_id: &RunId,
        token_id: &TokenId,
        outcome: TokenOutcome,
    ) -> elspeth_core::Result<()> {
        Landscape::record_token_outcome(self, run_id, token_id, &outcome)
            .await
            .map_err(bridge_err)?;
        Ok(())
    }

    async fn get_checkpoint(&self, node_id: &NodeId) -> elspeth_core::Result<Option<Value>> {
        Landscape::get_checkpoint(self, node_id).await.map_err(bridge_err)
    }

    async fn update_checkpoint(&self, node_id: &NodeId, merge: Value) -> elspeth_core::Result<()> {
        Landscape::update_checkpoint(self, node_id, merge).await.map_err(bridge_err)
    }

    async fn clear_checkpoint(&self, node_id: &NodeId) -> elspeth_core::Result<()> {
        Landscape::clear_checkpoint(self, node_id).await.map_err(bridge_err)
    }

    async fn record_secret_resolution(&self, resolution: &SecretResolution) -> elspeth_core::Result<()> {
        Landscape::record_secret_resolution(self, resolution).await.map_err(bridge_err)
    }
}
