// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use crate::{
    client::session::{
        process_service_result, process_unexpected_response, session_debug, session_error, Session,
    },
    core::supported_message::SupportedMessage,
    types::{DataValue, ReadRequest, ReadValueId, StatusCode, TimestampsToReturn},
};

impl Session {
    /// Read attributes of nodes by sending a [`ReadRequest`] to the server.
    ///
    /// See OPC UA Part 4 - Services 5.10.2 for complete description of the service and error responses.
    ///
    /// The request waits for the session to become active like any other. `max_age` is in
    /// milliseconds, 0 asks the server for a fresh value.
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<DataValue>)` - One [`DataValue`] for each node, in the order of `nodes_to_read`.
    /// * `Err(StatusCode)` - `BadNothingToDo` for an empty list, `BadUnknownResponse` if the
    ///   server returned a different number of values, or the status of the failed request.
    pub async fn read(
        &self,
        nodes_to_read: &[ReadValueId],
        timestamps_to_return: TimestampsToReturn,
        max_age: f64,
    ) -> Result<Vec<DataValue>, StatusCode> {
        if nodes_to_read.is_empty() {
            session_error!(self, "read, no nodes to read");
            return Err(StatusCode::BadNothingToDo);
        }
        session_debug!(self, "read, {} nodes", nodes_to_read.len());

        let request = ReadRequest {
            request_header: self.make_request_header(),
            max_age,
            timestamps_to_return,
            nodes_to_read: Some(nodes_to_read.to_vec()),
        };
        let response = match self.send(request).await? {
            SupportedMessage::ReadResponse(response) => response,
            response => return Err(process_unexpected_response(response)),
        };
        process_service_result(&response.response_header)?;

        let results = response.results.unwrap_or_default();
        if results.len() != nodes_to_read.len() {
            session_error!(
                self,
                "read, asked for {} values but received {}",
                nodes_to_read.len(),
                results.len()
            );
            return Err(StatusCode::BadUnknownResponse);
        }
        Ok(results)
    }
}
