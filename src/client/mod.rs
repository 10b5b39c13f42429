// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The OPC UA Client module contains the functionality necessary for a client to connect to an OPC UA server,
//! authenticate itself, send requests and receive the notifications of its subscriptions.
//!
//! A client has to specify the endpoint description it wishes to connect to, and other configurable
//! options such as timeouts and retry limits. All of this is encapsulated in a [`Client`] object.
//!
//! One of these may be made programatically using a [`ClientBuilder`] or from a preexisting [`ClientConfig`]
//! which can be loaded fully or partially from disk.
//!
//! Once the `Client` is created it can create a [`Session`]. Multiple sessions can be created from the
//! same client. The session does nothing until its [`SessionEventLoop`] is polled, which connects to the
//! server, creates and activates the session, keeps it alive and reconnects when the connection drops.
//! Functions on the [`Session`] correspond to OPC UA services:
//!
//! * Read values
//! * Create / modify / delete / transfer subscriptions
//! * Create / modify / delete monitored items, set their monitoring mode and triggering
//! * Republish lost notifications
//!
//! Data change and event notifications are delivered to callbacks, in the order the server sent them.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use opcua_client::client::{ClientBuilder, IdentityToken, Session, DataChangeCallback, MonitoredItem};
//! use opcua_client::types::{
//!     EndpointDescription, MessageSecurityMode, StatusCode, NodeId, TimestampsToReturn,
//!     MonitoredItemCreateRequest, DataValue,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = ClientBuilder::new()
//!         .application_name("My First Client")
//!         .application_uri("urn:MyFirstClient")
//!         .session_retry_limit(3)
//!         .client().unwrap();
//!
//!     let endpoint = EndpointDescription {
//!         endpoint_url: "opc.tcp://localhost:4855/".into(),
//!         security_mode: MessageSecurityMode::None,
//!         ..Default::default()
//!     };
//!
//!     // Create the session and event loop
//!     let (session, event_loop) = client
//!         .new_session_from_endpoint(endpoint, IdentityToken::Anonymous)
//!         .unwrap();
//!     let handle = event_loop.spawn();
//!
//!     session.wait_for_connection().await;
//!
//!     if subscribe_to_values(&session).await.is_ok() {
//!         handle.await.unwrap();
//!     } else {
//!         println!("Error creating subscription");
//!     }
//! }
//!
//! async fn subscribe_to_values(session: &Session) -> Result<(), StatusCode> {
//!     // Create a subscription polling every 2s with a callback
//!     let subscription_id = session.create_subscription(
//!         Duration::from_secs(2),
//!         10,
//!         30,
//!         0,
//!         0,
//!         true,
//!         DataChangeCallback::new(|value, monitored_item| print_value(value, monitored_item)),
//!     ).await?;
//!     let items_to_create: Vec<MonitoredItemCreateRequest> = ["v1", "v2", "v3", "v4"].iter()
//!         .map(|v| NodeId::new(2, *v).into()).collect();
//!     let _ = session.create_monitored_items(subscription_id, TimestampsToReturn::Both, items_to_create).await?;
//!     Ok(())
//! }
//!
//! fn print_value(data_value: DataValue, item: &MonitoredItem) {
//!    let node_id = &item.item_to_monitor().node_id;
//!    if let Some(ref value) = data_value.value {
//!        println!("Item \"{}\", Value = {:?}", node_id, value);
//!    } else {
//!        println!("Item \"{}\", Value not found, error: {:?}", node_id, data_value.status);
//!    }
//!}
//! ```

mod builder;
mod config;
mod retry;
mod session;
pub mod transport;

pub use builder::ClientBuilder;
pub use config::{
    ClientConfig, ClientEndpoint, ClientUserToken, DecodingOptions, Performance,
    ANONYMOUS_USER_TOKEN_ID,
};
pub use retry::SessionRetryPolicy;
pub use session::{
    Client, ConnectionInfo, DataChangeCallback, EventCallback, ListenerHandle, MonitoredItem,
    NamespaceTableInitializer, OnSubscriptionNotification, ServiceFaultListener, Session,
    SessionActivity, SessionActivityListener, SessionAttributes, SessionConnectMode,
    SessionEventLoop, SessionInfo, SessionInitializer, SessionPollResult, SessionState,
    Subscription, SubscriptionActivity, SubscriptionCallbacks,
};
pub use transport::AsyncSecureChannel;

/// The identity the client authenticates as when activating a session.
#[derive(Debug, Clone, PartialEq)]
pub enum IdentityToken {
    /// Anonymous identity token
    Anonymous,
    /// User name and a password
    UserName(String, String),
}

pub mod prelude {
    pub use super::{
        Client, ClientBuilder, ClientConfig, ClientEndpoint, ClientUserToken, DataChangeCallback,
        EventCallback, IdentityToken, MonitoredItem, OnSubscriptionNotification,
        ServiceFaultListener, Session, SessionActivityListener, SessionEventLoop,
        SessionPollResult, SessionState, Subscription, SubscriptionCallbacks,
        ANONYMOUS_USER_TOKEN_ID,
    };
}
