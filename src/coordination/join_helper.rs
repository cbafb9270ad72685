//! Join handshake
//!
//! A candidate sends `START_JOIN` to collect votes: the receiver casts a
//! [`Join`] through the `join_leader_in_term` callback and sends it back as
//! a `JOIN_REQ`. A node joining an already elected leader sends a
//! `JOIN_REQ` without a vote.

use crate::cluster::node::Node;
use crate::common::{retry_with_backoff, Result};
use crate::coordination::messages::{Empty, Join, JoinRequest, StartJoinRequest};
use crate::transport::{send_typed, Action, Transport};
use std::sync::Arc;
use std::time::Duration;

pub type JoinLeaderInTerm = Arc<dyn Fn(&StartJoinRequest) -> Result<Join> + Send + Sync>;

const CONNECT_ATTEMPTS: usize = 3;
const CONNECT_BACKOFF: Duration = Duration::from_millis(50);

pub struct JoinHelper {
    transport: Arc<dyn Transport>,
    timeout: Duration,
    join_leader_in_term: JoinLeaderInTerm,
}

impl JoinHelper {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration, join_leader_in_term: JoinLeaderInTerm) -> Self {
        Self {
            transport,
            timeout,
            join_leader_in_term,
        }
    }

    pub async fn send_start_join_request(&self, request: &StartJoinRequest, destination: &Node) -> Result<()> {
        let _: Empty = send_typed(
            self.transport.as_ref(),
            destination,
            Action::StartJoin,
            request,
            self.timeout,
        )
        .await?;
        Ok(())
    }

    /// Vote for the requester and send the vote back; the start-join itself
    /// is acknowledged without waiting for the join to be delivered.
    pub fn handle_start_join_request(self: &Arc<Self>, request: StartJoinRequest) -> Result<Empty> {
        let join = (self.join_leader_in_term)(&request)?;
        tracing::debug!("voting for {} in term {}", request.source_node, join.term);

        let helper = self.clone();
        tokio::spawn(async move {
            let destination = request.source_node;
            if let Err(e) = helper.send_join_request(&destination, join.term, Some(join)).await {
                tracing::warn!("failed to send join to {}: {}", destination, e);
            }
        });
        Ok(Empty)
    }

    /// Send a join, connecting to `destination` first when needed.
    pub async fn send_join_request(&self, destination: &Node, term: u64, join: Option<Join>) -> Result<()> {
        if !self.transport.is_connected(destination) {
            let transport = self.transport.clone();
            let timeout = self.timeout;
            retry_with_backoff(
                || transport.connect(&destination.address, timeout),
                CONNECT_ATTEMPTS,
                CONNECT_BACKOFF,
            )
            .await?;
        }

        let request = JoinRequest {
            source_node: self.transport.local_node(),
            minimum_term: term,
            join,
        };
        let _: Empty = send_typed(
            self.transport.as_ref(),
            destination,
            Action::Join,
            &request,
            self.timeout,
        )
        .await?;
        tracing::debug!("join to {} in term {} accepted", destination, term);
        Ok(())
    }
}
