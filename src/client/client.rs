//! The connection driver of a client.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{info, warn};

use crate::{
    message::{DecodeError, Message, MessageCodec},
    ClientId,
};

use super::{ClientError, Participant};

/// The client's position in the protocol.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum State {
    Connecting,
    KeyExchange,
    SeedExchange,
    Submitting,
}

/// One client of one protocol run.
pub struct Client {
    endpoint: String,
    values: Vec<u64>,
}

impl Client {
    /// A client that will connect to `endpoint` (a `host:port` pair) and
    /// contribute `values` as its private vector.
    pub fn new(endpoint: impl Into<String>, values: Vec<u64>) -> Self {
        Self {
            endpoint: endpoint.into(),
            values,
        }
    }

    /// Runs one full protocol pass and resolves to the aggregate the
    /// coordinator broadcast.
    ///
    /// The private vector never leaves this process unmasked; only the
    /// masked vector is submitted.
    pub async fn run(self) -> Result<Vec<u64>, ClientError> {
        let mut participant = Participant::new()?;
        let stream = TcpStream::connect(self.endpoint.as_str()).await?;
        let own_id = ClientId::from(stream.local_addr()?);
        let mut framed = Framed::new(stream, MessageCodec::new());

        framed
            .send(Message::PublicKey {
                public_key: participant.public_key(),
            })
            .await?;
        info!(client = %own_id, "connected, public key submitted");
        let mut state = State::Connecting;

        while let Some(frame) = framed.next().await {
            let message = match frame {
                Ok(message) => message,
                Err(DecodeError::Malformed(err)) => {
                    warn!(client = %own_id, error = %err, "dropping malformed frame");
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            match (state, message) {
                (_, Message::Notice { message }) => {
                    info!(client = %own_id, notice = %message, "coordinator notice");
                }
                (State::Connecting, Message::InitBaseParam { base }) => {
                    participant.set_base(base);
                    state = State::KeyExchange;
                }
                (State::KeyExchange, Message::PublicKeyBroadcast { public_keys }) => {
                    let bundles = participant.prepare_perturbations(&own_id, &public_keys)?;
                    framed
                        .send(Message::Perturbations {
                            perturbations: bundles,
                        })
                        .await?;
                    state = State::SeedExchange;
                }
                (State::SeedExchange, Message::Perturbations { perturbations }) => {
                    let masked = participant.masked_value(&own_id, &self.values, &perturbations)?;
                    framed.send(Message::Value { value: masked }).await?;
                    state = State::Submitting;
                }
                (State::Submitting, Message::AggregationResult { aggregation_result }) => {
                    info!(client = %own_id, ?aggregation_result, "received aggregation result");
                    return Ok(aggregation_result);
                }
                (state, message) => {
                    warn!(
                        client = %own_id,
                        frame = message.tag(),
                        ?state,
                        "dropping frame received out of phase"
                    );
                }
            }
        }
        Err(ClientError::ConnectionClosed)
    }
}
