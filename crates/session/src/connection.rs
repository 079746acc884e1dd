//! Per-connection read/write tasks and frame dispatch (§4.1, §4.2, §4.5,
//! §4.6): register the connection, decode frames off the wire, route each
//! to the file transfer engine or the relay pool, and write back whatever
//! the dispatch produces for the same connection.

use std::net::SocketAddr;
use std::sync::Arc;

use pool::OutboundEnvelope;
use protocol::{decode_frame, encode_frame, CommunicationData, FrameError, InfoType};
use registry::{ClientSession, Transport};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use transfer::ChunkOutcome;

use crate::server::Collaborators;

/// A byte stream that is both readable and writable, erasing whether it's
/// plaintext TCP or a TLS session underneath.
pub(crate) trait Duplex: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Duplex for T {}

/// Registers the connection, then runs its reader and writer halves until
/// either one exits (peer closed, protocol error, or the session was
/// cancelled by the heartbeat monitor), tearing down the registration
/// afterward.
pub(crate) async fn handle_connection(
    stream: Box<dyn Duplex>,
    peer_addr: SocketAddr,
    transport: Transport,
    collaborators: Arc<Collaborators>,
) {
    let session = collaborators.registry.register(transport);
    let (sender, receiver) = mpsc::unbounded_channel::<CommunicationData>();
    collaborators.router.register(session.id, sender);

    let (read_half, write_half) = tokio::io::split(stream);

    let writer = run_writer(Arc::clone(&session), write_half, receiver);
    let reader = run_reader(Arc::clone(&session), read_half, Arc::clone(&collaborators));

    tokio::select! {
        () = writer => {}
        () = reader => {}
    }

    session.disconnect();
    collaborators.router.unregister(session.id);
    collaborators.registry.unregister(session.id);
    tracing::debug!(client_id = session.id, %peer_addr, "session closed");
}

async fn run_writer<W: AsyncWrite + Unpin>(
    session: Arc<ClientSession>,
    mut write_half: W,
    mut receiver: mpsc::UnboundedReceiver<CommunicationData>,
) {
    loop {
        tokio::select! {
            () = session.cancel.cancelled() => return,
            received = receiver.recv() => {
                let Some(data) = received else { return };
                let byte_len = data.chunk_data.len() as u64;
                if let Err(error) = encode_frame(&mut write_half, &data).await {
                    tracing::debug!(client_id = session.id, %error, "write failed, closing connection");
                    return;
                }
                session.record_sent(byte_len);
            }
        }
    }
}

async fn run_reader<R: AsyncRead + Unpin>(session: Arc<ClientSession>, mut read_half: R, collaborators: Arc<Collaborators>) {
    loop {
        tokio::select! {
            () = session.cancel.cancelled() => return,
            decoded = decode_frame(&mut read_half, collaborators.max_frame_len) => {
                match decoded {
                    Ok(mut data) => {
                        session.record_received(data.chunk_data.len() as u64);
                        data.source_id = session.id;
                        dispatch(&session, &collaborators, data).await;
                    }
                    Err(FrameError::ChecksumMismatch { expected, actual }) => {
                        tracing::debug!(client_id = session.id, expected, actual, "dropping frame with bad checksum");
                    }
                    Err(FrameError::PeerClosed) => return,
                    Err(error) => {
                        tracing::warn!(client_id = session.id, %error, "closing connection after protocol error");
                        return;
                    }
                }
            }
        }
    }
}

async fn dispatch(session: &Arc<ClientSession>, collaborators: &Arc<Collaborators>, data: CommunicationData) {
    match data.info_type {
        InfoType::HeartBeat => {
            reply_directly(collaborators, session.id, CommunicationData::ack_for(&data));
        }

        InfoType::Ack | InfoType::FileCompleteAck => {
            // Terminal; activity was already recorded when the frame was read.
        }

        InfoType::CtsFile | InfoType::StcFile | InfoType::CtcFile => match collaborators.transfer.receive_chunk(session.id, &data).await {
            Ok(ChunkOutcome::Accepted(ack)) => {
                session.record_file_received(data.chunk_data.len() as u64);
                reply_directly(collaborators, session.id, ack);
            }
            Ok(ChunkOutcome::HashMismatch) => {
                tracing::debug!(client_id = session.id, file_id = %data.file_id, chunk_index = data.chunk_index, "dropping chunk with bad hash");
            }
            Err(error) => {
                tracing::warn!(client_id = session.id, file_id = %data.file_id, %error, "file chunk rejected");
            }
        },

        InfoType::FileComplete => match collaborators.transfer.complete(&data.file_id, 0, session.id, &data.md5_hash).await {
            Ok(ack) => reply_directly(collaborators, session.id, ack),
            Err(error) => {
                tracing::warn!(client_id = session.id, file_id = %data.file_id, %error, "file completion rejected");
            }
        },

        InfoType::CtcNormal | InfoType::CtcVideo | InfoType::CtcVoice => {
            if data.target_id == 0 {
                tracing::debug!(client_id = session.id, info_type = ?data.info_type, "relayed frame has no target_id, dropping");
                return;
            }
            enqueue_relay(collaborators, data);
        }

        InfoType::CtsNormal | InfoType::StcNormal => {
            if data.target_id != 0 {
                enqueue_relay(collaborators, data);
            } else {
                reply_directly(collaborators, session.id, CommunicationData::ack_for(&data));
            }
        }
    }
}

fn reply_directly(collaborators: &Arc<Collaborators>, client_id: u32, data: CommunicationData) {
    if !collaborators.router.try_deliver(client_id, &data) {
        tracing::debug!(client_id, "could not deliver reply, connection already closed");
    }
}

fn enqueue_relay(collaborators: &Arc<Collaborators>, data: CommunicationData) {
    let priority = data.priority;
    if collaborators.pool.enqueue(priority, OutboundEnvelope::new(data)).is_err() {
        tracing::warn!("worker pool closed, dropping relay frame");
    }
}
