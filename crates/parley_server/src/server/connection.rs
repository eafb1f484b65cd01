#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use bytes::BytesMut;
use parley_protocol::{
	ClientEvent, DEFAULT_MAX_FRAME_SIZE, FramingError, ServerEvent, encode_frame, try_decode_frame_from_buffer,
};
use parley_util::time::unix_ms_now;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::server::handshake::SessionHandshake;
use crate::server::router::{EventRouter, Session};

/// Per-connection transport settings.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
	pub max_frame_bytes: usize,

	/// Bound on the per-connection outbound queue; fan-out drops events for
	/// this connection beyond it instead of blocking the room.
	pub outbound_queue_capacity: usize,

	/// Budget for the whole handshake (first frame + identity verification).
	pub handshake_timeout: Duration,
}

impl Default for ConnectionSettings {
	fn default() -> Self {
		Self {
			max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
			outbound_queue_capacity: 256,
			handshake_timeout: Duration::from_secs(10),
		}
	}
}

enum Inbound {
	Event(ClientEvent),
	/// Frame consumed but the payload did not decode; reported to the
	/// origin, the connection survives.
	Malformed,
}

/// Drive one QUIC connection: framed reader, handshake, sequential event
/// loop, framed writer.
pub async fn handle_connection(
	conn_id: u64,
	connection: quinn::Connection,
	handshake: Arc<SessionHandshake>,
	router: Arc<EventRouter>,
	settings: ConnectionSettings,
) -> anyhow::Result<()> {
	struct ConnectionGaugeGuard;
	impl Drop for ConnectionGaugeGuard {
		fn drop(&mut self) {
			metrics::gauge!("parley_server_active_connections").decrement(1.0);
		}
	}

	metrics::gauge!("parley_server_active_connections").increment(1.0);
	let _conn_guard = ConnectionGaugeGuard;

	let (mut send_stream, mut recv_stream) = connection
		.accept_bi()
		.await
		.context("accept bidirectional event stream")?;

	let (in_tx, mut in_rx) = mpsc::unbounded_channel::<Inbound>();
	let max_frame = settings.max_frame_bytes;

	let reader_task = tokio::spawn(async move {
		let mut buf = BytesMut::with_capacity(16 * 1024);
		let mut tmp = [0u8; 8192];

		loop {
			let n = match recv_stream.read(&mut tmp).await {
				Ok(Some(n)) => n,
				Ok(None) => return Ok::<(), anyhow::Error>(()),
				Err(e) => return Err(anyhow!(e).context("event stream read failed")),
			};

			metrics::counter!("parley_server_bytes_in_total").increment(n as u64);
			buf.extend_from_slice(&tmp[..n]);

			loop {
				match try_decode_frame_from_buffer::<ClientEvent>(&mut buf, max_frame) {
					Ok(Some(event)) => {
						if in_tx.send(Inbound::Event(event)).is_err() {
							return Ok(());
						}
					}
					Ok(None) => break,
					Err(FramingError::Json(e)) => {
						debug!(error = %e, "malformed event payload");
						if in_tx.send(Inbound::Malformed).is_err() {
							return Ok(());
						}
					}
					Err(e) => return Err(anyhow!(e).context("failed to decode event frame")),
				}
			}
		}
	});

	// handshake: the first frame must be `hello`, and identity verification
	// must complete within the budget; otherwise drop with no side effects
	let (token, client_name) = match tokio::time::timeout(settings.handshake_timeout, in_rx.recv()).await {
		Ok(Some(Inbound::Event(ClientEvent::Hello { token, client_name }))) => (token, client_name),
		Ok(Some(_)) => {
			debug!(conn_id, "first frame was not hello");
			write_event(&mut send_stream, &ServerEvent::error("expected hello"), max_frame)
				.await
				.ok();
			let _ = send_stream.finish();
			return Ok(());
		}
		Ok(None) => return Ok(()),
		Err(_) => {
			debug!(conn_id, "handshake timed out waiting for hello");
			return Ok(());
		}
	};

	let ticket = match tokio::time::timeout(settings.handshake_timeout, handshake.authenticate(token.as_deref())).await
	{
		Ok(Ok(ticket)) => ticket,
		Ok(Err(e)) => {
			warn!(conn_id, error = %e, "handshake rejected");
			metrics::counter!("parley_server_handshake_rejected_total").increment(1);
			write_event(&mut send_stream, &ServerEvent::error(e.client_message()), max_frame)
				.await
				.ok();
			let _ = send_stream.finish();
			return Ok(());
		}
		Err(_) => {
			debug!(conn_id, "handshake timed out during identity verification");
			return Ok(());
		}
	};

	info!(
		conn_id,
		user_id = %ticket.principal.user_id,
		tenant_id = %ticket.principal.tenant_id,
		client_name = client_name.as_deref().unwrap_or(""),
		rooms = ticket.rooms.len(),
		"connection authenticated"
	);
	metrics::counter!("parley_server_handshake_total").increment(1);

	let (out_tx, mut out_rx) = mpsc::channel::<ServerEvent>(settings.outbound_queue_capacity);

	// welcome must be the first frame on the wire, ahead of any fan-out
	// triggered by registration
	let welcome = ServerEvent::Welcome {
		user_id: ticket.principal.user_id,
		user_name: ticket.principal.display_name(),
		channel_ids: ticket.channel_ids.clone(),
		server_time_ms: unix_ms_now(),
	};
	out_tx.try_send(welcome).ok();

	let writer_task = tokio::spawn(async move {
		while let Some(event) = out_rx.recv().await {
			let frame = match encode_frame(&event, max_frame) {
				Ok(f) => f,
				Err(e) => return Err(anyhow!(e).context("failed to encode event frame")),
			};

			metrics::counter!("parley_server_bytes_out_total").increment(frame.len() as u64);
			metrics::counter!("parley_server_events_out_total", "event" => event.kind_str()).increment(1);

			if let Err(e) = send_stream.write_all(&frame).await {
				return Err(anyhow!(e).context("event stream write failed"));
			}
		}
		Ok::<(), anyhow::Error>(())
	});

	let mut session = Session::new(conn_id, ticket.principal.clone(), out_tx.clone());
	router.register_session(&mut session, &ticket).await;

	// events from this connection are processed strictly in arrival order
	while let Some(inbound) = in_rx.recv().await {
		match inbound {
			Inbound::Event(event) => router.handle_event(&mut session, event).await,
			Inbound::Malformed => session.reply(ServerEvent::error("invalid payload")),
		}
	}

	router.disconnect(&mut session).await;

	// all outbound senders are gone once the session and our local handle
	// drop; the writer drains what is queued and exits
	drop(session);
	drop(out_tx);

	if let Ok(Err(e)) = reader_task.await {
		debug!(conn_id, error = %e, "reader exited with error");
	}
	if let Ok(Err(e)) = writer_task.await {
		debug!(conn_id, error = %e, "writer exited with error");
	}

	info!(conn_id, "connection closed");
	Ok(())
}

async fn write_event(
	stream: &mut quinn::SendStream,
	event: &ServerEvent,
	max_frame: usize,
) -> anyhow::Result<()> {
	let frame = encode_frame(event, max_frame)?;
	stream.write_all(&frame).await.context("write event frame")?;
	Ok(())
}
