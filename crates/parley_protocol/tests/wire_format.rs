use bytes::BytesMut;
use parley_domain::{
	ChannelId, Message, MessageId, MessageKind, PresenceStatus, TenantId, UserId,
};
use parley_protocol::{
	ClientEvent, DELETED_TOMBSTONE, DEFAULT_MAX_FRAME_SIZE, ServerEvent, ValidationError, WireMessage,
	encode_frame_default, try_decode_frame_from_buffer,
};
use proptest::prelude::*;
use serde_json::json;

fn uid(n: u128) -> UserId {
	UserId(uuid::Uuid::from_u128(n))
}

fn cid(n: u128) -> ChannelId {
	ChannelId(uuid::Uuid::from_u128(n))
}

fn mid(n: u128) -> MessageId {
	MessageId(uuid::Uuid::from_u128(n))
}

fn sample_message() -> Message {
	Message {
		id: mid(10),
		channel_id: cid(20),
		tenant_id: TenantId(uuid::Uuid::from_u128(30)),
		sender_id: uid(40),
		sender_name: "Ada Lovelace".to_string(),
		content: "hi".to_string(),
		kind: MessageKind::Text,
		reply_to: None,
		edited: false,
		edited_at: None,
		deleted: false,
		deleted_at: None,
		deleted_by: None,
		created_at: 1_700_000_000_000,
	}
}

#[test]
fn client_events_decode_from_exact_wire_shapes() {
	let channel = cid(1);
	let reply = mid(2);

	let ev: ClientEvent = serde_json::from_value(json!({
		"type": "join_channel",
		"payload": { "channelId": channel.to_string() },
	}))
	.expect("join_channel");
	assert_eq!(ev, ClientEvent::JoinChannel { channel_id: channel });

	let ev: ClientEvent = serde_json::from_value(json!({
		"type": "send_message",
		"payload": {
			"channelId": channel.to_string(),
			"content": "hello there",
			"type": "text",
			"replyTo": reply.to_string(),
			"tempId": "tmp-1",
		},
	}))
	.expect("send_message");
	assert_eq!(
		ev,
		ClientEvent::SendMessage {
			channel_id: channel,
			content: "hello there".to_string(),
			kind: Some(MessageKind::Text),
			reply_to: Some(reply),
			temp_id: Some("tmp-1".to_string()),
		}
	);

	let ev: ClientEvent = serde_json::from_value(json!({
		"type": "status_change",
		"payload": { "status": "busy" },
	}))
	.expect("status_change");
	assert_eq!(
		ev,
		ClientEvent::StatusChange {
			status: PresenceStatus::Busy
		}
	);

	let ev: ClientEvent = serde_json::from_value(json!({
		"type": "mark_as_read",
		"payload": { "channelId": channel.to_string() },
	}))
	.expect("mark_as_read");
	assert_eq!(ev, ClientEvent::MarkAsRead { channel_id: channel });
}

#[test]
fn unknown_or_malformed_events_fail_to_decode() {
	assert!(serde_json::from_value::<ClientEvent>(json!({
		"type": "launch_missiles",
		"payload": {},
	}))
	.is_err());

	assert!(serde_json::from_value::<ClientEvent>(json!({
		"type": "join_channel",
		"payload": { "channelId": "not-a-uuid" },
	}))
	.is_err());

	assert!(serde_json::from_value::<ClientEvent>(json!({
		"type": "status_change",
		"payload": { "status": "sleeping" },
	}))
	.is_err());

	// payload object is mandatory for struct variants
	assert!(serde_json::from_value::<ClientEvent>(json!({ "type": "typing_start" })).is_err());
}

#[test]
fn server_events_serialize_with_exact_field_names() {
	let v = serde_json::to_value(ServerEvent::UserJoinedChannel {
		channel_id: cid(1),
		user_id: uid(2),
		user_name: "Grace Hopper".to_string(),
	})
	.expect("serialize");
	assert_eq!(
		v,
		json!({
			"type": "user_joined_channel",
			"payload": {
				"channelId": cid(1).to_string(),
				"userId": uid(2).to_string(),
				"userName": "Grace Hopper",
			},
		})
	);

	let v = serde_json::to_value(ServerEvent::MessagesRead {
		channel_id: cid(1),
		user_id: uid(2),
		read_at: 123,
	})
	.expect("serialize");
	assert_eq!(
		v,
		json!({
			"type": "messages_read",
			"payload": {
				"channelId": cid(1).to_string(),
				"userId": uid(2).to_string(),
				"readAt": 123,
			},
		})
	);

	let v = serde_json::to_value(ServerEvent::UserStatusChange {
		user_id: uid(2),
		status: PresenceStatus::Offline,
		last_seen: 456,
	})
	.expect("serialize");
	assert_eq!(
		v,
		json!({
			"type": "user_status_change",
			"payload": {
				"userId": uid(2).to_string(),
				"status": "offline",
				"lastSeen": 456,
			},
		})
	);

	let v = serde_json::to_value(ServerEvent::error("rate limit exceeded")).expect("serialize");
	assert_eq!(
		v,
		json!({
			"type": "error",
			"payload": { "message": "rate limit exceeded" },
		})
	);
}

#[test]
fn wire_message_field_names_and_tombstone() {
	let m = sample_message();
	let v = serde_json::to_value(WireMessage::from(&m)).expect("serialize");
	assert_eq!(
		v,
		json!({
			"id": m.id.to_string(),
			"channelId": m.channel_id.to_string(),
			"senderId": m.sender_id.to_string(),
			"senderName": "Ada Lovelace",
			"content": "hi",
			"type": "text",
			"replyTo": null,
			"edited": false,
			"editedAt": null,
			"deleted": false,
			"createdAt": 1_700_000_000_000_i64,
		})
	);

	let mut gone = sample_message();
	gone.deleted = true;
	gone.deleted_at = Some(1_700_000_100_000);
	let wire = WireMessage::from(&gone);
	assert_eq!(wire.content, DELETED_TOMBSTONE);
	assert!(wire.deleted);
	// storage copy is untouched
	assert_eq!(gone.content, "hi");
}

#[test]
fn message_sent_carries_temp_id_correlation() {
	let m = sample_message();
	let v = serde_json::to_value(ServerEvent::MessageSent {
		temp_id: Some("tmp-77".to_string()),
		message: WireMessage::from(&m),
	})
	.expect("serialize");

	assert_eq!(v["type"], "message_sent");
	assert_eq!(v["payload"]["tempId"], "tmp-77");
	assert_eq!(v["payload"]["message"]["content"], "hi");
}

#[test]
fn validation_rules() {
	let ok = ClientEvent::SendMessage {
		channel_id: cid(1),
		content: "hello".to_string(),
		kind: None,
		reply_to: None,
		temp_id: None,
	};
	assert_eq!(ok.validate(), Ok(()));

	let empty = ClientEvent::SendMessage {
		channel_id: cid(1),
		content: "   ".to_string(),
		kind: None,
		reply_to: None,
		temp_id: None,
	};
	assert_eq!(empty.validate(), Err(ValidationError::MissingContent));

	// non-text placeholders may omit content
	let file = ClientEvent::SendMessage {
		channel_id: cid(1),
		content: String::new(),
		kind: Some(MessageKind::File),
		reply_to: None,
		temp_id: None,
	};
	assert_eq!(file.validate(), Ok(()));

	let long = ClientEvent::SendMessage {
		channel_id: cid(1),
		content: "x".repeat(4001),
		kind: None,
		reply_to: None,
		temp_id: None,
	};
	assert_eq!(long.validate(), Err(ValidationError::ContentTooLong(4001)));

	let at_cap = ClientEvent::SendMessage {
		channel_id: cid(1),
		content: "x".repeat(4000),
		kind: None,
		reply_to: None,
		temp_id: None,
	};
	assert_eq!(at_cap.validate(), Ok(()));

	let offline = ClientEvent::StatusChange {
		status: PresenceStatus::Offline,
	};
	assert_eq!(offline.validate(), Err(ValidationError::StatusNotSelectable));
}

proptest! {
	#[test]
	fn framed_client_events_roundtrip(content in ".{0,200}", temp in proptest::option::of("[a-z0-9]{1,16}")) {
		let ev = ClientEvent::SendMessage {
			channel_id: cid(9),
			content,
			kind: Some(MessageKind::Text),
			reply_to: None,
			temp_id: temp,
		};

		let frame = encode_frame_default(&ev).expect("encode");
		let mut buf = BytesMut::from(&frame[..]);
		let decoded = try_decode_frame_from_buffer::<ClientEvent>(&mut buf, DEFAULT_MAX_FRAME_SIZE)
			.expect("decode")
			.expect("full frame");
		prop_assert_eq!(decoded, ev);
		prop_assert!(buf.is_empty());
	}
}
