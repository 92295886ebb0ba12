fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use hackchat_protocol::{EventType, Message};

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn read_fixture(name: &str) -> String {
        let path = fixtures_dir().join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values (order- and whitespace-independent).
    ///
    /// Parses from text rather than from a `Value` because the envelope's
    /// raw payload only deserializes from a string source.
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let text = read_fixture(name);
        let fixture: serde_json::Value = serde_json::from_str(&text)
            .unwrap_or_else(|e| panic!("failed to parse fixture {name}: {e}"));
        let parsed: T = serde_json::from_str(&text)
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  wire: {fixture}\n  Rust: {reserialized}"
        );
        parsed
    }

    // --- Client requests ---

    #[test]
    fn fixture_join_room() {
        let msg = roundtrip_test::<Message>("join_room.json");
        assert_eq!(msg.msg_type, EventType::JoinRoom);
        let req: hackchat_protocol::JoinRoomRequest = msg.require_payload().unwrap();
        assert_eq!(req.user_name, "neo");
    }

    #[test]
    fn fixture_chat_message_request() {
        roundtrip_test::<hackchat_protocol::ChatMessageRequest>("chat_message_request.json");
    }

    #[test]
    fn fixture_start_file_transfer_request() {
        let req = roundtrip_test::<hackchat_protocol::StartFileTransferRequest>(
            "start_file_transfer_request.json",
        );
        assert_eq!(req.file_size, 30);
    }

    #[test]
    fn fixture_file_chunk_request() {
        let req = roundtrip_test::<hackchat_protocol::FileChunkRequest>("file_chunk_request.json");
        assert_eq!(req.chunk, b"hello world");
        assert!(req.is_last_chunk);
    }

    // --- Server events ---

    #[test]
    fn fixture_text_message() {
        roundtrip_test::<hackchat_protocol::TextMessage>("text_message.json");
    }

    #[test]
    fn fixture_file_transfer_ready() {
        let msg = roundtrip_test::<Message>("file_transfer_ready.json");
        assert_eq!(msg.id, "start-1");
        assert_eq!(msg.msg_type, EventType::FileTransferReady);
    }

    #[test]
    fn fixture_chunk_received() {
        roundtrip_test::<hackchat_protocol::ChunkReceived>("chunk_received.json");
    }

    #[test]
    fn fixture_file_message() {
        let file = roundtrip_test::<hackchat_protocol::FileMessage>("file_message.json");
        assert_eq!(file.file_content.len() as u64, file.file_size);
    }

    #[test]
    fn fixture_chunk_error() {
        let msg = roundtrip_test::<Message>("chunk_error.json");
        assert_eq!(msg.msg_type, EventType::FileTransferError);
        let payload: hackchat_protocol::TransferErrorPayload = msg.require_payload().unwrap();
        assert_eq!(payload.transfer_id, "3f2a9c-1700000000000-0");
    }

    #[test]
    fn fixture_oversized_error() {
        let msg = roundtrip_test::<Message>("oversized_error.json");
        assert!(msg.payload.is_none());
        assert_eq!(
            msg.error.unwrap().kind,
            hackchat_protocol::ErrorKind::OversizedFile
        );
    }

    // --- Legacy spellings ---

    #[test]
    fn camel_case_events_normalize_to_kebab() {
        let msg: Message = serde_json::from_str(
            r#"{"type":"chatMessage","payload":{"room":"r","userName":"u","message":"m"}}"#,
        )
        .unwrap();
        assert_eq!(msg.msg_type, EventType::ChatMessage);

        let out = serde_json::to_value(&msg).unwrap();
        assert_eq!(out["type"], "chat-message");
    }

    #[test]
    fn file_id_normalizes_to_transfer_id() {
        let req: hackchat_protocol::FileChunkRequest =
            serde_json::from_str(r#"{"fileId":"legacy","chunk":"","chunkIndex":0}"#).unwrap();
        let out = serde_json::to_value(&req).unwrap();
        assert_eq!(out["transferId"], "legacy");
        assert!(out.get("fileId").is_none());
    }
}
