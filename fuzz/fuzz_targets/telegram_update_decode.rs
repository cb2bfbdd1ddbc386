#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use tdrive_channel_ingest::telegram_bot_api::decode_get_updates_body;
use tdrive_channel_ingest::{
    extract_document, ChannelBinding, IngestCounters, PlatformUpdates, UpdateDispatcher,
};

const FUZZ_CHANNEL_ID: i64 = -1_001_234_567_890;
const FUZZ_EXPECTED_OFFSET: i64 = 100;

fuzz_target!(|data: &[u8]| {
    let Ok(polled) = decode_get_updates_body(data, Some(FUZZ_EXPECTED_OFFSET)) else {
        return;
    };
    for (index, shape) in polled.shapes.iter().enumerate() {
        if matches!(shape, PlatformUpdates::TooLong { .. }) {
            assert_eq!(index, 0, "gap marker must lead the batch");
            assert!(polled.next_offset.is_some());
        }
    }

    let Ok(binding) = ChannelBinding::new(FUZZ_CHANNEL_ID, None) else {
        return;
    };
    let dispatcher = UpdateDispatcher::new(Arc::new(binding), Arc::new(IngestCounters::new()));
    for shape in polled.shapes {
        for message in dispatcher.dispatch(shape) {
            if let Ok(document) = extract_document(&message) {
                assert!(!document.file_name.trim().is_empty());
                assert!(!document.mime_type.is_empty());
            }
        }
    }
});
