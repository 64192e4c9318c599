#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use nxcp::core::codec::{decode, FrameCodec};
use nxcp::protocol::encryption::EncryptionContext;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    let mut codec = FrameCodec::new(64 * 1024);
    let mut buf = BytesMut::from(data);
    let ctx = EncryptionContext::new(0, [0x5A; 32]).ok();

    while let Ok(Some(frame)) = codec.decode(&mut buf) {
        if let Some(ctx) = &ctx {
            let _ = ctx.decrypt(&frame);
        }
        let _ = decode(&frame);
    }
});
