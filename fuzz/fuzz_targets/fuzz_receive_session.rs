//! Fuzz target for the receive-pack session.
//!
//! Feeds arbitrary bytes, split at a fuzzer-chosen chunk size, through a
//! receive-pack session backed by an in-memory store.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use packhouse_git::{ProtocolConfig, Service, Session};
use packhouse_storage::MemoryStore;
use std::sync::Arc;

#[derive(Arbitrary, Debug)]
struct Input {
    chunk: u8,
    upload: bool,
    body: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let service = if input.upload {
        Service::UploadPack
    } else {
        Service::ReceivePack
    };
    let store = Arc::new(MemoryStore::new());
    let mut session = Session::new(service, store, ProtocolConfig::default());

    futures::executor::block_on(async {
        for piece in input.body.chunks(usize::from(input.chunk.max(1))) {
            if session.feed(piece).await.is_err() {
                return;
            }
        }
        if session.finish().await.is_ok() {
            let mut out = Vec::new();
            let _ = session.respond(&mut out).await;
        }
    });
});
