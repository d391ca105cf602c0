//! Streams a pack over the data side-band.

use crate::pack::{deflate, encode_entry_header, write_pack_header};
use crate::pktline::{banded_lines, Band};
use crate::{GitError, PacketSink, ProtocolConfig, Result};
use bytes::Bytes;
use futures::future::join_all;
use packhouse_storage::{GitObject, GitStorage, ObjectId, ObjectMeta, ObjectPayload};
use sha1::{Digest, Sha1};

/// Writes a pack for a list of object ids to a [`PacketSink`], hashing
/// every emitted pack byte for the trailing checksum.
///
/// The sink is checked before every object; once it reports closed the
/// writer stops with [`GitError::ClientDisconnected`] and emits nothing
/// further, not even the checksum.
pub struct PackWriter<'a, K: PacketSink + ?Sized> {
    sink: &'a mut K,
    hasher: Sha1,
}

impl<'a, K: PacketSink + ?Sized> PackWriter<'a, K> {
    /// Creates a writer on `sink`.
    pub fn new(sink: &'a mut K) -> Self {
        Self {
            sink,
            hasher: Sha1::new(),
        }
    }

    async fn emit(&mut self, bytes: &[u8]) -> Result<()> {
        if self.sink.is_closed() {
            return Err(GitError::ClientDisconnected);
        }
        self.hasher.update(bytes);
        self.sink
            .send(Bytes::from(banded_lines(Band::Data, &[bytes])))
            .await
    }

    /// Streams header, objects and checksum. Returns the pack checksum.
    pub async fn write_pack(
        mut self,
        storage: &dyn GitStorage,
        ids: &[ObjectId],
        config: &ProtocolConfig,
    ) -> Result<[u8; 20]> {
        let count = u32::try_from(ids.len())
            .map_err(|_| GitError::InvalidPack(format!("too many objects: {}", ids.len())))?;
        let mut header = Vec::with_capacity(crate::pack::PACK_HEADER_LEN);
        write_pack_header(&mut header, count);
        self.emit(&header).await?;

        let mut sent = 0usize;
        for chunk in ids.chunks(config.batch_size.max(1)) {
            let metas = join_all(chunk.iter().map(|id| storage.get_object_meta(id))).await;
            let metas = metas.into_iter().collect::<packhouse_storage::Result<Vec<_>>>()?;
            let payloads = join_all(metas.iter().map(|meta| storage.get_object_data(meta))).await;

            for (meta, payload) in metas.iter().zip(payloads) {
                let entry = encode_entry(meta, payload?)?;
                self.emit(&entry).await?;
                sent += 1;
                if config.progress_interval > 0 && sent % config.progress_interval == 0 {
                    tracing::debug!(sent, total = ids.len(), "streaming pack");
                }
            }
        }

        let mut checksum = [0u8; 20];
        checksum.copy_from_slice(&self.hasher.finalize_reset());
        if self.sink.is_closed() {
            return Err(GitError::ClientDisconnected);
        }
        self.sink
            .send(Bytes::from(banded_lines(Band::Data, &[&checksum])))
            .await?;
        Ok(checksum)
    }
}

/// Builds one pack entry. Deflated payloads are copied verbatim once the
/// inflated bytes hash to the claimed id; plain payloads are compressed.
fn encode_entry(meta: &ObjectMeta, payload: ObjectPayload) -> Result<Vec<u8>> {
    let (data, compressed) = match payload {
        ObjectPayload::Plain(data) => {
            let compressed = deflate(&data)?;
            (data, compressed)
        }
        ObjectPayload::Deflated(stream) => {
            let data = ObjectPayload::Deflated(stream.clone()).into_plain()?;
            (data, stream.to_vec())
        }
    };

    let object = GitObject::new(meta.object_type, data);
    if !object.matches(&meta.id) {
        return Err(GitError::DataIntegrity(format!(
            "{} {} does not match its content",
            meta.object_type, meta.id
        )));
    }

    let mut entry = Vec::with_capacity(compressed.len() + 10);
    encode_entry_header(&mut entry, meta.object_type.pack_type(), object.size());
    entry.extend_from_slice(&compressed);
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::{decode_entry_header, inflate, PACK_HEADER_LEN};
    use crate::pktline::PktLine;
    use async_trait::async_trait;
    use packhouse_storage::{MemoryStore, ObjectType};

    /// Collects the data-band payload of a response.
    fn unband(out: &[u8]) -> Vec<u8> {
        let mut rest = out;
        let mut data = Vec::new();
        while let Some((pkt, used)) = PktLine::decode(rest).unwrap() {
            let payload = pkt.data().unwrap();
            assert_eq!(payload[0], Band::Data as u8);
            data.extend_from_slice(&payload[1..]);
            rest = &rest[used..];
        }
        assert!(rest.is_empty());
        data
    }

    async fn store_with(objects: &[GitObject], compress: bool) -> MemoryStore {
        let store = MemoryStore::new().with_compression(compress);
        for object in objects {
            store.store_object(object.clone()).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_write_pack_layout() {
        let blob = GitObject::blob(b"Hello, World!".to_vec());
        let store = store_with(&[blob.clone()], false).await;
        let mut out = Vec::new();

        let checksum = PackWriter::new(&mut out)
            .write_pack(&store, &[blob.id], &ProtocolConfig::default())
            .await
            .unwrap();

        let pack = unband(&out);
        assert_eq!(&pack[..4], b"PACK");
        assert_eq!(&pack[4..8], &2u32.to_be_bytes());
        assert_eq!(&pack[8..12], &1u32.to_be_bytes());

        let body = &pack[..pack.len() - 20];
        let expected = Sha1::digest(body);
        assert_eq!(&pack[pack.len() - 20..], expected.as_slice());
        assert_eq!(checksum.as_slice(), expected.as_slice());

        let header = decode_entry_header(&pack[PACK_HEADER_LEN..]).unwrap().unwrap();
        assert_eq!(header.type_code, ObjectType::Blob.pack_type());
        assert_eq!(header.size, 13);
        let (data, _) = inflate(&pack[PACK_HEADER_LEN + header.len..], header.size)
            .unwrap()
            .unwrap();
        assert_eq!(data, b"Hello, World!");
    }

    #[tokio::test]
    async fn test_empty_pack() {
        let store = MemoryStore::new();
        let mut out = Vec::new();
        PackWriter::new(&mut out)
            .write_pack(&store, &[], &ProtocolConfig::default())
            .await
            .unwrap();
        assert_eq!(unband(&out).len(), 32);
    }

    #[tokio::test]
    async fn test_compressed_objects_pass_through() {
        let objects: Vec<GitObject> = (0..5)
            .map(|i| GitObject::blob(format!("object {}", i).into_bytes()))
            .collect();
        let ids: Vec<ObjectId> = objects.iter().map(|o| o.id).collect();
        let plain = store_with(&objects, false).await;
        let packed = store_with(&objects, true).await;
        let config = ProtocolConfig {
            batch_size: 2,
            ..ProtocolConfig::default()
        };

        let mut a = Vec::new();
        let mut b = Vec::new();
        PackWriter::new(&mut a).write_pack(&plain, &ids, &config).await.unwrap();
        PackWriter::new(&mut b).write_pack(&packed, &ids, &config).await.unwrap();
        // Same default compression level on both paths.
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_missing_object_fails() {
        let store = MemoryStore::new();
        let mut out = Vec::new();
        let result = PackWriter::new(&mut out)
            .write_pack(&store, &[ObjectId::from_bytes([1; 20])], &ProtocolConfig::default())
            .await;
        assert!(matches!(result, Err(GitError::Storage(_))));
    }

    #[test]
    fn test_integrity_mismatch() {
        let meta = ObjectMeta {
            id: ObjectId::from_bytes([9; 20]),
            object_type: ObjectType::Blob,
            size: 3,
            edges: None,
        };
        let payload = ObjectPayload::deflate(b"abc").unwrap();
        assert!(matches!(
            encode_entry(&meta, payload),
            Err(GitError::DataIntegrity(_))
        ));
    }

    /// Accepts a fixed number of sends, then reports itself closed.
    struct HangUp {
        sends_left: usize,
        received: Vec<u8>,
    }

    #[async_trait]
    impl PacketSink for HangUp {
        async fn send(&mut self, bytes: Bytes) -> Result<()> {
            if self.sends_left == 0 {
                return Err(GitError::ClientDisconnected);
            }
            self.sends_left -= 1;
            self.received.extend_from_slice(&bytes);
            Ok(())
        }

        fn is_closed(&self) -> bool {
            self.sends_left == 0
        }
    }

    #[tokio::test]
    async fn test_stops_when_client_disconnects() {
        let objects: Vec<GitObject> = (0..10)
            .map(|i| GitObject::blob(format!("blob {}", i).into_bytes()))
            .collect();
        let ids: Vec<ObjectId> = objects.iter().map(|o| o.id).collect();
        let store = store_with(&objects, false).await;
        let mut sink = HangUp {
            sends_left: 3,
            received: Vec::new(),
        };

        let result = PackWriter::new(&mut sink)
            .write_pack(&store, &ids, &ProtocolConfig::default())
            .await;
        assert!(matches!(result, Err(GitError::ClientDisconnected)));
        // header + two objects, no checksum
        let pack = unband(&sink.received);
        assert!(pack.starts_with(b"PACK"));
        assert!(pack.len() < 12 + 20 + 10 * 10);
    }
}
