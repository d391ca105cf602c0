//! End-to-end smart HTTP tests: advertise, push, then fetch against one
//! in-memory store.

use packhouse_git::pack::{deflate, encode_entry_header, write_pack_header};
use packhouse_git::{
    advertise_refs, pkt_line, Band, PktLine, ProtocolConfig, Service, Session, FLUSH_PKT,
};
use packhouse_storage::{
    create_commit, create_tree, Commit, GitObject, GitStorage, MemoryStore, ObjectId, TreeEntry,
    MODE_FILE,
};
use sha1::{Digest, Sha1};
use std::sync::Arc;

/// Demultiplexed response.
#[derive(Default)]
struct Response {
    /// Packets outside the side-band.
    lines: Vec<PktLine>,
    data: Vec<u8>,
    progress: Vec<u8>,
    errors: Vec<u8>,
}

fn demux(mut out: &[u8]) -> Response {
    let mut response = Response::default();
    while let Some((pkt, used)) = PktLine::decode(out).unwrap() {
        out = &out[used..];
        let Some(payload) = pkt.data() else {
            response.lines.push(pkt);
            continue;
        };
        match payload.first() {
            Some(&b) if b == Band::Data as u8 => response.data.extend_from_slice(&payload[1..]),
            Some(&b) if b == Band::Progress as u8 => {
                response.progress.extend_from_slice(&payload[1..])
            }
            Some(&b) if b == Band::Error as u8 => response.errors.extend_from_slice(&payload[1..]),
            _ => response.lines.push(pkt),
        }
    }
    assert!(out.is_empty(), "trailing bytes in response");
    response
}

fn sample_commit(tree: ObjectId, parents: Vec<ObjectId>, message: &str) -> GitObject {
    create_commit(&Commit {
        tree,
        parents,
        author: "Alice <alice@example.com> 1700000000 +0000".to_string(),
        committer: "Alice <alice@example.com> 1700000000 +0000".to_string(),
        message: format!("{}\n", message),
    })
}

fn build_pack(objects: &[GitObject]) -> Vec<u8> {
    let mut pack = Vec::new();
    write_pack_header(&mut pack, objects.len() as u32);
    for object in objects {
        encode_entry_header(&mut pack, object.object_type.pack_type(), object.size());
        pack.extend_from_slice(&deflate(&object.data).unwrap());
    }
    let digest = Sha1::digest(&pack);
    pack.extend_from_slice(&digest);
    pack
}

fn push_body(updates: &[(ObjectId, ObjectId, &str)], objects: &[GitObject]) -> Vec<u8> {
    let mut body = Vec::new();
    for (i, (old, new, name)) in updates.iter().enumerate() {
        let line = if i == 0 {
            format!("{} {} {}\0report-status side-band-64k\n", old, new, name)
        } else {
            format!("{} {} {}\n", old, new, name)
        };
        body.extend(pkt_line(&[line.as_bytes()]));
    }
    body.extend_from_slice(FLUSH_PKT);
    body.extend(build_pack(objects));
    body
}

fn fetch_body(wants: &[ObjectId], haves: &[ObjectId], extra: &[&str]) -> Vec<u8> {
    let mut body = Vec::new();
    for (i, want) in wants.iter().enumerate() {
        let line = if i == 0 {
            format!("want {} side-band-64k\n", want)
        } else {
            format!("want {}\n", want)
        };
        body.extend(pkt_line(&[line.as_bytes()]));
    }
    for line in extra {
        body.extend(pkt_line(&[format!("{}\n", line).as_bytes()]));
    }
    body.extend_from_slice(FLUSH_PKT);
    for have in haves {
        body.extend(pkt_line(&[format!("have {}\n", have).as_bytes()]));
    }
    body.extend(pkt_line(&[b"done\n"]));
    body
}

async fn run(store: &Arc<MemoryStore>, service: Service, body: &[u8], chunk: usize) -> Response {
    let mut session = Session::new(service, store.clone(), ProtocolConfig::default());
    for piece in body.chunks(chunk.max(1)) {
        session.feed(piece).await.unwrap();
    }
    session.finish().await.unwrap();
    let mut out = Vec::new();
    session.respond(&mut out).await.unwrap();
    demux(&out)
}

/// Walks the entries of a received pack and returns their type codes.
fn pack_types(pack: &[u8]) -> Vec<u8> {
    use packhouse_git::pack::{decode_entry_header, inflate, parse_pack_header, PACK_HEADER_LEN};

    let mut header = [0u8; PACK_HEADER_LEN];
    header.copy_from_slice(&pack[..PACK_HEADER_LEN]);
    let count = parse_pack_header(&header).unwrap();
    let mut pos = PACK_HEADER_LEN;
    let mut types = Vec::new();
    for _ in 0..count {
        let entry = decode_entry_header(&pack[pos..]).unwrap().unwrap();
        pos += entry.len;
        let (_, used) = inflate(&pack[pos..], entry.size).unwrap().unwrap();
        pos += used;
        types.push(entry.type_code);
    }
    assert_eq!(pos + 20, pack.len());
    types
}

#[tokio::test]
async fn test_advertise_push_fetch() {
    let store = Arc::new(MemoryStore::new());

    let advertisement = advertise_refs(store.as_ref(), Service::UploadPack)
        .await
        .unwrap();
    let text = String::from_utf8_lossy(&advertisement);
    assert!(text.contains(&format!("{} capabilities^{{}}\0", ObjectId::ZERO)));

    let commit = sample_commit(ObjectId::from_bytes([7; 20]), vec![], "initial");
    let body = push_body(&[(ObjectId::ZERO, commit.id, "refs/heads/test")], &[commit.clone()]);
    let pushed = run(&store, Service::ReceivePack, &body, body.len()).await;

    let report = demux(&pushed.data);
    let statuses: Vec<&str> = report.lines.iter().filter_map(|l| l.as_str()).collect();
    assert_eq!(statuses, vec!["unpack ok", "ok refs/heads/test"]);
    assert!(report.lines.last().unwrap().is_flush());
    assert_eq!(
        String::from_utf8_lossy(&pushed.progress),
        "Received 1 ref and 1 object\n\n"
    );

    let refs = store.get_refs().await.unwrap();
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].id, commit.id);

    let body = fetch_body(&[commit.id], &[], &[]);
    let fetched = run(&store, Service::UploadPack, &body, body.len()).await;
    assert_eq!(fetched.lines[0].as_str(), Some("NAK"));
    assert!(fetched.lines.last().unwrap().is_flush());

    let pack = fetched.data;
    assert_eq!(&pack[8..12], &1u32.to_be_bytes());
    let expected = Sha1::digest(&pack[..pack.len() - 20]);
    assert_eq!(&pack[pack.len() - 20..], expected.as_slice());
    assert_eq!(pack_types(&pack), vec![1]);
    assert_eq!(String::from_utf8_lossy(&fetched.progress), "ACK 1 objects\n");
}

#[tokio::test]
async fn test_push_history_then_incremental_fetch() {
    let store = Arc::new(MemoryStore::new());
    let blob = GitObject::blob(b"fn main() {}\n".to_vec());
    let tree = create_tree(&[TreeEntry::new(MODE_FILE, "main.rs", blob.id)]);
    let first = sample_commit(tree.id, vec![], "first");
    let blob2 = GitObject::blob(b"fn main() { println!(\"hi\"); }\n".to_vec());
    let tree2 = create_tree(&[TreeEntry::new(MODE_FILE, "main.rs", blob2.id)]);
    let second = sample_commit(tree2.id, vec![first.id], "second");

    let objects = vec![
        blob.clone(),
        tree.clone(),
        first.clone(),
        blob2.clone(),
        tree2.clone(),
        second.clone(),
    ];
    let body = push_body(&[(ObjectId::ZERO, second.id, "refs/heads/main")], &objects);
    run(&store, Service::ReceivePack, &body, 13).await;
    assert_eq!(store.object_count(), 6);
    assert_eq!(
        store.get_head_ref().await.unwrap().as_deref(),
        Some("refs/heads/main")
    );

    let body = fetch_body(&[second.id], &[first.id], &[]);
    let fetched = run(&store, Service::UploadPack, &body, 5).await;
    assert_eq!(
        fetched.lines[0].as_str().unwrap(),
        format!("ACK {}", first.id)
    );
    let mut types = pack_types(&fetched.data);
    types.sort_unstable();
    assert_eq!(types, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_shallow_fetch_reports_boundary() {
    let store = Arc::new(MemoryStore::new());
    let blob = GitObject::blob(b"data".to_vec());
    let tree = create_tree(&[TreeEntry::new(MODE_FILE, "f", blob.id)]);
    let first = sample_commit(tree.id, vec![], "first");
    let second = sample_commit(tree.id, vec![first.id], "second");
    let body = push_body(
        &[(ObjectId::ZERO, second.id, "refs/heads/main")],
        &[blob, tree, first, second.clone()],
    );
    run(&store, Service::ReceivePack, &body, body.len()).await;

    let body = fetch_body(&[second.id], &[], &["deepen 1"]);
    let fetched = run(&store, Service::UploadPack, &body, body.len()).await;
    assert_eq!(
        fetched.lines[0].as_str().unwrap(),
        format!("shallow {}", second.id)
    );
    assert!(fetched.lines[1].is_flush());
    // Commits only, and not past the boundary.
    assert_eq!(pack_types(&fetched.data), vec![1]);
}

#[tokio::test]
async fn test_chunking_does_not_change_result() {
    let commit = sample_commit(ObjectId::from_bytes([3; 20]), vec![], "chunked");
    let blob = GitObject::blob(vec![b'z'; 5000]);
    let body = push_body(
        &[
            (ObjectId::ZERO, commit.id, "refs/heads/a"),
            (ObjectId::ZERO, blob.id, "refs/tags/blob"),
        ],
        &[commit.clone(), blob.clone()],
    );

    let mut outputs = Vec::new();
    for chunk in [1, 2, 7, 64, body.len()] {
        let store = Arc::new(MemoryStore::new());
        let response = run(&store, Service::ReceivePack, &body, chunk).await;
        assert!(store.contains(&commit.id));
        assert!(store.contains(&blob.id));
        outputs.push(response.data);
    }
    assert!(outputs.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test]
async fn test_malformed_want_rejected() {
    let store = Arc::new(MemoryStore::new());
    let mut body = pkt_line(&[format!("want {}\n", "g".repeat(40)).as_bytes()]);
    body.extend(pkt_line(&[b"done\n"]));
    let mut session = Session::new(Service::UploadPack, store, ProtocolConfig::default());
    assert!(session.feed(&body).await.is_err());
}

#[tokio::test]
async fn test_corrupt_stored_object_reports_integrity_error() {
    use async_trait::async_trait;
    use packhouse_storage::{ObjectMeta, ObjectPayload, PushCommand, Ref, Result};

    /// Serves a different payload than the one its id claims.
    struct Tampered(MemoryStore);

    #[async_trait]
    impl GitStorage for Tampered {
        async fn get_refs(&self) -> Result<Vec<Ref>> {
            self.0.get_refs().await
        }
        async fn get_head_ref(&self) -> Result<Option<String>> {
            self.0.get_head_ref().await
        }
        async fn get_object(&self, id: &ObjectId) -> Result<GitObject> {
            self.0.get_object(id).await
        }
        async fn get_object_meta(&self, id: &ObjectId) -> Result<ObjectMeta> {
            self.0.get_object_meta(id).await
        }
        async fn get_object_data(&self, _meta: &ObjectMeta) -> Result<ObjectPayload> {
            Ok(ObjectPayload::Plain(b"tampered".to_vec().into()))
        }
        async fn store_object(&self, object: GitObject) -> Result<ObjectId> {
            self.0.store_object(object).await
        }
        async fn receive_pack(&self, commands: &[PushCommand], objects: &[ObjectId]) -> Result<()> {
            self.0.receive_pack(commands, objects).await
        }
    }

    let inner = MemoryStore::new();
    let blob = GitObject::blob(b"original".to_vec());
    inner.store_object(blob.clone()).await.unwrap();
    let store: Arc<dyn GitStorage> = Arc::new(Tampered(inner));

    let mut session = Session::new(Service::UploadPack, store, ProtocolConfig::default());
    session.feed(&fetch_body(&[blob.id], &[], &[])).await.unwrap();
    session.finish().await.unwrap();
    let mut out = Vec::new();
    assert!(session.respond(&mut out).await.is_err());
    let response = demux(&out);
    assert!(String::from_utf8_lossy(&response.errors).contains(&blob.id.to_hex()));
}
